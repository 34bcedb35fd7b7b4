//! Size-bounded line simplification.
//!
//! Douglas-Peucker keeps every point whose deviation from the chord of its
//! sub-segment exceeds a tolerance. Distances come from geo's Euclidean
//! metric on a lng/lat plane. [`simplify_until`] searches for the smallest
//! tolerance whose result fits a point budget: the tolerance is doubled
//! until the budget is met, then refined by bisection between the last
//! failing and first passing value. Both loops have fixed iteration caps,
//! so the search always terminates.
//!
//! The farthest point of a sub-segment is chosen with a strict comparison,
//! so ties resolve to the lowest index and results are deterministic.

use geo::{Coord, Distance, Euclidean, Line};

use crate::Positioned;

/// First tolerance tried, in degrees (~1cm).
const INITIAL_TOLERANCE: f64 = 1e-7;

/// Doubling steps before giving up and keeping only the endpoints.
/// 1e-7 * 2^64 is far beyond any distance on a lat/lng plane.
const MAX_DOUBLINGS: u32 = 64;

/// Bisection steps between the last failing and first passing tolerance.
const REFINE_STEPS: u32 = 48;

/// Reduce `points` to at most `target_count` points while preserving shape.
///
/// - If `points.len() <= target_count` the input is returned unchanged.
/// - The first and last points are always kept.
/// - A `target_count` below 2 keeps only the two endpoints (a single-point
///   input stays a single point).
///
/// # Example
/// ```
/// use effort_import::{simplify_until, Trackpoint};
///
/// let track: Vec<Trackpoint> = (0..500)
///     .map(|i| Trackpoint::new(51.5 + (i as f64 * 0.1).sin() * 0.01, -0.1 + i as f64 * 0.0001, 0.0, i))
///     .collect();
///
/// let reduced = simplify_until(&track, 50);
/// assert!(reduced.len() <= 50);
/// assert_eq!(reduced.first(), track.first());
/// assert_eq!(reduced.last(), track.last());
/// ```
pub fn simplify_until<P: Positioned + Clone>(points: &[P], target_count: usize) -> Vec<P> {
    if points.len() <= target_count || points.len() < 2 {
        return points.to_vec();
    }
    if target_count < 2 {
        return endpoints(points);
    }

    let coords = to_coords(points);
    let fits = |indices: &Vec<usize>| indices.len() <= target_count;

    // Grow the tolerance until the result fits
    let mut lo = 0.0;
    let mut hi = INITIAL_TOLERANCE;
    let mut best = None;
    for _ in 0..MAX_DOUBLINGS {
        let indices = retained_indices(&coords, hi);
        if fits(&indices) {
            best = Some(indices);
            break;
        }
        lo = hi;
        hi *= 2.0;
    }

    let Some(mut best) = best else {
        log::warn!(
            "[Simplify] Tolerance search did not converge for {} points, keeping endpoints",
            points.len()
        );
        return endpoints(points);
    };

    // Narrow down to the smallest passing tolerance
    for _ in 0..REFINE_STEPS {
        let mid = lo + (hi - lo) / 2.0;
        if mid <= lo || mid >= hi {
            break;
        }
        let indices = retained_indices(&coords, mid);
        if fits(&indices) {
            hi = mid;
            best = indices;
        } else {
            lo = mid;
        }
    }

    best.into_iter().map(|i| points[i].clone()).collect()
}

/// Douglas-Peucker indices for a fixed tolerance (in degrees).
///
/// Returns the indices of the retained points, in order. Inputs with fewer
/// than two points are returned whole.
pub fn douglas_peucker_idx<P: Positioned>(points: &[P], tolerance: f64) -> Vec<usize> {
    retained_indices(&to_coords(points), tolerance)
}

/// Iterative Douglas-Peucker over index ranges.
fn retained_indices(coords: &[Coord<f64>], tolerance: f64) -> Vec<usize> {
    let n = coords.len();
    if n < 3 {
        return (0..n).collect();
    }

    let mut keep = vec![false; n];
    keep[0] = true;
    keep[n - 1] = true;

    let mut pending = vec![(0, n - 1)];
    while let Some((first, last)) = pending.pop() {
        if last - first < 2 {
            continue;
        }
        let chord = Line::new(coords[first], coords[last]);
        let mut farthest = first;
        let mut farthest_distance = 0.0;
        for (i, coord) in coords.iter().enumerate().take(last).skip(first + 1) {
            let distance = Euclidean::distance(*coord, &chord);
            // Strict: the lowest index wins a tie
            if distance > farthest_distance {
                farthest = i;
                farthest_distance = distance;
            }
        }
        if farthest_distance > tolerance {
            keep[farthest] = true;
            pending.push((first, farthest));
            pending.push((farthest, last));
        }
    }

    keep.iter()
        .enumerate()
        .filter_map(|(i, &kept)| kept.then_some(i))
        .collect()
}

fn to_coords<P: Positioned>(points: &[P]) -> Vec<Coord<f64>> {
    points
        .iter()
        .map(|p| Coord {
            x: p.longitude(),
            y: p.latitude(),
        })
        .collect()
}

fn endpoints<P: Clone>(points: &[P]) -> Vec<P> {
    match (points.first(), points.last()) {
        (Some(first), Some(last)) if points.len() > 1 => vec![first.clone(), last.clone()],
        _ => points.to_vec(),
    }
}
