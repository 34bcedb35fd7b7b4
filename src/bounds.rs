//! Running latitude/longitude extent of an activity.
//!
//! A box only exists once it has been seeded from a point, so "no extent
//! yet" is modelled as `Option<BoundingBox>` rather than a sentinel box.
//! Coordinates are folded in as given; range checks belong to the parser.

use serde::{Deserialize, Serialize};

use crate::Positioned;

/// Minimal lat/lng rectangle enclosing a set of points.
///
/// `lat_min <= lat_max` and `lng_min <= lng_max` hold for any box built from
/// finite coordinates. A single-point box (min == max) is valid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lng_min: f64,
    pub lng_max: f64,
}

impl BoundingBox {
    /// Degenerate box at one point.
    pub fn seed<P: Positioned>(point: &P) -> Self {
        let (lat, lng) = (point.latitude(), point.longitude());
        Self {
            lat_min: lat,
            lat_max: lat,
            lng_min: lng,
            lng_max: lng,
        }
    }

    /// Box covering all points, or `None` for an empty slice.
    pub fn from_points<P: Positioned>(points: &[P]) -> Option<Self> {
        let first = points.first()?;
        Some(Self::seed(first).extend(points))
    }

    /// Enlarge the box to cover every point. An empty slice leaves it unchanged.
    #[must_use]
    pub fn extend<P: Positioned>(self, points: &[P]) -> Self {
        points.iter().fold(self, |bb, p| bb.include(p))
    }

    /// Enlarge the box to cover one point.
    #[must_use]
    pub fn include<P: Positioned>(self, point: &P) -> Self {
        let (lat, lng) = (point.latitude(), point.longitude());
        Self {
            lat_min: self.lat_min.min(lat),
            lat_max: self.lat_max.max(lat),
            lng_min: self.lng_min.min(lng),
            lng_max: self.lng_max.max(lng),
        }
    }

    /// Smallest box covering both boxes.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            lat_min: self.lat_min.min(other.lat_min),
            lat_max: self.lat_max.max(other.lat_max),
            lng_min: self.lng_min.min(other.lng_min),
            lng_max: self.lng_max.max(other.lng_max),
        }
    }

    /// Fold points into an optional box, seeding it from the first point if needed.
    pub fn extend_option<P: Positioned>(bb: Option<Self>, points: &[P]) -> Option<Self> {
        match bb {
            Some(bb) => Some(bb.extend(points)),
            None => Self::from_points(points),
        }
    }

    /// Whether `other` lies entirely inside this box (edges included).
    pub fn contains(&self, other: &Self) -> bool {
        self.lat_min <= other.lat_min
            && self.lat_max >= other.lat_max
            && self.lng_min <= other.lng_min
            && self.lng_max >= other.lng_max
    }

    /// Whether the min/max ordering invariant holds.
    pub fn is_well_formed(&self) -> bool {
        self.lat_min <= self.lat_max && self.lng_min <= self.lng_max
    }
}
