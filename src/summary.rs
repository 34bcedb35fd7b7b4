//! Ride summaries for activity pickers.
//!
//! A summary is computed from a parsed document without touching storage:
//! a small coordinate preview (4 decimals, at most `preview_points`), its
//! encoded polyline for static map images, the display name and the lap
//! totals of TCX files.

use geo::{Coord, LineString};
use serde::Serialize;

use crate::{simplify_until, Geocoder, ImportConfig, ParsedActivity};

/// Name used when neither the user, the document nor the geocoder has one.
pub const UNTITLED: &str = "Untitled";

/// Name used when the geocoder lookup itself failed.
pub const UNNAMED: &str = "Unnamed";

/// Preview of a parsed activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RideSummary {
    /// Device or service identifier found in the document
    pub source_id: Option<String>,
    pub name: String,
    /// Summed lap distance in meters (TCX), rounded
    pub distance_meters: u64,
    /// Summed lap duration in seconds (TCX), rounded
    pub duration_seconds: u64,
    /// (latitude, longitude) pairs rounded to 4 decimals
    pub preview: Vec<(f64, f64)>,
    /// Google encoded polyline of `preview`, precision 5
    pub encoded_path: String,
}

/// Summarize a parsed activity.
pub fn summarize(
    parsed: &ParsedActivity,
    geocoder: Option<&dyn Geocoder>,
    config: &ImportConfig,
) -> RideSummary {
    let preview = preview_coordinates(parsed, config.preview_points);

    let line: LineString<f64> = preview
        .iter()
        .map(|&(lat, lng)| Coord { x: lng, y: lat })
        .collect();
    let encoded_path = polyline::encode_coordinates(line, 5).unwrap_or_default();

    RideSummary {
        source_id: parsed.source_id.clone(),
        name: resolve_name(None, parsed, geocoder),
        distance_meters: rounded(parsed.total_lap_distance()),
        duration_seconds: rounded(parsed.total_lap_seconds()),
        preview,
        encoded_path,
    }
}

/// Every point rounded to 4 decimals, simplified to at most `max_points`.
pub fn preview_coordinates(parsed: &ParsedActivity, max_points: usize) -> Vec<(f64, f64)> {
    let coords: Vec<(f64, f64)> = parsed
        .points()
        .map(|p| (round4(p.latitude), round4(p.longitude)))
        .collect();
    simplify_until(&coords, max_points)
}

/// Pick the display name of an activity.
///
/// An explicit name wins, then the name found in the document, then the
/// geocoded place of the first point. Without any of them the activity is
/// [`UNTITLED`]; a failing geocoder gives [`UNNAMED`].
pub fn resolve_name(
    explicit: Option<&str>,
    parsed: &ParsedActivity,
    geocoder: Option<&dyn Geocoder>,
) -> String {
    let given = [explicit, parsed.name.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|name| !name.is_empty());
    if let Some(name) = given {
        return name.to_string();
    }

    let (Some(geocoder), Some(first)) = (geocoder, parsed.points().next()) else {
        return UNTITLED.to_string();
    };

    match geocoder.reverse(round4(first.latitude), round4(first.longitude)) {
        Ok(Some(place)) if !place.trim().is_empty() => place.trim().to_string(),
        Ok(_) => UNTITLED.to_string(),
        Err(e) => {
            log::warn!("[Summary] Reverse geocoding failed: {}", e);
            UNNAMED.to_string()
        }
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn rounded(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}
