//! GPX 1.1 extraction.
//!
//! Every `trk/trkseg` becomes one segment, across all tracks of the file.
//! The activity starts at `metadata/time`, or at the first timestamped
//! point when the metadata has none.

use std::ops::ControlFlow;

use super::{
    attribute, finish_segments, parent, parse_number, parse_timestamp, read_events, within,
    ParsedActivity, PointBuilder, XmlEvent,
};
use crate::{BoundingBox, Dialect, ParseError};

/// Extract segments and metadata from a validated GPX document.
pub fn extract(raw: &[u8]) -> Result<ParsedActivity, ParseError> {
    let mut activity = ParsedActivity::empty(Dialect::Gpx);
    let mut metadata_name: Option<String> = None;
    let mut metadata_time = None;
    let mut first_point_time = None;

    let mut segments: Vec<Vec<PointBuilder>> = Vec::new();
    let mut current: Option<PointBuilder> = None;
    let mut text = String::new();

    read_events(raw, Dialect::Gpx, |event, path| {
        if within(path, &["extensions"]) {
            return Ok(ControlFlow::Continue(()));
        }

        match event {
            XmlEvent::Open { name, attributes } => {
                text.clear();
                match (name, parent(path)) {
                    ("trkseg", Some("trk")) => segments.push(Vec::new()),
                    ("trkpt", Some("trkseg")) => {
                        current = Some(PointBuilder {
                            latitude: attribute(attributes, "lat").and_then(parse_number),
                            longitude: attribute(attributes, "lon").and_then(parse_number),
                            ..PointBuilder::default()
                        });
                    }
                    ("bounds", Some("metadata")) => {
                        let read = |key| attribute(attributes, key).and_then(parse_number);
                        if let (Some(lat_min), Some(lat_max), Some(lng_min), Some(lng_max)) =
                            (read("minlat"), read("maxlat"), read("minlon"), read("maxlon"))
                        {
                            let declared = BoundingBox {
                                lat_min,
                                lat_max,
                                lng_min,
                                lng_max,
                            };
                            if !declared.is_well_formed() {
                                return Err(ParseError::schema(
                                    Dialect::Gpx,
                                    "metadata bounds have min greater than max",
                                ));
                            }
                            activity.declared_bounds = Some(declared);
                        }
                    }
                    _ => {}
                }
            }
            XmlEvent::Text(t) => text.push_str(t),
            XmlEvent::Close { name } => {
                match (name, parent(path)) {
                    ("ele", Some("trkpt")) => {
                        if let Some(point) = current.as_mut() {
                            point.elevation = parse_number(&text);
                        }
                    }
                    ("time", Some("trkpt")) => {
                        if let Some(point) = current.as_mut() {
                            point.time = parse_timestamp(&text);
                            if first_point_time.is_none() {
                                first_point_time = point.time;
                            }
                        }
                    }
                    ("time", Some("metadata")) => metadata_time = parse_timestamp(&text),
                    ("name", Some("metadata")) => metadata_name = non_empty(&text),
                    ("name", Some("trk")) if activity.name.is_none() => {
                        activity.name = non_empty(&text);
                    }
                    ("trkpt", _) => {
                        if let (Some(point), Some(segment)) = (current.take(), segments.last_mut()) {
                            segment.push(point);
                        }
                    }
                    _ => {}
                }
                text.clear();
            }
        }
        Ok(ControlFlow::Continue(()))
    })?;

    activity.name = activity.name.or(metadata_name);
    activity.start_time = metadata_time.or(first_point_time);
    activity.source_id = metadata_time.map(|t| t.to_rfc3339());
    activity.segments = finish_segments(segments, activity.start_time);
    Ok(activity)
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
