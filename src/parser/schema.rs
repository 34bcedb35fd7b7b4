//! Structural validation of GPX 1.1 and TCX v2 documents.
//!
//! Each dialect's constraints are a constant rule table covering the
//! elements the extractors read: root element, allowed parents, required
//! attributes and children, and typed text content. Subtrees under
//! extension elements are not checked.

use std::collections::HashSet;
use std::ops::ControlFlow;

use super::{attribute, parse_number, parse_timestamp, read_events, XmlEvent};
use crate::{Dialect, ParseError};

/// Lexical type of an attribute value or text node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Any,
    Decimal,
    Latitude,
    Longitude,
    DateTime,
}

impl ValueKind {
    fn accepts(self, value: &str) -> bool {
        match self {
            ValueKind::Any => true,
            ValueKind::Decimal => parse_number(value).is_some(),
            ValueKind::Latitude => parse_number(value).is_some_and(|v| (-90.0..=90.0).contains(&v)),
            ValueKind::Longitude => {
                parse_number(value).is_some_and(|v| (-180.0..=180.0).contains(&v))
            }
            ValueKind::DateTime => parse_timestamp(value).is_some(),
        }
    }
}

/// Rule table for one dialect.
#[derive(Debug)]
pub struct Schema {
    pub dialect: Dialect,
    pub root: &'static str,
    /// Elements whose subtrees are not validated
    pub opaque: &'static [&'static str],
    /// (element, allowed parents)
    pub parents: &'static [(&'static str, &'static [&'static str])],
    /// (element, attribute, type) - attribute is required
    pub attributes: &'static [(&'static str, &'static str, ValueKind)],
    /// (element, required child)
    pub children: &'static [(&'static str, &'static str)],
    /// (element, parent or any, type of text content)
    pub text: &'static [(&'static str, Option<&'static str>, ValueKind)],
}

pub const GPX_SCHEMA: Schema = Schema {
    dialect: Dialect::Gpx,
    root: "gpx",
    opaque: &["extensions"],
    parents: &[
        ("metadata", &["gpx"]),
        ("bounds", &["metadata"]),
        ("wpt", &["gpx"]),
        ("rte", &["gpx"]),
        ("rtept", &["rte"]),
        ("trk", &["gpx"]),
        ("trkseg", &["trk"]),
        ("trkpt", &["trkseg"]),
    ],
    attributes: &[
        ("gpx", "version", ValueKind::Any),
        ("bounds", "minlat", ValueKind::Latitude),
        ("bounds", "maxlat", ValueKind::Latitude),
        ("bounds", "minlon", ValueKind::Longitude),
        ("bounds", "maxlon", ValueKind::Longitude),
        ("wpt", "lat", ValueKind::Latitude),
        ("wpt", "lon", ValueKind::Longitude),
        ("rtept", "lat", ValueKind::Latitude),
        ("rtept", "lon", ValueKind::Longitude),
        ("trkpt", "lat", ValueKind::Latitude),
        ("trkpt", "lon", ValueKind::Longitude),
    ],
    children: &[],
    text: &[
        ("time", None, ValueKind::DateTime),
        ("ele", None, ValueKind::Decimal),
        ("number", None, ValueKind::Decimal),
    ],
};

pub const TCX_SCHEMA: Schema = Schema {
    dialect: Dialect::Tcx,
    root: "TrainingCenterDatabase",
    opaque: &["Extensions", "Creator", "Author"],
    parents: &[
        ("Activities", &["TrainingCenterDatabase"]),
        ("Activity", &["Activities"]),
        ("Lap", &["Activity"]),
        ("Track", &["Lap", "Course"]),
        ("Trackpoint", &["Track"]),
        ("Position", &["Trackpoint", "CoursePoint"]),
    ],
    attributes: &[
        ("Activity", "Sport", ValueKind::Any),
        ("Lap", "StartTime", ValueKind::DateTime),
    ],
    children: &[
        ("Activity", "Id"),
        ("Activity", "Lap"),
        ("Lap", "TotalTimeSeconds"),
        ("Lap", "DistanceMeters"),
        ("Trackpoint", "Time"),
        ("Position", "LatitudeDegrees"),
        ("Position", "LongitudeDegrees"),
    ],
    text: &[
        ("Id", Some("Activity"), ValueKind::DateTime),
        ("Time", None, ValueKind::DateTime),
        ("TotalTimeSeconds", None, ValueKind::Decimal),
        ("DistanceMeters", None, ValueKind::Decimal),
        ("AltitudeMeters", None, ValueKind::Decimal),
        ("LatitudeDegrees", None, ValueKind::Latitude),
        ("LongitudeDegrees", None, ValueKind::Longitude),
    ],
};

pub fn for_dialect(dialect: Dialect) -> &'static Schema {
    match dialect {
        Dialect::Gpx => &GPX_SCHEMA,
        Dialect::Tcx => &TCX_SCHEMA,
    }
}

#[derive(Default)]
struct Frame {
    children: HashSet<String>,
    text: String,
}

/// Validate `raw` against `schema`.
pub fn validate(schema: &Schema, raw: &[u8]) -> Result<(), ParseError> {
    let invalid = |message: String| ParseError::schema(schema.dialect, message);
    let mut frames: Vec<Frame> = Vec::new();
    let mut opaque_depth: Option<usize> = None;
    let mut saw_root = false;

    read_events(raw, schema.dialect, |event, path| {
        // Inside an extension subtree: only watch for its end
        if let Some(depth) = opaque_depth {
            if let XmlEvent::Close { .. } = event {
                if path.len() == depth {
                    opaque_depth = None;
                    frames.pop();
                }
            }
            return Ok(ControlFlow::Continue(()));
        }

        match event {
            XmlEvent::Open { name, attributes } => {
                if path.len() == 1 {
                    if name != schema.root {
                        return Err(invalid(format!(
                            "root element is <{}>, expected <{}>",
                            name, schema.root
                        )));
                    }
                    saw_root = true;
                }

                if let Some(frame) = frames.last_mut() {
                    frame.children.insert(name.to_string());
                }
                frames.push(Frame::default());

                if schema.opaque.contains(&name) {
                    opaque_depth = Some(path.len());
                    return Ok(ControlFlow::Continue(()));
                }

                let parent = super::parent(path);
                if let Some((_, allowed)) = schema.parents.iter().find(|(el, _)| *el == name) {
                    if !parent.is_some_and(|p| allowed.contains(&p)) {
                        return Err(invalid(format!(
                            "<{}> is not allowed inside <{}>",
                            name,
                            parent.unwrap_or("document")
                        )));
                    }
                }

                for (_, key, kind) in schema.attributes.iter().filter(|(el, _, _)| *el == name) {
                    match attribute(attributes, key) {
                        None => {
                            return Err(invalid(format!(
                                "<{}> is missing attribute {}",
                                name, key
                            )))
                        }
                        Some(value) if !kind.accepts(value) => {
                            return Err(invalid(format!(
                                "<{}> attribute {}=\"{}\" is not a valid {:?}",
                                name, key, value, kind
                            )))
                        }
                        Some(_) => {}
                    }
                }
            }
            XmlEvent::Text(text) => {
                if let Some(frame) = frames.last_mut() {
                    frame.text.push_str(text);
                }
            }
            XmlEvent::Close { name } => {
                let frame = frames.pop().unwrap_or_default();
                let parent = super::parent(path);

                for (_, child) in schema.children.iter().filter(|(el, _)| *el == name) {
                    if !frame.children.contains(*child) {
                        return Err(invalid(format!("<{}> is missing <{}>", name, child)));
                    }
                }

                let typed = schema.text.iter().find(|(el, scope, _)| {
                    *el == name && scope.map_or(true, |s| parent == Some(s))
                });
                if let Some((_, _, kind)) = typed {
                    if !kind.accepts(&frame.text) {
                        return Err(invalid(format!(
                            "<{}> value \"{}\" is not a valid {:?}",
                            name, frame.text, kind
                        )));
                    }
                }
            }
        }
        Ok(ControlFlow::Continue(()))
    })?;

    if !saw_root {
        return Err(invalid("document has no root element".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpx(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">{}</gpx>"#,
            body
        )
    }

    fn assert_invalid(schema: &Schema, doc: &str, needle: &str) {
        match validate(schema, doc.as_bytes()) {
            Err(ParseError::SchemaInvalid { message, .. }) => {
                assert!(message.contains(needle), "unexpected message: {}", message)
            }
            other => panic!("expected SchemaInvalid, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_gpx() {
        let doc = gpx(r#"<metadata><time>2013-05-01T10:00:00Z</time></metadata>
            <trk><name>Ride</name><trkseg>
              <trkpt lat="51.5" lon="-0.12"><ele>12.5</ele><time>2013-05-01T10:00:00Z</time></trkpt>
            </trkseg></trk>"#);
        assert_eq!(validate(&GPX_SCHEMA, doc.as_bytes()), Ok(()));
    }

    #[test]
    fn test_gpx_missing_lat() {
        let doc = gpx(r#"<trk><trkseg><trkpt lon="-0.12"/></trkseg></trk>"#);
        assert_invalid(&GPX_SCHEMA, &doc, "missing attribute lat");
    }

    #[test]
    fn test_gpx_latitude_out_of_range() {
        let doc = gpx(r#"<trk><trkseg><trkpt lat="95.0" lon="0"/></trkseg></trk>"#);
        assert_invalid(&GPX_SCHEMA, &doc, "lat=\"95.0\"");
    }

    #[test]
    fn test_gpx_bad_time() {
        let doc = gpx(r#"<trk><trkseg><trkpt lat="1" lon="1"><time>noon</time></trkpt></trkseg></trk>"#);
        assert_invalid(&GPX_SCHEMA, &doc, "<time> value \"noon\"");
    }

    #[test]
    fn test_gpx_misplaced_trkpt() {
        let doc = gpx(r#"<trk><trkpt lat="1" lon="1"/></trk>"#);
        assert_invalid(&GPX_SCHEMA, &doc, "<trkpt> is not allowed inside <trk>");
    }

    #[test]
    fn test_gpx_wrong_root() {
        let doc = r#"<track version="1.1"><trk/></track>"#;
        assert_invalid(&GPX_SCHEMA, doc, "root element is <track>");
    }

    #[test]
    fn test_gpx_extensions_are_opaque() {
        let doc = gpx(r#"<trk><trkseg><trkpt lat="1" lon="1">
              <extensions><gpxtpx:TrackPointExtension xmlns:gpxtpx="x"><gpxtpx:hr>140</gpxtpx:hr><time>whenever</time></gpxtpx:TrackPointExtension></extensions>
            </trkpt></trkseg></trk>"#);
        assert_eq!(validate(&GPX_SCHEMA, doc.as_bytes()), Ok(()));
    }

    #[test]
    fn test_tcx_requires_trackpoint_time() {
        let doc = r#"<TrainingCenterDatabase><Activities><Activity Sport="Biking">
            <Id>2013-05-01T10:00:00Z</Id>
            <Lap StartTime="2013-05-01T10:00:00Z">
              <TotalTimeSeconds>60</TotalTimeSeconds><DistanceMeters>100</DistanceMeters>
              <Track><Trackpoint><Position><LatitudeDegrees>1</LatitudeDegrees><LongitudeDegrees>2</LongitudeDegrees></Position></Trackpoint></Track>
            </Lap></Activity></Activities></TrainingCenterDatabase>"#;
        assert_invalid(&TCX_SCHEMA, doc, "<Trackpoint> is missing <Time>");
    }

    #[test]
    fn test_tcx_lap_needs_start_time() {
        let doc = r#"<TrainingCenterDatabase><Activities><Activity Sport="Biking">
            <Id>2013-05-01T10:00:00Z</Id>
            <Lap><TotalTimeSeconds>60</TotalTimeSeconds><DistanceMeters>100</DistanceMeters></Lap>
            </Activity></Activities></TrainingCenterDatabase>"#;
        assert_invalid(&TCX_SCHEMA, doc, "missing attribute StartTime");
    }

    #[test]
    fn test_malformed_xml() {
        let doc = gpx(r#"<trk><trkseg></trk>"#);
        assert!(matches!(
            validate(&GPX_SCHEMA, doc.as_bytes()),
            Err(ParseError::SchemaInvalid { dialect: Dialect::Gpx, .. })
        ));
    }
}
