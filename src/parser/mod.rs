//! # Track Parser
//!
//! Decodes GPX and TCX documents into a [`ParsedActivity`].
//!
//! Parsing runs in three passes over the raw bytes:
//! 1. **Detection** - look for a top-level `trk` (GPX) or `Activities` (TCX) element
//! 2. **Structural validation** - check the document against the dialect's rules in [`schema`]
//! 3. **Extraction** - build segments with time offsets relative to the activity start
//!
//! Segments without coordinates are kept as empty segments. Only a document
//! with no coordinates at all is rejected.

use std::ops::ControlFlow;

use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::{BoundingBox, Dialect, ParseError, Segment, Trackpoint};

pub mod gpx;
pub mod schema;
pub mod tcx;

// ============================================================================
// Types
// ============================================================================

/// Informational per-lap metadata from a TCX document.
#[derive(Debug, Clone, PartialEq)]
pub struct LapSummary {
    pub start_time: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub distance_meters: f64,
}

/// A decoded activity document, normalized to one point model.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedActivity {
    pub dialect: Dialect,
    /// Name found in the document, if any
    pub name: Option<String>,
    /// Reference time for every point's `time_offset_seconds`
    pub start_time: Option<DateTime<Utc>>,
    pub segments: Vec<Segment>,
    /// TCX only
    pub laps: Vec<LapSummary>,
    /// Extent declared in GPX `metadata/bounds`
    pub declared_bounds: Option<BoundingBox>,
    /// Identifier assigned by the recording device or service
    pub source_id: Option<String>,
}

impl ParsedActivity {
    pub(crate) fn empty(dialect: Dialect) -> Self {
        Self {
            dialect,
            name: None,
            start_time: None,
            segments: Vec::new(),
            laps: Vec::new(),
            declared_bounds: None,
            source_id: None,
        }
    }

    /// Total number of points across all segments.
    pub fn point_count(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }

    /// All points in document order.
    pub fn points(&self) -> impl Iterator<Item = &Trackpoint> {
        self.segments.iter().flat_map(|s| s.points.iter())
    }

    /// Extent of every parsed point.
    pub fn bounds(&self) -> Option<BoundingBox> {
        self.segments
            .iter()
            .fold(None, |bb, s| BoundingBox::extend_option(bb, &s.points))
    }

    /// Largest point offset in the document.
    pub fn last_offset(&self) -> u32 {
        self.segments
            .iter()
            .filter_map(Segment::last_offset)
            .max()
            .unwrap_or(0)
    }

    /// Sum of lap durations (TCX), in seconds.
    pub fn total_lap_seconds(&self) -> f64 {
        self.laps.iter().map(|l| l.duration_seconds).sum()
    }

    /// Sum of lap distances (TCX), in meters.
    pub fn total_lap_distance(&self) -> f64 {
        self.laps.iter().map(|l| l.distance_meters).sum()
    }

    /// Elapsed seconds of the whole activity.
    ///
    /// The larger of the last point offset and the summed lap durations,
    /// since TCX laps can outlast their final positioned trackpoint.
    pub fn elapsed_seconds(&self) -> u32 {
        let laps = self.total_lap_seconds().round();
        let laps = if laps.is_finite() && laps > 0.0 {
            laps.min(u32::MAX as f64) as u32
        } else {
            0
        };
        self.last_offset().max(laps)
    }
}

// ============================================================================
// Entry point
// ============================================================================

/// Parse a GPX or TCX document.
///
/// # Errors
/// - [`ParseError::UnrecognizedFormat`] if neither dialect marker is present
/// - [`ParseError::SchemaInvalid`] if the document fails structural validation
/// - [`ParseError::NoCoordinates`] if no segment holds a positioned point
pub fn parse(raw: &[u8]) -> Result<ParsedActivity, ParseError> {
    let dialect = detect(raw)?;
    schema::validate(schema::for_dialect(dialect), raw)?;

    let parsed = match dialect {
        Dialect::Gpx => gpx::extract(raw)?,
        Dialect::Tcx => tcx::extract(raw)?,
    };

    if parsed.point_count() == 0 {
        return Err(ParseError::NoCoordinates);
    }

    if let (Some(declared), Some(actual)) = (parsed.declared_bounds, parsed.bounds()) {
        if !declared.contains(&actual) {
            log::warn!(
                "[Parser] Points extend beyond declared bounds ({:?} vs {:?})",
                actual,
                declared
            );
        }
    }

    log::debug!(
        "[Parser] Parsed {} document: {} segments, {} points",
        dialect,
        parsed.segments.len(),
        parsed.point_count()
    );

    Ok(parsed)
}

/// Identify the dialect from the children of the root element.
pub fn detect(raw: &[u8]) -> Result<Dialect, ParseError> {
    let mut found = None;
    // Syntax errors are reported by validation once the dialect is known
    let _ = read_events(raw, Dialect::Gpx, |event, path| {
        if let XmlEvent::Open { name, .. } = event {
            if path.len() == 2 {
                found = match name {
                    "trk" => Some(Dialect::Gpx),
                    "Activities" => Some(Dialect::Tcx),
                    _ => None,
                };
                if found.is_some() {
                    return Ok(ControlFlow::Break(()));
                }
            }
        }
        Ok(ControlFlow::Continue(()))
    });
    found.ok_or(ParseError::UnrecognizedFormat)
}

// ============================================================================
// XML event helpers (shared by the validator and both extractors)
// ============================================================================

/// Namespace-stripped XML event.
#[derive(Debug)]
pub(crate) enum XmlEvent<'a> {
    Open {
        name: &'a str,
        attributes: &'a [(String, String)],
    },
    Close {
        name: &'a str,
    },
    Text(&'a str),
}

/// Stream the document as [`XmlEvent`]s.
///
/// `path` holds the local names of the open elements, including the one an
/// `Open`/`Close` event refers to. Self-closing elements produce an `Open`
/// immediately followed by a `Close`.
pub(crate) fn read_events<F>(raw: &[u8], dialect: Dialect, mut handler: F) -> Result<(), ParseError>
where
    F: FnMut(XmlEvent<'_>, &[String]) -> Result<ControlFlow<()>, ParseError>,
{
    let mut reader = Reader::from_reader(raw);
    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();

    loop {
        let flow = match reader.read_event_into(&mut buf) {
            Err(e) => {
                return Err(ParseError::schema(
                    dialect,
                    format!("malformed XML at byte {}: {}", reader.buffer_position(), e),
                ));
            }
            Ok(Event::Eof) => break,
            Ok(Event::Start(ref e)) => {
                let (name, attributes) = open_element(e, dialect)?;
                path.push(name);
                handler(
                    XmlEvent::Open {
                        name: &path[path.len() - 1],
                        attributes: &attributes,
                    },
                    &path,
                )?
            }
            Ok(Event::Empty(ref e)) => {
                let (name, attributes) = open_element(e, dialect)?;
                path.push(name);
                let name = &path[path.len() - 1];
                let flow = match handler(XmlEvent::Open { name, attributes: &attributes }, &path)? {
                    ControlFlow::Continue(()) => handler(XmlEvent::Close { name }, &path)?,
                    brk => brk,
                };
                path.pop();
                flow
            }
            Ok(Event::End(ref e)) => {
                let name = local_name(e.local_name().as_ref(), dialect)?;
                if path.last().map(String::as_str) != Some(name.as_str()) {
                    return Err(ParseError::schema(
                        dialect,
                        format!("unexpected closing tag </{}>", name),
                    ));
                }
                let flow = handler(XmlEvent::Close { name: &name }, &path)?;
                path.pop();
                flow
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().map_err(|err| {
                    ParseError::schema(dialect, format!("invalid text content: {}", err))
                })?;
                dispatch_text(&text, &path, &mut handler)?
            }
            Ok(Event::CData(ref e)) => {
                let text = String::from_utf8_lossy(e).into_owned();
                dispatch_text(&text, &path, &mut handler)?
            }
            _ => ControlFlow::Continue(()),
        };

        if flow.is_break() {
            return Ok(());
        }
        buf.clear();
    }

    if let Some(open) = path.last() {
        return Err(ParseError::schema(
            dialect,
            format!("document ends inside <{}>", open),
        ));
    }
    Ok(())
}

fn dispatch_text<F>(text: &str, path: &[String], handler: &mut F) -> Result<ControlFlow<()>, ParseError>
where
    F: FnMut(XmlEvent<'_>, &[String]) -> Result<ControlFlow<()>, ParseError>,
{
    let text = text.trim();
    if text.is_empty() {
        return Ok(ControlFlow::Continue(()));
    }
    handler(XmlEvent::Text(text), path)
}

fn open_element(
    e: &BytesStart<'_>,
    dialect: Dialect,
) -> Result<(String, Vec<(String, String)>), ParseError> {
    let name = local_name(e.local_name().as_ref(), dialect)?;
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| {
            ParseError::schema(dialect, format!("invalid attribute on <{}>: {}", name, err))
        })?;
        let key = local_name(attr.key.local_name().as_ref(), dialect)?;
        let value = attr.unescape_value().map_err(|err| {
            ParseError::schema(dialect, format!("invalid attribute {}: {}", key, err))
        })?;
        attributes.push((key, value.into_owned()));
    }
    Ok((name, attributes))
}

fn local_name(bytes: &[u8], dialect: Dialect) -> Result<String, ParseError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| ParseError::schema(dialect, "element name is not valid UTF-8"))
}

/// Name of the element enclosing the current one.
pub(crate) fn parent(path: &[String]) -> Option<&str> {
    path.len()
        .checked_sub(2)
        .and_then(|i| path.get(i))
        .map(String::as_str)
}

/// Whether any open element is one of `names`.
pub(crate) fn within(path: &[String], names: &[&str]) -> bool {
    path.iter().any(|p| names.contains(&p.as_str()))
}

pub(crate) fn attribute<'a>(attributes: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Parse an `xsd:dateTime`. Values without a zone are taken as UTC.
pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Whole seconds from `start` to `time`, clamped at zero.
pub(crate) fn offset_seconds(start: DateTime<Utc>, time: DateTime<Utc>) -> u32 {
    let seconds = (time - start).num_seconds().max(0);
    u32::try_from(seconds).unwrap_or(u32::MAX)
}

/// Point under construction while its child elements stream past.
#[derive(Debug, Default)]
pub(crate) struct PointBuilder {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation: Option<f64>,
    pub time: Option<DateTime<Utc>>,
}

/// Convert builders into trackpoints with offsets relative to `start`.
///
/// Points without a timestamp reuse the previous point's offset.
pub(crate) fn finish_segments(
    raw: Vec<Vec<PointBuilder>>,
    start: Option<DateTime<Utc>>,
) -> Vec<Segment> {
    let mut last_offset = 0;
    raw.into_iter()
        .map(|builders| {
            let points = builders
                .into_iter()
                .filter_map(|b| {
                    let (latitude, longitude) = (b.latitude?, b.longitude?);
                    if let (Some(start), Some(time)) = (start, b.time) {
                        last_offset = offset_seconds(start, time);
                    }
                    Some(Trackpoint::new(
                        latitude,
                        longitude,
                        b.elevation.unwrap_or(0.0),
                        last_offset,
                    ))
                })
                .collect();
            Segment::new(points)
        })
        .collect()
}

pub(crate) fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
