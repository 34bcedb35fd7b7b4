//! # Export Assembly
//!
//! Rebuilds absolute timestamps from stored points and hands the result to
//! a [`TrackRenderer`]. [`assemble`] performs no I/O; [`export_activity`]
//! loads the activity from a [`TrackStore`] first and checks the rendered
//! bytes against the import schema of their dialect.
//!
//! [`GpxRenderer`] writes GPX 1.1 that the parser of this crate accepts,
//! so an exported file can be imported again.

use std::io::Write;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::parser::{detect, schema};
use crate::{
    simplify_until, Activity, ActivityId, ExportError, RenderError, TimedPoint, TrackStore,
    Trackpoint,
};

/// Serializes an activity's points to an output file format.
pub trait TrackRenderer {
    fn render(
        &self,
        activity: &Activity,
        points: &[TimedPoint],
        start_time: DateTime<Utc>,
    ) -> Result<Vec<u8>, RenderError>;
}

/// Restore absolute timestamps, optionally simplifying to `simplify_to` points.
pub fn assemble(
    activity: &Activity,
    raw: &[Trackpoint],
    simplify_to: Option<usize>,
) -> Vec<TimedPoint> {
    let points: Vec<TimedPoint> = raw
        .iter()
        .map(|p| TimedPoint {
            latitude: p.latitude,
            longitude: p.longitude,
            elevation: p.elevation,
            time: activity.start_time + Duration::seconds(i64::from(p.time_offset_seconds)),
        })
        .collect();

    match simplify_to {
        Some(target) => simplify_until(&points, target),
        None => points,
    }
}

/// Load, assemble and render one stored activity.
pub fn export_activity<S, R>(
    store: &S,
    id: ActivityId,
    simplify_to: Option<usize>,
    renderer: &R,
) -> Result<Vec<u8>, ExportError>
where
    S: TrackStore,
    R: TrackRenderer + ?Sized,
{
    let activity = store.load_activity(id)?.ok_or(ExportError::NotFound(id))?;
    let raw = store.load_raw_points(id)?;
    let points = assemble(&activity, &raw, simplify_to);

    let bytes = renderer.render(&activity, &points, activity.start_time)?;
    check_rendered(&bytes)?;
    log::info!(
        "[Export] Rendered activity {} ({} of {} points, {} bytes)",
        id,
        points.len(),
        raw.len(),
        bytes.len()
    );
    Ok(bytes)
}

/// Rendered output must be importable again.
fn check_rendered(bytes: &[u8]) -> Result<(), RenderError> {
    let dialect = detect(bytes).map_err(rejected)?;
    schema::validate(schema::for_dialect(dialect), bytes).map_err(rejected)
}

fn rejected(err: crate::ParseError) -> RenderError {
    log::warn!("[Export] Rendered output rejected: {}", err);
    RenderError(format!("rendered output rejected: {}", err))
}

// ============================================================================
// GPX renderer
// ============================================================================

/// Renders a single-track, single-segment GPX 1.1 document.
#[derive(Debug, Clone)]
pub struct GpxRenderer {
    /// Value of the root `creator` attribute
    pub creator: String,
}

impl Default for GpxRenderer {
    fn default() -> Self {
        Self {
            creator: concat!("effort-import ", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl TrackRenderer for GpxRenderer {
    fn render(
        &self,
        activity: &Activity,
        points: &[TimedPoint],
        start_time: DateTime<Utc>,
    ) -> Result<Vec<u8>, RenderError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        emit(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let mut root = BytesStart::new("gpx");
        root.push_attribute(("version", "1.1"));
        root.push_attribute(("creator", self.creator.as_str()));
        root.push_attribute(("xmlns", "http://www.topografix.com/GPX/1/1"));
        emit(&mut writer, Event::Start(root))?;

        emit(&mut writer, Event::Start(BytesStart::new("metadata")))?;
        text_element(&mut writer, "name", &activity.name)?;
        text_element(&mut writer, "time", &timestamp(start_time))?;
        if let Some(bounds) = activity.bounds {
            let mut declared = BytesStart::new("bounds");
            declared.push_attribute(("minlat", bounds.lat_min.to_string().as_str()));
            declared.push_attribute(("minlon", bounds.lng_min.to_string().as_str()));
            declared.push_attribute(("maxlat", bounds.lat_max.to_string().as_str()));
            declared.push_attribute(("maxlon", bounds.lng_max.to_string().as_str()));
            emit(&mut writer, Event::Empty(declared))?;
        }
        emit(&mut writer, Event::End(BytesEnd::new("metadata")))?;

        emit(&mut writer, Event::Start(BytesStart::new("trk")))?;
        text_element(&mut writer, "name", &activity.name)?;
        emit(&mut writer, Event::Start(BytesStart::new("trkseg")))?;
        for point in points {
            let mut trkpt = BytesStart::new("trkpt");
            trkpt.push_attribute(("lat", point.latitude.to_string().as_str()));
            trkpt.push_attribute(("lon", point.longitude.to_string().as_str()));
            emit(&mut writer, Event::Start(trkpt))?;
            text_element(&mut writer, "ele", &point.elevation.to_string())?;
            text_element(&mut writer, "time", &timestamp(point.time))?;
            emit(&mut writer, Event::End(BytesEnd::new("trkpt")))?;
        }
        emit(&mut writer, Event::End(BytesEnd::new("trkseg")))?;
        emit(&mut writer, Event::End(BytesEnd::new("trk")))?;
        emit(&mut writer, Event::End(BytesEnd::new("gpx")))?;

        Ok(writer.into_inner())
    }
}

fn emit<W: Write>(writer: &mut Writer<W>, event: Event<'_>) -> Result<(), RenderError> {
    writer
        .write_event(event)
        .map_err(|e| RenderError(e.to_string()))
}

fn text_element<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    text: &str,
) -> Result<(), RenderError> {
    emit(writer, Event::Start(BytesStart::new(name)))?;
    emit(writer, Event::Text(BytesText::new(text)))?;
    emit(writer, Event::End(BytesEnd::new(name)))
}

fn timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}
