//! TCX (Training Center Database v2) extraction.
//!
//! Only the first `Activity` of a file is read. Every `Lap/Track` becomes
//! one segment; trackpoints without a `Position` (pauses, sensor-only
//! samples) are dropped. The activity starts at the first lap's `StartTime`.

use std::ops::ControlFlow;

use super::{
    attribute, finish_segments, parent, parse_number, parse_timestamp, read_events, within,
    LapSummary, ParsedActivity, PointBuilder, XmlEvent,
};
use crate::{Dialect, ParseError};

/// Extract segments, laps and metadata from a validated TCX document.
pub fn extract(raw: &[u8]) -> Result<ParsedActivity, ParseError> {
    let mut activity = ParsedActivity::empty(Dialect::Tcx);
    let mut activity_count = 0usize;
    let mut activity_id_time = None;
    let mut first_point_time = None;

    let mut segments: Vec<Vec<PointBuilder>> = Vec::new();
    let mut current: Option<PointBuilder> = None;
    let mut text = String::new();

    read_events(raw, Dialect::Tcx, |event, path| {
        if within(path, &["Extensions", "Creator", "Author", "Courses"]) {
            return Ok(ControlFlow::Continue(()));
        }
        if let XmlEvent::Open { name: "Activity", .. } = event {
            activity_count += 1;
        }
        // Anything past the first activity is ignored
        if activity_count != 1 || !within(path, &["Activity"]) {
            return Ok(ControlFlow::Continue(()));
        }

        match event {
            XmlEvent::Open { name, attributes } => {
                text.clear();
                match (name, parent(path)) {
                    ("Lap", Some("Activity")) => activity.laps.push(LapSummary {
                        start_time: attribute(attributes, "StartTime").and_then(parse_timestamp),
                        duration_seconds: 0.0,
                        distance_meters: 0.0,
                    }),
                    ("Track", Some("Lap")) => segments.push(Vec::new()),
                    ("Trackpoint", Some("Track")) => current = Some(PointBuilder::default()),
                    _ => {}
                }
            }
            XmlEvent::Text(t) => text.push_str(t),
            XmlEvent::Close { name } => {
                match (name, parent(path)) {
                    ("Id", Some("Activity")) => {
                        activity.source_id = Some(text.trim().to_string());
                        activity_id_time = parse_timestamp(&text);
                    }
                    ("Notes", Some("Activity")) => {
                        let notes = text.trim();
                        if !notes.is_empty() {
                            activity.name = Some(notes.to_string());
                        }
                    }
                    ("TotalTimeSeconds", Some("Lap")) => {
                        if let Some(lap) = activity.laps.last_mut() {
                            lap.duration_seconds = parse_number(&text).unwrap_or(0.0);
                        }
                    }
                    ("DistanceMeters", Some("Lap")) => {
                        if let Some(lap) = activity.laps.last_mut() {
                            lap.distance_meters = parse_number(&text).unwrap_or(0.0);
                        }
                    }
                    ("Time", Some("Trackpoint")) => {
                        if let Some(point) = current.as_mut() {
                            point.time = parse_timestamp(&text);
                            if first_point_time.is_none() {
                                first_point_time = point.time;
                            }
                        }
                    }
                    ("LatitudeDegrees", Some("Position")) => {
                        if let Some(point) = current.as_mut() {
                            point.latitude = parse_number(&text);
                        }
                    }
                    ("LongitudeDegrees", Some("Position")) => {
                        if let Some(point) = current.as_mut() {
                            point.longitude = parse_number(&text);
                        }
                    }
                    ("AltitudeMeters", Some("Trackpoint")) => {
                        if let Some(point) = current.as_mut() {
                            point.elevation = parse_number(&text);
                        }
                    }
                    ("Trackpoint", Some("Track")) => {
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

    if activity_count > 1 {
        log::warn!(
            "[Parser] TCX file holds {} activities, importing the first",
            activity_count
        );
    }

    let lap_start = activity.laps.first().and_then(|lap| lap.start_time);
    activity.start_time = lap_start.or(first_point_time).or(activity_id_time);
    activity.segments = finish_segments(segments, activity.start_time);
    Ok(activity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    const RUN: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<TrainingCenterDatabase xmlns="http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2">
  <Activities>
    <Activity Sport="Running">
      <Id>2014-03-02T07:30:00Z</Id>
      <Lap StartTime="2014-03-02T07:30:00Z">
        <TotalTimeSeconds>120.4</TotalTimeSeconds>
        <DistanceMeters>400.0</DistanceMeters>
        <Track>
          <Trackpoint>
            <Time>2014-03-02T07:30:00Z</Time>
            <Position><LatitudeDegrees>40.0</LatitudeDegrees><LongitudeDegrees>-3.70</LongitudeDegrees></Position>
            <AltitudeMeters>650.0</AltitudeMeters>
            <DistanceMeters>0.0</DistanceMeters>
          </Trackpoint>
          <Trackpoint>
            <Time>2014-03-02T07:30:10Z</Time>
          </Trackpoint>
          <Trackpoint>
            <Time>2014-03-02T07:30:20.000Z</Time>
            <Position><LatitudeDegrees>40.001</LatitudeDegrees><LongitudeDegrees>-3.701</LongitudeDegrees></Position>
            <AltitudeMeters>651.5</AltitudeMeters>
            <Extensions><TPX xmlns="http://www.garmin.com/xmlschemas/ActivityExtension/v2"><Speed>3.1</Speed></TPX></Extensions>
          </Trackpoint>
        </Track>
      </Lap>
      <Lap StartTime="2014-03-02T07:32:00Z">
        <TotalTimeSeconds>60</TotalTimeSeconds>
        <DistanceMeters>200.5</DistanceMeters>
        <Track>
          <Trackpoint><Time>2014-03-02T07:32:00Z</Time></Trackpoint>
        </Track>
        <Track>
          <Trackpoint>
            <Time>2014-03-02T07:32:30Z</Time>
            <Position><LatitudeDegrees>40.002</LatitudeDegrees><LongitudeDegrees>-3.702</LongitudeDegrees></Position>
          </Trackpoint>
        </Track>
      </Lap>
    </Activity>
  </Activities>
</TrainingCenterDatabase>"#;

    #[test]
    fn test_extract_segments_per_track() {
        let activity = parse(RUN.as_bytes()).unwrap();
        assert_eq!(activity.dialect, Dialect::Tcx);
        assert_eq!(activity.segments.len(), 3);
        assert_eq!(activity.segments[0].len(), 2);
        // Track holding only an unpositioned trackpoint
        assert!(activity.segments[1].is_empty());
        assert_eq!(activity.segments[2].len(), 1);
    }

    #[test]
    fn test_offsets_and_elevation() {
        let activity = parse(RUN.as_bytes()).unwrap();
        let offsets: Vec<u32> = activity.points().map(|p| p.time_offset_seconds).collect();
        assert_eq!(offsets, vec![0, 20, 150]);
        assert_eq!(activity.segments[0].points[0].elevation, 650.0);
        assert_eq!(activity.segments[0].points[1].elevation, 651.5);
    }

    #[test]
    fn test_laps() {
        let activity = parse(RUN.as_bytes()).unwrap();
        assert_eq!(activity.laps.len(), 2);
        assert_eq!(activity.laps[0].duration_seconds, 120.4);
        assert_eq!(activity.laps[1].distance_meters, 200.5);
        assert!((activity.total_lap_distance() - 600.5).abs() < 1e-9);
        // Laps (180s) outlast the last positioned point (150s)
        assert_eq!(activity.elapsed_seconds(), 180);
    }

    #[test]
    fn test_metadata() {
        let activity = parse(RUN.as_bytes()).unwrap();
        assert_eq!(activity.source_id.as_deref(), Some("2014-03-02T07:30:00Z"));
        assert_eq!(activity.name, None);
        assert_eq!(
            activity.start_time.map(|t| t.to_rfc3339()),
            Some("2014-03-02T07:30:00+00:00".to_string())
        );
    }

    #[test]
    fn test_only_first_activity_is_read() {
        let second = r#"<Activity Sport="Biking"><Id>2014-03-03T07:30:00Z</Id>
            <Lap StartTime="2014-03-03T07:30:00Z"><TotalTimeSeconds>5</TotalTimeSeconds><DistanceMeters>5</DistanceMeters>
            <Track><Trackpoint><Time>2014-03-03T07:30:00Z</Time><Position><LatitudeDegrees>10</LatitudeDegrees><LongitudeDegrees>10</LongitudeDegrees></Position></Trackpoint></Track>
            </Lap></Activity>"#;
        let doc = RUN.replace("</Activity>\n  </Activities>", &format!("</Activity>{}</Activities>", second));
        let activity = parse(doc.as_bytes()).unwrap();
        assert_eq!(activity.point_count(), 3);
        assert_eq!(activity.laps.len(), 2);
    }

    #[test]
    fn test_no_coordinates() {
        let doc = r#"<TrainingCenterDatabase><Activities><Activity Sport="Other">
            <Id>2014-03-02T07:30:00Z</Id>
            <Lap StartTime="2014-03-02T07:30:00Z"><TotalTimeSeconds>60</TotalTimeSeconds><DistanceMeters>0</DistanceMeters>
              <Track><Trackpoint><Time>2014-03-02T07:30:00Z</Time><HeartRateBpm><Value>90</Value></HeartRateBpm></Trackpoint></Track>
            </Lap></Activity></Activities></TrainingCenterDatabase>"#;
        assert_eq!(parse(doc.as_bytes()), Err(ParseError::NoCoordinates));
    }
}
