//! End-to-end import/export scenarios against an on-disk SQLite store.

use tempfile::TempDir;

use effort_import::{
    assemble, export_activity, parse, Activity, ActivityId, BoundingBox, Dialect, FilterLevel,
    GpxRenderer, ImportError, ImportRequest, Importer, ParseError, PersistenceError, SqliteStore,
    TrackStore, Trackpoint,
};

const TOLERANCE: f64 = 1e-9;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn open_store(dir: &TempDir) -> SqliteStore {
    let path = dir.path().join("efforts.db");
    let store = SqliteStore::open(path.to_str().unwrap()).expect("failed to open store");
    store.create_owner("alice").unwrap();
    store
}

/// (lat, lng) of a wiggly 150-point ride.
fn ride_coordinates(count: usize) -> Vec<(f64, f64)> {
    (0..count)
        .map(|i| {
            let t = i as f64;
            (
                43.7 + (t * 0.13).sin() * 0.02 + t * 0.0001,
                7.25 + (t * 0.07).cos() * 0.03,
            )
        })
        .collect()
}

fn gpx_document(segments: &[Vec<(f64, f64)>]) -> String {
    let mut doc = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
  <metadata><time>2019-07-14T06:00:00Z</time></metadata>
  <trk><name>Col de Braus</name>"#,
    );
    let mut second = 0;
    for segment in segments {
        doc.push_str("<trkseg>");
        for &(lat, lng) in segment {
            doc.push_str(&format!(
                r#"<trkpt lat="{}" lon="{}"><ele>120.5</ele><time>2019-07-14T{:02}:{:02}:{:02}Z</time></trkpt>"#,
                lat,
                lng,
                6 + second / 3600,
                (second / 60) % 60,
                second % 60
            ));
            second += 4;
        }
        doc.push_str("</trkseg>");
    }
    doc.push_str("</trk></gpx>");
    doc
}

fn bounds_of(coords: &[(f64, f64)]) -> BoundingBox {
    BoundingBox::from_points(coords).expect("non-empty")
}

fn assert_bounds_close(actual: &BoundingBox, expected: &BoundingBox) {
    assert!((actual.lat_min - expected.lat_min).abs() < TOLERANCE);
    assert!((actual.lat_max - expected.lat_max).abs() < TOLERANCE);
    assert!((actual.lng_min - expected.lng_min).abs() < TOLERANCE);
    assert!((actual.lng_max - expected.lng_max).abs() < TOLERANCE);
}

/// Counts transactions opened against an in-memory store.
struct CountingStore {
    inner: SqliteStore,
    begins: usize,
}

impl TrackStore for CountingStore {
    type Transaction<'a> = effort_import::persistence::SqliteTransaction<'a>
    where
        Self: 'a;

    fn begin(&mut self) -> Result<Self::Transaction<'_>, PersistenceError> {
        self.begins += 1;
        self.inner.begin()
    }

    fn owner_exists(&self, owner: &str) -> Result<bool, PersistenceError> {
        self.inner.owner_exists(owner)
    }

    fn load_activity(&self, id: ActivityId) -> Result<Option<Activity>, PersistenceError> {
        self.inner.load_activity(id)
    }

    fn load_raw_points(&self, id: ActivityId) -> Result<Vec<Trackpoint>, PersistenceError> {
        self.inner.load_raw_points(id)
    }

    fn load_filtered_points(
        &self,
        id: ActivityId,
        level: FilterLevel,
    ) -> Result<Vec<Trackpoint>, PersistenceError> {
        self.inner.load_filtered_points(id, level)
    }

    fn imported_external_ids(&self, owner: &str) -> Result<Vec<String>, PersistenceError> {
        self.inner.imported_external_ids(owner)
    }
}

#[test]
fn test_round_trip_150_points() {
    init_logging();
    let dir = TempDir::new().expect("failed to create temp dir");
    let mut store = open_store(&dir);
    let coords = ride_coordinates(150);
    let doc = gpx_document(&[coords.clone()]);

    let activity = Importer::default()
        .import(&mut store, &ImportRequest::new("alice", doc.as_bytes()))
        .unwrap();
    assert_eq!(activity.name, "Col de Braus");
    assert_eq!(activity.total_elapsed_seconds, 149 * 4);
    assert_bounds_close(&activity.bounds.unwrap(), &bounds_of(&coords));

    let bytes = export_activity(&store, activity.id, None, &GpxRenderer::default()).unwrap();
    let exported = parse(&bytes).unwrap();

    assert_eq!(exported.dialect, Dialect::Gpx);
    assert_eq!(exported.point_count(), 150);
    assert_eq!(exported.start_time, Some(activity.start_time));
    assert_bounds_close(&exported.bounds().unwrap(), &bounds_of(&coords));
    assert_eq!(exported.elapsed_seconds(), activity.total_elapsed_seconds);
}

#[test]
fn test_export_with_simplification() {
    init_logging();
    let dir = TempDir::new().expect("failed to create temp dir");
    let mut store = open_store(&dir);
    let coords = ride_coordinates(150);
    let doc = gpx_document(&[coords.clone()]);

    let activity = Importer::default()
        .import(&mut store, &ImportRequest::new("alice", doc.as_bytes()))
        .unwrap();

    let raw = store.load_raw_points(activity.id).unwrap();
    let points = assemble(&activity, &raw, Some(40));
    assert!(points.len() <= 40);
    assert_eq!(points.first().map(|p| p.time), Some(activity.start_time));
    assert_eq!(points.last().map(|p| p.time), Some(activity.end_time));

    let bytes = export_activity(&store, activity.id, Some(40), &GpxRenderer::default()).unwrap();
    assert_eq!(parse(&bytes).unwrap().point_count(), points.len());
}

#[test]
fn test_empty_segment_is_skipped() {
    init_logging();
    let dir = TempDir::new().expect("failed to create temp dir");
    let mut store = open_store(&dir);
    let doc = gpx_document(&[ride_coordinates(10), Vec::new()]);

    let activity = Importer::default()
        .import(&mut store, &ImportRequest::new("alice", doc.as_bytes()))
        .unwrap();

    assert_eq!(store.load_raw_points(activity.id).unwrap().len(), 10);
    for level in FilterLevel::ALL {
        assert_eq!(
            store.load_filtered_points(activity.id, level).unwrap().len(),
            10
        );
    }
}

#[test]
fn test_no_coordinates_creates_no_transaction() {
    init_logging();
    let mut store = CountingStore {
        inner: SqliteStore::in_memory().unwrap(),
        begins: 0,
    };
    store.inner.create_owner("alice").unwrap();
    let doc = gpx_document(&[Vec::new(), Vec::new()]);

    let err = Importer::default()
        .import(&mut store, &ImportRequest::new("alice", doc.as_bytes()))
        .unwrap_err();

    assert!(matches!(err, ImportError::Parse(ParseError::NoCoordinates)));
    assert_eq!(store.begins, 0);
    assert_eq!(store.inner.activity_count().unwrap(), 0);
}

#[test]
fn test_unrecognized_format() {
    init_logging();
    let kml = r#"<?xml version="1.0"?>
<kml xmlns="http://www.opengis.net/kml/2.2"><Document><Placemark>
  <LineString><coordinates>7.25,43.7 7.26,43.71</coordinates></LineString>
</Placemark></Document></kml>"#;

    assert_eq!(parse(kml.as_bytes()), Err(ParseError::UnrecognizedFormat));

    let mut store = CountingStore {
        inner: SqliteStore::in_memory().unwrap(),
        begins: 0,
    };
    store.inner.create_owner("alice").unwrap();
    let err = Importer::default()
        .import(&mut store, &ImportRequest::new("alice", kml.as_bytes()))
        .unwrap_err();
    assert!(matches!(err, ImportError::Parse(ParseError::UnrecognizedFormat)));
    assert_eq!(store.begins, 0);
}

#[test]
fn test_tcx_import() {
    init_logging();
    let dir = TempDir::new().expect("failed to create temp dir");
    let mut store = open_store(&dir);
    let tcx = r#"<?xml version="1.0" encoding="UTF-8"?>
<TrainingCenterDatabase xmlns="http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2">
  <Activities>
    <Activity Sport="Running">
      <Id>2014-03-02T07:30:00Z</Id>
      <Lap StartTime="2014-03-02T07:30:00Z">
        <TotalTimeSeconds>300</TotalTimeSeconds>
        <DistanceMeters>1000</DistanceMeters>
        <Track>
          <Trackpoint><Time>2014-03-02T07:30:00Z</Time><Position><LatitudeDegrees>40.0</LatitudeDegrees><LongitudeDegrees>-3.7</LongitudeDegrees></Position><AltitudeMeters>650</AltitudeMeters></Trackpoint>
          <Trackpoint><Time>2014-03-02T07:32:00Z</Time><Position><LatitudeDegrees>40.004</LatitudeDegrees><LongitudeDegrees>-3.701</LongitudeDegrees></Position><AltitudeMeters>652</AltitudeMeters></Trackpoint>
          <Trackpoint><Time>2014-03-02T07:34:00Z</Time><Position><LatitudeDegrees>40.008</LatitudeDegrees><LongitudeDegrees>-3.703</LongitudeDegrees></Position><AltitudeMeters>655</AltitudeMeters></Trackpoint>
        </Track>
      </Lap>
    </Activity>
  </Activities>
</TrainingCenterDatabase>"#;

    let activity = Importer::default()
        .import(
            &mut store,
            &ImportRequest::new("alice", tcx.as_bytes()).with_name("Tempo run"),
        )
        .unwrap();

    assert_eq!(activity.name, "Tempo run");
    // The lap outlasts the last trackpoint (240s)
    assert_eq!(activity.total_elapsed_seconds, 300);
    let raw = store.load_raw_points(activity.id).unwrap();
    let offsets: Vec<u32> = raw.iter().map(|p| p.time_offset_seconds).collect();
    assert_eq!(offsets, vec![0, 120, 240]);
    assert_eq!(raw[2].elevation, 655.0);
}
