//! # Remote Activity Services
//!
//! Collaborator traits for an activity-sharing service and a reverse
//! geocoder, plus the drivers that connect them to the importer and the
//! exporter. Sessions, credentials and HTTP are the implementor's concern;
//! this module only moves bytes and listings.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    export_activity, Activity, ActivityId, ImportRequest, Importer, RemoteError, TrackRenderer,
    TrackStore,
};

// ============================================================================
// Collaborators
// ============================================================================

/// Reverse geocoder used to name activities after their start location.
pub trait Geocoder {
    /// Display name of the place at a coordinate. `Ok(None)` means the
    /// service knows no name for it.
    fn reverse(&self, latitude: f64, longitude: f64) -> Result<Option<String>, RemoteError>;
}

/// A remote service holding a user's recorded activities.
pub trait RemoteActivitySource {
    /// Up to `limit` activities of `user`, starting at position `start`.
    fn list_activities(
        &self,
        user: &str,
        limit: usize,
        start: usize,
    ) -> Result<Vec<ActivityInfo>, RemoteError>;

    /// Raw GPX/TCX bytes of one activity.
    fn fetch_activity_file(&self, id: &str) -> Result<Vec<u8>, RemoteError>;

    /// Upload a rendered activity file.
    fn upload_activity_file(&self, bytes: &[u8]) -> Result<UploadResult, RemoteError>;
}

// ============================================================================
// Activity listings
// ============================================================================

/// One entry of a remote activity listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ListedActivity")]
pub struct ActivityInfo {
    pub id: String,
    pub name: String,
    /// Start time in UTC, ISO 8601 with a `Z` suffix
    pub start_time_gmt: String,
    /// Rounded meters
    pub distance_meters: u64,
    /// Rounded seconds
    pub duration_seconds: u64,
}

/// Listing entry as sent by the service.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedActivity {
    activity_id: IdValue,
    #[serde(default)]
    activity_name: Option<String>,
    #[serde(rename = "startTimeGMT", default)]
    start_time_gmt: String,
    #[serde(default)]
    distance: Option<f64>,
    #[serde(default)]
    duration: Option<f64>,
}

/// Ids arrive as numbers from some endpoints and strings from others.
#[derive(Deserialize)]
#[serde(untagged)]
enum IdValue {
    Number(u64),
    Text(String),
}

impl From<ListedActivity> for ActivityInfo {
    fn from(listed: ListedActivity) -> Self {
        let name = listed
            .activity_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "Untitled".to_string());
        let mut start_time_gmt = listed.start_time_gmt;
        if !start_time_gmt.is_empty() && !start_time_gmt.ends_with('Z') {
            start_time_gmt.push('Z');
        }

        Self {
            id: match listed.activity_id {
                IdValue::Number(n) => n.to_string(),
                IdValue::Text(s) => s,
            },
            name,
            start_time_gmt,
            distance_meters: rounded(listed.distance),
            duration_seconds: rounded(listed.duration),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityList {
    activity_list: Vec<ActivityInfo>,
}

impl ActivityInfo {
    /// Parse a listing response (`{"activityList": [...]}`).
    pub fn list_from_json(json: &str) -> Result<Vec<ActivityInfo>, RemoteError> {
        let list: ActivityList = serde_json::from_str(json)?;
        Ok(list.activity_list)
    }
}

fn rounded(value: Option<f64>) -> u64 {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => v.round() as u64,
        _ => 0,
    }
}

/// Human-readable distance: kilometers with two decimals above 1000 m.
pub fn format_distance(meters: u64) -> String {
    if meters > 1000 {
        format!("{:.2} km", meters as f64 / 1000.0)
    } else {
        format!("{} m", meters)
    }
}

/// Human-readable duration, e.g. `1 h 05 min 09 sec`.
///
/// Hours are a plain total and never wrap at 12 or 24.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{} h {:02} min {:02} sec", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{:02} min {:02} sec", minutes, secs)
    } else {
        format!("{:02} sec", secs)
    }
}

/// Outcome of an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadResult {
    /// Id the service assigned to the uploaded activity, if it accepted it
    pub remote_id: Option<String>,
}

impl UploadResult {
    /// Parse an upload response
    /// (`{"detailedImportResult": {"successes": [{"internalId": ...}]}}`).
    pub fn from_json(json: &str) -> Result<Self, RemoteError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let remote_id = value
            .pointer("/detailedImportResult/successes/0/internalId")
            .and_then(|id| match id {
                serde_json::Value::Number(n) => Some(n.to_string()),
                serde_json::Value::String(s) => Some(s.clone()),
                _ => None,
            });
        Ok(Self { remote_id })
    }
}

// ============================================================================
// Sync drivers
// ============================================================================

/// Drop listed activities that `imported` already holds.
pub fn filter_not_imported(activities: Vec<ActivityInfo>, imported: &[String]) -> Vec<ActivityInfo> {
    let imported: HashSet<&str> = imported.iter().map(String::as_str).collect();
    activities
        .into_iter()
        .filter(|a| !imported.contains(a.id.as_str()))
        .collect()
}

/// An activity that could not be fetched or imported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub remote_id: String,
    pub reason: String,
}

/// Result of [`import_recent`].
#[derive(Debug, Default)]
pub struct SyncReport {
    pub imported: Vec<Activity>,
    /// Listed activities that were already stored
    pub skipped: usize,
    pub failed: Vec<SyncFailure>,
}

/// Import the most recent remote activities of `owner` not stored yet.
///
/// Each activity is imported in its own transaction. A failing activity is
/// recorded in the report and the batch continues; only listing errors and
/// storage errors outside an import abort the run.
pub fn import_recent<S, R>(
    importer: &Importer,
    store: &mut S,
    source: &R,
    owner: &str,
    limit: usize,
    start: usize,
) -> Result<SyncReport, RemoteError>
where
    S: TrackStore,
    R: RemoteActivitySource + ?Sized,
{
    let listed = source.list_activities(owner, limit, start)?;
    let total = listed.len();
    let imported_ids = store.imported_external_ids(owner)?;
    let pending = filter_not_imported(listed, &imported_ids);

    let mut report = SyncReport {
        skipped: total - pending.len(),
        ..SyncReport::default()
    };
    log::info!(
        "[Sync] {} listed for '{}', {} already imported",
        total,
        owner,
        report.skipped
    );

    for info in pending {
        let raw = match source.fetch_activity_file(&info.id) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("[Sync] Fetching {} failed: {}", info.id, e);
                report.failed.push(SyncFailure {
                    remote_id: info.id,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let request = ImportRequest::new(owner, &raw)
            .with_external_source(info.id.clone(), Some(info.name.clone()));
        match importer.import(store, &request) {
            Ok(activity) => report.imported.push(activity),
            Err(e) => {
                log::warn!("[Sync] Importing {} failed: {}", info.id, e);
                report.failed.push(SyncFailure {
                    remote_id: info.id,
                    reason: e.to_string(),
                });
            }
        }
    }

    log::info!(
        "[Sync] Imported {}, failed {}",
        report.imported.len(),
        report.failed.len()
    );
    Ok(report)
}

/// Render a stored activity and upload it.
pub fn export_to_remote<S, T, R>(
    store: &S,
    id: ActivityId,
    renderer: &T,
    source: &R,
) -> Result<UploadResult, RemoteError>
where
    S: TrackStore,
    T: TrackRenderer + ?Sized,
    R: RemoteActivitySource + ?Sized,
{
    let bytes = export_activity(store, id, None, renderer)?;
    let result = source.upload_activity_file(&bytes)?;
    match &result.remote_id {
        Some(remote_id) => log::info!("[Sync] Uploaded activity {} as {}", id, remote_id),
        None => log::warn!("[Sync] Upload of activity {} was not accepted", id),
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::GpxRenderer;
    use crate::SqliteStore;
    use std::cell::RefCell;
    use std::collections::HashMap;

    const LISTING: &str = r#"{"activityList": [
        {"activityId": 101, "activityName": "Lunch ride", "startTimeGMT": "2013-05-01 10:00:00", "distance": 12345.6, "duration": 3909.4},
        {"activityId": "102", "activityName": "", "startTimeGMT": "2013-05-02 10:00:00", "distance": 850.2, "duration": 9},
        {"activityId": 103, "startTimeGMT": "2013-05-03 10:00:00"}
    ]}"#;

    fn gpx(day: u32) -> Vec<u8> {
        format!(
            r#"<gpx version="1.1"><metadata><time>2013-05-{:02}T10:00:00Z</time></metadata>
            <trk><name>Ride {}</name><trkseg>
            <trkpt lat="45.0" lon="7.0"><time>2013-05-{:02}T10:00:00Z</time></trkpt>
            <trkpt lat="45.1" lon="7.1"><time>2013-05-{:02}T10:05:00Z</time></trkpt>
            </trkseg></trk></gpx>"#,
            day, day, day, day
        )
        .into_bytes()
    }

    struct FakeService {
        listing: Vec<ActivityInfo>,
        files: HashMap<String, Vec<u8>>,
        uploads: RefCell<Vec<Vec<u8>>>,
    }

    impl FakeService {
        fn new() -> Self {
            let mut files = HashMap::new();
            files.insert("101".to_string(), gpx(1));
            files.insert("102".to_string(), b"<kml></kml>".to_vec());
            files.insert("103".to_string(), gpx(3));
            Self {
                listing: ActivityInfo::list_from_json(LISTING).unwrap(),
                files,
                uploads: RefCell::new(Vec::new()),
            }
        }
    }

    impl RemoteActivitySource for FakeService {
        fn list_activities(
            &self,
            _user: &str,
            limit: usize,
            start: usize,
        ) -> Result<Vec<ActivityInfo>, RemoteError> {
            Ok(self.listing.iter().skip(start).take(limit).cloned().collect())
        }

        fn fetch_activity_file(&self, id: &str) -> Result<Vec<u8>, RemoteError> {
            self.files.get(id).cloned().ok_or_else(|| RemoteError::Request {
                message: format!("404 for {}", id),
            })
        }

        fn upload_activity_file(&self, bytes: &[u8]) -> Result<UploadResult, RemoteError> {
            self.uploads.borrow_mut().push(bytes.to_vec());
            UploadResult::from_json(
                r#"{"detailedImportResult": {"successes": [{"internalId": 9001}]}}"#,
            )
        }
    }

    #[test]
    fn test_listing_model() {
        let listing = ActivityInfo::list_from_json(LISTING).unwrap();
        assert_eq!(listing.len(), 3);

        assert_eq!(listing[0].id, "101");
        assert_eq!(listing[0].name, "Lunch ride");
        assert_eq!(listing[0].start_time_gmt, "2013-05-01 10:00:00Z");
        assert_eq!(listing[0].distance_meters, 12346);
        assert_eq!(listing[0].duration_seconds, 3909);

        assert_eq!(listing[1].id, "102");
        assert_eq!(listing[1].name, "Untitled");
        assert_eq!(listing[2].name, "Untitled");
        assert_eq!(listing[2].distance_meters, 0);
    }

    #[test]
    fn test_listing_rejects_garbage() {
        assert!(matches!(
            ActivityInfo::list_from_json("[1, 2]"),
            Err(RemoteError::Decode(_))
        ));
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(12346), "12.35 km");
        assert_eq!(format_distance(1000), "1000 m");
        assert_eq!(format_distance(850), "850 m");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(9), "09 sec");
        assert_eq!(format_duration(309), "05 min 09 sec");
        assert_eq!(format_duration(3909), "1 h 05 min 09 sec");
        // No wrapping past a day
        assert_eq!(format_duration(26 * 3600 + 61), "26 h 01 min 01 sec");
    }

    #[test]
    fn test_filter_not_imported() {
        let listing = ActivityInfo::list_from_json(LISTING).unwrap();
        let remaining = filter_not_imported(listing, &["102".to_string()]);
        let ids: Vec<&str> = remaining.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["101", "103"]);
    }

    #[test]
    fn test_upload_result() {
        let accepted = UploadResult::from_json(
            r#"{"detailedImportResult": {"successes": [{"internalId": "77"}], "failures": []}}"#,
        )
        .unwrap();
        assert_eq!(accepted.remote_id.as_deref(), Some("77"));

        let rejected =
            UploadResult::from_json(r#"{"detailedImportResult": {"successes": []}}"#).unwrap();
        assert_eq!(rejected.remote_id, None);
    }

    #[test]
    fn test_import_recent_continues_past_failures() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.create_owner("alice").unwrap();
        let service = FakeService::new();
        let importer = Importer::default();

        let report = import_recent(&importer, &mut store, &service, "alice", 10, 0).unwrap();
        assert_eq!(report.imported.len(), 2);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].remote_id, "102");
        assert_eq!(report.imported[0].external_source_id.as_deref(), Some("101"));

        // Second run skips everything stored; the broken file fails again
        let report = import_recent(&importer, &mut store, &service, "alice", 10, 0).unwrap();
        assert!(report.imported.is_empty());
        assert_eq!(report.skipped, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(store.activity_count().unwrap(), 2);
    }

    #[test]
    fn test_export_to_remote() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.create_owner("alice").unwrap();
        let service = FakeService::new();
        let report =
            import_recent(&Importer::default(), &mut store, &service, "alice", 1, 0).unwrap();
        let id = report.imported[0].id;

        let result = export_to_remote(&store, id, &GpxRenderer::default(), &service).unwrap();
        assert_eq!(result.remote_id.as_deref(), Some("9001"));

        let uploads = service.uploads.borrow();
        assert_eq!(uploads.len(), 1);
        let reparsed = crate::parse(&uploads[0]).unwrap();
        assert_eq!(reparsed.point_count(), 2);
    }
}
