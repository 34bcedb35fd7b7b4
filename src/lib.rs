//! # Effort Import
//!
//! Ingestion of GPS activity recordings (GPX and TCX) into a canonical
//! point model, with bounding boxes, multi-resolution simplification and
//! all-or-nothing persistence.
//!
//! This library provides:
//! - A parser that normalizes both XML dialects into [`Segment`]s of [`Trackpoint`]s
//! - A [`BoundingBox`] that is folded over every imported segment
//! - A size-bounded Douglas-Peucker simplifier ([`simplify_until`])
//! - An [`Importer`] that writes an activity, its raw points and one reduced
//!   point set per [`FilterLevel`] inside a single storage transaction
//! - An export assembler that rebuilds absolute timestamps from stored points,
//!   and a [`GpxRenderer`] for it
//! - Ride summaries and sync drivers for a remote activity service
//!
//! ## Features
//!
//! - **`parallel`** - Simplify all filter levels of a segment in parallel with rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use effort_import::{Importer, ImportConfig, ImportRequest, SqliteStore, TrackStore};
//!
//! let gpx = r#"<?xml version="1.0" encoding="UTF-8"?>
//! <gpx version="1.1" creator="example" xmlns="http://www.topografix.com/GPX/1/1">
//!   <metadata><time>2013-05-01T10:00:00Z</time></metadata>
//!   <trk><name>Morning ride</name><trkseg>
//!     <trkpt lat="51.5074" lon="-0.1278"><ele>11</ele><time>2013-05-01T10:00:00Z</time></trkpt>
//!     <trkpt lat="51.5090" lon="-0.1300"><ele>12</ele><time>2013-05-01T10:00:30Z</time></trkpt>
//!   </trkseg></trk>
//! </gpx>"#;
//!
//! let mut store = SqliteStore::in_memory().unwrap();
//! store.create_owner("alice").unwrap();
//!
//! let importer = Importer::new(ImportConfig::default());
//! let activity = importer
//!     .import(&mut store, &ImportRequest::new("alice", gpx.as_bytes()))
//!     .unwrap();
//!
//! assert_eq!(activity.name, "Morning ride");
//! assert_eq!(activity.total_elapsed_seconds, 30);
//! assert_eq!(store.load_raw_points(activity.id).unwrap().len(), 2);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{
    Dialect, ExportError, ImportError, ParseError, PersistenceError, RemoteError, RenderError,
    Result, ValidationError,
};

// Geographic extent
pub mod bounds;
pub use bounds::BoundingBox;

// Size-bounded line simplification
pub mod simplify;
pub use simplify::simplify_until;

// GPX / TCX decoding
pub mod parser;
pub use parser::{parse, LapSummary, ParsedActivity};

// Import configuration
pub mod config;
pub use config::ImportConfig;

// Storage collaborator interface and its SQLite implementation
pub mod store;
pub use store::{NewActivity, StoreTransaction, TrackStore};

pub mod persistence;
pub use persistence::SqliteStore;

// Transactional import orchestration
pub mod importer;
pub use importer::{ImportRequest, Importer};

// Export assembly
pub mod export;
pub use export::{assemble, export_activity, GpxRenderer, TrackRenderer};

// Ride summaries and previews
pub mod summary;
pub use summary::{resolve_name, summarize, RideSummary};

// Remote activity service and geocoding collaborators
pub mod remote;
pub use remote::{
    export_to_remote, filter_not_imported, format_distance, format_duration, import_recent,
    ActivityInfo, Geocoder, RemoteActivitySource, SyncReport, UploadResult,
};

// ============================================================================
// Core Types
// ============================================================================

/// Storage identifier of an imported activity.
pub type ActivityId = i64;

/// A point exposing geographic coordinates, so the same simplifier and
/// bounding box code can run over raw, timed and preview points.
pub trait Positioned {
    fn latitude(&self) -> f64;
    fn longitude(&self) -> f64;
}

/// One geolocated sample of a track, as produced by the parser.
///
/// `time_offset_seconds` is relative to the activity start time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trackpoint {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
    pub time_offset_seconds: u32,
}

impl Trackpoint {
    pub fn new(latitude: f64, longitude: f64, elevation: f64, time_offset_seconds: u32) -> Self {
        Self {
            latitude,
            longitude,
            elevation,
            time_offset_seconds,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl Positioned for Trackpoint {
    fn latitude(&self) -> f64 {
        self.latitude
    }

    fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// (latitude, longitude) pairs, used for preview coordinates.
impl Positioned for (f64, f64) {
    fn latitude(&self) -> f64 {
        self.0
    }

    fn longitude(&self) -> f64 {
        self.1
    }
}

/// A contiguous run of trackpoints. Order is significant.
///
/// Segments without coordinate data are kept by the parser and skipped by
/// the importer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub points: Vec<Trackpoint>,
}

impl Segment {
    pub fn new(points: Vec<Trackpoint>) -> Self {
        Self { points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn last_offset(&self) -> Option<u32> {
        self.points.last().map(|p| p.time_offset_seconds)
    }
}

/// A trackpoint with its absolute timestamp restored, ready for rendering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
    pub time: DateTime<Utc>,
}

impl Positioned for TimedPoint {
    fn latitude(&self) -> f64 {
        self.latitude
    }

    fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// Resolution tier of a pre-simplified point set.
///
/// Each level is a ceiling on the number of points kept per segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FilterLevel {
    /// Thumbnails and list previews
    Coarse,
    /// Overview maps
    Medium,
    /// Regional zoom
    Fine,
    /// Close zoom
    Detail,
}

impl FilterLevel {
    pub const ALL: [FilterLevel; 4] = [
        FilterLevel::Coarse,
        FilterLevel::Medium,
        FilterLevel::Fine,
        FilterLevel::Detail,
    ];

    /// Maximum number of points kept per segment at this level.
    pub fn target_count(self) -> usize {
        match self {
            FilterLevel::Coarse => 50,
            FilterLevel::Medium => 200,
            FilterLevel::Fine => 500,
            FilterLevel::Detail => 1000,
        }
    }

    /// Look up a level by its target count (the stored representation).
    pub fn from_target_count(count: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.target_count() == count)
    }
}

/// A recorded activity with its metadata and geographic extent.
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub id: ActivityId,
    pub owner: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_elapsed_seconds: u32,
    pub bounds: Option<BoundingBox>,
    pub external_source_id: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================
