//! Storage collaborator interface.
//!
//! The importer never talks to a database directly. It opens one
//! [`StoreTransaction`] per import through a [`TrackStore`], issues its
//! writes against it and finishes with exactly one of `commit` or
//! `rollback`. A transaction dropped without either must roll back, so an
//! early return or panic can never leave partial rows behind.

use chrono::{DateTime, Utc};

use crate::{Activity, ActivityId, BoundingBox, FilterLevel, PersistenceError, Trackpoint};

/// Activity row written at the start of an import.
///
/// End time, elapsed time and bounds are filled in once all segments are
/// stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewActivity {
    pub owner: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub external_source_id: Option<String>,
    pub external_name: Option<String>,
}

/// Connection-level storage operations.
pub trait TrackStore {
    type Transaction<'a>: StoreTransaction
    where
        Self: 'a;

    /// Open the single transaction of an import.
    fn begin(&mut self) -> Result<Self::Transaction<'_>, PersistenceError>;

    /// Whether `owner` is a known user.
    fn owner_exists(&self, owner: &str) -> Result<bool, PersistenceError>;

    fn load_activity(&self, id: ActivityId) -> Result<Option<Activity>, PersistenceError>;

    /// Raw points of all segments, in import order.
    fn load_raw_points(&self, id: ActivityId) -> Result<Vec<Trackpoint>, PersistenceError>;

    /// Reduced points of one level, in import order.
    fn load_filtered_points(
        &self,
        id: ActivityId,
        level: FilterLevel,
    ) -> Result<Vec<Trackpoint>, PersistenceError>;

    /// External source ids of every activity `owner` has imported.
    fn imported_external_ids(&self, owner: &str) -> Result<Vec<String>, PersistenceError>;
}

/// Writes issued inside one import transaction.
pub trait StoreTransaction {
    fn insert_activity(&mut self, activity: &NewActivity) -> Result<ActivityId, PersistenceError>;

    fn insert_raw_points(
        &mut self,
        id: ActivityId,
        segment_index: usize,
        points: &[Trackpoint],
    ) -> Result<(), PersistenceError>;

    fn insert_filtered_points(
        &mut self,
        id: ActivityId,
        level: FilterLevel,
        segment_index: usize,
        points: &[Trackpoint],
    ) -> Result<(), PersistenceError>;

    fn update_activity_bounds(
        &mut self,
        id: ActivityId,
        bounds: &BoundingBox,
    ) -> Result<(), PersistenceError>;

    fn update_activity_timing(
        &mut self,
        id: ActivityId,
        end_time: DateTime<Utc>,
        elapsed_seconds: u32,
    ) -> Result<(), PersistenceError>;

    fn commit(self) -> Result<(), PersistenceError>;

    fn rollback(self) -> Result<(), PersistenceError>;
}
