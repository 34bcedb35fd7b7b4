//! # Import Orchestrator
//!
//! Turns one raw GPX/TCX document into a stored activity.
//!
//! Parsing, name resolution and validation all run before the storage
//! transaction is opened, so their failures leave nothing behind. Once the
//! transaction is open every segment is written inside it:
//!
//! 1. raw points are inserted
//! 2. the activity's bounding box is extended with the segment
//! 3. each configured [`FilterLevel`] gets its own reduced copy of the segment
//!
//! Timing and bounds are written last, then the transaction commits. Any
//! failure after `begin` rolls the whole import back and is returned to the
//! caller unchanged, so a retry starts from a clean store.

use chrono::{DateTime, Duration, Utc};

use crate::store::{NewActivity, StoreTransaction, TrackStore};
use crate::summary::resolve_name;
use crate::{
    parse, simplify_until, Activity, BoundingBox, FilterLevel, Geocoder, ImportConfig,
    ParsedActivity, PersistenceError, Result, Trackpoint, ValidationError,
};

// ============================================================================
// Request
// ============================================================================

/// One document to import on behalf of a user.
#[derive(Debug, Clone)]
pub struct ImportRequest<'a> {
    pub owner: String,
    pub raw: &'a [u8],
    /// Name chosen by the user, takes precedence over the document's own
    pub name: Option<String>,
    /// Identifier of the activity on the remote service it was fetched from
    pub external_source_id: Option<String>,
    /// Name of the activity on the remote service it was fetched from
    pub external_name: Option<String>,
}

impl<'a> ImportRequest<'a> {
    pub fn new(owner: impl Into<String>, raw: &'a [u8]) -> Self {
        Self {
            owner: owner.into(),
            raw,
            name: None,
            external_source_id: None,
            external_name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_external_source(mut self, id: impl Into<String>, name: Option<String>) -> Self {
        self.external_source_id = Some(id.into());
        self.external_name = name;
        self
    }
}

// ============================================================================
// Importer
// ============================================================================

/// Imports documents into a [`TrackStore`].
pub struct Importer {
    config: ImportConfig,
    geocoder: Option<Box<dyn Geocoder + Send + Sync>>,
}

impl Default for Importer {
    fn default() -> Self {
        Self::new(ImportConfig::default())
    }
}

impl Importer {
    pub fn new(config: ImportConfig) -> Self {
        Self {
            config,
            geocoder: None,
        }
    }

    /// Name unnamed activities after the place they start at.
    pub fn with_geocoder(mut self, geocoder: impl Geocoder + Send + Sync + 'static) -> Self {
        self.geocoder = Some(Box::new(geocoder));
        self
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Parse and import a document.
    ///
    /// # Errors
    /// - [`ImportError::Parse`](crate::ImportError::Parse) if the document cannot be decoded
    /// - [`ImportError::Validation`](crate::ImportError::Validation) if owner, name or start time are unusable
    /// - [`ImportError::Persistence`](crate::ImportError::Persistence) if storage fails; nothing is kept
    pub fn import<S: TrackStore>(
        &self,
        store: &mut S,
        request: &ImportRequest<'_>,
    ) -> Result<Activity> {
        let parsed = parse(request.raw)?;
        self.import_parsed(store, request, &parsed)
    }

    /// Import an already parsed document. `request.raw` is not read.
    pub fn import_parsed<S: TrackStore>(
        &self,
        store: &mut S,
        request: &ImportRequest<'_>,
        parsed: &ParsedActivity,
    ) -> Result<Activity> {
        log::debug!("[Importer] Validating import for '{}'", request.owner);
        let new = self.validate(&*store, request, parsed)?;

        let mut tx = store.begin()?;
        log::debug!("[Importer] Transaction open for '{}'", new.name);

        match self.write(&mut tx, &new, parsed) {
            Ok(activity) => {
                if let Err(err) = tx.commit() {
                    log::warn!("[Importer] Commit of '{}' failed, rolling back: {}", new.name, err);
                    return Err(err.into());
                }
                log::info!(
                    "[Importer] Imported activity {} '{}' ({} points, {}s)",
                    activity.id,
                    activity.name,
                    parsed.point_count(),
                    activity.total_elapsed_seconds
                );
                Ok(activity)
            }
            Err(err) => {
                log::warn!("[Importer] Import of '{}' failed, rolling back: {}", new.name, err);
                if let Err(rollback_err) = tx.rollback() {
                    log::error!("[Importer] Rollback failed: {}", rollback_err);
                }
                Err(err.into())
            }
        }
    }

    /// Check the activity's required fields before anything is written.
    fn validate<S: TrackStore>(
        &self,
        store: &S,
        request: &ImportRequest<'_>,
        parsed: &ParsedActivity,
    ) -> Result<NewActivity> {
        let owner = request.owner.trim();
        if owner.is_empty() {
            return Err(ValidationError::new("owner", "must not be empty").into());
        }
        if !store.owner_exists(owner)? {
            return Err(ValidationError::new("owner", format!("unknown user '{}'", owner)).into());
        }

        let geocoder = self.geocoder.as_deref().map(|g| g as &dyn Geocoder);
        let name = resolve_name(request.name.as_deref(), parsed, geocoder);
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::new("name", "must not be empty").into());
        }
        let length = name.chars().count();
        if length > self.config.max_name_length {
            return Err(ValidationError::new(
                "name",
                format!(
                    "{} characters exceeds the limit of {}",
                    length, self.config.max_name_length
                ),
            )
            .into());
        }

        let start_time = parsed
            .start_time
            .ok_or_else(|| ValidationError::new("start_time", "document has no timestamps"))?;

        if let Some(id) = &request.external_source_id {
            if id.trim().is_empty() {
                return Err(ValidationError::new("external_source_id", "must not be empty").into());
            }
        }

        Ok(NewActivity {
            owner: owner.to_string(),
            name: name.to_string(),
            start_time,
            external_source_id: request.external_source_id.clone(),
            external_name: request.external_name.clone(),
        })
    }

    /// Every write of one import. The caller commits or rolls back.
    fn write<T: StoreTransaction>(
        &self,
        tx: &mut T,
        new: &NewActivity,
        parsed: &ParsedActivity,
    ) -> std::result::Result<Activity, PersistenceError> {
        let id = tx.insert_activity(new)?;
        let levels = self.config.levels();
        let mut bounds: Option<BoundingBox> = None;

        for (index, segment) in parsed.segments.iter().enumerate() {
            if segment.is_empty() {
                log::debug!("[Importer] Skipping empty segment {}", index);
                continue;
            }

            tx.insert_raw_points(id, index, &segment.points)?;
            bounds = BoundingBox::extend_option(bounds, &segment.points);

            for (level, reduced) in reduce_segment(&segment.points, &levels) {
                tx.insert_filtered_points(id, level, index, &reduced)?;
            }
            log::debug!(
                "[Importer] Segment {} stored ({} points)",
                index,
                segment.len()
            );
        }

        let elapsed = parsed.elapsed_seconds();
        let end_time = end_time(new.start_time, elapsed);
        tx.update_activity_timing(id, end_time, elapsed)?;
        if let Some(bounds) = &bounds {
            tx.update_activity_bounds(id, bounds)?;
        }

        Ok(Activity {
            id,
            owner: new.owner.clone(),
            name: new.name.clone(),
            start_time: new.start_time,
            end_time,
            total_elapsed_seconds: elapsed,
            bounds,
            external_source_id: new.external_source_id.clone(),
        })
    }
}

fn end_time(start: DateTime<Utc>, elapsed_seconds: u32) -> DateTime<Utc> {
    start + Duration::seconds(i64::from(elapsed_seconds))
}

/// Simplify one segment for every level.
#[cfg(feature = "parallel")]
fn reduce_segment(
    points: &[Trackpoint],
    levels: &[FilterLevel],
) -> Vec<(FilterLevel, Vec<Trackpoint>)> {
    use rayon::prelude::*;

    levels
        .par_iter()
        .map(|&level| (level, simplify_until(points, level.target_count())))
        .collect()
}

/// Simplify one segment for every level.
#[cfg(not(feature = "parallel"))]
fn reduce_segment(
    points: &[Trackpoint],
    levels: &[FilterLevel],
) -> Vec<(FilterLevel, Vec<Trackpoint>)> {
    levels
        .iter()
        .map(|&level| (level, simplify_until(points, level.target_count())))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
