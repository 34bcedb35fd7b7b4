//! # SQLite Track Store
//!
//! rusqlite implementation of [`TrackStore`].
//!
//! ## Tables
//!
//! - `owners` - users that may own activities
//! - `activities` - one row per imported activity, with timing and bounds
//! - `raw_points` - every parsed point, keyed by segment and sequence
//! - `filtered_points` - reduced points, keyed by filter level, segment and sequence
//!
//! Point tables cascade on activity deletion. `(owner, external_source_id)`
//! is unique, so importing the same remote activity twice fails with a
//! [`PersistenceError`].

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};

use crate::store::{NewActivity, StoreTransaction, TrackStore};
use crate::{Activity, ActivityId, BoundingBox, FilterLevel, PersistenceError, Trackpoint};

// ============================================================================
// Store
// ============================================================================

/// SQLite-backed activity store.
pub struct SqliteStore {
    db: Connection,
}

impl SqliteStore {
    /// Open (or create) a database at the given path.
    pub fn open(db_path: &str) -> SqlResult<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        log::info!("[SqliteStore] Opened database at {}", db_path);
        Ok(Self { db })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> SqlResult<Self> {
        Self::open(":memory:")
    }

    /// Initialize the database schema.
    fn init_schema(conn: &Connection) -> SqlResult<()> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS owners (
                id TEXT PRIMARY KEY,
                created_at INTEGER DEFAULT (strftime('%s', 'now'))
            );

            CREATE TABLE IF NOT EXISTS activities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner TEXT NOT NULL REFERENCES owners(id),
                name TEXT NOT NULL,
                start_time INTEGER NOT NULL,
                end_time INTEGER NOT NULL,
                elapsed_seconds INTEGER NOT NULL DEFAULT 0,
                lat_min REAL,
                lat_max REAL,
                lng_min REAL,
                lng_max REAL,
                external_source_id TEXT,
                external_name TEXT,
                UNIQUE (owner, external_source_id)
            );

            CREATE TABLE IF NOT EXISTS raw_points (
                activity_id INTEGER NOT NULL,
                segment_index INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                lat REAL NOT NULL,
                lng REAL NOT NULL,
                elevation REAL NOT NULL,
                time_offset INTEGER NOT NULL,
                PRIMARY KEY (activity_id, segment_index, seq),
                FOREIGN KEY (activity_id) REFERENCES activities(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS filtered_points (
                activity_id INTEGER NOT NULL,
                filter_level INTEGER NOT NULL,
                segment_index INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                lat REAL NOT NULL,
                lng REAL NOT NULL,
                elevation REAL NOT NULL,
                time_offset INTEGER NOT NULL,
                PRIMARY KEY (activity_id, filter_level, segment_index, seq),
                FOREIGN KEY (activity_id) REFERENCES activities(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_activities_owner ON activities(owner);
            "#,
        )
    }

    /// Register a user. Existing users are left untouched.
    pub fn create_owner(&self, owner: &str) -> SqlResult<()> {
        self.db
            .execute("INSERT OR IGNORE INTO owners (id) VALUES (?)", params![owner])?;
        Ok(())
    }

    /// Number of stored activities.
    pub fn activity_count(&self) -> SqlResult<u64> {
        let count: i64 = self
            .db
            .query_row("SELECT COUNT(*) FROM activities", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Number of stored points across both point tables.
    pub fn point_count(&self) -> SqlResult<u64> {
        let count: i64 = self.db.query_row(
            "SELECT (SELECT COUNT(*) FROM raw_points) + (SELECT COUNT(*) FROM filtered_points)",
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Delete an activity and its points.
    pub fn remove_activity(&self, id: ActivityId) -> SqlResult<()> {
        self.db
            .execute("DELETE FROM activities WHERE id = ?", params![id])?;
        Ok(())
    }

    fn load_points(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> SqlResult<Vec<Trackpoint>> {
        let mut stmt = self.db.prepare_cached(sql)?;
        let points = stmt
            .query_map(params, point_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(points)
    }
}

impl TrackStore for SqliteStore {
    type Transaction<'a> = SqliteTransaction<'a>
    where
        Self: 'a;

    fn begin(&mut self) -> Result<SqliteTransaction<'_>, PersistenceError> {
        let tx = self.db.transaction()?;
        Ok(SqliteTransaction { tx })
    }

    fn owner_exists(&self, owner: &str) -> Result<bool, PersistenceError> {
        let found = self
            .db
            .query_row("SELECT 1 FROM owners WHERE id = ?", params![owner], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    fn load_activity(&self, id: ActivityId) -> Result<Option<Activity>, PersistenceError> {
        let activity = self
            .db
            .query_row(
                "SELECT id, owner, name, start_time, end_time, elapsed_seconds,
                        lat_min, lat_max, lng_min, lng_max, external_source_id
                 FROM activities WHERE id = ?",
                params![id],
                activity_from_row,
            )
            .optional()?;
        Ok(activity)
    }

    fn load_raw_points(&self, id: ActivityId) -> Result<Vec<Trackpoint>, PersistenceError> {
        Ok(self.load_points(
            "SELECT lat, lng, elevation, time_offset FROM raw_points
             WHERE activity_id = ?1 ORDER BY segment_index, seq",
            params![id],
        )?)
    }

    fn load_filtered_points(
        &self,
        id: ActivityId,
        level: FilterLevel,
    ) -> Result<Vec<Trackpoint>, PersistenceError> {
        Ok(self.load_points(
            "SELECT lat, lng, elevation, time_offset FROM filtered_points
             WHERE activity_id = ?1 AND filter_level = ?2 ORDER BY segment_index, seq",
            params![id, level.target_count() as i64],
        )?)
    }

    fn imported_external_ids(&self, owner: &str) -> Result<Vec<String>, PersistenceError> {
        let mut stmt = self.db.prepare_cached(
            "SELECT external_source_id FROM activities
             WHERE owner = ? AND external_source_id IS NOT NULL",
        )?;
        let ids = stmt
            .query_map(params![owner], |row| row.get(0))?
            .collect::<SqlResult<Vec<String>>>()?;
        Ok(ids)
    }
}

// ============================================================================
// Transaction
// ============================================================================

/// One import's transaction. Dropping it without `commit` rolls back.
pub struct SqliteTransaction<'a> {
    tx: rusqlite::Transaction<'a>,
}

impl SqliteTransaction<'_> {
    fn insert_points(
        &self,
        sql: &str,
        head: &[i64],
        points: &[Trackpoint],
    ) -> Result<(), PersistenceError> {
        let mut stmt = self.tx.prepare_cached(sql)?;
        for (seq, p) in points.iter().enumerate() {
            let seq = seq as i64;
            let offset = i64::from(p.time_offset_seconds);
            let mut values: Vec<&dyn rusqlite::ToSql> =
                head.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
            values.extend_from_slice(&[&seq, &p.latitude, &p.longitude, &p.elevation, &offset]);
            stmt.execute(values.as_slice())?;
        }
        Ok(())
    }
}

impl StoreTransaction for SqliteTransaction<'_> {
    fn insert_activity(&mut self, activity: &NewActivity) -> Result<ActivityId, PersistenceError> {
        let start = activity.start_time.timestamp();
        self.tx.execute(
            "INSERT INTO activities (owner, name, start_time, end_time, elapsed_seconds,
                                     external_source_id, external_name)
             VALUES (?, ?, ?, ?, 0, ?, ?)",
            params![
                activity.owner,
                activity.name,
                start,
                start,
                activity.external_source_id,
                activity.external_name
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    fn insert_raw_points(
        &mut self,
        id: ActivityId,
        segment_index: usize,
        points: &[Trackpoint],
    ) -> Result<(), PersistenceError> {
        self.insert_points(
            "INSERT INTO raw_points (activity_id, segment_index, seq, lat, lng, elevation, time_offset)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            &[id, segment_index as i64],
            points,
        )
    }

    fn insert_filtered_points(
        &mut self,
        id: ActivityId,
        level: FilterLevel,
        segment_index: usize,
        points: &[Trackpoint],
    ) -> Result<(), PersistenceError> {
        self.insert_points(
            "INSERT INTO filtered_points (activity_id, filter_level, segment_index, seq, lat, lng, elevation, time_offset)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            &[id, level.target_count() as i64, segment_index as i64],
            points,
        )
    }

    fn update_activity_bounds(
        &mut self,
        id: ActivityId,
        bounds: &BoundingBox,
    ) -> Result<(), PersistenceError> {
        self.tx.execute(
            "UPDATE activities SET lat_min = ?, lat_max = ?, lng_min = ?, lng_max = ? WHERE id = ?",
            params![bounds.lat_min, bounds.lat_max, bounds.lng_min, bounds.lng_max, id],
        )?;
        Ok(())
    }

    fn update_activity_timing(
        &mut self,
        id: ActivityId,
        end_time: DateTime<Utc>,
        elapsed_seconds: u32,
    ) -> Result<(), PersistenceError> {
        self.tx.execute(
            "UPDATE activities SET end_time = ?, elapsed_seconds = ? WHERE id = ?",
            params![end_time.timestamp(), i64::from(elapsed_seconds), id],
        )?;
        Ok(())
    }

    fn commit(self) -> Result<(), PersistenceError> {
        self.tx.commit()?;
        Ok(())
    }

    fn rollback(self) -> Result<(), PersistenceError> {
        self.tx.rollback()?;
        Ok(())
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn point_from_row(row: &Row<'_>) -> SqlResult<Trackpoint> {
    let offset: i64 = row.get(3)?;
    Ok(Trackpoint {
        latitude: row.get(0)?,
        longitude: row.get(1)?,
        elevation: row.get(2)?,
        time_offset_seconds: u32::try_from(offset)
            .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(3, offset))?,
    })
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let secs: i64 = row.get(idx)?;
    DateTime::from_timestamp(secs, 0).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, secs))
}

fn activity_from_row(row: &Row<'_>) -> SqlResult<Activity> {
    let elapsed: i64 = row.get(5)?;
    let corners: (Option<f64>, Option<f64>, Option<f64>, Option<f64>) =
        (row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?);
    let bounds = match corners {
        (Some(lat_min), Some(lat_max), Some(lng_min), Some(lng_max)) => Some(BoundingBox {
            lat_min,
            lat_max,
            lng_min,
            lng_max,
        }),
        _ => None,
    };

    Ok(Activity {
        id: row.get(0)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        start_time: timestamp_column(row, 3)?,
        end_time: timestamp_column(row, 4)?,
        total_elapsed_seconds: u32::try_from(elapsed)
            .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(5, elapsed))?,
        bounds,
        external_source_id: row.get(10)?,
    })
}
