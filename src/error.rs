//! Unified error handling for the import and export pipelines.
//!
//! Parse and validation failures happen before any storage transaction is
//! opened. Anything that fails while a transaction is open is reported as
//! a [`PersistenceError`] after the transaction has been rolled back.

use std::fmt;

use thiserror::Error;

use crate::ActivityId;

/// The two supported XML track dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// GPX 1.1 (`gpx/trk/trkseg/trkpt`)
    Gpx,
    /// Garmin Training Center (`TrainingCenterDatabase/Activities/Activity/Lap/Track/Trackpoint`)
    Tcx,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Gpx => write!(f, "GPX"),
            Dialect::Tcx => write!(f, "TCX"),
        }
    }
}

/// Failure to turn raw bytes into a [`ParsedActivity`](crate::parser::ParsedActivity).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// Neither the GPX `trk` marker nor the TCX `Activities` marker is present.
    #[error("document is neither a GPX track nor a TCX activity file")]
    UnrecognizedFormat,

    /// The document does not conform to its dialect's structure.
    #[error("{dialect} document failed structural validation: {message}")]
    SchemaInvalid { dialect: Dialect, message: String },

    /// The document is valid but holds no positioned trackpoints at all.
    #[error("activity not imported: document contains no coordinates")]
    NoCoordinates,
}

impl ParseError {
    pub(crate) fn schema(dialect: Dialect, message: impl Into<String>) -> Self {
        ParseError::SchemaInvalid {
            dialect,
            message: message.into(),
        }
    }
}

/// A required activity field violates its domain constraint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {constraint}")]
pub struct ValidationError {
    pub field: &'static str,
    pub constraint: String,
}

impl ValidationError {
    pub(crate) fn new(field: &'static str, constraint: impl Into<String>) -> Self {
        Self {
            field,
            constraint: constraint.into(),
        }
    }
}

/// Any failure reported by the storage collaborator.
#[derive(Debug, Error)]
#[error("persistence error: {cause}")]
pub struct PersistenceError {
    #[source]
    pub cause: Box<dyn std::error::Error + Send + Sync>,
}

impl PersistenceError {
    pub fn new(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self {
            cause: cause.into(),
        }
    }
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(err: rusqlite::Error) -> Self {
        Self::new(err)
    }
}

/// Error returned by [`Importer::import`](crate::importer::Importer::import).
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Result type alias for import operations.
pub type Result<T> = std::result::Result<T, ImportError>;

/// Failure reported by an external track renderer.
#[derive(Debug, Error)]
#[error("render failed: {0}")]
pub struct RenderError(pub String);

/// Error returned by [`export_activity`](crate::export::export_activity).
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("activity {0} not found")]
    NotFound(ActivityId),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Failure reported by a remote activity service.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote request failed: {message}")]
    Request { message: String },

    #[error("malformed remote response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Export(#[from] ExportError),
}
