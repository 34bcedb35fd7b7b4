//! Import configuration.

use serde::{Deserialize, Serialize};

use crate::FilterLevel;

/// Configuration for the import pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Reduced point sets written per segment, one per level.
    /// Default: all levels
    pub filter_levels: Vec<FilterLevel>,

    /// Longest accepted activity name, in characters.
    /// Default: 255
    pub max_name_length: usize,

    /// Point budget of the ride summary preview.
    /// Default: 100
    pub preview_points: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            filter_levels: FilterLevel::ALL.to_vec(),
            max_name_length: 255,
            preview_points: 100,
        }
    }
}

impl ImportConfig {
    /// Load a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Filter levels with duplicates removed, in ascending resolution.
    pub fn levels(&self) -> Vec<FilterLevel> {
        let mut levels = self.filter_levels.clone();
        levels.sort_unstable();
        levels.dedup();
        levels
    }
}
