//! Learning-state snapshots (`learning_state.json`).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::learning::LearningState;
use crate::optimizer::LearnedDefaults;
use crate::traversal_stats::TraversalStats;

pub type StateResult<T> = std::result::Result<T, StateError>;

/// Conventional snapshot file name inside a state directory.
pub const LEARNING_STATE_FILE: &str = "learning_state.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningSnapshot {
    pub learning_enabled: bool,
    pub learning_cycle: u64,
    /// Graph type → defaults currently used by its optimizer.
    #[serde(default)]
    pub learning_parameters: BTreeMap<String, LearnedDefaults>,
    #[serde(default)]
    pub traversal_stats: TraversalStats,
    #[serde(default)]
    pub entity_importance_cache: BTreeMap<String, f64>,
    /// Breaker, rules, and learning history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_state: Option<LearningState>,
    /// RFC 3339 creation time.
    pub timestamp: String,
}

impl LearningSnapshot {
    pub fn save(&self, path: &Path) -> StateResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StateError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| StateError::Encode {
            message: e.to_string(),
        })?;
        std::fs::write(path, json).map_err(|source| StateError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(path = %path.display(), "learning state saved");
        Ok(())
    }

    pub fn load(path: &Path) -> StateResult<Self> {
        let data = std::fs::read_to_string(path).map_err(|source| StateError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let snapshot: Self = serde_json::from_str(&data).map_err(|e| StateError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        tracing::info!(path = %path.display(), timestamp = %snapshot.timestamp, "learning state loaded");
        Ok(snapshot)
    }
}
