//! Optimizer configuration, persisted as TOML.
//!
//! Every field carries a serde default so partial config files stay valid as
//! the optimizer grows new knobs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::budget::BudgetDefaults;
use crate::error::ConfigError;
use crate::math::VectorMathKind;

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Tunables for the unified optimizer and its collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Whether query results are cached at all.
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    /// Seconds a cached result stays valid.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: f64,
    /// Maximum number of cached results per specialized optimizer.
    #[serde(default = "default_cache_size_limit")]
    pub cache_size_limit: usize,
    /// Numeric arrays longer than this are summarized before caching or export.
    #[serde(default = "default_array_threshold")]
    pub cache_array_threshold: usize,
    /// Directory receiving one JSON file per completed query. `None` disables it.
    #[serde(default)]
    pub metrics_dir: Option<PathBuf>,
    /// Completed query records kept in memory.
    #[serde(default = "default_metrics_max_history")]
    pub metrics_max_history: usize,
    /// Sample process memory/CPU while tracking queries.
    #[serde(default = "default_true")]
    pub track_resources: bool,
    /// Whether the statistical learning loop runs.
    #[serde(default)]
    pub learning_enabled: bool,
    /// Queries between two learning cycles.
    #[serde(default = "default_learning_cycle")]
    pub learning_cycle: u64,
    /// Failure weight at which the learning circuit breaker trips.
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: f64,
    /// Vector math backend used for digests and similarity.
    #[serde(default)]
    pub vector_math: VectorMathKind,
    /// Upper clamp for `traversal.max_depth`.
    #[serde(default = "default_max_traversal_depth")]
    pub max_traversal_depth: usize,
    /// Upper clamp for `max_vector_results`.
    #[serde(default = "default_max_vector_results_limit")]
    pub max_vector_results_limit: usize,
    /// Static per-resource budget defaults (kept last: TOML tables follow plain keys).
    #[serde(default)]
    pub budget: BudgetDefaults,
}

fn default_true() -> bool {
    true
}
fn default_cache_ttl_secs() -> f64 {
    300.0
}
fn default_cache_size_limit() -> usize {
    100
}
fn default_array_threshold() -> usize {
    1000
}
fn default_metrics_max_history() -> usize {
    1000
}
fn default_learning_cycle() -> u64 {
    50
}
fn default_circuit_breaker_threshold() -> f64 {
    3.0
}
fn default_max_traversal_depth() -> usize {
    10
}
fn default_max_vector_results_limit() -> usize {
    100
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_size_limit: default_cache_size_limit(),
            cache_array_threshold: default_array_threshold(),
            metrics_dir: None,
            metrics_max_history: default_metrics_max_history(),
            track_resources: true,
            learning_enabled: false,
            learning_cycle: default_learning_cycle(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            vector_math: VectorMathKind::default(),
            max_traversal_depth: default_max_traversal_depth(),
            max_vector_results_limit: default_max_vector_results_limit(),
            budget: BudgetDefaults::default(),
        }
    }
}

impl OptimizerConfig {
    /// Check invariants that serde defaults cannot express.
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.cache_ttl_secs.is_finite() && self.cache_ttl_secs > 0.0) {
            return Err(ConfigError::Invalid {
                message: format!("cache_ttl_secs must be > 0, got {}", self.cache_ttl_secs),
            });
        }
        if self.cache_size_limit == 0 {
            return Err(ConfigError::Invalid {
                message: "cache_size_limit must be > 0".into(),
            });
        }
        if self.learning_cycle == 0 {
            return Err(ConfigError::Invalid {
                message: "learning_cycle must be > 0".into(),
            });
        }
        if !(self.circuit_breaker_threshold.is_finite() && self.circuit_breaker_threshold > 0.0) {
            return Err(ConfigError::Invalid {
                message: "circuit_breaker_threshold must be > 0".into(),
            });
        }
        if self.max_traversal_depth == 0 || self.max_vector_results_limit == 0 {
            return Err(ConfigError::Invalid {
                message: "traversal depth and vector result limits must be > 0".into(),
            });
        }
        self.budget.validate().map_err(|message| ConfigError::Invalid { message })
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = OptimizerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_size_limit, 100);
        assert_eq!(config.max_traversal_depth, 10);
        assert!(!config.learning_enabled);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: OptimizerConfig = toml::from_str("cache_ttl_secs = 60.0\nlearning_enabled = true\n").unwrap();
        assert_eq!(config.cache_ttl_secs, 60.0);
        assert!(config.learning_enabled);
        assert_eq!(config.learning_cycle, 50);
        assert_eq!(config.budget, BudgetDefaults::default());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let config = OptimizerConfig {
            cache_size_limit: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("optimizer.toml");
        let config = OptimizerConfig {
            cache_ttl_secs: 42.0,
            metrics_dir: Some(dir.path().join("metrics")),
            ..Default::default()
        };
        config.save(&path).unwrap();
        let loaded = OptimizerConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn load_rejects_malformed_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "cache_ttl_secs = [").unwrap();
        assert!(matches!(
            OptimizerConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
