//! Health snapshot and aggregated performance report over the metrics history.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::math::{VectorMath, scalar::ScalarMath};

use super::QueryMetricsCollector;

/// Error rate at or above which the collector reports `degraded`.
pub const DEGRADED_ERROR_RATE: f64 = 0.20;
/// Phases averaging longer than this (seconds) get an optimization recommendation.
pub const SLOW_PHASE_SECS: f64 = 0.5;
/// Average peak memory above this (bytes) gets a memory recommendation.
pub const HIGH_MEMORY_BYTES: f64 = 500.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub memory_usage_bytes: u64,
    pub last_session_duration_seconds: f64,
    pub error_rate_last_100: f64,
    pub evaluated_sessions: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DurationStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PhaseStats {
    pub avg_duration: f64,
    pub total_duration: f64,
    pub calls: u64,
    /// Queries in which the phase appeared.
    pub occurrences: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub query_count: usize,
    pub success_rate: f64,
    pub durations: DurationStats,
    pub avg_peak_memory_bytes: f64,
    pub avg_results: f64,
    pub avg_quality: f64,
    pub phases: BTreeMap<String, PhaseStats>,
    pub recommendations: Vec<String>,
}

impl QueryMetricsCollector {
    /// Health over the last `window` completed queries.
    pub fn get_health_check(&mut self, window: usize) -> HealthCheck {
        let window = window.max(1);
        let recent: Vec<_> = self.history.iter().rev().take(window).collect();
        let evaluated = recent.len();
        let errors = recent.iter().filter(|r| !r.success).count();
        let error_rate = if evaluated == 0 {
            0.0
        } else {
            errors as f64 / evaluated as f64
        };
        let last_duration = self
            .history
            .back()
            .and_then(|r| r.duration)
            .unwrap_or(0.0);

        HealthCheck {
            status: if error_rate >= DEGRADED_ERROR_RATE {
                HealthStatus::Degraded
            } else {
                HealthStatus::Ok
            },
            memory_usage_bytes: self.current_memory_bytes(),
            last_session_duration_seconds: last_duration,
            error_rate_last_100: error_rate,
            evaluated_sessions: evaluated,
        }
    }

    /// Aggregate durations, memory, and phases across the history and derive
    /// recommendations.
    pub fn generate_performance_report(&self) -> PerformanceReport {
        if self.history.is_empty() {
            return PerformanceReport::default();
        }
        let math = ScalarMath;
        let n = self.history.len();

        let durations: Vec<f64> = self.history.iter().filter_map(|r| r.duration).collect();
        let (min, max) = math.min_max(&durations);
        let duration_stats = DurationStats {
            avg: math.mean(&durations),
            min,
            max,
            std_dev: math.std_dev(&durations),
        };

        let peaks: Vec<f64> = self
            .history
            .iter()
            .map(|r| r.resources.peak_memory_bytes as f64)
            .collect();
        let avg_peak = math.mean(&peaks);

        let mut phases: BTreeMap<String, PhaseStats> = BTreeMap::new();
        for record in &self.history {
            for (path, timing) in &record.phases {
                let entry = phases.entry(path.clone()).or_default();
                entry.total_duration += timing.duration;
                entry.calls += timing.count;
                entry.occurrences += 1;
            }
        }
        for stats in phases.values_mut() {
            stats.avg_duration = stats.total_duration / stats.occurrences.max(1) as f64;
        }

        let mut recommendations = Vec::new();
        for (path, stats) in &phases {
            if stats.avg_duration > SLOW_PHASE_SECS {
                recommendations.push(format!(
                    "optimize phase {path} (avg {:.2}s)",
                    stats.avg_duration
                ));
            }
        }
        if duration_stats.avg > 0.0 && duration_stats.std_dev > 0.5 * duration_stats.avg {
            recommendations.push(format!(
                "high variability in query duration (std {:.3}s vs mean {:.3}s); consider caching or tighter budgets",
                duration_stats.std_dev, duration_stats.avg
            ));
        }
        if avg_peak > HIGH_MEMORY_BYTES {
            recommendations.push(format!(
                "high memory usage: avg peak {:.0} MB; reduce vector result counts or traversal breadth",
                avg_peak / (1024.0 * 1024.0)
            ));
        }

        let successes = self.history.iter().filter(|r| r.success).count();
        PerformanceReport {
            query_count: n,
            success_rate: successes as f64 / n as f64,
            durations: duration_stats,
            avg_peak_memory_bytes: avg_peak,
            avg_results: self.history.iter().map(|r| r.results.count as f64).sum::<f64>() / n as f64,
            avg_quality: self.history.iter().map(|r| r.results.quality_score).sum::<f64>() / n as f64,
            phases,
            recommendations,
        }
    }
}
