//! Rolling query statistics: counts, cache hits, timing history, and pattern frequency.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Timing samples kept for windowed queries; aggregates stay exact beyond this.
pub const MAX_TIMING_HISTORY: usize = 1000;

/// Duration booked for a cache hit so the time series stays aligned with the
/// timestamp series. Never added to the total query time.
pub const CACHE_HIT_NOMINAL_SECS: f64 = 0.001;

/// Current wall-clock time as fractional seconds since UNIX epoch.
pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Serialize a JSON value with object keys sorted at every level.
///
/// Two patterns that differ only in key order produce the same string.
pub fn canonical_json(value: &Value) -> String {
    fn canonicalize(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut sorted = serde_json::Map::new();
                for key in keys {
                    sorted.insert(key.clone(), canonicalize(&map[key]));
                }
                Value::Object(sorted)
            }
            Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
            other => other.clone(),
        }
    }
    canonicalize(value).to_string()
}

/// A pattern and how often it was seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternCount {
    pub pattern: Value,
    pub count: u64,
}

/// Snapshot of query performance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub query_count: u64,
    pub cache_hits: u64,
    pub cache_hit_rate: f64,
    pub total_query_time: f64,
    pub avg_query_time: f64,
    pub min_query_time: f64,
    pub max_query_time: f64,
    pub median_query_time: f64,
    pub common_patterns: Vec<PatternCount>,
}

/// Counters and bounded histories for served queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryStats {
    query_count: u64,
    cache_hits: u64,
    total_query_time: f64,
    query_times: VecDeque<f64>,
    query_timestamps: VecDeque<f64>,
    /// Canonical key → (representative pattern, count).
    patterns: HashMap<String, PatternCount>,
}

impl QueryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query_count(&self) -> u64 {
        self.query_count
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits
    }

    pub fn total_query_time(&self) -> f64 {
        self.total_query_time
    }

    /// Average over every served query, hits included. Zero before the first query.
    pub fn avg_query_time(&self) -> f64 {
        if self.query_count == 0 {
            return 0.0;
        }
        self.total_query_time / self.query_count as f64
    }

    pub fn cache_hit_rate(&self) -> f64 {
        if self.query_count == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / self.query_count as f64
    }

    /// Record an executed query's wall time.
    pub fn record_query_time(&mut self, seconds: f64) {
        self.record_query_time_at(seconds, now_secs());
    }

    pub fn record_query_time_at(&mut self, seconds: f64, timestamp: f64) {
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        self.query_count += 1;
        self.total_query_time += seconds;
        self.push_timing(seconds, timestamp);
    }

    /// Record a query served from cache.
    pub fn record_cache_hit(&mut self) {
        self.record_cache_hit_at(now_secs());
    }

    pub fn record_cache_hit_at(&mut self, timestamp: f64) {
        self.query_count += 1;
        self.cache_hits += 1;
        self.push_timing(CACHE_HIT_NOMINAL_SECS, timestamp);
    }

    fn push_timing(&mut self, seconds: f64, timestamp: f64) {
        self.query_times.push_back(seconds);
        self.query_timestamps.push_back(timestamp);
        while self.query_times.len() > MAX_TIMING_HISTORY {
            self.query_times.pop_front();
            self.query_timestamps.pop_front();
        }
    }

    /// Count one occurrence of a query pattern.
    pub fn record_query_pattern(&mut self, pattern: &Value) {
        let key = canonical_json(pattern);
        self.patterns
            .entry(key)
            .and_modify(|p| p.count += 1)
            .or_insert_with(|| PatternCount {
                pattern: pattern.clone(),
                count: 1,
            });
    }

    /// The `n` most frequent patterns, most frequent first.
    pub fn get_common_patterns(&self, n: usize) -> Vec<PatternCount> {
        let mut entries: Vec<(&String, &PatternCount)> = self.patterns.iter().collect();
        entries.sort_by(|a, b| b.1.count.cmp(&a.1.count).then_with(|| a.0.cmp(b.0)));
        entries.into_iter().take(n).map(|(_, p)| p.clone()).collect()
    }

    /// Query times recorded within the last `window_seconds`.
    pub fn get_recent_query_times(&self, window_seconds: f64) -> Vec<f64> {
        self.get_recent_query_times_at(window_seconds, now_secs())
    }

    pub fn get_recent_query_times_at(&self, window_seconds: f64, now: f64) -> Vec<f64> {
        let cutoff = now - window_seconds;
        self.query_timestamps
            .iter()
            .zip(self.query_times.iter())
            .filter(|&(&ts, _)| ts >= cutoff)
            .map(|(_, &t)| t)
            .collect()
    }

    pub fn get_performance_summary(&self) -> PerformanceSummary {
        let mut times: Vec<f64> = self.query_times.iter().copied().collect();
        times.sort_by(|a, b| a.total_cmp(b));
        let (min, max, median) = if times.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let mid = times.len() / 2;
            let median = if times.len() % 2 == 0 {
                (times[mid - 1] + times[mid]) / 2.0
            } else {
                times[mid]
            };
            (times[0], times[times.len() - 1], median)
        };
        PerformanceSummary {
            query_count: self.query_count,
            cache_hits: self.cache_hits,
            cache_hit_rate: self.cache_hit_rate(),
            total_query_time: self.total_query_time,
            avg_query_time: self.avg_query_time(),
            min_query_time: min,
            max_query_time: max,
            median_query_time: median,
            common_patterns: self.get_common_patterns(5),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
