//! Per-query metrics: hierarchical phase timers, resource samples, and outcomes.
//!
//! - **QueryMetricsCollector**: owns the active record and a bounded history
//! - **PhaseGuard**: scoped phase timer; the phase ends on every exit path
//! - **Reports** (`report`): health snapshot and aggregated performance report
//! - **Export** (`export`): JSON/CSV export that sanitizes awkward values
//!
//! Nested phases are recorded under dotted paths built from the active-timer
//! stack (`execute.vector_search`). Re-entering a phase accumulates its duration
//! and bumps its call counter.

pub mod export;
pub mod report;

use std::collections::{BTreeMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MetricsError;
use crate::probe::{ResourceProbe, ResourceSample, select_probe};
use crate::stats::now_secs;

pub use report::{HealthCheck, HealthStatus, PerformanceReport};

/// Error message on a record closed because another query started.
pub const SUPERSEDED_MESSAGE: &str = "superseded by a new query";

pub type MetricsResult<T> = std::result::Result<T, MetricsError>;

/// Timing and call count for one phase path.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub count: u64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Resource observations taken during one query.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub initial_memory_bytes: u64,
    pub peak_memory_bytes: u64,
    pub memory_samples: Vec<(f64, u64)>,
    pub cpu_samples: Vec<(f64, f32)>,
}

/// Result summary attached on completion.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultSummary {
    pub count: usize,
    pub quality_score: f64,
}

/// A named auxiliary measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdditionalMetric {
    pub name: String,
    pub value: Value,
    pub category: String,
    pub timestamp: f64,
}

/// Everything measured about one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMetricsRecord {
    pub query_id: String,
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub duration: Option<f64>,
    #[serde(default)]
    pub params: Value,
    pub phases: BTreeMap<String, PhaseTiming>,
    pub resources: ResourceUsage,
    pub results: ResultSummary,
    pub success: bool,
    pub error_message: Option<String>,
    #[serde(default)]
    pub metrics: Vec<AdditionalMetric>,
}

impl QueryMetricsRecord {
    fn new(query_id: String, params: Value, start_time: f64) -> Self {
        Self {
            query_id,
            start_time,
            end_time: None,
            duration: None,
            params,
            phases: BTreeMap::new(),
            resources: ResourceUsage::default(),
            results: ResultSummary::default(),
            success: false,
            error_message: None,
            metrics: Vec::new(),
        }
    }
}

/// Receives each completed record. The visualizer and other sinks attach here.
pub trait MetricsSink: Send {
    fn on_query_completed(&mut self, record: &QueryMetricsRecord);
}

#[derive(Debug)]
struct ActiveTimer {
    name: String,
    path: String,
    started: Instant,
    start_time: f64,
    metadata: Map<String, Value>,
}

/// Collects per-query metrics into a bounded history.
pub struct QueryMetricsCollector {
    max_history: usize,
    metrics_dir: Option<PathBuf>,
    array_threshold: usize,
    probe: Box<dyn ResourceProbe>,
    sinks: Vec<Box<dyn MetricsSink>>,
    history: VecDeque<QueryMetricsRecord>,
    current: Option<QueryMetricsRecord>,
    current_started: Option<Instant>,
    active_timers: Vec<ActiveTimer>,
    session_metrics: Vec<AdditionalMetric>,
}

impl std::fmt::Debug for QueryMetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryMetricsCollector")
            .field("history", &self.history.len())
            .field("active", &self.current.as_ref().map(|r| r.query_id.as_str()))
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl Default for QueryMetricsCollector {
    fn default() -> Self {
        Self::new(1000, None, true)
    }
}

impl QueryMetricsCollector {
    pub fn new(max_history: usize, metrics_dir: Option<PathBuf>, track_resources: bool) -> Self {
        Self::with_probe(max_history, metrics_dir, select_probe(track_resources))
    }

    pub fn with_probe(
        max_history: usize,
        metrics_dir: Option<PathBuf>,
        probe: Box<dyn ResourceProbe>,
    ) -> Self {
        if let Some(dir) = &metrics_dir {
            if let Err(e) = std::fs::create_dir_all(dir) {
                tracing::warn!(dir = %dir.display(), error = %e, "cannot create metrics directory");
            }
        }
        Self {
            max_history: max_history.max(1),
            metrics_dir,
            array_threshold: 1000,
            probe,
            sinks: Vec::new(),
            history: VecDeque::new(),
            current: None,
            current_started: None,
            active_timers: Vec::new(),
            session_metrics: Vec::new(),
        }
    }

    /// Arrays longer than this are summarized in exports.
    pub fn set_array_threshold(&mut self, threshold: usize) {
        self.array_threshold = threshold.max(1);
    }

    pub fn add_sink(&mut self, sink: Box<dyn MetricsSink>) {
        self.sinks.push(sink);
    }

    pub fn history(&self) -> impl Iterator<Item = &QueryMetricsRecord> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn current_query_id(&self) -> Option<&str> {
        self.current.as_ref().map(|r| r.query_id.as_str())
    }

    pub fn session_metrics(&self) -> &[AdditionalMetric] {
        &self.session_metrics
    }

    /// Begin tracking a query. A previous unfinished record is closed as failed.
    pub fn start_query_tracking(&mut self, query_id: Option<String>, params: Option<Value>) -> String {
        if self.current.is_some() {
            tracing::debug!("starting a new query while another is active; closing it as failed");
            if let Err(e) = self.end_query_tracking(0, 0.0, Some(SUPERSEDED_MESSAGE.into())) {
                tracing::warn!(error = %e, "failed to close superseded query record");
            }
        }

        let query_id = query_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let params = params
            .map(|p| export::sanitize_value(&p, self.array_threshold))
            .unwrap_or(Value::Null);
        let mut record = QueryMetricsRecord::new(query_id.clone(), params, now_secs());
        if let Some(sample) = self.probe.sample() {
            record.resources.initial_memory_bytes = sample.memory_bytes;
            push_sample(&mut record.resources, sample);
        }
        self.current = Some(record);
        self.current_started = Some(Instant::now());
        self.active_timers.clear();
        query_id
    }

    /// Close the active record and move it into history.
    pub fn end_query_tracking(
        &mut self,
        results_count: usize,
        quality_score: f64,
        error: Option<String>,
    ) -> MetricsResult<QueryMetricsRecord> {
        // Close any phases left open by early returns.
        while let Some(timer) = self.active_timers.last() {
            let name = timer.name.clone();
            self.end_phase_timer(&name);
        }

        self.record_resource_usage();
        let mut record = self.current.take().ok_or(MetricsError::NoActiveQuery)?;
        let elapsed = self
            .current_started
            .take()
            .map(|s| s.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        record.end_time = Some(record.start_time + elapsed);
        record.duration = Some(elapsed);
        record.results = ResultSummary {
            count: results_count,
            quality_score: if quality_score.is_finite() { quality_score } else { 0.0 },
        };
        record.success = error.is_none();
        record.error_message = error;

        self.history.push_back(record.clone());
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }

        if let Some(dir) = &self.metrics_dir {
            if let Err(e) = export::persist_record(dir, &record, self.array_threshold) {
                tracing::warn!(query_id = %record.query_id, error = %e, "failed to persist query metrics");
            }
        }
        for sink in &mut self.sinks {
            sink.on_query_completed(&record);
        }
        Ok(record)
    }

    /// Start a phase timer nested under the currently active ones.
    pub fn start_phase_timer(&mut self, name: &str, metadata: Option<Map<String, Value>>) {
        let path = match self.active_timers.last() {
            Some(parent) => format!("{}.{}", parent.path, name),
            None => name.to_string(),
        };
        self.active_timers.push(ActiveTimer {
            name: name.to_string(),
            path,
            started: Instant::now(),
            start_time: now_secs(),
            metadata: metadata.unwrap_or_default(),
        });
    }

    /// End the innermost active phase called `name`, returning its duration.
    ///
    /// Phases opened after it are closed first so the stack stays consistent.
    pub fn end_phase_timer(&mut self, name: &str) -> Option<f64> {
        let position = self.active_timers.iter().rposition(|t| t.name == name)?;
        let mut result = None;
        while self.active_timers.len() > position {
            let Some(timer) = self.active_timers.pop() else {
                break;
            };
            let duration = timer.started.elapsed().as_secs_f64();
            let end_time = timer.start_time + duration;
            if let Some(record) = &mut self.current {
                let entry = record.phases.entry(timer.path.clone()).or_insert_with(|| PhaseTiming {
                    start_time: timer.start_time,
                    ..Default::default()
                });
                entry.end_time = end_time;
                entry.duration += duration;
                entry.count += 1;
                entry.metadata.extend(timer.metadata);
            }
            result = Some(duration);
        }
        result
    }

    /// Scoped phase timer. The phase ends when the guard drops.
    ///
    /// The guard dereferences to the collector, so nested phases are opened
    /// through it: `let mut outer = c.time_phase("a", None); outer.time_phase("b", None);`
    pub fn time_phase(&mut self, name: &str, metadata: Option<Map<String, Value>>) -> PhaseGuard<'_> {
        self.start_phase_timer(name, metadata);
        PhaseGuard {
            collector: self,
            name: name.to_string(),
        }
    }

    /// Best-effort memory/CPU sample into the active record.
    ///
    /// Returns `None` when introspection is unavailable; never fails.
    pub fn record_resource_usage(&mut self) -> Option<ResourceSample> {
        let sample = self.probe.sample()?;
        if let Some(record) = &mut self.current {
            push_sample(&mut record.resources, sample);
        }
        Some(sample)
    }

    /// Attach an auxiliary measurement to the active record, or to the session.
    pub fn record_additional_metric(&mut self, name: &str, value: Value, category: &str) {
        let metric = AdditionalMetric {
            name: name.to_string(),
            value: export::sanitize_value(&value, self.array_threshold),
            category: category.to_string(),
            timestamp: now_secs(),
        };
        match &mut self.current {
            Some(record) => record.metrics.push(metric),
            None => {
                self.session_metrics.push(metric);
                if self.session_metrics.len() > self.max_history {
                    self.session_metrics.remove(0);
                }
            }
        }
    }

    /// Current process memory, zero when unavailable.
    pub fn current_memory_bytes(&mut self) -> u64 {
        self.probe.sample().map_or(0, |s| s.memory_bytes)
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.current = None;
        self.current_started = None;
        self.active_timers.clear();
        self.session_metrics.clear();
    }
}

fn push_sample(resources: &mut ResourceUsage, sample: ResourceSample) {
    resources.peak_memory_bytes = resources.peak_memory_bytes.max(sample.memory_bytes);
    resources.memory_samples.push((sample.timestamp, sample.memory_bytes));
    resources.cpu_samples.push((sample.timestamp, sample.cpu_percent));
}

/// Scoped phase timer returned by [`QueryMetricsCollector::time_phase`].
pub struct PhaseGuard<'a> {
    collector: &'a mut QueryMetricsCollector,
    name: String,
}

impl Deref for PhaseGuard<'_> {
    type Target = QueryMetricsCollector;

    fn deref(&self) -> &Self::Target {
        self.collector
    }
}

impl DerefMut for PhaseGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.collector
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.collector.end_phase_timer(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::probe::NoopProbe;

    fn collector() -> QueryMetricsCollector {
        QueryMetricsCollector::with_probe(10, None, Box::new(NoopProbe))
    }

    #[test]
    fn nested_phases_build_dotted_paths() {
        let mut c = collector();
        c.start_query_tracking(Some("q1".into()), None);
        {
            let mut outer = c.time_phase("execute", None);
            {
                let _inner = outer.time_phase("vector_search", None);
            }
            let _ranking = outer.time_phase("ranking", None);
        }
        let record = c.end_query_tracking(3, 0.9, None).unwrap();
        assert!(record.phases.contains_key("execute"));
        assert!(record.phases.contains_key("execute.vector_search"));
        assert!(record.phases.contains_key("execute.ranking"));
        assert!(record.success);
        assert_eq!(record.results.count, 3);
    }

    #[test]
    fn repeated_phases_accumulate() {
        let mut c = collector();
        c.start_query_tracking(None, None);
        for _ in 0..3 {
            let _g = c.time_phase("lookup", None);
        }
        let record = c.end_query_tracking(0, 0.0, None).unwrap();
        assert_eq!(record.phases["lookup"].count, 3);
    }

    #[test]
    fn guard_ends_phase_on_early_return() {
        fn fallible(c: &mut QueryMetricsCollector) -> Result<(), &'static str> {
            let _g = c.time_phase("risky", None);
            Err("boom")
        }
        let mut c = collector();
        c.start_query_tracking(None, None);
        assert!(fallible(&mut c).is_err());
        assert!(c.active_timers.is_empty());
        let record = c.end_query_tracking(0, 0.0, Some("boom".into())).unwrap();
        assert_eq!(record.phases["risky"].count, 1);
        assert!(!record.success);
        assert_eq!(record.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn ending_outer_phase_closes_inner_ones() {
        let mut c = collector();
        c.start_query_tracking(None, None);
        c.start_phase_timer("a", None);
        c.start_phase_timer("b", None);
        assert!(c.end_phase_timer("a").is_some());
        assert!(c.end_phase_timer("missing").is_none());
        let record = c.end_query_tracking(0, 0.0, None).unwrap();
        assert!(record.phases.contains_key("a.b"));
    }

    #[test]
    fn history_is_bounded() {
        let mut c = collector();
        for _ in 0..15 {
            c.start_query_tracking(None, None);
            c.end_query_tracking(1, 1.0, None).unwrap();
        }
        assert_eq!(c.history_len(), 10);
    }

    #[test]
    fn end_without_start_errors() {
        let mut c = collector();
        assert!(matches!(
            c.end_query_tracking(0, 0.0, None),
            Err(MetricsError::NoActiveQuery)
        ));
    }

    #[test]
    fn resource_usage_without_probe_is_none() {
        let mut c = collector();
        c.start_query_tracking(None, None);
        assert!(c.record_resource_usage().is_none());
        assert_eq!(c.current_memory_bytes(), 0);
    }

    #[test]
    fn additional_metrics_attach_to_active_record_or_session() {
        let mut c = collector();
        c.record_additional_metric("warmup", Value::from(1), "session");
        c.start_query_tracking(None, None);
        c.record_additional_metric("hits", Value::from(4), "cache");
        let record = c.end_query_tracking(0, 0.0, None).unwrap();
        assert_eq!(record.metrics.len(), 1);
        assert_eq!(c.session_metrics().len(), 1);
    }

    struct CountingSink(Arc<Mutex<usize>>);

    impl MetricsSink for CountingSink {
        fn on_query_completed(&mut self, _record: &QueryMetricsRecord) {
            if let Ok(mut n) = self.0.lock() {
                *n += 1;
            }
        }
    }

    #[test]
    fn superseded_record_is_closed_as_failed_even_when_persisting_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        // A plain file where the metrics directory should be makes every write fail.
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"").unwrap();
        let mut c = QueryMetricsCollector::with_probe(10, Some(blocked), Box::new(NoopProbe));

        c.start_query_tracking(Some("first".into()), None);
        c.start_query_tracking(Some("second".into()), None);
        assert_eq!(c.current_query_id(), Some("second"));
        let first = c.history().next().unwrap();
        assert_eq!(first.query_id, "first");
        assert!(!first.success);
        assert_eq!(first.error_message.as_deref(), Some(SUPERSEDED_MESSAGE));
    }

    #[test]
    fn sinks_see_completed_records() {
        let seen = Arc::new(Mutex::new(0));
        let mut c = collector();
        c.add_sink(Box::new(CountingSink(Arc::clone(&seen))));
        c.start_query_tracking(None, None);
        c.end_query_tracking(0, 0.0, None).unwrap();
        assert_eq!(*seen.lock().unwrap(), 1);
    }
}
