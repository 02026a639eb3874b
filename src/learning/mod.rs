//! Statistical learning loop guarded by a circuit breaker.
//!
//! The loop runs against any [`LearningHost`]: a narrow view of the optimizer
//! exposing its learning state, query counter, traversal statistics, and the
//! analysis entry point. States:
//!
//! ```text
//!   Disabled ──enable──> Enabled ──cycle due──> Learning ──ok──> Enabled
//!                           ^                       │
//!                           │                    failure ≥ threshold
//!                           │                       v
//!                           └──retry deadline── CircuitOpen
//! ```
//!
//! Nothing in here returns an error to the caller of a normal query: learning
//! failures are counted, logged, and recorded as metrics.

pub mod analysis;

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::LearningError;
use crate::metrics::QueryMetricsCollector;
use crate::stats::now_secs;
use crate::traversal_stats::TraversalStats;

pub use analysis::{QueryPerformanceRecord, analyze_performance};

pub type LearningResult<T> = std::result::Result<T, LearningError>;

/// Learning outcomes kept in [`LearningState::history`].
pub const MAX_LEARNING_HISTORY: usize = 50;
/// Rules kept in [`LearningState::rules`].
pub const MAX_LEARNING_RULES: usize = 100;
/// Relation statistics need this many samples to update usefulness.
pub const MIN_RELATION_SAMPLES: u64 = 5;
/// Rules at or below this confidence are discarded.
pub const RULE_CONFIDENCE_THRESHOLD: f64 = 0.7;
pub const BASE_BACKOFF_MINUTES: f64 = 5.0;
pub const MAX_BACKOFF_MINUTES: f64 = 60.0;
/// Failure weight of a critical failure; non-critical failures weigh a quarter.
pub const CRITICAL_FAILURE_WEIGHT: f64 = 1.0;
pub const MINOR_FAILURE_WEIGHT: f64 = 0.25;

// ---------------------------------------------------------------------------
// Learning results
// ---------------------------------------------------------------------------

/// New defaults proposed by a learning cycle. `None` leaves a value unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterAdjustments {
    pub max_traversal_depth: Option<usize>,
    pub max_vector_results: Option<usize>,
    pub min_similarity: Option<f64>,
}

impl ParameterAdjustments {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelationStat {
    pub usefulness: f64,
    pub sample_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningRule {
    pub pattern: String,
    pub action: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningOutcome {
    pub analyzed_queries: u64,
    pub parameter_adjustments: ParameterAdjustments,
    pub relation_stats: BTreeMap<String, RelationStat>,
    pub rules: Vec<LearningRule>,
    pub timestamp: f64,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningState {
    pub enabled: bool,
    /// Queries between two learning cycles.
    pub learning_cycle: u64,
    /// Weighted failure count since the last success.
    pub failure_count: f64,
    pub circuit_breaker_tripped: bool,
    /// Epoch seconds after which the breaker closes again.
    pub circuit_breaker_retry_time: Option<f64>,
    /// Query count at the last learning attempt.
    pub last_learning_query_count: u64,
    pub circuit_breaker_threshold: f64,
    pub last_backoff_minutes: Option<f64>,
    pub last_failure_message: Option<String>,
    pub cycles_completed: u64,
    #[serde(default)]
    pub rules: VecDeque<LearningRule>,
    #[serde(default)]
    pub history: VecDeque<LearningOutcome>,
}

impl LearningState {
    pub fn new(enabled: bool, learning_cycle: u64, circuit_breaker_threshold: f64) -> Self {
        Self {
            enabled,
            learning_cycle: learning_cycle.max(1),
            failure_count: 0.0,
            circuit_breaker_tripped: false,
            circuit_breaker_retry_time: None,
            last_learning_query_count: 0,
            circuit_breaker_threshold,
            last_backoff_minutes: None,
            last_failure_message: None,
            cycles_completed: 0,
            rules: VecDeque::new(),
            history: VecDeque::new(),
        }
    }

    /// Turn learning on or off and set the cycle length.
    pub fn enable(&mut self, enabled: bool, learning_cycle: u64) {
        self.enabled = enabled;
        self.learning_cycle = learning_cycle.max(1);
    }

    /// Backoff for the current failure count: `min(60, 5 × 2^(count − threshold))` minutes.
    pub fn backoff_minutes(&self) -> f64 {
        let exponent = (self.failure_count - self.circuit_breaker_threshold).max(0.0);
        (BASE_BACKOFF_MINUTES * 2f64.powf(exponent)).min(MAX_BACKOFF_MINUTES)
    }

    fn close_circuit(&mut self) {
        self.failure_count = 0.0;
        self.circuit_breaker_tripped = false;
        self.circuit_breaker_retry_time = None;
    }
}

/// What [`check_learning_cycle`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Disabled,
    CircuitOpen { retry_at: f64 },
    NotDue { remaining: u64 },
    Learned { analyzed_queries: u64 },
    Failed { message: String },
}

// ---------------------------------------------------------------------------
// Host contract
// ---------------------------------------------------------------------------

/// The parts of an optimizer the learning loop reads and writes.
pub trait LearningHost {
    fn learning_state(&self) -> &LearningState;
    fn learning_state_mut(&mut self) -> &mut LearningState;
    /// Queries served so far.
    fn query_count(&self) -> u64;
    /// Analyse the last `recent_queries` queries.
    fn learn_from_query_statistics(&mut self, recent_queries: u64) -> LearningResult<LearningOutcome>;
    fn apply_parameter_adjustments(&mut self, adjustments: &ParameterAdjustments);
    fn traversal_stats_mut(&mut self) -> &mut TraversalStats;
    /// Optional metrics sink for learning events.
    fn metrics(&mut self) -> Option<&mut QueryMetricsCollector> {
        None
    }
}

// ---------------------------------------------------------------------------
// Cycle
// ---------------------------------------------------------------------------

pub fn check_learning_cycle<H: LearningHost + ?Sized>(host: &mut H) -> CycleOutcome {
    check_learning_cycle_at(host, now_secs())
}

/// Run a learning cycle when enough queries accumulated since the last one.
///
/// An open circuit blocks learning until its retry deadline; the first check
/// after the deadline closes it and clears the failure count. The query mark
/// advances on every attempt, so a failing analysis waits a full cycle.
pub fn check_learning_cycle_at<H: LearningHost + ?Sized>(host: &mut H, now: f64) -> CycleOutcome {
    let state = host.learning_state();
    if !state.enabled {
        return CycleOutcome::Disabled;
    }
    if state.circuit_breaker_tripped {
        let retry_time = state.circuit_breaker_retry_time;
        match retry_time {
            Some(retry_at) if now < retry_at => return CycleOutcome::CircuitOpen { retry_at },
            _ => {
                host.learning_state_mut().close_circuit();
                tracing::info!("learning circuit breaker closed");
            }
        }
    }

    let query_count = host.query_count();
    let state = host.learning_state();
    let delta = query_count.saturating_sub(state.last_learning_query_count);
    if delta < state.learning_cycle {
        return CycleOutcome::NotDue {
            remaining: state.learning_cycle - delta,
        };
    }
    host.learning_state_mut().last_learning_query_count = query_count;

    tracing::info!(recent_queries = delta, "learning cycle triggered");
    match host.learn_from_query_statistics(delta) {
        Ok(outcome) => {
            let analyzed_queries = outcome.analyzed_queries;
            apply_learning_hook(host, outcome);
            let state = host.learning_state_mut();
            state.failure_count = 0.0;
            state.cycles_completed += 1;
            CycleOutcome::Learned { analyzed_queries }
        }
        Err(e) => {
            let critical = !matches!(e, LearningError::InsufficientData { .. });
            let message = e.to_string();
            increment_failure_counter_at(host, &message, critical, now);
            CycleOutcome::Failed { message }
        }
    }
}

/// Fold a learning outcome into the host.
pub fn apply_learning_hook<H: LearningHost + ?Sized>(host: &mut H, outcome: LearningOutcome) {
    if !outcome.parameter_adjustments.is_empty() {
        host.apply_parameter_adjustments(&outcome.parameter_adjustments);
    }

    let stats = host.traversal_stats_mut();
    for (relation, stat) in &outcome.relation_stats {
        if stat.sample_size >= MIN_RELATION_SAMPLES {
            stats.update_relation_usefulness(relation, stat.usefulness);
        }
    }

    let state = host.learning_state_mut();
    for rule in outcome.rules.iter().filter(|r| r.confidence > RULE_CONFIDENCE_THRESHOLD) {
        state.rules.push_back(rule.clone());
    }
    while state.rules.len() > MAX_LEARNING_RULES {
        state.rules.pop_front();
    }

    let summary = json!({
        "analyzed_queries": outcome.analyzed_queries,
        "adjustments": outcome.parameter_adjustments,
        "relations": outcome.relation_stats.len(),
        "rules": outcome.rules.len(),
    });
    state.history.push_back(outcome);
    while state.history.len() > MAX_LEARNING_HISTORY {
        state.history.pop_front();
    }

    if let Some(metrics) = host.metrics() {
        metrics.record_additional_metric("learning_cycle", summary, "learning");
    }
}

pub fn increment_failure_counter<H: LearningHost + ?Sized>(host: &mut H, message: &str, critical: bool) {
    increment_failure_counter_at(host, message, critical, now_secs());
}

/// Count a learning failure and trip the breaker once the threshold is reached.
pub fn increment_failure_counter_at<H: LearningHost + ?Sized>(
    host: &mut H,
    message: &str,
    critical: bool,
    now: f64,
) {
    let state = host.learning_state_mut();
    state.failure_count += if critical {
        CRITICAL_FAILURE_WEIGHT
    } else {
        MINOR_FAILURE_WEIGHT
    };
    state.last_failure_message = Some(message.to_string());

    let mut tripped = None;
    if state.failure_count >= state.circuit_breaker_threshold {
        let minutes = state.backoff_minutes();
        state.circuit_breaker_tripped = true;
        state.circuit_breaker_retry_time = Some(now + minutes * 60.0);
        state.last_backoff_minutes = Some(minutes);
        tripped = Some(minutes);
        tracing::warn!(
            failures = state.failure_count,
            backoff_minutes = minutes,
            "learning circuit breaker tripped"
        );
    } else {
        tracing::debug!(failures = state.failure_count, critical, error = message, "learning failure");
    }
    let failure_count = state.failure_count;

    if let Some(metrics) = host.metrics() {
        metrics.record_additional_metric(
            "learning_failure",
            json!({
                "message": message,
                "critical": critical,
                "failure_count": failure_count,
                "backoff_minutes": tripped,
            }),
            "learning",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal host with a scripted analysis result.
    struct TestHost {
        state: LearningState,
        queries: u64,
        fail: bool,
        calls: usize,
        applied: Vec<ParameterAdjustments>,
        traversal: TraversalStats,
    }

    impl TestHost {
        fn new(cycle: u64) -> Self {
            Self {
                state: LearningState::new(true, cycle, 3.0),
                queries: 0,
                fail: false,
                calls: 0,
                applied: Vec::new(),
                traversal: TraversalStats::new(),
            }
        }
    }

    fn outcome() -> LearningOutcome {
        let mut relation_stats = BTreeMap::new();
        relation_stats.insert(
            "instance_of".to_string(),
            RelationStat {
                usefulness: 0.9,
                sample_size: 5,
            },
        );
        relation_stats.insert(
            "rare".to_string(),
            RelationStat {
                usefulness: 0.9,
                sample_size: 4,
            },
        );
        LearningOutcome {
            analyzed_queries: 10,
            parameter_adjustments: ParameterAdjustments {
                max_traversal_depth: Some(3),
                ..Default::default()
            },
            relation_stats,
            rules: vec![
                LearningRule {
                    pattern: "a".into(),
                    action: "x".into(),
                    confidence: 0.9,
                },
                LearningRule {
                    pattern: "b".into(),
                    action: "x".into(),
                    confidence: 0.7,
                },
            ],
            timestamp: 0.0,
        }
    }

    impl LearningHost for TestHost {
        fn learning_state(&self) -> &LearningState {
            &self.state
        }
        fn learning_state_mut(&mut self) -> &mut LearningState {
            &mut self.state
        }
        fn query_count(&self) -> u64 {
            self.queries
        }
        fn learn_from_query_statistics(&mut self, _recent: u64) -> LearningResult<LearningOutcome> {
            self.calls += 1;
            if self.fail {
                Err(LearningError::Analysis {
                    message: "boom".into(),
                })
            } else {
                Ok(outcome())
            }
        }
        fn apply_parameter_adjustments(&mut self, adjustments: &ParameterAdjustments) {
            self.applied.push(*adjustments);
        }
        fn traversal_stats_mut(&mut self) -> &mut TraversalStats {
            &mut self.traversal
        }
    }

    #[test]
    fn disabled_state_never_learns() {
        let mut host = TestHost::new(1);
        host.state.enabled = false;
        host.queries = 100;
        assert_eq!(check_learning_cycle_at(&mut host, 0.0), CycleOutcome::Disabled);
        assert_eq!(host.calls, 0);
    }

    #[test]
    fn cycle_triggers_after_enough_queries() {
        let mut host = TestHost::new(10);
        host.queries = 9;
        assert_eq!(
            check_learning_cycle_at(&mut host, 0.0),
            CycleOutcome::NotDue { remaining: 1 }
        );
        host.queries = 10;
        assert_eq!(
            check_learning_cycle_at(&mut host, 0.0),
            CycleOutcome::Learned { analyzed_queries: 10 }
        );
        assert_eq!(host.state.last_learning_query_count, 10);
        assert_eq!(host.applied.len(), 1);
        // Only relations with enough samples and rules above 0.7 are kept.
        assert!(host.traversal.relation_score("instance_of").is_some());
        assert!(host.traversal.relation_score("rare").is_none());
        assert_eq!(host.state.rules.len(), 1);
        assert_eq!(host.state.history.len(), 1);
    }

    #[test]
    fn failed_cycle_still_advances_mark() {
        let mut host = TestHost::new(5);
        host.fail = true;
        host.queries = 5;
        assert!(matches!(
            check_learning_cycle_at(&mut host, 0.0),
            CycleOutcome::Failed { .. }
        ));
        assert_eq!(host.state.failure_count, 1.0);
        assert_eq!(host.state.last_learning_query_count, 5);
        host.queries = 6;
        assert!(matches!(
            check_learning_cycle_at(&mut host, 0.0),
            CycleOutcome::NotDue { .. }
        ));
        assert_eq!(host.calls, 1);
    }

    #[test]
    fn four_failures_back_off_ten_minutes() {
        let mut host = TestHost::new(1);
        for _ in 0..3 {
            increment_failure_counter_at(&mut host, "boom", true, 1000.0);
        }
        assert!(host.state.circuit_breaker_tripped);
        assert_eq!(host.state.last_backoff_minutes, Some(5.0));
        increment_failure_counter_at(&mut host, "boom", true, 1000.0);
        assert_eq!(host.state.last_backoff_minutes, Some(10.0));
        assert_eq!(host.state.circuit_breaker_retry_time, Some(1000.0 + 600.0));
    }

    #[test]
    fn backoff_is_capped_at_an_hour() {
        let mut host = TestHost::new(1);
        for _ in 0..10 {
            increment_failure_counter_at(&mut host, "boom", true, 0.0);
        }
        assert_eq!(host.state.last_backoff_minutes, Some(MAX_BACKOFF_MINUTES));
    }

    #[test]
    fn minor_failures_weigh_a_quarter() {
        let mut host = TestHost::new(1);
        for _ in 0..11 {
            increment_failure_counter_at(&mut host, "thin data", false, 0.0);
        }
        assert!(!host.state.circuit_breaker_tripped);
        increment_failure_counter_at(&mut host, "thin data", false, 0.0);
        assert!(host.state.circuit_breaker_tripped);
    }

    #[test]
    fn open_circuit_blocks_until_deadline_then_resets() {
        let mut host = TestHost::new(1);
        for _ in 0..3 {
            increment_failure_counter_at(&mut host, "boom", true, 0.0);
        }
        let deadline = host.state.circuit_breaker_retry_time.unwrap();
        host.queries = 50;

        assert_eq!(
            check_learning_cycle_at(&mut host, deadline - 1.0),
            CycleOutcome::CircuitOpen { retry_at: deadline }
        );
        assert_eq!(host.calls, 0);

        let result = check_learning_cycle_at(&mut host, deadline + 1.0);
        assert!(matches!(result, CycleOutcome::Learned { .. }));
        assert!(!host.state.circuit_breaker_tripped);
        assert_eq!(host.state.failure_count, 0.0);
        assert_eq!(host.calls, 1);
    }

    #[test]
    fn histories_are_bounded() {
        let mut host = TestHost::new(1);
        for _ in 0..(MAX_LEARNING_RULES + 10) {
            apply_learning_hook(&mut host, outcome());
        }
        assert_eq!(host.state.rules.len(), MAX_LEARNING_RULES);
        assert_eq!(host.state.history.len(), MAX_LEARNING_HISTORY);
    }
}
