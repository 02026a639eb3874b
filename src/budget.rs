//! Per-query resource budgets.
//!
//! A budget is allocated from the query's structural complexity, the caller's
//! priority, and how much each resource actually consumed on recent successful
//! runs. Budgets are advisory: the caller polls [`QueryBudgetManager::is_budget_exceeded`]
//! and [`QueryBudgetManager::suggest_early_stopping`] between phases; nothing is preempted.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::math::{VectorMath, scalar::ScalarMath};
use crate::query::{Priority, Query};

/// Samples kept per resource in the consumption history.
pub const BUDGET_HISTORY_LEN: usize = 100;

/// Historical targets never drop below this share of the static default.
pub const HISTORY_FLOOR_RATIO: f64 = 0.8;

/// A budgeted resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    VectorSearchMs,
    GraphTraversalMs,
    RankingMs,
    MaxNodes,
    TimeoutMs,
}

impl Resource {
    pub const ALL: [Resource; 5] = [
        Resource::VectorSearchMs,
        Resource::GraphTraversalMs,
        Resource::RankingMs,
        Resource::MaxNodes,
        Resource::TimeoutMs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::VectorSearchMs => "vector_search_ms",
            Resource::GraphTraversalMs => "graph_traversal_ms",
            Resource::RankingMs => "ranking_ms",
            Resource::MaxNodes => "max_nodes",
            Resource::TimeoutMs => "timeout_ms",
        }
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static per-resource defaults before any multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetDefaults {
    #[serde(default = "default_vector_search_ms")]
    pub vector_search_ms: f64,
    #[serde(default = "default_graph_traversal_ms")]
    pub graph_traversal_ms: f64,
    #[serde(default = "default_ranking_ms")]
    pub ranking_ms: f64,
    #[serde(default = "default_max_nodes")]
    pub max_nodes: f64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: f64,
}

fn default_vector_search_ms() -> f64 {
    500.0
}
fn default_graph_traversal_ms() -> f64 {
    1000.0
}
fn default_ranking_ms() -> f64 {
    200.0
}
fn default_max_nodes() -> f64 {
    1000.0
}
fn default_timeout_ms() -> f64 {
    2000.0
}

impl Default for BudgetDefaults {
    fn default() -> Self {
        Self {
            vector_search_ms: default_vector_search_ms(),
            graph_traversal_ms: default_graph_traversal_ms(),
            ranking_ms: default_ranking_ms(),
            max_nodes: default_max_nodes(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl BudgetDefaults {
    pub fn get(&self, resource: Resource) -> f64 {
        match resource {
            Resource::VectorSearchMs => self.vector_search_ms,
            Resource::GraphTraversalMs => self.graph_traversal_ms,
            Resource::RankingMs => self.ranking_ms,
            Resource::MaxNodes => self.max_nodes,
            Resource::TimeoutMs => self.timeout_ms,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for resource in Resource::ALL {
            let v = self.get(resource);
            if !(v.is_finite() && v > 0.0) {
                return Err(format!("budget default {resource} must be > 0, got {v}"));
            }
        }
        Ok(())
    }
}

/// Structural complexity class of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryComplexity {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl QueryComplexity {
    pub fn multiplier(&self) -> f64 {
        match self {
            QueryComplexity::Low => 0.7,
            QueryComplexity::Medium => 1.0,
            QueryComplexity::High => 1.5,
            QueryComplexity::VeryHigh => 2.0,
        }
    }
}

pub fn priority_multiplier(priority: Priority) -> f64 {
    match priority {
        Priority::Low => 0.5,
        Priority::Normal => 1.0,
        Priority::High => 2.0,
        Priority::Critical => 5.0,
    }
}

/// `0.5 × top_k + 2 × max_depth + 0.3 × edge_type_count`.
pub fn complexity_score(query: &Query) -> f64 {
    0.5 * query.top_k() as f64
        + 2.0 * query.traversal.depth_or_default() as f64
        + 0.3 * query.traversal.edge_types().len() as f64
}

pub fn estimate_complexity(query: &Query) -> QueryComplexity {
    let score = complexity_score(query);
    if score < 5.0 {
        QueryComplexity::Low
    } else if score < 10.0 {
        QueryComplexity::Medium
    } else if score < 20.0 {
        QueryComplexity::High
    } else {
        QueryComplexity::VeryHigh
    }
}

/// Per-resource limits for one query.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Budget {
    pub limits: BTreeMap<Resource, f64>,
}

impl Budget {
    pub fn get(&self, resource: Resource) -> f64 {
        self.limits.get(&resource).copied().unwrap_or(0.0)
    }

    /// Resource-name → limit, for plans and reports.
    pub fn to_named_map(&self) -> BTreeMap<String, f64> {
        self.limits
            .iter()
            .map(|(r, v)| (r.as_str().to_string(), *v))
            .collect()
    }
}

/// Consumption of one resource against its limit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionEntry {
    pub consumed: f64,
    pub limit: f64,
    pub ratio: f64,
}

/// Allocates budgets and learns from historical consumption.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryBudgetManager {
    defaults: BudgetDefaults,
    history: HashMap<Resource, VecDeque<f64>>,
    current_budget: Option<Budget>,
    current_consumption: BTreeMap<Resource, f64>,
    completed: u64,
    failed: u64,
}

impl QueryBudgetManager {
    pub fn new(defaults: BudgetDefaults) -> Self {
        Self {
            defaults,
            ..Default::default()
        }
    }

    pub fn defaults(&self) -> &BudgetDefaults {
        &self.defaults
    }

    /// Base limit for `resource` after folding in history.
    fn base_limit(&self, resource: Resource) -> f64 {
        let default = self.defaults.get(resource);
        match self.history.get(&resource) {
            Some(samples) if !samples.is_empty() => {
                let math = ScalarMath;
                let values: Vec<f64> = samples.iter().copied().collect();
                let target = (math.mean(&values) + math.percentile(&values, 95.0)) / 2.0;
                target.max(default * HISTORY_FLOOR_RATIO)
            }
            _ => default,
        }
    }

    /// Allocate a fresh budget and make it the active one.
    pub fn allocate_budget(&mut self, query: &Query, priority: Priority) -> Budget {
        let multiplier = estimate_complexity(query).multiplier() * priority_multiplier(priority);
        let limits = Resource::ALL
            .iter()
            .map(|&r| (r, self.base_limit(r) * multiplier))
            .collect();
        let budget = Budget { limits };
        self.current_budget = Some(budget.clone());
        self.current_consumption.clear();
        budget
    }

    pub fn current_budget(&self) -> Option<&Budget> {
        self.current_budget.as_ref()
    }

    /// Add `amount` to the active consumption of `resource`.
    pub fn track_consumption(&mut self, resource: Resource, amount: f64) {
        if !amount.is_finite() || amount < 0.0 {
            return;
        }
        *self.current_consumption.entry(resource).or_insert(0.0) += amount;
    }

    pub fn consumed(&self, resource: Resource) -> f64 {
        self.current_consumption.get(&resource).copied().unwrap_or(0.0)
    }

    /// Whether `resource` consumed more than its limit. `false` without an active budget.
    pub fn is_budget_exceeded(&self, resource: Resource) -> bool {
        match &self.current_budget {
            Some(budget) => self.consumed(resource) > budget.get(resource),
            None => false,
        }
    }

    pub fn consumption_report(&self) -> BTreeMap<Resource, ConsumptionEntry> {
        let Some(budget) = &self.current_budget else {
            return BTreeMap::new();
        };
        budget
            .limits
            .iter()
            .map(|(&r, &limit)| {
                let consumed = self.consumed(r);
                let ratio = if limit > 0.0 { consumed / limit } else { 0.0 };
                (r, ConsumptionEntry { consumed, limit, ratio })
            })
            .collect()
    }

    /// Close the active budget. Successful runs feed the consumption history.
    pub fn record_completion(&mut self, success: bool) {
        if success {
            self.completed += 1;
            for (&resource, &amount) in &self.current_consumption {
                let samples = self.history.entry(resource).or_default();
                samples.push_back(amount);
                while samples.len() > BUDGET_HISTORY_LEN {
                    samples.pop_front();
                }
            }
        } else {
            self.failed += 1;
        }
        self.current_budget = None;
        self.current_consumption.clear();
    }

    pub fn history_len(&self, resource: Resource) -> usize {
        self.history.get(&resource).map_or(0, VecDeque::len)
    }

    pub fn completed_count(&self) -> u64 {
        self.completed
    }

    pub fn failed_count(&self) -> u64 {
        self.failed
    }

    /// Early-stopping heuristic over descending result scores.
    ///
    /// Never stops with fewer than 3 results. Stops when at least 70% of the
    /// budget is consumed and the top-3 average exceeds 0.85, or when there are
    /// at least 5 results and the gap between the 1st and 5th score exceeds 0.3.
    pub fn suggest_early_stopping(&self, scores: &[f64], consumed_ratio: f64) -> bool {
        if scores.len() < 3 {
            return false;
        }
        let top3 = scores[..3].iter().sum::<f64>() / 3.0;
        if consumed_ratio >= 0.7 && top3 > 0.85 {
            return true;
        }
        scores.len() >= 5 && (scores[0] - scores[4]) > 0.3
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.defaults);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::TraversalSpec;

    fn query(top_k: usize, depth: usize, edges: usize) -> Query {
        Query {
            max_vector_results: Some(top_k),
            traversal: TraversalSpec {
                max_depth: Some(depth),
                edge_types: Some((0..edges).map(|i| format!("e{i}")).collect()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn complexity_thresholds() {
        // 0.5*2 + 2*1 = 3
        assert_eq!(estimate_complexity(&query(2, 1, 0)), QueryComplexity::Low);
        // 0.5*5 + 2*2 = 6.5
        assert_eq!(estimate_complexity(&query(5, 2, 0)), QueryComplexity::Medium);
        // 0.5*10 + 2*3 + 0.3*3 = 11.9
        assert_eq!(estimate_complexity(&query(10, 3, 3)), QueryComplexity::High);
        // 0.5*20 + 2*5 = 20
        assert_eq!(estimate_complexity(&query(20, 5, 0)), QueryComplexity::VeryHigh);
    }

    #[test]
    fn allocation_applies_multipliers() {
        let mut manager = QueryBudgetManager::new(BudgetDefaults::default());
        let q = query(5, 2, 0); // medium
        let normal = manager.allocate_budget(&q, Priority::Normal);
        assert_eq!(normal.get(Resource::VectorSearchMs), 500.0);
        let high = manager.allocate_budget(&q, Priority::High);
        assert_eq!(high.get(Resource::GraphTraversalMs), 2000.0);
    }

    #[test]
    fn critical_never_below_low() {
        let mut manager = QueryBudgetManager::new(BudgetDefaults::default());
        for q in [query(1, 1, 0), query(5, 2, 2), query(50, 10, 9)] {
            let low = manager.allocate_budget(&q, Priority::Low);
            let critical = manager.allocate_budget(&q, Priority::Critical);
            for r in Resource::ALL {
                assert!(critical.get(r) >= low.get(r), "{r}");
            }
        }
    }

    #[test]
    fn history_is_floored_at_eighty_percent() {
        let mut manager = QueryBudgetManager::new(BudgetDefaults::default());
        let q = query(5, 2, 0);
        manager.allocate_budget(&q, Priority::Normal);
        manager.track_consumption(Resource::VectorSearchMs, 1.0);
        manager.record_completion(true);

        let budget = manager.allocate_budget(&q, Priority::Normal);
        assert_eq!(budget.get(Resource::VectorSearchMs), 400.0);
        // Resources without samples keep the static default.
        assert_eq!(budget.get(Resource::RankingMs), 200.0);
    }

    #[test]
    fn history_raises_budget_for_slow_resources() {
        let mut manager = QueryBudgetManager::new(BudgetDefaults::default());
        let q = query(5, 2, 0);
        for _ in 0..4 {
            manager.allocate_budget(&q, Priority::Normal);
            manager.track_consumption(Resource::VectorSearchMs, 900.0);
            manager.record_completion(true);
        }
        let budget = manager.allocate_budget(&q, Priority::Normal);
        assert!((budget.get(Resource::VectorSearchMs) - 900.0).abs() < 1e-9);
    }

    #[test]
    fn failed_runs_do_not_feed_history() {
        let mut manager = QueryBudgetManager::new(BudgetDefaults::default());
        manager.allocate_budget(&query(5, 2, 0), Priority::Normal);
        manager.track_consumption(Resource::RankingMs, 5000.0);
        manager.record_completion(false);
        assert_eq!(manager.history_len(Resource::RankingMs), 0);
        assert_eq!(manager.failed_count(), 1);
    }

    #[test]
    fn history_is_bounded() {
        let mut manager = QueryBudgetManager::new(BudgetDefaults::default());
        for _ in 0..(BUDGET_HISTORY_LEN + 20) {
            manager.allocate_budget(&query(5, 2, 0), Priority::Normal);
            manager.track_consumption(Resource::MaxNodes, 10.0);
            manager.record_completion(true);
        }
        assert_eq!(manager.history_len(Resource::MaxNodes), BUDGET_HISTORY_LEN);
    }

    #[test]
    fn exceeded_tracks_active_budget() {
        let mut manager = QueryBudgetManager::new(BudgetDefaults::default());
        assert!(!manager.is_budget_exceeded(Resource::TimeoutMs));
        manager.allocate_budget(&query(5, 2, 0), Priority::Normal);
        manager.track_consumption(Resource::RankingMs, 150.0);
        assert!(!manager.is_budget_exceeded(Resource::RankingMs));
        manager.track_consumption(Resource::RankingMs, 100.0);
        assert!(manager.is_budget_exceeded(Resource::RankingMs));
        let report = manager.consumption_report();
        assert!((report[&Resource::RankingMs].ratio - 1.25).abs() < 1e-12);
    }

    #[test]
    fn early_stopping_rules() {
        let manager = QueryBudgetManager::default();
        assert!(!manager.suggest_early_stopping(&[0.99, 0.98], 1.0));
        assert!(manager.suggest_early_stopping(&[0.9, 0.9, 0.9], 0.7));
        assert!(!manager.suggest_early_stopping(&[0.9, 0.9, 0.9], 0.5));
        assert!(manager.suggest_early_stopping(&[0.9, 0.8, 0.7, 0.6, 0.5], 0.1));
        assert!(!manager.suggest_early_stopping(&[0.9, 0.85, 0.8, 0.75, 0.7], 0.1));
    }
}
