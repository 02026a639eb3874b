//! Query and execution plans returned by the unified optimizer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::budget::{BudgetDefaults, Resource};
use crate::optimizer::{OptimizedQuery, PlanStep, QueryOptimizer, SearchParams, Weights};
use crate::query::{GraphType, Priority, Query, TraversalStrategy};
use crate::rewrite::QueryPattern;

/// Conservative parameters used when planning fails.
pub const FALLBACK_MAX_DEPTH: usize = 2;
pub const FALLBACK_MAX_VECTOR_RESULTS: usize = 5;
pub const FALLBACK_MIN_SIMILARITY: f64 = 0.6;

/// Entity scores above this count are summarized in execution plans.
pub const MAX_LISTED_ENTITY_SCORES: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachingInfo {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Whether a live entry exists for `key` right now.
    #[serde(default)]
    pub cached: bool,
}

/// Snapshot of the specialized optimizer's statistics at planning time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanStatistics {
    pub query_count: u64,
    pub cache_hit_rate: f64,
    pub avg_query_time: f64,
    pub cache_entries: usize,
    pub learning_enabled: bool,
    pub circuit_breaker_tripped: bool,
}

/// Fully populated plan for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    /// The rewritten, validated query.
    pub query: Query,
    pub params: SearchParams,
    pub weights: Weights,
    /// Resource name → limit.
    pub budget: BTreeMap<String, f64>,
    pub graph_type: GraphType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<QueryPattern>,
    pub priority: Priority,
    pub statistics: PlanStatistics,
    pub caching: CachingInfo,
    pub traversal_strategy: TraversalStrategy,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub entity_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryPlan {
    /// Conservative plan tagged with the error that forced it.
    ///
    /// Keeps the caller's text, entity ids, and vector (when finite) from
    /// `source`; everything else is reset to safe defaults.
    pub fn fallback(source: Option<&Query>, error: impl Into<String>, budget: &BudgetDefaults) -> Self {
        let mut query = Query::default();
        if let Some(src) = source {
            query.query_text = src.query_text.clone();
            query.entity_ids = src.entity_ids.clone();
            query.query_vector = src
                .query_vector
                .clone()
                .filter(|v| v.iter().all(|x| x.is_finite()));
        }
        query.max_vector_results = Some(FALLBACK_MAX_VECTOR_RESULTS);
        query.min_similarity = Some(FALLBACK_MIN_SIMILARITY);
        query.traversal.max_depth = Some(FALLBACK_MAX_DEPTH);

        let priority = source.and_then(|q| q.priority).unwrap_or_default();
        QueryPlan {
            params: SearchParams {
                max_vector_results: FALLBACK_MAX_VECTOR_RESULTS,
                max_traversal_depth: FALLBACK_MAX_DEPTH,
                edge_types: Vec::new(),
                min_similarity: FALLBACK_MIN_SIMILARITY,
            },
            query,
            weights: Weights::default(),
            budget: Resource::ALL
                .iter()
                .map(|r| (r.as_str().to_string(), budget.get(*r)))
                .collect(),
            graph_type: GraphType::General,
            pattern: None,
            priority,
            statistics: PlanStatistics::default(),
            caching: CachingInfo::default(),
            traversal_strategy: TraversalStrategy::Default,
            entity_scores: BTreeMap::new(),
            fallback: true,
            error: Some(error.into()),
        }
    }

    pub fn budget_for(&self, resource: Resource) -> Option<f64> {
        self.budget.get(resource.as_str()).copied()
    }

    pub fn optimized(&self) -> OptimizedQuery {
        OptimizedQuery {
            params: self.params.clone(),
            weights: self.weights,
        }
    }
}

/// Entity scores as shown in an execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityScores {
    Listed(BTreeMap<String, f64>),
    Summary {
        count: usize,
        /// Highest-scoring entities, best first.
        top: Vec<(String, f64)>,
    },
}

impl EntityScores {
    pub fn from_scores(scores: &BTreeMap<String, f64>) -> Self {
        if scores.len() <= MAX_LISTED_ENTITY_SCORES {
            return EntityScores::Listed(scores.clone());
        }
        let mut top: Vec<(String, f64)> = scores.iter().map(|(k, v)| (k.clone(), *v)).collect();
        top.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top.truncate(MAX_LISTED_ENTITY_SCORES);
        EntityScores::Summary {
            count: scores.len(),
            top,
        }
    }
}

/// A plan decorated with budgeted pipeline steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub plan: QueryPlan,
    pub steps: Vec<PlanStep>,
    pub entity_scores: EntityScores,
    /// Sum of the step budgets.
    pub estimated_total_ms: f64,
}

fn step_resource(name: &str) -> Option<Resource> {
    match name {
        "vector_similarity_search" => Some(Resource::VectorSearchMs),
        "graph_traversal" | "direct_graph_query" => Some(Resource::GraphTraversalMs),
        "result_ranking" => Some(Resource::RankingMs),
        _ => None,
    }
}

impl ExecutionPlan {
    pub fn from_plan(plan: QueryPlan) -> Self {
        let mut steps = QueryOptimizer::plan_steps(plan.query.has_vector(), &plan.optimized());
        for step in &mut steps {
            step.budget_ms = step_resource(&step.name).and_then(|r| plan.budget_for(r));
        }
        let estimated_total_ms = steps.iter().filter_map(|s| s.budget_ms).sum();
        let entity_scores = EntityScores::from_scores(&plan.entity_scores);
        ExecutionPlan {
            plan,
            steps,
            entity_scores,
            estimated_total_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_is_conservative_and_tagged() {
        let mut src = Query::with_vector(vec![0.1, f64::NAN]);
        src.query_text = Some("who".into());
        let plan = QueryPlan::fallback(Some(&src), "boom", &BudgetDefaults::default());
        assert!(plan.fallback);
        assert_eq!(plan.error.as_deref(), Some("boom"));
        assert!(!plan.caching.enabled);
        assert_eq!(plan.query.traversal.max_depth, Some(2));
        assert_eq!(plan.query.max_vector_results, Some(5));
        assert_eq!(plan.query.min_similarity, Some(0.6));
        assert!(plan.query.query_vector.is_none());
        assert_eq!(plan.query.query_text.as_deref(), Some("who"));
        assert_eq!(plan.budget_for(Resource::TimeoutMs), Some(2000.0));
    }

    #[test]
    fn execution_plan_budgets_each_step() {
        let mut plan = QueryPlan::fallback(None, "x", &BudgetDefaults::default());
        let graph_only = ExecutionPlan::from_plan(plan.clone());
        let names: Vec<&str> = graph_only.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["direct_graph_query", "result_ranking"]);
        assert_eq!(graph_only.estimated_total_ms, 1200.0);

        plan.query.query_vector = Some(vec![1.0]);
        let hybrid = ExecutionPlan::from_plan(plan);
        let names: Vec<&str> = hybrid.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["vector_similarity_search", "graph_traversal", "result_ranking"]);
        assert_eq!(hybrid.steps[0].budget_ms, Some(500.0));
        assert_eq!(hybrid.estimated_total_ms, 1700.0);
    }

    #[test]
    fn large_score_maps_are_summarized() {
        let few: BTreeMap<String, f64> = (0..3).map(|i| (format!("e{i}"), i as f64)).collect();
        assert!(matches!(EntityScores::from_scores(&few), EntityScores::Listed(m) if m.len() == 3));

        let many: BTreeMap<String, f64> = (0..8).map(|i| (format!("e{i}"), i as f64 / 10.0)).collect();
        match EntityScores::from_scores(&many) {
            EntityScores::Summary { count, top } => {
                assert_eq!(count, 8);
                assert_eq!(top.len(), 5);
                assert_eq!(top[0].0, "e7");
            }
            other => panic!("expected summary, got {other:?}"),
        }
    }
}
