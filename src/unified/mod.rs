//! Unified optimizer: the entry point callers plan and execute queries through.
//!
//! - **detect**: graph-type detection (explicit tag, keywords, identifiers)
//! - **importance**: entity importance scoring
//! - **plan**: [`QueryPlan`] / [`ExecutionPlan`] and the fallback plan
//! - **persist**: `learning_state.json` snapshots
//!
//! Each query is validated, typed, rewritten, parameterized by the optimizer
//! specialized for its graph type, and budgeted. Planning never fails: any
//! error yields a conservative plan tagged `fallback`. Executed queries feed a
//! bounded performance log that the statistical learning loop analyses.
//!
//! The optimizer is not synchronized; callers sharing one instance across
//! threads must serialize access.

pub mod detect;
pub mod importance;
pub mod persist;
pub mod plan;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use serde_json::{Value, json};

use crate::budget::{ConsumptionEntry, QueryBudgetManager, Resource};
use crate::config::OptimizerConfig;
use crate::error::OptimizerResult;
use crate::learning::analysis::{QueryPerformanceRecord, analyze_performance};
use crate::learning::{
    CycleOutcome, LearningHost, LearningOutcome, LearningResult, LearningState,
    ParameterAdjustments, check_learning_cycle,
};
use crate::metrics::{HealthCheck, MetricsResult, PerformanceReport, QueryMetricsCollector};
use crate::optimizer::{CacheStats, ExecutionInfo, LearnedDefaults, QueryOptimizer, Weights};
use crate::processor::{GraphProcessor, ProcessorResult, SearchHit};
use crate::query::{GraphType, Priority, Query, QueryLimits};
use crate::rewrite::{GraphInfo, QueryRewriter, detect_query_pattern};
use crate::stats::{PerformanceSummary, now_secs};
use crate::traversal_stats::TraversalStats;

pub use detect::detect_graph_type;
pub use persist::{LEARNING_STATE_FILE, LearningSnapshot, StateResult};
pub use plan::{CachingInfo, EntityScores, ExecutionPlan, PlanStatistics, QueryPlan};

/// Executed queries kept for statistical learning.
pub const MAX_PERFORMANCE_LOG: usize = 500;
/// Wikipedia content changes slowly; cached results live this much longer.
pub const WIKIPEDIA_TTL_FACTOR: f64 = 2.0;
/// Leading hits averaged into a query's quality score.
const QUALITY_TOP_N: usize = 5;

const GRAPH_TYPES: [GraphType; 3] = [GraphType::General, GraphType::Wikipedia, GraphType::Ipld];

// ---------------------------------------------------------------------------
// Specialized optimizers
// ---------------------------------------------------------------------------

/// Ranking weights and cache lifetime for one graph type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GraphProfile {
    pub weights: Weights,
    pub cache_ttl_secs: f64,
}

pub fn profile_for(graph_type: GraphType, config: &OptimizerConfig) -> GraphProfile {
    match graph_type {
        GraphType::General => GraphProfile {
            weights: Weights::default(),
            cache_ttl_secs: config.cache_ttl_secs,
        },
        GraphType::Wikipedia => GraphProfile {
            weights: Weights {
                vector: 0.6,
                graph: 0.4,
            },
            cache_ttl_secs: config.cache_ttl_secs * WIKIPEDIA_TTL_FACTOR,
        },
        GraphType::Ipld => GraphProfile {
            weights: Weights {
                vector: 0.75,
                graph: 0.25,
            },
            cache_ttl_secs: config.cache_ttl_secs,
        },
    }
}

#[derive(Debug)]
struct Specialized {
    general: QueryOptimizer,
    wikipedia: QueryOptimizer,
    ipld: QueryOptimizer,
}

impl Specialized {
    fn new(config: &OptimizerConfig) -> Self {
        let build = |graph_type| {
            let profile = profile_for(graph_type, config);
            QueryOptimizer::from_config(config)
                .with_weights(profile.weights)
                .with_cache_ttl(profile.cache_ttl_secs)
        };
        Self {
            general: build(GraphType::General),
            wikipedia: build(GraphType::Wikipedia),
            ipld: build(GraphType::Ipld),
        }
    }

    fn get(&self, graph_type: GraphType) -> &QueryOptimizer {
        match graph_type {
            GraphType::General => &self.general,
            GraphType::Wikipedia => &self.wikipedia,
            GraphType::Ipld => &self.ipld,
        }
    }

    fn get_mut(&mut self, graph_type: GraphType) -> &mut QueryOptimizer {
        match graph_type {
            GraphType::General => &mut self.general,
            GraphType::Wikipedia => &mut self.wikipedia,
            GraphType::Ipld => &mut self.ipld,
        }
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut QueryOptimizer> {
        [&mut self.general, &mut self.wikipedia, &mut self.ipld].into_iter()
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of [`UnifiedOptimizer::execute_query_with_caching`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryExecution {
    pub query_id: String,
    pub plan: QueryPlan,
    pub results: Vec<SearchHit>,
    pub info: ExecutionInfo,
    /// Resource name → consumption against the allocated budget.
    pub budget_report: BTreeMap<String, ConsumptionEntry>,
    pub early_stop_suggested: bool,
    pub quality_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphTypeSummary {
    pub performance: PerformanceSummary,
    pub cache: CacheStats,
    pub cache_entries: usize,
    pub defaults: LearnedDefaults,
    pub weights: Weights,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizerSummary {
    pub total_queries: u64,
    pub graph_types: BTreeMap<String, GraphTypeSummary>,
    pub learning_enabled: bool,
    pub learning_cycles_completed: u64,
    pub learning_rules: usize,
    pub failure_count: f64,
    pub circuit_breaker_tripped: bool,
    pub performance_log_len: usize,
    pub budget_completed: u64,
    pub budget_failed: u64,
    pub entity_importance_cached: usize,
    pub traversal_paths: usize,
}

/// Mean of the leading scores, in `[0, 1]`.
fn quality_score(scores: &[f64]) -> f64 {
    let top: Vec<f64> = scores
        .iter()
        .copied()
        .filter(|s| s.is_finite())
        .take(QUALITY_TOP_N)
        .collect();
    if top.is_empty() {
        return 0.0;
    }
    (top.iter().sum::<f64>() / top.len() as f64).clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// UnifiedOptimizer
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct UnifiedOptimizer {
    config: OptimizerConfig,
    limits: QueryLimits,
    rewriter: QueryRewriter,
    budget: QueryBudgetManager,
    specialized: Specialized,
    traversal_stats: TraversalStats,
    metrics: QueryMetricsCollector,
    learning: LearningState,
    performance_log: VecDeque<QueryPerformanceRecord>,
    entity_importance: HashMap<String, f64>,
    graph_info: Option<GraphInfo>,
}

impl Default for UnifiedOptimizer {
    fn default() -> Self {
        Self::from_valid_config(OptimizerConfig::default())
    }
}

impl UnifiedOptimizer {
    /// Build an optimizer from a validated configuration.
    pub fn new(config: OptimizerConfig) -> OptimizerResult<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: OptimizerConfig) -> Self {
        let mut metrics = QueryMetricsCollector::new(
            config.metrics_max_history,
            config.metrics_dir.clone(),
            config.track_resources,
        );
        metrics.set_array_threshold(config.cache_array_threshold);
        Self {
            limits: QueryLimits {
                max_traversal_depth: config.max_traversal_depth,
                max_vector_results: config.max_vector_results_limit,
            },
            rewriter: QueryRewriter::new(),
            budget: QueryBudgetManager::new(config.budget),
            specialized: Specialized::new(&config),
            traversal_stats: TraversalStats::new(),
            metrics,
            learning: LearningState::new(
                config.learning_enabled,
                config.learning_cycle,
                config.circuit_breaker_threshold,
            ),
            performance_log: VecDeque::new(),
            entity_importance: HashMap::new(),
            graph_info: None,
            config,
        }
    }

    /// Replace the metrics collector, e.g. to attach sinks or a test probe.
    pub fn with_metrics(mut self, metrics: QueryMetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn optimizer(&self, graph_type: GraphType) -> &QueryOptimizer {
        self.specialized.get(graph_type)
    }

    pub fn optimizer_mut(&mut self, graph_type: GraphType) -> &mut QueryOptimizer {
        self.specialized.get_mut(graph_type)
    }

    pub fn metrics_collector(&self) -> &QueryMetricsCollector {
        &self.metrics
    }

    pub fn metrics_collector_mut(&mut self) -> &mut QueryMetricsCollector {
        &mut self.metrics
    }

    pub fn budget_manager(&self) -> &QueryBudgetManager {
        &self.budget
    }

    pub fn traversal_stats(&self) -> &TraversalStats {
        &self.traversal_stats
    }

    pub fn performance_log(&self) -> impl Iterator<Item = &QueryPerformanceRecord> {
        self.performance_log.iter()
    }

    pub fn graph_info(&self) -> Option<&GraphInfo> {
        self.graph_info.as_ref()
    }

    /// Edge selectivity, density, and default graph type of the target graph.
    pub fn set_graph_info(&mut self, info: GraphInfo) {
        self.graph_info = Some(info);
    }

    // ----- Planning -----

    /// Plan `query`. Never fails: errors produce a fallback plan.
    ///
    /// An explicit `priority` wins over the query's own. With a processor, the
    /// importance of the query's entities drives pruning in the rewriter.
    pub fn optimize_query(
        &mut self,
        query: &Query,
        priority: Option<Priority>,
        processor: Option<&dyn GraphProcessor>,
    ) -> QueryPlan {
        match self.try_optimize(query, priority, processor) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(error = %e, "query planning failed, using fallback plan");
                let mut plan = QueryPlan::fallback(Some(query), e.to_string(), self.budget.defaults());
                if let Some(priority) = priority {
                    plan.priority = priority;
                }
                plan
            }
        }
    }

    /// Plan an untyped JSON query. Never fails.
    pub fn optimize_query_value(
        &mut self,
        value: &Value,
        priority: Option<Priority>,
        processor: Option<&dyn GraphProcessor>,
    ) -> QueryPlan {
        match Query::from_value(value) {
            Ok(query) => self.optimize_query(&query, priority, processor),
            Err(e) => {
                tracing::warn!(error = %e, "rejected query value, using fallback plan");
                let mut plan = QueryPlan::fallback(None, e.to_string(), self.budget.defaults());
                plan.priority = priority.unwrap_or_default();
                plan
            }
        }
    }

    fn try_optimize(
        &mut self,
        query: &Query,
        priority: Option<Priority>,
        processor: Option<&dyn GraphProcessor>,
    ) -> OptimizerResult<QueryPlan> {
        let validated = query.validated(&self.limits)?;
        let priority = priority.or(validated.priority).unwrap_or_default();
        let configured_type = self.graph_info.as_ref().and_then(|i| i.graph_type);
        let graph_type = match (&validated.graph_type, configured_type) {
            (None, Some(configured)) => configured,
            _ => detect_graph_type(&validated),
        };
        let pattern = detect_query_pattern(&validated);

        let entity_scores: HashMap<String, f64> = match processor {
            Some(p) if !validated.entity_ids.is_empty() => validated
                .entity_ids
                .iter()
                .map(|id| (id.clone(), self.calculate_entity_importance(id, p)))
                .collect(),
            _ => HashMap::new(),
        };

        let mut info = self.graph_info.clone().unwrap_or_default();
        info.graph_type = Some(graph_type);
        let (rewritten, pinned) = self.rewriter.rewrite_query_pinned(
            &validated,
            Some(&info),
            (!entity_scores.is_empty()).then_some(&entity_scores),
            &self.traversal_stats,
        );
        let mut rewritten = rewritten.validated(&self.limits)?;

        // Knobs neither the caller nor the rewriter pinned come from the
        // specialized optimizer's adaptive defaults.
        let top_k = (query.max_vector_results.is_some() || pinned.top_k).then(|| rewritten.top_k());
        let depth = (query.traversal.max_depth.is_some() || pinned.depth)
            .then(|| rewritten.traversal.depth_or_default());
        let min_similarity = query
            .min_similarity
            .is_some()
            .then(|| rewritten.min_similarity_or_default());

        let mut optimized = self.specialized.get(graph_type).optimize_query(
            top_k,
            depth,
            rewritten.traversal.edge_types.as_deref(),
            min_similarity,
        );
        let params = &mut optimized.params;
        params.max_vector_results = params
            .max_vector_results
            .clamp(1, self.limits.max_vector_results.max(1));
        params.max_traversal_depth = params
            .max_traversal_depth
            .clamp(1, self.limits.max_traversal_depth.max(1));
        params.min_similarity = params.min_similarity.clamp(0.0, 1.0);

        rewritten.max_vector_results = Some(params.max_vector_results);
        rewritten.traversal.max_depth = Some(params.max_traversal_depth);
        rewritten.min_similarity = Some(params.min_similarity);
        if rewritten.vector_params.min_score.is_some() {
            rewritten.vector_params.min_score = Some(params.min_similarity);
        }

        let budget = self.budget.allocate_budget(&rewritten, priority);
        let optimizer = self.specialized.get_mut(graph_type);
        let base = optimizer.generate_query_plan(rewritten.query_vector.as_deref(), &optimized);
        let statistics = PlanStatistics {
            query_count: optimizer.stats().query_count(),
            cache_hit_rate: optimizer.stats().cache_hit_rate(),
            avg_query_time: optimizer.stats().avg_query_time(),
            cache_entries: optimizer.cache().len(),
            learning_enabled: self.learning.enabled,
            circuit_breaker_tripped: self.learning.circuit_breaker_tripped,
        };

        tracing::debug!(
            graph_type = graph_type.as_str(),
            pattern = pattern.as_str(),
            priority = priority.as_str(),
            top_k = base.params.max_vector_results,
            depth = base.params.max_traversal_depth,
            cached = base.cached,
            "query planned"
        );

        let plan = QueryPlan {
            traversal_strategy: rewritten.traversal.strategy.unwrap_or_default(),
            query: rewritten,
            params: base.params,
            weights: base.weights,
            budget: budget.to_named_map(),
            graph_type,
            pattern: Some(pattern),
            priority,
            statistics,
            caching: CachingInfo {
                enabled: base.cache_key.is_some(),
                key: base.cache_key,
                cached: base.cached,
            },
            entity_scores: entity_scores.into_iter().collect(),
            fallback: false,
            error: None,
        };
        Ok(plan)
    }

    /// Plan `query` and lay out its budgeted pipeline steps.
    pub fn get_execution_plan(
        &mut self,
        query: &Query,
        priority: Option<Priority>,
        processor: Option<&dyn GraphProcessor>,
    ) -> ExecutionPlan {
        ExecutionPlan::from_plan(self.optimize_query(query, priority, processor))
    }

    // ----- Execution -----

    /// Plan and run `query` against `processor` through the specialized
    /// optimizer's cache.
    ///
    /// Backend errors are returned after the metrics record, budget, and
    /// performance log have been closed out for the failed query.
    pub fn execute_query_with_caching(
        &mut self,
        query: &Query,
        priority: Option<Priority>,
        processor: &dyn GraphProcessor,
    ) -> ProcessorResult<QueryExecution> {
        let started = Instant::now();
        let plan = self.optimize_query(query, priority, Some(processor));
        let query_id = self.metrics.start_query_tracking(
            None,
            Some(json!({
                "graph_type": plan.graph_type,
                "priority": plan.priority,
                "params": plan.params,
                "fallback": plan.fallback,
            })),
        );

        let optimized = plan.optimized();
        let outcome = self.specialized.get_mut(plan.graph_type).execute_query(
            processor,
            plan.query.query_vector.as_deref(),
            &plan.query.entity_ids,
            &optimized,
            Some(&mut self.metrics),
            plan.caching.enabled,
        );

        match outcome {
            Ok((results, info)) => {
                self.track_budget(&info);
                if !info.from_cache {
                    for hit in results.iter().filter(|h| h.path.len() > 1) {
                        self.traversal_stats.record_path_performance(
                            &hit.path,
                            hit.score,
                            Some(hit.relation_types.as_slice()),
                        );
                    }
                }

                let scores: Vec<f64> = results.iter().map(|h| h.score).collect();
                let quality = quality_score(&scores);
                let report = self.budget.consumption_report();
                let consumed_ratio = report.get(&Resource::TimeoutMs).map_or(0.0, |e| e.ratio);
                let early_stop_suggested = self.budget.suggest_early_stopping(&scores, consumed_ratio);
                self.budget.record_completion(true);

                if let Err(e) = self.metrics.end_query_tracking(results.len(), quality, None) {
                    tracing::debug!(error = %e, "metrics record already closed");
                }
                self.log_performance(
                    &plan,
                    &query_id,
                    started.elapsed().as_secs_f64(),
                    results.len(),
                    quality,
                    true,
                );
                self.run_learning_check();

                Ok(QueryExecution {
                    query_id,
                    plan,
                    results,
                    info,
                    budget_report: report
                        .into_iter()
                        .map(|(r, e)| (r.as_str().to_string(), e))
                        .collect(),
                    early_stop_suggested,
                    quality_score: quality,
                })
            }
            Err(e) => {
                tracing::warn!(query_id = %query_id, error = %e, "query execution failed");
                self.budget.record_completion(false);
                if let Err(me) = self.metrics.end_query_tracking(0, 0.0, Some(e.to_string())) {
                    tracing::debug!(error = %me, "metrics record already closed");
                }
                self.log_performance(&plan, &query_id, started.elapsed().as_secs_f64(), 0, 0.0, false);
                self.run_learning_check();
                Err(e)
            }
        }
    }

    fn track_budget(&mut self, info: &ExecutionInfo) {
        for (phase, &ms) in &info.phase_ms {
            let resource = match phase.as_str() {
                "vector_search" => Resource::VectorSearchMs,
                "graph_traversal" => Resource::GraphTraversalMs,
                "ranking" => Resource::RankingMs,
                _ => continue,
            };
            self.budget.track_consumption(resource, ms);
        }
        self.budget.track_consumption(Resource::MaxNodes, info.expanded as f64);
        let total_ms: f64 = info.phase_ms.values().sum();
        self.budget.track_consumption(Resource::TimeoutMs, total_ms);
    }

    fn log_performance(
        &mut self,
        plan: &QueryPlan,
        query_id: &str,
        duration_secs: f64,
        results_count: usize,
        quality_score: f64,
        success: bool,
    ) {
        self.performance_log.push_back(QueryPerformanceRecord {
            query_id: query_id.to_string(),
            timestamp: now_secs(),
            max_depth: plan.params.max_traversal_depth,
            top_k: plan.params.max_vector_results,
            min_similarity: plan.params.min_similarity,
            strategy: Some(plan.traversal_strategy),
            edge_types: plan.params.edge_types.clone(),
            duration_secs,
            results_count,
            quality_score,
            success,
        });
        while self.performance_log.len() > MAX_PERFORMANCE_LOG {
            self.performance_log.pop_front();
        }
    }

    fn run_learning_check(&mut self) {
        match check_learning_cycle(self) {
            CycleOutcome::Learned { analyzed_queries } => {
                tracing::info!(analyzed_queries, "statistical learning applied");
            }
            CycleOutcome::Failed { message } => {
                tracing::debug!(error = %message, "statistical learning failed");
            }
            _ => {}
        }
    }

    // ----- Entity importance -----

    /// Importance of `entity_id` in `[0, 1]`, cached per entity.
    ///
    /// Unknown entities and backend errors score 0 and are not cached.
    pub fn calculate_entity_importance(&mut self, entity_id: &str, processor: &dyn GraphProcessor) -> f64 {
        self.calculate_entity_importance_at(entity_id, processor, now_secs())
    }

    pub fn calculate_entity_importance_at(
        &mut self,
        entity_id: &str,
        processor: &dyn GraphProcessor,
        now: f64,
    ) -> f64 {
        if let Some(&score) = self.entity_importance.get(entity_id) {
            return score;
        }
        match processor.get_entity_info(entity_id) {
            Ok(Some(info)) => {
                let score = importance::score_entity(&info, now);
                self.traversal_stats
                    .record_entity_connectivity(entity_id, info.connection_count() as u64);
                self.entity_importance.insert(entity_id.to_string(), score);
                score
            }
            Ok(None) => 0.0,
            Err(e) => {
                tracing::debug!(entity_id, error = %e, "entity lookup failed");
                0.0
            }
        }
    }

    pub fn clear_importance_cache(&mut self) {
        self.entity_importance.clear();
    }

    // ----- Learning -----

    pub fn record_path_performance(&mut self, path: &[String], score: f64, relation_types: Option<&[String]>) {
        self.traversal_stats
            .record_path_performance(path, score, relation_types);
    }

    /// Turn statistical learning on or off; `learning_cycle` keeps the current
    /// cycle length when `None`.
    pub fn enable_statistical_learning(&mut self, enabled: bool, learning_cycle: Option<u64>) {
        let cycle = learning_cycle.unwrap_or(self.learning.learning_cycle);
        self.learning.enable(enabled, cycle);
        tracing::info!(enabled, learning_cycle = self.learning.learning_cycle, "statistical learning configured");
    }

    pub fn snapshot(&self) -> LearningSnapshot {
        LearningSnapshot {
            learning_enabled: self.learning.enabled,
            learning_cycle: self.learning.learning_cycle,
            learning_parameters: GRAPH_TYPES
                .iter()
                .map(|&gt| (gt.as_str().to_string(), self.specialized.get(gt).defaults()))
                .collect(),
            traversal_stats: self.traversal_stats.clone(),
            entity_importance_cache: self
                .entity_importance
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            learning_state: Some(self.learning.clone()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn save_learning_state(&self, path: &Path) -> StateResult<()> {
        self.snapshot().save(path)
    }

    /// Restore a snapshot written by [`save_learning_state`](Self::save_learning_state).
    ///
    /// The learning mark restarts at the current query count.
    pub fn load_learning_state(&mut self, path: &Path) -> StateResult<()> {
        let snapshot = LearningSnapshot::load(path)?;
        self.restore(snapshot);
        Ok(())
    }

    pub fn restore(&mut self, snapshot: LearningSnapshot) {
        if let Some(state) = snapshot.learning_state {
            self.learning = state;
        }
        self.learning
            .enable(snapshot.learning_enabled, snapshot.learning_cycle);
        self.learning.last_learning_query_count = self.query_count();

        for (name, defaults) in snapshot.learning_parameters {
            match GraphType::parse(&name) {
                Some(graph_type) => self.specialized.get_mut(graph_type).set_defaults(defaults),
                None => tracing::warn!(graph_type = %name, "ignoring parameters for unknown graph type"),
            }
        }
        self.traversal_stats = snapshot.traversal_stats;
        self.entity_importance = snapshot.entity_importance_cache.into_iter().collect();
    }

    // ----- Reporting -----

    pub fn health_check(&mut self, window: usize) -> HealthCheck {
        self.metrics.get_health_check(window)
    }

    pub fn performance_report(&self) -> PerformanceReport {
        self.metrics.generate_performance_report()
    }

    pub fn export_metrics_json(&self, path: &Path) -> MetricsResult<()> {
        self.metrics.export_metrics_json(path)
    }

    pub fn export_metrics_csv(&self, path: &Path) -> MetricsResult<()> {
        self.metrics.export_metrics_csv(path)
    }

    pub fn stats_summary(&self) -> OptimizerSummary {
        let graph_types = GRAPH_TYPES
            .iter()
            .map(|&gt| {
                let opt = self.specialized.get(gt);
                let summary = GraphTypeSummary {
                    performance: opt.stats().get_performance_summary(),
                    cache: opt.cache().stats(),
                    cache_entries: opt.cache().len(),
                    defaults: opt.defaults(),
                    weights: opt.weights(),
                };
                (gt.as_str().to_string(), summary)
            })
            .collect();
        OptimizerSummary {
            total_queries: self.query_count(),
            graph_types,
            learning_enabled: self.learning.enabled,
            learning_cycles_completed: self.learning.cycles_completed,
            learning_rules: self.learning.rules.len(),
            failure_count: self.learning.failure_count,
            circuit_breaker_tripped: self.learning.circuit_breaker_tripped,
            performance_log_len: self.performance_log.len(),
            budget_completed: self.budget.completed_count(),
            budget_failed: self.budget.failed_count(),
            entity_importance_cached: self.entity_importance.len(),
            traversal_paths: self.traversal_stats.paths_explored.len(),
        }
    }

    /// Drop every statistic, cache, and learned parameter. Configuration and
    /// graph info are kept.
    pub fn reset(&mut self) {
        for optimizer in self.specialized.iter_mut() {
            optimizer.reset();
        }
        self.budget.reset();
        self.traversal_stats.reset();
        self.metrics.reset();
        self.learning = LearningState::new(
            self.config.learning_enabled,
            self.config.learning_cycle,
            self.config.circuit_breaker_threshold,
        );
        self.performance_log.clear();
        self.entity_importance.clear();
        tracing::info!("unified optimizer reset");
    }
}

// ---------------------------------------------------------------------------
// Learning host
// ---------------------------------------------------------------------------

impl LearningHost for UnifiedOptimizer {
    fn learning_state(&self) -> &LearningState {
        &self.learning
    }

    fn learning_state_mut(&mut self) -> &mut LearningState {
        &mut self.learning
    }

    fn query_count(&self) -> u64 {
        GRAPH_TYPES
            .iter()
            .map(|&gt| self.specialized.get(gt).stats().query_count())
            .sum()
    }

    fn learn_from_query_statistics(&mut self, recent_queries: u64) -> LearningResult<LearningOutcome> {
        let recent = usize::try_from(recent_queries).unwrap_or(usize::MAX);
        analyze_performance(&self.performance_log, recent)
    }

    fn apply_parameter_adjustments(&mut self, adjustments: &ParameterAdjustments) {
        let limits = self.limits;
        for optimizer in self.specialized.iter_mut() {
            let mut defaults = optimizer.defaults();
            if let Some(depth) = adjustments.max_traversal_depth {
                defaults.max_traversal_depth = depth.clamp(1, limits.max_traversal_depth.max(1));
            }
            if let Some(top_k) = adjustments.max_vector_results {
                defaults.max_vector_results = top_k.clamp(1, limits.max_vector_results.max(1));
            }
            if let Some(min_sim) = adjustments.min_similarity.filter(|s| s.is_finite()) {
                defaults.min_similarity = min_sim.clamp(0.0, 1.0);
            }
            optimizer.set_defaults(defaults);
        }
        tracing::info!(
            depth = ?adjustments.max_traversal_depth,
            top_k = ?adjustments.max_vector_results,
            min_similarity = ?adjustments.min_similarity,
            "learned parameter defaults applied"
        );
    }

    fn traversal_stats_mut(&mut self) -> &mut TraversalStats {
        &mut self.traversal_stats
    }

    fn metrics(&mut self) -> Option<&mut QueryMetricsCollector> {
        Some(&mut self.metrics)
    }
}
