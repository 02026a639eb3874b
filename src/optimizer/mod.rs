//! Base query optimizer: adaptive parameter defaults, result cache, plan
//! generation, and synchronous execution against a [`GraphProcessor`].
//!
//! - **cache**: TTL + capacity bounded [`ResultCache`]
//! - **fingerprint**: bounded-cost cache keys
//!
//! The unified optimizer owns one `QueryOptimizer` per graph type; each keeps
//! its own cache and statistics.

pub mod cache;
pub mod fingerprint;

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::config::OptimizerConfig;
use crate::error::CacheError;
use crate::math::{VectorMath, select_math};
use crate::metrics::QueryMetricsCollector;
use crate::processor::{GraphProcessor, ProcessorResult, SearchHit};
use crate::query::{DEFAULT_MAX_DEPTH, DEFAULT_MAX_VECTOR_RESULTS, DEFAULT_MIN_SIMILARITY};
use crate::stats::{PerformanceSummary, QueryStats, now_secs};

pub use cache::{CacheStats, ResultCache};
pub use fingerprint::{KeyParams, get_query_key};

pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Recorded queries needed before adaptive defaults kick in.
pub const ADAPTIVE_MIN_QUERIES: u64 = 10;
/// Depths remembered for the mode-based depth default.
pub const RECENT_DEPTHS: usize = 50;

/// Relative weight of vector similarity and graph structure in ranking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub vector: f64,
    pub graph: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            vector: 0.7,
            graph: 0.3,
        }
    }
}

/// Default search parameters, adjusted by statistical learning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LearnedDefaults {
    pub max_vector_results: usize,
    pub max_traversal_depth: usize,
    pub min_similarity: f64,
}

impl Default for LearnedDefaults {
    fn default() -> Self {
        Self {
            max_vector_results: DEFAULT_MAX_VECTOR_RESULTS,
            max_traversal_depth: DEFAULT_MAX_DEPTH,
            min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }
}

/// Concrete parameters for one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    pub max_vector_results: usize,
    pub max_traversal_depth: usize,
    pub edge_types: Vec<String>,
    pub min_similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizedQuery {
    pub params: SearchParams,
    pub weights: Weights,
}

/// A named pipeline step with its parameters and optional time budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub name: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_ms: Option<f64>,
}

impl PlanStep {
    pub fn new(name: &str, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            name: name.to_string(),
            params,
            budget_ms: None,
        }
    }
}

/// Plan produced by [`QueryOptimizer::generate_query_plan`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasePlan {
    pub params: SearchParams,
    pub weights: Weights,
    pub steps: Vec<PlanStep>,
    pub cache_key: Option<String>,
    pub cached: bool,
    pub statistics: PerformanceSummary,
}

/// What happened during [`QueryOptimizer::execute_query`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionInfo {
    pub from_cache: bool,
    pub duration_secs: f64,
    pub vector_hits: usize,
    pub expanded: usize,
    pub ranked: usize,
    pub cache_key: Option<String>,
    /// Phase name → elapsed milliseconds.
    #[serde(default)]
    pub phase_ms: BTreeMap<String, f64>,
}

/// Run `f` inside a phase timer when a collector is attached. Returns the
/// result and the elapsed milliseconds.
fn timed<T>(
    metrics: &mut Option<&mut QueryMetricsCollector>,
    phase: &str,
    f: impl FnOnce() -> T,
) -> (T, f64) {
    let started = Instant::now();
    let out = match metrics.as_deref_mut() {
        Some(collector) => {
            let _phase = collector.time_phase(phase, None);
            f()
        }
        None => f(),
    };
    (out, started.elapsed().as_secs_f64() * 1000.0)
}

pub struct QueryOptimizer {
    weights: Weights,
    defaults: LearnedDefaults,
    cache_enabled: bool,
    cache: ResultCache,
    stats: QueryStats,
    recent_depths: VecDeque<usize>,
    math: Box<dyn VectorMath>,
}

impl std::fmt::Debug for QueryOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOptimizer")
            .field("weights", &self.weights)
            .field("defaults", &self.defaults)
            .field("cache_enabled", &self.cache_enabled)
            .field("cached", &self.cache.len())
            .field("math", &self.math.kind())
            .finish()
    }
}

impl QueryOptimizer {
    pub fn from_config(config: &OptimizerConfig) -> Self {
        Self {
            weights: Weights::default(),
            defaults: LearnedDefaults::default(),
            cache_enabled: config.cache_enabled,
            cache: ResultCache::new(
                config.cache_ttl_secs,
                config.cache_size_limit,
                config.cache_array_threshold,
            ),
            stats: QueryStats::new(),
            recent_depths: VecDeque::new(),
            math: select_math(config.vector_math),
        }
    }

    pub fn with_weights(mut self, weights: Weights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_cache_ttl(mut self, ttl_secs: f64) -> Self {
        self.cache.set_ttl_secs(ttl_secs);
        self
    }

    pub fn weights(&self) -> Weights {
        self.weights
    }

    pub fn defaults(&self) -> LearnedDefaults {
        self.defaults
    }

    pub fn set_defaults(&mut self, defaults: LearnedDefaults) {
        self.defaults = defaults;
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn stats(&self) -> &QueryStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut QueryStats {
        &mut self.stats
    }

    pub fn math(&self) -> &dyn VectorMath {
        self.math.as_ref()
    }

    pub fn recent_depths(&self) -> impl Iterator<Item = usize> + '_ {
        self.recent_depths.iter().copied()
    }

    pub fn record_depth(&mut self, depth: usize) {
        self.recent_depths.push_back(depth);
        while self.recent_depths.len() > RECENT_DEPTHS {
            self.recent_depths.pop_front();
        }
    }

    /// Most frequent recent depth; ties go to the shallower depth.
    fn depth_mode(&self) -> Option<usize> {
        let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
        for &d in &self.recent_depths {
            *counts.entry(d).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
            .map(|(depth, _)| depth)
    }

    /// Defaults after adaptation to observed latency, depth usage, and hit rate.
    pub fn adaptive_defaults(&self) -> LearnedDefaults {
        let mut defaults = self.defaults;
        if self.stats.query_count() < ADAPTIVE_MIN_QUERIES {
            return defaults;
        }
        let avg = self.stats.avg_query_time();
        if avg > 1.0 {
            defaults.max_vector_results = defaults.max_vector_results.saturating_sub(2).max(3);
        } else if avg < 0.1 {
            defaults.max_vector_results = (defaults.max_vector_results + 2).min(10);
        }
        if let Some(depth) = self.depth_mode() {
            defaults.max_traversal_depth = depth;
        }
        if self.stats.cache_hit_rate() < 0.3 {
            defaults.min_similarity = (defaults.min_similarity - 0.1).max(0.3);
        }
        defaults
    }

    /// Fill unspecified parameters from the adaptive defaults.
    ///
    /// Explicit arguments are taken as given.
    pub fn optimize_query(
        &self,
        top_k: Option<usize>,
        max_depth: Option<usize>,
        edge_types: Option<&[String]>,
        min_similarity: Option<f64>,
    ) -> OptimizedQuery {
        let defaults = self.adaptive_defaults();
        OptimizedQuery {
            params: SearchParams {
                max_vector_results: top_k.unwrap_or(defaults.max_vector_results),
                max_traversal_depth: max_depth.unwrap_or(defaults.max_traversal_depth),
                edge_types: edge_types.map(<[String]>::to_vec).unwrap_or_default(),
                min_similarity: min_similarity.unwrap_or(defaults.min_similarity),
            },
            weights: self.weights,
        }
    }

    // ----- Cache -----

    pub fn get_query_key(&self, vector: Option<&[f64]>, params: &SearchParams) -> String {
        get_query_key(
            self.math.as_ref(),
            &KeyParams {
                vector,
                top_k: params.max_vector_results,
                max_depth: params.max_traversal_depth,
                edge_types: &params.edge_types,
                min_similarity: params.min_similarity,
            },
        )
    }

    pub fn is_in_cache(&mut self, key: &str) -> bool {
        self.is_in_cache_at(key, now_secs())
    }

    pub fn is_in_cache_at(&mut self, key: &str, now: f64) -> bool {
        self.cache_enabled && self.cache.contains_at(key, now)
    }

    pub fn get_from_cache(&mut self, key: &str) -> Option<Vec<SearchHit>> {
        self.get_from_cache_at(key, now_secs())
    }

    /// Cached hits for `key`. Undecodable entries are dropped and count as misses.
    pub fn get_from_cache_at(&mut self, key: &str, now: f64) -> Option<Vec<SearchHit>> {
        if !self.cache_enabled {
            return None;
        }
        let value = self.cache.get_at(key, now)?;
        match serde_json::from_value::<Vec<SearchHit>>(value) {
            Ok(hits) => Some(hits),
            Err(e) => {
                let err = CacheError::Decode {
                    message: e.to_string(),
                };
                tracing::debug!(key, error = %err, "dropping undecodable cache entry");
                self.cache.remove(key);
                None
            }
        }
    }

    pub fn add_to_cache(&mut self, key: &str, hits: &[SearchHit]) -> CacheResult<()> {
        self.add_to_cache_at(key, hits, now_secs())
    }

    pub fn add_to_cache_at(&mut self, key: &str, hits: &[SearchHit], now: f64) -> CacheResult<()> {
        if !self.cache_enabled {
            return Ok(());
        }
        let value = serde_json::to_value(hits).map_err(|e| CacheError::Serialize {
            message: e.to_string(),
        })?;
        self.cache.insert_at(key, &value, now);
        Ok(())
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    // ----- Planning -----

    /// Pipeline steps: vector search and traversal, or a direct graph query
    /// when there is no vector, followed by ranking.
    pub fn plan_steps(has_vector: bool, optimized: &OptimizedQuery) -> Vec<PlanStep> {
        let params = &optimized.params;
        let traversal = json!({
            "max_depth": params.max_traversal_depth,
            "edge_types": params.edge_types,
        });
        let mut steps = Vec::with_capacity(3);
        if has_vector {
            steps.push(PlanStep::new(
                "vector_similarity_search",
                json!({
                    "top_k": params.max_vector_results,
                    "min_similarity": params.min_similarity,
                }),
            ));
            steps.push(PlanStep::new("graph_traversal", traversal));
        } else {
            steps.push(PlanStep::new("direct_graph_query", traversal));
        }
        steps.push(PlanStep::new(
            "result_ranking",
            json!({
                "vector_weight": optimized.weights.vector,
                "graph_weight": optimized.weights.graph,
            }),
        ));
        steps
    }

    /// Steps, parameters, and cache status for a query.
    pub fn generate_query_plan(
        &mut self,
        vector: Option<&[f64]>,
        optimized: &OptimizedQuery,
    ) -> BasePlan {
        let params = &optimized.params;
        let has_vector = vector.is_some_and(|v| !v.is_empty());
        let cache_key = self.cache_enabled.then(|| self.get_query_key(vector, params));
        let cached = cache_key.as_deref().is_some_and(|k| self.is_in_cache(k));

        let steps = Self::plan_steps(has_vector, optimized);

        BasePlan {
            params: params.clone(),
            weights: optimized.weights,
            steps,
            cache_key,
            cached,
            statistics: self.stats.get_performance_summary(),
        }
    }

    // ----- Execution -----

    /// Run vector search, graph expansion, and ranking, consulting the cache
    /// first when `use_cache` is set.
    ///
    /// Without a vector, `entity_ids` seed the expansion directly. On success
    /// the timing is recorded and the ranked hits are cached.
    pub fn execute_query(
        &mut self,
        processor: &dyn GraphProcessor,
        vector: Option<&[f64]>,
        entity_ids: &[String],
        optimized: &OptimizedQuery,
        mut metrics: Option<&mut QueryMetricsCollector>,
        use_cache: bool,
    ) -> ProcessorResult<(Vec<SearchHit>, ExecutionInfo)> {
        let params = &optimized.params;
        let vector = vector.filter(|v| !v.is_empty());
        let cache_key = (use_cache && self.cache_enabled).then(|| self.get_query_key(vector, params));
        let mut phase_ms = BTreeMap::new();

        if let Some(key) = &cache_key {
            let (cached, ms) = timed(&mut metrics, "cache_lookup", || self.get_from_cache(key));
            phase_ms.insert("cache_lookup".to_string(), ms);
            if let Some(hits) = cached {
                self.stats.record_cache_hit();
                let info = ExecutionInfo {
                    from_cache: true,
                    ranked: hits.len(),
                    cache_key,
                    phase_ms,
                    ..Default::default()
                };
                return Ok((hits, info));
            }
        }

        let started = Instant::now();
        let seeds = match vector {
            Some(v) => {
                let (seeds, ms) = timed(&mut metrics, "vector_search", || {
                    processor.search_by_vector(v, params.max_vector_results, params.min_similarity)
                });
                phase_ms.insert("vector_search".to_string(), ms);
                seeds?
            }
            None => entity_ids.iter().map(|id| SearchHit::seed(id.as_str(), 1.0)).collect(),
        };
        let vector_hits = seeds.len();

        let (expanded, ms) = timed(&mut metrics, "graph_traversal", || {
            processor.expand_by_graph(&seeds, params.max_traversal_depth, &params.edge_types)
        });
        phase_ms.insert("graph_traversal".to_string(), ms);
        let expanded = expanded?;
        let expanded_count = expanded.len();

        let (ranked, ms) = timed(&mut metrics, "ranking", || {
            processor.rank_results(expanded, optimized.weights.vector, optimized.weights.graph)
        });
        phase_ms.insert("ranking".to_string(), ms);
        let ranked = ranked?;
        let duration = started.elapsed().as_secs_f64();

        self.stats.record_query_time(duration);
        self.stats.record_query_pattern(&json!({
            "has_vector": vector.is_some(),
            "max_depth": params.max_traversal_depth,
            "top_k": params.max_vector_results,
            "edge_types": params.edge_types.len(),
        }));
        self.record_depth(params.max_traversal_depth);

        if let Some(key) = &cache_key {
            if let Err(e) = self.add_to_cache(key, &ranked) {
                tracing::debug!(error = %e, "result not cached");
            }
        }

        let info = ExecutionInfo {
            from_cache: false,
            duration_secs: duration,
            vector_hits,
            expanded: expanded_count,
            ranked: ranked.len(),
            cache_key,
            phase_ms,
        };
        Ok((ranked, info))
    }

    pub fn reset(&mut self) {
        self.cache.reset();
        self.stats.reset();
        self.recent_depths.clear();
        self.defaults = LearnedDefaults::default();
    }
}
