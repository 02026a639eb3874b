//! Query rewriting: a fixed pipeline of pure passes over an owned copy.
//!
//! Pass order:
//! 1. predicate pushdown into the vector search parameters
//! 2. selectivity-based edge reordering
//! 3. traversal strategy from graph density and depth
//! 4. pattern-specific knobs
//! 5. domain transforms (Wikipedia, IPLD)
//! 6. adaptive tuning from [`TraversalStats`]
//!
//! A strategy set by the caller is never replaced.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::query::{DEFAULT_MAX_DEPTH, GraphType, Query, TraversalStrategy};
use crate::traversal_stats::TraversalStats;

/// Density above which traversal switches to sampling.
pub const SAMPLING_DENSITY: f64 = 0.7;
pub const DEFAULT_SAMPLE_RATIO: f64 = 0.3;
pub const DEFAULT_MAX_BREADTH: usize = 10;
/// Edge types moved to the front for Wikipedia-like graphs.
pub const WIKIPEDIA_HIERARCHY_EDGES: [&str; 4] = ["subclass_of", "instance_of", "part_of", "located_in"];
pub const WIKIPEDIA_HIERARCHICAL_WEIGHT: f64 = 1.5;
/// Edge types moved to the front for IPLD DAGs.
pub const IPLD_LINK_EDGES: [&str; 3] = ["links_to", "contains", "references"];
/// Paths scoring above this are offered as hints.
pub const PATH_HINT_SCORE: f64 = 0.7;
pub const MAX_PATH_HINTS: usize = 5;
/// Pruning threshold as a share of the mean entity score.
pub const PRUNE_RATIO: f64 = 0.7;

/// What is known about the target graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphInfo {
    #[serde(default)]
    pub graph_type: Option<GraphType>,
    /// Edge type → selectivity in `[0, 1]`; lower is more selective.
    #[serde(default)]
    pub edge_selectivity: HashMap<String, f64>,
    #[serde(default)]
    pub graph_density: Option<f64>,
}

/// Search knobs a rewrite pinned, even when the pinned value matches a default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PinnedFields {
    pub top_k: bool,
    pub depth: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryPattern {
    EntityLookup,
    RelationCentric,
    FactVerification,
    ComplexQuestion,
    General,
}

impl QueryPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryPattern::EntityLookup => "entity_lookup",
            QueryPattern::RelationCentric => "relation_centric",
            QueryPattern::FactVerification => "fact_verification",
            QueryPattern::ComplexQuestion => "complex_question",
            QueryPattern::General => "general",
        }
    }
}

const VERIFICATION_CUES: [&str; 6] = ["verify", "is it true", "true that", "confirm", "fact", "whether"];
const RELATION_CUES: [&str; 5] = ["relation", "related", "connected", "connection", "linked"];
const QUESTION_WORDS: [&str; 6] = ["who", "what", "when", "where", "why", "how"];

fn lower_text(query: &Query) -> String {
    query.query_text.as_deref().unwrap_or("").to_lowercase()
}

/// Endpoints for a fact-verification walk, if the query names two.
fn verification_endpoints(query: &Query) -> Option<(String, String)> {
    if let Some(pair) = &query.traversal.find_path_between {
        return Some(pair.clone());
    }
    let source = query.extra.get("source_entity").and_then(|v| v.as_str());
    let target = query.extra.get("target_entity").and_then(|v| v.as_str());
    match (source, target) {
        (Some(s), Some(t)) => Some((s.to_string(), t.to_string())),
        _ => match query.entity_ids.as_slice() {
            [a, b] => Some((a.clone(), b.clone())),
            _ => None,
        },
    }
}

/// Classify a query from structural and textual cues.
pub fn detect_query_pattern(query: &Query) -> QueryPattern {
    let text = lower_text(query);

    let explicit_pair = query.traversal.find_path_between.is_some()
        || (query.extra.contains_key("source_entity") && query.extra.contains_key("target_entity"));
    let verification_text = VERIFICATION_CUES.iter().any(|c| text.contains(c));
    if explicit_pair || (query.entity_ids.len() == 2 && verification_text) {
        return QueryPattern::FactVerification;
    }

    if query.entity_ids.len() == 1 {
        return QueryPattern::EntityLookup;
    }

    let relation_text = RELATION_CUES.iter().any(|c| text.contains(c));
    if query.extra.contains_key("relation_type")
        || relation_text
        || (!query.has_vector() && query.traversal.edge_types().len() == 1)
    {
        return QueryPattern::RelationCentric;
    }

    let words: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let question_words = words.iter().filter(|w| QUESTION_WORDS.contains(w)).count();
    if words.len() >= 12 || question_words >= 2 || text.matches('?').count() >= 2 {
        return QueryPattern::ComplexQuestion;
    }

    QueryPattern::General
}

/// Stable partition moving `promoted` edge types to the front.
fn promote_edges(edges: &mut Vec<String>, promoted: &[&str]) {
    let (mut front, back): (Vec<String>, Vec<String>) =
        edges.drain(..).partition(|e| promoted.contains(&e.as_str()));
    front.extend(back);
    *edges = front;
}

/// Sort edge types by ascending selectivity; unknown types count as 1.0.
///
/// The sort is stable, so applying it twice gives the same order as once.
pub fn reorder_by_selectivity(edges: &mut [String], selectivity: &HashMap<String, f64>) {
    let key = |e: &String| {
        selectivity
            .get(e)
            .copied()
            .filter(|s| s.is_finite())
            .unwrap_or(1.0)
    };
    edges.sort_by(|a, b| key(a).total_cmp(&key(b)));
}

/// Rewrites queries. Stateless; statistics are passed in per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryRewriter;

impl QueryRewriter {
    pub fn new() -> Self {
        Self
    }

    /// Run every pass over a copy of `query`.
    pub fn rewrite_query(
        &self,
        query: &Query,
        graph_info: Option<&GraphInfo>,
        entity_scores: Option<&HashMap<String, f64>>,
        stats: &TraversalStats,
    ) -> Query {
        self.rewrite_query_pinned(query, graph_info, entity_scores, stats).0
    }

    /// Like [`rewrite_query`](Self::rewrite_query), also reporting which
    /// search knobs the pattern and adaptive passes pinned.
    pub fn rewrite_query_pinned(
        &self,
        query: &Query,
        graph_info: Option<&GraphInfo>,
        entity_scores: Option<&HashMap<String, f64>>,
        stats: &TraversalStats,
    ) -> (Query, PinnedFields) {
        let mut pinned = PinnedFields::default();
        let caller_strategy = query
            .traversal
            .strategy
            .is_some_and(|s| s != TraversalStrategy::Default);

        let mut q = query.clone();
        push_down_predicates(&mut q);
        if let Some(info) = graph_info {
            if let Some(edges) = q.traversal.edge_types.as_mut() {
                reorder_by_selectivity(edges, &info.edge_selectivity);
            }
        }
        optimize_traversal(&mut q, graph_info, caller_strategy);

        let pattern = detect_query_pattern(&q);
        apply_pattern(&mut q, pattern, caller_strategy, &mut pinned);

        let graph_type = graph_info
            .and_then(|i| i.graph_type)
            .or_else(|| q.graph_type.as_deref().and_then(GraphType::parse));
        if let Some(graph_type) = graph_type {
            apply_domain(&mut q, graph_type, caller_strategy);
        }

        apply_adaptive(&mut q, entity_scores, stats, &mut pinned);
        tracing::debug!(
            pattern = pattern.as_str(),
            pinned_top_k = pinned.top_k,
            pinned_depth = pinned.depth,
            "query rewritten"
        );
        (q, pinned)
    }
}

// ----- Passes -----

fn push_down_predicates(q: &mut Query) {
    if let Some(min_sim) = q.min_similarity {
        if q.vector_params.min_score.is_none() {
            q.vector_params.min_score = Some(min_sim);
        }
    }
    if !q.entity_types.is_empty() && q.vector_params.entity_type_filter.is_empty() {
        q.vector_params.entity_type_filter = q.entity_types.clone();
    }
}

fn set_strategy(q: &mut Query, strategy: TraversalStrategy, caller_strategy: bool) {
    if !caller_strategy {
        q.traversal.strategy = Some(strategy);
    }
}

fn optimize_traversal(q: &mut Query, graph_info: Option<&GraphInfo>, caller_strategy: bool) {
    let dense = graph_info
        .and_then(|i| i.graph_density)
        .is_some_and(|d| d > SAMPLING_DENSITY);
    if dense {
        set_strategy(q, TraversalStrategy::Sampling, caller_strategy);
        q.traversal.sample_ratio.get_or_insert(DEFAULT_SAMPLE_RATIO);
    } else if q.traversal.depth_or_default() > 2 {
        set_strategy(q, TraversalStrategy::BreadthLimited, caller_strategy);
        q.traversal.max_breadth.get_or_insert(DEFAULT_MAX_BREADTH);
    }
}

fn apply_pattern(q: &mut Query, pattern: QueryPattern, caller_strategy: bool, pinned: &mut PinnedFields) {
    let depth = q.traversal.depth_or_default();
    pinned.depth |= pattern != QueryPattern::General;
    pinned.top_k |= matches!(pattern, QueryPattern::EntityLookup | QueryPattern::ComplexQuestion);
    match pattern {
        QueryPattern::EntityLookup => {
            q.traversal.max_depth = Some(1);
            q.max_vector_results = Some(q.top_k().min(3));
            set_strategy(q, TraversalStrategy::EntityFocused, caller_strategy);
        }
        QueryPattern::RelationCentric => {
            q.traversal.max_depth = Some(depth.min(2));
            set_strategy(q, TraversalStrategy::RelationCentric, caller_strategy);
        }
        QueryPattern::FactVerification => {
            q.traversal.max_depth = Some(depth.max(2));
            if q.traversal.find_path_between.is_none() {
                q.traversal.find_path_between = verification_endpoints(q);
            }
            set_strategy(q, TraversalStrategy::Bidirectional, caller_strategy);
        }
        QueryPattern::ComplexQuestion => {
            q.max_vector_results = Some((q.top_k() + 2).min(10));
            q.traversal.max_depth = Some(depth.max(3));
            set_strategy(q, TraversalStrategy::BreadthLimited, caller_strategy);
            q.traversal.max_breadth = Some(5);
        }
        QueryPattern::General => {}
    }
}

fn apply_domain(q: &mut Query, graph_type: GraphType, caller_strategy: bool) {
    match graph_type {
        GraphType::Wikipedia => {
            if let Some(edges) = q.traversal.edge_types.as_mut() {
                promote_edges(edges, &WIKIPEDIA_HIERARCHY_EDGES);
            }
            q.traversal
                .hierarchical_weight
                .get_or_insert(WIKIPEDIA_HIERARCHICAL_WEIGHT);
        }
        GraphType::Ipld => {
            if let Some(edges) = q.traversal.edge_types.as_mut() {
                promote_edges(edges, &IPLD_LINK_EDGES);
            }
            // Content-addressed DAGs are acyclic.
            if q.traversal.strategy.is_none() && !caller_strategy {
                q.traversal.strategy = Some(TraversalStrategy::DepthFirst);
            }
        }
        GraphType::General => {}
    }
}

fn apply_adaptive(
    q: &mut Query,
    entity_scores: Option<&HashMap<String, f64>>,
    stats: &TraversalStats,
    pinned: &mut PinnedFields,
) {
    if let Some(edges) = q.traversal.edge_types.as_mut() {
        if edges.iter().any(|e| stats.relation_score(e).is_some()) {
            // Known relations by usefulness; unknown ones keep their order at the back.
            let key = |e: &String| stats.relation_score(e).unwrap_or(f64::NEG_INFINITY);
            edges.sort_by(|a, b| key(b).total_cmp(&key(a)));
        }
    }

    let top = stats.top_paths(MAX_PATH_HINTS);
    if top.first().is_some_and(|(_, score)| *score > PATH_HINT_SCORE) {
        q.traversal.path_hints = top.into_iter().map(|(path, _)| path).collect();
    }

    if let Some(scores) = entity_scores {
        let finite: Vec<(&String, f64)> = scores
            .iter()
            .filter(|(_, s)| s.is_finite())
            .map(|(k, &s)| (k, s))
            .collect();
        if !finite.is_empty() {
            let mean = finite.iter().map(|(_, s)| s).sum::<f64>() / finite.len() as f64;
            let threshold = PRUNE_RATIO * mean;
            let mut important: Vec<(&String, f64)> =
                finite.into_iter().filter(|(_, s)| *s >= threshold).collect();
            important.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
            q.traversal.prune_threshold = Some(threshold);
            q.traversal.important_entities = important.into_iter().map(|(k, _)| k.clone()).collect();
        }
    }

    if let Some(avg) = stats.average_connectivity() {
        if avg > 15.0 {
            q.traversal.max_depth = Some(2);
            q.traversal.max_breadth = Some(8);
            pinned.depth = true;
        } else if avg < 5.0 {
            q.traversal.max_depth = Some(3);
            pinned.depth = true;
        }
    }

    if q.traversal.max_depth.is_none() && q.traversal.strategy.is_some() {
        q.traversal.max_depth = Some(DEFAULT_MAX_DEPTH);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn edges(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn query(value: serde_json::Value) -> Query {
        Query::from_value(&value).unwrap()
    }

    fn rewrite(q: &Query, info: Option<&GraphInfo>) -> Query {
        QueryRewriter::new().rewrite_query(q, info, None, &TraversalStats::new())
    }

    #[test]
    fn input_is_never_mutated() {
        let q = query(json!({"query_vector": [0.1], "traversal": {"max_depth": 4}}));
        let before = q.clone();
        let _ = rewrite(&q, None);
        assert_eq!(q, before);
    }

    #[test]
    fn predicates_are_pushed_into_vector_params() {
        let q = query(json!({
            "query_vector": [0.1],
            "min_similarity": 0.8,
            "entity_types": ["person"]
        }));
        let out = rewrite(&q, None);
        assert_eq!(out.vector_params.min_score, Some(0.8));
        assert_eq!(out.vector_params.entity_type_filter, edges(&["person"]));
    }

    #[test]
    fn selectivity_reorder_is_stable_and_idempotent() {
        let mut selectivity = HashMap::new();
        selectivity.insert("common".to_string(), 0.9);
        selectivity.insert("rare".to_string(), 0.1);
        selectivity.insert("mid_a".to_string(), 0.5);
        selectivity.insert("mid_b".to_string(), 0.5);

        let mut once = edges(&["common", "mid_b", "unknown", "rare", "mid_a"]);
        reorder_by_selectivity(&mut once, &selectivity);
        assert_eq!(once, edges(&["rare", "mid_b", "mid_a", "common", "unknown"]));

        let mut twice = once.clone();
        reorder_by_selectivity(&mut twice, &selectivity);
        assert_eq!(once, twice);
    }

    #[test]
    fn dense_graphs_use_sampling() {
        let info = GraphInfo {
            graph_density: Some(0.9),
            ..Default::default()
        };
        let q = query(json!({"query_vector": [0.1]}));
        let out = rewrite(&q, Some(&info));
        assert_eq!(out.traversal.strategy, Some(TraversalStrategy::Sampling));
        assert_eq!(out.traversal.sample_ratio, Some(DEFAULT_SAMPLE_RATIO));
    }

    #[test]
    fn deep_traversal_is_breadth_limited() {
        let q = query(json!({"query_vector": [0.1], "traversal": {"max_depth": 4}}));
        let out = rewrite(&q, None);
        assert_eq!(out.traversal.strategy, Some(TraversalStrategy::BreadthLimited));
        assert_eq!(out.traversal.max_breadth, Some(DEFAULT_MAX_BREADTH));
    }

    #[test]
    fn caller_strategy_is_kept() {
        let q = query(json!({
            "query_vector": [0.1],
            "traversal": {"max_depth": 4, "strategy": "depth_first"}
        }));
        let out = rewrite(&q, None);
        assert_eq!(out.traversal.strategy, Some(TraversalStrategy::DepthFirst));
    }

    #[test]
    fn detects_patterns() {
        let lookup = query(json!({"entity_ids": ["Q42"]}));
        assert_eq!(detect_query_pattern(&lookup), QueryPattern::EntityLookup);

        let verify = query(json!({"entity_ids": ["a", "b"], "query_text": "Verify that a founded b"}));
        assert_eq!(detect_query_pattern(&verify), QueryPattern::FactVerification);

        let relation = query(json!({"query_text": "how is x connected to y"}));
        assert_eq!(detect_query_pattern(&relation), QueryPattern::RelationCentric);

        let complex = query(json!({"query_text": "who founded the company and when did they leave?"}));
        assert_eq!(detect_query_pattern(&complex), QueryPattern::ComplexQuestion);

        let general = query(json!({"query_vector": [0.1]}));
        assert_eq!(detect_query_pattern(&general), QueryPattern::General);
    }

    #[test]
    fn pattern_knobs_are_applied() {
        let lookup = rewrite(&query(json!({"entity_ids": ["Q42"], "max_vector_results": 8})), None);
        assert_eq!(lookup.traversal.max_depth, Some(1));
        assert_eq!(lookup.max_vector_results, Some(3));
        assert_eq!(lookup.traversal.strategy, Some(TraversalStrategy::EntityFocused));

        let verify = rewrite(
            &query(json!({"entity_ids": ["a", "b"], "query_text": "is it true that a owns b"})),
            None,
        );
        assert_eq!(verify.traversal.strategy, Some(TraversalStrategy::Bidirectional));
        assert_eq!(
            verify.traversal.find_path_between,
            Some(("a".to_string(), "b".to_string()))
        );
        assert!(verify.traversal.max_depth.unwrap() >= 2);

        let complex = rewrite(
            &query(json!({"query_text": "who wrote it and where and when was it published?"})),
            None,
        );
        assert_eq!(complex.max_vector_results, Some(7));
        assert_eq!(complex.traversal.max_depth, Some(3));
        assert_eq!(complex.traversal.max_breadth, Some(5));
    }

    #[test]
    fn wikipedia_promotes_hierarchy_edges() {
        let info = GraphInfo {
            graph_type: Some(GraphType::Wikipedia),
            ..Default::default()
        };
        let q = query(json!({
            "query_vector": [0.1],
            "traversal": {"edge_types": ["spouse", "instance_of", "award", "subclass_of"]}
        }));
        let out = rewrite(&q, Some(&info));
        assert_eq!(
            out.traversal.edge_types(),
            edges(&["instance_of", "subclass_of", "spouse", "award"])
        );
        assert_eq!(out.traversal.hierarchical_weight, Some(1.5));
    }

    #[test]
    fn ipld_prefers_links_and_depth_first() {
        let q = query(json!({
            "query_vector": [0.1],
            "graph_type": "ipld",
            "traversal": {"edge_types": ["author", "links_to"]}
        }));
        let out = rewrite(&q, None);
        assert_eq!(out.traversal.edge_types(), edges(&["links_to", "author"]));
        assert_eq!(out.traversal.strategy, Some(TraversalStrategy::DepthFirst));
    }

    #[test]
    fn adaptive_pass_uses_traversal_stats() {
        let mut stats = TraversalStats::new();
        stats.update_relation_usefulness("b", 0.9);
        stats.update_relation_usefulness("a", 0.2);
        stats.record_path_performance(&edges(&["x", "y"]), 0.95, None);
        for (i, id) in ["e1", "e2", "e3"].iter().enumerate() {
            stats.record_entity_connectivity(id, 20 + i as u64);
        }

        let mut scores = HashMap::new();
        scores.insert("hub".to_string(), 1.0);
        scores.insert("leaf".to_string(), 0.1);

        let q = query(json!({
            "query_vector": [0.1],
            "traversal": {"edge_types": ["unknown", "a", "b"], "max_depth": 5}
        }));
        let out = QueryRewriter::new().rewrite_query(&q, None, Some(&scores), &stats);
        assert_eq!(out.traversal.edge_types(), edges(&["b", "a", "unknown"]));
        assert_eq!(out.traversal.path_hints, vec!["x -> y".to_string()]);
        assert!((out.traversal.prune_threshold.unwrap() - 0.385).abs() < 1e-12);
        assert_eq!(out.traversal.important_entities, vec!["hub".to_string()]);
        assert_eq!(out.traversal.max_depth, Some(2));
        assert_eq!(out.traversal.max_breadth, Some(8));
    }

    #[test]
    fn sparse_graphs_go_deeper() {
        let mut stats = TraversalStats::new();
        stats.record_entity_connectivity("e", 2);
        let q = query(json!({"query_vector": [0.1]}));
        let out = QueryRewriter::new().rewrite_query(&q, None, None, &stats);
        assert_eq!(out.traversal.max_depth, Some(3));
    }

    #[test]
    fn pinned_fields_cover_caps_equal_to_defaults() {
        let rewriter = QueryRewriter::new();
        let stats = TraversalStats::new();

        let relation = query(json!({"traversal": {"edge_types": ["located_in"], "max_depth": 2}}));
        let (out, pinned) = rewriter.rewrite_query_pinned(&relation, None, None, &stats);
        assert_eq!(out.traversal.max_depth, Some(2));
        assert!(pinned.depth);
        assert!(!pinned.top_k);

        let general = query(json!({"query_vector": [0.1]}));
        let (_, pinned) = rewriter.rewrite_query_pinned(&general, None, None, &stats);
        assert_eq!(pinned, PinnedFields::default());

        let mut busy = TraversalStats::new();
        busy.record_entity_connectivity("hub", 40);
        let (out, pinned) = rewriter.rewrite_query_pinned(&general, None, None, &busy);
        assert_eq!(out.traversal.max_depth, Some(2));
        assert!(pinned.depth);
    }
}
