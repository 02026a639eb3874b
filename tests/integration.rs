//! End-to-end tests for planning, caching, budgeting, and learning through
//! the public API.

use graphrag_optimizer::budget::QueryBudgetManager;
use graphrag_optimizer::config::OptimizerConfig;
use graphrag_optimizer::learning::{
    CycleOutcome, LearningHost, check_learning_cycle_at, increment_failure_counter_at,
};
use graphrag_optimizer::optimizer::QueryOptimizer;
use graphrag_optimizer::processor::{InMemoryGraph, SearchHit};
use graphrag_optimizer::query::{GraphType, Priority, Query, TraversalStrategy};
use graphrag_optimizer::rewrite::{QueryPattern, reorder_by_selectivity};
use graphrag_optimizer::stats::QueryStats;
use graphrag_optimizer::unified::UnifiedOptimizer;
use serde_json::json;

fn optimizer() -> UnifiedOptimizer {
    UnifiedOptimizer::new(OptimizerConfig {
        track_resources: false,
        ..Default::default()
    })
    .unwrap()
}

fn sample_graph() -> InMemoryGraph {
    let mut g = InMemoryGraph::new();
    g.add_entity("paris", Some(vec![1.0, 0.0, 0.0]), Some("location")).unwrap();
    g.add_entity("france", Some(vec![0.8, 0.2, 0.0]), Some("location")).unwrap();
    g.add_entity("europe", Some(vec![0.5, 0.5, 0.0]), Some("location")).unwrap();
    g.add_entity("macron", Some(vec![0.0, 0.0, 1.0]), Some("person")).unwrap();
    g.add_relation("paris", "located_in", "france");
    g.add_relation("france", "part_of", "europe");
    g.add_relation("macron", "president_of", "france");
    g
}

#[test]
fn planning_is_total_for_malformed_input() {
    let mut opt = optimizer();
    let inputs = [
        json!({}),
        json!({"traversal": "not-a-dict"}),
        json!({"query_vector": [0.1, 0.2], "min_similarity": 5.0}),
        json!([1, 2, 3]),
        json!("just text"),
    ];
    for input in &inputs {
        let plan = opt.optimize_query_value(input, None, None);
        let rendered = serde_json::to_value(&plan).unwrap();
        for key in ["query", "weights", "budget", "graph_type", "caching"] {
            assert!(rendered.get(key).is_some(), "{key} missing for {input}");
        }
    }

    let plan = opt.optimize_query_value(&json!({"min_similarity": 5.0}), None, None);
    assert!(!plan.fallback);
    assert_eq!(plan.params.min_similarity, 1.0);

    let plan = opt.optimize_query_value(&json!([1, 2, 3]), None, None);
    assert!(plan.fallback);
    assert!(plan.error.unwrap().contains("expected a JSON object"));
    assert!(!plan.caching.enabled);
    assert_eq!(plan.params.max_traversal_depth, 2);
    assert_eq!(plan.params.max_vector_results, 5);
    assert_eq!(plan.params.min_similarity, 0.6);
}

#[test]
fn traversal_depth_is_clamped() {
    let mut opt = optimizer();
    let plan = opt.optimize_query_value(
        &json!({"query_vector": [0.0, 0.0, 0.0], "traversal": {"max_depth": 20}}),
        None,
        None,
    );
    assert!(!plan.fallback);
    assert_eq!(plan.query.traversal.max_depth, Some(10));
    assert_eq!(plan.params.max_traversal_depth, 10);
    assert_eq!(plan.traversal_strategy, TraversalStrategy::BreadthLimited);
}

#[test]
fn caller_input_is_never_mutated() {
    let mut opt = optimizer();
    let mut query = Query::with_vector(vec![1.0, 0.0, 0.0]);
    query.traversal.max_depth = Some(5);
    query.traversal.edge_types = Some(vec!["part_of".into(), "part_of".into()]);
    let before = query.clone();
    let _ = opt.optimize_query(&query, None, Some(&sample_graph()));
    assert_eq!(query, before);
}

#[test]
fn keyword_detection_routes_to_specialized_optimizers() {
    let mut opt = optimizer();
    let plan = opt.optimize_query_value(
        &json!({"query_vector": [1.0], "query_text": "dbpedia facts about Paris"}),
        None,
        None,
    );
    assert_eq!(plan.graph_type, GraphType::Wikipedia);
    let plan = opt.optimize_query_value(
        &json!({"query_vector": [1.0], "query_text": "resolve this ipfs link"}),
        None,
        None,
    );
    assert_eq!(plan.graph_type, GraphType::Ipld);
    assert_eq!(plan.weights.vector, 0.75);
}

#[test]
fn cache_entries_expire_after_ttl() {
    let config = OptimizerConfig {
        cache_ttl_secs: 10.0,
        ..Default::default()
    };
    let mut opt = QueryOptimizer::from_config(&config);
    let hits = vec![SearchHit::seed("paris", 0.9)];
    let t0 = 1_000.0;
    opt.add_to_cache_at("k", &hits, t0).unwrap();
    assert!(opt.is_in_cache_at("k", t0 + 10.0 - 1e-3));
    assert!(!opt.is_in_cache_at("k", t0 + 10.0 + 1e-3));
    assert!(opt.get_from_cache_at("k", t0 + 5.0).is_none());
}

#[test]
fn cache_overflow_evicts_oldest_entry() {
    let config = OptimizerConfig {
        cache_size_limit: 3,
        ..Default::default()
    };
    let mut opt = QueryOptimizer::from_config(&config);
    let hits = vec![SearchHit::seed("paris", 0.9)];
    for (i, key) in ["a", "b", "c", "d"].iter().enumerate() {
        opt.add_to_cache_at(key, &hits, 100.0 + i as f64).unwrap();
    }
    assert_eq!(opt.cache().len(), 3);
    assert_eq!(opt.cache().stats().evictions, 1);
    assert!(!opt.is_in_cache_at("a", 104.0));
    for key in ["b", "c", "d"] {
        assert!(opt.is_in_cache_at(key, 104.0));
    }
}

#[test]
fn budgets_are_monotonic_in_priority() {
    let mut manager = QueryBudgetManager::default();
    let mut query = Query::with_vector(vec![0.1; 8]);
    query.max_vector_results = Some(20);
    query.traversal.max_depth = Some(4);
    let low = manager.allocate_budget(&query, Priority::Low);
    let critical = manager.allocate_budget(&query, Priority::Critical);
    for (resource, limit) in &low.limits {
        assert!(critical.get(*resource) >= *limit);
    }
}

#[test]
fn stats_scenario_average_and_hit_rate() {
    let mut stats = QueryStats::new();
    stats.record_query_time(0.2);
    stats.record_query_time(0.8);
    assert!((stats.avg_query_time() - 0.5).abs() < 1e-12);
    stats.record_cache_hit();
    assert!((stats.cache_hit_rate() - 1.0 / 3.0).abs() < 1e-12);
}

#[test]
fn circuit_breaker_backs_off_and_recovers() {
    let mut opt = optimizer();
    opt.enable_statistical_learning(true, Some(1));
    let now = 10_000.0;
    for i in 0..4 {
        increment_failure_counter_at(&mut opt, &format!("failure {i}"), true, now);
    }
    let state = opt.learning_state();
    assert!(state.circuit_breaker_tripped);
    assert_eq!(state.failure_count, 4.0);
    assert_eq!(state.last_backoff_minutes, Some(10.0));
    let retry_at = state.circuit_breaker_retry_time.unwrap();
    assert_eq!(retry_at, now + 600.0);

    assert_eq!(
        check_learning_cycle_at(&mut opt, retry_at - 1.0),
        CycleOutcome::CircuitOpen { retry_at }
    );
    let outcome = check_learning_cycle_at(&mut opt, retry_at + 1.0);
    assert!(!matches!(outcome, CycleOutcome::CircuitOpen { .. }));
    let state = opt.learning_state();
    assert!(!state.circuit_breaker_tripped);
    assert_eq!(state.failure_count, 0.0);
}

#[test]
fn learning_failures_never_reach_the_query_caller() {
    let mut opt = optimizer();
    opt.enable_statistical_learning(true, Some(1));
    let g = sample_graph();
    // Each cycle has too little data; analysis fails but queries still succeed.
    for _ in 0..3 {
        let run = opt
            .execute_query_with_caching(&Query::with_vector(vec![1.0, 0.0, 0.0]), None, &g)
            .unwrap();
        assert!(!run.results.is_empty());
    }
    let state = opt.learning_state();
    assert!(state.failure_count > 0.0);
    assert!(state.last_failure_message.is_some());
}

#[test]
fn execution_plan_lists_budgeted_steps() {
    let mut opt = optimizer();
    let g = sample_graph();
    let mut query = Query::default();
    query.entity_ids = (0..7).map(|i| format!("e{i}")).collect();
    query.entity_ids.push("paris".into());
    let plan = opt.get_execution_plan(&query, Some(Priority::High), Some(&g));
    let names: Vec<&str> = plan.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["direct_graph_query", "result_ranking"]);
    assert!(plan.steps.iter().all(|s| s.budget_ms.is_some()));
    let rendered = serde_json::to_value(&plan.entity_scores).unwrap();
    assert_eq!(rendered["count"], 8);
}

#[test]
fn graph_only_queries_expand_from_entity_ids() {
    let mut opt = optimizer();
    let g = sample_graph();
    let mut query = Query::default();
    query.entity_ids = vec!["paris".into()];
    query.traversal.max_depth = Some(2);
    let run = opt.execute_query_with_caching(&query, None, &g).unwrap();
    let ids: Vec<&str> = run.results.iter().map(|h| h.entity_id.as_str()).collect();
    assert!(ids.contains(&"france"));
    assert!(run.info.vector_hits == 1);
}

#[test]
fn selectivity_reordering_is_idempotent() {
    let selectivity = [("a", 0.9), ("b", 0.1), ("c", 0.5)]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    let mut once: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
    reorder_by_selectivity(&mut once, &selectivity);
    let mut twice = once.clone();
    reorder_by_selectivity(&mut twice, &selectivity);
    assert_eq!(once, twice);
    assert_eq!(once, ["b", "c", "a", "d"]);
}

/// Run a dozen uncached depth-4 executions so the general optimizer's
/// adaptive depth becomes 4.
fn record_deep_history(opt: &mut UnifiedOptimizer, g: &InMemoryGraph) {
    for _ in 0..12 {
        let mut q = Query::with_vector(vec![1.0, 0.0, 0.0]);
        q.traversal.max_depth = Some(4);
        opt.optimizer_mut(GraphType::General).clear_cache();
        opt.execute_query_with_caching(&q, None, g).unwrap();
    }
    let plan = opt.optimize_query(&Query::with_vector(vec![1.0, 0.0, 0.0]), None, None);
    assert_eq!(plan.params.max_traversal_depth, 4);
}

#[test]
fn relation_centric_depth_cap_survives_adaptive_defaults() {
    let mut opt = optimizer();
    let g = sample_graph();
    record_deep_history(&mut opt, &g);

    let mut query = Query::default();
    query.traversal.edge_types = Some(vec!["located_in".into()]);
    let plan = opt.optimize_query(&query, None, None);
    assert_eq!(plan.pattern, Some(QueryPattern::RelationCentric));
    assert!(plan.params.max_traversal_depth <= 2);
    assert_eq!(plan.query.traversal.max_depth, Some(plan.params.max_traversal_depth));
}

#[test]
fn dense_connectivity_depth_survives_adaptive_defaults() {
    let mut opt = optimizer();
    let g = sample_graph();
    record_deep_history(&mut opt, &g);

    let mut hub = InMemoryGraph::new();
    hub.add_entity("hub", None, Some("concept")).unwrap();
    for i in 0..20 {
        let leaf = format!("leaf{i}");
        hub.add_entity(&leaf, None, None).unwrap();
        hub.add_relation("hub", "links_to", &leaf);
    }
    opt.calculate_entity_importance("hub", &hub);
    assert!(opt.traversal_stats().average_connectivity().unwrap() > 15.0);

    let plan = opt.optimize_query(&Query::with_vector(vec![1.0, 0.0, 0.0]), None, None);
    assert_eq!(plan.params.max_traversal_depth, 2);
    assert_eq!(plan.query.traversal.max_breadth, Some(8));
}

#[test]
fn planning_alone_never_runs_a_learning_cycle() {
    let mut opt = optimizer();
    let g = sample_graph();
    for _ in 0..3 {
        opt.execute_query_with_caching(&Query::with_vector(vec![1.0, 0.0, 0.0]), None, &g)
            .unwrap();
    }
    opt.enable_statistical_learning(true, Some(1));

    let _ = opt.optimize_query(&Query::with_vector(vec![0.0, 1.0, 0.0]), None, Some(&g));
    let state = opt.learning_state();
    assert_eq!(state.last_learning_query_count, 0);
    assert_eq!(state.cycles_completed, 0);
    assert_eq!(state.failure_count, 0.0);

    opt.execute_query_with_caching(&Query::with_vector(vec![0.0, 1.0, 0.0]), None, &g)
        .unwrap();
    assert_eq!(opt.learning_state().last_learning_query_count, 4);
}
