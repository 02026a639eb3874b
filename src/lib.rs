// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # graphrag-optimizer
//!
//! A query optimizer for GraphRAG retrieval: hybrid queries that combine
//! vector similarity search with knowledge-graph traversal.
//!
//! ## Architecture
//!
//! - **Unified optimizer** (`unified`): graph-type detection, entity importance,
//!   plan assembly, execution, and learning-state persistence
//! - **Rewriter** (`rewrite`): predicate pushdown, selectivity ordering,
//!   pattern- and domain-specific traversal tuning
//! - **Base optimizer** (`optimizer`): adaptive defaults, TTL + capacity
//!   bounded result cache, fingerprinted cache keys
//! - **Budgets** (`budget`): per-resource limits from complexity, priority, and history
//! - **Learning** (`learning`): statistical learning cycle behind a circuit breaker
//! - **Metrics** (`metrics`): hierarchical phase timers, health checks, JSON/CSV export
//! - **Processor** (`processor`): the backend capability queries execute against
//!
//! ## Library usage
//!
//! ```no_run
//! use graphrag_optimizer::processor::InMemoryGraph;
//! use graphrag_optimizer::query::Query;
//! use graphrag_optimizer::unified::UnifiedOptimizer;
//!
//! let mut graph = InMemoryGraph::new();
//! graph.add_entity("sun", Some(vec![1.0, 0.0]), Some("concept")).unwrap();
//! graph.add_entity("star", Some(vec![0.8, 0.2]), Some("concept")).unwrap();
//! graph.add_relation("sun", "instance_of", "star");
//!
//! let mut optimizer = UnifiedOptimizer::default();
//! let query = Query::with_vector(vec![1.0, 0.0]);
//! let plan = optimizer.optimize_query(&query, None, Some(&graph));
//! let run = optimizer.execute_query_with_caching(&query, None, &graph).unwrap();
//! println!("{} results via {}", run.results.len(), plan.graph_type);
//! ```

pub mod budget;
pub mod config;
pub mod error;
pub mod learning;
pub mod math;
pub mod metrics;
pub mod optimizer;
pub mod probe;
pub mod processor;
pub mod query;
pub mod rewrite;
pub mod stats;
pub mod traversal_stats;
pub mod unified;
