//! Graph processor capability: the backend the optimizer plans for.
//!
//! The optimizer never owns a vector index or graph store. It calls a
//! [`GraphProcessor`] synchronously from `execute_query`; implementations may
//! wrap a remote service, an embedded database, or the bundled [`InMemoryGraph`].

pub mod memory;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProcessorError;

pub use memory::InMemoryGraph;

pub type ProcessorResult<T> = std::result::Result<T, ProcessorError>;

/// One retrieved entity with its scoring breakdown.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchHit {
    pub entity_id: String,
    /// Final score after ranking.
    pub score: f64,
    /// Similarity to the query vector (0 for graph-only hits).
    pub vector_score: f64,
    /// Structural relevance from graph expansion.
    pub graph_score: f64,
    /// Hops from the nearest vector seed.
    #[serde(default)]
    pub depth: usize,
    /// Entity ids from the seed to this hit, inclusive.
    #[serde(default)]
    pub path: Vec<String>,
    /// Relation types along `path`.
    #[serde(default)]
    pub relation_types: Vec<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl SearchHit {
    /// A vector-search seed.
    pub fn seed(entity_id: impl Into<String>, vector_score: f64) -> Self {
        let entity_id = entity_id.into();
        Self {
            path: vec![entity_id.clone()],
            entity_id,
            score: vector_score,
            vector_score,
            graph_score: 1.0,
            ..Default::default()
        }
    }
}

/// A neighbouring entity and the relation connecting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub entity_id: String,
    pub relation_type: String,
}

/// Structural description of an entity, used for importance scoring.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityInfo {
    pub entity_id: String,
    #[serde(default, rename = "type")]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub inbound_connections: Vec<Connection>,
    #[serde(default)]
    pub outbound_connections: Vec<Connection>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl EntityInfo {
    pub fn connection_count(&self) -> usize {
        self.inbound_connections.len() + self.outbound_connections.len()
    }
}

/// Backend capability consumed by the optimizer.
pub trait GraphProcessor {
    /// Nearest entities to `vector`, at most `top_k`, scoring at least `min_score`.
    fn search_by_vector(
        &self,
        vector: &[f64],
        top_k: usize,
        min_score: f64,
    ) -> ProcessorResult<Vec<SearchHit>>;

    /// Seeds plus everything reachable within `max_depth` hops along `edge_types`
    /// (all edge types when empty).
    fn expand_by_graph(
        &self,
        results: &[SearchHit],
        max_depth: usize,
        edge_types: &[String],
    ) -> ProcessorResult<Vec<SearchHit>>;

    /// Order hits by the weighted combination of vector and graph score.
    fn rank_results(
        &self,
        results: Vec<SearchHit>,
        vector_weight: f64,
        graph_weight: f64,
    ) -> ProcessorResult<Vec<SearchHit>> {
        Ok(weighted_rank(results, vector_weight, graph_weight))
    }

    /// Structural description of one entity, `None` when unknown.
    fn get_entity_info(&self, entity_id: &str) -> ProcessorResult<Option<EntityInfo>>;
}

/// Score each hit as `vw * vector_score + gw * graph_score`, best first.
///
/// Ties keep their incoming order.
pub fn weighted_rank(mut hits: Vec<SearchHit>, vector_weight: f64, graph_weight: f64) -> Vec<SearchHit> {
    for hit in &mut hits {
        hit.score = vector_weight * hit.vector_score + graph_weight * hit.graph_score;
    }
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits
}
