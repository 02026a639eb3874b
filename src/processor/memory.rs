//! In-memory graph processor backed by petgraph.
//!
//! Brute-force cosine search over entity vectors plus BFS expansion along typed
//! edges. Intended for tests, demos, and small embedded graphs.

use std::cell::Cell;
use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde_json::{Map, Value};

use crate::error::ProcessorError;
use crate::math::{VectorMath, scalar::ScalarMath};

use super::{Connection, EntityInfo, GraphProcessor, ProcessorResult, SearchHit};

/// Graph score multiplier applied per hop during expansion.
pub const HOP_DECAY: f64 = 0.8;

#[derive(Debug, Clone)]
struct EntityNode {
    id: String,
    entity_type: Option<String>,
    vector: Option<Vec<f64>>,
    properties: Map<String, Value>,
}

/// Small self-contained graph + vector store.
#[derive(Debug, Default)]
pub struct InMemoryGraph {
    graph: DiGraph<EntityNode, String>,
    node_index: HashMap<String, NodeIndex>,
    dimension: Option<usize>,
    search_calls: Cell<usize>,
    expand_calls: Cell<usize>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_node(&mut self, id: &str) -> NodeIndex {
        if let Some(&idx) = self.node_index.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(EntityNode {
            id: id.to_string(),
            entity_type: None,
            vector: None,
            properties: Map::new(),
        });
        self.node_index.insert(id.to_string(), idx);
        idx
    }

    /// Insert or update an entity. The first vector fixes the index dimension.
    pub fn add_entity(
        &mut self,
        id: &str,
        vector: Option<Vec<f64>>,
        entity_type: Option<&str>,
    ) -> ProcessorResult<()> {
        if let Some(v) = &vector {
            match self.dimension {
                Some(dim) if dim != v.len() => {
                    return Err(ProcessorError::DimensionMismatch {
                        expected: dim,
                        actual: v.len(),
                    });
                }
                None => self.dimension = Some(v.len()),
                _ => {}
            }
        }
        let idx = self.ensure_node(id);
        let node = &mut self.graph[idx];
        if vector.is_some() {
            node.vector = vector;
        }
        if let Some(t) = entity_type {
            node.entity_type = Some(t.to_string());
        }
        Ok(())
    }

    /// Set one property on an entity, creating it if needed.
    pub fn set_property(&mut self, id: &str, key: &str, value: Value) {
        let idx = self.ensure_node(id);
        self.graph[idx].properties.insert(key.to_string(), value);
    }

    /// Add a directed, typed edge. Missing endpoints are created without vectors.
    pub fn add_relation(&mut self, from: &str, relation: &str, to: &str) {
        let a = self.ensure_node(from);
        let b = self.ensure_node(to);
        self.graph.add_edge(a, b, relation.to_string());
    }

    pub fn entity_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn relation_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Number of `search_by_vector` calls served so far.
    pub fn search_calls(&self) -> usize {
        self.search_calls.get()
    }

    /// Number of `expand_by_graph` calls served so far.
    pub fn expand_calls(&self) -> usize {
        self.expand_calls.get()
    }
}

impl GraphProcessor for InMemoryGraph {
    fn search_by_vector(
        &self,
        vector: &[f64],
        top_k: usize,
        min_score: f64,
    ) -> ProcessorResult<Vec<SearchHit>> {
        self.search_calls.set(self.search_calls.get() + 1);
        if let Some(dim) = self.dimension {
            if dim != vector.len() {
                return Err(ProcessorError::DimensionMismatch {
                    expected: dim,
                    actual: vector.len(),
                });
            }
        }

        let math = ScalarMath;
        let mut hits: Vec<SearchHit> = self
            .graph
            .node_weights()
            .filter_map(|node| {
                let v = node.vector.as_ref()?;
                let sim = math.cosine_similarity(vector, v);
                (sim >= min_score).then(|| {
                    let mut hit = SearchHit::seed(node.id.clone(), sim);
                    hit.properties = node.properties.clone();
                    hit
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.vector_score
                .total_cmp(&a.vector_score)
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    fn expand_by_graph(
        &self,
        results: &[SearchHit],
        max_depth: usize,
        edge_types: &[String],
    ) -> ProcessorResult<Vec<SearchHit>> {
        self.expand_calls.set(self.expand_calls.get() + 1);
        let allowed: HashSet<&str> = edge_types.iter().map(String::as_str).collect();

        let mut out: Vec<SearchHit> = Vec::with_capacity(results.len());
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        // BFS queue: (node, hit describing how we reached it)
        let mut queue: VecDeque<(NodeIndex, SearchHit)> = VecDeque::new();

        for seed in results {
            let Some(&idx) = self.node_index.get(&seed.entity_id) else {
                out.push(seed.clone());
                continue;
            };
            if visited.insert(idx) {
                out.push(seed.clone());
                queue.push_back((idx, seed.clone()));
            }
        }

        while let Some((node, hit)) = queue.pop_front() {
            if hit.depth >= max_depth {
                continue;
            }
            for edge in self.graph.edges_directed(node, Direction::Outgoing) {
                if !allowed.is_empty() && !allowed.contains(edge.weight().as_str()) {
                    continue;
                }
                let target = edge.target();
                if !visited.insert(target) {
                    continue;
                }
                let target_node = &self.graph[target];
                let mut path = hit.path.clone();
                path.push(target_node.id.clone());
                let mut relation_types = hit.relation_types.clone();
                relation_types.push(edge.weight().clone());
                let next = SearchHit {
                    entity_id: target_node.id.clone(),
                    score: 0.0,
                    vector_score: 0.0,
                    graph_score: hit.graph_score * HOP_DECAY,
                    depth: hit.depth + 1,
                    path,
                    relation_types,
                    properties: target_node.properties.clone(),
                };
                out.push(next.clone());
                queue.push_back((target, next));
            }
        }
        Ok(out)
    }

    fn get_entity_info(&self, entity_id: &str) -> ProcessorResult<Option<EntityInfo>> {
        let Some(&idx) = self.node_index.get(entity_id) else {
            return Ok(None);
        };
        let node = &self.graph[idx];
        let collect = |direction: Direction| -> Vec<Connection> {
            self.graph
                .edges_directed(idx, direction)
                .map(|e| {
                    let other = match direction {
                        Direction::Outgoing => e.target(),
                        Direction::Incoming => e.source(),
                    };
                    Connection {
                        entity_id: self.graph[other].id.clone(),
                        relation_type: e.weight().clone(),
                    }
                })
                .collect()
        };
        Ok(Some(EntityInfo {
            entity_id: node.id.clone(),
            entity_type: node.entity_type.clone(),
            inbound_connections: collect(Direction::Incoming),
            outbound_connections: collect(Direction::Outgoing),
            properties: node.properties.clone(),
        }))
    }
}
