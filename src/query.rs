//! Query data model: an open, partially-specified record.
//!
//! Known fields are typed; everything else is carried through untouched in
//! `extra` maps. Parsing from JSON is lenient: wrongly-typed known fields are
//! dropped instead of rejecting the whole query, and only a non-object top
//! level is an error.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::QueryError;

pub type QueryResult<T> = std::result::Result<T, QueryError>;

pub const DEFAULT_MAX_VECTOR_RESULTS: usize = 5;
pub const DEFAULT_MIN_SIMILARITY: f64 = 0.5;
pub const DEFAULT_MAX_DEPTH: usize = 2;

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Caller-assigned importance of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Parse case-insensitively; anything unrecognized is `Normal`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Priority::Low,
            "high" => Priority::High,
            "critical" => Priority::Critical,
            _ => Priority::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of knowledge graph a query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphType {
    #[default]
    General,
    Wikipedia,
    Ipld,
}

impl GraphType {
    /// Parse an explicit graph-type tag. Unknown tags yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" => Some(GraphType::General),
            "wikipedia" | "wikidata" | "dbpedia" => Some(GraphType::Wikipedia),
            "ipld" | "ipfs" => Some(GraphType::Ipld),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GraphType::General => "general",
            GraphType::Wikipedia => "wikipedia",
            GraphType::Ipld => "ipld",
        }
    }
}

impl std::fmt::Display for GraphType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the graph backend should walk from seed entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraversalStrategy {
    #[default]
    Default,
    BreadthFirst,
    DepthFirst,
    Sampling,
    BreadthLimited,
    Bidirectional,
    EntityFocused,
    RelationCentric,
    Hierarchical,
}

impl TraversalStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        let parsed = match s.trim().to_ascii_lowercase().as_str() {
            "default" => TraversalStrategy::Default,
            "breadth_first" | "bfs" => TraversalStrategy::BreadthFirst,
            "depth_first" | "dfs" => TraversalStrategy::DepthFirst,
            "sampling" => TraversalStrategy::Sampling,
            "breadth_limited" => TraversalStrategy::BreadthLimited,
            "bidirectional" => TraversalStrategy::Bidirectional,
            "entity_focused" => TraversalStrategy::EntityFocused,
            "relation_centric" => TraversalStrategy::RelationCentric,
            "hierarchical" => TraversalStrategy::Hierarchical,
            _ => return None,
        };
        Some(parsed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TraversalStrategy::Default => "default",
            TraversalStrategy::BreadthFirst => "breadth_first",
            TraversalStrategy::DepthFirst => "depth_first",
            TraversalStrategy::Sampling => "sampling",
            TraversalStrategy::BreadthLimited => "breadth_limited",
            TraversalStrategy::Bidirectional => "bidirectional",
            TraversalStrategy::EntityFocused => "entity_focused",
            TraversalStrategy::RelationCentric => "relation_centric",
            TraversalStrategy::Hierarchical => "hierarchical",
        }
    }
}

impl std::fmt::Display for TraversalStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Parameters pushed down into the vector search stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    /// Entity types the vector index should restrict itself to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_type_filter: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Graph traversal parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraversalSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<TraversalStrategy>,
    /// Maximum neighbours expanded per node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_breadth: Option<usize>,
    /// Fraction of neighbours visited under the sampling strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hierarchical_weight: Option<f64>,
    /// Historically high-scoring paths offered to the backend as hints.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_hints: Vec<String>,
    /// Entities scoring below this are pruned from expansion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prune_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub important_entities: Vec<String>,
    /// `[source, target]` for fact verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub find_path_between: Option<(String, String)>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TraversalSpec {
    pub fn edge_types(&self) -> &[String] {
        self.edge_types.as_deref().unwrap_or(&[])
    }

    pub fn depth_or_default(&self) -> usize {
        self.max_depth.unwrap_or(DEFAULT_MAX_DEPTH)
    }
}

/// A hybrid vector + graph query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_vector: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_vector_results: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_similarity: Option<f64>,
    #[serde(default)]
    pub traversal: TraversalSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// Explicit graph-type tag; wins over keyword detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_type: Option<String>,
    #[serde(default, skip_serializing_if = "is_default_vector_params")]
    pub vector_params: VectorParams,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_default_vector_params(p: &VectorParams) -> bool {
    *p == VectorParams::default()
}

/// Limits applied by [`Query::validated`].
#[derive(Debug, Clone, Copy)]
pub struct QueryLimits {
    pub max_traversal_depth: usize,
    pub max_vector_results: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_traversal_depth: 10,
            max_vector_results: 100,
        }
    }
}

impl Query {
    /// Vector-only query with default traversal.
    pub fn with_vector(vector: Vec<f64>) -> Self {
        Self {
            query_vector: Some(vector),
            ..Default::default()
        }
    }

    pub fn has_vector(&self) -> bool {
        self.query_vector.as_ref().is_some_and(|v| !v.is_empty())
    }

    pub fn top_k(&self) -> usize {
        self.max_vector_results.unwrap_or(DEFAULT_MAX_VECTOR_RESULTS)
    }

    pub fn min_similarity_or_default(&self) -> f64 {
        self.min_similarity.unwrap_or(DEFAULT_MIN_SIMILARITY)
    }

    /// Leniently parse a JSON value.
    ///
    /// Returns [`QueryError::InvalidQuery`] only when `value` is not an object.
    pub fn from_value(value: &Value) -> QueryResult<Self> {
        let Value::Object(map) = value else {
            return Err(QueryError::InvalidQuery {
                found: json_kind(value).to_string(),
            });
        };

        let mut query = Query::default();
        for (key, field) in map {
            match key.as_str() {
                "query_vector" => query.query_vector = take_f64_array(key, field),
                "query_text" => query.query_text = take_string(key, field),
                "max_vector_results" => query.max_vector_results = take_usize(key, field),
                "min_similarity" => query.min_similarity = take_f64(key, field),
                "traversal" => query.traversal = parse_traversal(field),
                "entity_ids" => query.entity_ids = take_string_array(key, field).unwrap_or_default(),
                "entity_types" => {
                    query.entity_types = take_string_array(key, field).unwrap_or_default()
                }
                "priority" => query.priority = take_string(key, field).map(|s| Priority::parse(&s)),
                "graph_type" => query.graph_type = take_string(key, field),
                "vector_params" => query.vector_params = parse_vector_params(field),
                _ => {
                    query.extra.insert(key.clone(), field.clone());
                }
            }
        }
        Ok(query)
    }

    /// Serialize back to JSON. Infallible for this type.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }

    /// Fill defaults and clamp numeric fields into range.
    ///
    /// Rejects only vectors containing NaN or infinite components.
    pub fn validated(&self, limits: &QueryLimits) -> QueryResult<Self> {
        if let Some(vector) = &self.query_vector {
            if let Some(index) = vector.iter().position(|v| !v.is_finite()) {
                return Err(QueryError::NonFiniteVector { index });
            }
        }

        let mut q = self.clone();
        q.max_vector_results = Some(
            q.max_vector_results
                .unwrap_or(DEFAULT_MAX_VECTOR_RESULTS)
                .clamp(1, limits.max_vector_results.max(1)),
        );
        q.min_similarity = Some(match q.min_similarity {
            Some(s) if s.is_finite() => s.clamp(0.0, 1.0),
            _ => DEFAULT_MIN_SIMILARITY,
        });
        q.traversal.max_depth = Some(
            q.traversal
                .max_depth
                .unwrap_or(DEFAULT_MAX_DEPTH)
                .clamp(1, limits.max_traversal_depth.max(1)),
        );
        let mut seen = std::collections::HashSet::new();
        let edge_types: Vec<String> = q
            .traversal
            .edge_types()
            .iter()
            .filter(|e| seen.insert((*e).clone()))
            .cloned()
            .collect();
        q.traversal.edge_types = Some(edge_types);
        if let Some(ratio) = q.traversal.sample_ratio {
            q.traversal.sample_ratio = Some(if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 1.0 });
        }
        Ok(q)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn dropped(key: &str, value: &Value) {
    tracing::debug!(field = key, kind = json_kind(value), "dropping mistyped query field");
}

fn take_string(key: &str, value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => {
            dropped(key, other);
            None
        }
    }
}

fn take_f64(key: &str, value: &Value) -> Option<f64> {
    match value.as_f64() {
        Some(v) => Some(v),
        None => {
            if !value.is_null() {
                dropped(key, value);
            }
            None
        }
    }
}

fn take_usize(key: &str, value: &Value) -> Option<usize> {
    if let Some(v) = value.as_u64() {
        return Some(v as usize);
    }
    // Accept integral floats such as 5.0 and saturate negatives at zero.
    match value.as_f64() {
        Some(v) if v.is_finite() => Some(v.max(0.0).round() as usize),
        _ => {
            if !value.is_null() {
                dropped(key, value);
            }
            None
        }
    }
}

fn take_f64_array(key: &str, value: &Value) -> Option<Vec<f64>> {
    let Value::Array(items) = value else {
        if !value.is_null() {
            dropped(key, value);
        }
        return None;
    };
    let parsed: Option<Vec<f64>> = items.iter().map(Value::as_f64).collect();
    if parsed.is_none() {
        dropped(key, value);
    }
    parsed
}

fn take_string_array(key: &str, value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
        ),
        Value::String(s) => Some(vec![s.clone()]),
        other => {
            if !other.is_null() {
                dropped(key, other);
            }
            None
        }
    }
}

fn parse_traversal(value: &Value) -> TraversalSpec {
    let Value::Object(map) = value else {
        dropped("traversal", value);
        return TraversalSpec::default();
    };
    let mut spec = TraversalSpec::default();
    for (key, field) in map {
        match key.as_str() {
            "max_depth" => spec.max_depth = take_usize(key, field),
            "edge_types" => spec.edge_types = take_string_array(key, field),
            "strategy" => {
                spec.strategy = take_string(key, field).and_then(|s| TraversalStrategy::parse(&s))
            }
            "max_breadth" => spec.max_breadth = take_usize(key, field),
            "sample_ratio" => spec.sample_ratio = take_f64(key, field),
            "hierarchical_weight" => spec.hierarchical_weight = take_f64(key, field),
            "path_hints" => spec.path_hints = take_string_array(key, field).unwrap_or_default(),
            "prune_threshold" => spec.prune_threshold = take_f64(key, field),
            "important_entities" => {
                spec.important_entities = take_string_array(key, field).unwrap_or_default()
            }
            "find_path_between" => {
                spec.find_path_between = take_string_array(key, field).and_then(|pair| {
                    match pair.as_slice() {
                        [a, b] => Some((a.clone(), b.clone())),
                        _ => None,
                    }
                })
            }
            _ => {
                spec.extra.insert(key.clone(), field.clone());
            }
        }
    }
    spec
}

fn parse_vector_params(value: &Value) -> VectorParams {
    let Value::Object(map) = value else {
        dropped("vector_params", value);
        return VectorParams::default();
    };
    let mut params = VectorParams::default();
    for (key, field) in map {
        match key.as_str() {
            "top_k" => params.top_k = take_usize(key, field),
            "min_score" => params.min_score = take_f64(key, field),
            "entity_type_filter" => {
                params.entity_type_filter = take_string_array(key, field).unwrap_or_default()
            }
            _ => {
                params.extra.insert(key.clone(), field.clone());
            }
        }
    }
    params
}
