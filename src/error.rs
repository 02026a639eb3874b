//! Rich diagnostic error types for the GraphRAG optimizer.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so callers know exactly what
//! went wrong and how to fix it.
//!
//! Only a handful of these ever reach a query caller: the top-level planning entry
//! points are total and turn internal failures into tagged fallback plans.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the optimizer.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, source spans) through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum OptimizerError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Processor(#[from] ProcessorError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Metrics(#[from] MetricsError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Learning(#[from] LearningError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Query errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum QueryError {
    #[error("invalid query: expected a JSON object, got {found}")]
    #[diagnostic(
        code(graphrag::query::invalid),
        help(
            "A query must be a record such as {{\"query_vector\": [...], \"traversal\": {{...}}}}. \
             Wrap scalar or array input in an object before planning."
        )
    )]
    InvalidQuery { found: String },

    #[error("query vector contains a non-finite value at index {index}")]
    #[diagnostic(
        code(graphrag::query::non_finite_vector),
        help("Embedding vectors must be finite. Check the embedding model output for NaN or Inf.")
    )]
    NonFiniteVector { index: usize },
}

// ---------------------------------------------------------------------------
// Graph processor errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ProcessorError {
    #[error("vector search failed: {message}")]
    #[diagnostic(
        code(graphrag::processor::vector_search),
        help("The vector index rejected the search. Check the vector dimension and index health.")
    )]
    VectorSearch { message: String },

    #[error("graph expansion failed: {message}")]
    #[diagnostic(
        code(graphrag::processor::expansion),
        help("The graph backend failed while expanding seed results. Check edge type names.")
    )]
    Expansion { message: String },

    #[error("result ranking failed: {message}")]
    #[diagnostic(code(graphrag::processor::ranking))]
    Ranking { message: String },

    #[error("entity lookup failed for {entity_id}: {message}")]
    #[diagnostic(
        code(graphrag::processor::entity_lookup),
        help("The graph backend could not describe this entity. Verify the entity id exists.")
    )]
    EntityLookup { entity_id: String, message: String },

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    #[diagnostic(
        code(graphrag::processor::dim_mismatch),
        help("The query vector must have the same dimension as the indexed entity vectors.")
    )]
    DimensionMismatch { expected: usize, actual: usize },
}

// ---------------------------------------------------------------------------
// Cache errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum CacheError {
    #[error("failed to serialize value for caching: {message}")]
    #[diagnostic(
        code(graphrag::cache::serialize),
        help("The result will not be cached; the query itself is unaffected.")
    )]
    Serialize { message: String },

    #[error("failed to decode cached value: {message}")]
    #[diagnostic(
        code(graphrag::cache::decode),
        help("The cached entry is treated as a miss and recomputed.")
    )]
    Decode { message: String },
}

// ---------------------------------------------------------------------------
// Metrics errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum MetricsError {
    #[error("metrics I/O error at {path}")]
    #[diagnostic(
        code(graphrag::metrics::io),
        help("Check that the metrics directory exists and is writable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("metrics encoding error: {message}")]
    #[diagnostic(code(graphrag::metrics::encode))]
    Encode { message: String },

    #[error("no active query to end")]
    #[diagnostic(
        code(graphrag::metrics::no_active_query),
        help("Call `start_query_tracking` before `end_query_tracking`.")
    )]
    NoActiveQuery,
}

// ---------------------------------------------------------------------------
// Learning errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum LearningError {
    #[error("insufficient data for learning: {available} records, need {required}")]
    #[diagnostic(
        code(graphrag::learning::insufficient_data),
        help("Run more queries before the next learning cycle.")
    )]
    InsufficientData { available: usize, required: usize },

    #[error("statistical analysis failed: {message}")]
    #[diagnostic(code(graphrag::learning::analysis))]
    Analysis { message: String },

    #[error("learning circuit breaker is open until {retry_at}")]
    #[diagnostic(
        code(graphrag::learning::circuit_open),
        help("Learning resumes automatically once the backoff interval has elapsed.")
    )]
    CircuitOpen { retry_at: String },
}

// ---------------------------------------------------------------------------
// Learning-state persistence errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StateError {
    #[error("learning state I/O error at {path}")]
    #[diagnostic(
        code(graphrag::state::io),
        help("Check that the snapshot path is readable and its directory writable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse learning state at {path}: {message}")]
    #[diagnostic(
        code(graphrag::state::parse),
        help("The snapshot is corrupt or from an incompatible version. Delete it to start fresh.")
    )]
    Parse { path: String, message: String },

    #[error("failed to encode learning state: {message}")]
    #[diagnostic(code(graphrag::state::encode))]
    Encode { message: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read optimizer config: {path}")]
    #[diagnostic(
        code(graphrag::config::read),
        help("Ensure the config file exists and is valid TOML.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse optimizer config: {path}: {message}")]
    #[diagnostic(
        code(graphrag::config::parse),
        help("Check the TOML syntax in the optimizer config file.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write optimizer config: {path}")]
    #[diagnostic(
        code(graphrag::config::write),
        help("Ensure you have write permissions to the config directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid optimizer config: {message}")]
    #[diagnostic(code(graphrag::config::invalid))]
    Invalid { message: String },
}

/// Convenience alias for optimizer results.
pub type OptimizerResult<T> = std::result::Result<T, OptimizerError>;
