//! Cache-key fingerprinting.
//!
//! The key never embeds the full query vector: a fixed-size digest (length,
//! moments, and three sample elements) stands in for it, so key cost stays
//! bounded for any embedding dimension.

use sha2::{Digest, Sha256};

use crate::error::CacheError;
use crate::math::VectorMath;

type CacheResult<T> = std::result::Result<T, CacheError>;

/// Inputs that determine a cached result.
#[derive(Debug, Clone, Copy)]
pub struct KeyParams<'a> {
    pub vector: Option<&'a [f64]>,
    pub top_k: usize,
    pub max_depth: usize,
    pub edge_types: &'a [String],
    pub min_similarity: f64,
}

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

fn normalized_edges(edge_types: &[String]) -> String {
    let mut edges: Vec<&str> = edge_types.iter().map(String::as_str).collect();
    edges.sort_unstable();
    edges.dedup();
    edges.join(",")
}

fn finite(value: f64, what: &str) -> CacheResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CacheError::Serialize {
            message: format!("non-finite {what} in cache key"),
        })
    }
}

fn vector_digest(math: &dyn VectorMath, vector: &[f64]) -> CacheResult<String> {
    if vector.is_empty() {
        return Ok("none".into());
    }
    let summary = math.summarize(vector);
    let first = vector[0];
    let mid = vector[vector.len() / 2];
    let last = vector[vector.len() - 1];
    let fields = [
        finite(summary.mean, "vector mean")?,
        finite(summary.min, "vector min")?,
        finite(summary.max, "vector max")?,
        finite(summary.std_dev, "vector std")?,
        finite(first, "vector element")?,
        finite(mid, "vector element")?,
        finite(last, "vector element")?,
    ];
    let rendered: Vec<String> = fields.iter().map(|v| format!("{v:.6}")).collect();
    Ok(format!("{}:{}", vector.len(), rendered.join(":")))
}

/// Precise key, or an error when a component cannot be rendered.
pub fn try_query_key(math: &dyn VectorMath, params: &KeyParams<'_>) -> CacheResult<String> {
    let digest = match params.vector {
        Some(v) => vector_digest(math, v)?,
        None => "none".into(),
    };
    let min_sim = finite(params.min_similarity, "min_similarity")?;
    let canonical = format!(
        "v={digest}|e={}|d={}|k={}|s={min_sim:.6}",
        normalized_edges(params.edge_types),
        params.max_depth,
        params.top_k,
    );
    Ok(sha256_hex(&canonical))
}

/// Coarse key from the fields that always render.
pub fn coarse_query_key(params: &KeyParams<'_>) -> String {
    let canonical = format!(
        "coarse|len={}|e={}|d={}|k={}",
        params.vector.map_or(0, <[f64]>::len),
        normalized_edges(params.edge_types),
        params.max_depth,
        params.top_k,
    );
    sha256_hex(&canonical)
}

/// Stable 64-hex-digit cache key. Never fails; degrades to [`coarse_query_key`].
pub fn get_query_key(math: &dyn VectorMath, params: &KeyParams<'_>) -> String {
    match try_query_key(math, params) {
        Ok(key) => key,
        Err(e) => {
            tracing::debug!(error = %e, "falling back to coarse cache key");
            coarse_query_key(params)
        }
    }
}
