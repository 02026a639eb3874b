//! Entity importance scoring.
//!
//! Score in `[0, 1]`: 30% connections, 20% references, 20% category,
//! 15% mentions, 15% recency. Counts are log-scaled against a saturation
//! point; recency decays linearly over a year.

use chrono::DateTime;
use serde_json::Value;

use crate::processor::EntityInfo;

pub const CONNECTION_WEIGHT: f64 = 0.3;
pub const REFERENCE_WEIGHT: f64 = 0.2;
pub const CATEGORY_WEIGHT: f64 = 0.2;
pub const MENTION_WEIGHT: f64 = 0.15;
pub const RECENCY_WEIGHT: f64 = 0.15;

/// Counts at which the log-scaled components reach 1.0.
const CONNECTION_SATURATION: f64 = 100.0;
const REFERENCE_SATURATION: f64 = 1000.0;
const MENTION_SATURATION: f64 = 100.0;

const RECENCY_WINDOW_SECS: f64 = 365.0 * 86_400.0;
/// Used when an entity carries no timestamp.
const UNKNOWN_RECENCY: f64 = 0.5;
const DEFAULT_CATEGORY_IMPORTANCE: f64 = 0.5;

/// `ln(1 + count) / ln(1 + saturation)`, capped at 1.
fn log_scaled(count: f64, saturation: f64) -> f64 {
    if !count.is_finite() || count <= 0.0 {
        return 0.0;
    }
    (count.ln_1p() / saturation.ln_1p()).min(1.0)
}

pub fn category_importance(category: &str) -> f64 {
    match category.to_ascii_lowercase().as_str() {
        "concept" | "class" => 0.9,
        "person" | "organization" | "organisation" => 0.8,
        "location" | "place" | "event" => 0.7,
        "work" | "publication" | "case" => 0.6,
        "document" | "file" | "block" => 0.4,
        _ => DEFAULT_CATEGORY_IMPORTANCE,
    }
}

/// Count-like property: a number, or the length of an array.
fn count_property(info: &EntityInfo, names: &[&str]) -> Option<f64> {
    names.iter().find_map(|name| match info.properties.get(*name)? {
        Value::Number(n) => n.as_f64(),
        Value::Array(items) => Some(items.len() as f64),
        _ => None,
    })
}

/// Epoch seconds from a numeric or RFC 3339 property.
fn timestamp_property(info: &EntityInfo) -> Option<f64> {
    ["last_modified", "updated_at", "timestamp", "created_at"]
        .iter()
        .find_map(|name| match info.properties.get(*name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.timestamp() as f64),
            _ => None,
        })
}

fn recency(info: &EntityInfo, now: f64) -> f64 {
    match timestamp_property(info) {
        Some(ts) if ts.is_finite() => {
            let age = (now - ts).max(0.0);
            (1.0 - age / RECENCY_WINDOW_SECS).max(0.0)
        }
        _ => UNKNOWN_RECENCY,
    }
}

/// Importance of one entity at time `now`.
pub fn score_entity(info: &EntityInfo, now: f64) -> f64 {
    let connections = log_scaled(info.connection_count() as f64, CONNECTION_SATURATION);
    let references = log_scaled(
        count_property(info, &["reference_count", "references", "citations"])
            .unwrap_or(info.inbound_connections.len() as f64),
        REFERENCE_SATURATION,
    );
    let category = info
        .entity_type
        .as_deref()
        .or_else(|| info.properties.get("category").and_then(Value::as_str))
        .map_or(DEFAULT_CATEGORY_IMPORTANCE, category_importance);
    let mentions = log_scaled(
        count_property(info, &["mention_count", "mentions"]).unwrap_or(0.0),
        MENTION_SATURATION,
    );
    let recency = recency(info, now);

    let score = CONNECTION_WEIGHT * connections
        + REFERENCE_WEIGHT * references
        + CATEGORY_WEIGHT * category
        + MENTION_WEIGHT * mentions
        + RECENCY_WEIGHT * recency;
    score.clamp(0.0, 1.0)
}
