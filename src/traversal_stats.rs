//! Cross-query statistics about which graph paths and relations were useful.
//!
//! Owned by one optimizer instance and passed by reference to the rewriter.
//! Only an explicit [`TraversalStats::reset`] clears it.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

/// Weight of a new observation in the rolling scores.
pub const ROLLING_ALPHA: f64 = 0.3;

/// Paths kept in `paths_explored`.
pub const MAX_EXPLORED_PATHS: usize = 1000;

/// One explored path with the score it earned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExploredPath {
    pub path: Vec<String>,
    pub score: f64,
}

/// Rolling usefulness of a relation type.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RelationScore {
    pub score: f64,
    pub samples: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraversalStats {
    pub paths_explored: VecDeque<ExploredPath>,
    /// Path key (`a -> b -> c`) → rolling score.
    pub path_scores: HashMap<String, f64>,
    pub entity_frequency: HashMap<String, u64>,
    /// Entity → last observed connection count.
    pub entity_connectivity: HashMap<String, u64>,
    pub relation_usefulness: HashMap<String, RelationScore>,
}

/// Exponential moving average; the first sample is taken as-is.
fn roll(previous: Option<f64>, sample: f64) -> f64 {
    match previous {
        Some(prev) => (1.0 - ROLLING_ALPHA) * prev + ROLLING_ALPHA * sample,
        None => sample,
    }
}

pub fn path_key(path: &[String]) -> String {
    path.join(" -> ")
}

impl TraversalStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold the outcome of one traversal path into the statistics.
    pub fn record_path_performance(
        &mut self,
        path: &[String],
        score: f64,
        relation_types: Option<&[String]>,
    ) {
        if path.is_empty() || !score.is_finite() {
            return;
        }
        let score = score.clamp(0.0, 1.0);

        self.paths_explored.push_back(ExploredPath {
            path: path.to_vec(),
            score,
        });
        while self.paths_explored.len() > MAX_EXPLORED_PATHS {
            self.paths_explored.pop_front();
        }

        let key = path_key(path);
        let rolled = roll(self.path_scores.get(&key).copied(), score);
        self.path_scores.insert(key, rolled);

        for entity in path {
            *self.entity_frequency.entry(entity.clone()).or_insert(0) += 1;
        }

        if let Some(relations) = relation_types {
            for relation in relations {
                self.update_relation_usefulness(relation, score);
            }
        }
    }

    pub fn update_relation_usefulness(&mut self, relation: &str, score: f64) {
        if !score.is_finite() {
            return;
        }
        let entry = self.relation_usefulness.entry(relation.to_string()).or_default();
        entry.score = roll((entry.samples > 0).then_some(entry.score), score.clamp(0.0, 1.0));
        entry.samples += 1;
    }

    pub fn record_entity_connectivity(&mut self, entity_id: &str, connections: u64) {
        self.entity_connectivity.insert(entity_id.to_string(), connections);
    }

    /// Mean connection count over observed entities, `None` before any observation.
    pub fn average_connectivity(&self) -> Option<f64> {
        if self.entity_connectivity.is_empty() {
            return None;
        }
        let total: u64 = self.entity_connectivity.values().sum();
        Some(total as f64 / self.entity_connectivity.len() as f64)
    }

    /// The `n` best-scoring path keys, best first.
    pub fn top_paths(&self, n: usize) -> Vec<(String, f64)> {
        let mut paths: Vec<(String, f64)> =
            self.path_scores.iter().map(|(k, &v)| (k.clone(), v)).collect();
        paths.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        paths.truncate(n);
        paths
    }

    pub fn relation_score(&self, relation: &str) -> Option<f64> {
        self.relation_usefulness.get(relation).map(|r| r.score)
    }

    /// Relations ordered by usefulness, best first.
    pub fn ranked_relations(&self) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .relation_usefulness
            .iter()
            .map(|(k, r)| (k.clone(), r.score))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }

    pub fn is_empty(&self) -> bool {
        self.paths_explored.is_empty()
            && self.relation_usefulness.is_empty()
            && self.entity_connectivity.is_empty()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn path_scores_roll() {
        let mut stats = TraversalStats::new();
        let path = p(&["a", "b"]);
        stats.record_path_performance(&path, 1.0, None);
        assert_eq!(stats.path_scores["a -> b"], 1.0);
        stats.record_path_performance(&path, 0.0, None);
        assert!((stats.path_scores["a -> b"] - 0.7).abs() < 1e-12);
        assert_eq!(stats.entity_frequency["a"], 2);
        assert_eq!(stats.paths_explored.len(), 2);
    }

    #[test]
    fn relation_usefulness_tracks_samples() {
        let mut stats = TraversalStats::new();
        let rels = p(&["instance_of"]);
        stats.record_path_performance(&p(&["a", "b"]), 0.8, Some(&rels));
        stats.update_relation_usefulness("instance_of", 0.2);
        let r = stats.relation_usefulness["instance_of"];
        assert_eq!(r.samples, 2);
        assert!((r.score - (0.7 * 0.8 + 0.3 * 0.2)).abs() < 1e-12);
    }

    #[test]
    fn explored_paths_are_bounded() {
        let mut stats = TraversalStats::new();
        for i in 0..(MAX_EXPLORED_PATHS + 5) {
            stats.record_path_performance(&p(&["x", i.to_string().as_str()]), 0.5, None);
        }
        assert_eq!(stats.paths_explored.len(), MAX_EXPLORED_PATHS);
    }

    #[test]
    fn empty_or_nan_paths_are_ignored() {
        let mut stats = TraversalStats::new();
        stats.record_path_performance(&[], 1.0, None);
        stats.record_path_performance(&p(&["a"]), f64::NAN, None);
        assert!(stats.is_empty());
    }

    #[test]
    fn average_connectivity_and_ranking() {
        let mut stats = TraversalStats::new();
        assert!(stats.average_connectivity().is_none());
        stats.record_entity_connectivity("a", 10);
        stats.record_entity_connectivity("b", 20);
        assert_eq!(stats.average_connectivity(), Some(15.0));

        stats.update_relation_usefulness("x", 0.2);
        stats.update_relation_usefulness("y", 0.9);
        assert_eq!(stats.ranked_relations()[0].0, "y");

        stats.reset();
        assert!(stats.is_empty());
    }
}
