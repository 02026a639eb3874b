//! Statistical analysis over the query performance log.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::LearningError;
use crate::query::TraversalStrategy;
use crate::stats::now_secs;

use super::{LearningOutcome, LearningResult, LearningRule, ParameterAdjustments, RelationStat};

/// Records analysed before any adjustment is proposed.
pub const MIN_ANALYSIS_RECORDS: usize = 5;
/// Samples a depth or top-k bucket needs to be considered.
const MIN_BUCKET_SAMPLES: usize = 2;
/// Samples a strategy needs before a rule is derived for it.
const MIN_RULE_SAMPLES: usize = 5;

/// Outcome of one executed query, as seen by the learning loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPerformanceRecord {
    pub query_id: String,
    pub timestamp: f64,
    pub max_depth: usize,
    pub top_k: usize,
    pub min_similarity: f64,
    #[serde(default)]
    pub strategy: Option<TraversalStrategy>,
    #[serde(default)]
    pub edge_types: Vec<String>,
    pub duration_secs: f64,
    pub results_count: usize,
    pub quality_score: f64,
    pub success: bool,
}

impl QueryPerformanceRecord {
    /// Quality used for aggregation: failures and non-finite scores count as zero.
    fn effective_quality(&self) -> f64 {
        if self.success && self.quality_score.is_finite() {
            self.quality_score.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

#[derive(Default)]
struct Bucket {
    quality: f64,
    samples: usize,
}

impl Bucket {
    fn mean(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.quality / self.samples as f64
        }
    }
}

/// Key of the best-scoring bucket with enough samples; ties go to the smaller key.
fn best_bucket(buckets: &BTreeMap<usize, Bucket>) -> Option<usize> {
    buckets
        .iter()
        .filter(|(_, b)| b.samples >= MIN_BUCKET_SAMPLES)
        .fold(None, |best: Option<(usize, f64)>, (&key, b)| match best {
            Some((_, score)) if score >= b.mean() => best,
            _ => Some((key, b.mean())),
        })
        .map(|(key, _)| key)
}

/// Derive parameter adjustments, relation statistics, and rules from the most
/// recent `recent` records of `log`.
pub fn analyze_performance(
    log: &VecDeque<QueryPerformanceRecord>,
    recent: usize,
) -> LearningResult<LearningOutcome> {
    let take = recent.min(log.len());
    if take < MIN_ANALYSIS_RECORDS {
        return Err(LearningError::InsufficientData {
            available: take,
            required: MIN_ANALYSIS_RECORDS,
        });
    }
    let records: Vec<&QueryPerformanceRecord> = log.iter().skip(log.len() - take).collect();
    if records.iter().all(|r| !r.duration_secs.is_finite()) {
        return Err(LearningError::Analysis {
            message: "no record carries a finite duration".into(),
        });
    }

    let mut by_depth: BTreeMap<usize, Bucket> = BTreeMap::new();
    let mut by_top_k: BTreeMap<usize, Bucket> = BTreeMap::new();
    let mut by_strategy: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    let mut relations: BTreeMap<String, Bucket> = BTreeMap::new();

    for record in &records {
        let quality = record.effective_quality();
        let depth = by_depth.entry(record.max_depth).or_default();
        depth.quality += quality;
        depth.samples += 1;
        let top_k = by_top_k.entry(record.top_k).or_default();
        top_k.quality += quality;
        top_k.samples += 1;

        let strategy = record.strategy.unwrap_or_default().as_str().to_string();
        let entry = by_strategy.entry(strategy).or_insert((0, 0));
        entry.1 += 1;
        if record.success {
            entry.0 += 1;
        }

        for edge in &record.edge_types {
            let bucket = relations.entry(edge.clone()).or_default();
            bucket.quality += quality;
            bucket.samples += 1;
        }
    }

    let successful: Vec<&&QueryPerformanceRecord> = records.iter().filter(|r| r.success).collect();
    let min_similarity = if successful.is_empty() {
        None
    } else {
        let avg_results = successful.iter().map(|r| r.results_count as f64).sum::<f64>()
            / successful.len() as f64;
        let avg_sim =
            successful.iter().map(|r| r.min_similarity).sum::<f64>() / successful.len() as f64;
        if avg_results < 3.0 {
            Some((avg_sim - 0.05).max(0.3))
        } else if avg_results > 20.0 {
            Some((avg_sim + 0.05).min(0.9))
        } else {
            None
        }
    };

    let rules = by_strategy
        .iter()
        .filter(|(_, (_, total))| *total >= MIN_RULE_SAMPLES)
        .map(|(strategy, (ok, total))| LearningRule {
            pattern: format!("strategy={strategy}"),
            action: "prefer_strategy".into(),
            confidence: *ok as f64 / *total as f64,
        })
        .collect();

    let relation_stats = relations
        .into_iter()
        .map(|(name, b)| {
            (
                name,
                RelationStat {
                    usefulness: b.mean(),
                    sample_size: b.samples as u64,
                },
            )
        })
        .collect();

    Ok(LearningOutcome {
        analyzed_queries: take as u64,
        parameter_adjustments: ParameterAdjustments {
            max_traversal_depth: best_bucket(&by_depth),
            max_vector_results: best_bucket(&by_top_k),
            min_similarity,
        },
        relation_stats,
        rules,
        timestamp: now_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(depth: usize, top_k: usize, quality: f64, results: usize) -> QueryPerformanceRecord {
        QueryPerformanceRecord {
            query_id: format!("q-{depth}-{top_k}"),
            timestamp: 0.0,
            max_depth: depth,
            top_k,
            min_similarity: 0.5,
            strategy: Some(TraversalStrategy::BreadthFirst),
            edge_types: vec!["instance_of".into()],
            duration_secs: 0.1,
            results_count: results,
            quality_score: quality,
            success: true,
        }
    }

    #[test]
    fn too_few_records_is_insufficient() {
        let log: VecDeque<_> = (0..3).map(|_| record(2, 5, 0.5, 5)).collect();
        assert!(matches!(
            analyze_performance(&log, 10),
            Err(LearningError::InsufficientData { available: 3, .. })
        ));
    }

    #[test]
    fn picks_best_depth_and_top_k() {
        let mut log = VecDeque::new();
        for _ in 0..3 {
            log.push_back(record(2, 5, 0.4, 5));
            log.push_back(record(3, 8, 0.9, 5));
        }
        let outcome = analyze_performance(&log, 100).unwrap();
        assert_eq!(outcome.analyzed_queries, 6);
        assert_eq!(outcome.parameter_adjustments.max_traversal_depth, Some(3));
        assert_eq!(outcome.parameter_adjustments.max_vector_results, Some(8));
        assert_eq!(outcome.parameter_adjustments.min_similarity, None);
        let rel = &outcome.relation_stats["instance_of"];
        assert_eq!(rel.sample_size, 6);
        assert!((rel.usefulness - 0.65).abs() < 1e-12);
        assert_eq!(outcome.rules.len(), 1);
        assert_eq!(outcome.rules[0].confidence, 1.0);
    }

    #[test]
    fn sparse_results_relax_min_similarity() {
        let log: VecDeque<_> = (0..6).map(|_| record(2, 5, 0.5, 1)).collect();
        let outcome = analyze_performance(&log, 6).unwrap();
        let sim = outcome.parameter_adjustments.min_similarity.unwrap();
        assert!((sim - 0.45).abs() < 1e-12);
    }

    #[test]
    fn only_recent_records_are_analysed() {
        let mut log: VecDeque<_> = (0..10).map(|_| record(1, 3, 1.0, 5)).collect();
        log.extend((0..5).map(|_| record(4, 5, 0.2, 5)));
        let outcome = analyze_performance(&log, 5).unwrap();
        assert_eq!(outcome.parameter_adjustments.max_traversal_depth, Some(4));
    }

    #[test]
    fn non_finite_durations_fail_analysis() {
        let log: VecDeque<_> = (0..5)
            .map(|_| {
                let mut r = record(2, 5, 0.5, 5);
                r.duration_secs = f64::NAN;
                r
            })
            .collect();
        assert!(matches!(
            analyze_performance(&log, 5),
            Err(LearningError::Analysis { .. })
        ));
    }
}
