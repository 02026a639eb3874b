//! Pure-Rust scalar implementation of the vector math kernels.
//!
//! Serves as the reference implementation for correctness testing.

use super::{VectorMath, VectorMathKind};

/// Scalar `f64` kernels.
#[derive(Debug, Clone, Copy)]
pub struct ScalarMath;

impl VectorMath for ScalarMath {
    fn kind(&self) -> VectorMathKind {
        VectorMathKind::Scalar
    }

    fn mean(&self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        values.iter().sum::<f64>() / values.len() as f64
    }

    fn std_dev(&self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        let mean = self.mean(values);
        let variance =
            values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
        variance.sqrt()
    }

    fn min_max(&self, values: &[f64]) -> (f64, f64) {
        if values.is_empty() {
            return (0.0, 0.0);
        }
        values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }

    fn dot(&self, a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }

    fn cosine_similarity(&self, a: &[f64], b: &[f64]) -> f64 {
        let mut dot = 0.0;
        let mut norm_a = 0.0;
        let mut norm_b = 0.0;
        for (&av, &bv) in a.iter().zip(b.iter()) {
            dot += av * bv;
            norm_a += av * av;
            norm_b += bv * bv;
        }
        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom == 0.0 || !denom.is_finite() {
            return 0.0;
        }
        (dot / denom).clamp(-1.0, 1.0)
    }

    fn percentile(&self, values: &[f64], p: f64) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
        if sorted.is_empty() {
            return 0.0;
        }
        sorted.sort_by(|a, b| a.total_cmp(b));
        let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
        let lower = rank.floor() as usize;
        let upper = rank.ceil() as usize;
        let frac = rank - lower as f64;
        sorted[lower] + (sorted[upper] - sorted[lower]) * frac
    }
}
