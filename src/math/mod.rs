//! Vector math kernels used for query digests and similarity scoring.
//!
//! This module provides a `VectorMath` trait with two implementations:
//!
//! - **Scalar**: pure-Rust reference implementation, works everywhere
//! - **Disabled**: placeholder that returns zeros, for deployments that must not
//!   spend cycles on vector statistics (digests degrade to length-only keys)
//!
//! [`select_math`] returns the implementation for a configured [`VectorMathKind`].

pub mod scalar;

use serde::{Deserialize, Serialize};

/// Which vector math backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorMathKind {
    /// Pure-Rust scalar operations.
    #[default]
    Scalar,
    /// No vector statistics; every reduction yields zero.
    Disabled,
}

impl std::fmt::Display for VectorMathKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorMathKind::Scalar => write!(f, "scalar"),
            VectorMathKind::Disabled => write!(f, "disabled"),
        }
    }
}

/// Compact statistics over a numeric vector.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VectorSummary {
    pub len: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
}

/// Numeric kernels over `f64` slices.
///
/// Implementations must be total: empty input yields zeros, never a panic.
pub trait VectorMath: Send + Sync {
    /// The backend this kernel implements.
    fn kind(&self) -> VectorMathKind;

    /// Arithmetic mean.
    fn mean(&self, values: &[f64]) -> f64;

    /// Population standard deviation.
    fn std_dev(&self, values: &[f64]) -> f64;

    /// Minimum and maximum, `(0.0, 0.0)` for empty input.
    fn min_max(&self, values: &[f64]) -> (f64, f64);

    /// Dot product over the common prefix of `a` and `b`.
    fn dot(&self, a: &[f64], b: &[f64]) -> f64;

    /// Cosine similarity in `[-1.0, 1.0]`, `0.0` when either norm is zero.
    fn cosine_similarity(&self, a: &[f64], b: &[f64]) -> f64;

    /// Linear-interpolated percentile (`p` in `[0, 100]`).
    fn percentile(&self, values: &[f64], p: f64) -> f64;

    /// All summary statistics in one pass-friendly call.
    fn summarize(&self, values: &[f64]) -> VectorSummary {
        let (min, max) = self.min_max(values);
        VectorSummary {
            len: values.len(),
            mean: self.mean(values),
            min,
            max,
            std_dev: self.std_dev(values),
        }
    }
}

/// Placeholder kernel: every reduction is zero.
#[derive(Debug, Clone, Copy)]
pub struct DisabledMath;

impl VectorMath for DisabledMath {
    fn kind(&self) -> VectorMathKind {
        VectorMathKind::Disabled
    }

    fn mean(&self, _values: &[f64]) -> f64 {
        0.0
    }

    fn std_dev(&self, _values: &[f64]) -> f64 {
        0.0
    }

    fn min_max(&self, _values: &[f64]) -> (f64, f64) {
        (0.0, 0.0)
    }

    fn dot(&self, _a: &[f64], _b: &[f64]) -> f64 {
        0.0
    }

    fn cosine_similarity(&self, _a: &[f64], _b: &[f64]) -> f64 {
        0.0
    }

    fn percentile(&self, _values: &[f64], _p: f64) -> f64 {
        0.0
    }
}

/// Return the kernel for the configured backend.
pub fn select_math(kind: VectorMathKind) -> Box<dyn VectorMath> {
    match kind {
        VectorMathKind::Scalar => Box::new(scalar::ScalarMath),
        VectorMathKind::Disabled => Box::new(DisabledMath),
    }
}
