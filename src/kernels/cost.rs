//! Cost functions over `(N, out)` predictions and targets, plus the
//! pre-activation deltas used to seed the backward pass.

use serde::{Deserialize, Serialize};

use super::ensure_same_shape;
use crate::errors::{NeuriteError, NeuriteResult};
use crate::kernels::activation::ActivationKind;
use crate::tensor::{Tensor, TensorPool};
use crate::types::AllocMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostKind {
    /// `½ · Σ (ŷ − y)²` over all entries.
    Quadratic,
    /// `−(1/N) · Σ [y·ln ŷ + (1−y)·ln(1−ŷ)]`, with saturation handling.
    CrossEntropy,
    /// `Σ −ln(ŷ[argmax y])` per sample; pairs with a softmax output.
    LogLikelihood,
}

pub fn cost(yhat: &Tensor, y: &Tensor, kind: CostKind) -> NeuriteResult<f32> {
    ensure_same_shape(yhat, y)?;
    match kind {
        CostKind::Quadratic => {
            let total: f32 = yhat
                .as_slice()
                .iter()
                .zip(y.as_slice())
                .map(|(&p, &t)| (p - t) * (p - t))
                .sum();
            Ok(0.5 * total)
        }
        CostKind::CrossEntropy => {
            let mut total = 0.0f32;
            for (&p, &t) in yhat.as_slice().iter().zip(y.as_slice()) {
                let term = t * p.ln() + (1.0 - t) * (1.0 - p).ln();
                if term.is_nan() {
                    continue; // 0·ln(0) convention
                }
                if term == f32::INFINITY {
                    return Err(NeuriteError::NumericOverflow(
                        "cross-entropy term diverged to +inf".into(),
                    ));
                }
                total += if term == f32::NEG_INFINITY {
                    -f32::MAX
                } else {
                    term
                };
            }
            Ok(-total / yhat.shape().n as f32)
        }
        CostKind::LogLikelihood => {
            let pm = yhat.as_matrix();
            let tm = y.as_matrix();
            let mut total = 0.0f32;
            for (prow, trow) in pm.rows().into_iter().zip(tm.rows()) {
                let label = trow
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                total -= prow[label].ln();
            }
            Ok(total)
        }
    }
}

/// Gradient of the cost with respect to the output layer's pre-activation.
/// For cross-entropy (sigmoid pairing) and log-likelihood (softmax pairing)
/// this collapses to `ŷ − y`; for the quadratic cost it is
/// `(ŷ − y) ∘ f'(ŷ)` and the output activation must be pointwise.
pub fn delta(
    pool: &TensorPool,
    yhat: &Tensor,
    y: &Tensor,
    kind: CostKind,
    activation: Option<ActivationKind>,
) -> NeuriteResult<Tensor> {
    ensure_same_shape(yhat, y)?;
    let mut out = Tensor::like(pool, yhat, AllocMode::Default)?;
    match kind {
        CostKind::Quadratic => {
            let f = activation.ok_or_else(|| {
                NeuriteError::InvalidArgument(
                    "quadratic cost requires a pointwise output activation".into(),
                )
            })?;
            for ((o, &p), &t) in out
                .as_slice_mut()
                .iter_mut()
                .zip(yhat.as_slice())
                .zip(y.as_slice())
            {
                *o = (p - t) * f.derive_from_output(p);
            }
        }
        CostKind::CrossEntropy | CostKind::LogLikelihood => {
            for ((o, &p), &t) in out
                .as_slice_mut()
                .iter_mut()
                .zip(yhat.as_slice())
                .zip(y.as_slice())
            {
                *o = p - t;
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Shape;

    fn t(pool: &TensorPool, rows: usize, cols: usize, v: &[f32]) -> Tensor {
        Tensor::from_vec(pool, Shape::matrix(rows, cols).unwrap(), v).unwrap()
    }

    #[test]
    fn quadratic_of_identical_tensors_is_zero() {
        let pool = TensorPool::new();
        let a = t(&pool, 2, 2, &[0.3, 0.7, 0.9, 0.1]);
        assert_eq!(cost(&a, &a, CostKind::Quadratic).unwrap(), 0.0);
    }

    #[test]
    fn log_likelihood_of_perfect_one_hot_is_zero() {
        let pool = TensorPool::new();
        let onehot = t(&pool, 2, 3, &[1.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(cost(&onehot, &onehot, CostKind::LogLikelihood).unwrap(), 0.0);
    }

    #[test]
    fn cross_entropy_saturation_stays_finite() {
        let pool = TensorPool::new();
        // yhat of exactly 0 against a 1 target produces a -inf term
        let yhat = t(&pool, 1, 2, &[0.0, 1.0]);
        let y = t(&pool, 1, 2, &[1.0, 1.0]);
        let c = cost(&yhat, &y, CostKind::CrossEntropy).unwrap();
        assert!(c.is_finite());
        assert!(c > 1e30);
    }

    #[test]
    fn cross_entropy_skips_nan_terms() {
        let pool = TensorPool::new();
        // 0·ln(0) terms are skipped, leaving a clean contribution
        let yhat = t(&pool, 1, 2, &[0.0, 0.5]);
        let y = t(&pool, 1, 2, &[0.0, 1.0]);
        let c = cost(&yhat, &y, CostKind::CrossEntropy).unwrap();
        assert!((c - 0.5f32.ln().abs()).abs() < 1e-5);
    }
}
