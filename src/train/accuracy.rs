//! Accuracy predicates. Classifier runs use the argmax match; regression
//! and multi-label runs use the elementwise threshold or distance forms.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::errors::{NeuriteError, NeuriteResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AccuracyKind {
    /// `argmax(ŷ) == argmax(y)`.
    Argmax,
    /// Every output lands on the same side of the threshold as its target.
    Threshold(f32),
    /// Every output lies within the given distance of its target.
    Distance(f32),
}

impl AccuracyKind {
    pub fn validate(&self) -> NeuriteResult<()> {
        match self {
            AccuracyKind::Argmax => Ok(()),
            AccuracyKind::Threshold(t) => {
                if !(0.0..1.0).contains(t) || *t <= 0.0 {
                    return Err(NeuriteError::InvalidArgument(format!(
                        "accuracy threshold must lie in (0, 1), got {}",
                        t
                    )));
                }
                Ok(())
            }
            AccuracyKind::Distance(d) => {
                if !(*d > 0.0) {
                    return Err(NeuriteError::InvalidArgument(format!(
                        "accuracy distance must be positive, got {}",
                        d
                    )));
                }
                Ok(())
            }
        }
    }

    pub(crate) fn matches(&self, yhat: ArrayView1<'_, f32>, y: ArrayView1<'_, f32>) -> bool {
        match self {
            AccuracyKind::Argmax => argmax(yhat) == argmax(y),
            AccuracyKind::Threshold(t) => yhat
                .iter()
                .zip(y.iter())
                .all(|(&p, &target)| (p > *t) == (target > *t)),
            AccuracyKind::Distance(d) => yhat
                .iter()
                .zip(y.iter())
                .all(|(&p, &target)| (p - target).abs() < *d),
        }
    }
}

fn argmax(row: ArrayView1<'_, f32>) -> usize {
    row.iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}
