//! Inverted dropout. The training forward samples a keep mask whose
//! surviving entries carry the `1/keep` scale, so the backward pass is a
//! plain mask replay. Inference-mode forward is the identity and lives in
//! the executor.

use ndarray::Zip;
use rand::rngs::StdRng;
use rand::Rng;

use crate::errors::{NeuriteError, NeuriteResult};
use crate::kernels::blas;
use crate::tensor::{Tensor, TensorPool};
use crate::types::AllocMode;

pub const DEFAULT_KEEP: f32 = 0.5;

/// Samples a Bernoulli(keep) mask scaled by `1/keep` and applies it.
/// Returns `(y, mask)`; the mask is retained by the caller for backward.
pub fn forward_train(
    pool: &TensorPool,
    x: &Tensor,
    keep: f32,
    rng: &mut StdRng,
) -> NeuriteResult<(Tensor, Tensor)> {
    if !(keep > 0.0 && keep <= 1.0) {
        return Err(NeuriteError::InvalidArgument(format!(
            "dropout keep probability must be in (0, 1], got {}",
            keep
        )));
    }
    let mut mask = Tensor::like(pool, x, AllocMode::Default)?;
    let scale = 1.0 / keep;
    for v in mask.as_slice_mut() {
        *v = if rng.gen::<f32>() < keep { scale } else { 0.0 };
    }
    let mut out = Tensor::like(pool, x, AllocMode::Default)?;
    Zip::from(out.view_mut())
        .and(x.view())
        .and(mask.view())
        .par_for_each(|o, &xv, &mv| *o = xv * mv);
    Ok((out, mask))
}

/// `dx = dy ∘ mask`.
pub fn backward(pool: &TensorPool, dy: &Tensor, mask: &Tensor) -> NeuriteResult<Tensor> {
    blas::multiply_elementwise(pool, dy, mask)
}
