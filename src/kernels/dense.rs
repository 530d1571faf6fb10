//! Fully-connected kernels: `y = x·W + b` and the three backward products.
//! Weights are `(in, 1, 1, out)`, biases `(1, 1, 1, out)`.

use crate::errors::{NeuriteError, NeuriteResult};
use crate::kernels::blas;
use crate::tensor::{Tensor, TensorPool};

pub fn forward(
    pool: &TensorPool,
    x: &Tensor,
    weights: &Tensor,
    biases: &Tensor,
) -> NeuriteResult<Tensor> {
    let (w, b) = (weights.shape(), biases.shape());
    if x.shape().chw() != w.n || b.n != 1 || b.chw() != w.w {
        return Err(NeuriteError::shapes(
            &[x.shape().chw(), 1, w.w],
            &[w.n, b.n, b.chw()],
        ));
    }
    let mut out = blas::multiply(pool, x, weights)?;
    {
        let mut om = out.as_matrix_mut();
        let bm = biases.as_matrix();
        om += &bm.row(0);
    }
    Ok(out)
}

/// `dx = dy · Wᵀ`.
pub fn backward_data(pool: &TensorPool, dy: &Tensor, weights: &Tensor) -> NeuriteResult<Tensor> {
    blas::multiply_t(pool, dy, weights, false, true)
}

/// `dJdw = xᵀ · dy`.
pub fn backward_filter(pool: &TensorPool, x: &Tensor, dy: &Tensor) -> NeuriteResult<Tensor> {
    blas::multiply_t(pool, x, dy, true, false)
}

/// `dJdb = column-sum(dy)`.
pub fn backward_bias(pool: &TensorPool, dy: &Tensor) -> NeuriteResult<Tensor> {
    blas::column_sum(pool, dy)
}
