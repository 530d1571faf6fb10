//! Matrix kernels over the `(N, CHW)` views of rank-4 tensors.

use ndarray::linalg::general_mat_mul;
use ndarray::Zip;

use super::ensure_same_shape;
use crate::errors::{NeuriteError, NeuriteResult};
use crate::tensor::{Tensor, TensorPool};
use crate::types::{AllocMode, Shape};

/// `y[j, i] = x[i, j]`.
pub fn transpose(pool: &TensorPool, x: &Tensor) -> NeuriteResult<Tensor> {
    let xm = x.as_matrix();
    let mut out = Tensor::new(
        pool,
        Shape::matrix(xm.ncols(), xm.nrows())?,
        AllocMode::Default,
    )?;
    out.as_matrix_mut().assign(&xm.t());
    Ok(out)
}

/// Standard matrix product with optional operand transposition, the shape
/// precondition being `lhs.cols == rhs.rows` after transposition.
#[tracing::instrument(skip_all, name = "kernel_matmul")]
pub fn multiply_t(
    pool: &TensorPool,
    a: &Tensor,
    b: &Tensor,
    trans_a: bool,
    trans_b: bool,
) -> NeuriteResult<Tensor> {
    let am = a.as_matrix();
    let bm = b.as_matrix();
    let lhs = if trans_a { am.t() } else { am };
    let rhs = if trans_b { bm.t() } else { bm };
    if lhs.ncols() != rhs.nrows() {
        return Err(NeuriteError::shapes(
            &[lhs.nrows(), lhs.ncols()],
            &[rhs.nrows(), rhs.ncols()],
        ));
    }
    // Clean output: general_mat_mul scales the destination by beta.
    let mut out = Tensor::new(
        pool,
        Shape::matrix(lhs.nrows(), rhs.ncols())?,
        AllocMode::Clean,
    )?;
    {
        let mut om = out.as_matrix_mut();
        general_mat_mul(1.0, &lhs, &rhs, 0.0, &mut om);
    }
    Ok(out)
}

pub fn multiply(pool: &TensorPool, a: &Tensor, b: &Tensor) -> NeuriteResult<Tensor> {
    multiply_t(pool, a, b, false, false)
}

/// Hadamard product over identically shaped tensors.
pub fn multiply_elementwise(pool: &TensorPool, a: &Tensor, b: &Tensor) -> NeuriteResult<Tensor> {
    ensure_same_shape(a, b)?;
    let mut out = Tensor::like(pool, a, AllocMode::Default)?;
    Zip::from(out.view_mut())
        .and(a.view())
        .and(b.view())
        .par_for_each(|o, &x, &y| *o = x * y);
    Ok(out)
}

/// Per-element sum of any number of equally shaped inputs.
pub fn sum(pool: &TensorPool, inputs: &[&Tensor]) -> NeuriteResult<Tensor> {
    let first = inputs.first().ok_or_else(|| {
        NeuriteError::InvalidArgument("sum requires at least one input tensor".into())
    })?;
    for t in &inputs[1..] {
        ensure_same_shape(first, t)?;
    }
    let mut out = first.duplicate(pool)?;
    for t in &inputs[1..] {
        accumulate(&mut out, t)?;
    }
    Ok(out)
}

pub fn subtract(pool: &TensorPool, a: &Tensor, b: &Tensor) -> NeuriteResult<Tensor> {
    ensure_same_shape(a, b)?;
    let mut out = Tensor::like(pool, a, AllocMode::Default)?;
    Zip::from(out.view_mut())
        .and(a.view())
        .and(b.view())
        .par_for_each(|o, &x, &y| *o = x - y);
    Ok(out)
}

/// In-place `dst += src`, used for gradient fan-in.
pub fn accumulate(dst: &mut Tensor, src: &Tensor) -> NeuriteResult<()> {
    ensure_same_shape(dst, src)?;
    Zip::from(dst.view_mut())
        .and(src.view())
        .par_for_each(|d, &s| *d += s);
    Ok(())
}

/// Column sum of the `(N, CHW)` view into a `(1, 1, 1, CHW)` tensor.
pub fn column_sum(pool: &TensorPool, x: &Tensor) -> NeuriteResult<Tensor> {
    let xm = x.as_matrix();
    let mut out = Tensor::new(pool, Shape::matrix(1, xm.ncols())?, AllocMode::Clean)?;
    {
        let mut om = out.as_matrix_mut();
        for row in xm.rows() {
            om.row_mut(0).zip_mut_with(&row, |o, &v| *o += v);
        }
    }
    Ok(out)
}
