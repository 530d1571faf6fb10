//! CPU compute kernels. Every kernel allocates its output from the caller's
//! [`TensorPool`](crate::tensor::TensorPool), validates shapes up front, and
//! parallelizes across the sample axis only.

pub mod activation;
pub mod batchnorm;
pub mod blas;
pub mod convolution;
pub mod cost;
pub mod dense;
pub mod dropout;
pub mod pooling;
pub mod softmax;

use crate::errors::{NeuriteError, NeuriteResult};
use crate::tensor::Tensor;

pub(crate) fn ensure_same_shape(a: &Tensor, b: &Tensor) -> NeuriteResult<()> {
    if a.shape() != b.shape() {
        return Err(NeuriteError::shapes(&a.shape().dims(), &b.shape().dims()));
    }
    Ok(())
}
