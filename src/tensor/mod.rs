pub mod pool;
pub use pool::TensorPool;

use ndarray::{Array4, ArrayView2, ArrayView4, ArrayViewMut2, ArrayViewMut4};
use serde::{Deserialize, Serialize};

use crate::errors::{NeuriteError, NeuriteResult};
use crate::types::{AllocMode, Shape};

/// Elementwise tolerance used by [`Tensor::approx_eq`].
pub const EQUALITY_TOLERANCE: f32 = 1e-4;

/// A rank-4 NCHW tensor over a contiguous f32 buffer drawn from a
/// [`TensorPool`]. The handle owns its buffer exclusively; `release` hands
/// the buffer back to the pool and consumes the handle, so a double release
/// cannot be written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tensor {
    data: Array4<f32>,
    shape: Shape,
}

impl Tensor {
    /// Allocates a tensor of `shape` from the pool. `AllocMode::Clean`
    /// guarantees zeroed contents.
    pub fn new(pool: &TensorPool, shape: Shape, mode: AllocMode) -> NeuriteResult<Self> {
        let buf = pool.acquire(shape.size(), mode)?;
        Tensor::from_buffer(shape, buf)
    }

    /// Allocates a tensor with the same shape as `src`.
    pub fn like(pool: &TensorPool, src: &Tensor, mode: AllocMode) -> NeuriteResult<Self> {
        Tensor::new(pool, src.shape, mode)
    }

    /// Copies a flat vector into a pooled tensor of the given shape.
    pub fn from_vec(pool: &TensorPool, shape: Shape, values: &[f32]) -> NeuriteResult<Self> {
        if values.len() != shape.size() {
            return Err(NeuriteError::shapes(&shape.dims(), &[values.len()]));
        }
        let mut buf = pool.acquire(shape.size(), AllocMode::Default)?;
        buf.copy_from_slice(values);
        Tensor::from_buffer(shape, buf)
    }

    /// Copies a row-major matrix into a `(rows, 1, 1, cols)` tensor.
    pub fn from_matrix(pool: &TensorPool, rows: &[Vec<f32>]) -> NeuriteResult<Self> {
        if rows.is_empty() || rows[0].is_empty() {
            return Err(NeuriteError::InvalidArgument(
                "matrix must have at least one row and one column".into(),
            ));
        }
        let cols = rows[0].len();
        if rows.iter().any(|r| r.len() != cols) {
            return Err(NeuriteError::InvalidArgument(
                "matrix rows must all have the same length".into(),
            ));
        }
        let shape = Shape::matrix(rows.len(), cols)?;
        let mut buf = pool.acquire(shape.size(), AllocMode::Default)?;
        for (r, row) in rows.iter().enumerate() {
            buf[r * cols..(r + 1) * cols].copy_from_slice(row);
        }
        Tensor::from_buffer(shape, buf)
    }

    fn from_buffer(shape: Shape, buf: Vec<f32>) -> NeuriteResult<Self> {
        let data = Array4::from_shape_vec((shape.n, shape.c, shape.h, shape.w), buf)
            .map_err(|_| NeuriteError::shapes(&shape.dims(), &[0]))?;
        Ok(Tensor { data, shape })
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.shape.size()
    }

    /// O(1) reshape over the same storage. Consuming `self` keeps the
    /// one-owning-handle-per-buffer rule a compile-time fact.
    pub fn reshape(self, shape: Shape) -> NeuriteResult<Self> {
        if shape.size() != self.shape.size() {
            return Err(NeuriteError::shapes(&shape.dims(), &self.shape.dims()));
        }
        let data = self
            .data
            .into_shape((shape.n, shape.c, shape.h, shape.w))
            .map_err(|_| NeuriteError::shapes(&shape.dims(), &[0]))?;
        Ok(Tensor { data, shape })
    }

    /// Copies the contents of `src` into this tensor; shapes must match.
    pub fn overwrite(&mut self, src: &Tensor) -> NeuriteResult<()> {
        if self.shape != src.shape {
            return Err(NeuriteError::shapes(&self.shape.dims(), &src.shape.dims()));
        }
        self.as_slice_mut().copy_from_slice(src.as_slice());
        Ok(())
    }

    /// Deep copy into a fresh pooled buffer.
    pub fn duplicate(&self, pool: &TensorPool) -> NeuriteResult<Self> {
        let mut copy = Tensor::like(pool, self, AllocMode::Default)?;
        copy.as_slice_mut().copy_from_slice(self.as_slice());
        Ok(copy)
    }

    /// Shape equality plus elementwise agreement within ±1e-4.
    pub fn approx_eq(&self, other: &Tensor) -> bool {
        self.shape == other.shape
            && self
                .as_slice()
                .iter()
                .zip(other.as_slice())
                .all(|(a, b)| (a - b).abs() <= EQUALITY_TOLERANCE)
    }

    /// Returns the backing buffer to the pool.
    pub fn release(self, pool: &TensorPool) {
        pool.recycle(self.data.into_raw_vec());
    }

    /// Copies rows `[start, start + count)` of the batch into a new tensor.
    pub fn slice_batch(&self, pool: &TensorPool, start: usize, count: usize) -> NeuriteResult<Self> {
        if count == 0 || start + count > self.shape.n {
            return Err(NeuriteError::InvalidArgument(format!(
                "batch slice [{}, {}) out of range for {} samples",
                start,
                start + count,
                self.shape.n
            )));
        }
        let chw = self.shape.chw();
        let shape = Shape::new(count, self.shape.c, self.shape.h, self.shape.w)?;
        let mut buf = pool.acquire(shape.size(), AllocMode::Default)?;
        buf.copy_from_slice(&self.as_slice()[start * chw..(start + count) * chw]);
        Tensor::from_buffer(shape, buf)
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    pub fn view_mut(&mut self) -> ArrayViewMut4<'_, f32> {
        self.data.view_mut()
    }

    /// `(N, CHW)` matrix view used by the dense and BLAS kernels.
    pub fn as_matrix(&self) -> ArrayView2<'_, f32> {
        let (n, chw) = (self.shape.n, self.shape.chw());
        self.data
            .view()
            .into_shape((n, chw))
            .expect("pooled NCHW buffers are contiguous")
    }

    pub fn as_matrix_mut(&mut self) -> ArrayViewMut2<'_, f32> {
        let (n, chw) = (self.shape.n, self.shape.chw());
        self.data
            .view_mut()
            .into_shape((n, chw))
            .expect("pooled NCHW buffers are contiguous")
    }

    pub fn as_slice(&self) -> &[f32] {
        self.data
            .as_slice()
            .expect("pooled NCHW buffers are contiguous")
    }

    pub fn as_slice_mut(&mut self) -> &mut [f32] {
        self.data
            .as_slice_mut()
            .expect("pooled NCHW buffers are contiguous")
    }

    /// True when every element is a finite number.
    pub fn is_finite(&self) -> bool {
        self.as_slice().iter().all(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> TensorPool {
        TensorPool::new()
    }

    #[test]
    fn clean_allocation_is_zeroed() {
        let p = pool();
        let t = Tensor::new(&p, Shape::new(2, 3, 4, 5).unwrap(), AllocMode::Clean).unwrap();
        assert_eq!(t.len(), 120);
        assert!(t.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn reshape_requires_matching_product() {
        let p = pool();
        let t = Tensor::new(&p, Shape::new(1, 2, 3, 4).unwrap(), AllocMode::Clean).unwrap();
        let r = t.reshape(Shape::new(1, 1, 4, 6).unwrap()).unwrap();
        assert_eq!(r.shape().dims(), [1, 1, 4, 6]);
        assert!(r.reshape(Shape::new(1, 1, 1, 5).unwrap()).is_err());
    }

    #[test]
    fn approx_eq_tolerance() {
        let p = pool();
        let a = Tensor::from_vec(&p, Shape::matrix(1, 3).unwrap(), &[1.0, 2.0, 3.0]).unwrap();
        let b = Tensor::from_vec(&p, Shape::matrix(1, 3).unwrap(), &[1.00005, 2.0, 3.0]).unwrap();
        let c = Tensor::from_vec(&p, Shape::matrix(1, 3).unwrap(), &[1.1, 2.0, 3.0]).unwrap();
        assert!(a.approx_eq(&b));
        assert!(!a.approx_eq(&c));
    }

    #[test]
    fn release_feeds_the_pool() {
        let p = pool();
        let t = Tensor::new(&p, Shape::matrix(4, 4).unwrap(), AllocMode::Clean).unwrap();
        t.release(&p);
        assert_eq!(p.retained(), 16);
    }

    #[test]
    fn slice_batch_copies_rows() {
        let p = pool();
        let t = Tensor::from_matrix(&p, &[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();
        let s = t.slice_batch(&p, 1, 2).unwrap();
        assert_eq!(s.as_slice(), &[3.0, 4.0, 5.0, 6.0]);
    }
}
