use serde::{Deserialize, Serialize};

use crate::errors::{NeuriteError, NeuriteResult};

/// Unique identifier for a node in the computational graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// Allocation mode for pooled tensor buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocMode {
    /// Contents of the buffer are unspecified (recycled buffers keep old values).
    Default,
    /// Buffer is guaranteed to be zero-filled.
    Clean,
}

/// Full shape of a tensor in NCHW layout: sample count, channels, height, width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    pub n: usize,
    pub c: usize,
    pub h: usize,
    pub w: usize,
}

impl Shape {
    pub fn new(n: usize, c: usize, h: usize, w: usize) -> NeuriteResult<Self> {
        if n == 0 || c == 0 || h == 0 || w == 0 {
            return Err(NeuriteError::InvalidArgument(format!(
                "tensor dimensions must be positive, got ({}, {}, {}, {})",
                n, c, h, w
            )));
        }
        Ok(Shape { n, c, h, w })
    }

    /// Shape of a plain matrix: `rows` samples of `cols` features.
    pub fn matrix(rows: usize, cols: usize) -> NeuriteResult<Self> {
        Shape::new(rows, 1, 1, cols)
    }

    /// Joins a batch size with a per-sample layout.
    pub fn of(n: usize, sample: SampleShape) -> NeuriteResult<Self> {
        Shape::new(n, sample.c, sample.h, sample.w)
    }

    pub fn chw(&self) -> usize {
        self.c * self.h * self.w
    }

    pub fn hw(&self) -> usize {
        self.h * self.w
    }

    pub fn size(&self) -> usize {
        self.n * self.chw()
    }

    pub fn sample(&self) -> SampleShape {
        SampleShape {
            c: self.c,
            h: self.h,
            w: self.w,
        }
    }

    pub fn dims(&self) -> [usize; 4] {
        [self.n, self.c, self.h, self.w]
    }
}

/// Per-sample layout declared by every graph node. The batch dimension is
/// intentionally absent: node contracts are batch-flexible and the actual
/// `N` is taken from the tensor fed to the placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleShape {
    pub c: usize,
    pub h: usize,
    pub w: usize,
}

impl SampleShape {
    pub fn new(c: usize, h: usize, w: usize) -> NeuriteResult<Self> {
        if c == 0 || h == 0 || w == 0 {
            return Err(NeuriteError::InvalidArgument(format!(
                "sample dimensions must be positive, got ({}, {}, {})",
                c, h, w
            )));
        }
        Ok(SampleShape { c, h, w })
    }

    /// Flat feature vector of `len` values.
    pub fn features(len: usize) -> NeuriteResult<Self> {
        SampleShape::new(1, 1, len)
    }

    pub fn chw(&self) -> usize {
        self.c * self.h * self.w
    }

    pub fn hw(&self) -> usize {
        self.h * self.w
    }

    pub fn dims(&self) -> [usize; 3] {
        [self.c, self.h, self.w]
    }
}
