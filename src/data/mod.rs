//! Batched dataset containers. A [`Dataset`] is an ordered collection of
//! `(X, Y)` batches with a stable, order-independent content id, the
//! cross-shuffle used between epochs, and partition helpers for
//! training/validation/test splits.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::errors::{NeuriteError, NeuriteResult};
use crate::tensor::{Tensor, TensorPool};
use crate::types::{AllocMode, SampleShape, Shape};

/// One training sample: input features and target features.
pub type SamplePair = (Vec<f32>, Vec<f32>);

/// A mini-batch: `x` has the graph's input shape, `y` the output shape,
/// both with the same sample count.
pub struct Batch {
    pub x: Tensor,
    pub y: Tensor,
}

impl Batch {
    pub fn samples(&self) -> usize {
        self.x.shape().n
    }
}

pub struct Dataset {
    batches: Vec<Batch>,
    input_shape: SampleShape,
    output_features: usize,
}

impl Dataset {
    /// Packs a sample collection into batches of up to `batch_size`. All
    /// inputs must match `input_shape`; the output feature count is taken
    /// from the first sample.
    pub fn from_samples(
        pool: &TensorPool,
        samples: &[SamplePair],
        input_shape: SampleShape,
        batch_size: usize,
    ) -> NeuriteResult<Self> {
        if samples.is_empty() {
            return Err(NeuriteError::InvalidArgument(
                "dataset needs at least one sample".into(),
            ));
        }
        if batch_size == 0 {
            return Err(NeuriteError::InvalidArgument(
                "batch size must be positive".into(),
            ));
        }
        let in_features = input_shape.chw();
        let out_features = samples[0].1.len();
        if out_features == 0 {
            return Err(NeuriteError::InvalidArgument(
                "samples need at least one output feature".into(),
            ));
        }
        for (i, (x, y)) in samples.iter().enumerate() {
            if x.len() != in_features || y.len() != out_features {
                return Err(NeuriteError::InvalidArgument(format!(
                    "sample {} has {}/{} features, expected {}/{}",
                    i,
                    x.len(),
                    y.len(),
                    in_features,
                    out_features
                )));
            }
        }

        let mut batches = Vec::with_capacity(samples.len().div_ceil(batch_size));
        for chunk in samples.chunks(batch_size) {
            let n = chunk.len();
            let mut x = Tensor::new(
                pool,
                Shape::of(n, input_shape)?,
                AllocMode::Default,
            )?;
            let mut y = Tensor::new(
                pool,
                Shape::matrix(n, out_features)?,
                AllocMode::Default,
            )?;
            {
                let xs = x.as_slice_mut();
                let ys = y.as_slice_mut();
                for (r, (sx, sy)) in chunk.iter().enumerate() {
                    xs[r * in_features..(r + 1) * in_features].copy_from_slice(sx);
                    ys[r * out_features..(r + 1) * out_features].copy_from_slice(sy);
                }
            }
            batches.push(Batch { x, y });
        }
        Ok(Dataset {
            batches,
            input_shape,
            output_features: out_features,
        })
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    pub fn batch(&self, index: usize) -> Option<&Batch> {
        self.batches.get(index)
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Total sample count across batches.
    pub fn count(&self) -> usize {
        self.batches.iter().map(Batch::samples).sum()
    }

    pub fn input_shape(&self) -> SampleShape {
        self.input_shape
    }

    pub fn input_features(&self) -> usize {
        self.input_shape.chw()
    }

    pub fn output_features(&self) -> usize {
        self.output_features
    }

    /// Order-independent content identity: SHA-256 per batch side, XOR of
    /// the `(xHash ⊕ yHash)` pairs folded to 64 bits. Two datasets holding
    /// the same batches in any order share the id.
    pub fn content_id(&self) -> u64 {
        let mut folded = [0u8; 32];
        for batch in &self.batches {
            let hx = digest(&batch.x);
            let hy = digest(&batch.y);
            for i in 0..32 {
                folded[i] ^= hx[i] ^ hy[i];
            }
        }
        u64::from_le_bytes(folded[..8].try_into().expect("digest is 32 bytes"))
    }

    /// Epoch shuffle: within consecutive batch pairs, swap individual
    /// samples with probability one half, then shuffle the batch order.
    pub fn cross_shuffle(&mut self, rng: &mut StdRng) {
        let mut pair = 0;
        while pair + 1 < self.batches.len() {
            let (left, right) = self.batches.split_at_mut(pair + 1);
            let a = &mut left[pair];
            let b = &mut right[0];
            let rows = a.samples().min(b.samples());
            for row in 0..rows {
                if rng.gen::<bool>() {
                    swap_rows(&mut a.x, &mut b.x, row);
                    swap_rows(&mut a.y, &mut b.y, row);
                }
            }
            pair += 2;
        }
        self.batches.shuffle(rng);
    }

    pub fn release(self, pool: &TensorPool) {
        for batch in self.batches {
            batch.x.release(pool);
            batch.y.release(pool);
        }
    }
}

fn digest(t: &Tensor) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for v in t.as_slice() {
        hasher.update(v.to_le_bytes());
    }
    hasher.finalize().into()
}

fn swap_rows(a: &mut Tensor, b: &mut Tensor, row: usize) {
    let chw = a.shape().chw();
    let (asl, bsl) = (a.as_slice_mut(), b.as_slice_mut());
    for k in row * chw..(row + 1) * chw {
        std::mem::swap(&mut asl[k], &mut bsl[k]);
    }
}

/// Splits a sample collection into training/validation/test slices by
/// fraction. Fractions must be non-negative and sum below one; empty
/// partitions come back as empty slices.
pub fn partition(
    samples: &[SamplePair],
    validation: f32,
    test: f32,
) -> NeuriteResult<(&[SamplePair], &[SamplePair], &[SamplePair])> {
    if !(0.0..1.0).contains(&validation)
        || !(0.0..1.0).contains(&test)
        || validation + test >= 1.0
    {
        return Err(NeuriteError::InvalidArgument(format!(
            "partition fractions ({}, {}) must be in [0, 1) and sum below 1",
            validation, test
        )));
    }
    let total = samples.len();
    let val_len = (total as f32 * validation).round() as usize;
    let test_len = (total as f32 * test).round() as usize;
    let train_len = total - val_len - test_len;
    if train_len == 0 {
        return Err(NeuriteError::InvalidArgument(
            "partition leaves no training samples".into(),
        ));
    }
    let (train, rest) = samples.split_at(train_len);
    let (val, test) = rest.split_at(val_len);
    Ok((train, val, test))
}
