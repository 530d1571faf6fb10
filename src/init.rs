//! Parameter initializers. Weight scales follow the LeCun / Glorot / He
//! families over the layer fan; biases start at zero or from a Gaussian;
//! batch normalization starts at γ = 1, β = 0, μ = 0, σ² = 1.

use ndarray_rand::rand_distr::{Distribution, Normal, Uniform};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::errors::{NeuriteError, NeuriteResult};
use crate::tensor::{Tensor, TensorPool};
use crate::types::{AllocMode, Shape};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightInit {
    LeCunUniform,
    LeCunNormal,
    GlorotUniform,
    GlorotNormal,
    HeUniform,
    HeNormal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BiasInit {
    Zero,
    Gaussian { stddev: f32 },
}

fn fill_uniform(t: &mut Tensor, bound: f32, rng: &mut StdRng) {
    let dist = Uniform::new(-bound, bound);
    for v in t.as_slice_mut() {
        *v = dist.sample(rng);
    }
}

fn fill_normal(t: &mut Tensor, stddev: f32, rng: &mut StdRng) -> NeuriteResult<()> {
    let dist = Normal::new(0.0f32, stddev).map_err(|_| {
        NeuriteError::InvalidArgument(format!("invalid Gaussian stddev {}", stddev))
    })?;
    for v in t.as_slice_mut() {
        *v = dist.sample(rng);
    }
    Ok(())
}

fn sample_weights(
    pool: &TensorPool,
    shape: Shape,
    fan_in: usize,
    fan_out: usize,
    init: WeightInit,
    rng: &mut StdRng,
) -> NeuriteResult<Tensor> {
    let (fan_in, fan_out) = (fan_in as f32, fan_out as f32);
    let mut t = Tensor::new(pool, shape, AllocMode::Default)?;
    match init {
        WeightInit::LeCunUniform => fill_uniform(&mut t, (3.0 / fan_in).sqrt(), rng),
        WeightInit::LeCunNormal => fill_normal(&mut t, (1.0 / fan_in).sqrt(), rng)?,
        WeightInit::GlorotUniform => {
            fill_uniform(&mut t, (6.0 / (fan_in + fan_out)).sqrt(), rng)
        }
        WeightInit::GlorotNormal => {
            fill_normal(&mut t, (2.0 / (fan_in + fan_out)).sqrt(), rng)?
        }
        WeightInit::HeUniform => fill_uniform(&mut t, (6.0 / fan_in).sqrt(), rng),
        WeightInit::HeNormal => fill_normal(&mut t, (2.0 / fan_in).sqrt(), rng)?,
    }
    Ok(t)
}

/// Dense weights `(in, 1, 1, out)`.
pub fn dense_weights(
    pool: &TensorPool,
    inputs: usize,
    outputs: usize,
    init: WeightInit,
    rng: &mut StdRng,
) -> NeuriteResult<Tensor> {
    sample_weights(
        pool,
        Shape::new(inputs, 1, 1, outputs)?,
        inputs,
        outputs,
        init,
        rng,
    )
}

/// Convolution kernels `(K, C, Kh, Kw)`; fan is taken over the receptive
/// field: `fan_in = C·Kh·Kw`, `fan_out = K·Kh·Kw`.
pub fn convolution_kernels(
    pool: &TensorPool,
    kernel_count: usize,
    channels: usize,
    kh: usize,
    kw: usize,
    init: WeightInit,
    rng: &mut StdRng,
) -> NeuriteResult<Tensor> {
    sample_weights(
        pool,
        Shape::new(kernel_count, channels, kh, kw)?,
        channels * kh * kw,
        kernel_count * kh * kw,
        init,
        rng,
    )
}

/// Bias vector `(1, 1, 1, len)`.
pub fn biases(
    pool: &TensorPool,
    len: usize,
    init: BiasInit,
    rng: &mut StdRng,
) -> NeuriteResult<Tensor> {
    match init {
        BiasInit::Zero => Tensor::new(pool, Shape::matrix(1, len)?, AllocMode::Clean),
        BiasInit::Gaussian { stddev } => {
            if !(stddev > 0.0) {
                return Err(NeuriteError::InvalidArgument(format!(
                    "Gaussian bias stddev must be positive, got {}",
                    stddev
                )));
            }
            let mut t = Tensor::new(pool, Shape::matrix(1, len)?, AllocMode::Default)?;
            fill_normal(&mut t, stddev, rng)?;
            Ok(t)
        }
    }
}

/// γ = 1, β = 0, running μ = 0, running σ² = 1.
pub fn batchnorm_parameters(
    pool: &TensorPool,
    len: usize,
) -> NeuriteResult<(Tensor, Tensor, Tensor, Tensor)> {
    let shape = Shape::matrix(1, len)?;
    let mut gamma = Tensor::new(pool, shape, AllocMode::Default)?;
    gamma.as_slice_mut().iter_mut().for_each(|v| *v = 1.0);
    let beta = Tensor::new(pool, shape, AllocMode::Clean)?;
    let mean = Tensor::new(pool, shape, AllocMode::Clean)?;
    let mut variance = Tensor::new(pool, shape, AllocMode::Default)?;
    variance.as_slice_mut().iter_mut().for_each(|v| *v = 1.0);
    Ok((gamma, beta, mean, variance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn lecun_uniform_respects_fan_bound() {
        let pool = TensorPool::new();
        let mut rng = StdRng::seed_from_u64(3);
        let w = dense_weights(&pool, 48, 8, WeightInit::LeCunUniform, &mut rng).unwrap();
        let bound = (3.0f32 / 48.0).sqrt();
        assert!(w.as_slice().iter().all(|v| v.abs() <= bound));
        assert_eq!(w.shape().dims(), [48, 1, 1, 8]);
    }

    #[test]
    fn batchnorm_parameters_start_at_identity() {
        let pool = TensorPool::new();
        let (gamma, beta, mean, var) = batchnorm_parameters(&pool, 5).unwrap();
        assert!(gamma.as_slice().iter().all(|&v| v == 1.0));
        assert!(beta.as_slice().iter().all(|&v| v == 0.0));
        assert!(mean.as_slice().iter().all(|&v| v == 0.0));
        assert!(var.as_slice().iter().all(|&v| v == 1.0));
    }
}
