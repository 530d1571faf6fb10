//! Batch normalization in two flavors: per-channel statistics broadcast over
//! the spatial plane (`Spatial`) and per-feature statistics (`PerActivation`).
//! Training forward folds the batch statistics into the running mean and
//! variance with the cumulative-moving-average factor `1/(1 + iteration)`;
//! inference reads the stored statistics without touching them.

use serde::{Deserialize, Serialize};

use crate::errors::{NeuriteError, NeuriteResult};
use crate::tensor::{Tensor, TensorPool};
use crate::types::{AllocMode, SampleShape, Shape};

pub const EPSILON: f32 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormMode {
    /// Statistics per channel, over N·H·W elements each.
    Spatial,
    /// Statistics per (C, H, W) position, over N elements each.
    PerActivation,
}

impl NormMode {
    /// Length of the γ/β/μ/σ² parameter vectors for a given sample layout.
    pub fn parameter_len(self, sample: SampleShape) -> usize {
        match self {
            NormMode::Spatial => sample.c,
            NormMode::PerActivation => sample.chw(),
        }
    }
}

/// Batch statistics captured by the training forward pass, consumed by the
/// backward pass.
pub struct BatchStats {
    pub mean: Tensor,
    pub variance: Tensor,
}

fn check_params(x: &Tensor, params: &[&Tensor], mode: NormMode) -> NeuriteResult<usize> {
    let len = mode.parameter_len(x.shape().sample());
    for p in params {
        let ps = p.shape();
        if ps.n != 1 || ps.chw() != len {
            return Err(NeuriteError::shapes(&[1, 1, 1, len], &ps.dims()));
        }
    }
    Ok(len)
}

/// Population mean and variance per statistic group.
fn batch_statistics(x: &Tensor, mode: NormMode, len: usize) -> (Vec<f32>, Vec<f32>) {
    let xs = x.shape();
    let mut mean = vec![0.0f64; len];
    let mut sq = vec![0.0f64; len];
    match mode {
        NormMode::Spatial => {
            let xv = x.view();
            let m = (xs.n * xs.hw()) as f64;
            for n in 0..xs.n {
                for c in 0..xs.c {
                    for i in 0..xs.h {
                        for j in 0..xs.w {
                            let v = xv[[n, c, i, j]] as f64;
                            mean[c] += v;
                            sq[c] += v * v;
                        }
                    }
                }
            }
            for s in 0..len {
                mean[s] /= m;
                sq[s] = sq[s] / m - mean[s] * mean[s];
            }
        }
        NormMode::PerActivation => {
            let xm = x.as_matrix();
            let m = xs.n as f64;
            for row in xm.rows() {
                for (s, &v) in row.iter().enumerate() {
                    let v = v as f64;
                    mean[s] += v;
                    sq[s] += v * v;
                }
            }
            for s in 0..len {
                mean[s] /= m;
                sq[s] = sq[s] / m - mean[s] * mean[s];
            }
        }
    }
    (
        mean.into_iter().map(|v| v as f32).collect(),
        sq.into_iter().map(|v| v.max(0.0) as f32).collect(),
    )
}

fn normalize(
    pool: &TensorPool,
    x: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    mean: &[f32],
    variance: &[f32],
    mode: NormMode,
) -> NeuriteResult<Tensor> {
    let xs = x.shape();
    let g = gamma.as_slice();
    let b = beta.as_slice();
    let std: Vec<f32> = variance.iter().map(|v| (v + EPSILON).sqrt()).collect();
    let mut out = Tensor::like(pool, x, AllocMode::Default)?;
    match mode {
        NormMode::Spatial => {
            let xv = x.view();
            let mut ov = out.view_mut();
            for n in 0..xs.n {
                for c in 0..xs.c {
                    for i in 0..xs.h {
                        for j in 0..xs.w {
                            let xhat = (xv[[n, c, i, j]] - mean[c]) / std[c];
                            ov[[n, c, i, j]] = g[c] * xhat + b[c];
                        }
                    }
                }
            }
        }
        NormMode::PerActivation => {
            let xm = x.as_matrix();
            let mut om = out.as_matrix_mut();
            for n in 0..xs.n {
                for s in 0..mean.len() {
                    let xhat = (xm[[n, s]] - mean[s]) / std[s];
                    om[[n, s]] = g[s] * xhat + b[s];
                }
            }
        }
    }
    Ok(out)
}

/// Training-mode forward: normalize with batch statistics, then fold them
/// into the running mean/variance and advance the iteration counter.
pub fn forward_train(
    pool: &TensorPool,
    x: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    running_mean: &mut Tensor,
    running_variance: &mut Tensor,
    iteration: &mut u64,
    mode: NormMode,
) -> NeuriteResult<(Tensor, BatchStats)> {
    let len = check_params(x, &[gamma, beta, running_mean, running_variance], mode)?;
    let (mean, variance) = batch_statistics(x, mode, len);
    let out = normalize(pool, x, gamma, beta, &mean, &variance, mode)?;

    let factor = 1.0 / (1.0 + *iteration as f32);
    for (rm, &m) in running_mean.as_slice_mut().iter_mut().zip(&mean) {
        *rm += (m - *rm) * factor;
    }
    for (rv, &v) in running_variance.as_slice_mut().iter_mut().zip(&variance) {
        *rv += (v - *rv) * factor;
    }
    *iteration += 1;

    let stats = BatchStats {
        mean: Tensor::from_vec(pool, Shape::matrix(1, len)?, &mean)?,
        variance: Tensor::from_vec(pool, Shape::matrix(1, len)?, &variance)?,
    };
    Ok((out, stats))
}

/// Inference-mode forward: normalize with the stored running statistics.
pub fn forward_infer(
    pool: &TensorPool,
    x: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    mean: &Tensor,
    variance: &Tensor,
    mode: NormMode,
) -> NeuriteResult<Tensor> {
    check_params(x, &[gamma, beta, mean, variance], mode)?;
    normalize(pool, x, gamma, beta, mean.as_slice(), variance.as_slice(), mode)
}

/// Standard batchnorm gradient decomposition. Returns `(dx, dJdγ, dJdβ)`.
pub fn backward(
    pool: &TensorPool,
    x: &Tensor,
    dy: &Tensor,
    gamma: &Tensor,
    stats: &BatchStats,
    mode: NormMode,
) -> NeuriteResult<(Tensor, Tensor, Tensor)> {
    super::ensure_same_shape(x, dy)?;
    let len = check_params(x, &[gamma], mode)?;
    let xs = x.shape();
    let g = gamma.as_slice();
    let mean = stats.mean.as_slice();
    let std: Vec<f32> = stats
        .variance
        .as_slice()
        .iter()
        .map(|v| (v + EPSILON).sqrt())
        .collect();
    let m = match mode {
        NormMode::Spatial => (xs.n * xs.hw()) as f32,
        NormMode::PerActivation => xs.n as f32,
    };

    // First sweep: per-group sums of dy and dy·x̂.
    let mut sum_dy = vec![0.0f32; len];
    let mut sum_dy_xhat = vec![0.0f32; len];
    {
        let xv = x.view();
        let gv = dy.view();
        match mode {
            NormMode::Spatial => {
                for n in 0..xs.n {
                    for c in 0..xs.c {
                        for i in 0..xs.h {
                            for j in 0..xs.w {
                                let xhat = (xv[[n, c, i, j]] - mean[c]) / std[c];
                                sum_dy[c] += gv[[n, c, i, j]];
                                sum_dy_xhat[c] += gv[[n, c, i, j]] * xhat;
                            }
                        }
                    }
                }
            }
            NormMode::PerActivation => {
                let xm = x.as_matrix();
                let gm = dy.as_matrix();
                for n in 0..xs.n {
                    for s in 0..len {
                        let xhat = (xm[[n, s]] - mean[s]) / std[s];
                        sum_dy[s] += gm[[n, s]];
                        sum_dy_xhat[s] += gm[[n, s]] * xhat;
                    }
                }
            }
        }
    }

    // Second sweep: dx_i = γ/(m·σ) · (m·dy_i − Σdy − x̂_i·Σ(dy·x̂)).
    let mut dx = Tensor::like(pool, x, AllocMode::Default)?;
    {
        let xv = x.view();
        let gv = dy.view();
        match mode {
            NormMode::Spatial => {
                let mut dv = dx.view_mut();
                for n in 0..xs.n {
                    for c in 0..xs.c {
                        for i in 0..xs.h {
                            for j in 0..xs.w {
                                let xhat = (xv[[n, c, i, j]] - mean[c]) / std[c];
                                dv[[n, c, i, j]] = g[c] / (m * std[c])
                                    * (m * gv[[n, c, i, j]] - sum_dy[c] - xhat * sum_dy_xhat[c]);
                            }
                        }
                    }
                }
            }
            NormMode::PerActivation => {
                let xm = x.as_matrix();
                let gm = dy.as_matrix();
                let mut dm = dx.as_matrix_mut();
                for n in 0..xs.n {
                    for s in 0..len {
                        let xhat = (xm[[n, s]] - mean[s]) / std[s];
                        dm[[n, s]] = g[s] / (m * std[s])
                            * (m * gm[[n, s]] - sum_dy[s] - xhat * sum_dy_xhat[s]);
                    }
                }
            }
        }
    }

    let dgamma = Tensor::from_vec(pool, Shape::matrix(1, len)?, &sum_dy_xhat)?;
    let dbeta = Tensor::from_vec(pool, Shape::matrix(1, len)?, &sum_dy)?;
    Ok((dx, dgamma, dbeta))
}
