//! 2D convolution kernels: valid padding, stride 1. Inputs are
//! `(N, C, H, W)`, kernels `(K, C, Kh, Kw)`, biases `(1, 1, 1, K)`. Work is
//! partitioned across samples (forward, backward-data) or across output
//! kernels (backward-filter).

use ndarray::parallel::prelude::*;

use crate::errors::{NeuriteError, NeuriteResult};
use crate::tensor::{Tensor, TensorPool};
use crate::types::{AllocMode, Shape};

/// Per-sample cross-correlation over the input channels, bias added per
/// output kernel. Output is `(N, K, H−Kh+1, W−Kw+1)`.
#[tracing::instrument(skip_all, name = "kernel_conv2d")]
pub fn forward(
    pool: &TensorPool,
    x: &Tensor,
    kernels: &Tensor,
    biases: &Tensor,
) -> NeuriteResult<Tensor> {
    let xs = x.shape();
    let ks = kernels.shape();
    let bs = biases.shape();
    if ks.c != xs.c || xs.h < ks.h || xs.w < ks.w {
        return Err(NeuriteError::shapes(&xs.dims(), &ks.dims()));
    }
    if bs.n != 1 || bs.chw() != ks.n {
        return Err(NeuriteError::shapes(&[1, 1, 1, ks.n], &bs.dims()));
    }
    let (oh, ow) = (xs.h - ks.h + 1, xs.w - ks.w + 1);
    let mut out = Tensor::new(pool, Shape::new(xs.n, ks.n, oh, ow)?, AllocMode::Default)?;
    {
        let xv = x.view();
        let kv = kernels.view();
        let bv = biases.as_slice();
        out.view_mut()
            .outer_iter_mut()
            .into_par_iter()
            .zip(xv.outer_iter().into_par_iter())
            .for_each(|(mut on, xn)| {
                for k in 0..ks.n {
                    for i in 0..oh {
                        for j in 0..ow {
                            let mut acc = bv[k];
                            for c in 0..xs.c {
                                for u in 0..ks.h {
                                    for v in 0..ks.w {
                                        acc += xn[[c, i + u, j + v]] * kv[[k, c, u, v]];
                                    }
                                }
                            }
                            on[[k, i, j]] = acc;
                        }
                    }
                }
            });
    }
    Ok(out)
}

/// Full convolution of `dy` with the 180°-flipped kernels, yielding the
/// gradient with respect to the layer input.
#[tracing::instrument(skip_all, name = "kernel_conv2d_bwd_data")]
pub fn backward_data(pool: &TensorPool, dy: &Tensor, kernels: &Tensor) -> NeuriteResult<Tensor> {
    let gs = dy.shape();
    let ks = kernels.shape();
    if gs.c != ks.n {
        return Err(NeuriteError::shapes(&[ks.n], &[gs.c]));
    }
    let (h, w) = (gs.h + ks.h - 1, gs.w + ks.w - 1);
    let mut out = Tensor::new(pool, Shape::new(gs.n, ks.c, h, w)?, AllocMode::Default)?;
    {
        let gv = dy.view();
        let kv = kernels.view();
        out.view_mut()
            .outer_iter_mut()
            .into_par_iter()
            .zip(gv.outer_iter().into_par_iter())
            .for_each(|(mut on, gn)| {
                for c in 0..ks.c {
                    for p in 0..h {
                        for q in 0..w {
                            let mut acc = 0.0;
                            for k in 0..ks.n {
                                for u in 0..ks.h {
                                    if p < u || p - u >= gs.h {
                                        continue;
                                    }
                                    for v in 0..ks.w {
                                        if q < v || q - v >= gs.w {
                                            continue;
                                        }
                                        acc += gn[[k, p - u, q - v]] * kv[[k, c, u, v]];
                                    }
                                }
                            }
                            on[[c, p, q]] = acc;
                        }
                    }
                }
            });
    }
    Ok(out)
}

/// Cross-correlation of the inputs with `dy`, accumulated over the batch,
/// yielding the kernel gradient `(K, C, Kh, Kw)`.
#[tracing::instrument(skip_all, name = "kernel_conv2d_bwd_filter")]
pub fn backward_filter(pool: &TensorPool, x: &Tensor, dy: &Tensor) -> NeuriteResult<Tensor> {
    let xs = x.shape();
    let gs = dy.shape();
    if xs.n != gs.n || xs.h < gs.h || xs.w < gs.w {
        return Err(NeuriteError::shapes(&xs.dims(), &gs.dims()));
    }
    let (kh, kw) = (xs.h - gs.h + 1, xs.w - gs.w + 1);
    let mut out = Tensor::new(pool, Shape::new(gs.c, xs.c, kh, kw)?, AllocMode::Default)?;
    {
        let xv = x.view();
        let gv = dy.view();
        out.view_mut()
            .outer_iter_mut()
            .into_par_iter()
            .enumerate()
            .for_each(|(k, mut ok)| {
                for c in 0..xs.c {
                    for u in 0..kh {
                        for v in 0..kw {
                            let mut acc = 0.0;
                            for n in 0..xs.n {
                                for i in 0..gs.h {
                                    for j in 0..gs.w {
                                        acc += gv[[n, k, i, j]] * xv[[n, c, i + u, j + v]];
                                    }
                                }
                            }
                            ok[[c, u, v]] = acc;
                        }
                    }
                }
            });
    }
    Ok(out)
}

/// Sum of `dy` over samples and spatial positions, per output channel.
pub fn backward_bias(pool: &TensorPool, dy: &Tensor) -> NeuriteResult<Tensor> {
    let gs = dy.shape();
    let mut out = Tensor::new(pool, Shape::matrix(1, gs.c)?, AllocMode::Clean)?;
    {
        let gv = dy.view();
        let ob = out.as_slice_mut();
        for n in 0..gs.n {
            for k in 0..gs.c {
                for i in 0..gs.h {
                    for j in 0..gs.w {
                        ob[k] += gv[[n, k, i, j]];
                    }
                }
            }
        }
    }
    Ok(out)
}
