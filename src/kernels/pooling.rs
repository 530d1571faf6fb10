//! 2×2 max pooling, stride 2. H and W must be even. The backward kernel
//! recomputes the forward argmax (strict `>` in row-major order, so ties go
//! to the first position) and routes the incoming gradient there.

use ndarray::parallel::prelude::*;

use crate::errors::{NeuriteError, NeuriteResult};
use crate::tensor::{Tensor, TensorPool};
use crate::types::{AllocMode, Shape};

const WINDOW: usize = 2;

pub fn forward(pool: &TensorPool, x: &Tensor) -> NeuriteResult<Tensor> {
    let xs = x.shape();
    if xs.h % WINDOW != 0 || xs.w % WINDOW != 0 {
        return Err(NeuriteError::InvalidArgument(format!(
            "pooling requires even spatial dimensions, got {}x{}",
            xs.h, xs.w
        )));
    }
    let (oh, ow) = (xs.h / WINDOW, xs.w / WINDOW);
    let mut out = Tensor::new(pool, Shape::new(xs.n, xs.c, oh, ow)?, AllocMode::Default)?;
    {
        let xv = x.view();
        out.view_mut()
            .outer_iter_mut()
            .into_par_iter()
            .zip(xv.outer_iter().into_par_iter())
            .for_each(|(mut on, xn)| {
                for c in 0..xs.c {
                    for i in 0..oh {
                        for j in 0..ow {
                            let mut best = f32::NEG_INFINITY;
                            for u in 0..WINDOW {
                                for v in 0..WINDOW {
                                    let val = xn[[c, i * WINDOW + u, j * WINDOW + v]];
                                    if val > best {
                                        best = val;
                                    }
                                }
                            }
                            on[[c, i, j]] = best;
                        }
                    }
                }
            });
    }
    Ok(out)
}

pub fn backward(pool: &TensorPool, x: &Tensor, dy: &Tensor) -> NeuriteResult<Tensor> {
    let xs = x.shape();
    let gs = dy.shape();
    if gs.n != xs.n || gs.c != xs.c || gs.h != xs.h / WINDOW || gs.w != xs.w / WINDOW {
        return Err(NeuriteError::shapes(
            &[xs.n, xs.c, xs.h / WINDOW, xs.w / WINDOW],
            &gs.dims(),
        ));
    }
    let mut out = Tensor::like(pool, x, AllocMode::Clean)?;
    {
        let xv = x.view();
        let gv = dy.view();
        out.view_mut()
            .outer_iter_mut()
            .into_par_iter()
            .enumerate()
            .for_each(|(n, mut on)| {
                for c in 0..xs.c {
                    for i in 0..gs.h {
                        for j in 0..gs.w {
                            let (mut best, mut bu, mut bv) = (f32::NEG_INFINITY, 0, 0);
                            for u in 0..WINDOW {
                                for v in 0..WINDOW {
                                    let val = xv[[n, c, i * WINDOW + u, j * WINDOW + v]];
                                    if val > best {
                                        best = val;
                                        bu = u;
                                        bv = v;
                                    }
                                }
                            }
                            on[[c, i * WINDOW + bu, j * WINDOW + bv]] = gv[[n, c, i, j]];
                        }
                    }
                }
            });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_spatial_dimensions_are_rejected() {
        let pool = TensorPool::new();
        let x = Tensor::new(&pool, Shape::new(1, 1, 3, 4).unwrap(), AllocMode::Clean).unwrap();
        assert!(forward(&pool, &x).is_err());
    }

    #[test]
    fn backward_routes_to_first_max_on_ties() {
        let pool = TensorPool::new();
        let x = Tensor::from_vec(
            &pool,
            Shape::new(1, 1, 2, 2).unwrap(),
            &[3.0, 3.0, 3.0, 3.0],
        )
        .unwrap();
        let dy = Tensor::from_vec(&pool, Shape::new(1, 1, 1, 1).unwrap(), &[5.0]).unwrap();
        let dx = backward(&pool, &x, &dy).unwrap();
        assert_eq!(dx.as_slice(), &[5.0, 0.0, 0.0, 0.0]);
    }
}
