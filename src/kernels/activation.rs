//! Pointwise activation functions and their derivatives. Derivatives are
//! expressed from the forward output, so the backward kernel only needs the
//! activation's own result.

use ndarray::Zip;
use serde::{Deserialize, Serialize};

use super::ensure_same_shape;
use crate::errors::NeuriteResult;
use crate::tensor::{Tensor, TensorPool};
use crate::types::AllocMode;

const LECUN_SCALE: f32 = 1.7159;
const LECUN_STEEPNESS: f32 = 2.0 / 3.0;
const LEAKY_SLOPE: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationKind {
    Sigmoid,
    Tanh,
    Relu,
    LeakyRelu,
    Softplus,
    Elu,
    Identity,
    LeCunTanh,
}

impl ActivationKind {
    pub fn value(self, x: f32) -> f32 {
        match self {
            ActivationKind::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            ActivationKind::Tanh => x.tanh(),
            ActivationKind::Relu => {
                if x > 0.0 {
                    x
                } else {
                    0.0
                }
            }
            ActivationKind::LeakyRelu => {
                if x > 0.0 {
                    x
                } else {
                    LEAKY_SLOPE * x
                }
            }
            ActivationKind::Softplus => x.exp().ln_1p(),
            ActivationKind::Elu => {
                if x >= 0.0 {
                    x
                } else {
                    x.exp() - 1.0
                }
            }
            ActivationKind::Identity => x,
            ActivationKind::LeCunTanh => LECUN_SCALE * (LECUN_STEEPNESS * x).tanh(),
        }
    }

    /// f'(x) written in terms of y = f(x).
    pub fn derive_from_output(self, y: f32) -> f32 {
        match self {
            ActivationKind::Sigmoid => y * (1.0 - y),
            ActivationKind::Tanh => 1.0 - y * y,
            ActivationKind::Relu => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            ActivationKind::LeakyRelu => {
                if y > 0.0 {
                    1.0
                } else {
                    LEAKY_SLOPE
                }
            }
            // y = ln(1 + e^x)  =>  sigmoid(x) = 1 - e^-y
            ActivationKind::Softplus => 1.0 - (-y).exp(),
            ActivationKind::Elu => {
                if y >= 0.0 {
                    1.0
                } else {
                    y + 1.0
                }
            }
            ActivationKind::Identity => 1.0,
            ActivationKind::LeCunTanh => {
                let t = y / LECUN_SCALE;
                LECUN_SCALE * LECUN_STEEPNESS * (1.0 - t * t)
            }
        }
    }
}

/// `y = f(x)`.
pub fn forward(pool: &TensorPool, x: &Tensor, kind: ActivationKind) -> NeuriteResult<Tensor> {
    let mut out = Tensor::like(pool, x, AllocMode::Default)?;
    Zip::from(out.view_mut())
        .and(x.view())
        .par_for_each(|o, &v| *o = kind.value(v));
    Ok(out)
}

/// `dx = dy ∘ f'(y)` where `y` is the forward output.
pub fn backward(
    pool: &TensorPool,
    y: &Tensor,
    dy: &Tensor,
    kind: ActivationKind,
) -> NeuriteResult<Tensor> {
    ensure_same_shape(y, dy)?;
    let mut out = Tensor::like(pool, y, AllocMode::Default)?;
    Zip::from(out.view_mut())
        .and(y.view())
        .and(dy.view())
        .par_for_each(|o, &yv, &gv| *o = gv * kind.derive_from_output(yv));
    Ok(out)
}
