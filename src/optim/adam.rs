//! Adam: bias-corrected first and second moment estimates. The timestep is
//! shared across all parameter tensors and advances once per step call.

use std::collections::HashMap;

use super::{validate_positive, validate_unit_interval, Optimizer, ParamPair};
use crate::errors::NeuriteResult;
use crate::graph::Gradients;
use crate::types::NodeId;

struct Moments {
    m_w: Vec<f32>,
    v_w: Vec<f32>,
    m_b: Vec<f32>,
    v_b: Vec<f32>,
}

pub struct Adam {
    eta: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    t: u64,
    state: HashMap<NodeId, Moments>,
}

struct Rates {
    eta: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    correction1: f32,
    correction2: f32,
}

impl Adam {
    pub fn new(eta: f32, beta1: f32, beta2: f32, epsilon: f32) -> NeuriteResult<Self> {
        validate_positive("learning rate", eta)?;
        validate_unit_interval("beta1", beta1)?;
        validate_unit_interval("beta2", beta2)?;
        validate_positive("epsilon", epsilon)?;
        Ok(Adam {
            eta,
            beta1,
            beta2,
            epsilon,
            t: 0,
            state: HashMap::new(),
        })
    }

    /// The common η = 1e-3, β₁ = 0.9, β₂ = 0.999, ε = 1e-8 configuration.
    pub fn standard() -> Self {
        Adam {
            eta: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            t: 0,
            state: HashMap::new(),
        }
    }

    fn update(rates: &Rates, param: &mut [f32], grad: &[f32], m: &mut [f32], v: &mut [f32]) {
        for (((p, &g), mv), vv) in param
            .iter_mut()
            .zip(grad)
            .zip(m.iter_mut())
            .zip(v.iter_mut())
        {
            *mv = rates.beta1 * *mv + (1.0 - rates.beta1) * g;
            *vv = rates.beta2 * *vv + (1.0 - rates.beta2) * g * g;
            let m_hat = *mv / rates.correction1;
            let v_hat = *vv / rates.correction2;
            *p -= rates.eta * m_hat / (v_hat.sqrt() + rates.epsilon);
        }
    }
}

impl Optimizer for Adam {
    fn step(
        &mut self,
        params: &mut [ParamPair<'_>],
        grads: &Gradients,
        _batch_size: usize,
    ) -> NeuriteResult<()> {
        self.t += 1;
        let rates = Rates {
            eta: self.eta,
            beta1: self.beta1,
            beta2: self.beta2,
            epsilon: self.epsilon,
            correction1: 1.0 - self.beta1.powi(self.t as i32),
            correction2: 1.0 - self.beta2.powi(self.t as i32),
        };
        for (id, weights, biases) in params.iter_mut() {
            let g = match grads.get(*id) {
                Some(g) => g,
                None => continue,
            };
            let slot = self.state.entry(*id).or_insert_with(|| Moments {
                m_w: vec![0.0; weights.len()],
                v_w: vec![0.0; weights.len()],
                m_b: vec![0.0; biases.len()],
                v_b: vec![0.0; biases.len()],
            });
            Adam::update(
                &rates,
                weights.as_slice_mut(),
                g.weights.as_slice(),
                &mut slot.m_w,
                &mut slot.v_w,
            );
            Adam::update(
                &rates,
                biases.as_slice_mut(),
                g.biases.as_slice(),
                &mut slot.m_b,
                &mut slot.v_b,
            );
        }
        Ok(())
    }
}
