//! AdaDelta: learning-rate-free updates driven by running averages of the
//! squared gradients and the squared applied deltas.

use std::collections::HashMap;

use super::{validate_positive, validate_unit_interval, Optimizer, ParamPair};
use crate::errors::NeuriteResult;
use crate::graph::Gradients;
use crate::types::NodeId;

struct Averages {
    grad_w: Vec<f32>,
    grad_b: Vec<f32>,
    delta_w: Vec<f32>,
    delta_b: Vec<f32>,
}

pub struct AdaDelta {
    rho: f32,
    epsilon: f32,
    state: HashMap<NodeId, Averages>,
}

impl AdaDelta {
    pub fn new(rho: f32, epsilon: f32) -> NeuriteResult<Self> {
        validate_unit_interval("decay rho", rho)?;
        validate_positive("epsilon", epsilon)?;
        Ok(AdaDelta {
            rho,
            epsilon,
            state: HashMap::new(),
        })
    }

    /// The common ρ = 0.95, ε = 1e-6 configuration.
    pub fn standard() -> Self {
        AdaDelta {
            rho: 0.95,
            epsilon: 1e-6,
            state: HashMap::new(),
        }
    }

    fn update(rho: f32, eps: f32, param: &mut [f32], grad: &[f32], s: &mut [f32], u: &mut [f32]) {
        for (((p, &g), sv), uv) in param
            .iter_mut()
            .zip(grad)
            .zip(s.iter_mut())
            .zip(u.iter_mut())
        {
            *sv = rho * *sv + (1.0 - rho) * g * g;
            let delta = ((*uv + eps).sqrt() / (*sv + eps).sqrt()) * g;
            *uv = rho * *uv + (1.0 - rho) * delta * delta;
            *p -= delta;
        }
    }
}

impl Optimizer for AdaDelta {
    fn step(
        &mut self,
        params: &mut [ParamPair<'_>],
        grads: &Gradients,
        _batch_size: usize,
    ) -> NeuriteResult<()> {
        for (id, weights, biases) in params.iter_mut() {
            let g = match grads.get(*id) {
                Some(g) => g,
                None => continue,
            };
            let slot = self.state.entry(*id).or_insert_with(|| Averages {
                grad_w: vec![0.0; weights.len()],
                grad_b: vec![0.0; biases.len()],
                delta_w: vec![0.0; weights.len()],
                delta_b: vec![0.0; biases.len()],
            });
            Self::update(
                self.rho,
                self.epsilon,
                weights.as_slice_mut(),
                g.weights.as_slice(),
                &mut slot.grad_w,
                &mut slot.delta_w,
            );
            Self::update(
                self.rho,
                self.epsilon,
                biases.as_slice_mut(),
                g.biases.as_slice(),
                &mut slot.grad_b,
                &mut slot.delta_b,
            );
        }
        Ok(())
    }
}
