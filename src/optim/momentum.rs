//! Classical momentum: a velocity buffer per parameter tensor.

use std::collections::HashMap;

use super::{validate_positive, validate_unit_interval, Optimizer, ParamPair};
use crate::errors::NeuriteResult;
use crate::graph::Gradients;
use crate::types::NodeId;

struct Velocity {
    w: Vec<f32>,
    b: Vec<f32>,
}

pub struct Momentum {
    eta: f32,
    mu: f32,
    state: HashMap<NodeId, Velocity>,
}

impl Momentum {
    pub fn new(eta: f32, mu: f32) -> NeuriteResult<Self> {
        validate_positive("learning rate", eta)?;
        validate_unit_interval("momentum mu", mu)?;
        Ok(Momentum {
            eta,
            mu,
            state: HashMap::new(),
        })
    }
}

impl Optimizer for Momentum {
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
            let slot = self.state.entry(*id).or_insert_with(|| Velocity {
                w: vec![0.0; weights.len()],
                b: vec![0.0; biases.len()],
            });
            for ((w, &dw), v) in weights
                .as_slice_mut()
                .iter_mut()
                .zip(g.weights.as_slice())
                .zip(slot.w.iter_mut())
            {
                *v = self.mu * *v - self.eta * dw;
                *w += *v;
            }
            for ((b, &db), v) in biases
                .as_slice_mut()
                .iter_mut()
                .zip(g.biases.as_slice())
                .zip(slot.b.iter_mut())
            {
                *v = self.mu * *v - self.eta * db;
                *b += *v;
            }
        }
        Ok(())
    }
}
