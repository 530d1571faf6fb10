//! RMSProp: exponentially decayed average of squared gradients.

use std::collections::HashMap;

use super::{validate_positive, validate_unit_interval, Optimizer, ParamPair};
use crate::errors::NeuriteResult;
use crate::graph::Gradients;
use crate::types::NodeId;

struct SquareAvg {
    w: Vec<f32>,
    b: Vec<f32>,
}

pub struct RmsProp {
    eta: f32,
    rho: f32,
    epsilon: f32,
    state: HashMap<NodeId, SquareAvg>,
}

impl RmsProp {
    pub fn new(eta: f32, rho: f32, epsilon: f32) -> NeuriteResult<Self> {
        validate_positive("learning rate", eta)?;
        validate_unit_interval("decay rho", rho)?;
        validate_positive("epsilon", epsilon)?;
        Ok(RmsProp {
            eta,
            rho,
            epsilon,
            state: HashMap::new(),
        })
    }
}

impl Optimizer for RmsProp {
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
            let slot = self.state.entry(*id).or_insert_with(|| SquareAvg {
                w: vec![0.0; weights.len()],
                b: vec![0.0; biases.len()],
            });
            for ((w, &dw), s) in weights
                .as_slice_mut()
                .iter_mut()
                .zip(g.weights.as_slice())
                .zip(slot.w.iter_mut())
            {
                *s = self.rho * *s + (1.0 - self.rho) * dw * dw;
                *w -= self.eta * dw / (s.sqrt() + self.epsilon);
            }
            for ((b, &db), s) in biases
                .as_slice_mut()
                .iter_mut()
                .zip(g.biases.as_slice())
                .zip(slot.b.iter_mut())
            {
                *s = self.rho * *s + (1.0 - self.rho) * db * db;
                *b -= self.eta * db / (s.sqrt() + self.epsilon);
            }
        }
        Ok(())
    }
}
