//! Plain stochastic gradient descent with optional L2 regularization.

use super::{validate_positive, validate_unit_interval, Optimizer, ParamPair};
use crate::errors::NeuriteResult;
use crate::graph::Gradients;

pub struct Sgd {
    eta: f32,
    lambda: f32,
}

impl Sgd {
    /// `eta` is the learning rate, `lambda ∈ [0, 1)` the L2 coefficient
    /// (zero disables regularization).
    pub fn new(eta: f32, lambda: f32) -> NeuriteResult<Self> {
        validate_positive("learning rate", eta)?;
        validate_unit_interval("L2 lambda", lambda)?;
        Ok(Sgd { eta, lambda })
    }
}

impl Optimizer for Sgd {
    fn step(
        &mut self,
        params: &mut [ParamPair<'_>],
        grads: &Gradients,
        batch_size: usize,
    ) -> NeuriteResult<()> {
        let decay = self.eta * self.lambda / batch_size.max(1) as f32;
        for (id, weights, biases) in params.iter_mut() {
            let g = match grads.get(*id) {
                Some(g) => g,
                None => continue,
            };
            for (w, &dw) in weights.as_slice_mut().iter_mut().zip(g.weights.as_slice()) {
                *w -= self.eta * dw + decay * *w;
            }
            for (b, &db) in biases.as_slice_mut().iter_mut().zip(g.biases.as_slice()) {
                *b -= self.eta * db;
            }
        }
        Ok(())
    }
}
