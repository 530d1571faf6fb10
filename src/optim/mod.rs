//! Parameter-update rules. Every optimizer validates its hyperparameters at
//! construction and keeps per-tensor state keyed by node id, so the same
//! instance can drive any network whose weighted nodes stay stable across
//! steps.

pub mod adadelta;
pub mod adagrad;
pub mod adam;
pub mod momentum;
pub mod rmsprop;
pub mod sgd;

pub use adadelta::AdaDelta;
pub use adagrad::AdaGrad;
pub use adam::Adam;
pub use momentum::Momentum;
pub use rmsprop::RmsProp;
pub use sgd::Sgd;

use crate::errors::{NeuriteError, NeuriteResult};
use crate::graph::Gradients;
use crate::tensor::Tensor;
use crate::types::NodeId;

/// One weighted node's parameter pair, as handed out by
/// [`Network::parameters_mut`](crate::graph::Network::parameters_mut).
pub type ParamPair<'a> = (NodeId, &'a mut Tensor, &'a mut Tensor);

pub trait Optimizer {
    /// Applies one update to every parameter pair that has a gradient entry.
    /// `batch_size` is the number of samples behind the gradients, used by
    /// rules that scale regularization per sample.
    fn step(
        &mut self,
        params: &mut [ParamPair<'_>],
        grads: &Gradients,
        batch_size: usize,
    ) -> NeuriteResult<()>;
}

pub(crate) fn validate_unit_interval(name: &str, value: f32) -> NeuriteResult<()> {
    if !(0.0..1.0).contains(&value) {
        return Err(NeuriteError::InvalidArgument(format!(
            "{} must lie in [0, 1), got {}",
            name, value
        )));
    }
    Ok(())
}

pub(crate) fn validate_positive(name: &str, value: f32) -> NeuriteResult<()> {
    if !(value > 0.0) || !value.is_finite() {
        return Err(NeuriteError::InvalidArgument(format!(
            "{} must be positive, got {}",
            name, value
        )));
    }
    Ok(())
}
