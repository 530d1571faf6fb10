//! neurite — a CPU neural-network inference and training engine built
//! around a computational graph of typed tensor operations.
//!
//! A [`GraphBuilder`](graph::GraphBuilder) assembles a DAG of layer nodes
//! (fully-connected, convolution, pooling, activation, batch normalization,
//! dropout, elementwise sum, depth concatenation, weighted output), frozen
//! into a [`Network`](graph::Network). The network executes forward and
//! backward passes over pooled NCHW tensors; a [`Trainer`](train::Trainer)
//! iterates mini-batches and applies one of the [`optim`] update rules.

pub mod context;
pub mod data;
pub mod errors;
pub mod graph;
pub mod init;
pub mod kernels;
pub mod optim;
pub mod tensor;
pub mod train;
pub mod types;

pub use context::Context;
pub use errors::{NeuriteError, NeuriteResult};
pub use graph::{GraphBuilder, Network};
pub use init::{BiasInit, WeightInit};
pub use kernels::activation::ActivationKind;
pub use kernels::batchnorm::NormMode;
pub use kernels::cost::CostKind;
pub use tensor::{Tensor, TensorPool};
pub use train::{AccuracyKind, CancellationToken, StopReason, Trainer, TrainingOptions};
pub use types::{AllocMode, NodeId, SampleShape, Shape};
