//! The training loop: epoch iteration with cross-shuffling, per-batch
//! forward/backward/step, validation-driven convergence detection, test
//! monitoring, overflow detection and cooperative cancellation.

pub mod accuracy;
pub use accuracy::AccuracyKind;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::Context;
use crate::data::Dataset;
use crate::errors::{NeuriteError, NeuriteResult};
use crate::graph::Network;
use crate::kernels::cost;
use crate::optim::Optimizer;
use crate::tensor::Tensor;

/// Convergence criterion over the validation cost history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ValidationSettings {
    /// Maximum spread between the costs inside the window.
    pub tolerance: f32,
    /// Number of trailing epochs that must agree.
    pub epochs_window: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrainingOptions {
    pub epochs: usize,
    /// Upper bound on the rows evaluated in one forward pass when scoring
    /// validation/test sets; caps evaluation memory. Minimum 10.
    pub max_batch_size: usize,
    pub accuracy: AccuracyKind,
    pub validation: Option<ValidationSettings>,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        TrainingOptions {
            epochs: 10,
            max_batch_size: 1000,
            accuracy: AccuracyKind::Argmax,
            validation: None,
        }
    }
}

impl TrainingOptions {
    fn validate(&self) -> NeuriteResult<()> {
        if self.epochs == 0 {
            return Err(NeuriteError::InvalidArgument(
                "training needs at least one epoch".into(),
            ));
        }
        if self.max_batch_size < 10 {
            return Err(NeuriteError::InvalidArgument(format!(
                "max batch size must be at least 10, got {}",
                self.max_batch_size
            )));
        }
        self.accuracy.validate()?;
        if let Some(v) = &self.validation {
            if !(v.tolerance > 0.0) {
                return Err(NeuriteError::InvalidArgument(format!(
                    "validation tolerance must be positive, got {}",
                    v.tolerance
                )));
            }
            if v.epochs_window == 0 {
                return Err(NeuriteError::InvalidArgument(
                    "validation window needs at least one epoch".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Categorized outcome of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    Completed,
    Converged,
    Overflow,
    Cancelled,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub training_cost: f32,
    pub training_accuracy: f32,
    pub validation_cost: Option<f32>,
    pub test_cost: Option<f32>,
    pub test_accuracy: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub stop_reason: StopReason,
    pub elapsed: Duration,
    pub epochs: Vec<EpochReport>,
    /// Message behind a `StopReason::Error` outcome.
    pub error: Option<String>,
}

/// Progress event surfaced once per epoch.
#[derive(Debug, Clone, Copy)]
pub struct TrainingProgress {
    pub iteration: usize,
    pub cost: f32,
    /// Fraction of matching samples in [0, 1], when a dataset was scored.
    pub accuracy: Option<f32>,
}

/// Shared cancellation flag, polled at batch start and again before each
/// optimizer step so no partial update is emitted.
#[derive(Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Scores a dataset in inference mode: total cost and the fraction of
/// samples matching the accuracy predicate. Batches larger than
/// `max_batch_size` are evaluated in row chunks.
pub fn evaluate(
    network: &Network,
    ctx: &Context,
    dataset: &Dataset,
    accuracy: AccuracyKind,
    max_batch_size: usize,
) -> NeuriteResult<(f32, f32)> {
    let mut cost_total = 0.0f32;
    let mut correct = 0usize;
    let mut total = 0usize;
    for batch in dataset.batches() {
        let n = batch.samples();
        let mut start = 0;
        while start < n {
            let count = (n - start).min(max_batch_size);
            let owned: Option<(Tensor, Tensor)> = if count == n {
                None
            } else {
                Some((
                    batch.x.slice_batch(&ctx.pool, start, count)?,
                    batch.y.slice_batch(&ctx.pool, start, count)?,
                ))
            };
            let (xr, yr) = match &owned {
                Some((x, y)) => (x, y),
                None => (&batch.x, &batch.y),
            };
            let yhat = network.forward(ctx, xr)?;
            cost_total += cost::cost(&yhat, yr, network.cost_kind())?;
            {
                let pm = yhat.as_matrix();
                let tm = yr.as_matrix();
                for (p, t) in pm.rows().into_iter().zip(tm.rows()) {
                    if accuracy.matches(p, t) {
                        correct += 1;
                    }
                }
            }
            yhat.release(&ctx.pool);
            if let Some((x, y)) = owned {
                x.release(&ctx.pool);
                y.release(&ctx.pool);
            }
            total += count;
            start += count;
        }
    }
    Ok((cost_total, correct as f32 / total.max(1) as f32))
}

fn converged(history: &[f32], settings: &ValidationSettings) -> bool {
    if history.len() < settings.epochs_window {
        return false;
    }
    let window = &history[history.len() - settings.epochs_window..];
    let max = window.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let min = window.iter().cloned().fold(f32::INFINITY, f32::min);
    max - min <= settings.tolerance
}

/// Drives a network through mini-batch epochs with a chosen optimizer.
pub struct Trainer<'a> {
    network: &'a mut Network,
    optimizer: Box<dyn Optimizer>,
    options: TrainingOptions,
}

impl<'a> Trainer<'a> {
    pub fn new(
        network: &'a mut Network,
        optimizer: Box<dyn Optimizer>,
        options: TrainingOptions,
    ) -> NeuriteResult<Self> {
        options.validate()?;
        Ok(Trainer {
            network,
            optimizer,
            options,
        })
    }

    fn check_dataset(&self, dataset: &Dataset, role: &str) -> NeuriteResult<()> {
        if dataset.input_shape() != self.network.input_shape()
            || dataset.output_features() != self.network.output_shape().chw()
        {
            return Err(NeuriteError::InvalidArgument(format!(
                "{} dataset features ({:?} -> {}) do not match the network ({:?} -> {})",
                role,
                dataset.input_shape().dims(),
                dataset.output_features(),
                self.network.input_shape().dims(),
                self.network.output_shape().chw(),
            )));
        }
        Ok(())
    }

    /// Runs the configured number of epochs, stopping early on
    /// convergence, numeric overflow, cancellation, or a mid-run failure.
    #[tracing::instrument(skip_all, name = "training_run")]
    pub fn run(
        &mut self,
        ctx: &Context,
        training: &mut Dataset,
        validation: Option<&Dataset>,
        test: Option<&Dataset>,
        mut progress: Option<&mut dyn FnMut(TrainingProgress)>,
        cancel: Option<&CancellationToken>,
    ) -> NeuriteResult<TrainingReport> {
        self.check_dataset(training, "training")?;
        if let Some(v) = validation {
            self.check_dataset(v, "validation")?;
        }
        if let Some(t) = test {
            self.check_dataset(t, "test")?;
        }

        let started = Instant::now();
        let mut reports = Vec::with_capacity(self.options.epochs);
        let mut val_history: Vec<f32> = Vec::new();
        let mut stop = StopReason::Completed;
        let mut error: Option<String> = None;
        let cancelled = || cancel.map(CancellationToken::is_cancelled).unwrap_or(false);

        'epochs: for epoch in 0..self.options.epochs {
            {
                let mut rng = ctx.seeds.rng();
                training.cross_shuffle(&mut rng);
            }

            for batch in training.batches() {
                if cancelled() {
                    stop = StopReason::Cancelled;
                    break 'epochs;
                }
                let (batch_cost, grads) = match self.network.backward(ctx, &batch.x, &batch.y) {
                    Ok(result) => result,
                    Err(e) => {
                        stop = StopReason::Error;
                        error = Some(e.to_string());
                        break 'epochs;
                    }
                };
                if !batch_cost.is_finite() {
                    grads.release(&ctx.pool);
                    stop = StopReason::Overflow;
                    break 'epochs;
                }
                if cancelled() {
                    // no partial update once cancellation is observed
                    grads.release(&ctx.pool);
                    stop = StopReason::Cancelled;
                    break 'epochs;
                }
                let mut params = self.network.parameters_mut();
                let stepped = self.optimizer.step(&mut params, &grads, batch.samples());
                drop(params);
                grads.release(&ctx.pool);
                if let Err(e) = stepped {
                    stop = StopReason::Error;
                    error = Some(e.to_string());
                    break 'epochs;
                }
            }

            let (train_cost, train_acc) = evaluate(
                self.network,
                ctx,
                training,
                self.options.accuracy,
                self.options.max_batch_size,
            )?;
            let mut report = EpochReport {
                epoch,
                training_cost: train_cost,
                training_accuracy: train_acc,
                validation_cost: None,
                test_cost: None,
                test_accuracy: None,
            };

            let mut converged_now = false;
            if let Some(val) = validation {
                let (vc, _) = evaluate(
                    self.network,
                    ctx,
                    val,
                    self.options.accuracy,
                    self.options.max_batch_size,
                )?;
                report.validation_cost = Some(vc);
                val_history.push(vc);
                if let Some(settings) = &self.options.validation {
                    converged_now = converged(&val_history, settings);
                }
            }

            let event = if let Some(test_set) = test {
                let (tc, ta) = evaluate(
                    self.network,
                    ctx,
                    test_set,
                    self.options.accuracy,
                    self.options.max_batch_size,
                )?;
                report.test_cost = Some(tc);
                report.test_accuracy = Some(ta);
                TrainingProgress {
                    iteration: epoch + 1,
                    cost: tc,
                    accuracy: Some(ta),
                }
            } else {
                TrainingProgress {
                    iteration: epoch + 1,
                    cost: train_cost,
                    accuracy: Some(train_acc),
                }
            };
            debug!(
                epoch,
                cost = report.training_cost,
                accuracy = report.training_accuracy,
                validation = ?report.validation_cost,
                "epoch finished"
            );
            if let Some(cb) = progress.as_deref_mut() {
                cb(event);
            }
            reports.push(report);

            if converged_now {
                stop = StopReason::Converged;
                break;
            }
            if !self.network.parameters_finite() {
                stop = StopReason::Overflow;
                break;
            }
            if cancelled() {
                stop = StopReason::Cancelled;
                break;
            }
        }

        Ok(TrainingReport {
            stop_reason: stop,
            elapsed: started.elapsed(),
            epochs: reports,
            error,
        })
    }
}
