//! Forward and backward execution over a frozen [`Network`]. The arena
//! order is topological, so the forward pass is a single sweep and the
//! backward pass is the reverse sweep with fan-in gradient accumulation.
//! Every tensor allocated along the way is returned to the pool before the
//! call ends, except the detached result (forward) or the gradient map
//! (backward).

use std::collections::HashMap;

use crate::context::Context;
use crate::errors::{NeuriteError, NeuriteResult};
use crate::graph::{Network, NodeOp, OutputActivation};
use crate::kernels::batchnorm::BatchStats;
use crate::kernels::cost::CostKind;
use crate::kernels::{activation, batchnorm, blas, convolution, cost, dense, dropout, pooling, softmax};
use crate::tensor::{Tensor, TensorPool};
use crate::types::{AllocMode, NodeId, Shape};

/// Value slot for one node during a pass. Only the placeholder borrows; all
/// computed values are owned and pool-released at their last use.
enum Slot<'a> {
    Borrowed(&'a Tensor),
    Owned(Tensor),
}

impl<'a> Slot<'a> {
    fn tensor(&self) -> &Tensor {
        match self {
            Slot::Borrowed(t) => t,
            Slot::Owned(t) => t,
        }
    }

    fn release(self, pool: &TensorPool) {
        if let Slot::Owned(t) = self {
            t.release(pool);
        }
    }
}

/// Auxiliary tensors captured by the training forward and consumed by the
/// backward sweep.
enum Aux {
    Dropout { mask: Tensor },
    BatchNorm(BatchStats),
}

impl Aux {
    fn release(self, pool: &TensorPool) {
        match self {
            Aux::Dropout { mask } => mask.release(pool),
            Aux::BatchNorm(stats) => {
                stats.mean.release(pool);
                stats.variance.release(pool);
            }
        }
    }
}

/// Weight and bias gradients of one weighted node. Batch normalization maps
/// γ to `weights` and β to `biases`.
pub struct ParamGrads {
    pub weights: Tensor,
    pub biases: Tensor,
}

/// Parameter gradients of a backward pass, keyed by node id.
pub struct Gradients {
    map: HashMap<NodeId, ParamGrads>,
}

impl Gradients {
    pub fn get(&self, id: NodeId) -> Option<&ParamGrads> {
        self.map.get(&id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn release(self, pool: &TensorPool) {
        for (_, g) in self.map {
            g.weights.release(pool);
            g.biases.release(pool);
        }
    }
}

fn accumulate_into(
    slot: &mut Option<Tensor>,
    delta: Tensor,
    pool: &TensorPool,
) -> NeuriteResult<()> {
    match slot {
        Some(existing) => {
            blas::accumulate(existing, &delta)?;
            delta.release(pool);
        }
        None => *slot = Some(delta),
    }
    Ok(())
}

/// `(N, Ca + Cb, H, W)` from two same-plane inputs.
fn concat_forward(pool: &TensorPool, a: &Tensor, b: &Tensor) -> NeuriteResult<Tensor> {
    let (sa, sb) = (a.shape(), b.shape());
    if sa.n != sb.n || sa.h != sb.h || sa.w != sb.w {
        return Err(NeuriteError::shapes(&sa.dims(), &sb.dims()));
    }
    let shape = Shape::new(sa.n, sa.c + sb.c, sa.h, sa.w)?;
    let mut out = Tensor::new(pool, shape, AllocMode::Default)?;
    let (achw, bchw, ochw) = (sa.chw(), sb.chw(), shape.chw());
    let (av, bv, ov) = (a.as_slice(), b.as_slice(), out.as_slice_mut());
    for n in 0..sa.n {
        ov[n * ochw..n * ochw + achw].copy_from_slice(&av[n * achw..(n + 1) * achw]);
        ov[n * ochw + achw..(n + 1) * ochw].copy_from_slice(&bv[n * bchw..(n + 1) * bchw]);
    }
    Ok(out)
}

/// Splits a concat gradient back into the two parent planes.
fn concat_backward(
    pool: &TensorPool,
    g: &Tensor,
    first_channels: usize,
) -> NeuriteResult<(Tensor, Tensor)> {
    let gs = g.shape();
    if first_channels == 0 || first_channels >= gs.c {
        return Err(NeuriteError::InvalidArgument(format!(
            "cannot split {} channels at {}",
            gs.c, first_channels
        )));
    }
    let sa = Shape::new(gs.n, first_channels, gs.h, gs.w)?;
    let sb = Shape::new(gs.n, gs.c - first_channels, gs.h, gs.w)?;
    let mut ga = Tensor::new(pool, sa, AllocMode::Default)?;
    let mut gb = Tensor::new(pool, sb, AllocMode::Default)?;
    let (achw, bchw, gchw) = (sa.chw(), sb.chw(), gs.chw());
    let gv = g.as_slice();
    {
        let av = ga.as_slice_mut();
        for n in 0..gs.n {
            av[n * achw..(n + 1) * achw].copy_from_slice(&gv[n * gchw..n * gchw + achw]);
        }
    }
    {
        let bv = gb.as_slice_mut();
        for n in 0..gs.n {
            bv[n * bchw..(n + 1) * bchw].copy_from_slice(&gv[n * gchw + achw..(n + 1) * gchw]);
        }
    }
    Ok((ga, gb))
}

impl Network {
    fn check_input(&self, x: &Tensor) -> NeuriteResult<()> {
        if x.shape().sample() != self.input_shape {
            return Err(NeuriteError::shapes(
                &self.input_shape.dims(),
                &x.shape().sample().dims(),
            ));
        }
        Ok(())
    }

    fn check_target(&self, x: &Tensor, y: &Tensor) -> NeuriteResult<()> {
        if y.shape().sample() != self.output_shape || y.shape().n != x.shape().n {
            return Err(NeuriteError::shapes(
                &self.output_shape.dims(),
                &y.shape().sample().dims(),
            ));
        }
        Ok(())
    }

    pub(crate) fn cost_kind(&self) -> CostKind {
        match self.nodes[self.terminal.0].op {
            NodeOp::Output { cost, .. } => cost,
            _ => unreachable!("terminal is validated at build time"),
        }
    }

    /// Inference forward pass. Dropout is the identity, batch normalization
    /// reads its running statistics. Intermediates release at last use; the
    /// returned tensor is detached and owned by the caller.
    pub fn forward(&self, ctx: &Context, x: &Tensor) -> NeuriteResult<Tensor> {
        self.check_input(x)?;
        let pool = &ctx.pool;
        let mut remaining: Vec<usize> = self.children.iter().map(|c| c.len()).collect();
        let mut values: Vec<Option<Slot<'_>>> = (0..self.nodes.len()).map(|_| None).collect();

        for id in 0..self.nodes.len() {
            let slot = {
                let node = &self.nodes[id];
                match &node.op {
                    NodeOp::Placeholder => Slot::Borrowed(x),
                    op => {
                        let parents: Vec<&Tensor> = node
                            .parents
                            .iter()
                            .map(|p| values[p.0].as_ref().expect("parents precede children").tensor())
                            .collect();
                        Slot::Owned(infer_op(pool, op, &parents)?)
                    }
                }
            };
            values[id] = Some(slot);

            let parents = self.nodes[id].parents.clone();
            for p in parents {
                remaining[p.0] -= 1;
                if remaining[p.0] == 0 {
                    if let Some(slot) = values[p.0].take() {
                        slot.release(pool);
                    }
                }
            }
        }

        match values[self.terminal.0].take() {
            Some(Slot::Owned(t)) => Ok(t),
            _ => Err(NeuriteError::GraphError(
                "terminal produced no value".into(),
            )),
        }
    }

    /// Forward plus the terminal cost; the prediction tensor is released
    /// before returning.
    pub fn loss(&self, ctx: &Context, x: &Tensor, y: &Tensor) -> NeuriteResult<f32> {
        self.check_target(x, y)?;
        let yhat = self.forward(ctx, x)?;
        let value = cost::cost(&yhat, y, self.cost_kind());
        yhat.release(&ctx.pool);
        value
    }

    /// Forward + argmax class index per sample.
    pub fn predict(&self, ctx: &Context, x: &Tensor) -> NeuriteResult<Vec<usize>> {
        let yhat = self.forward(ctx, x)?;
        let classes = {
            let m = yhat.as_matrix();
            m.rows()
                .into_iter()
                .map(|row| {
                    row.iter()
                        .enumerate()
                        .max_by(|a, b| {
                            a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal)
                        })
                        .map(|(i, _)| i)
                        .unwrap_or(0)
                })
                .collect()
        };
        yhat.release(&ctx.pool);
        Ok(classes)
    }

    /// Training step gradients: a training-mode forward (dropout masks
    /// sampled, batch-norm statistics updated) followed by the reverse
    /// sweep. Returns the batch cost together with the parameter gradients.
    pub fn backward(
        &mut self,
        ctx: &Context,
        x: &Tensor,
        y: &Tensor,
    ) -> NeuriteResult<(f32, Gradients)> {
        self.check_input(x)?;
        self.check_target(x, y)?;
        let (mut values, mut aux) = self.forward_training(ctx, x)?;
        let pool = &ctx.pool;

        let terminal = self.terminal;
        let placeholder = self.placeholder;
        let mut deltas: Vec<Option<Tensor>> = (0..self.nodes.len()).map(|_| None).collect();
        let mut params: HashMap<NodeId, ParamGrads> = HashMap::new();

        // Terminal: cost, then the weighted output layer's backward.
        let cost_value = {
            let node = &self.nodes[terminal.0];
            let yhat = values[terminal.0]
                .as_ref()
                .expect("forward populated the terminal")
                .tensor();
            let (weights, kind, act) = match &node.op {
                NodeOp::Output {
                    weights,
                    activation,
                    cost,
                    ..
                } => (weights, *cost, *activation),
                _ => unreachable!("terminal is validated at build time"),
            };
            let cost_value = cost::cost(yhat, y, kind)?;
            let act_kind = match act {
                OutputActivation::Pointwise(k) => Some(k),
                OutputActivation::Softmax => None,
            };
            let dz = cost::delta(pool, yhat, y, kind, act_kind)?;
            let parent = node.parents[0];
            let h = values[parent.0]
                .as_ref()
                .expect("parents precede children")
                .tensor();
            params.insert(
                terminal,
                ParamGrads {
                    weights: dense::backward_filter(pool, h, &dz)?,
                    biases: dense::backward_bias(pool, &dz)?,
                },
            );
            if parent != placeholder {
                let dx = dense::backward_data(pool, &dz, weights)?;
                accumulate_into(&mut deltas[parent.0], dx, pool)?;
            }
            dz.release(pool);
            cost_value
        };
        if let Some(slot) = values[terminal.0].take() {
            slot.release(pool);
        }

        // Reverse sweep over the remaining nodes.
        for id in (0..self.nodes.len()).rev() {
            if id == terminal.0 || id == placeholder.0 {
                continue;
            }
            let g = match deltas[id].take() {
                Some(g) => g,
                None => continue,
            };
            let node = &self.nodes[id];
            let parent = node.parents[0];
            match &node.op {
                NodeOp::FullyConnected { weights, .. } => {
                    let xval = values[parent.0]
                        .as_ref()
                        .expect("parents precede children")
                        .tensor();
                    params.insert(
                        NodeId(id),
                        ParamGrads {
                            weights: dense::backward_filter(pool, xval, &g)?,
                            biases: dense::backward_bias(pool, &g)?,
                        },
                    );
                    if parent != placeholder {
                        let dx = dense::backward_data(pool, &g, weights)?;
                        accumulate_into(&mut deltas[parent.0], dx, pool)?;
                    }
                }
                NodeOp::Convolution { kernels, .. } => {
                    let xval = values[parent.0]
                        .as_ref()
                        .expect("parents precede children")
                        .tensor();
                    params.insert(
                        NodeId(id),
                        ParamGrads {
                            weights: convolution::backward_filter(pool, xval, &g)?,
                            biases: convolution::backward_bias(pool, &g)?,
                        },
                    );
                    if parent != placeholder {
                        let dx = convolution::backward_data(pool, &g, kernels)?;
                        accumulate_into(&mut deltas[parent.0], dx, pool)?;
                    }
                }
                NodeOp::Pooling => {
                    let xval = values[parent.0]
                        .as_ref()
                        .expect("parents precede children")
                        .tensor();
                    let dx = pooling::backward(pool, xval, &g)?;
                    accumulate_into(&mut deltas[parent.0], dx, pool)?;
                }
                NodeOp::Activation(kind) => {
                    let yval = values[id].as_ref().expect("forward populated it").tensor();
                    let dx = activation::backward(pool, yval, &g, *kind)?;
                    accumulate_into(&mut deltas[parent.0], dx, pool)?;
                }
                NodeOp::BatchNorm { mode, gamma, .. } => {
                    let xval = values[parent.0]
                        .as_ref()
                        .expect("parents precede children")
                        .tensor();
                    let stats = match aux[id].as_ref() {
                        Some(Aux::BatchNorm(stats)) => stats,
                        _ => {
                            return Err(NeuriteError::GraphError(
                                "batch-norm statistics missing from the forward pass".into(),
                            ))
                        }
                    };
                    let (dx, dgamma, dbeta) =
                        batchnorm::backward(pool, xval, &g, gamma, stats, *mode)?;
                    params.insert(
                        NodeId(id),
                        ParamGrads {
                            weights: dgamma,
                            biases: dbeta,
                        },
                    );
                    accumulate_into(&mut deltas[parent.0], dx, pool)?;
                }
                NodeOp::Dropout { .. } => {
                    let mask = match aux[id].as_ref() {
                        Some(Aux::Dropout { mask }) => mask,
                        _ => {
                            return Err(NeuriteError::GraphError(
                                "dropout mask missing from the forward pass".into(),
                            ))
                        }
                    };
                    let dx = dropout::backward(pool, &g, mask)?;
                    accumulate_into(&mut deltas[parent.0], dx, pool)?;
                }
                NodeOp::Sum => {
                    let other = node.parents[1];
                    let dx_a = g.duplicate(pool)?;
                    let dx_b = g.duplicate(pool)?;
                    accumulate_into(&mut deltas[parent.0], dx_a, pool)?;
                    accumulate_into(&mut deltas[other.0], dx_b, pool)?;
                }
                NodeOp::DepthConcat => {
                    let other = node.parents[1];
                    let first_channels = self.nodes[parent.0].shape.c;
                    let (ga, gb) = concat_backward(pool, &g, first_channels)?;
                    accumulate_into(&mut deltas[parent.0], ga, pool)?;
                    accumulate_into(&mut deltas[other.0], gb, pool)?;
                }
                NodeOp::Placeholder | NodeOp::Output { .. } => {
                    unreachable!("handled outside the sweep")
                }
            }
            g.release(pool);
            if let Some(slot) = values[id].take() {
                slot.release(pool);
            }
            if let Some(a) = aux[id].take() {
                a.release(pool);
            }
        }

        // The placeholder slot only borrows the input; deltas routed to it
        // were never produced.
        if let Some(slot) = values[placeholder.0].take() {
            slot.release(pool);
        }
        for d in deltas.into_iter().flatten() {
            d.release(pool);
        }

        Ok((cost_value, Gradients { map: params }))
    }

    /// Training-mode forward: keeps every node value alive for the reverse
    /// sweep and captures dropout masks and batch statistics.
    fn forward_training<'a>(
        &mut self,
        ctx: &Context,
        x: &'a Tensor,
    ) -> NeuriteResult<(Vec<Option<Slot<'a>>>, Vec<Option<Aux>>)> {
        let pool = &ctx.pool;
        let len = self.nodes.len();
        let mut values: Vec<Option<Slot<'a>>> = (0..len).map(|_| None).collect();
        let mut aux: Vec<Option<Aux>> = (0..len).map(|_| None).collect();

        for id in 0..len {
            let parents = self.nodes[id].parents.clone();
            let slot = match &mut self.nodes[id].op {
                NodeOp::Placeholder => Slot::Borrowed(x),
                NodeOp::Dropout { keep } => {
                    let xval = values[parents[0].0]
                        .as_ref()
                        .expect("parents precede children")
                        .tensor();
                    let mut rng = ctx.seeds.rng();
                    let (out, mask) = dropout::forward_train(pool, xval, *keep, &mut rng)?;
                    aux[id] = Some(Aux::Dropout { mask });
                    Slot::Owned(out)
                }
                NodeOp::BatchNorm {
                    mode,
                    gamma,
                    beta,
                    mean,
                    variance,
                    iteration,
                } => {
                    let xval = values[parents[0].0]
                        .as_ref()
                        .expect("parents precede children")
                        .tensor();
                    let (out, stats) = batchnorm::forward_train(
                        pool, xval, gamma, beta, mean, variance, iteration, *mode,
                    )?;
                    aux[id] = Some(Aux::BatchNorm(stats));
                    Slot::Owned(out)
                }
                op => {
                    let pvals: Vec<&Tensor> = parents
                        .iter()
                        .map(|p| values[p.0].as_ref().expect("parents precede children").tensor())
                        .collect();
                    Slot::Owned(infer_op(pool, op, &pvals)?)
                }
            };
            values[id] = Some(slot);
        }
        Ok((values, aux))
    }
}

/// Forward kernel dispatch shared by inference and (for the stateless
/// kinds) training. Dropout in inference mode is the identity.
fn infer_op(pool: &TensorPool, op: &NodeOp, parents: &[&Tensor]) -> NeuriteResult<Tensor> {
    match op {
        NodeOp::FullyConnected { weights, biases } => {
            dense::forward(pool, parents[0], weights, biases)
        }
        NodeOp::Convolution { kernels, biases } => {
            convolution::forward(pool, parents[0], kernels, biases)
        }
        NodeOp::Pooling => pooling::forward(pool, parents[0]),
        NodeOp::Activation(kind) => activation::forward(pool, parents[0], *kind),
        NodeOp::BatchNorm {
            mode,
            gamma,
            beta,
            mean,
            variance,
            ..
        } => batchnorm::forward_infer(pool, parents[0], gamma, beta, mean, variance, *mode),
        NodeOp::Dropout { .. } => parents[0].duplicate(pool),
        NodeOp::Sum => blas::sum(pool, parents),
        NodeOp::DepthConcat => concat_forward(pool, parents[0], parents[1]),
        NodeOp::Output {
            weights,
            biases,
            activation: act,
            ..
        } => {
            let z = dense::forward(pool, parents[0], weights, biases)?;
            let out = match act {
                OutputActivation::Pointwise(kind) => activation::forward(pool, &z, *kind),
                OutputActivation::Softmax => softmax::forward(pool, &z),
            };
            z.release(pool);
            out
        }
        NodeOp::Placeholder => Err(NeuriteError::GraphError(
            "placeholder has no forward kernel".into(),
        )),
    }
}
