//! The computational-graph model: a flat arena of typed nodes addressed by
//! [`NodeId`], built through [`GraphBuilder`] and frozen into a [`Network`].
//! Parents always precede children in the arena, so the creation order is a
//! topological order and the executor can sweep it directly.

pub mod executor;
pub use executor::{Gradients, ParamGrads};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::context::Context;
use crate::errors::{NeuriteError, NeuriteResult};
use crate::init::{self, BiasInit, WeightInit};
use crate::kernels::activation::ActivationKind;
use crate::kernels::batchnorm::NormMode;
use crate::kernels::cost::CostKind;
use crate::kernels::dropout::DEFAULT_KEEP;
use crate::tensor::Tensor;
use crate::types::{NodeId, SampleShape};

/// Activation applied inside the output terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputActivation {
    Pointwise(ActivationKind),
    Softmax,
}

/// The closed set of node kinds. Weighted variants own their parameter
/// tensors; the executor matches on this exhaustively.
#[derive(Debug, Serialize, Deserialize)]
pub enum NodeOp {
    Placeholder,
    FullyConnected {
        weights: Tensor,
        biases: Tensor,
    },
    Convolution {
        kernels: Tensor,
        biases: Tensor,
    },
    Pooling,
    Activation(ActivationKind),
    BatchNorm {
        mode: NormMode,
        gamma: Tensor,
        beta: Tensor,
        mean: Tensor,
        variance: Tensor,
        iteration: u64,
    },
    Dropout {
        keep: f32,
    },
    Sum,
    DepthConcat,
    Output {
        weights: Tensor,
        biases: Tensor,
        activation: OutputActivation,
        cost: CostKind,
    },
}

impl NodeOp {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeOp::Placeholder => "placeholder",
            NodeOp::FullyConnected { .. } => "fully-connected",
            NodeOp::Convolution { .. } => "convolution",
            NodeOp::Pooling => "pooling",
            NodeOp::Activation(_) => "activation",
            NodeOp::BatchNorm { .. } => "batch-norm",
            NodeOp::Dropout { .. } => "dropout",
            NodeOp::Sum => "sum",
            NodeOp::DepthConcat => "depth-concat",
            NodeOp::Output { .. } => "output",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Node {
    pub(crate) op: NodeOp,
    pub(crate) parents: Vec<NodeId>,
    pub(crate) shape: SampleShape,
}

impl Node {
    pub fn op(&self) -> &NodeOp {
        &self.op
    }

    pub fn shape(&self) -> SampleShape {
        self.shape
    }

    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    pub fn is_weighted(&self) -> bool {
        matches!(
            self.op,
            NodeOp::FullyConnected { .. }
                | NodeOp::Convolution { .. }
                | NodeOp::BatchNorm { .. }
                | NodeOp::Output { .. }
        )
    }

    /// SHA-256 over the node's parameter tensors, XOR-folded per tensor
    /// (weights ⊕ biases, plus μ ⊕ σ² for batch normalization). `None` for
    /// parameterless nodes.
    pub fn parameter_hash(&self) -> Option<String> {
        let tensors: Vec<&Tensor> = match &self.op {
            NodeOp::FullyConnected { weights, biases }
            | NodeOp::Convolution {
                kernels: weights,
                biases,
            }
            | NodeOp::Output {
                weights, biases, ..
            } => vec![weights, biases],
            NodeOp::BatchNorm {
                gamma,
                beta,
                mean,
                variance,
                ..
            } => vec![gamma, beta, mean, variance],
            _ => return None,
        };
        let mut folded = [0u8; 32];
        for t in tensors {
            let mut hasher = Sha256::new();
            for v in t.as_slice() {
                hasher.update(v.to_le_bytes());
            }
            let digest = hasher.finalize();
            for (f, d) in folded.iter_mut().zip(digest) {
                *f ^= d;
            }
        }
        Some(folded.iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// Structural equality: same kind, same shape, parameter values within
    /// the tensor tolerance (running statistics included).
    pub fn equivalent(&self, other: &Node) -> bool {
        if self.shape != other.shape || self.parents.len() != other.parents.len() {
            return false;
        }
        match (&self.op, &other.op) {
            (NodeOp::Placeholder, NodeOp::Placeholder) => true,
            (NodeOp::Pooling, NodeOp::Pooling) => true,
            (NodeOp::Sum, NodeOp::Sum) => true,
            (NodeOp::DepthConcat, NodeOp::DepthConcat) => true,
            (NodeOp::Activation(a), NodeOp::Activation(b)) => a == b,
            (NodeOp::Dropout { keep: a }, NodeOp::Dropout { keep: b }) => a == b,
            (
                NodeOp::FullyConnected {
                    weights: w1,
                    biases: b1,
                },
                NodeOp::FullyConnected {
                    weights: w2,
                    biases: b2,
                },
            ) => w1.approx_eq(w2) && b1.approx_eq(b2),
            (
                NodeOp::Convolution {
                    kernels: k1,
                    biases: b1,
                },
                NodeOp::Convolution {
                    kernels: k2,
                    biases: b2,
                },
            ) => k1.approx_eq(k2) && b1.approx_eq(b2),
            (
                NodeOp::BatchNorm {
                    mode: m1,
                    gamma: g1,
                    beta: be1,
                    mean: mu1,
                    variance: v1,
                    ..
                },
                NodeOp::BatchNorm {
                    mode: m2,
                    gamma: g2,
                    beta: be2,
                    mean: mu2,
                    variance: v2,
                    ..
                },
            ) => {
                m1 == m2
                    && g1.approx_eq(g2)
                    && be1.approx_eq(be2)
                    && mu1.approx_eq(mu2)
                    && v1.approx_eq(v2)
            }
            (
                NodeOp::Output {
                    weights: w1,
                    biases: b1,
                    activation: a1,
                    cost: c1,
                },
                NodeOp::Output {
                    weights: w2,
                    biases: b2,
                    activation: a2,
                    cost: c2,
                },
            ) => a1 == a2 && c1 == c2 && w1.approx_eq(w2) && b1.approx_eq(b2),
            _ => false,
        }
    }
}

/// Arena-based graph under construction. Every constructor validates its
/// input contract immediately; `build` freezes the reachable subgraph into
/// a [`Network`].
pub struct GraphBuilder {
    nodes: Vec<Node>,
    placeholder: Option<NodeId>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        GraphBuilder {
            nodes: Vec::new(),
            placeholder: None,
        }
    }

    fn push(&mut self, op: NodeOp, parents: Vec<NodeId>, shape: SampleShape) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node { op, parents, shape });
        id
    }

    fn shape_of(&self, id: NodeId) -> NeuriteResult<SampleShape> {
        self.nodes
            .get(id.0)
            .map(|n| n.shape)
            .ok_or_else(|| NeuriteError::GraphError(format!("unknown node id {}", id.0)))
    }

    /// The graph's single input slot.
    pub fn placeholder(&mut self, shape: SampleShape) -> NeuriteResult<NodeId> {
        if self.placeholder.is_some() {
            return Err(NeuriteError::GraphError(
                "a graph has exactly one placeholder".into(),
            ));
        }
        let id = self.push(NodeOp::Placeholder, Vec::new(), shape);
        self.placeholder = Some(id);
        Ok(id)
    }

    pub fn fully_connected(
        &mut self,
        ctx: &Context,
        parent: NodeId,
        outputs: usize,
        weights_init: WeightInit,
        bias_init: BiasInit,
    ) -> NeuriteResult<NodeId> {
        let pshape = self.shape_of(parent)?;
        if outputs == 0 {
            return Err(NeuriteError::InvalidArgument(
                "fully-connected layer needs at least one output".into(),
            ));
        }
        let mut rng = ctx.seeds.rng();
        let weights =
            init::dense_weights(&ctx.pool, pshape.chw(), outputs, weights_init, &mut rng)?;
        let biases = init::biases(&ctx.pool, outputs, bias_init, &mut rng)?;
        Ok(self.push(
            NodeOp::FullyConnected { weights, biases },
            vec![parent],
            SampleShape::features(outputs)?,
        ))
    }

    /// Valid-padding stride-1 convolution with `kernel_count` learned
    /// filters of `kernel_size = (Kh, Kw)`. Kernel weights use He uniform
    /// initialization.
    pub fn convolution(
        &mut self,
        ctx: &Context,
        parent: NodeId,
        kernel_size: (usize, usize),
        kernel_count: usize,
        bias_init: BiasInit,
    ) -> NeuriteResult<NodeId> {
        let pshape = self.shape_of(parent)?;
        let (kh, kw) = kernel_size;
        if kh == 0 || kw == 0 || kernel_count == 0 {
            return Err(NeuriteError::InvalidArgument(
                "convolution kernel size and count must be positive".into(),
            ));
        }
        if pshape.h < kh || pshape.w < kw {
            return Err(NeuriteError::InvalidArgument(format!(
                "convolution kernel {}x{} exceeds input {}x{}",
                kh, kw, pshape.h, pshape.w
            )));
        }
        let mut rng = ctx.seeds.rng();
        let kernels = init::convolution_kernels(
            &ctx.pool,
            kernel_count,
            pshape.c,
            kh,
            kw,
            WeightInit::HeUniform,
            &mut rng,
        )?;
        let biases = init::biases(&ctx.pool, kernel_count, bias_init, &mut rng)?;
        Ok(self.push(
            NodeOp::Convolution { kernels, biases },
            vec![parent],
            SampleShape::new(kernel_count, pshape.h - kh + 1, pshape.w - kw + 1)?,
        ))
    }

    pub fn pooling(&mut self, parent: NodeId) -> NeuriteResult<NodeId> {
        let pshape = self.shape_of(parent)?;
        if pshape.h % 2 != 0 || pshape.w % 2 != 0 {
            return Err(NeuriteError::InvalidArgument(format!(
                "pooling requires even spatial dimensions, got {}x{}",
                pshape.h, pshape.w
            )));
        }
        Ok(self.push(
            NodeOp::Pooling,
            vec![parent],
            SampleShape::new(pshape.c, pshape.h / 2, pshape.w / 2)?,
        ))
    }

    pub fn activation(&mut self, parent: NodeId, kind: ActivationKind) -> NeuriteResult<NodeId> {
        let pshape = self.shape_of(parent)?;
        Ok(self.push(NodeOp::Activation(kind), vec![parent], pshape))
    }

    pub fn batch_norm(
        &mut self,
        ctx: &Context,
        parent: NodeId,
        mode: NormMode,
    ) -> NeuriteResult<NodeId> {
        let pshape = self.shape_of(parent)?;
        let (gamma, beta, mean, variance) =
            init::batchnorm_parameters(&ctx.pool, mode.parameter_len(pshape))?;
        Ok(self.push(
            NodeOp::BatchNorm {
                mode,
                gamma,
                beta,
                mean,
                variance,
                iteration: 0,
            },
            vec![parent],
            pshape,
        ))
    }

    pub fn dropout(&mut self, parent: NodeId) -> NeuriteResult<NodeId> {
        self.dropout_with(parent, DEFAULT_KEEP)
    }

    pub fn dropout_with(&mut self, parent: NodeId, keep: f32) -> NeuriteResult<NodeId> {
        let pshape = self.shape_of(parent)?;
        if !(keep > 0.0 && keep <= 1.0) {
            return Err(NeuriteError::InvalidArgument(format!(
                "dropout keep probability must be in (0, 1], got {}",
                keep
            )));
        }
        Ok(self.push(NodeOp::Dropout { keep }, vec![parent], pshape))
    }

    pub fn sum(&mut self, a: NodeId, b: NodeId) -> NeuriteResult<NodeId> {
        let (sa, sb) = (self.shape_of(a)?, self.shape_of(b)?);
        if sa != sb {
            return Err(NeuriteError::shapes(&sa.dims(), &sb.dims()));
        }
        Ok(self.push(NodeOp::Sum, vec![a, b], sa))
    }

    pub fn depth_concat(&mut self, a: NodeId, b: NodeId) -> NeuriteResult<NodeId> {
        let (sa, sb) = (self.shape_of(a)?, self.shape_of(b)?);
        if sa.h != sb.h || sa.w != sb.w {
            return Err(NeuriteError::shapes(&sa.dims(), &sb.dims()));
        }
        Ok(self.push(
            NodeOp::DepthConcat,
            vec![a, b],
            SampleShape::new(sa.c + sb.c, sa.h, sa.w)?,
        ))
    }

    /// Weighted graph terminal: dense projection to `outputs`, a pointwise
    /// activation, and a cost function. Log-likelihood pairs with softmax;
    /// use [`GraphBuilder::softmax`] for that.
    pub fn output(
        &mut self,
        ctx: &Context,
        parent: NodeId,
        outputs: usize,
        activation: ActivationKind,
        cost: CostKind,
        weights_init: WeightInit,
        bias_init: BiasInit,
    ) -> NeuriteResult<NodeId> {
        if cost == CostKind::LogLikelihood {
            return Err(NeuriteError::InvalidArgument(
                "log-likelihood cost pairs with the softmax terminal".into(),
            ));
        }
        self.terminal(
            ctx,
            parent,
            outputs,
            OutputActivation::Pointwise(activation),
            cost,
            weights_init,
            bias_init,
        )
    }

    /// Softmax terminal: dense projection, softmax activation,
    /// log-likelihood cost.
    pub fn softmax(
        &mut self,
        ctx: &Context,
        parent: NodeId,
        outputs: usize,
        weights_init: WeightInit,
        bias_init: BiasInit,
    ) -> NeuriteResult<NodeId> {
        self.terminal(
            ctx,
            parent,
            outputs,
            OutputActivation::Softmax,
            CostKind::LogLikelihood,
            weights_init,
            bias_init,
        )
    }

    fn terminal(
        &mut self,
        ctx: &Context,
        parent: NodeId,
        outputs: usize,
        activation: OutputActivation,
        cost: CostKind,
        weights_init: WeightInit,
        bias_init: BiasInit,
    ) -> NeuriteResult<NodeId> {
        let pshape = self.shape_of(parent)?;
        if outputs == 0 {
            return Err(NeuriteError::InvalidArgument(
                "output layer needs at least one class".into(),
            ));
        }
        let mut rng = ctx.seeds.rng();
        let weights =
            init::dense_weights(&ctx.pool, pshape.chw(), outputs, weights_init, &mut rng)?;
        let biases = init::biases(&ctx.pool, outputs, bias_init, &mut rng)?;
        Ok(self.push(
            NodeOp::Output {
                weights,
                biases,
                activation,
                cost,
            },
            vec![parent],
            SampleShape::features(outputs)?,
        ))
    }

    /// Freezes the subgraph reachable from `terminal` into a [`Network`].
    /// Unreachable nodes are discarded; the result must contain exactly one
    /// placeholder and the terminal must be the single output node.
    pub fn build(self, terminal: NodeId) -> NeuriteResult<Network> {
        let terminal_node = self
            .nodes
            .get(terminal.0)
            .ok_or_else(|| NeuriteError::GraphError(format!("unknown node id {}", terminal.0)))?;
        if !matches!(terminal_node.op, NodeOp::Output { .. }) {
            return Err(NeuriteError::GraphError(format!(
                "graph terminal must be an output node, found {}",
                terminal_node.op.kind_name()
            )));
        }

        // Collect the reachable set by walking parent ids.
        let mut reachable = vec![false; self.nodes.len()];
        let mut stack = vec![terminal];
        while let Some(id) = stack.pop() {
            if reachable[id.0] {
                continue;
            }
            reachable[id.0] = true;
            stack.extend(self.nodes[id.0].parents.iter().copied());
        }

        let mut placeholders = 0usize;
        let mut outputs = 0usize;
        for (i, node) in self.nodes.iter().enumerate() {
            if !reachable[i] {
                continue;
            }
            match node.op {
                NodeOp::Placeholder => placeholders += 1,
                NodeOp::Output { .. } => outputs += 1,
                _ => {}
            }
        }
        if placeholders != 1 {
            return Err(NeuriteError::GraphError(format!(
                "graph must contain exactly one placeholder, found {}",
                placeholders
            )));
        }
        if outputs != 1 {
            return Err(NeuriteError::GraphError(format!(
                "graph must contain exactly one output node, found {}",
                outputs
            )));
        }

        // Compact ids, preserving creation order; parents always precede
        // children, so the compacted order is topological.
        let mut remap = vec![usize::MAX; self.nodes.len()];
        let mut next = 0usize;
        for (i, r) in reachable.iter().enumerate() {
            if *r {
                remap[i] = next;
                next += 1;
            }
        }

        let mut nodes = Vec::with_capacity(next);
        let mut placeholder = NodeId(0);
        for (i, node) in self.nodes.into_iter().enumerate() {
            if !reachable[i] {
                continue;
            }
            let parents: Vec<NodeId> = node.parents.iter().map(|p| NodeId(remap[p.0])).collect();
            if matches!(node.op, NodeOp::Placeholder) {
                placeholder = NodeId(remap[i]);
            }
            nodes.push(Node {
                op: node.op,
                parents,
                shape: node.shape,
            });
        }

        let mut children: Vec<Vec<NodeId>> = vec![Vec::new(); nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            for p in &node.parents {
                children[p.0].push(NodeId(i));
            }
        }

        let terminal = NodeId(remap[terminal.0]);
        let input_shape = nodes[placeholder.0].shape;
        let output_shape = nodes[terminal.0].shape;
        Ok(Network {
            nodes,
            children,
            placeholder,
            terminal,
            input_shape,
            output_shape,
        })
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        GraphBuilder::new()
    }
}

/// A frozen, validated computational graph ready for execution.
#[derive(Debug, Serialize, Deserialize)]
pub struct Network {
    pub(crate) nodes: Vec<Node>,
    pub(crate) children: Vec<Vec<NodeId>>,
    pub(crate) placeholder: NodeId,
    pub(crate) terminal: NodeId,
    pub(crate) input_shape: SampleShape,
    pub(crate) output_shape: SampleShape,
}

impl Network {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn input_shape(&self) -> SampleShape {
        self.input_shape
    }

    pub fn output_shape(&self) -> SampleShape {
        self.output_shape
    }

    /// Immutable `(id, weights, biases)` triples of every weighted node, in
    /// topological order. Batch normalization contributes γ as weights and
    /// β as biases.
    pub fn parameters(&self) -> Vec<(NodeId, &Tensor, &Tensor)> {
        let mut out = Vec::new();
        for (i, node) in self.nodes.iter().enumerate() {
            match &node.op {
                NodeOp::FullyConnected { weights, biases }
                | NodeOp::Convolution {
                    kernels: weights,
                    biases,
                }
                | NodeOp::Output {
                    weights, biases, ..
                } => out.push((NodeId(i), weights, biases)),
                NodeOp::BatchNorm { gamma, beta, .. } => out.push((NodeId(i), gamma, beta)),
                _ => {}
            }
        }
        out
    }

    /// Mutable counterpart of [`Network::parameters`], consumed by
    /// optimizers.
    pub fn parameters_mut(&mut self) -> Vec<(NodeId, &mut Tensor, &mut Tensor)> {
        let mut out = Vec::new();
        for (i, node) in self.nodes.iter_mut().enumerate() {
            match &mut node.op {
                NodeOp::FullyConnected { weights, biases }
                | NodeOp::Convolution {
                    kernels: weights,
                    biases,
                }
                | NodeOp::Output {
                    weights, biases, ..
                } => out.push((NodeId(i), weights, biases)),
                NodeOp::BatchNorm { gamma, beta, .. } => out.push((NodeId(i), gamma, beta)),
                _ => {}
            }
        }
        out
    }

    /// True when every parameter of every weighted node is finite.
    pub fn parameters_finite(&self) -> bool {
        self.parameters()
            .iter()
            .all(|(_, w, b)| w.is_finite() && b.is_finite())
    }

    /// XOR fold of the per-node parameter hashes; stable identity for a
    /// parameter snapshot across runs.
    pub fn parameter_hash(&self) -> String {
        let mut folded = [0u8; 32];
        for node in &self.nodes {
            if let Some(hex) = node.parameter_hash() {
                for (i, f) in folded.iter_mut().enumerate() {
                    let byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16)
                        .expect("parameter hash is hex");
                    *f ^= byte;
                }
            }
        }
        folded.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Node-by-node structural equality within the tensor tolerance.
    pub fn equivalent(&self, other: &Network) -> bool {
        self.nodes.len() == other.nodes.len()
            && self
                .nodes
                .iter()
                .zip(&other.nodes)
                .all(|(a, b)| a.equivalent(b))
    }
}
