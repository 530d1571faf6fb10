//! Numerical gradient checks: central differences of the training-mode cost
//! against the analytic gradients of the backward pass, on small random
//! fixtures. Dropout is excluded (its mask resamples per pass); every other
//! node kind is covered.

use neurite::graph::Network;
use neurite::{
    ActivationKind, BiasInit, Context, CostKind, GraphBuilder, NodeId, NormMode, SampleShape,
    Shape, Tensor, WeightInit,
};

fn training_cost(net: &mut Network, ctx: &Context, x: &Tensor, y: &Tensor) -> f32 {
    let (cost, grads) = net.backward(ctx, x, y).unwrap();
    grads.release(&ctx.pool);
    cost
}

fn nudge(net: &mut Network, id: NodeId, bias_side: bool, idx: usize, delta: f32) {
    let mut params = net.parameters_mut();
    let (_, w, b) = params
        .iter_mut()
        .find(|(pid, _, _)| *pid == id)
        .expect("parameter node exists");
    let slice = if bias_side {
        b.as_slice_mut()
    } else {
        w.as_slice_mut()
    };
    slice[idx] += delta;
}

fn check_gradients(net: &mut Network, ctx: &Context, x: &Tensor, y: &Tensor) {
    let (_, grads) = net.backward(ctx, x, y).unwrap();
    let entries: Vec<(NodeId, Vec<f32>, Vec<f32>)> = net
        .parameters()
        .iter()
        .map(|(id, w, b)| {
            let g = grads.get(*id).expect("weighted node produced gradients");
            assert_eq!(g.weights.shape(), w.shape(), "dJdw shape for node {:?}", id);
            assert_eq!(g.biases.shape(), b.shape(), "dJdb shape for node {:?}", id);
            (
                *id,
                g.weights.as_slice().to_vec(),
                g.biases.as_slice().to_vec(),
            )
        })
        .collect();
    grads.release(&ctx.pool);

    let h = 1e-2f32;
    for (id, grad_w, grad_b) in entries {
        for (bias_side, analytic) in [(false, &grad_w), (true, &grad_b)] {
            for (idx, &a) in analytic.iter().enumerate() {
                nudge(net, id, bias_side, idx, h);
                let plus = training_cost(net, ctx, x, y);
                nudge(net, id, bias_side, idx, -2.0 * h);
                let minus = training_cost(net, ctx, x, y);
                nudge(net, id, bias_side, idx, h);
                let numeric = (plus - minus) / (2.0 * h);
                let tol = 1e-3 + 1e-3 * a.abs().max(numeric.abs());
                assert!(
                    (a - numeric).abs() <= tol,
                    "node {:?} {} [{}]: analytic {} vs numeric {}",
                    id,
                    if bias_side { "bias" } else { "weight" },
                    idx,
                    a,
                    numeric
                );
            }
        }
    }
}

/// Deterministic pseudo-random fill, so fixtures stay identical across runs.
fn fixture(ctx: &Context, shape: Shape, scale: f32) -> Tensor {
    let mut t = Tensor::new(&ctx.pool, shape, neurite::AllocMode::Default).unwrap();
    let mut state = 0x2545f4914f6cdd1du64;
    for v in t.as_slice_mut() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        *v = ((state >> 40) as f32 / (1u64 << 24) as f32 - 0.5) * 2.0 * scale;
    }
    t
}

fn one_hot(ctx: &Context, labels: &[usize], classes: usize) -> Tensor {
    let rows: Vec<Vec<f32>> = labels
        .iter()
        .map(|&l| {
            let mut row = vec![0.0; classes];
            row[l] = 1.0;
            row
        })
        .collect();
    Tensor::from_matrix(&ctx.pool, &rows).unwrap()
}

#[test]
fn dense_network_with_quadratic_cost() {
    let ctx = Context::with_seed(100);
    let mut gb = GraphBuilder::new();
    let x = gb.placeholder(SampleShape::features(3).unwrap()).unwrap();
    let fc = gb
        .fully_connected(&ctx, x, 4, WeightInit::GlorotUniform, BiasInit::Zero)
        .unwrap();
    let act = gb.activation(fc, ActivationKind::Tanh).unwrap();
    let act2 = gb.activation(act, ActivationKind::Elu).unwrap();
    let out = gb
        .output(
            &ctx,
            act2,
            2,
            ActivationKind::Sigmoid,
            CostKind::Quadratic,
            WeightInit::GlorotUniform,
            BiasInit::Zero,
        )
        .unwrap();
    let mut net = gb.build(out).unwrap();

    let input = fixture(&ctx, Shape::matrix(4, 3).unwrap(), 1.0);
    let target = Tensor::from_matrix(
        &ctx.pool,
        &[
            vec![0.1, 0.9],
            vec![0.8, 0.2],
            vec![0.5, 0.5],
            vec![0.0, 1.0],
        ],
    )
    .unwrap();
    check_gradients(&mut net, &ctx, &input, &target);
}

#[test]
fn convolution_pooling_softmax_network() {
    let ctx = Context::with_seed(101);
    let mut gb = GraphBuilder::new();
    let x = gb.placeholder(SampleShape::new(1, 5, 5).unwrap()).unwrap();
    let conv = gb.convolution(&ctx, x, (2, 2), 2, BiasInit::Zero).unwrap();
    let pool = gb.pooling(conv).unwrap();
    let act = gb.activation(pool, ActivationKind::LeCunTanh).unwrap();
    let out = gb
        .softmax(&ctx, act, 3, WeightInit::LeCunUniform, BiasInit::Zero)
        .unwrap();
    let mut net = gb.build(out).unwrap();

    let input = fixture(&ctx, Shape::new(2, 1, 5, 5).unwrap(), 1.0);
    let target = one_hot(&ctx, &[0, 2], 3);
    check_gradients(&mut net, &ctx, &input, &target);
}

#[test]
fn per_activation_batchnorm_network() {
    let ctx = Context::with_seed(102);
    let mut gb = GraphBuilder::new();
    let x = gb.placeholder(SampleShape::features(4).unwrap()).unwrap();
    let fc = gb
        .fully_connected(&ctx, x, 3, WeightInit::GlorotUniform, BiasInit::Zero)
        .unwrap();
    let bn = gb.batch_norm(&ctx, fc, NormMode::PerActivation).unwrap();
    let act = gb.activation(bn, ActivationKind::Sigmoid).unwrap();
    let out = gb
        .output(
            &ctx,
            act,
            2,
            ActivationKind::Sigmoid,
            CostKind::Quadratic,
            WeightInit::GlorotUniform,
            BiasInit::Zero,
        )
        .unwrap();
    let mut net = gb.build(out).unwrap();

    let input = fixture(&ctx, Shape::matrix(4, 4).unwrap(), 1.5);
    let target = Tensor::from_matrix(
        &ctx.pool,
        &[
            vec![0.2, 0.8],
            vec![0.9, 0.1],
            vec![0.4, 0.6],
            vec![0.7, 0.3],
        ],
    )
    .unwrap();
    check_gradients(&mut net, &ctx, &input, &target);
}

#[test]
fn spatial_batchnorm_convolutional_network() {
    let ctx = Context::with_seed(103);
    let mut gb = GraphBuilder::new();
    let x = gb.placeholder(SampleShape::new(1, 4, 4).unwrap()).unwrap();
    let conv = gb.convolution(&ctx, x, (2, 2), 2, BiasInit::Zero).unwrap();
    let bn = gb.batch_norm(&ctx, conv, NormMode::Spatial).unwrap();
    let out = gb
        .softmax(&ctx, bn, 2, WeightInit::LeCunUniform, BiasInit::Zero)
        .unwrap();
    let mut net = gb.build(out).unwrap();

    let input = fixture(&ctx, Shape::new(3, 1, 4, 4).unwrap(), 1.0);
    let target = one_hot(&ctx, &[1, 0, 1], 2);
    check_gradients(&mut net, &ctx, &input, &target);
}

#[test]
fn fan_out_with_sum_and_concat() {
    let ctx = Context::with_seed(104);
    let mut gb = GraphBuilder::new();
    let x = gb.placeholder(SampleShape::new(1, 4, 4).unwrap()).unwrap();
    let a = gb.convolution(&ctx, x, (2, 2), 3, BiasInit::Zero).unwrap();
    let b = gb.convolution(&ctx, x, (2, 2), 3, BiasInit::Zero).unwrap();
    let merged = gb.sum(a, b).unwrap();
    // `a` feeds both the sum and the concat, exercising gradient fan-in
    let stacked = gb.depth_concat(merged, a).unwrap();
    let out = gb
        .softmax(&ctx, stacked, 2, WeightInit::LeCunUniform, BiasInit::Zero)
        .unwrap();
    let mut net = gb.build(out).unwrap();

    let input = fixture(&ctx, Shape::new(2, 1, 4, 4).unwrap(), 1.0);
    let target = one_hot(&ctx, &[0, 1], 2);
    check_gradients(&mut net, &ctx, &input, &target);
}

#[test]
fn cross_entropy_single_sample_network() {
    // cross-entropy normalizes the cost by the batch size but its delta is
    // the plain ŷ − y, so the finite-difference comparison uses one sample
    let ctx = Context::with_seed(105);
    let mut gb = GraphBuilder::new();
    let x = gb.placeholder(SampleShape::features(3).unwrap()).unwrap();
    let fc = gb
        .fully_connected(&ctx, x, 4, WeightInit::GlorotUniform, BiasInit::Zero)
        .unwrap();
    let act = gb.activation(fc, ActivationKind::Softplus).unwrap();
    let out = gb
        .output(
            &ctx,
            act,
            2,
            ActivationKind::Sigmoid,
            CostKind::CrossEntropy,
            WeightInit::GlorotUniform,
            BiasInit::Zero,
        )
        .unwrap();
    let mut net = gb.build(out).unwrap();

    let input = fixture(&ctx, Shape::matrix(1, 3).unwrap(), 1.0);
    let target = Tensor::from_matrix(&ctx.pool, &[vec![1.0, 0.0]]).unwrap();
    check_gradients(&mut net, &ctx, &input, &target);
}
