use neurite::graph::Network;
use neurite::optim::{AdaDelta, AdaGrad, Adam, Momentum, Optimizer, RmsProp, Sgd};
use neurite::{
    ActivationKind, BiasInit, Context, CostKind, GraphBuilder, SampleShape, Tensor, WeightInit,
};

fn toy_network(ctx: &Context) -> Network {
    let mut gb = GraphBuilder::new();
    let x = gb.placeholder(SampleShape::features(2).unwrap()).unwrap();
    let fc = gb
        .fully_connected(ctx, x, 4, WeightInit::GlorotUniform, BiasInit::Zero)
        .unwrap();
    let act = gb.activation(fc, ActivationKind::Tanh).unwrap();
    let out = gb
        .output(
            ctx,
            act,
            2,
            ActivationKind::Sigmoid,
            CostKind::Quadratic,
            WeightInit::GlorotUniform,
            BiasInit::Zero,
        )
        .unwrap();
    gb.build(out).unwrap()
}

fn toy_data(ctx: &Context) -> (Tensor, Tensor) {
    let x = Tensor::from_matrix(
        &ctx.pool,
        &[
            vec![0.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![1.0, 1.0],
        ],
    )
    .unwrap();
    let y = Tensor::from_matrix(
        &ctx.pool,
        &[
            vec![0.9, 0.1],
            vec![0.1, 0.9],
            vec![0.1, 0.9],
            vec![0.9, 0.1],
        ],
    )
    .unwrap();
    (x, y)
}

fn descend(optimizer: &mut dyn Optimizer, seed: u64, iterations: usize) -> (f32, f32) {
    let ctx = Context::with_seed(seed);
    let mut net = toy_network(&ctx);
    let (x, y) = toy_data(&ctx);
    let mut first = f32::NAN;
    let mut last = f32::NAN;
    for i in 0..iterations {
        let (cost, grads) = net.backward(&ctx, &x, &y).unwrap();
        if i == 0 {
            first = cost;
        }
        last = cost;
        let mut params = net.parameters_mut();
        optimizer.step(&mut params, &grads, 4).unwrap();
        drop(params);
        grads.release(&ctx.pool);
    }
    (first, last)
}

#[test]
fn hyperparameters_are_validated_at_construction() {
    assert!(Sgd::new(0.0, 0.0).is_err());
    assert!(Sgd::new(0.1, 1.0).is_err());
    assert!(Momentum::new(0.1, 1.0).is_err());
    assert!(Momentum::new(-0.1, 0.5).is_err());
    assert!(AdaGrad::new(0.1, 0.0).is_err());
    assert!(AdaDelta::new(1.0, 1e-6).is_err());
    assert!(AdaDelta::new(0.95, -1.0).is_err());
    assert!(RmsProp::new(0.1, 1.5, 1e-8).is_err());
    assert!(Adam::new(0.001, 0.9, 1.0, 1e-8).is_err());
    assert!(Adam::new(0.001, 1.2, 0.999, 1e-8).is_err());
}

#[test]
fn sgd_applies_the_plain_update_rule() {
    let ctx = Context::with_seed(40);
    let mut net = toy_network(&ctx);
    let (x, y) = toy_data(&ctx);
    let (_, grads) = net.backward(&ctx, &x, &y).unwrap();

    let (first_id, before, grad_w) = {
        let params = net.parameters();
        let (id, w, _) = params[0];
        let g = grads.get(id).unwrap();
        (id, w.as_slice().to_vec(), g.weights.as_slice().to_vec())
    };

    let eta = 0.25;
    let mut sgd = Sgd::new(eta, 0.0).unwrap();
    let mut params = net.parameters_mut();
    sgd.step(&mut params, &grads, 4).unwrap();
    drop(params);

    let params = net.parameters();
    let (_, w, _) = params.iter().find(|(id, _, _)| *id == first_id).unwrap();
    for ((after, before), g) in w.as_slice().iter().zip(&before).zip(&grad_w) {
        assert!((after - (before - eta * g)).abs() < 1e-6);
    }
    grads.release(&ctx.pool);
}

#[test]
fn adam_first_step_is_learning_rate_sized() {
    let ctx = Context::with_seed(41);
    let mut net = toy_network(&ctx);
    let (x, y) = toy_data(&ctx);
    let (_, grads) = net.backward(&ctx, &x, &y).unwrap();

    let (first_id, before, grad_w) = {
        let params = net.parameters();
        let (id, w, _) = params[0];
        let g = grads.get(id).unwrap();
        (id, w.as_slice().to_vec(), g.weights.as_slice().to_vec())
    };

    let eta = 0.01;
    let mut adam = Adam::new(eta, 0.9, 0.999, 1e-8).unwrap();
    let mut params = net.parameters_mut();
    adam.step(&mut params, &grads, 4).unwrap();
    drop(params);

    // with bias correction the first update is ±eta wherever the gradient
    // is comfortably above epsilon
    let params = net.parameters();
    let (_, w, _) = params.iter().find(|(id, _, _)| *id == first_id).unwrap();
    for ((after, before), g) in w.as_slice().iter().zip(&before).zip(&grad_w) {
        if g.abs() > 1e-3 {
            let delta = (after - before).abs();
            assert!((delta - eta).abs() < eta * 0.1, "delta {} vs eta {}", delta, eta);
        }
    }
    grads.release(&ctx.pool);
}

#[test]
fn every_rule_descends_on_the_toy_problem() {
    let cases: Vec<(&str, Box<dyn Optimizer>)> = vec![
        ("sgd", Box::new(Sgd::new(0.5, 0.0).unwrap())),
        ("sgd+l2", Box::new(Sgd::new(0.5, 0.001).unwrap())),
        ("momentum", Box::new(Momentum::new(0.2, 0.9).unwrap())),
        ("adagrad", Box::new(AdaGrad::new(0.5, 1e-8).unwrap())),
        ("adadelta", Box::new(AdaDelta::standard())),
        ("rmsprop", Box::new(RmsProp::new(0.05, 0.9, 1e-8).unwrap())),
        ("adam", Box::new(Adam::new(0.05, 0.9, 0.999, 1e-8).unwrap())),
    ];
    for (name, mut opt) in cases {
        let (first, last) = descend(opt.as_mut(), 42, 400);
        assert!(
            last < first,
            "{}: cost did not descend ({} -> {})",
            name,
            first,
            last
        );
        assert!(last.is_finite(), "{}: diverged", name);
    }
}
