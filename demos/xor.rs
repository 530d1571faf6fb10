use neurite::data::Dataset;
use neurite::optim::AdaDelta;
use neurite::train::TrainingProgress;
use neurite::{
    ActivationKind, BiasInit, Context, GraphBuilder, SampleShape, Tensor, Trainer,
    TrainingOptions, WeightInit,
};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("XOR training (graph API, AdaDelta)");

    let ctx = Context::with_seed(11);

    // 2 inputs -> 2 sigmoid hidden units -> softmax over {true, false}
    let mut gb = GraphBuilder::new();
    let x = gb.placeholder(SampleShape::features(2)?)?;
    let hidden = gb.fully_connected(&ctx, x, 2, WeightInit::GlorotUniform, BiasInit::Zero)?;
    let act = gb.activation(hidden, ActivationKind::Sigmoid)?;
    let out = gb.softmax(&ctx, act, 2, WeightInit::GlorotUniform, BiasInit::Zero)?;
    let mut net = gb.build(out)?;

    // class 0 is "true"
    let samples = vec![
        (vec![0.0, 0.0], vec![0.0, 1.0]),
        (vec![0.0, 1.0], vec![1.0, 0.0]),
        (vec![1.0, 0.0], vec![1.0, 0.0]),
        (vec![1.0, 1.0], vec![0.0, 1.0]),
    ];
    let mut training = Dataset::from_samples(&ctx.pool, &samples, SampleShape::features(2)?, 4)?;

    let mut on_progress = |p: TrainingProgress| {
        if p.iteration % 500 == 0 {
            println!(
                "iteration {:>4}: cost = {:.6}, accuracy = {:.0}%",
                p.iteration,
                p.cost,
                p.accuracy.unwrap_or(0.0) * 100.0
            );
        }
    };

    let mut trainer = Trainer::new(
        &mut net,
        Box::new(AdaDelta::standard()),
        TrainingOptions {
            epochs: 3000,
            ..TrainingOptions::default()
        },
    )?;
    let report = trainer.run(
        &ctx,
        &mut training,
        None,
        None,
        Some(&mut on_progress),
        None,
    )?;
    println!(
        "finished: {:?} after {:?} ({} epochs)",
        report.stop_reason,
        report.elapsed,
        report.epochs.len()
    );

    let input = Tensor::from_matrix(
        &ctx.pool,
        &[
            vec![0.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![1.0, 1.0],
        ],
    )?;
    let classes = net.predict(&ctx, &input)?;
    for (pair, class) in [(0, 0), (0, 1), (1, 0), (1, 1)].iter().zip(classes) {
        println!("{:?} -> {}", pair, if class == 0 { "true" } else { "false" });
    }
    Ok(())
}
