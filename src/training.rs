use crate::{
    data::MnistBatcher,
    model::{Model, ModelConfig},
};
use burn::{
    config::Config,
    data::{dataloader::DataLoaderBuilder, dataset::vision::MnistDataset},
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{GradientsParams, Optimizer, SgdConfig},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};

#[derive(Config)]
pub struct TrainingConfig {
    #[config(default = 50)]
    pub num_epochs: usize,
    #[config(default = 64)]
    pub batch_size: usize,
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 0.1)]
    pub lr: f64,
    pub model: ModelConfig,
    pub optimizer: SgdConfig,
}

/// Trains the model on the MNIST train split, then measures it once on the
/// test split with frozen statistics.
pub fn run<B: AutodiffBackend>(device: B::Device) {
    let config = TrainingConfig::new(ModelConfig::new(), SgdConfig::new());
    B::seed(config.seed);

    let mut model: Model<B> = config.model.init(&device);
    let mut optim = config.optimizer.init();

    let dataloader_train = DataLoaderBuilder::new(MnistBatcher::default())
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(MnistDataset::train());

    let dataloader_test = DataLoaderBuilder::new(MnistBatcher::default())
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(MnistDataset::test());

    log::info!(
        "Training {} epochs of batch size {} with lr {}",
        config.num_epochs,
        config.batch_size,
        config.lr
    );

    for epoch in 1..config.num_epochs + 1 {
        let mut total_loss = 0.0f64;

        for (iteration, batch) in dataloader_train.iter().enumerate() {
            let output = model.forward(batch.images);
            let loss = CrossEntropyLossConfig::new()
                .init(&output.device())
                .forward(output, batch.targets);

            let loss_value = loss.clone().into_scalar().elem::<f32>();
            total_loss += loss_value as f64;

            println!("[Train - Epoch {epoch} - Iteration {iteration}] Loss {loss_value:.4}");

            // Gradients for the current backward pass, linked to each
            // parameter of the model, then one optimizer step.
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(config.lr, model, grads);
        }

        println!("Epoch {epoch}, Loss: {total_loss:.4}");
    }

    // One pass over the test split with autodiff disabled: batch norm runs on
    // its running statistics and nothing is updated.
    log::info!("Evaluating on the test split");
    let model_valid = model.valid();

    let mut total_loss = 0.0f64;
    let mut num_correct = 0usize;
    let mut num_samples = 0usize;

    for batch in dataloader_test.iter() {
        let output = model_valid.forward(batch.images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), batch.targets.clone());

        let batch_size = batch.targets.dims()[0];
        num_samples += batch_size;
        num_correct += count_correct(output, batch.targets);
        total_loss += loss.into_scalar().elem::<f32>() as f64 * batch_size as f64;
    }

    println!(
        "[Test] Avg loss {:.4} | Accuracy {:.2} %",
        total_loss / num_samples as f64,
        100.0 * num_correct as f64 / num_samples as f64,
    );
}

fn count_correct<B: Backend>(output: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let predictions = output.argmax(1).squeeze::<1>(1);

    predictions
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize
}
