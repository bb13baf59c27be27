use burn::{
    config::Config,
    module::{Module, Param, RunningState},
    nn::Initializer,
    tensor::{backend::Backend, Tensor},
};

/// Configuration to create a [BatchNorm2d](BatchNorm2d) layer using the
/// [init function](BatchNorm2dConfig::init).
#[derive(Config, Debug)]
pub struct BatchNorm2dConfig {
    /// The number of channels.
    pub num_features: usize,
    /// A value required for numerical stability. Default: 1e-5
    #[config(default = 1e-5)]
    pub epsilon: f64,
    /// Momentum used to update the running statistics. Default: 0.1
    #[config(default = 0.1)]
    pub momentum: f64,
}

/// Per-channel batch normalization over `[batch_size, channels, height, width]`
/// tensors, written out step by step.
///
/// `Y = gamma * (X - mean) / sqrt(var + epsilon) + beta`
///
/// While training (autodiff enabled), `mean` and `var` are the statistics of
/// the current batch over the batch and both spatial axes, and the running
/// buffers follow them by exponential moving average. While evaluating, the
/// running buffers are used as-is and never touched. The variance is the
/// population variance (no Bessel correction), matching the convention of the
/// running buffers.
///
/// Should be created using [BatchNorm2dConfig].
#[derive(Module, Debug)]
pub struct BatchNorm2d<B: Backend> {
    /// The learnable per-channel scale.
    pub gamma: Param<Tensor<B, 1>>,
    /// The learnable per-channel shift.
    pub beta: Param<Tensor<B, 1>>,
    /// The running mean.
    pub running_mean: RunningState<Tensor<B, 1>>,
    /// The running variance.
    pub running_var: RunningState<Tensor<B, 1>>,
    momentum: f64,
    epsilon: f64,
}

impl BatchNorm2dConfig {
    /// Initializes a new [BatchNorm2d] module.
    pub fn init<B: Backend>(&self, device: &B::Device) -> BatchNorm2d<B> {
        let gamma = Initializer::Ones.init([self.num_features], device);
        let beta = Initializer::Zeros.init([self.num_features], device);

        let running_mean = Tensor::zeros([self.num_features], device);
        let running_var = Tensor::ones([self.num_features], device);

        BatchNorm2d {
            gamma,
            beta,
            running_mean: RunningState::new(running_mean),
            running_var: RunningState::new(running_var),
            momentum: self.momentum,
            epsilon: self.epsilon,
        }
    }
}

impl<B: Backend> BatchNorm2d<B> {
    /// Applies the forward pass on the input tensor.
    ///
    /// # Shapes
    ///
    /// - input: `[batch_size, channels, height, width]`
    /// - output: `[batch_size, channels, height, width]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        match B::ad_enabled() {
            true => self.forward_train(input),
            false => self.forward_inference(input),
        }
    }

    fn forward_inference(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let device = input.device();
        let channels = input.dims()[1];

        let mean = self
            .running_mean
            .value()
            .to_device(&device)
            .reshape([1, channels, 1, 1]);
        let var = self
            .running_var
            .value()
            .to_device(&device)
            .reshape([1, channels, 1, 1]);

        self.normalize(input, mean, var)
    }

    fn forward_train(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let device = input.device();
        let [batch_size, channels, height, width] = input.dims();
        let flatten_size = batch_size * height * width;

        // Statistics per channel, over the batch and both spatial axes.
        let mean = input
            .clone()
            .swap_dims(0, 1)
            .reshape([channels, flatten_size])
            .mean_dim(1)
            .reshape([1, channels, 1, 1]);

        let var = input
            .clone()
            .sub(mean.clone())
            .powf_scalar(2.0)
            .swap_dims(0, 1)
            .reshape([channels, flatten_size])
            .mean_dim(1)
            .reshape([1, channels, 1, 1]);

        let running_mean = self.running_mean.value_sync().to_device(&device);
        let running_var = self.running_var.value_sync().to_device(&device);

        let running_mean = running_mean.mul_scalar(1.0 - self.momentum).add(
            mean.clone()
                .detach()
                .mul_scalar(self.momentum)
                .reshape([channels]),
        );
        let running_var = running_var.mul_scalar(1.0 - self.momentum).add(
            var.clone()
                .detach()
                .mul_scalar(self.momentum)
                .reshape([channels]),
        );

        self.running_mean.update(running_mean.detach());
        self.running_var.update(running_var.detach());

        // The batch statistics, not the running ones, normalize the batch.
        self.normalize(input, mean, var)
    }

    fn normalize(
        &self,
        x: Tensor<B, 4>,
        mean: Tensor<B, 4>,
        var: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let channels = x.dims()[1];
        let std = var.add_scalar(self.epsilon).sqrt();

        let x = x.sub(mean).div(std);

        x.mul(self.gamma.val().reshape([1, channels, 1, 1]))
            .add(self.beta.val().reshape([1, channels, 1, 1]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TestAutodiffBackend, TestBackend};
    use burn::module::AutodiffModule;

    #[test]
    fn training_mode_uses_batch_statistics() {
        let device = Default::default();
        let norm = BatchNorm2dConfig::new(2).init::<TestAutodiffBackend>(&device);

        // Each channel holds a single constant, so x == mean and the
        // normalized output collapses to beta, which starts at zero.
        let input = constant_channels::<TestAutodiffBackend>(3.0, -2.0, &device);
        let output = norm.forward(input);

        for value in output.into_data().to_vec::<f32>().unwrap() {
            assert!(value.abs() < 1e-5);
        }
    }

    #[test]
    fn running_statistics_follow_exponential_moving_average() {
        let device = Default::default();
        let norm = BatchNorm2dConfig::new(2).init::<TestAutodiffBackend>(&device);

        let _ = norm.forward(constant_channels::<TestAutodiffBackend>(3.0, -2.0, &device));

        // mean: (1 - 0.1) * 0 + 0.1 * batch_mean, var: (1 - 0.1) * 1 + 0.1 * 0.
        let mean = norm.running_mean.value_sync().into_data();
        let mean = mean.to_vec::<f32>().unwrap();
        assert!((mean[0] - 0.3).abs() < 1e-5);
        assert!((mean[1] + 0.2).abs() < 1e-5);

        let var = norm.running_var.value_sync().into_data();
        let var = var.to_vec::<f32>().unwrap();
        assert!((var[0] - 0.9).abs() < 1e-5);
        assert!((var[1] - 0.9).abs() < 1e-5);
    }

    #[test]
    fn evaluation_mode_ignores_batch_composition() {
        let device = Default::default();
        let norm = BatchNorm2dConfig::new(2).init::<TestAutodiffBackend>(&device);

        // One training step so the running statistics are not all-default.
        let _ = norm.forward(constant_channels::<TestAutodiffBackend>(3.0, -2.0, &device));
        let norm = norm.valid();

        let lone = Tensor::<TestBackend, 4>::full([1, 2, 2, 2], 0.7, &device);
        let crowd = Tensor::cat(
            vec![
                lone.clone(),
                Tensor::full([1, 2, 2, 2], 42.0, &device),
                Tensor::full([1, 2, 2, 2], -3.5, &device),
            ],
            0,
        );

        let alone = norm.forward(lone).into_data().to_vec::<f32>().unwrap();
        let first_of_crowd = norm
            .forward(crowd)
            .slice([0..1, 0..2, 0..2, 0..2])
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        assert_eq!(alone.len(), first_of_crowd.len());
        for (a, b) in alone.iter().zip(first_of_crowd.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn evaluation_mode_never_updates_running_statistics() {
        let device = Default::default();
        let norm = BatchNorm2dConfig::new(2).init::<TestAutodiffBackend>(&device);

        let _ = norm.forward(constant_channels::<TestAutodiffBackend>(3.0, -2.0, &device));
        let before = norm
            .running_mean
            .value_sync()
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        let frozen = norm.clone().valid();
        let _ = frozen.forward(constant_channels::<TestBackend>(100.0, 100.0, &device));

        let after = frozen
            .running_mean
            .value_sync()
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(before, after);
    }

    fn constant_channels<B: Backend>(
        first: f64,
        second: f64,
        device: &B::Device,
    ) -> Tensor<B, 4> {
        Tensor::cat(
            vec![
                Tensor::<B, 4>::full([2, 1, 2, 2], first, device),
                Tensor::full([2, 1, 2, 2], second, device),
            ],
            1,
        )
    }
}
