use crate::{
    conv::{Conv2d, Conv2dConfig},
    norm::{BatchNorm2d, BatchNorm2dConfig},
};
use burn::{
    config::Config,
    module::Module,
    nn::{
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// MNIST images are 28x28 single-channel.
const IMAGE_SIZE: usize = 28;

/// Configuration to create the [classifier](Model) using the
/// [init function](ModelConfig::init).
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// The number of output classes.
    #[config(default = 10)]
    pub num_classes: usize,
    /// The number of feature channels produced by the convolution.
    #[config(default = 8)]
    pub conv_channels: usize,
    /// The size of the square convolution kernel.
    #[config(default = 3)]
    pub kernel_size: usize,
    /// The stride of the convolution.
    #[config(default = 2)]
    pub stride: usize,
    /// The zero-padding of the convolution.
    #[config(default = 1)]
    pub padding: usize,
    /// The size (and stride) of the square max-pooling window.
    #[config(default = 2)]
    pub pool_size: usize,
}

/// A linear stack: convolution, batch norm, ReLU, max-pooling, flatten,
/// fully-connected classifier.
///
/// The convolution and batch norm are the hand-written layers of this crate;
/// activation, pooling and the classifier head come straight from the
/// framework.
#[derive(Module, Debug)]
pub struct Model<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm2d<B>,
    activation: Relu,
    pool: MaxPool2d,
    fc: Linear<B>,
}

impl ModelConfig {
    /// Initializes the model on the given device.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Model<B> {
        let conv = Conv2dConfig::new(1, self.conv_channels, self.kernel_size)
            .with_stride(self.stride)
            .with_padding(self.padding)
            .init(device);
        let norm = BatchNorm2dConfig::new(self.conv_channels).init(device);
        let pool = MaxPool2dConfig::new([self.pool_size, self.pool_size])
            .with_strides([self.pool_size, self.pool_size])
            .init();

        // The classifier width must match the flattened feature map exactly;
        // it follows from the convolution and pooling geometry. A mismatch is
        // a configuration error, surfaced as a shape panic on first use.
        let conv_size = (IMAGE_SIZE + 2 * self.padding - self.kernel_size) / self.stride + 1;
        let pooled_size = (conv_size - self.pool_size) / self.pool_size + 1;
        let fc = LinearConfig::new(
            self.conv_channels * pooled_size * pooled_size,
            self.num_classes,
        )
        .init(device);

        Model {
            conv,
            norm,
            activation: Relu::new(),
            pool,
            fc,
        }
    }
}

impl<B: Backend> Model<B> {
    /// Applies the forward pass on a batch of images.
    ///
    /// # Shapes
    ///
    /// - images: `[batch_size, 1, 28, 28]`
    /// - output: `[batch_size, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv.forward(images);
        let x = self.norm.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool.forward(x);

        let [batch_size, channels, height, width] = x.dims();
        let x = x.reshape([batch_size, channels * height * width]);

        self.fc.forward(x)
    }
}
