use burn::{
    config::Config,
    module::{Module, Param},
    nn::Initializer,
    tensor::{backend::Backend, Tensor},
};

/// Configuration to create a [direct convolution](Conv2d) layer using the
/// [init function](Conv2dConfig::init).
#[derive(Config, Debug)]
pub struct Conv2dConfig {
    /// The number of input channels.
    pub channels_in: usize,
    /// The number of output channels.
    pub channels_out: usize,
    /// The size of the square kernel.
    pub kernel_size: usize,
    /// The step of the sliding window. Default: 2
    #[config(default = 2)]
    pub stride: usize,
    /// Symmetric zero-padding added to both spatial borders. Default: 1
    #[config(default = 1)]
    pub padding: usize,
    /// The type of function used to initialize the kernel weights.
    #[config(default = "Initializer::Normal{mean:0.0, std:0.01}")]
    pub initializer: Initializer,
}

/// Applies a 2D convolution by sliding the kernel over every output position,
/// one window at a time.
///
/// This is the direct, unoptimized formulation: no im2col, no FFT, no fused
/// backend kernel. Each output element is the sum over input channels of the
/// elementwise product between an input window and the matching kernel, plus a
/// per-output-channel bias.
///
/// Should be created using [Conv2dConfig].
#[derive(Module, Debug)]
pub struct Conv2d<B: Backend> {
    /// Kernel weights of shape `[channels_out, channels_in, kernel_size, kernel_size]`.
    pub weight: Param<Tensor<B, 4>>,
    /// Bias of shape `[channels_out]`, added to every output position.
    pub bias: Param<Tensor<B, 1>>,
    kernel_size: usize,
    stride: usize,
    padding: usize,
}

impl Conv2dConfig {
    /// Initializes a new [Conv2d] module.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Conv2d<B> {
        let shape = [
            self.channels_out,
            self.channels_in,
            self.kernel_size,
            self.kernel_size,
        ];

        Conv2d {
            weight: self.initializer.init(shape, device),
            bias: Initializer::Zeros.init([self.channels_out], device),
            kernel_size: self.kernel_size,
            stride: self.stride,
            padding: self.padding,
        }
    }
}

impl<B: Backend> Conv2d<B> {
    /// Applies the forward pass on the input tensor.
    ///
    /// # Shapes
    ///
    /// - input: `[batch_size, channels_in, height, width]`
    /// - output: `[batch_size, channels_out, height_out, width_out]`
    ///
    /// where `height_out = (height + 2 * padding - kernel_size) / stride + 1`
    /// and likewise for the width.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch_size, channels_in, height, width] = input.dims();
        let channels_out = self.weight.dims()[0];
        let k = self.kernel_size;

        let out_height = (height + 2 * self.padding - k) / self.stride + 1;
        let out_width = (width + 2 * self.padding - k) / self.stride + 1;

        let x = self.pad(input);
        let weight = self.weight.val().unsqueeze::<5>();

        let mut positions = Vec::with_capacity(out_height * out_width);
        for i in 0..out_height {
            for j in 0..out_width {
                let h = i * self.stride;
                let w = j * self.stride;

                // [batch_size, 1, channels_in, k, k]
                let window = x
                    .clone()
                    .slice([0..batch_size, 0..channels_in, h..h + k, w..w + k])
                    .unsqueeze_dim::<5>(1);

                // Reduce over input channels and both kernel axes.
                let value = window
                    .mul(weight.clone())
                    .reshape([batch_size, channels_out, channels_in * k * k])
                    .sum_dim(2);

                positions.push(value);
            }
        }

        let output = Tensor::cat(positions, 2).reshape([
            batch_size,
            channels_out,
            out_height,
            out_width,
        ]);

        output.add(self.bias.val().reshape([1, channels_out, 1, 1]))
    }

    fn pad(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let p = self.padding;
        if p == 0 {
            return input;
        }

        let [batch_size, channels, height, width] = input.dims();

        Tensor::zeros(
            [batch_size, channels, height + 2 * p, width + 2 * p],
            &input.device(),
        )
        .slice_assign(
            [0..batch_size, 0..channels, p..p + height, p..p + width],
            input,
        )
    }
}
