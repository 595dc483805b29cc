//! Building blocks shared by the backbones

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d,
    },
    tensor::{activation::relu, backend::Backend, Tensor},
};

/// Non-linearity applied after a convolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Identity,
    Relu,
    HardSwish,
}

impl Activation {
    pub fn apply<B: Backend, const D: usize>(self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Identity => x,
            Activation::Relu => relu(x),
            Activation::HardSwish => x.clone() * hard_sigmoid(x),
        }
    }
}

/// `relu6(x + 3) / 6`
pub fn hard_sigmoid<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.add_scalar(3.0).clamp(0.0, 6.0).div_scalar(6.0)
}

/// Round `value` to a multiple of 8 without dropping more than 10%
pub fn make_divisible(value: usize) -> usize {
    let rounded = ((value + 4) / 8 * 8).max(8);
    if (rounded as f64) < 0.9 * value as f64 {
        rounded + 8
    } else {
        rounded
    }
}

/// Bias-free convolution followed by batch norm
#[derive(Module, Debug)]
pub struct ConvNorm<B: Backend> {
    pub conv: Conv2d<B>,
    pub norm: BatchNorm<B>,
}

impl<B: Backend> ConvNorm<B> {
    /// Square kernel with `kernel / 2` padding, so stride 1 keeps the spatial size
    pub fn new(
        channels: [usize; 2],
        kernel: usize,
        stride: usize,
        groups: usize,
        epsilon: f64,
        device: &B::Device,
    ) -> Self {
        let pad = kernel / 2;
        let conv = Conv2dConfig::new(channels, [kernel, kernel])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(pad, pad))
            .with_groups(groups)
            .with_bias(false)
            .init(device);
        let norm = BatchNormConfig::new(channels[1])
            .with_epsilon(epsilon)
            .init(device);

        Self { conv, norm }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.norm.forward(self.conv.forward(x))
    }
}

/// Channel attention: pooled descriptor -> bottleneck -> per-channel gate
#[derive(Module, Debug)]
pub struct SqueezeExcite<B: Backend> {
    pool: AdaptiveAvgPool2d,
    reduce: Conv2d<B>,
    expand: Conv2d<B>,
}

impl<B: Backend> SqueezeExcite<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        let squeezed = make_divisible(channels / 4);
        Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            reduce: Conv2dConfig::new([channels, squeezed], [1, 1]).init(device),
            expand: Conv2dConfig::new([squeezed, channels], [1, 1]).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let gate = self.pool.forward(x.clone());
        let gate = relu(self.reduce.forward(gate));
        let gate = hard_sigmoid(self.expand.forward(gate));
        x * gate
    }
}
