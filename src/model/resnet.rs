//! ResNet-18 feature extractor (no classification top)

use burn::{
    module::Module,
    nn::{
        pool::{MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d,
    },
    tensor::{activation::relu, backend::Backend, Tensor},
};

use super::blocks::ConvNorm;

/// Channels of the feature map this backbone emits
pub const RESNET18_FEATURES: usize = 512;

const BN_EPSILON: f64 = 1e-5;

/// Two 3x3 convolutions with an identity (or 1x1 projected) shortcut
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: ConvNorm<B>,
    conv2: ConvNorm<B>,
    downsample: Option<ConvNorm<B>>,
}

impl<B: Backend> BasicBlock<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = (stride != 1 || in_channels != out_channels).then(|| {
            ConvNorm::new([in_channels, out_channels], 1, stride, 1, BN_EPSILON, device)
        });

        Self {
            conv1: ConvNorm::new([in_channels, out_channels], 3, stride, 1, BN_EPSILON, device),
            conv2: ConvNorm::new([out_channels, out_channels], 3, 1, 1, BN_EPSILON, device),
            downsample,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };

        let out = relu(self.conv1.forward(x));
        let out = self.conv2.forward(out);
        relu(out + identity)
    }
}

#[derive(Module, Debug)]
pub struct ResNet18<B: Backend> {
    stem: ConvNorm<B>,
    pool: MaxPool2d,
    blocks: Vec<BasicBlock<B>>,
}

impl<B: Backend> ResNet18<B> {
    pub fn new(device: &B::Device) -> Self {
        let stem = ConvNorm::new([3, 64], 7, 2, 1, BN_EPSILON, device);
        let pool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        // (channels, stride of the first block) for the four stages
        let stages = [(64, 1), (128, 2), (256, 2), (RESNET18_FEATURES, 2)];
        let mut blocks = Vec::with_capacity(8);
        let mut in_channels = 64;
        for (channels, stride) in stages {
            blocks.push(BasicBlock::new(in_channels, channels, stride, device));
            blocks.push(BasicBlock::new(channels, channels, 1, device));
            in_channels = channels;
        }

        Self { stem, pool, blocks }
    }

    /// `[batch, 3, H, W]` ImageNet-normalized to `[batch, 512, H/32, W/32]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.stem.forward(x));
        let mut x = self.pool.forward(x);
        for block in &self.blocks {
            x = block.forward(x);
        }
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_output_shape() {
        let device = Default::default();
        let model = ResNet18::<TestBackend>::new(&device);
        let out = model.forward(Tensor::zeros([1, 3, 64, 64], &device));
        assert_eq!(out.dims(), [1, RESNET18_FEATURES, 2, 2]);
    }

    #[test]
    fn test_parameter_count() {
        let device = Default::default();
        let params = ResNet18::<TestBackend>::new(&device).num_params();
        // ~11.2M without the fully connected top
        assert!(params > 11_000_000 && params < 11_400_000, "{params}");
    }
}
