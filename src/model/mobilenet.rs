//! MobileNetV3-Small feature extractor (no classification top)
//!
//! Stem convolution, eleven inverted-residual blocks and a final 1x1
//! projection to 576 channels. The output stride is 32.

use burn::{
    module::Module,
    tensor::{backend::Backend, Tensor},
};

use super::blocks::{Activation, ConvNorm, SqueezeExcite};

/// Channels of the feature map this backbone emits
pub const MOBILENET_V3_SMALL_FEATURES: usize = 576;

const BN_EPSILON: f64 = 1e-3;

struct BlockSpec {
    kernel: usize,
    expanded: usize,
    out: usize,
    squeeze_excite: bool,
    activation: Activation,
    stride: usize,
}

const fn block(
    kernel: usize,
    expanded: usize,
    out: usize,
    squeeze_excite: bool,
    activation: Activation,
    stride: usize,
) -> BlockSpec {
    BlockSpec {
        kernel,
        expanded,
        out,
        squeeze_excite,
        activation,
        stride,
    }
}

const RE: Activation = Activation::Relu;
const HS: Activation = Activation::HardSwish;

const BLOCKS: [BlockSpec; 11] = [
    block(3, 16, 16, true, RE, 2),
    block(3, 72, 24, false, RE, 2),
    block(3, 88, 24, false, RE, 1),
    block(5, 96, 40, true, HS, 2),
    block(5, 240, 40, true, HS, 1),
    block(5, 240, 40, true, HS, 1),
    block(5, 120, 48, true, HS, 1),
    block(5, 144, 48, true, HS, 1),
    block(5, 288, 96, true, HS, 2),
    block(5, 576, 96, true, HS, 1),
    block(5, 576, 96, true, HS, 1),
];

const STEM_CHANNELS: usize = 16;

/// `(has_expand, has_squeeze_excite)` for each inverted-residual block
pub(crate) fn block_layout() -> Vec<(bool, bool)> {
    let mut in_channels = STEM_CHANNELS;
    BLOCKS
        .iter()
        .map(|spec| {
            let layout = (spec.expanded != in_channels, spec.squeeze_excite);
            in_channels = spec.out;
            layout
        })
        .collect()
}

/// Expand (1x1) -> depthwise (kxk) -> optional squeeze-excite -> project (1x1),
/// with a skip connection when input and output shapes match
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    expand: Option<ConvNorm<B>>,
    depthwise: ConvNorm<B>,
    squeeze_excite: Option<SqueezeExcite<B>>,
    project: ConvNorm<B>,
}

impl<B: Backend> InvertedResidual<B> {
    fn new(in_channels: usize, spec: &BlockSpec, device: &B::Device) -> Self {
        let expand = (spec.expanded != in_channels).then(|| {
            ConvNorm::new([in_channels, spec.expanded], 1, 1, 1, BN_EPSILON, device)
        });
        let depthwise = ConvNorm::new(
            [spec.expanded, spec.expanded],
            spec.kernel,
            spec.stride,
            spec.expanded,
            BN_EPSILON,
            device,
        );
        let squeeze_excite = spec
            .squeeze_excite
            .then(|| SqueezeExcite::new(spec.expanded, device));
        let project = ConvNorm::new([spec.expanded, spec.out], 1, 1, 1, BN_EPSILON, device);

        Self {
            expand,
            depthwise,
            squeeze_excite,
            project,
        }
    }

    fn forward(&self, x: Tensor<B, 4>, activation: Activation) -> Tensor<B, 4> {
        let shortcut = x.clone();

        let x = match &self.expand {
            Some(expand) => activation.apply(expand.forward(x)),
            None => x,
        };
        let x = activation.apply(self.depthwise.forward(x));
        let x = match &self.squeeze_excite {
            Some(se) => se.forward(x),
            None => x,
        };
        let x = self.project.forward(x);

        if x.dims() == shortcut.dims() {
            x + shortcut
        } else {
            x
        }
    }
}

#[derive(Module, Debug)]
pub struct MobileNetV3Small<B: Backend> {
    stem: ConvNorm<B>,
    blocks: Vec<InvertedResidual<B>>,
    head: ConvNorm<B>,
}

impl<B: Backend> MobileNetV3Small<B> {
    pub fn new(device: &B::Device) -> Self {
        let stem = ConvNorm::new([3, STEM_CHANNELS], 3, 2, 1, BN_EPSILON, device);

        let mut in_channels = STEM_CHANNELS;
        let mut blocks = Vec::with_capacity(BLOCKS.len());
        for spec in &BLOCKS {
            blocks.push(InvertedResidual::new(in_channels, spec, device));
            in_channels = spec.out;
        }

        let head = ConvNorm::new(
            [in_channels, MOBILENET_V3_SMALL_FEATURES],
            1,
            1,
            1,
            BN_EPSILON,
            device,
        );

        Self { stem, blocks, head }
    }

    /// `[batch, 3, H, W]` in `[-1, 1]` to `[batch, 576, H/32, W/32]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = Activation::HardSwish.apply(self.stem.forward(x));
        for (block, spec) in self.blocks.iter().zip(BLOCKS.iter()) {
            x = block.forward(x, spec.activation);
        }
        Activation::HardSwish.apply(self.head.forward(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_block_layout() {
        let layout = block_layout();
        assert_eq!(layout.len(), 11);
        assert_eq!(layout[0], (false, true));
        assert_eq!(layout[1], (true, false));
        assert_eq!(layout[2], (true, false));
        assert!(layout[3..].iter().all(|&l| l == (true, true)));
    }

    #[test]
    fn test_output_shape() {
        let device = Default::default();
        let model = MobileNetV3Small::<TestBackend>::new(&device);
        let out = model.forward(Tensor::zeros([2, 3, 64, 64], &device));
        assert_eq!(out.dims(), [2, MOBILENET_V3_SMALL_FEATURES, 2, 2]);
    }

    #[test]
    fn test_parameter_count() {
        let device = Default::default();
        let model = MobileNetV3Small::<TestBackend>::new(&device);
        // MobileNetV3-Small without its top has roughly 0.94M parameters
        let params = model.num_params();
        assert!(params > 600_000 && params < 1_300_000, "{params}");
    }
}
