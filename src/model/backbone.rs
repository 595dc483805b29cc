//! Pretrained feature extractors and their input conventions

use std::fmt;
use std::str::FromStr;

use burn::{
    module::Module,
    tensor::{backend::Backend, Tensor, TensorData},
};
use serde::{Deserialize, Serialize};

use super::mobilenet::{MobileNetV3Small, MOBILENET_V3_SMALL_FEATURES};
use super::resnet::{ResNet18, RESNET18_FEATURES};

/// Which feature extractor to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackboneKind {
    #[serde(rename = "mobilenet_v3_small")]
    MobileNetV3Small,
    #[serde(rename = "resnet18")]
    ResNet18,
}

impl BackboneKind {
    /// Channels of the feature map fed to the classification head
    pub fn feature_channels(self) -> usize {
        match self {
            BackboneKind::MobileNetV3Small => MOBILENET_V3_SMALL_FEATURES,
            BackboneKind::ResNet18 => RESNET18_FEATURES,
        }
    }

    /// Input range the pretrained weights expect
    pub fn input_scaling(self) -> InputScaling {
        match self {
            BackboneKind::MobileNetV3Small => InputScaling::SymmetricUnit,
            BackboneKind::ResNet18 => InputScaling::ImageNet,
        }
    }

    /// Randomly initialized backbone of this kind
    pub fn init<B: Backend>(self, device: &B::Device) -> Backbone<B> {
        match self {
            BackboneKind::MobileNetV3Small => {
                Backbone::MobileNetV3Small(MobileNetV3Small::new(device))
            }
            BackboneKind::ResNet18 => Backbone::ResNet18(ResNet18::new(device)),
        }
    }
}

impl fmt::Display for BackboneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackboneKind::MobileNetV3Small => write!(f, "mobilenet_v3_small"),
            BackboneKind::ResNet18 => write!(f, "resnet18"),
        }
    }
}

impl FromStr for BackboneKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "mobilenet_v3_small" | "mobilenetv3small" | "mobilenet" => {
                Ok(BackboneKind::MobileNetV3Small)
            }
            "resnet18" | "resnet_18" | "resnet" => Ok(BackboneKind::ResNet18),
            other => Err(format!(
                "unknown backbone '{}', expected mobilenet_v3_small or resnet18",
                other
            )),
        }
    }
}

/// Mapping from raw 0-255 pixels to a backbone's expected input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputScaling {
    /// `x / 127.5 - 1`, giving `[-1, 1]`
    SymmetricUnit,
    /// `(x / 255 - mean) / std` per channel
    ImageNet,
}

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

impl InputScaling {
    pub fn apply<B: Backend>(self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            InputScaling::SymmetricUnit => images.div_scalar(127.5).sub_scalar(1.0),
            InputScaling::ImageNet => {
                let device = images.device();
                let mean = Tensor::<B, 4>::from_data(
                    TensorData::new(IMAGENET_MEAN.to_vec(), [1, 3, 1, 1]),
                    &device,
                );
                let std = Tensor::<B, 4>::from_data(
                    TensorData::new(IMAGENET_STD.to_vec(), [1, 3, 1, 1]),
                    &device,
                );
                (images.div_scalar(255.0) - mean) / std
            }
        }
    }
}

#[derive(Module, Debug)]
pub enum Backbone<B: Backend> {
    MobileNetV3Small(MobileNetV3Small<B>),
    ResNet18(ResNet18<B>),
}

impl<B: Backend> Backbone<B> {
    pub fn kind(&self) -> BackboneKind {
        match self {
            Backbone::MobileNetV3Small(_) => BackboneKind::MobileNetV3Small,
            Backbone::ResNet18(_) => BackboneKind::ResNet18,
        }
    }

    /// Rescale raw 0-255 pixels for this backbone and extract the feature map
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.kind().input_scaling().apply(images);
        match self {
            Backbone::MobileNetV3Small(net) => net.forward(x),
            Backbone::ResNet18(net) => net.forward(x),
        }
    }
}
