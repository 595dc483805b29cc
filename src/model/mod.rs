//! Transfer-learning classifier
//!
//! A `PlantDoctorModel` is an explicit chain of stages:
//!
//! ```text
//! raw pixels (0-255) -> input scaling -> frozen backbone
//!     -> global average pool -> Dense(128) + ReLU -> Dropout(0.2) -> Dense(classes)
//! ```
//!
//! The first two stages live in [`Backbone`], the rest in [`ClassifierHead`].
//! Only the head is ever handed to the optimizer.

pub mod backbone;
pub mod blocks;
pub mod head;
pub mod mobilenet;
pub mod pretrained;
pub mod resnet;

pub use backbone::{Backbone, BackboneKind, BackboneRecord, InputScaling};
pub use head::{ClassifierHead, ClassifierHeadConfig};

use std::fmt;
use std::path::PathBuf;

use burn::{
    module::Module,
    tensor::{activation::softmax, backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ModelConfig;
use crate::utils::error::{PlantDoctorError, Result};
use crate::utils::format_number;

#[derive(Module, Debug)]
pub struct PlantDoctorModel<B: Backend> {
    pub backbone: Backbone<B>,
    pub head: ClassifierHead<B>,
}

impl<B: Backend> PlantDoctorModel<B> {
    /// Raw-pixel images `[batch, 3, H, W]` to logits `[batch, num_classes]`
    pub fn forward_logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.backbone.forward(images))
    }

    /// Class probabilities; each row is non-negative and sums to 1
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward_logits(images), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.head.num_classes()
    }

    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            backbone: self.backbone.kind(),
            num_classes: self.num_classes(),
            frozen_params: self.backbone.num_params(),
            trainable_params: self.head.num_params(),
        }
    }
}

/// Architecture description; enough to rebuild an untrained model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub backbone: BackboneKind,
    pub image_size: usize,
    pub num_classes: usize,
    pub hidden_units: usize,
    pub dropout: f64,
}

impl ModelSpec {
    /// Build the architecture with randomly initialized weights
    pub fn init<B: Backend>(&self, device: &B::Device) -> PlantDoctorModel<B> {
        let head = ClassifierHeadConfig::new(self.backbone.feature_channels(), self.num_classes)
            .with_hidden_units(self.hidden_units)
            .with_dropout(self.dropout)
            .init(device);

        PlantDoctorModel {
            backbone: self.backbone.init(device),
            head,
        }
    }
}

/// Parameter counts per region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelSummary {
    pub backbone: BackboneKind,
    pub num_classes: usize,
    pub frozen_params: usize,
    pub trainable_params: usize,
}

impl ModelSummary {
    pub fn total_params(&self) -> usize {
        self.frozen_params + self.trainable_params
    }
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} backbone -> {} classes | total params: {} | trainable: {} | non-trainable: {}",
            self.backbone,
            self.num_classes,
            format_number(self.total_params()),
            format_number(self.trainable_params),
            format_number(self.frozen_params)
        )
    }
}

/// Assembles a classifier for a given class count and image size
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    spec: ModelSpec,
    pretrained_weights: Option<PathBuf>,
    allow_random_backbone: bool,
}

impl ModelBuilder {
    /// Fails with `InvalidClassCount` when `num_classes` is zero
    pub fn new(config: &ModelConfig, image_size: usize, num_classes: usize) -> Result<Self> {
        if num_classes == 0 {
            return Err(PlantDoctorError::InvalidClassCount(num_classes));
        }

        Ok(Self {
            spec: ModelSpec {
                backbone: config.backbone,
                image_size,
                num_classes,
                hidden_units: config.hidden_units,
                dropout: config.dropout,
            },
            pretrained_weights: config.pretrained_weights.clone(),
            allow_random_backbone: config.allow_random_backbone,
        })
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    /// Build the model with pretrained backbone weights loaded and frozen.
    ///
    /// Without configured weights this fails unless random initialization
    /// was explicitly allowed.
    pub fn build<B: Backend>(&self, device: &B::Device) -> Result<PlantDoctorModel<B>> {
        let PlantDoctorModel { backbone, head } = self.spec.init::<B>(device);

        let backbone = match &self.pretrained_weights {
            Some(path) => pretrained::load_backbone_weights(backbone, path, device)?,
            None if !self.allow_random_backbone => {
                return Err(PlantDoctorError::Model(format!(
                    "no pretrained {} weights configured; set model.pretrained_weights \
                     (or allow_random_backbone to train on an untrained backbone)",
                    self.spec.backbone
                )));
            }
            None => {
                warn!(
                    "No pretrained weights configured; the {} backbone is randomly initialized",
                    self.spec.backbone
                );
                backbone
            }
        };

        let model = PlantDoctorModel {
            backbone: backbone.no_grad(),
            head,
        };
        info!("Model: {}", model.summary());
        Ok(model)
    }
}
