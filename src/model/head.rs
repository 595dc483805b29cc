//! Trainable classification head
//!
//! Global average pooling -> Dense(hidden) + ReLU -> Dropout -> Dense(classes).
//! Dropout is only active on an autodiff backend.

use burn::{
    config::Config,
    module::Module,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

#[derive(Config, Debug)]
pub struct ClassifierHeadConfig {
    /// Channels of the incoming feature map
    pub in_features: usize,
    pub num_classes: usize,
    #[config(default = "128")]
    pub hidden_units: usize,
    #[config(default = "0.2")]
    pub dropout: f64,
}

impl ClassifierHeadConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ClassifierHead<B> {
        ClassifierHead {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            hidden: LinearConfig::new(self.in_features, self.hidden_units).init(device),
            activation: Relu::new(),
            dropout: DropoutConfig::new(self.dropout).init(),
            output: LinearConfig::new(self.hidden_units, self.num_classes).init(device),
            num_classes: self.num_classes,
        }
    }
}

#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    pool: AdaptiveAvgPool2d,
    hidden: Linear<B>,
    activation: Relu,
    dropout: Dropout,
    output: Linear<B>,
    num_classes: usize,
}

impl<B: Backend> ClassifierHead<B> {
    /// Feature map `[batch, C, h, w]` to logits `[batch, num_classes]`
    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let pooled = self.pool.forward(features);
        let [batch_size, channels, _, _] = pooled.dims();
        let x = pooled.reshape([batch_size, channels]);

        let x = self.activation.forward(self.hidden.forward(x));
        let x = self.dropout.forward(x);
        self.output.forward(x)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}
