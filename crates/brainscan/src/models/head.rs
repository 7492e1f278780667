//! # Classification Head
//!
//! Global average pooling, a ReLU dense layer, dropout, and a dense
//! logits layer.

use bimm_contracts::unpack_shape_contract;
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::activation::relu;

/// [`ClassifierHead`] Config.
#[derive(Config, Debug)]
pub struct ClassifierHeadConfig {
    /// Channels of the incoming feature map.
    pub in_channels: usize,

    /// Number of output classes.
    pub num_classes: usize,

    /// Width of the hidden dense layer.
    #[config(default = 128)]
    pub inner_size: usize,

    /// Dropout probability after the hidden layer.
    #[config(default = 0.0)]
    pub dropout: f64,
}

impl ClassifierHeadConfig {
    /// Initialize a [`ClassifierHead`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ClassifierHead<B> {
        ClassifierHead {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            inner: LinearConfig::new(self.in_channels, self.inner_size).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            logits: LinearConfig::new(self.inner_size, self.num_classes).init(device),
        }
    }
}

/// Trainable head on top of the backbone.
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    /// Global average pooling.
    pub pool: AdaptiveAvgPool2d,
    /// Hidden dense layer.
    pub inner: Linear<B>,
    /// Hidden dropout.
    pub dropout: Dropout,
    /// Logits layer.
    pub logits: Linear<B>,
}

impl<B: Backend> ClassifierHead<B> {
    /// Number of output classes.
    pub fn num_classes(&self) -> usize {
        self.logits.weight.shape().dims[1]
    }

    /// Number of input feature channels.
    pub fn in_channels(&self) -> usize {
        self.inner.weight.shape().dims[0]
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `features`: a ``[batch, channels, height, width]`` feature map.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes]`` logits.
    pub fn forward(
        &self,
        features: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let channels = self.in_channels();
        let [batch] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &features,
            &["batch"],
            &[("channels", channels)]
        );

        // [B, C, H, W] -> [B, C, 1, 1] -> [B, C]
        let x = self.pool.forward(features).reshape([batch, channels]);

        let x = relu(self.inner.forward(x));
        let x = self.dropout.forward(x);

        self.logits.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::{Autodiff, NdArray};

    #[test]
    fn test_config_defaults() {
        let config = ClassifierHeadConfig::new(512, 4);
        assert_eq!(config.inner_size, 128);
        assert_eq!(config.dropout, 0.0);
    }

    #[test]
    fn test_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let head: ClassifierHead<B> = ClassifierHeadConfig::new(8, 4)
            .with_inner_size(16)
            .init(&device);
        assert_eq!(head.num_classes(), 4);
        assert_eq!(head.in_channels(), 8);

        let output = head.forward(Tensor::ones([3, 8, 2, 2], &device));
        assert_shape_contract!(
            ["batch", "classes"],
            &output,
            &[("batch", 3), ("classes", 4)]
        );
    }

    #[test]
    fn test_pooling_is_spatial_mean() {
        type B = NdArray<f32>;
        let device = Default::default();

        let head: ClassifierHead<B> = ClassifierHeadConfig::new(2, 3).init(&device);

        // Same per-channel mean, different spatial layout.
        let a = Tensor::<B, 4>::from_floats([[[[1.0, 3.0]], [[0.0, 4.0]]]], &device);
        let b = Tensor::<B, 4>::from_floats([[[[2.0, 2.0]], [[2.0, 2.0]]]], &device);

        let a = head.forward(a).into_data().to_vec::<f32>().unwrap();
        let b = head.forward(b).into_data().to_vec::<f32>().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_dropout_active_under_autodiff() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let head: ClassifierHead<B> = ClassifierHeadConfig::new(4, 2)
            .with_dropout(0.5)
            .init(&device);
        let output = head.forward(Tensor::ones([2, 4, 1, 1], &device));
        assert_eq!(output.dims(), [2, 2]);
    }
}
