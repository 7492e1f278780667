//! # Transfer Classifier
//!
//! A pretrained [`ResNet`] body feeding a trainable [`ClassifierHead`].
//!
//! With a frozen backbone, [`TransferClassifier::forward_frozen`] runs the
//! body on the inner (non-autodiff) backend: no graph is recorded for it, and
//! its `BatchNorm` layers use their running statistics.

use crate::models::backbone::{ResNet, ResNetConfig};
use crate::models::head::{ClassifierHead, ClassifierHeadConfig};
use burn::module::AutodiffModule;
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::backend::AutodiffBackend;

/// [`TransferClassifier`] Config.
#[derive(Config, Debug)]
pub struct TransferClassifierConfig {
    /// Backbone structure.
    pub backbone: ResNetConfig,

    /// Head structure.
    pub head: ClassifierHeadConfig,
}

impl TransferClassifierConfig {
    /// Build a config whose head matches the backbone's feature channels.
    pub fn for_backbone(
        backbone: ResNetConfig,
        num_classes: usize,
    ) -> Self {
        let head = ClassifierHeadConfig::new(backbone.feature_channels(), num_classes);
        Self { backbone, head }
    }

    /// Number of output classes.
    pub fn num_classes(&self) -> usize {
        self.head.num_classes
    }

    /// Initialize a randomly weighted [`TransferClassifier`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> TransferClassifier<B> {
        TransferClassifier {
            backbone: self.backbone.init(device),
            head: self.head.init(device),
        }
    }

    /// Initialize a [`TransferClassifier`] around an existing backbone.
    pub fn init_with_backbone<B: Backend>(
        &self,
        backbone: ResNet<B>,
        device: &B::Device,
    ) -> TransferClassifier<B> {
        TransferClassifier {
            backbone,
            head: self.head.init(device),
        }
    }
}

/// Backbone + head classifier.
#[derive(Module, Debug)]
pub struct TransferClassifier<B: Backend> {
    /// Feature extractor.
    pub backbone: ResNet<B>,

    /// Classification head.
    pub head: ClassifierHead<B>,
}

impl<B: Backend> TransferClassifier<B> {
    /// Number of output classes.
    pub fn num_classes(&self) -> usize {
        self.head.num_classes()
    }

    /// Stop gradient tracking on the backbone.
    pub fn freeze_backbone(self) -> Self {
        Self {
            backbone: self.backbone.freeze(),
            ..self
        }
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `images`: ``[batch, 3, height, width]`` normalized images.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes]`` logits.
    pub fn forward(
        &self,
        images: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let features = self.backbone.forward(images);
        self.head.forward(features)
    }
}

impl<B: AutodiffBackend> TransferClassifier<B> {
    /// Forward pass with the backbone in inference mode.
    ///
    /// Only the head is part of the autodiff graph.
    pub fn forward_frozen(
        &self,
        images: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let features = self.backbone.valid().forward(images.inner());
        self.head.forward(Tensor::from_inner(features))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    fn tiny_config(num_classes: usize) -> TransferClassifierConfig {
        let mut config = TransferClassifierConfig::for_backbone(ResNetConfig::new([1, 1, 1, 1]), num_classes);
        config.head.inner_size = 8;
        config
    }

    #[test]
    fn test_for_backbone() {
        let config = TransferClassifierConfig::for_backbone(ResNetConfig::new([2, 2, 2, 2]), 4);
        assert_eq!(config.head.in_channels, 512);
        assert_eq!(config.num_classes(), 4);
        assert_eq!(config.head.inner_size, 128);
    }

    #[test]
    fn test_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let model: TransferClassifier<B> = tiny_config(4).init(&device);
        assert_eq!(model.num_classes(), 4);

        let logits = model.forward(Tensor::zeros([2, 3, 32, 32], &device));
        assert_eq!(logits.dims(), [2, 4]);
    }

    #[test]
    fn test_forward_frozen_only_trains_head() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let model: TransferClassifier<B> = tiny_config(3).init(&device);
        let images: Tensor<B, 4> = Tensor::ones([2, 3, 32, 32], &device);

        let grads = model.forward_frozen(images.clone()).sum().backward();
        assert!(model.backbone.conv1.weight.grad(&grads).is_none());
        assert!(model.head.logits.weight.grad(&grads).is_some());

        let grads = model.forward(images).sum().backward();
        assert!(model.backbone.conv1.weight.grad(&grads).is_some());
    }

    #[test]
    fn test_freeze_backbone() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let model: TransferClassifier<B> = tiny_config(2).init(&device).freeze_backbone();

        let grads = model
            .forward(Tensor::ones([1, 3, 32, 32], &device))
            .sum()
            .backward();
        assert!(model.backbone.conv1.weight.grad(&grads).is_none());
        assert!(model.head.inner.weight.grad(&grads).is_some());
    }
}
