//! # `ResNet` Feature Extractor

use crate::models::backbone::halve_resolution;
use crate::models::backbone::layer_block::{LayerBlock, LayerBlockConfig};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::activation::relu;

/// `ResNet-18` block counts.
pub const RESNET18_BLOCKS: [usize; 4] = [2, 2, 2, 2];

/// `ResNet-34` block counts.
pub const RESNET34_BLOCKS: [usize; 4] = [3, 4, 6, 3];

/// Stem output channels.
const STEM_PLANES: usize = 64;

/// Per-stage output channels.
const STAGE_PLANES: [usize; 4] = [64, 128, 256, 512];

/// [`ResNet`] Config.
#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// Number of blocks in each of the four stages.
    pub blocks: [usize; 4],
}

impl ResNetConfig {
    /// Number of channels in the output feature map.
    pub fn feature_channels(&self) -> usize {
        STAGE_PLANES[3]
    }

    /// Feature map resolution for a given image resolution.
    ///
    /// The stem and each strided stage halve the resolution, rounding up.
    pub fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        (0..5).fold(input_resolution, |r, _| halve_resolution(r))
    }

    /// Initialize a [`ResNet`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResNet<B> {
        let stage = |idx: usize| {
            let in_planes = if idx == 0 {
                STEM_PLANES
            } else {
                STAGE_PLANES[idx - 1]
            };
            let stride = if idx == 0 { 1 } else { 2 };
            LayerBlockConfig::build(self.blocks[idx], in_planes, STAGE_PLANES[idx], stride)
                .init::<B>(device)
        };

        ResNet {
            // 7x7 conv, 64, /2
            conv1: Conv2dConfig::new([3, STEM_PLANES], [7, 7])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(3, 3))
                .with_bias(false)
                .init(device),
            bn1: BatchNormConfig::new(STEM_PLANES).init(device),
            // 3x3 maxpool, /2
            maxpool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),

            layer1: stage(0),
            layer2: stage(1),
            layer3: stage(2),
            layer4: stage(3),
        }
    }
}

/// `ResNet` body, without pooling or classification layers.
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    /// Stem convolution.
    pub conv1: Conv2d<B>,
    /// Stem norm.
    pub bn1: BatchNorm<B, 2>,
    /// Stem pooling.
    pub maxpool: MaxPool2d,

    /// Stage 1.
    pub layer1: LayerBlock<B>,
    /// Stage 2.
    pub layer2: LayerBlock<B>,
    /// Stage 3.
    pub layer3: LayerBlock<B>,
    /// Stage 4.
    pub layer4: LayerBlock<B>,
}

impl<B: Backend> ResNet<B> {
    /// Number of channels in the output feature map.
    pub fn feature_channels(&self) -> usize {
        self.layer4.out_planes()
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, 3, height, width]`` normalized images.
    ///
    /// # Returns
    ///
    /// A ``[batch, 512, ceil(height/32), ceil(width/32)]`` feature map.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &input,
            &["batch", "height", "width"],
            &[("channels", 3)]
        );

        let x = self.conv1.forward(input);
        let x = relu(self.bn1.forward(x));
        let x = self.maxpool.forward(x);

        let x = self.layer1.forward(x);
        let x = self.layer2.forward(x);
        let x = self.layer3.forward(x);
        let x = self.layer4.forward(x);

        let [out_height, out_width] =
            (0..5).fold([height, width], |r, _| halve_resolution(r));
        assert_shape_contract_periodically!(
            ["batch", "channels", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("channels", self.feature_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        x
    }

    /// Stop gradient tracking on every parameter.
    pub fn freeze(self) -> Self {
        self.no_grad()
    }
}
