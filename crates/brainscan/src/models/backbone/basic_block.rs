//! # Basic Block for `ResNet`
//!
//! [`BasicBlock`] is the two-convolution residual unit of `ResNet-18/34`.
//!
//! [`BasicBlockMeta`] defines a common meta API for [`BasicBlock`]
//! and [`BasicBlockConfig`].

use crate::models::backbone::halve_resolution;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::activation::relu;

/// [`BasicBlock`] Meta trait.
pub trait BasicBlockMeta {
    /// The size of the in channels dimension.
    fn in_planes(&self) -> usize;

    /// The size of the out channels dimension.
    fn out_planes(&self) -> usize;

    /// The stride of the first convolution.
    fn stride(&self) -> usize;

    /// Whether the residual path needs a projection.
    fn has_downsample(&self) -> bool {
        self.stride() != 1 || self.in_planes() != self.out_planes()
    }

    /// Get the output resolution for a given input resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        match self.stride() {
            1 => input_resolution,
            _ => halve_resolution(input_resolution),
        }
    }
}

/// [`BasicBlock`] Config.
#[derive(Config, Debug)]
pub struct BasicBlockConfig {
    /// The size of the in channels dimension.
    pub in_planes: usize,

    /// The size of the out channels dimension.
    pub out_planes: usize,

    /// The stride of the first convolution (1 or 2).
    #[config(default = 1)]
    pub stride: usize,
}

impl BasicBlockMeta for BasicBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn out_planes(&self) -> usize {
        self.out_planes
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl BasicBlockConfig {
    /// Initialize a [`BasicBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> BasicBlock<B> {
        assert!(
            self.stride == 1 || self.stride == 2,
            "BasicBlock stride must be 1 or 2, got {}",
            self.stride
        );

        let downsample = if self.has_downsample() {
            Some(Downsample {
                conv: Conv2dConfig::new([self.in_planes, self.out_planes], [1, 1])
                    .with_stride([self.stride, self.stride])
                    .with_padding(PaddingConfig2d::Explicit(0, 0))
                    .with_bias(false)
                    .init(device),
                bn: BatchNormConfig::new(self.out_planes).init(device),
            })
        } else {
            None
        };

        BasicBlock {
            conv1: Conv2dConfig::new([self.in_planes, self.out_planes], [3, 3])
                .with_stride([self.stride, self.stride])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            bn1: BatchNormConfig::new(self.out_planes).init(device),
            conv2: Conv2dConfig::new([self.out_planes, self.out_planes], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            bn2: BatchNormConfig::new(self.out_planes).init(device),
            downsample,
        }
    }
}

/// 1x1 projection on the residual path.
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    /// Projection convolution.
    pub conv: Conv2d<B>,

    /// Projection norm.
    pub bn: BatchNorm<B, 2>,
}

impl<B: Backend> Downsample<B> {
    /// Forward Pass.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(input))
    }
}

/// Basic Block for `ResNet`.
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    /// First 3x3 convolution; carries the stride.
    pub conv1: Conv2d<B>,
    /// First norm.
    pub bn1: BatchNorm<B, 2>,

    /// Second 3x3 convolution.
    pub conv2: Conv2d<B>,
    /// Second norm.
    pub bn2: BatchNorm<B, 2>,

    /// Optional projection for the residual connection.
    pub downsample: Option<Downsample<B>>,
}

impl<B: Backend> BasicBlockMeta for BasicBlock<B> {
    fn in_planes(&self) -> usize {
        self.conv1.weight.shape().dims[1]
    }

    fn out_planes(&self) -> usize {
        self.conv2.weight.shape().dims[0]
    }

    fn stride(&self) -> usize {
        self.conv1.stride[0]
    }
}

impl<B: Backend> BasicBlock<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(input.clone()),
            None => input.clone(),
        };

        let x = self.conv1.forward(input);
        let x = relu(self.bn1.forward(x));

        let x = self.conv2.forward(x);
        let x = self.bn2.forward(x);

        relu(x + identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::{Autodiff, NdArray};

    #[test]
    fn test_basic_block_config() {
        let config = BasicBlockConfig::new(16, 16);
        assert_eq!(config.stride(), 1);
        assert!(!config.has_downsample());
        assert_eq!(config.output_resolution([16, 16]), [16, 16]);

        let config = BasicBlockConfig::new(16, 32).with_stride(2);
        assert!(config.has_downsample());
        assert_eq!(config.output_resolution([15, 16]), [8, 8]);
    }

    #[test]
    #[should_panic(expected = "stride must be 1 or 2")]
    fn test_basic_block_bad_stride() {
        type B = NdArray<f32>;
        let device = Default::default();
        let _block: BasicBlock<B> = BasicBlockConfig::new(4, 4).with_stride(3).init(&device);
    }

    #[test]
    fn test_basic_block_meta() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: BasicBlock<B> = BasicBlockConfig::new(2, 4).with_stride(2).init(&device);

        assert_eq!(block.in_planes(), 2);
        assert_eq!(block.out_planes(), 4);
        assert_eq!(block.stride(), 2);
        assert!(block.downsample.is_some());
    }

    #[test]
    fn test_basic_block_forward_downsample_autodiff() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let block: BasicBlock<B> = BasicBlockConfig::new(2, 4).with_stride(2).init(&device);

        let input = Tensor::ones([2, 2, 8, 8], &device);
        let output = block.forward(input);

        assert_shape_contract!(
            ["batch", "out_channels", "out_height", "out_width"],
            &output,
            &[
                ("batch", 2),
                ("out_channels", 4),
                ("out_height", 4),
                ("out_width", 4)
            ],
        );

        // ReLU output.
        let min = output.min().into_scalar();
        assert!(min >= 0.0);
    }
}
