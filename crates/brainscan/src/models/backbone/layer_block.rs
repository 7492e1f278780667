//! # `ResNet` Layer Block
//!
//! A [`LayerBlock`] is a sequence of [`BasicBlock`]s; only the first block
//! changes the stride or channel count.

use crate::models::backbone::basic_block::{BasicBlock, BasicBlockConfig, BasicBlockMeta};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`LayerBlock`] Configuration.
#[derive(Config, Debug)]
pub struct LayerBlockConfig {
    /// The component blocks.
    pub blocks: Vec<BasicBlockConfig>,
}

impl LayerBlockConfig {
    /// Build a config of `num_blocks` blocks.
    pub fn build(
        num_blocks: usize,
        in_planes: usize,
        out_planes: usize,
        stride: usize,
    ) -> Self {
        let blocks = (0..num_blocks)
            .map(|b| {
                if b == 0 {
                    BasicBlockConfig::new(in_planes, out_planes).with_stride(stride)
                } else {
                    BasicBlockConfig::new(out_planes, out_planes)
                }
            })
            .collect();

        Self { blocks }
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.blocks.is_empty() {
            return Err("blocks is empty".to_string());
        }

        for idx in 1..self.blocks.len() {
            let prev = &self.blocks[idx - 1];
            let curr = &self.blocks[idx];
            if prev.out_planes() != curr.in_planes() {
                return Err(format!(
                    "block[{}].out_planes({}) != block[{}].in_planes({})",
                    idx - 1,
                    prev.out_planes(),
                    idx,
                    curr.in_planes(),
                ));
            }
        }
        Ok(())
    }

    /// Initialize a new [`LayerBlock`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> LayerBlock<B> {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }

        LayerBlock {
            blocks: self.blocks.iter().map(|block| block.init(device)).collect(),
        }
    }
}

/// A sequence of residual blocks.
#[derive(Module, Debug)]
pub struct LayerBlock<B: Backend> {
    /// The component blocks.
    pub blocks: Vec<BasicBlock<B>>,
}

impl<B: Backend> LayerBlock<B> {
    /// The number of output feature planes.
    pub fn out_planes(&self) -> usize {
        self.blocks
            .last()
            .map(|block| block.out_planes())
            .unwrap_or_default()
    }

    /// Forward Pass.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        self.blocks
            .iter()
            .fold(input, |x, block| block.forward(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_build() {
        let config = LayerBlockConfig::build(3, 64, 128, 2);
        assert_eq!(config.blocks.len(), 3);
        assert_eq!(config.blocks[0].stride, 2);
        assert_eq!(config.blocks[0].in_planes, 64);
        assert_eq!(config.blocks[1].in_planes, 128);
        assert_eq!(config.blocks[2].stride, 1);
        assert!(config.try_validate().is_ok());
    }

    #[test]
    fn test_validate() {
        assert_eq!(
            LayerBlockConfig::new(vec![]).try_validate(),
            Err("blocks is empty".to_string())
        );

        let config = LayerBlockConfig::new(vec![
            BasicBlockConfig::new(4, 8),
            BasicBlockConfig::new(4, 8),
        ]);
        assert_eq!(
            config.try_validate(),
            Err("block[0].out_planes(8) != block[1].in_planes(4)".to_string())
        );
    }

    #[test]
    fn test_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: LayerBlock<B> = LayerBlockConfig::build(2, 2, 4, 2).init(&device);
        assert_eq!(layer.out_planes(), 4);

        let output = layer.forward(Tensor::ones([1, 2, 6, 6], &device));
        assert_eq!(output.dims(), [1, 4, 3, 3]);
    }
}
