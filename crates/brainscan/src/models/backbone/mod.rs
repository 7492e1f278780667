//! # `ResNet` Backbone
//!
//! A `ResNet` with the ImageNet classification layer removed; it maps
//! ``[batch, 3, height, width]`` images to ``[batch, 512, height/32, width/32]``
//! feature maps.
//!
//! Module field names follow the torchvision layout so that
//! [`pretrained`] can load torchvision checkpoints directly.

pub mod basic_block;
pub mod layer_block;
pub mod pretrained;
pub mod resnet;

pub use pretrained::{BACKBONE_NORMALIZATION, BACKBONE_PREFABS};
pub use resnet::{RESNET18_BLOCKS, RESNET34_BLOCKS, ResNet, ResNetConfig};

/// Output resolution of a stride-2, "same"-padded stage.
#[inline(always)]
pub(crate) fn halve_resolution(resolution: [usize; 2]) -> [usize; 2] {
    resolution.map(|d| d.div_ceil(2))
}
