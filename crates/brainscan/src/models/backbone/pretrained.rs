//! # Pretrained `ResNet` Backbones
//!
//! torchvision checkpoints carry an ImageNet ``fc`` layer; it is read into
//! [`TorchVisionResNet`] and dropped when the weights are copied onto a
//! [`ResNet`] body.

use crate::cache::disk::DiskCacheConfig;
use crate::cache::prefabs::{StaticPreFabConfig, StaticPreFabMap};
use crate::cache::weights::{StaticPretrainedWeightsDescriptor, StaticPretrainedWeightsMap};
use crate::data::preprocess::PixelNormalization;
use crate::models::backbone::layer_block::LayerBlock;
use crate::models::backbone::resnet::{RESNET18_BLOCKS, RESNET34_BLOCKS, ResNet, ResNetConfig};
use anyhow::Context;
use burn::module::Module;
use burn::nn::conv::Conv2d;
use burn::nn::{BatchNorm, Linear};
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, Recorder};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use std::path::PathBuf;

/// Input normalization the torchvision weights were trained with.
pub const BACKBONE_NORMALIZATION: PixelNormalization = PixelNormalization::ImageNet;

/// Pretrained [`ResNet`] configs and weights.
pub static BACKBONE_PREFABS: StaticPreFabMap<ResNetConfig> = StaticPreFabMap {
    name: "backbone",
    description: "ResNet feature extractors",

    items: &[
        &StaticPreFabConfig {
            name: "resnet18",
            description: "ResNet-18 [2, 2, 2, 2] BasicBlocks",
            builder: || ResNetConfig::new(RESNET18_BLOCKS),

            weights: Some(&StaticPretrainedWeightsMap {
                items: &[&StaticPretrainedWeightsDescriptor {
                    name: "tv_in1k",
                    description: "ResNet-18 pretrained on ImageNet",
                    license: Some("bsd-3-clause"),
                    origin: Some("https://github.com/pytorch/vision"),
                    urls: &["https://download.pytorch.org/models/resnet18-f37072fd.pth"],
                }],
            }),
        },
        &StaticPreFabConfig {
            name: "resnet34",
            description: "ResNet-34 [3, 4, 6, 3] BasicBlocks",
            builder: || ResNetConfig::new(RESNET34_BLOCKS),

            weights: Some(&StaticPretrainedWeightsMap {
                items: &[&StaticPretrainedWeightsDescriptor {
                    name: "tv_in1k",
                    description: "ResNet-34 pretrained on ImageNet",
                    license: Some("bsd-3-clause"),
                    origin: Some("https://github.com/pytorch/vision"),
                    urls: &["https://download.pytorch.org/models/resnet34-b627a593.pth"],
                }],
            }),
        },
    ],
};

/// Build a backbone from a catalogue name.
///
/// ``"resnet18"`` is randomly initialized; ``"resnet18.tv_in1k"`` is
/// loaded from the (cached) torchvision checkpoint.
///
/// # Returns
///
/// The backbone and its config.
pub fn init_backbone<B: Backend>(
    qualified_name: &str,
    disk_cache: &DiskCacheConfig,
    device: &B::Device,
) -> anyhow::Result<(ResNet<B>, ResNetConfig)> {
    let (config, weights) = BACKBONE_PREFABS.resolve(qualified_name)?;
    let model = config.init(device);

    let model = match weights {
        Some(weights) => {
            tracing::info!(backbone = qualified_name, "fetching pretrained weights");
            let path = weights.fetch_weights(disk_cache)?;
            load_pytorch_weights(model, path)?
        }
        None => {
            tracing::warn!(
                backbone = qualified_name,
                "no pretrained weights named; backbone is randomly initialized"
            );
            model
        }
    };

    Ok((model, config))
}

/// Load weights from a torchvision weights path onto a [`ResNet`] body.
pub fn load_pytorch_weights<B: Backend>(
    resnet: ResNet<B>,
    path: PathBuf,
) -> anyhow::Result<ResNet<B>> {
    let device = resnet
        .devices()
        .into_iter()
        .next()
        .context("backbone has no parameters")?;
    let record = load_torchvision_record::<B>(path, &device)?;
    Ok(record.copy_weights(resnet))
}

/// Load a [`TorchVisionResNetRecord`] from a torchvision weights path.
pub fn load_torchvision_record<B: Backend>(
    path: PathBuf,
    device: &B::Device,
) -> anyhow::Result<TorchVisionResNetRecord<B>> {
    let load_args = LoadArgs::new(path.clone())
        .with_key_remap(r"downsample\.0", "downsample.conv")
        .with_key_remap(r"downsample\.1", "downsample.bn")
        .with_key_remap(r"(layer[1-4])\.([0-9]+)", "$1.blocks.$2");

    let record = PyTorchFileRecorder::<FullPrecisionSettings>::new()
        .load(load_args, device)
        .with_context(|| format!("loading torchvision weights from {}", path.display()))?;

    Ok(record)
}

/// torchvision `ResNet` layout, including the ImageNet classifier.
#[derive(Module, Debug)]
pub struct TorchVisionResNet<B: Backend> {
    /// Stem convolution.
    pub conv1: Conv2d<B>,
    /// Stem norm.
    pub bn1: BatchNorm<B, 2>,
    /// Stage 1.
    pub layer1: LayerBlock<B>,
    /// Stage 2.
    pub layer2: LayerBlock<B>,
    /// Stage 3.
    pub layer3: LayerBlock<B>,
    /// Stage 4.
    pub layer4: LayerBlock<B>,
    /// ImageNet classifier; discarded.
    pub fc: Linear<B>,
}

impl<B: Backend> TorchVisionResNetRecord<B> {
    /// Copy the body weights onto `target`.
    pub fn copy_weights(
        self,
        target: ResNet<B>,
    ) -> ResNet<B> {
        ResNet {
            conv1: target.conv1.load_record(self.conv1),
            bn1: target.bn1.load_record(self.bn1),
            layer1: target.layer1.load_record(self.layer1),
            layer2: target.layer2.load_record(self.layer2),
            layer3: target.layer3.load_record(self.layer3),
            layer4: target.layer4.load_record(self.layer4),
            ..target
        }
    }
}
