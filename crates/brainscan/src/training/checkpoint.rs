//! # Best-Model Checkpointing
//!
//! During training burn's learner keeps the best epoch's weights under
//! ``checkpoint/model-{epoch}.mpk``. Once training ends that epoch is
//! promoted into the checkpoint directory proper:
//!
//! * ``model.mpk`` - full precision weights.
//! * ``checkpoint.json`` - a [`CheckpointManifest`].

use crate::data::labels::ClassLabels;
use crate::data::preprocess::PreprocessConfig;
use crate::models::classifier::{TransferClassifier, TransferClassifierConfig};
use anyhow::{Context, anyhow};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use std::path::{Path, PathBuf};

/// Recorder for full precision checkpoints.
pub type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Checkpoint weights file stem; the recorder appends ``.mpk``.
pub const CHECKPOINT_MODEL_STEM: &str = "model";

/// Checkpoint manifest file name.
pub const CHECKPOINT_MANIFEST_FILE: &str = "checkpoint.json";

/// Everything needed to rebuild a checkpointed model.
#[derive(Config, Debug)]
pub struct CheckpointManifest {
    /// Model structure.
    pub model: TransferClassifierConfig,

    /// Class labels, in logit order.
    pub labels: ClassLabels,

    /// Input transform.
    pub preprocess: PreprocessConfig,

    /// 1-based epoch the weights come from.
    pub epoch: usize,

    /// Validation accuracy at that epoch.
    pub valid_accuracy: f64,

    /// Validation loss at that epoch.
    pub valid_loss: f64,
}

/// Directory, under the artifact directory, where the learner keeps its
/// per-epoch checkpoints.
pub const LEARNER_CHECKPOINT_DIR: &str = "checkpoint";

/// Path stem of the learner's model checkpoint for `epoch`; the recorder
/// appends ``.mpk``.
pub fn learner_checkpoint_stem<P: AsRef<Path>>(
    artifact_dir: P,
    epoch: usize,
) -> PathBuf {
    artifact_dir
        .as_ref()
        .join(LEARNER_CHECKPOINT_DIR)
        .join(format!("{CHECKPOINT_MODEL_STEM}-{epoch}"))
}

/// Epochs for which the learner kept a model checkpoint, ascending.
pub fn learner_checkpoint_epochs<P: AsRef<Path>>(artifact_dir: P) -> anyhow::Result<Vec<usize>> {
    let dir = artifact_dir.as_ref().join(LEARNER_CHECKPOINT_DIR);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let prefix = format!("{CHECKPOINT_MODEL_STEM}-");
    let mut epochs = Vec::new();
    for entry in std::fs::read_dir(&dir).with_context(|| format!("listing {}", dir.display()))? {
        let name = entry?.file_name();
        let epoch = name
            .to_str()
            .and_then(|name| name.strip_prefix(&prefix))
            .and_then(|rest| rest.strip_suffix(".mpk"))
            .and_then(|epoch| epoch.parse().ok());
        if let Some(epoch) = epoch {
            epochs.push(epoch);
        }
    }
    epochs.sort_unstable();
    Ok(epochs)
}

/// Write `model` and its manifest into `dir`.
///
/// Produces ``model.mpk`` and ``checkpoint.json``.
pub fn write_checkpoint<B: Backend, P: AsRef<Path>>(
    dir: P,
    model: &TransferClassifier<B>,
    manifest: &CheckpointManifest,
) -> anyhow::Result<()> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating checkpoint directory {}", dir.display()))?;

    model
        .clone()
        .save_file(dir.join(CHECKPOINT_MODEL_STEM), &CheckpointRecorder::new())
        .with_context(|| format!("saving checkpoint into {}", dir.display()))?;

    manifest
        .save(dir.join(CHECKPOINT_MANIFEST_FILE))
        .context("saving checkpoint manifest")?;

    tracing::info!(
        dir = %dir.display(),
        epoch = manifest.epoch,
        valid_accuracy = manifest.valid_accuracy,
        "checkpoint saved"
    );
    Ok(())
}

/// Load the manifest of a checkpoint directory.
pub fn load_checkpoint_manifest<P: AsRef<Path>>(dir: P) -> anyhow::Result<CheckpointManifest> {
    let path = dir.as_ref().join(CHECKPOINT_MANIFEST_FILE);
    if !path.is_file() {
        anyhow::bail!("Checkpoint manifest not found: {}", path.display());
    }
    CheckpointManifest::load(&path)
        .map_err(|err| anyhow!("reading {}: {err:?}", path.display()))
}

/// Load a checkpointed model.
pub fn load_checkpoint<B: Backend, P: AsRef<Path>>(
    dir: P,
    device: &B::Device,
) -> anyhow::Result<(TransferClassifier<B>, CheckpointManifest)> {
    let dir = dir.as_ref();
    let manifest = load_checkpoint_manifest(dir)?;

    let weights = dir.join(format!("{CHECKPOINT_MODEL_STEM}.mpk"));
    if !weights.is_file() {
        anyhow::bail!("Checkpoint weights not found: {}", weights.display());
    }

    let model = manifest
        .model
        .init::<B>(device)
        .load_file(weights.clone(), &CheckpointRecorder::new(), device)
        .with_context(|| format!("loading checkpoint weights {}", weights.display()))?;

    Ok((model, manifest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::backbone::ResNetConfig;
    use burn::backend::NdArray;
    use burn::tensor::Tensor;

    type B = NdArray<f32>;

    fn manifest(epoch: usize) -> CheckpointManifest {
        let mut model = TransferClassifierConfig::for_backbone(ResNetConfig::new([1, 1, 1, 1]), 2);
        model.head.inner_size = 4;
        CheckpointManifest {
            model,
            labels: ClassLabels::new(["a", "b"]).unwrap(),
            preprocess: PreprocessConfig::new().with_image_size([32, 32]),
            epoch,
            valid_accuracy: 0.5,
            valid_loss: 0.7,
        }
    }

    #[test]
    fn test_write_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let manifest = manifest(3);

        let model: TransferClassifier<B> = manifest.model.init(&device);
        write_checkpoint(dir.path(), &model, &manifest).unwrap();

        let (loaded, loaded_manifest) = load_checkpoint::<B, _>(dir.path(), &device).unwrap();
        assert_eq!(loaded_manifest.epoch, 3);
        assert_eq!(loaded_manifest.valid_accuracy, 0.5);
        assert_eq!(loaded_manifest.labels.names(), &["a", "b"]);
        assert_eq!(loaded_manifest.preprocess.image_size, [32, 32]);

        let input = Tensor::<B, 4>::ones([1, 3, 32, 32], &device);
        assert_eq!(
            loaded.forward(input.clone()).into_data().to_vec::<f32>().unwrap(),
            model.forward(input).into_data().to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn test_learner_checkpoint_epochs() {
        let dir = tempfile::tempdir().unwrap();
        assert!(learner_checkpoint_epochs(dir.path()).unwrap().is_empty());

        let checkpoints = dir.path().join(LEARNER_CHECKPOINT_DIR);
        std::fs::create_dir_all(&checkpoints).unwrap();
        for name in ["model-12.mpk", "model-3.mpk", "optim-3.mpk", "model-x.mpk", "model-4.bin"] {
            std::fs::write(checkpoints.join(name), b"").unwrap();
        }

        assert_eq!(learner_checkpoint_epochs(dir.path()).unwrap(), vec![3, 12]);
        assert_eq!(
            learner_checkpoint_stem(dir.path(), 3),
            checkpoints.join("model-3")
        );
    }

    #[test]
    fn test_load_missing_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();

        let err = load_checkpoint::<B, _>(dir.path(), &device).unwrap_err();
        assert!(err.to_string().contains(CHECKPOINT_MANIFEST_FILE));
    }

    #[test]
    fn test_load_missing_weights() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        manifest(1).save(dir.path().join(CHECKPOINT_MANIFEST_FILE)).unwrap();

        let err = load_checkpoint::<B, _>(dir.path(), &device).unwrap_err();
        assert!(err.to_string().contains("model.mpk"));
    }
}
