//! # Inference Artifact Export
//!
//! Converts a full-precision training checkpoint into a compact inference
//! artifact: half-precision, gzip-compressed weights plus a JSON manifest
//! describing how to rebuild the model and interpret its outputs.

use crate::data::labels::ClassLabels;
use crate::data::preprocess::PreprocessConfig;
use crate::models::classifier::{TransferClassifier, TransferClassifierConfig};
use crate::training::checkpoint::load_checkpoint;
use anyhow::{Context, anyhow, bail};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::Backend;
use burn::record::{HalfPrecisionSettings, NamedMpkGzFileRecorder};
use std::path::Path;

/// Artifact weights file stem; the recorder appends ``.mpk.gz``.
pub const ARTIFACT_MODEL_STEM: &str = "model";

/// Artifact manifest file name.
pub const ARTIFACT_MANIFEST_FILE: &str = "manifest.json";

/// Current artifact layout version.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Recorder used for artifact weights: half precision, gzip-compressed MessagePack.
pub type ArtifactRecorder = NamedMpkGzFileRecorder<HalfPrecisionSettings>;

/// Describes an exported artifact.
#[derive(Config, Debug)]
pub struct ArtifactManifest {
    /// Artifact layout version.
    pub format_version: u32,

    /// Model structure.
    pub model: TransferClassifierConfig,

    /// Class labels, in logit order.
    pub labels: ClassLabels,

    /// Input transform the model expects.
    pub preprocess: PreprocessConfig,

    /// Stored weight precision.
    #[config(default = "\"f16\".to_string()")]
    pub precision: String,

    /// Epoch of the source checkpoint.
    pub source_epoch: usize,

    /// Validation accuracy of the source checkpoint.
    pub source_valid_accuracy: f64,
}

/// Path of the artifact weights file inside `dir`.
pub fn artifact_weights_path<P: AsRef<Path>>(dir: P) -> std::path::PathBuf {
    dir.as_ref()
        .join(format!("{ARTIFACT_MODEL_STEM}.mpk.gz"))
}

/// Convert a checkpoint directory into an inference artifact.
///
/// # Arguments
///
/// - `checkpoint_dir`: holds ``checkpoint.json`` and ``model.mpk``.
/// - `output_dir`: receives ``manifest.json`` and ``model.mpk.gz``.
/// - `device`: device used to stage the model.
pub fn export_artifact<B: Backend>(
    checkpoint_dir: &Path,
    output_dir: &Path,
    device: &B::Device,
) -> anyhow::Result<ArtifactManifest> {
    tracing::info!(checkpoint = %checkpoint_dir.display(), "Loading checkpoint...");
    let (model, checkpoint) = load_checkpoint::<B, _>(checkpoint_dir, device)?;

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("creating artifact directory {}", output_dir.display()))?;

    tracing::info!(output = %output_dir.display(), "Converting model...");
    model
        .save_file(output_dir.join(ARTIFACT_MODEL_STEM), &ArtifactRecorder::new())
        .with_context(|| format!("saving artifact weights into {}", output_dir.display()))?;

    let manifest = ArtifactManifest {
        format_version: ARTIFACT_FORMAT_VERSION,
        model: checkpoint.model,
        labels: checkpoint.labels,
        preprocess: checkpoint.preprocess,
        precision: "f16".to_string(),
        source_epoch: checkpoint.epoch,
        source_valid_accuracy: checkpoint.valid_accuracy,
    };
    manifest
        .save(output_dir.join(ARTIFACT_MANIFEST_FILE))
        .context("saving artifact manifest")?;

    tracing::info!(
        path = %artifact_weights_path(output_dir).display(),
        epoch = manifest.source_epoch,
        "Model converted."
    );
    Ok(manifest)
}

/// Load the manifest of an artifact directory.
pub fn load_artifact_manifest<P: AsRef<Path>>(dir: P) -> anyhow::Result<ArtifactManifest> {
    let path = dir.as_ref().join(ARTIFACT_MANIFEST_FILE);
    if !path.is_file() {
        bail!("Artifact manifest not found: {}", path.display());
    }
    let manifest = ArtifactManifest::load(&path)
        .map_err(|err| anyhow!("reading {}: {err:?}", path.display()))?;
    if manifest.format_version != ARTIFACT_FORMAT_VERSION {
        bail!(
            "Unsupported artifact format version {} (expected {ARTIFACT_FORMAT_VERSION})",
            manifest.format_version
        );
    }
    Ok(manifest)
}

/// Load an exported model and its manifest.
pub fn load_artifact<B: Backend, P: AsRef<Path>>(
    dir: P,
    device: &B::Device,
) -> anyhow::Result<(TransferClassifier<B>, ArtifactManifest)> {
    let dir = dir.as_ref();
    let manifest = load_artifact_manifest(dir)?;

    let weights = artifact_weights_path(dir);
    if !weights.is_file() {
        bail!("Artifact weights not found: {}", weights.display());
    }

    let model = manifest
        .model
        .init::<B>(device)
        .load_file(dir.join(ARTIFACT_MODEL_STEM), &ArtifactRecorder::new(), device)
        .with_context(|| format!("loading artifact weights {}", weights.display()))?;

    Ok((model, manifest))
}
