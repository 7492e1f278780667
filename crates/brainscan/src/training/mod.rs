//! # Transfer-Learning Training
//!
//! [`train`] fits a [`TransferClassifier`] on a labelled image directory with
//! burn's learner, validating after every epoch. The learner keeps the best
//! epoch (by validation accuracy) under ``checkpoint/``; that epoch is then
//! promoted to ``model.mpk`` + ``checkpoint.json`` in the artifact directory.
//!
//! * [`checkpoint`] - checkpoint files and reloading.
//! * [`metrics`] - per-epoch loss/accuracy history.
//! * [`renderer`] - learner progress through `tracing`.
//! * [`step`] - the learner's train and validation steps.

pub mod checkpoint;
pub mod metrics;
pub mod renderer;
pub mod step;

use crate::cache::disk::DiskCacheConfig;
use crate::data::batcher::{ClassificationBatcher, build_loader};
use crate::data::dataset::ImageDirectoryDataset;
use crate::data::labels::ClassLabels;
use crate::data::preprocess::PreprocessConfig;
use crate::models::backbone::BACKBONE_NORMALIZATION;
use crate::models::backbone::pretrained::init_backbone;
use crate::models::classifier::{TransferClassifier, TransferClassifierConfig};
use crate::training::checkpoint::{
    CheckpointManifest, CheckpointRecorder, learner_checkpoint_epochs, learner_checkpoint_stem,
    write_checkpoint,
};
use crate::training::metrics::{EpochSummary, MetricHistory};
use crate::training::renderer::TracingRenderer;
use crate::training::step::ClassifierTrainer;
use anyhow::{Context, bail};
use burn::config::Config;
use burn::data::dataset::Dataset;
use burn::module::Module;
use burn::optim::AdamConfig;
use burn::tensor::backend::AutodiffBackend;
use burn::train::logger::FileMetricLogger;
use burn::train::metric::store::{Aggregate, Direction, Split};
use burn::train::metric::{AccuracyMetric, LossMetric};
use burn::train::checkpoint::MetricCheckpointingStrategy;
use burn::train::{LearnerBuilder, MetricEarlyStoppingStrategy, StoppingCondition};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

/// Resolved training config file name.
pub const TRAINING_CONFIG_FILE: &str = "config.json";

/// Epoch history file name.
pub const HISTORY_FILE: &str = "history.json";

/// How long to wait for the learner's background loggers after fitting.
const HISTORY_FLUSH_TIMEOUT: Duration = Duration::from_secs(60);

/// Training configuration.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Backbone catalogue name, ``"{prefab}"`` or ``"{prefab}.{weights}"``.
    #[config(default = "\"resnet18.tv_in1k\".to_string()")]
    pub backbone: String,

    /// Input transform.
    #[config(default = "PreprocessConfig::new().with_normalization(BACKBONE_NORMALIZATION)")]
    pub preprocess: PreprocessConfig,

    /// Batch size.
    #[config(default = 32)]
    pub batch_size: usize,

    /// Number of epochs.
    #[config(default = 20)]
    pub num_epochs: usize,

    /// Adam learning rate.
    #[config(default = 0.01)]
    pub learning_rate: f64,

    /// Width of the head's hidden layer.
    #[config(default = 128)]
    pub inner_size: usize,

    /// Dropout after the head's hidden layer.
    #[config(default = 0.0)]
    pub dropout: f64,

    /// Data loader worker threads.
    #[config(default = 4)]
    pub num_workers: usize,

    /// Random seed.
    #[config(default = 42)]
    pub seed: u64,

    /// Stop after this many epochs without validation improvement.
    #[config(default = "None")]
    pub patience: Option<usize>,

    /// Train the backbone too, instead of only the head.
    #[config(default = false)]
    pub fine_tune_backbone: bool,

    /// Fixed class list; discovered from the training directory when unset.
    #[config(default = "None")]
    pub classes: Option<Vec<String>>,

    /// Pretrained weight cache directory override.
    #[config(default = "None")]
    pub cache_dir: Option<String>,
}

impl TrainingConfig {
    /// Reject settings [`train`] cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be positive");
        }
        if self.num_epochs == 0 {
            bail!("num_epochs must be positive");
        }
        let [height, width] = self.preprocess.image_size;
        if height == 0 || width == 0 {
            bail!("image_size must be non-zero, got {height}x{width}");
        }
        if !(0.0..1.0).contains(&self.dropout) {
            bail!("dropout must be in [0, 1), got {}", self.dropout);
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            bail!("learning_rate must be positive, got {}", self.learning_rate);
        }
        Ok(())
    }
}

/// Outcome of a [`train`] run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Class labels, in logit order.
    pub labels: ClassLabels,

    /// Per-epoch metrics.
    pub history: Vec<EpochSummary>,

    /// The checkpointed epoch.
    pub best: Option<EpochSummary>,

    /// Directory holding the checkpoint.
    pub checkpoint_dir: PathBuf,
}

/// The epoch to promote: the best validation accuracy among the epochs the
/// learner kept a checkpoint for. Ties keep the earliest; `NaN` ranks last.
fn select_best(
    history: &[EpochSummary],
    kept: &[usize],
) -> Option<EpochSummary> {
    history
        .iter()
        .filter(|summary| kept.contains(&summary.epoch))
        .fold(None, |best: Option<&EpochSummary>, summary| match best {
            None => Some(summary),
            Some(best)
                if summary.valid.accuracy > best.valid.accuracy
                    || (best.valid.accuracy.is_nan() && !summary.valid.accuracy.is_nan()) =>
            {
                Some(summary)
            }
            keep => keep,
        })
        .copied()
}

/// Train a transfer classifier.
///
/// # Arguments
///
/// - `config`: the training configuration.
/// - `train_dir`: class-per-directory training images.
/// - `valid_dir`: class-per-directory validation images.
/// - `artifact_dir`: receives ``config.json``, ``history.json``, the learner
///   logs and checkpoints, and the best checkpoint.
/// - `device`: training device.
pub fn train<B: AutodiffBackend>(
    config: &TrainingConfig,
    train_dir: &Path,
    valid_dir: &Path,
    artifact_dir: &Path,
    device: &B::Device,
) -> anyhow::Result<TrainingReport> {
    config.validate().context("invalid training config")?;

    std::fs::create_dir_all(artifact_dir)
        .with_context(|| format!("creating artifact directory {}", artifact_dir.display()))?;
    config
        .save(artifact_dir.join(TRAINING_CONFIG_FILE))
        .context("saving training config")?;

    B::seed(config.seed);

    info!("Creating training data loader...");
    let train_set = match &config.classes {
        Some(classes) => {
            ImageDirectoryDataset::with_labels(train_dir, ClassLabels::new(classes.clone())?)?
        }
        None => ImageDirectoryDataset::discover(train_dir)?,
    };
    if train_set.is_empty() {
        bail!("No training images found under {}", train_dir.display());
    }
    let labels = train_set.labels().clone();
    info!(
        images = train_set.len(),
        classes = ?labels.names(),
        counts = ?train_set.class_counts(),
        "Training data loader created."
    );

    info!("Creating validation data loader...");
    let valid_set = ImageDirectoryDataset::with_labels(valid_dir, labels.clone())?;
    if valid_set.is_empty() {
        bail!("No validation images found under {}", valid_dir.display());
    }
    info!(
        images = valid_set.len(),
        counts = ?valid_set.class_counts(),
        "Validation data loader created."
    );

    let batcher = ClassificationBatcher::new(config.preprocess.clone());
    let train_loader = build_loader::<B>(
        train_set,
        batcher.clone(),
        config.batch_size,
        Some(config.seed),
        config.num_workers,
        device,
    );
    let valid_loader = build_loader::<B::InnerBackend>(
        valid_set,
        batcher,
        config.batch_size,
        None,
        config.num_workers,
        device,
    );

    info!(backbone = %config.backbone, "Building the model...");
    let disk_cache = DiskCacheConfig::new().with_cache_dir(config.cache_dir.clone());
    let (backbone, backbone_config) = init_backbone::<B>(&config.backbone, &disk_cache, device)?;

    let mut model_config = TransferClassifierConfig::for_backbone(backbone_config, labels.len());
    model_config.head = model_config
        .head
        .with_inner_size(config.inner_size)
        .with_dropout(config.dropout);

    let mut model: TransferClassifier<B> = model_config.init_with_backbone(backbone, device);
    if !config.fine_tune_backbone {
        model = model.freeze_backbone();
    }
    info!(
        num_classes = model.num_classes(),
        trainable_backbone = config.fine_tune_backbone,
        "Model created."
    );

    let history = MetricHistory::new();
    let builder = LearnerBuilder::new(artifact_dir)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .metric_loggers(history.logger(Split::Train), history.logger(Split::Valid))
        .metric_loggers(
            FileMetricLogger::new(artifact_dir.join("train")),
            FileMetricLogger::new(artifact_dir.join("valid")),
        )
        .with_file_checkpointer(CheckpointRecorder::new())
        .with_checkpointing_strategy(MetricCheckpointingStrategy::new(
            &AccuracyMetric::<B>::new(),
            Aggregate::Mean,
            Direction::Highest,
            Split::Valid,
        ))
        .with_application_logger(None)
        .renderer(TracingRenderer::new())
        .devices(vec![device.clone()])
        .num_epochs(config.num_epochs);

    let builder = match config.patience {
        Some(patience) => builder.early_stopping(MetricEarlyStoppingStrategy::new(
            &AccuracyMetric::<B>::new(),
            Aggregate::Mean,
            Direction::Highest,
            Split::Valid,
            StoppingCondition::NoImprovementSince {
                n_epochs: patience.max(1),
            },
        )),
        None => builder,
    };

    let learner = builder.build(
        ClassifierTrainer::new(model, config.fine_tune_backbone),
        AdamConfig::new().init(),
        config.learning_rate,
    );

    info!(epochs = config.num_epochs, "Training the model...");
    let now = Instant::now();
    let _trained = learner.fit(train_loader, valid_loader);
    let elapsed = now.elapsed().as_secs();
    info!(
        "Model training is complete in {}m{}s.",
        elapsed / 60,
        elapsed % 60
    );

    if !history.wait_closed(HISTORY_FLUSH_TIMEOUT) {
        tracing::warn!("metric loggers did not shut down; epoch history may be incomplete");
    }
    let history = history.summaries();
    for summary in &history {
        info!(
            epoch = summary.epoch,
            train_loss = summary.train.loss,
            train_accuracy = summary.train.accuracy,
            valid_loss = summary.valid.loss,
            valid_accuracy = summary.valid.accuracy,
            "epoch summary"
        );
    }

    let history_path = artifact_dir.join(HISTORY_FILE);
    let history_file = std::fs::File::create(&history_path)
        .with_context(|| format!("creating {}", history_path.display()))?;
    serde_json::to_writer_pretty(history_file, &history).context("writing epoch history")?;

    let kept = learner_checkpoint_epochs(artifact_dir)?;
    let Some(best) = select_best(&history, &kept) else {
        bail!(
            "No epoch checkpoint found under {} (kept epochs: {kept:?})",
            artifact_dir.display()
        );
    };

    info!(epoch = best.epoch, "Promoting best checkpoint...");
    let stem = learner_checkpoint_stem(artifact_dir, best.epoch);
    let best_model = ClassifierTrainer::<B::InnerBackend>::new(
        model_config.init(device),
        config.fine_tune_backbone,
    )
    .load_file(stem.clone(), &CheckpointRecorder::new(), device)
    .with_context(|| format!("loading learner checkpoint {}", stem.display()))?;

    write_checkpoint(
        artifact_dir,
        &best_model.classifier,
        &CheckpointManifest {
            model: model_config,
            labels: labels.clone(),
            preprocess: config.preprocess.clone(),
            epoch: best.epoch,
            valid_accuracy: best.valid.accuracy,
            valid_loss: best.valid.loss,
        },
    )?;

    Ok(TrainingReport {
        labels,
        history,
        best: Some(best),
        checkpoint_dir: artifact_dir.to_path_buf(),
    })
}
