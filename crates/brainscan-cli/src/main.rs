#![recursion_limit = "256"]

use brainscan::export::export_artifact;
use brainscan::logging::init_tracing;
use brainscan::models::backbone::BACKBONE_PREFABS;
use brainscan::predict::{ImageSource, PredictionHandler, Predictor};
use brainscan::training::{TrainingConfig, train};
use burn::backend::Autodiff;
use burn::config::Config;
use clap::{Args, Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};

#[cfg(feature = "cuda")]
type InferenceBackend = burn::backend::Cuda;

#[cfg(all(feature = "wgpu", not(feature = "cuda")))]
type InferenceBackend = burn::backend::Wgpu;

#[cfg(not(any(feature = "wgpu", feature = "cuda")))]
type InferenceBackend = burn::backend::NdArray;

type TrainingBackend = Autodiff<InferenceBackend>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a classifier and checkpoint the best epoch.
    Train(TrainArgs),

    /// Convert a checkpoint into an inference artifact.
    Convert {
        /// Directory holding checkpoint.json and model.mpk.
        #[arg(long, default_value = "artifacts")]
        checkpoint_dir: PathBuf,

        /// Output artifact directory.
        #[arg(long, default_value = "model")]
        output: PathBuf,
    },

    /// Classify one image and print the probability map.
    Predict {
        /// Artifact directory.
        #[arg(long, default_value = "model")]
        artifact: PathBuf,

        /// Image URL or path.
        #[arg(long)]
        url: String,
    },

    /// Answer a JSON event ({"url": ...}) from a file or stdin.
    Handle {
        /// Artifact directory.
        #[arg(long, default_value = "model")]
        artifact: PathBuf,

        /// Event file; stdin when omitted.
        #[arg(long)]
        event: Option<PathBuf>,
    },

    /// List the backbone catalogue.
    Backbones,
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Training images, one sub-directory per class.
    #[arg(long, default_value = "data/Training")]
    train_dir: PathBuf,

    /// Validation images, one sub-directory per class.
    #[arg(long, default_value = "data/Testing")]
    valid_dir: PathBuf,

    /// Directory for the config, history and best checkpoint.
    #[arg(long, default_value = "artifacts")]
    artifact_dir: PathBuf,

    /// Load a saved training config; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Convert the best checkpoint into this artifact directory afterwards.
    #[arg(long)]
    export: Option<PathBuf>,

    /// Backbone name; see the `backbones` command.
    #[arg(long)]
    backbone: Option<String>,

    /// Square input image size.
    #[arg(long)]
    image_size: Option<usize>,

    /// Batch size.
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Number of epochs.
    #[arg(long)]
    num_epochs: Option<usize>,

    /// Learning rate.
    #[arg(long)]
    learning_rate: Option<f64>,

    /// Head hidden layer width.
    #[arg(long)]
    inner_size: Option<usize>,

    /// Head dropout.
    #[arg(long)]
    dropout: Option<f64>,

    /// Number of workers for data loading.
    #[arg(long)]
    num_workers: Option<usize>,

    /// Random seed.
    #[arg(short, long)]
    seed: Option<u64>,

    /// Early stopping patience.
    #[arg(long)]
    patience: Option<usize>,

    /// Train the backbone as well as the head.
    #[arg(long, default_value = "false")]
    fine_tune_backbone: bool,

    /// Comma-separated class list; discovered when omitted.
    #[arg(long, value_delimiter = ',')]
    classes: Option<Vec<String>>,

    /// Pretrained weight cache directory.
    #[arg(long)]
    cache_dir: Option<String>,
}

impl TrainArgs {
    fn to_config(&self) -> anyhow::Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::load(path)
                .map_err(|err| anyhow::anyhow!("reading {}: {err:?}", path.display()))?,
            None => TrainingConfig::new(),
        };

        if let Some(backbone) = &self.backbone {
            config.backbone = backbone.clone();
        }
        if let Some(size) = self.image_size {
            config.preprocess.image_size = [size, size];
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(num_epochs) = self.num_epochs {
            config.num_epochs = num_epochs;
        }
        if let Some(learning_rate) = self.learning_rate {
            config.learning_rate = learning_rate;
        }
        if let Some(inner_size) = self.inner_size {
            config.inner_size = inner_size;
        }
        if let Some(dropout) = self.dropout {
            config.dropout = dropout;
        }
        if let Some(num_workers) = self.num_workers {
            config.num_workers = num_workers;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.patience.is_some() {
            config.patience = self.patience;
        }
        if self.fine_tune_backbone {
            config.fine_tune_backbone = true;
        }
        if self.classes.is_some() {
            config.classes = self.classes.clone();
        }
        if self.cache_dir.is_some() {
            config.cache_dir = self.cache_dir.clone();
        }

        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing("info");
    let cli = Cli::parse();
    let device = Default::default();

    match cli.command {
        Command::Train(args) => {
            let config = args.to_config()?;
            let report = train::<TrainingBackend>(
                &config,
                &args.train_dir,
                &args.valid_dir,
                &args.artifact_dir,
                &device,
            )?;

            match &report.best {
                Some(best) => tracing::info!(
                    epoch = best.epoch,
                    valid_accuracy = best.valid.accuracy,
                    "best epoch"
                ),
                None => anyhow::bail!("No epoch was checkpointed"),
            }

            if let Some(output) = &args.export {
                convert(&report.checkpoint_dir, output, &device)?;
            }
        }
        Command::Convert {
            checkpoint_dir,
            output,
        } => convert(&checkpoint_dir, &output, &device)?,
        Command::Predict { artifact, url } => {
            let predictor = Predictor::<InferenceBackend>::load(&artifact, &device)?;
            let prediction = predictor.predict_source(&ImageSource::parse(&url)?)?;
            println!("{}", serde_json::to_string_pretty(&prediction)?);
        }
        Command::Handle { artifact, event } => {
            let event = match event {
                Some(path) => std::fs::read_to_string(&path)?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            let handler = PredictionHandler::<InferenceBackend>::new(&artifact, device);
            println!("{}", handler.handle_json(&event)?);
        }
        Command::Backbones => {
            println!("{}: {}", BACKBONE_PREFABS.name, BACKBONE_PREFABS.description);
            for prefab in BACKBONE_PREFABS.items {
                println!("* {}: {}", prefab.name, prefab.description);
                for weights in prefab.weight_names() {
                    println!("  - {}.{}", prefab.name, weights);
                }
            }
        }
    }

    Ok(())
}

fn convert(
    checkpoint_dir: &Path,
    output: &Path,
    device: &<InferenceBackend as burn::prelude::Backend>::Device,
) -> anyhow::Result<()> {
    let manifest = export_artifact::<InferenceBackend>(checkpoint_dir, output, device)?;
    tracing::info!(
        output = %output.display(),
        classes = ?manifest.labels.names(),
        "artifact written"
    );
    Ok(())
}
