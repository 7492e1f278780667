//! # Single-Image Prediction
//!
//! * [`source`] - where an image comes from (URL or local path).
//! * [`handler`] - the stateless request handler.
//!
//! [`Predictor`] holds a loaded artifact and maps one image to a
//! label-keyed probability table.

pub mod handler;
pub mod source;

pub use handler::{PredictionHandler, PredictionRequest};
pub use source::ImageSource;

use crate::data::labels::ClassLabels;
use crate::data::preprocess::PreprocessConfig;
use crate::export::{ArtifactManifest, load_artifact};
use crate::models::classifier::TransferClassifier;
use anyhow::{Context, bail};
use burn::prelude::{Backend, Tensor};
use burn::tensor::TensorData;
use burn::tensor::activation::softmax;
use image::DynamicImage;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::path::Path;

/// Class probabilities for one image.
///
/// Serializes as a JSON object keyed by label, in label order.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// ``(label, probability)`` pairs, in label order.
    pub scores: Vec<(String, f32)>,
}

impl Prediction {
    /// Pair `labels` with `probabilities`.
    pub fn from_probabilities(
        labels: &ClassLabels,
        probabilities: Vec<f32>,
    ) -> anyhow::Result<Self> {
        if probabilities.len() != labels.len() {
            bail!(
                "Model produced {} outputs for {} labels",
                probabilities.len(),
                labels.len()
            );
        }
        Ok(Self {
            scores: labels.names().iter().cloned().zip(probabilities).collect(),
        })
    }

    /// Probability of `label`.
    pub fn score(
        &self,
        label: &str,
    ) -> Option<f32> {
        self.scores
            .iter()
            .find(|(name, _)| name == label)
            .map(|(_, p)| *p)
    }

    /// The most probable label.
    pub fn top(&self) -> Option<(&str, f32)> {
        self.scores
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(name, p)| (name.as_str(), *p))
    }
}

impl Serialize for Prediction {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.scores.len()))?;
        for (label, probability) in &self.scores {
            map.serialize_entry(label, probability)?;
        }
        map.end()
    }
}

/// A loaded inference artifact.
#[derive(Debug)]
pub struct Predictor<B: Backend> {
    model: TransferClassifier<B>,
    manifest: ArtifactManifest,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    /// Load an exported artifact directory.
    pub fn load<P: AsRef<Path>>(
        artifact_dir: P,
        device: &B::Device,
    ) -> anyhow::Result<Self> {
        tracing::debug!(artifact = %artifact_dir.as_ref().display(), "loading artifact");
        let (model, manifest) = load_artifact::<B, _>(artifact_dir, device)?;
        Ok(Self {
            model,
            manifest,
            device: device.clone(),
        })
    }

    /// Class labels, in output order.
    pub fn labels(&self) -> &ClassLabels {
        &self.manifest.labels
    }

    /// The input transform.
    pub fn preprocess(&self) -> &PreprocessConfig {
        &self.manifest.preprocess
    }

    /// Classify a decoded image.
    pub fn predict_image(
        &self,
        image: &DynamicImage,
    ) -> anyhow::Result<Prediction> {
        let preprocess = self.preprocess();
        let pixels = preprocess.preprocess_image(image);
        let [c, h, w] = preprocess.item_shape();

        let input = Tensor::<B, 4>::from_data(TensorData::new(pixels, [1, c, h, w]), &self.device);
        let probabilities = softmax(self.model.forward(input), 1);

        let probabilities = probabilities
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|err| anyhow::anyhow!("reading model output: {err:?}"))?;

        Prediction::from_probabilities(self.labels(), probabilities)
    }

    /// Classify encoded image bytes.
    pub fn predict_bytes(
        &self,
        bytes: &[u8],
    ) -> anyhow::Result<Prediction> {
        let image = image::load_from_memory(bytes).context("decoding image")?;
        self.predict_image(&image)
    }

    /// Fetch and classify an image.
    pub fn predict_source(
        &self,
        source: &ImageSource,
    ) -> anyhow::Result<Prediction> {
        let bytes = source.fetch_bytes()?;
        self.predict_bytes(&bytes)
    }
}
