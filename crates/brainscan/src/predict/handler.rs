//! # Request Handler
//!
//! A stateless entry point: each request loads the artifact, fetches one
//! image, and answers with the label-to-probability map.

use crate::predict::{ImageSource, Prediction, Predictor};
use anyhow::Context;
use burn::prelude::Backend;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A prediction request event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionRequest {
    /// Image location; see [`ImageSource::parse`].
    pub url: String,
}

/// Answers [`PredictionRequest`]s from an artifact directory.
#[derive(Debug, Clone)]
pub struct PredictionHandler<B: Backend> {
    artifact_dir: PathBuf,
    device: B::Device,
}

impl<B: Backend> PredictionHandler<B> {
    /// Create a handler for `artifact_dir`.
    ///
    /// Nothing is loaded until a request arrives.
    pub fn new<P: AsRef<Path>>(
        artifact_dir: P,
        device: B::Device,
    ) -> Self {
        Self {
            artifact_dir: artifact_dir.as_ref().to_path_buf(),
            device,
        }
    }

    /// Handle one request.
    pub fn handle(
        &self,
        request: &PredictionRequest,
    ) -> anyhow::Result<Prediction> {
        let predictor = Predictor::<B>::load(&self.artifact_dir, &self.device)?;
        let source = ImageSource::parse(&request.url)?;

        let prediction = predictor
            .predict_source(&source)
            .with_context(|| format!("predicting {source}"))?;

        if let Some((label, probability)) = prediction.top() {
            tracing::info!(source = %source, label, probability, "prediction");
        }
        Ok(prediction)
    }

    /// Handle one JSON-encoded request, returning the JSON response.
    pub fn handle_json(
        &self,
        event: &str,
    ) -> anyhow::Result<String> {
        let request: PredictionRequest =
            serde_json::from_str(event).context("parsing prediction request")?;
        let prediction = self.handle(&request)?;
        serde_json::to_string(&prediction).context("encoding prediction")
    }
}
