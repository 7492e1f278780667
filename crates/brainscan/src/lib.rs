#![warn(missing_docs)]
#![recursion_limit = "256"]
//!# brainscan - Brain MRI Transfer-Learning Classifier
//!
//! ## Notable Components
//!
//! * [`cache`] - pretrained weight download cache and model catalogues.
//! * [`models`] - network modules.
//!   * [`models::backbone`] - pretrained `ResNet` feature extractor.
//!   * [`models::head`] - trainable classification head.
//!   * [`models::classifier`] - backbone + head transfer classifier.
//! * [`data`] - labelled image directories, preprocessing and batching.
//! * [`training`] - burn learner wiring and best-model checkpointing.
//! * [`export`] - checkpoint to inference artifact conversion.
//! * [`predict`] - single-image inference and the request handler.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod cache;
pub mod data;
pub mod export;
pub mod logging;
pub mod models;
pub mod predict;
pub mod training;
