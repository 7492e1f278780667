//! # Data Loading
//!
//! * [`labels`] - class label ordering.
//! * [`preprocess`] - resize and normalization, shared by training and inference.
//! * [`dataset`] - labelled image directory trees.
//! * [`batcher`] - tensor batching and data loader construction.

pub mod batcher;
pub mod dataset;
pub mod labels;
pub mod preprocess;

pub use batcher::{ClassificationBatch, ClassificationBatcher, build_loader, item_to_image};
pub use dataset::{ImageDirectoryDataset, ImageItem};
pub use labels::ClassLabels;
pub use preprocess::{PixelNormalization, PreprocessConfig, ResizeFilter};
