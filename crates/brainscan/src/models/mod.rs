//! # Models
//!
//! * [`backbone`] - the pretrained `ResNet` feature extractor.
//! * [`head`] - the trainable classification head.
//! * [`classifier`] - the assembled transfer-learning classifier.

pub mod backbone;
pub mod classifier;
pub mod head;
