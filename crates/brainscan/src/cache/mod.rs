//! # Pretrained Weight Caches
//!
//! * [`disk`] - the on-disk download cache.
//! * [`weights`] - pretrained weight descriptors.
//! * [`prefabs`] - named catalogues of model configs and their weights.

pub mod disk;
pub mod prefabs;
pub mod weights;
