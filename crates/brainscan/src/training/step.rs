//! # Learner Steps
//!
//! [`ClassifierTrainer`] wraps a [`TransferClassifier`] for burn's learner.
//! The training step runs the backbone frozen unless fine-tuning is enabled;
//! the validation step always runs the full model.

use crate::data::batcher::ClassificationBatch;
use crate::models::classifier::TransferClassifier;
use burn::module::Module;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::prelude::{Backend, Int, Tensor};
use burn::tensor::backend::AutodiffBackend;
use burn::train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep};

/// Learner host for a [`TransferClassifier`].
#[derive(Module, Debug)]
pub struct ClassifierTrainer<B: Backend> {
    /// Train the backbone too, instead of only the head.
    pub fine_tune_backbone: bool,

    /// The wrapped model.
    pub classifier: TransferClassifier<B>,
}

impl<B: Backend> ClassifierTrainer<B> {
    /// Wrap `classifier`.
    pub fn new(
        classifier: TransferClassifier<B>,
        fine_tune_backbone: bool,
    ) -> Self {
        Self {
            fine_tune_backbone,
            classifier,
        }
    }

    /// Cross-entropy loss over `logits`, packaged for burn's metrics.
    fn classification_output(
        logits: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let loss = CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits.clone(), targets.clone());

        ClassificationOutput::new(loss, logits, targets)
    }

    /// Full-model forward pass with loss.
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        Self::classification_output(self.classifier.forward(images), targets)
    }
}

impl<B: AutodiffBackend> TrainStep<ClassificationBatch<B>, ClassificationOutput<B>>
    for ClassifierTrainer<B>
{
    fn step(
        &self,
        batch: ClassificationBatch<B>,
    ) -> TrainOutput<ClassificationOutput<B>> {
        let logits = if self.fine_tune_backbone {
            self.classifier.forward(batch.images)
        } else {
            self.classifier.forward_frozen(batch.images)
        };
        let item = Self::classification_output(logits, batch.targets);

        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<ClassificationBatch<B>, ClassificationOutput<B>>
    for ClassifierTrainer<B>
{
    fn step(
        &self,
        batch: ClassificationBatch<B>,
    ) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}
