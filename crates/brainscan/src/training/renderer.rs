//! # Tracing Metrics Renderer
//!
//! Routes the learner's progress reports through `tracing` instead of a
//! terminal dashboard.

use burn::train::renderer::{MetricState, MetricsRenderer, TrainingProgress};

/// Logs learner progress with `tracing`.
///
/// Per-iteration progress goes to `debug`; the metric values seen at the end
/// of each epoch go to `info`.
#[derive(Debug, Default)]
pub struct TracingRenderer {
    train: Vec<(String, String)>,
    valid: Vec<(String, String)>,
}

impl TracingRenderer {
    /// A renderer with no recorded state.
    pub fn new() -> Self {
        Self::default()
    }
}

fn record(
    metrics: &mut Vec<(String, String)>,
    state: MetricState,
) {
    let entry = match state {
        MetricState::Generic(entry) => entry,
        MetricState::Numeric(entry, _) => entry,
    };
    match metrics.iter_mut().find(|(name, _)| *name == entry.name) {
        Some(slot) => slot.1 = entry.formatted,
        None => metrics.push((entry.name, entry.formatted)),
    }
}

fn render(
    split: &str,
    metrics: &[(String, String)],
    item: &TrainingProgress,
) {
    tracing::debug!(
        split,
        epoch = item.epoch,
        iteration = item.iteration,
        items = item.progress.items_processed,
        total = item.progress.items_total,
        "progress"
    );
    if item.progress.items_total > 0 && item.progress.items_processed >= item.progress.items_total {
        let summary = metrics
            .iter()
            .map(|(_, formatted)| formatted.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!(split, epoch = item.epoch, total = item.epoch_total, "{summary}");
    }
}

impl MetricsRenderer for TracingRenderer {
    fn update_train(
        &mut self,
        state: MetricState,
    ) {
        record(&mut self.train, state);
    }

    fn update_valid(
        &mut self,
        state: MetricState,
    ) {
        record(&mut self.valid, state);
    }

    fn render_train(
        &mut self,
        item: TrainingProgress,
    ) {
        render("train", &self.train, &item);
    }

    fn render_valid(
        &mut self,
        item: TrainingProgress,
    ) {
        render("valid", &self.valid, &item);
    }
}
