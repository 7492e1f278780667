//! # Epoch Metrics
//!
//! [`MetricHistory`] collects the per-batch entries burn's learner emits for
//! the `Loss` and `Accuracy` metrics, through one [`HistoryLogger`] per split,
//! and folds them into per-epoch [`EpochSummary`] records.

use burn::train::logger::MetricLogger;
use burn::train::metric::store::Split;
use burn::train::metric::{MetricEntry, NumericEntry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Metric name of burn's `LossMetric`.
pub const LOSS_METRIC: &str = "Loss";

/// Metric name of burn's `AccuracyMetric`, reported in percent.
pub const ACCURACY_METRIC: &str = "Accuracy";

/// Loss and accuracy of one split for one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    /// Mean loss.
    pub loss: f64,

    /// Accuracy in `[0, 1]`.
    pub accuracy: f64,

    /// Number of items.
    pub items: usize,
}

/// Train and validation metrics of one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    /// 1-based epoch number.
    pub epoch: usize,

    /// Training split.
    pub train: MetricSummary,

    /// Validation split.
    pub valid: MetricSummary,
}

/// Item-weighted running sum of one metric.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Accumulator {
    sum: f64,
    count: usize,
}

impl Accumulator {
    fn add(
        &mut self,
        value: f64,
        count: usize,
    ) {
        self.sum += value * count as f64;
        self.count += count;
    }

    fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }
}

type SplitRecords = BTreeMap<usize, HashMap<String, Accumulator>>;

#[derive(Debug, Default)]
struct HistoryState {
    train: SplitRecords,
    valid: SplitRecords,
    open_loggers: usize,
}

impl HistoryState {
    fn split(
        &mut self,
        split: Split,
    ) -> &mut SplitRecords {
        match split {
            Split::Train => &mut self.train,
            Split::Valid => &mut self.valid,
        }
    }
}

/// Per-epoch metric values shared with the learner's loggers.
#[derive(Debug, Clone, Default)]
pub struct MetricHistory {
    shared: Arc<(Mutex<HistoryState>, Condvar)>,
}

impl MetricHistory {
    /// An empty history.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HistoryState> {
        // A poisoned lock still holds consistent sums.
        self.shared
            .0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A logger feeding `split` of this history.
    pub fn logger(
        &self,
        split: Split,
    ) -> HistoryLogger {
        self.state().open_loggers += 1;
        HistoryLogger {
            history: self.clone(),
            split,
            epoch: 1,
        }
    }

    /// Block until every logger has been dropped, or `timeout` elapses.
    ///
    /// The learner hands its loggers to a background thread; they are
    /// dropped only once that thread has processed every event.
    ///
    /// # Returns
    ///
    /// Whether all loggers were closed.
    pub fn wait_closed(
        &self,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state();
        while state.open_loggers > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.shared.1.wait_timeout(state, deadline - now) {
                Ok((state, _)) => state,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    /// Record one serialized metric value.
    fn record(
        &self,
        split: Split,
        epoch: usize,
        name: &str,
        value: f64,
        count: usize,
    ) {
        self.state()
            .split(split)
            .entry(epoch)
            .or_default()
            .entry(name.to_string())
            .or_default()
            .add(value, count);
    }

    fn read(
        &self,
        split: Split,
        epoch: usize,
        name: &str,
    ) -> Option<Accumulator> {
        self.state()
            .split(split)
            .get(&epoch)
            .and_then(|metrics| metrics.get(name))
            .copied()
    }

    fn summary(records: Option<&HashMap<String, Accumulator>>) -> MetricSummary {
        let loss = records
            .and_then(|metrics| metrics.get(LOSS_METRIC))
            .map(Accumulator::mean)
            .unwrap_or(f64::NAN);
        let accuracy = records.and_then(|metrics| metrics.get(ACCURACY_METRIC));
        MetricSummary {
            loss,
            accuracy: accuracy.map(|acc| acc.mean() / 100.0).unwrap_or(f64::NAN),
            items: accuracy.map(|acc| acc.count).unwrap_or(0),
        }
    }

    /// Per-epoch summaries, for every epoch with validation metrics.
    pub fn summaries(&self) -> Vec<EpochSummary> {
        let state = self.state();
        state
            .valid
            .iter()
            .map(|(&epoch, valid)| EpochSummary {
                epoch,
                train: Self::summary(state.train.get(&epoch)),
                valid: Self::summary(Some(valid)),
            })
            .collect()
    }
}

/// [`MetricLogger`] writing one split into a [`MetricHistory`].
pub struct HistoryLogger {
    history: MetricHistory,
    split: Split,
    epoch: usize,
}

/// Parse burn's serialized numeric form: ``"value"`` or ``"value,count"``.
fn parse_numeric(serialized: &str) -> Option<(f64, usize)> {
    match serialized.split_once(',') {
        Some((value, count)) => Some((value.parse().ok()?, count.parse().ok()?)),
        None => Some((serialized.parse().ok()?, 1)),
    }
}

impl MetricLogger for HistoryLogger {
    fn log(
        &mut self,
        item: &MetricEntry,
    ) {
        match parse_numeric(&item.serialize) {
            Some((value, count)) => {
                self.history
                    .record(self.split, self.epoch, &item.name, value, count)
            }
            None => {
                tracing::trace!(metric = %item.name, value = %item.serialize, "non-numeric metric")
            }
        }
    }

    fn end_epoch(
        &mut self,
        epoch: usize,
    ) {
        self.epoch = epoch + 1;
    }

    fn read_numeric(
        &mut self,
        name: &str,
        epoch: usize,
    ) -> Result<Vec<NumericEntry>, String> {
        Ok(self
            .history
            .read(self.split, epoch, name)
            .map(|acc| vec![NumericEntry::Aggregated(acc.mean(), acc.count)])
            .unwrap_or_default())
    }
}

impl Drop for HistoryLogger {
    fn drop(&mut self) {
        let mut state = self.history.state();
        state.open_loggers = state.open_loggers.saturating_sub(1);
        drop(state);
        self.history.shared.1.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hamcrest::prelude::*;

    fn entry(
        name: &str,
        serialize: &str,
    ) -> MetricEntry {
        MetricEntry::new(name.to_string(), serialize.to_string(), serialize.to_string())
    }

    #[test]
    fn test_parse_numeric() {
        assert_eq!(parse_numeric("0.5"), Some((0.5, 1)));
        assert_eq!(parse_numeric("75,4"), Some((75.0, 4)));
        assert_eq!(parse_numeric("cpu 12%"), None);
        assert_eq!(parse_numeric("1.0,x"), None);
    }

    #[test]
    fn test_logger_folds_batches_into_epochs() {
        let history = MetricHistory::new();
        let mut train = history.logger(Split::Train);
        let mut valid = history.logger(Split::Valid);

        // Epoch 1: 4 + 2 items, 100% and 50% correct.
        train.log(&entry(ACCURACY_METRIC, "100,4"));
        train.log(&entry(LOSS_METRIC, "0.2,1"));
        train.log(&entry(ACCURACY_METRIC, "50,2"));
        train.log(&entry(LOSS_METRIC, "0.8,1"));
        train.end_epoch(1);
        valid.log(&entry(ACCURACY_METRIC, "25,4"));
        valid.log(&entry(LOSS_METRIC, "1.5,1"));
        valid.end_epoch(1);

        // Epoch 2.
        train.log(&entry(ACCURACY_METRIC, "0,6"));
        train.end_epoch(2);
        valid.log(&entry(ACCURACY_METRIC, "75,4"));
        valid.end_epoch(2);

        let summaries = history.summaries();
        assert_eq!(summaries.len(), 2);

        let first = summaries[0];
        assert_eq!(first.epoch, 1);
        assert_eq!(first.train.items, 6);
        assert_that!(first.train.accuracy, close_to(5.0 / 6.0, 1e-12));
        assert_that!(first.train.loss, close_to(0.5, 1e-12));
        assert_that!(first.valid.accuracy, close_to(0.25, 1e-12));
        assert_that!(first.valid.loss, close_to(1.5, 1e-12));

        let second = summaries[1];
        assert_eq!(second.epoch, 2);
        assert_eq!(second.train.accuracy, 0.0);
        assert!(second.valid.loss.is_nan());
        assert_that!(second.valid.accuracy, close_to(0.75, 1e-12));
    }

    #[test]
    fn test_read_numeric() {
        let history = MetricHistory::new();
        let mut valid = history.logger(Split::Valid);
        valid.log(&entry(ACCURACY_METRIC, "50,2"));
        valid.log(&entry(ACCURACY_METRIC, "100,2"));

        match valid.read_numeric(ACCURACY_METRIC, 1).unwrap().as_slice() {
            [NumericEntry::Aggregated(value, count)] => {
                assert_that!(*value, close_to(75.0, 1e-12));
                assert_eq!(*count, 4);
            }
            _ => panic!("expected one aggregated entry"),
        }
        assert!(valid.read_numeric(ACCURACY_METRIC, 2).unwrap().is_empty());
        assert!(valid.read_numeric("Missing", 1).unwrap().is_empty());
    }

    #[test]
    fn test_wait_closed() {
        let history = MetricHistory::new();
        let logger = history.logger(Split::Train);
        assert!(!history.wait_closed(Duration::from_millis(10)));

        let handle = std::thread::spawn(move || drop(logger));
        assert!(history.wait_closed(Duration::from_secs(5)));
        handle.join().unwrap();
    }
}
