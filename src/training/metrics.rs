use std::collections::{BTreeMap, VecDeque};

use crate::checkpoint::MetricDict;

/// Metric key for the example-weighted mean loss over all tasks.
pub const ALL_LOSS_METRIC: &str = "model/train/all/loss";

/// Loss for one optimizer step, keyed by task name.
pub type TaskLosses = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, Default)]
struct Mean {
    sum: f64,
    count: usize,
}

impl Mean {
    fn add(&mut self, value: f64, weight: usize) {
        self.sum += value * weight as f64;
        self.count += weight;
    }

    fn value(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Accumulates training losses between evaluations, plus a rolling window of
/// recent step losses for progress logging.
#[derive(Debug)]
pub struct LossMeter {
    per_task: BTreeMap<String, Mean>,
    all: Mean,
    recent: VecDeque<f64>,
    capacity: usize,
    total_steps: u64, // lifetime count, never reset
}

impl LossMeter {
    pub fn with_capacity(capacity: usize) -> Self {
        LossMeter {
            per_task: BTreeMap::new(),
            all: Mean::default(),
            recent: VecDeque::with_capacity(capacity),
            capacity,
            total_steps: 0,
        }
    }

    pub fn new() -> Self {
        Self::with_capacity(100)
    }

    /// Record the losses of one batch from `data_name`/`split` holding
    /// `batch_size` examples.
    pub fn record(&mut self, data_name: &str, split: &str, losses: &TaskLosses, batch_size: usize) {
        self.total_steps += 1;
        let weight = batch_size.max(1);
        for (task, &loss) in losses {
            self.per_task
                .entry(format!("{task}/{data_name}/{split}/loss"))
                .or_default()
                .add(loss, weight);
            self.all.add(loss, weight);
        }
        if !losses.is_empty() {
            let step_mean = losses.values().sum::<f64>() / losses.len() as f64;
            self.recent.push_back(step_mean);
            if self.recent.len() > self.capacity {
                self.recent.pop_front();
            }
        }
    }

    /// Mean losses since the last reset, as metric entries.
    pub fn metric_dict(&self) -> MetricDict {
        let mut metrics: MetricDict = self
            .per_task
            .iter()
            .filter_map(|(key, mean)| Some((key.clone(), mean.value()?)))
            .collect();
        if let Some(all) = self.all.value() {
            metrics.insert(ALL_LOSS_METRIC.to_string(), all);
        }
        metrics
    }

    /// Forget accumulated means. The rolling window is kept.
    pub fn reset(&mut self) {
        self.per_task.clear();
        self.all = Mean::default();
    }

    /// Average step loss over the last N recorded steps.
    pub fn average_loss(&self, last_n: usize) -> f64 {
        let n = self.recent.len().min(last_n);
        if n == 0 {
            return 0.0;
        }
        let sum: f64 = self.recent.iter().rev().take(n).sum();
        sum / n as f64
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }
}

impl Default for LossMeter {
    fn default() -> Self {
        Self::new()
    }
}
