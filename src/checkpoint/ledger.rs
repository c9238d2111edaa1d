use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Metric values keyed by metric name, e.g. `"model/train/all/loss"`.
pub type MetricDict = BTreeMap<String, f64>;

/// Which direction counts as an improvement for a tracked metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricMode {
    Min,
    Max,
}

impl MetricMode {
    /// Strict improvement test. Ties never improve.
    pub fn improves(self, candidate: f64, best: f64) -> bool {
        match self {
            MetricMode::Max => candidate > best,
            MetricMode::Min => candidate < best,
        }
    }

    /// Parse a configured mode string, naming the metric on failure.
    pub fn parse_for(metric: &str, mode: &str) -> Result<Self, ConfigError> {
        mode.parse().map_err(|_| ConfigError::InvalidMetricMode {
            metric: metric.to_string(),
            mode: mode.to_string(),
        })
    }
}

impl FromStr for MetricMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "min" => Ok(MetricMode::Min),
            "max" => Ok(MetricMode::Max),
            other => Err(format!("unknown metric mode '{other}'")),
        }
    }
}

impl fmt::Display for MetricMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricMode::Min => f.write_str("min"),
            MetricMode::Max => f.write_str("max"),
        }
    }
}

/// Best value seen so far for every tracked metric.
///
/// The set of tracked metrics and their modes is fixed at construction. Entries
/// only appear once a metric is first observed through [`MetricLedger::update`].
#[derive(Debug, Clone, Default)]
pub struct MetricLedger {
    modes: BTreeMap<String, MetricMode>,
    best: MetricDict,
}

impl MetricLedger {
    pub fn new(modes: BTreeMap<String, MetricMode>) -> Self {
        MetricLedger {
            modes,
            best: MetricDict::new(),
        }
    }

    pub fn mode(&self, metric: &str) -> Option<MetricMode> {
        self.modes.get(metric).copied()
    }

    pub fn is_tracked(&self, metric: &str) -> bool {
        self.modes.contains_key(metric)
    }

    /// True when at least one key of `metric_dict` is a tracked metric.
    pub fn tracks_any(&self, metric_dict: &MetricDict) -> bool {
        metric_dict.keys().any(|m| self.is_tracked(m))
    }

    pub fn best(&self, metric: &str) -> Option<f64> {
        self.best.get(metric).copied()
    }

    pub fn best_values(&self) -> &MetricDict {
        &self.best
    }

    /// Tracked metrics in `metric_dict` that would be a new best, with their
    /// values. The ledger itself is not changed.
    ///
    /// A metric's first observation always counts as a new best, whatever its
    /// value. Afterwards only strict improvements under the metric's mode count.
    /// Metrics that are not tracked are ignored.
    pub fn candidates(&self, metric_dict: &MetricDict) -> MetricDict {
        metric_dict
            .iter()
            .filter(|&(metric, &value)| {
                self.mode(metric).is_some_and(|mode| match self.best.get(metric) {
                    None => true,
                    Some(&best) => mode.improves(value, best),
                })
            })
            .map(|(metric, &value)| (metric.clone(), value))
            .collect()
    }

    /// Store `value` as the best seen for `metric`.
    pub fn record(&mut self, metric: &str, value: f64) {
        self.best.insert(metric.to_string(), value);
    }

    /// Fold a round of metric values into the ledger and return the tracked
    /// metrics that reached a new best.
    pub fn update(&mut self, metric_dict: &MetricDict) -> BTreeSet<String> {
        let improved = self.candidates(metric_dict);
        for (metric, &value) in &improved {
            self.record(metric, value);
        }
        improved.into_keys().collect()
    }
}
