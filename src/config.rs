use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::checkpoint::MetricMode;
use crate::error::ConfigError;
use crate::scheduler::SchedulerKind;

/// Metric name to mode string, in the order they were written.
///
/// Modes stay raw strings so a bad mode is reported as a configuration error
/// naming the metric, not as a TOML type error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricModes(Vec<(String, String)>);

impl MetricModes {
    pub fn new() -> Self {
        MetricModes(Vec::new())
    }

    /// Insert or replace `metric`, keeping its position on replace.
    pub fn insert(&mut self, metric: impl Into<String>, mode: impl Into<String>) {
        let metric = metric.into();
        let mode = mode.into();
        match self.0.iter_mut().find(|(m, _)| *m == metric) {
            Some(entry) => entry.1 = mode,
            None => self.0.push((metric, mode)),
        }
    }

    pub fn first(&self) -> Option<&str> {
        self.0.first().map(|(m, _)| m.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(m, mode)| (m.as_str(), mode.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check every mode is `min` or `max`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (metric, mode) in self.iter() {
            MetricMode::parse_for(metric, mode)?;
        }
        Ok(())
    }
}

impl<M: Into<String>, V: Into<String>> FromIterator<(M, V)> for MetricModes {
    fn from_iter<I: IntoIterator<Item = (M, V)>>(iter: I) -> Self {
        let mut modes = MetricModes::new();
        for (metric, mode) in iter {
            modes.insert(metric, mode);
        }
        modes
    }
}

impl Serialize for MetricModes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (metric, mode) in &self.0 {
            map.serialize_entry(metric, mode)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for MetricModes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ModesVisitor;

        impl<'de> Visitor<'de> for ModesVisitor {
            type Value = MetricModes;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a table of metric name to \"min\" or \"max\"")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut modes = MetricModes::new();
                while let Some((metric, mode)) = access.next_entry::<String, String>()? {
                    modes.insert(metric, mode);
                }
                Ok(modes)
            }
        }

        deserializer.deserialize_map(ModesVisitor)
    }
}

/// Unit the training counter advances in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterUnit {
    Epoch,
    Batch,
}

impl fmt::Display for CounterUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterUnit::Epoch => f.write_str("epochs"),
            CounterUnit::Batch => f.write_str("batches"),
        }
    }
}

/// Checkpointer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointerConfig {
    /// Falls back to `logging.log_path` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_path: Option<PathBuf>,
    /// Multiplier on `logging.evaluation_freq`.
    pub checkpoint_freq: u64,
    /// No checkpoints are written before this many counter units.
    pub checkpoint_runway: u64,
    pub clear_intermediate_checkpoints: bool,
    pub clear_all_checkpoints: bool,
    /// The first entry selects the model restored by `load_best_model`.
    pub checkpoint_metric: MetricModes,
    pub checkpoint_task_metrics: MetricModes,
}

impl Default for CheckpointerConfig {
    fn default() -> Self {
        CheckpointerConfig {
            checkpoint_path: None,
            checkpoint_freq: 1,
            checkpoint_runway: 0,
            clear_intermediate_checkpoints: true,
            clear_all_checkpoints: false,
            checkpoint_metric: [("model/train/all/loss", "min")].into_iter().collect(),
            checkpoint_task_metrics: MetricModes::new(),
        }
    }
}

/// Logging and evaluation cadence, plus the checkpointer nested under it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_path: PathBuf,
    pub counter_unit: CounterUnit,
    pub evaluation_freq: u64,
    pub checkpointer: CheckpointerConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_path: PathBuf::from("logs"),
            counter_unit: CounterUnit::Epoch,
            evaluation_freq: 1,
            checkpointer: CheckpointerConfig::default(),
        }
    }
}

impl LoggingConfig {
    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpointer
            .checkpoint_path
            .clone()
            .unwrap_or_else(|| self.log_path.clone())
    }

    /// Effective checkpoint frequency in counter units.
    pub fn checkpoint_freq(&self) -> Result<u64, ConfigError> {
        let freq = self
            .evaluation_freq
            .saturating_mul(self.checkpointer.checkpoint_freq);
        if freq == 0 {
            return Err(ConfigError::InvalidCheckpointFreq {
                freq,
                evaluation_freq: self.evaluation_freq,
                multiplier: self.checkpointer.checkpoint_freq,
            });
        }
        Ok(freq)
    }
}

/// Batch interleaving strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub strategy: SchedulerKind,
    /// Only used by the shuffled strategy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            strategy: SchedulerKind::Sequential,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    pub n_epochs: usize,
    pub checkpointing: bool,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        LearnerConfig {
            n_epochs: 1,
            checkpointing: true,
        }
    }
}

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub learner: LearnerConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the file
    /// does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::warn!("config file '{}' not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.learner.n_epochs == 0 {
            return Err(ConfigError::Validation(
                "learner.n_epochs must be > 0".into(),
            ));
        }
        if self.logging.evaluation_freq == 0 {
            return Err(ConfigError::Validation(
                "logging.evaluation_freq must be > 0".into(),
            ));
        }
        self.logging.checkpoint_freq()?;
        if self.learner.checkpointing && self.logging.checkpointer.checkpoint_metric.is_empty() {
            return Err(ConfigError::Validation(
                "logging.checkpointer.checkpoint_metric must name the metric to restore \
                 when checkpointing is enabled"
                    .into(),
            ));
        }
        self.logging.checkpointer.checkpoint_metric.validate()?;
        self.logging.checkpointer.checkpoint_task_metrics.validate()?;
        Ok(())
    }

    /// Generate a TOML string with all default values (useful for creating
    /// example config files).
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&AppConfig::default())
    }
}
