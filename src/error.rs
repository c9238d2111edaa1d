use std::path::PathBuf;

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error(
        "invalid checkpoint freq {freq} (evaluation_freq {evaluation_freq} x checkpoint_freq {multiplier}), must be greater than 0"
    )]
    InvalidCheckpointFreq {
        freq: u64,
        evaluation_freq: u64,
        multiplier: u64,
    },

    #[error("unrecognized checkpoint metric mode '{mode}' for metric {metric}, must be 'min' or 'max'")]
    InvalidMetricMode { metric: String, mode: String },

    #[error("config validation error: {0}")]
    Validation(String),
}

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to (de)serialize snapshot {path}: {source}")]
    Snapshot {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to decode state blob: {0}")]
    StateDecode(String),

    #[error("ledger has a best value for {metric} but {path} is missing")]
    InconsistentState { metric: String, path: PathBuf },

    #[error("no checkpoint_metric configured, cannot choose a best model to restore")]
    NoRestoreMetric,
}

impl CheckpointError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CheckpointError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while interleaving task batches.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("source {data_name}/{split} declared {expected} batches but yielded only {actual}")]
    TooFewBatches {
        data_name: String,
        split: String,
        expected: usize,
        actual: usize,
    },

    #[error("source {data_name}/{split} declared {expected} batches but yielded more")]
    TooManyBatches {
        data_name: String,
        split: String,
        expected: usize,
    },

    #[error("batch from {data_name} has no unique id field '{field}'")]
    MissingUidField { data_name: String, field: String },
}

/// Errors that can occur during training.
#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("model error: {0}")]
    Model(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}
