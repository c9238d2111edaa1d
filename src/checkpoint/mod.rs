//! Checkpoint store: per-iteration snapshots, best-model copies per tracked
//! metric, cleanup and restore.

mod ledger;
mod manager;
mod snapshot;

pub use ledger::{MetricDict, MetricLedger, MetricMode};
pub use manager::{metric_file_stem, Checkpointer, SavedCheckpoint, CHECKPOINT_EXT};
pub use snapshot::{
    CheckpointModel, ModelSnapshot, Serializable, StateBlob, StateDict, TrainingSnapshot,
};
