//! Training driver: epoch loop over scheduled batches, loss tracking, and the
//! evaluation/checkpoint cadence.

pub mod learner;
pub mod metrics;

pub use learner::{LearnSummary, Learner, LrScheduler, TaskModel};
pub use metrics::{LossMeter, TaskLosses, ALL_LOSS_METRIC};
