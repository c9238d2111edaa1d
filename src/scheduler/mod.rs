//! Batch scheduling: interleave per-task data sources into one training
//! stream for an epoch.
//!
//! Every strategy honours the same structural contract: the stream yields
//! exactly the sum of the sources' batch counts, never drops or repeats a
//! batch, and tags each batch with its originating source's metadata. A
//! source that yields a different number of batches than it declares ends the
//! stream with a [`SchedulerError`].

mod cursor;
mod round_robin;
mod sequential;
mod shuffled;
mod source;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::SchedulerError;

pub use round_robin::RoundRobinScheduler;
pub use sequential::SequentialScheduler;
pub use shuffled::ShuffledScheduler;
pub use source::{Feature, FeatureMap, InMemorySource, LabelMap};

pub(crate) use cursor::{stop_after_error, SourceCursor};

/// Task name to label name for the tasks a source feeds.
pub type TaskToLabel = BTreeMap<String, String>;

/// Lazy, single-pass stream of batches for one epoch.
pub type BatchStream<'a, X, Y> = Box<dyn Iterator<Item = Result<TaskBatch<X, Y>, SchedulerError>> + 'a>;

/// Access to the unique ids stored in a batch's inputs.
pub trait BatchInputs {
    /// Ids stored under `field`, one per example, or `None` if absent.
    fn unique_ids(&self, field: &str) -> Option<Vec<String>>;
}

/// A per-task source of batches.
///
/// `batches` must yield exactly `batch_count` items per call.
pub trait DataSource {
    type Inputs: BatchInputs + 'static;
    type Labels: 'static;

    fn batch_count(&self) -> usize;
    fn uid_field(&self) -> &str;
    fn task_to_label(&self) -> &TaskToLabel;
    fn data_name(&self) -> &str;
    fn split(&self) -> &str;
    fn batches(&mut self) -> Box<dyn Iterator<Item = (Self::Inputs, Self::Labels)> + '_>;
}

impl<X: BatchInputs + 'static, Y: 'static> DataSource for Box<dyn DataSource<Inputs = X, Labels = Y>> {
    type Inputs = X;
    type Labels = Y;

    fn batch_count(&self) -> usize {
        (**self).batch_count()
    }

    fn uid_field(&self) -> &str {
        (**self).uid_field()
    }

    fn task_to_label(&self) -> &TaskToLabel {
        (**self).task_to_label()
    }

    fn data_name(&self) -> &str {
        (**self).data_name()
    }

    fn split(&self) -> &str {
        (**self).split()
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = (X, Y)> + '_> {
        (**self).batches()
    }
}

/// One batch as handed to the training loop.
#[derive(Debug, Clone)]
pub struct TaskBatch<X, Y> {
    pub uids: Vec<String>,
    pub inputs: X,
    pub labels: Y,
    pub task_to_label: Arc<TaskToLabel>,
    pub data_name: String,
    pub split: String,
}

/// A batch interleaving strategy.
pub trait Scheduler {
    /// Produce one epoch of batches over `sources`.
    fn get_batches<'a, S: DataSource>(
        &mut self,
        sources: &'a mut [S],
    ) -> BatchStream<'a, S::Inputs, S::Labels>;
}

/// Strategy names accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    Sequential,
    RoundRobin,
    Shuffled,
}

impl SchedulerKind {
    pub fn build(self, seed: Option<u64>) -> AnyScheduler {
        match self {
            SchedulerKind::Sequential => AnyScheduler::Sequential(SequentialScheduler),
            SchedulerKind::RoundRobin => AnyScheduler::RoundRobin(RoundRobinScheduler),
            SchedulerKind::Shuffled => AnyScheduler::Shuffled(ShuffledScheduler::new(seed)),
        }
    }
}

/// Scheduler chosen at runtime from configuration.
#[derive(Debug)]
pub enum AnyScheduler {
    Sequential(SequentialScheduler),
    RoundRobin(RoundRobinScheduler),
    Shuffled(ShuffledScheduler),
}

impl Scheduler for AnyScheduler {
    fn get_batches<'a, S: DataSource>(
        &mut self,
        sources: &'a mut [S],
    ) -> BatchStream<'a, S::Inputs, S::Labels> {
        match self {
            AnyScheduler::Sequential(s) => s.get_batches(sources),
            AnyScheduler::RoundRobin(s) => s.get_batches(sources),
            AnyScheduler::Shuffled(s) => s.get_batches(sources),
        }
    }
}
