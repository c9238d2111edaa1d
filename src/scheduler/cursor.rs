use std::sync::Arc;

use tracing::debug;

use crate::error::SchedulerError;
use crate::scheduler::{BatchInputs, DataSource, TaskBatch, TaskToLabel};

/// One open pass over a data source, enforcing its declared batch count.
pub(crate) struct SourceCursor<'a, X, Y> {
    uid_field: String,
    task_to_label: Arc<TaskToLabel>,
    data_name: String,
    split: String,
    expected: usize,
    yielded: usize,
    done: bool,
    iter: Box<dyn Iterator<Item = (X, Y)> + 'a>,
}

impl<'a, X: BatchInputs, Y> SourceCursor<'a, X, Y> {
    pub(crate) fn open<S>(source: &'a mut S) -> Self
    where
        S: DataSource<Inputs = X, Labels = Y>,
    {
        let uid_field = source.uid_field().to_string();
        let task_to_label = Arc::new(source.task_to_label().clone());
        let data_name = source.data_name().to_string();
        let split = source.split().to_string();
        let expected = source.batch_count();
        SourceCursor {
            uid_field,
            task_to_label,
            data_name,
            split,
            expected,
            yielded: 0,
            done: false,
            iter: source.batches(),
        }
    }

    pub(crate) fn expected(&self) -> usize {
        self.expected
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    /// Next batch from this source, `None` once the declared count has been
    /// produced and the source is confirmed empty.
    pub(crate) fn next_batch(&mut self) -> Option<Result<TaskBatch<X, Y>, SchedulerError>> {
        if self.done {
            return None;
        }
        if self.yielded == self.expected {
            self.done = true;
            return self.iter.next().map(|_| {
                Err(SchedulerError::TooManyBatches {
                    data_name: self.data_name.clone(),
                    split: self.split.clone(),
                    expected: self.expected,
                })
            });
        }
        let Some((inputs, labels)) = self.iter.next() else {
            self.done = true;
            return Some(Err(SchedulerError::TooFewBatches {
                data_name: self.data_name.clone(),
                split: self.split.clone(),
                expected: self.expected,
                actual: self.yielded,
            }));
        };
        let Some(uids) = inputs.unique_ids(&self.uid_field) else {
            self.done = true;
            return Some(Err(SchedulerError::MissingUidField {
                data_name: self.data_name.clone(),
                field: self.uid_field.clone(),
            }));
        };
        self.yielded += 1;
        debug!(
            data_name = %self.data_name,
            split = %self.split,
            batch = self.yielded,
            of = self.expected,
            "scheduled batch"
        );
        Some(Ok(TaskBatch {
            uids,
            inputs,
            labels,
            task_to_label: Arc::clone(&self.task_to_label),
            data_name: self.data_name.clone(),
            split: self.split.clone(),
        }))
    }
}

/// End `iter` right after the first error it yields.
pub(crate) fn stop_after_error<'a, T: 'a, E: 'a>(
    iter: impl Iterator<Item = Result<T, E>> + 'a,
) -> Box<dyn Iterator<Item = Result<T, E>> + 'a> {
    let mut failed = false;
    Box::new(iter.take_while(move |item| {
        if failed {
            return false;
        }
        failed = item.is_err();
        true
    }))
}
