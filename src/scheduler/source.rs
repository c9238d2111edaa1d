use std::collections::BTreeMap;

use crate::scheduler::{BatchInputs, DataSource, TaskToLabel};

/// A single input column of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Feature {
    Ids(Vec<String>),
    Values(Vec<f64>),
    Rows(Vec<Vec<f64>>),
}

/// Batch inputs keyed by field name.
pub type FeatureMap = BTreeMap<String, Feature>;

/// Batch labels keyed by label name.
pub type LabelMap = BTreeMap<String, Vec<f64>>;

impl BatchInputs for FeatureMap {
    fn unique_ids(&self, field: &str) -> Option<Vec<String>> {
        match self.get(field)? {
            Feature::Ids(ids) => Some(ids.clone()),
            _ => None,
        }
    }
}

/// Pre-batched data held in memory. Each call to `batches` replays every batch.
#[derive(Debug, Clone)]
pub struct InMemorySource<X, Y> {
    data_name: String,
    split: String,
    uid_field: String,
    task_to_label: TaskToLabel,
    batches: Vec<(X, Y)>,
}

impl<X, Y> InMemorySource<X, Y> {
    pub fn new(
        data_name: impl Into<String>,
        split: impl Into<String>,
        uid_field: impl Into<String>,
        task_to_label: TaskToLabel,
        batches: Vec<(X, Y)>,
    ) -> Self {
        InMemorySource {
            data_name: data_name.into(),
            split: split.into(),
            uid_field: uid_field.into(),
            task_to_label,
            batches,
        }
    }
}

impl<X, Y> DataSource for InMemorySource<X, Y>
where
    X: BatchInputs + Clone + 'static,
    Y: Clone + 'static,
{
    type Inputs = X;
    type Labels = Y;

    fn batch_count(&self) -> usize {
        self.batches.len()
    }

    fn uid_field(&self) -> &str {
        &self.uid_field
    }

    fn task_to_label(&self) -> &TaskToLabel {
        &self.task_to_label
    }

    fn data_name(&self) -> &str {
        &self.data_name
    }

    fn split(&self) -> &str {
        &self.split
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = (X, Y)> + '_> {
        Box::new(self.batches.iter().cloned())
    }
}
