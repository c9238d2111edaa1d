use std::path::Path;

use tracing::info;

use crate::checkpoint::{CheckpointModel, Checkpointer, MetricDict, StateDict, TrainingSnapshot};
use crate::config::{AppConfig, CounterUnit};
use crate::error::TrainingError;
use crate::scheduler::{AnyScheduler, DataSource, Scheduler, TaskBatch};
use crate::training::metrics::{LossMeter, TaskLosses};

/// A multi-task model the learner can train.
///
/// Forward, backward and the parameter update all happen inside `train_step`;
/// the learner only sequences steps, evaluation and checkpoints.
pub trait TaskModel: CheckpointModel {
    type Inputs;
    type Labels;
    type Optimizer: StateDict;

    /// Run one update on `batch` and return the loss per task it touched.
    fn train_step(
        &mut self,
        batch: &TaskBatch<Self::Inputs, Self::Labels>,
        optimizer: &mut Self::Optimizer,
    ) -> Result<TaskLosses, TrainingError>;

    /// Extra metrics merged into each evaluation round.
    fn evaluate(&mut self) -> Result<MetricDict, TrainingError> {
        Ok(MetricDict::new())
    }
}

/// Learning-rate schedule stepped once per batch.
pub trait LrScheduler: StateDict {
    fn step(&mut self);
}

/// Outcome of [`Learner::learn`].
#[derive(Debug, Clone, Default)]
pub struct LearnSummary {
    pub epochs: usize,
    pub batches: u64,
    /// Metrics from the last evaluation round.
    pub last_metrics: MetricDict,
    /// Whether the model was replaced by the best checkpointed model.
    pub restored_best: bool,
}

/// Drives training epochs over scheduled task batches, evaluating and
/// checkpointing on the configured cadence.
pub struct Learner {
    n_epochs: usize,
    counter_unit: CounterUnit,
    evaluation_freq: u64,
    scheduler: AnyScheduler,
    checkpointer: Option<Checkpointer>,
    /// Counter value the next run continues after.
    start_iteration: u64,
}

impl Learner {
    pub fn new(config: &AppConfig) -> Result<Self, TrainingError> {
        config.validate()?;
        let checkpointer = if config.learner.checkpointing {
            Some(Checkpointer::new(&config.logging)?)
        } else {
            None
        };
        Ok(Learner {
            n_epochs: config.learner.n_epochs,
            counter_unit: config.logging.counter_unit,
            evaluation_freq: config.logging.evaluation_freq,
            scheduler: config.scheduler.strategy.build(config.scheduler.seed),
            checkpointer,
            start_iteration: 0,
        })
    }

    pub fn checkpointer(&self) -> Option<&Checkpointer> {
        self.checkpointer.as_ref()
    }

    /// Restore model, optimizer and scheduler from a snapshot so the next
    /// `learn` call continues the counter after the snapshot's iteration.
    pub fn resume<M: TaskModel>(
        &mut self,
        path: &Path,
        model: &mut M,
        optimizer: &mut M::Optimizer,
        lr_scheduler: Option<&mut dyn LrScheduler>,
    ) -> Result<TrainingSnapshot, TrainingError> {
        let snapshot = TrainingSnapshot::load(path)?;
        snapshot.restore_all(
            model,
            optimizer,
            lr_scheduler.map(|s| s as &mut dyn StateDict),
        )?;
        self.start_iteration = snapshot.iteration;
        info!(
            "Resumed from {} at {} {}",
            path.display(),
            snapshot.iteration,
            self.counter_unit
        );
        Ok(snapshot)
    }

    /// Train for the configured number of epochs.
    ///
    /// When checkpointing is enabled the model ends up holding the best
    /// checkpointed weights, and snapshot files are cleaned up afterwards.
    pub fn learn<M, S>(
        &mut self,
        model: &mut M,
        optimizer: &mut M::Optimizer,
        mut lr_scheduler: Option<&mut dyn LrScheduler>,
        sources: &mut [S],
    ) -> Result<LearnSummary, TrainingError>
    where
        M: TaskModel,
        S: DataSource<Inputs = M::Inputs, Labels = M::Labels>,
    {
        let total_batches: usize = sources.iter().map(|s| s.batch_count()).sum();
        info!(
            "Start learning for {} epochs over {} sources ({} batches per epoch)",
            self.n_epochs,
            sources.len(),
            total_batches
        );

        let mut meter = LossMeter::new();
        let mut summary = LearnSummary::default();
        let mut batch_counter = match self.counter_unit {
            CounterUnit::Batch => self.start_iteration,
            CounterUnit::Epoch => 0,
        };
        let first_epoch = match self.counter_unit {
            CounterUnit::Epoch => self.start_iteration + 1,
            CounterUnit::Batch => 1,
        };

        for epoch in first_epoch..first_epoch + self.n_epochs as u64 {
            for batch in self.scheduler.get_batches(sources) {
                let batch = batch?;
                let losses = model.train_step(&batch, optimizer)?;
                meter.record(&batch.data_name, &batch.split, &losses, batch.uids.len());
                if let Some(scheduler) = lr_scheduler.as_deref_mut() {
                    scheduler.step();
                }
                batch_counter += 1;
                summary.batches += 1;

                if self.counter_unit == CounterUnit::Batch {
                    self.evaluate_and_checkpoint(
                        batch_counter,
                        model,
                        optimizer,
                        lr_scheduler.as_deref(),
                        &mut meter,
                        &mut summary,
                    )?;
                }
            }
            summary.epochs += 1;

            if self.counter_unit == CounterUnit::Epoch {
                self.evaluate_and_checkpoint(
                    epoch,
                    model,
                    optimizer,
                    lr_scheduler.as_deref(),
                    &mut meter,
                    &mut summary,
                )?;
            }
        }

        self.start_iteration = match self.counter_unit {
            CounterUnit::Batch => batch_counter,
            CounterUnit::Epoch => first_epoch + self.n_epochs as u64 - 1,
        };

        if let Some(checkpointer) = &self.checkpointer {
            summary.restored_best = checkpointer.load_best_model(model)?;
            checkpointer.clear()?;
        }
        info!(
            "Finished learning: {} epochs, {} batches",
            summary.epochs, summary.batches
        );
        Ok(summary)
    }

    fn evaluate_and_checkpoint<M: TaskModel>(
        &mut self,
        iteration: u64,
        model: &mut M,
        optimizer: &M::Optimizer,
        lr_scheduler: Option<&dyn LrScheduler>,
        meter: &mut LossMeter,
        summary: &mut LearnSummary,
    ) -> Result<(), TrainingError> {
        if iteration % self.evaluation_freq != 0 {
            return Ok(());
        }
        let mut metric_dict = meter.metric_dict();
        metric_dict.extend(model.evaluate()?);
        meter.reset();
        info!(
            "{} {}: avg loss (last {} steps) {:.4}, metrics {:?}",
            self.counter_unit,
            iteration,
            meter.total_steps().min(100),
            meter.average_loss(100),
            metric_dict
        );

        if let Some(checkpointer) = self.checkpointer.as_mut() {
            if checkpointer.should_checkpoint(iteration) {
                checkpointer.checkpoint(
                    iteration,
                    &*model,
                    optimizer,
                    lr_scheduler.map(|s| s as &dyn StateDict),
                    &metric_dict,
                )?;
            }
        }
        summary.last_metrics = metric_dict;
        Ok(())
    }
}
