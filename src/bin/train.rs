use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

use multitask_trainer::checkpoint::{CheckpointModel, MetricDict, StateBlob, StateDict};
use multitask_trainer::config::AppConfig;
use multitask_trainer::error::{CheckpointError, TrainingError};
use multitask_trainer::scheduler::{
    Feature, FeatureMap, InMemorySource, LabelMap, SchedulerKind, TaskBatch, TaskToLabel,
};
use multitask_trainer::training::{Learner, TaskLosses, TaskModel};

/// Train a toy two-task linear model to exercise checkpointing and scheduling.
#[derive(Parser)]
#[command(name = "train", about = "Train a toy multi-task model")]
struct Cli {
    /// Path to TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Override number of training epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Override the checkpoint directory
    #[arg(long)]
    checkpoint_path: Option<PathBuf>,

    /// Override the batch interleaving strategy
    #[arg(long, value_enum)]
    scheduler: Option<SchedulerArg>,

    /// Resume from a checkpoint file
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Examples per batch
    #[arg(long, default_value_t = 8)]
    batch_size: usize,

    /// Seed for the synthetic data
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum SchedulerArg {
    Sequential,
    RoundRobin,
    Shuffled,
}

impl From<SchedulerArg> for SchedulerKind {
    fn from(arg: SchedulerArg) -> Self {
        match arg {
            SchedulerArg::Sequential => SchedulerKind::Sequential,
            SchedulerArg::RoundRobin => SchedulerKind::RoundRobin,
            SchedulerArg::Shuffled => SchedulerKind::Shuffled,
        }
    }
}

/// One linear head `y = w * x + b` per task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Head {
    w: f64,
    b: f64,
}

struct LinearModel {
    name: String,
    heads: BTreeMap<String, Head>,
    probes: BTreeMap<String, (f64, f64)>,
}

impl CheckpointModel for LinearModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn collect_state_dict(&self) -> Result<StateBlob, CheckpointError> {
        StateBlob::encode(&self.heads)
    }

    fn load_state_dict(&mut self, state: &StateBlob) -> Result<(), CheckpointError> {
        self.heads = state.decode()?;
        Ok(())
    }
}

/// Plain SGD with a per-step learning-rate decay.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sgd {
    lr: f64,
    decay: f64,
    steps: u64,
}

impl Sgd {
    fn current_lr(&self) -> f64 {
        self.lr / (1.0 + self.decay * self.steps as f64)
    }
}

impl StateDict for Sgd {
    fn state_dict(&self) -> Result<StateBlob, CheckpointError> {
        StateBlob::encode(self)
    }

    fn load_state_dict(&mut self, state: &StateBlob) -> Result<(), CheckpointError> {
        *self = state.decode()?;
        Ok(())
    }
}

fn column<'a>(map: &'a FeatureMap, field: &str) -> Result<&'a [f64], TrainingError> {
    match map.get(field) {
        Some(Feature::Values(values)) => Ok(values),
        _ => Err(TrainingError::Model(format!("missing numeric field '{field}'"))),
    }
}

impl TaskModel for LinearModel {
    type Inputs = FeatureMap;
    type Labels = LabelMap;
    type Optimizer = Sgd;

    fn train_step(
        &mut self,
        batch: &TaskBatch<FeatureMap, LabelMap>,
        optimizer: &mut Sgd,
    ) -> Result<TaskLosses, TrainingError> {
        let xs = column(&batch.inputs, "x")?;
        let lr = optimizer.current_lr();
        let mut losses = TaskLosses::new();
        for (task, label) in batch.task_to_label.iter() {
            let ys = batch
                .labels
                .get(label)
                .ok_or_else(|| TrainingError::Model(format!("missing label '{label}'")))?;
            let head = self.heads.entry(task.clone()).or_default();
            let n = xs.len().max(1) as f64;
            let (mut gw, mut gb, mut loss) = (0.0, 0.0, 0.0);
            for (&x, &y) in xs.iter().zip(ys) {
                let err = head.w * x + head.b - y;
                loss += err * err;
                gw += 2.0 * err * x;
                gb += 2.0 * err;
            }
            head.w -= lr * gw / n;
            head.b -= lr * gb / n;
            losses.insert(task.clone(), loss / n);
        }
        optimizer.steps += 1;
        Ok(losses)
    }

    fn evaluate(&mut self) -> Result<MetricDict, TrainingError> {
        let mut metrics = MetricDict::new();
        for (task, &(w, b)) in &self.probes {
            let head = self.heads.get(task).cloned().unwrap_or_default();
            let mse = (-2..=2)
                .map(|i| {
                    let x = i as f64;
                    let err = head.w * x + head.b - (w * x + b);
                    err * err
                })
                .sum::<f64>()
                / 5.0;
            metrics.insert(format!("{task}/synthetic/valid/mse"), mse);
        }
        Ok(metrics)
    }
}

/// Synthetic regression batches for `y = w * x + b` plus noise.
fn synthetic_source(
    task: &str,
    (w, b): (f64, f64),
    n_batches: usize,
    batch_size: usize,
    rng: &mut StdRng,
) -> InMemorySource<FeatureMap, LabelMap> {
    let batches = (0..n_batches)
        .map(|i| {
            let xs: Vec<f64> = (0..batch_size).map(|_| rng.random_range(-2.0..2.0)).collect();
            let ys: Vec<f64> = xs
                .iter()
                .map(|x| w * x + b + rng.random_range(-0.05..0.05))
                .collect();
            let uids = (0..batch_size).map(|j| format!("{task}-{i}-{j}")).collect();
            let inputs = FeatureMap::from([
                ("uid".to_string(), Feature::Ids(uids)),
                ("x".to_string(), Feature::Values(xs)),
            ]);
            (inputs, LabelMap::from([("y".to_string(), ys)]))
        })
        .collect();
    InMemorySource::new(
        task,
        "train",
        "uid",
        TaskToLabel::from([(task.to_string(), "y".to_string())]),
        batches,
    )
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .with_context(|| format!("invalid log level '{}'", cli.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = AppConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    // Apply CLI overrides
    if let Some(epochs) = cli.epochs {
        config.learner.n_epochs = epochs;
    }
    if let Some(path) = cli.checkpoint_path {
        config.logging.checkpointer.checkpoint_path = Some(path);
    }
    if let Some(scheduler) = cli.scheduler {
        config.scheduler.strategy = scheduler.into();
    }

    let tasks = [("double", (2.0, 1.0)), ("negate", (-1.0, 0.5))];
    let mut rng = StdRng::seed_from_u64(cli.seed);
    let mut sources: Vec<_> = tasks
        .iter()
        .zip([6, 4])
        .map(|(&(task, coef), n)| synthetic_source(task, coef, n, cli.batch_size, &mut rng))
        .collect();

    let mut model = LinearModel {
        name: "linear_mtl".into(),
        heads: BTreeMap::new(),
        probes: tasks.iter().map(|&(t, c)| (t.to_string(), c)).collect(),
    };
    let mut optimizer = Sgd {
        lr: 0.05,
        decay: 1e-3,
        steps: 0,
    };

    let mut learner = Learner::new(&config).context("building learner")?;
    if let Some(path) = &cli.resume {
        let snapshot = learner
            .resume(path, &mut model, &mut optimizer, None)
            .with_context(|| format!("resuming from {}", path.display()))?;
        info!("Resumed at iteration {}", snapshot.iteration);
    }

    let summary = learner
        .learn(&mut model, &mut optimizer, None, &mut sources)
        .context("training")?;

    info!(
        "Trained {} epochs / {} batches, restored best model: {}",
        summary.epochs, summary.batches, summary.restored_best
    );
    for (metric, value) in &summary.last_metrics {
        info!("  {metric}: {value:.5}");
    }
    for (task, head) in &model.heads {
        info!("  {task}: w = {:.3}, b = {:.3}", head.w, head.b);
    }
    Ok(())
}
