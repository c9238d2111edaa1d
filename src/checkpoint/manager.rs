use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::checkpoint::ledger::{MetricDict, MetricLedger, MetricMode};
use crate::checkpoint::snapshot::{copy_atomic, CheckpointModel, StateDict, TrainingSnapshot};
use crate::config::{CounterUnit, LoggingConfig};
use crate::error::CheckpointError;

/// Extension of every snapshot file written by the checkpointer.
pub const CHECKPOINT_EXT: &str = "ckpt";

const CHECKPOINT_PREFIX: &str = "checkpoint_";
const BEST_MODEL_PREFIX: &str = "best_model_";

/// File stem used for a metric's best-model copy.
pub fn metric_file_stem(metric: &str) -> String {
    metric.replace('/', "_")
}

/// Result of a checkpoint call that actually wrote a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedCheckpoint {
    pub iteration: u64,
    pub path: PathBuf,
    /// Tracked metrics whose best-model copy now points at this snapshot.
    pub new_bests: BTreeSet<String>,
}

/// Owns the checkpoint directory for one training run: writes per-iteration
/// snapshots, keeps one best-model copy per tracked metric, and restores.
#[derive(Debug)]
pub struct Checkpointer {
    checkpoint_path: PathBuf,
    checkpoint_freq: u64,
    counter_unit: CounterUnit,
    checkpoint_runway: u64,
    clear_intermediate_checkpoints: bool,
    clear_all_checkpoints: bool,
    restore_metric: Option<String>,
    ledger: MetricLedger,
    runway_met: bool,
}

impl Checkpointer {
    /// Validate the configuration, then create the checkpoint directory.
    ///
    /// Nothing touches the filesystem until every setting has been validated.
    pub fn new(config: &LoggingConfig) -> Result<Self, CheckpointError> {
        let checkpoint_freq = config.checkpoint_freq()?;
        let ckpt = &config.checkpointer;

        // checkpoint_metric wins over checkpoint_task_metrics on conflict.
        let mut modes = BTreeMap::new();
        for (metric, mode) in ckpt
            .checkpoint_task_metrics
            .iter()
            .chain(ckpt.checkpoint_metric.iter())
        {
            modes.insert(metric.to_string(), MetricMode::parse_for(metric, mode)?);
        }

        let checkpoint_path = config.checkpoint_path();
        fs::create_dir_all(&checkpoint_path)
            .map_err(|e| CheckpointError::io(&checkpoint_path, e))?;

        info!(
            "Save checkpoints at {} every {} {}",
            checkpoint_path.display(),
            checkpoint_freq,
            config.counter_unit
        );
        info!(
            "No checkpoints saved before {} {}",
            ckpt.checkpoint_runway, config.counter_unit
        );

        Ok(Checkpointer {
            checkpoint_path,
            checkpoint_freq,
            counter_unit: config.counter_unit,
            checkpoint_runway: ckpt.checkpoint_runway,
            clear_intermediate_checkpoints: ckpt.clear_intermediate_checkpoints,
            clear_all_checkpoints: ckpt.clear_all_checkpoints,
            restore_metric: ckpt.checkpoint_metric.first().map(str::to_string),
            ledger: MetricLedger::new(modes),
            runway_met: false,
        })
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    pub fn checkpoint_freq(&self) -> u64 {
        self.checkpoint_freq
    }

    /// Whether `iteration` falls on the checkpoint cadence.
    pub fn should_checkpoint(&self, iteration: u64) -> bool {
        iteration % self.checkpoint_freq == 0
    }

    /// Whether the runway has been passed by some earlier checkpoint call.
    pub fn runway_met(&self) -> bool {
        self.runway_met
    }

    /// Metric that `load_best_model` restores from.
    pub fn restore_metric(&self) -> Option<&str> {
        self.restore_metric.as_deref()
    }

    pub fn best_metrics(&self) -> &MetricDict {
        self.ledger.best_values()
    }

    pub fn ledger(&self) -> &MetricLedger {
        &self.ledger
    }

    pub fn checkpoint_file(&self, iteration: u64) -> PathBuf {
        self.checkpoint_path
            .join(format!("{CHECKPOINT_PREFIX}{iteration}.{CHECKPOINT_EXT}"))
    }

    pub fn best_model_path(&self, metric: &str) -> PathBuf {
        self.checkpoint_path.join(format!(
            "{BEST_MODEL_PREFIX}{}.{CHECKPOINT_EXT}",
            metric_file_stem(metric)
        ))
    }

    /// Snapshot the training state at `iteration` and refresh best-model copies.
    ///
    /// Returns `None` without touching disk or the ledger while `iteration` is
    /// below the runway.
    pub fn checkpoint(
        &mut self,
        iteration: u64,
        model: &dyn CheckpointModel,
        optimizer: &dyn StateDict,
        lr_scheduler: Option<&dyn StateDict>,
        metric_dict: &MetricDict,
    ) -> Result<Option<SavedCheckpoint>, CheckpointError> {
        if iteration < self.checkpoint_runway {
            return Ok(None);
        }
        if !self.runway_met {
            self.runway_met = true;
            info!("checkpoint_runway condition has been met. Start checkpointing.");
        }

        let snapshot =
            TrainingSnapshot::collect(iteration, model, optimizer, lr_scheduler, metric_dict)?;
        let path = self.checkpoint_file(iteration);
        snapshot.save(&path)?;
        info!(
            "Save checkpoint of {} {} at {}",
            iteration,
            self.counter_unit,
            path.display()
        );

        // A best value enters the ledger only once its copy is on disk.
        let candidates = if self.ledger.tracks_any(metric_dict) {
            self.ledger.candidates(metric_dict)
        } else {
            MetricDict::new()
        };
        let mut new_bests = BTreeSet::new();
        for (metric, value) in candidates {
            let best_path = self.best_model_path(&metric);
            copy_atomic(&path, &best_path)?;
            self.ledger.record(&metric, value);
            info!("Save best model of metric {} at {}", metric, best_path.display());
            new_bests.insert(metric);
        }

        Ok(Some(SavedCheckpoint {
            iteration,
            path,
            new_bests,
        }))
    }

    /// Fold `metric_dict` into the ledger, returning the tracked metrics that
    /// reached a new best. Only metrics present in `metric_dict` are considered.
    pub fn is_new_best(&mut self, metric_dict: &MetricDict) -> BTreeSet<String> {
        self.ledger.update(metric_dict)
    }

    /// Delete snapshot files according to the cleanup flags.
    ///
    /// `clear_all_checkpoints` removes every snapshot including best-model
    /// copies and takes precedence over `clear_intermediate_checkpoints`, which
    /// removes only per-iteration snapshots. The ledger is left untouched.
    pub fn clear(&self) -> Result<usize, CheckpointError> {
        let prefix = if self.clear_all_checkpoints {
            info!("Clear all checkpoints.");
            ""
        } else if self.clear_intermediate_checkpoints {
            info!("Clear all intermediate checkpoints.");
            CHECKPOINT_PREFIX
        } else {
            return Ok(0);
        };

        let mut removed = 0;
        for path in self.snapshot_files(prefix)? {
            fs::remove_file(&path).map_err(|e| CheckpointError::io(&path, e))?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Restore `model` from the best-model copy of the restore metric.
    ///
    /// Returns `Ok(false)` and leaves the model untouched when no best value was
    /// ever recorded for that metric.
    pub fn load_best_model(&self, model: &mut dyn CheckpointModel) -> Result<bool, CheckpointError> {
        let metric = self
            .restore_metric
            .as_deref()
            .ok_or(CheckpointError::NoRestoreMetric)?;

        if self.ledger.best(metric).is_none() {
            warn!("No best model found for {metric}, use the original model.");
            return Ok(false);
        }

        let path = self.best_model_path(metric);
        if !path.is_file() {
            return Err(CheckpointError::InconsistentState {
                metric: metric.to_string(),
                path,
            });
        }
        info!("Loading the best model from {}.", path.display());
        let snapshot = TrainingSnapshot::load(&path)?;
        snapshot.restore_model(model)?;
        Ok(true)
    }

    /// List per-iteration snapshots sorted by iteration (ascending).
    pub fn list_checkpoints(&self) -> Result<Vec<(u64, PathBuf)>, CheckpointError> {
        let mut results: Vec<(u64, PathBuf)> = self
            .snapshot_files(CHECKPOINT_PREFIX)?
            .into_iter()
            .filter_map(|path| {
                let stem = path.file_stem()?.to_str()?;
                let iteration = stem.strip_prefix(CHECKPOINT_PREFIX)?.parse().ok()?;
                Some((iteration, path))
            })
            .collect();
        results.sort_by_key(|(iteration, _)| *iteration);
        Ok(results)
    }

    /// Read a snapshot file written by any checkpointer.
    pub fn load_snapshot(&self, path: &Path) -> Result<TrainingSnapshot, CheckpointError> {
        TrainingSnapshot::load(path)
    }

    /// Restore model, optimizer and scheduler state from `path` to continue a
    /// run. The returned snapshot carries the iteration to resume after.
    pub fn resume(
        &self,
        path: &Path,
        model: &mut dyn CheckpointModel,
        optimizer: &mut dyn StateDict,
        lr_scheduler: Option<&mut dyn StateDict>,
    ) -> Result<TrainingSnapshot, CheckpointError> {
        info!("Resuming from {}.", path.display());
        let snapshot = self.load_snapshot(path)?;
        snapshot.restore_all(model, optimizer, lr_scheduler)?;
        Ok(snapshot)
    }

    /// Snapshot files in the checkpoint directory whose name starts with `prefix`.
    fn snapshot_files(&self, prefix: &str) -> Result<Vec<PathBuf>, CheckpointError> {
        let entries = fs::read_dir(&self.checkpoint_path)
            .map_err(|e| CheckpointError::io(&self.checkpoint_path, e))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CheckpointError::io(&self.checkpoint_path, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(prefix) && path.extension().is_some_and(|ext| ext == CHECKPOINT_EXT) {
                files.push(path);
            }
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::snapshot::StateBlob;
    use crate::config::MetricModes;
    use crate::error::ConfigError;

    struct ToyModel {
        name: String,
        weights: Vec<f64>,
        moved: bool,
    }

    impl ToyModel {
        fn new(weights: Vec<f64>) -> Self {
            ToyModel {
                name: "toy".into(),
                weights,
                moved: false,
            }
        }
    }

    impl CheckpointModel for ToyModel {
        fn name(&self) -> &str {
            &self.name
        }

        fn set_name(&mut self, name: String) {
            self.name = name;
        }

        fn collect_state_dict(&self) -> Result<StateBlob, CheckpointError> {
            StateBlob::encode(&self.weights)
        }

        fn load_state_dict(&mut self, state: &StateBlob) -> Result<(), CheckpointError> {
            self.weights = state.decode()?;
            Ok(())
        }

        fn move_to_device(&mut self) {
            self.moved = true;
        }
    }

    #[derive(Default)]
    struct ToyOptimizer {
        steps: u64,
    }

    impl StateDict for ToyOptimizer {
        fn state_dict(&self) -> Result<StateBlob, CheckpointError> {
            StateBlob::encode(&self.steps)
        }

        fn load_state_dict(&mut self, state: &StateBlob) -> Result<(), CheckpointError> {
            self.steps = state.decode()?;
            Ok(())
        }
    }

    fn logging(dir: &Path, metrics: &[(&str, &str)]) -> LoggingConfig {
        let mut config = LoggingConfig::default();
        config.checkpointer.checkpoint_path = Some(dir.to_path_buf());
        config.checkpointer.checkpoint_metric = metrics.iter().copied().collect();
        config
    }

    fn metrics(entries: &[(&str, f64)]) -> MetricDict {
        entries.iter().map(|(m, v)| (m.to_string(), *v)).collect()
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_new_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ckpts");
        let ckpt = Checkpointer::new(&logging(&path, &[("acc", "max")])).unwrap();
        assert!(path.is_dir());
        assert_eq!(ckpt.checkpoint_freq(), 1);
        assert_eq!(ckpt.restore_metric(), Some("acc"));
    }

    #[test]
    fn test_zero_freq_fails_before_creating_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpts");
        let mut config = logging(&path, &[("acc", "max")]);
        config.checkpointer.checkpoint_freq = 0;
        let err = Checkpointer::new(&config).unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::Config(ConfigError::InvalidCheckpointFreq { .. })
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_bad_mode_fails_before_creating_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpts");
        let config = logging(&path, &[("acc", "avg")]);
        let err = Checkpointer::new(&config).unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::Config(ConfigError::InvalidMetricMode { .. })
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_checkpoint_metric_overrides_task_metric_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = logging(dir.path(), &[("acc", "max")]);
        config.checkpointer.checkpoint_task_metrics =
            [("acc", "min"), ("f1", "max")].into_iter().collect::<MetricModes>();
        let ckpt = Checkpointer::new(&config).unwrap();
        assert_eq!(ckpt.ledger().mode("acc"), Some(MetricMode::Max));
        assert_eq!(ckpt.ledger().mode("f1"), Some(MetricMode::Max));
    }

    #[test]
    fn test_runway_blocks_writes_and_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = logging(dir.path(), &[("acc", "max")]);
        config.checkpointer.checkpoint_runway = 3;
        let mut ckpt = Checkpointer::new(&config).unwrap();
        let model = ToyModel::new(vec![1.0]);
        let opt = ToyOptimizer::default();

        for it in 0..3 {
            let saved = ckpt
                .checkpoint(it, &model, &opt, None, &metrics(&[("acc", 0.9)]))
                .unwrap();
            assert!(saved.is_none());
        }
        assert!(!ckpt.runway_met());
        assert!(ckpt.best_metrics().is_empty());
        assert!(file_names(dir.path()).is_empty());

        ckpt.checkpoint(3, &model, &opt, None, &metrics(&[("acc", 0.9)]))
            .unwrap()
            .expect("iteration at runway should checkpoint");
        assert!(ckpt.runway_met());
        ckpt.checkpoint(4, &model, &opt, None, &metrics(&[("acc", 0.1)]))
            .unwrap();
        assert!(ckpt.runway_met());
    }

    #[test]
    fn test_best_copy_matches_checkpoint_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt = Checkpointer::new(&logging(dir.path(), &[("acc", "max")])).unwrap();
        let model = ToyModel::new(vec![0.1, 0.2]);
        let opt = ToyOptimizer { steps: 5 };

        let saved = ckpt
            .checkpoint(5, &model, &opt, None, &metrics(&[("acc", 0.9)]))
            .unwrap()
            .unwrap();
        assert!(saved.new_bests.contains("acc"));

        let best = fs::read(dir.path().join("best_model_acc.ckpt")).unwrap();
        let main = fs::read(dir.path().join("checkpoint_5.ckpt")).unwrap();
        assert_eq!(best, main);
        assert_eq!(
            file_names(dir.path()),
            vec!["best_model_acc.ckpt".to_string(), "checkpoint_5.ckpt".to_string()]
        );
    }

    #[test]
    fn test_best_copy_follows_improvements_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt = Checkpointer::new(&logging(dir.path(), &[("acc", "max")])).unwrap();
        let opt = ToyOptimizer::default();

        for (it, acc) in [(1, 0.5), (2, 0.3), (3, 0.9), (4, 0.9), (5, 0.7)] {
            let model = ToyModel::new(vec![it as f64]);
            ckpt.checkpoint(it, &model, &opt, None, &metrics(&[("acc", acc)]))
                .unwrap();
        }

        assert_eq!(ckpt.best_metrics().get("acc"), Some(&0.9));
        let best = TrainingSnapshot::load(&ckpt.best_model_path("acc")).unwrap();
        assert_eq!(best.iteration, 3);
    }

    #[test]
    fn test_slashes_in_metric_names_are_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt =
            Checkpointer::new(&logging(dir.path(), &[("sst2/dev/acc", "max")])).unwrap();
        let model = ToyModel::new(vec![0.0]);
        ckpt.checkpoint(
            1,
            &model,
            &ToyOptimizer::default(),
            None,
            &metrics(&[("sst2/dev/acc", 0.4)]),
        )
        .unwrap();
        assert!(dir.path().join("best_model_sst2_dev_acc.ckpt").is_file());
    }

    #[test]
    fn test_untracked_metrics_produce_no_best_copy() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt = Checkpointer::new(&logging(dir.path(), &[("acc", "max")])).unwrap();
        let saved = ckpt
            .checkpoint(
                1,
                &ToyModel::new(vec![0.0]),
                &ToyOptimizer::default(),
                None,
                &metrics(&[("f1", 1.0)]),
            )
            .unwrap()
            .unwrap();
        assert!(saved.new_bests.is_empty());
        assert_eq!(file_names(dir.path()), vec!["checkpoint_1.ckpt".to_string()]);
    }

    #[test]
    fn test_clear_all_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = logging(dir.path(), &[("acc", "max")]);
        config.checkpointer.clear_all_checkpoints = true;
        let mut ckpt = Checkpointer::new(&config).unwrap();
        for it in 1..=3 {
            ckpt.checkpoint(
                it,
                &ToyModel::new(vec![0.0]),
                &ToyOptimizer::default(),
                None,
                &metrics(&[("acc", it as f64)]),
            )
            .unwrap();
        }
        assert_eq!(ckpt.clear().unwrap(), 4);
        assert!(file_names(dir.path()).is_empty());
    }

    #[test]
    fn test_clear_intermediate_keeps_best_models() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = logging(dir.path(), &[("acc", "max")]);
        config.checkpointer.clear_intermediate_checkpoints = true;
        config.checkpointer.clear_all_checkpoints = false;
        let mut ckpt = Checkpointer::new(&config).unwrap();
        for it in 1..=3 {
            ckpt.checkpoint(
                it,
                &ToyModel::new(vec![0.0]),
                &ToyOptimizer::default(),
                None,
                &metrics(&[("acc", it as f64)]),
            )
            .unwrap();
        }
        ckpt.clear().unwrap();
        assert_eq!(file_names(dir.path()), vec!["best_model_acc.ckpt".to_string()]);
    }

    #[test]
    fn test_clear_without_flags_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = logging(dir.path(), &[("acc", "max")]);
        config.checkpointer.clear_intermediate_checkpoints = false;
        config.checkpointer.clear_all_checkpoints = false;
        let mut ckpt = Checkpointer::new(&config).unwrap();
        ckpt.checkpoint(
            1,
            &ToyModel::new(vec![0.0]),
            &ToyOptimizer::default(),
            None,
            &metrics(&[("acc", 0.5)]),
        )
        .unwrap();
        assert_eq!(ckpt.clear().unwrap(), 0);
        assert_eq!(file_names(dir.path()).len(), 2);
    }

    #[test]
    fn test_clear_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = logging(dir.path(), &[("acc", "max")]);
        config.checkpointer.clear_all_checkpoints = true;
        let ckpt = Checkpointer::new(&config).unwrap();
        fs::write(dir.path().join("train.log"), "hello").unwrap();
        ckpt.clear().unwrap();
        assert_eq!(file_names(dir.path()), vec!["train.log".to_string()]);
    }

    #[test]
    fn test_load_best_model_without_entry_leaves_model_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = Checkpointer::new(&logging(dir.path(), &[("acc", "max")])).unwrap();
        let mut model = ToyModel::new(vec![0.25, 0.5]);
        let before = model.collect_state_dict().unwrap();

        assert!(!ckpt.load_best_model(&mut model).unwrap());
        assert_eq!(model.collect_state_dict().unwrap(), before);
        assert!(!model.moved);
    }

    #[test]
    fn test_load_best_model_restores_best_weights() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt = Checkpointer::new(&logging(dir.path(), &[("loss", "min")])).unwrap();
        let opt = ToyOptimizer::default();
        ckpt.checkpoint(1, &ToyModel::new(vec![1.0]), &opt, None, &metrics(&[("loss", 0.2)]))
            .unwrap();
        ckpt.checkpoint(2, &ToyModel::new(vec![2.0]), &opt, None, &metrics(&[("loss", 0.8)]))
            .unwrap();

        let mut model = ToyModel::new(vec![9.0]);
        model.name = "fresh".into();
        assert!(ckpt.load_best_model(&mut model).unwrap());
        assert_eq!(model.weights, vec![1.0]);
        assert_eq!(model.name, "toy");
        assert!(model.moved);
    }

    #[test]
    fn test_load_best_model_missing_file_is_inconsistent_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = logging(dir.path(), &[("acc", "max")]);
        config.checkpointer.clear_all_checkpoints = true;
        let mut ckpt = Checkpointer::new(&config).unwrap();
        ckpt.checkpoint(
            1,
            &ToyModel::new(vec![1.0]),
            &ToyOptimizer::default(),
            None,
            &metrics(&[("acc", 0.5)]),
        )
        .unwrap();
        ckpt.clear().unwrap();

        let err = ckpt.load_best_model(&mut ToyModel::new(vec![0.0])).unwrap_err();
        assert!(
            matches!(err, CheckpointError::InconsistentState { .. }),
            "expected InconsistentState, got: {err}"
        );
    }

    #[test]
    fn test_load_best_model_without_restore_metric_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = logging(dir.path(), &[]);
        config.checkpointer.checkpoint_task_metrics = [("acc", "max")].into_iter().collect();
        let mut ckpt = Checkpointer::new(&config).unwrap();
        ckpt.checkpoint(
            1,
            &ToyModel::new(vec![1.0]),
            &ToyOptimizer::default(),
            None,
            &metrics(&[("acc", 0.5)]),
        )
        .unwrap();
        assert!(dir.path().join("best_model_acc.ckpt").is_file());

        let err = ckpt.load_best_model(&mut ToyModel::new(vec![0.0])).unwrap_err();
        assert!(matches!(err, CheckpointError::NoRestoreMetric));
    }

    #[test]
    fn test_list_checkpoints_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt = Checkpointer::new(&logging(dir.path(), &[("acc", "max")])).unwrap();
        for it in [10, 2, 7] {
            ckpt.checkpoint(
                it,
                &ToyModel::new(vec![0.0]),
                &ToyOptimizer::default(),
                None,
                &metrics(&[("acc", 0.5)]),
            )
            .unwrap();
        }
        let iterations: Vec<u64> = ckpt
            .list_checkpoints()
            .unwrap()
            .into_iter()
            .map(|(it, _)| it)
            .collect();
        assert_eq!(iterations, vec![2, 7, 10]);
    }

    #[test]
    fn test_resume_restores_all_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt = Checkpointer::new(&logging(dir.path(), &[("acc", "max")])).unwrap();
        let sched = ToyOptimizer { steps: 42 };
        let saved = ckpt
            .checkpoint(
                8,
                &ToyModel::new(vec![3.0, 4.0]),
                &ToyOptimizer { steps: 8 },
                Some(&sched),
                &metrics(&[("acc", 0.5)]),
            )
            .unwrap()
            .unwrap();

        let mut model = ToyModel::new(vec![]);
        let mut opt = ToyOptimizer::default();
        let mut restored_sched = ToyOptimizer::default();
        let snapshot = ckpt
            .resume(&saved.path, &mut model, &mut opt, Some(&mut restored_sched))
            .unwrap();

        assert_eq!(snapshot.iteration, 8);
        assert_eq!(snapshot.metric_dict.get("acc"), Some(&0.5));
        assert_eq!(model.weights, vec![3.0, 4.0]);
        assert_eq!(opt.steps, 8);
        assert_eq!(restored_sched.steps, 42);
    }

    #[test]
    fn test_failed_best_copy_is_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt = Checkpointer::new(&logging(dir.path(), &[("acc", "max")])).unwrap();
        let model = ToyModel::new(vec![1.0]);
        let opt = ToyOptimizer::default();
        let blocked = ckpt.best_model_path("acc");
        fs::create_dir(&blocked).unwrap();

        let err = ckpt
            .checkpoint(1, &model, &opt, None, &metrics(&[("acc", 0.9)]))
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Io { .. }), "got: {err}");
        assert!(ckpt.best_metrics().is_empty());
        assert!(!dir.path().join("best_model_acc.ckpt.tmp").exists());

        fs::remove_dir(&blocked).unwrap();
        let saved = ckpt
            .checkpoint(2, &model, &opt, None, &metrics(&[("acc", 0.9)]))
            .unwrap()
            .unwrap();
        assert!(saved.new_bests.contains("acc"));
        assert_eq!(ckpt.best_metrics().get("acc"), Some(&0.9));
        assert!(ckpt.load_best_model(&mut ToyModel::new(vec![])).unwrap());
        assert_eq!(
            file_names(dir.path()),
            vec![
                "best_model_acc.ckpt".to_string(),
                "checkpoint_1.ckpt".to_string(),
                "checkpoint_2.ckpt".to_string()
            ]
        );
    }

    #[test]
    fn test_negative_infinity_first_best_can_be_restored() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt = Checkpointer::new(&logging(dir.path(), &[("acc", "max")])).unwrap();
        let saved = ckpt
            .checkpoint(
                1,
                &ToyModel::new(vec![5.0]),
                &ToyOptimizer { steps: 1 },
                None,
                &metrics(&[("acc", f64::NEG_INFINITY), ("loss", f64::NAN)]),
            )
            .unwrap()
            .unwrap();
        assert!(saved.new_bests.contains("acc"));

        let mut model = ToyModel::new(vec![]);
        assert!(ckpt.load_best_model(&mut model).unwrap());
        assert_eq!(model.weights, vec![5.0]);

        let mut opt = ToyOptimizer::default();
        let snapshot = ckpt
            .resume(&saved.path, &mut ToyModel::new(vec![]), &mut opt, None)
            .unwrap();
        assert_eq!(snapshot.metric_dict["acc"], f64::NEG_INFINITY);
        assert!(snapshot.metric_dict["loss"].is_nan());
        assert_eq!(opt.steps, 1);
    }

    #[test]
    fn test_load_snapshot_reads_any_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt = Checkpointer::new(&logging(dir.path(), &[("acc", "max")])).unwrap();
        let saved = ckpt
            .checkpoint(
                4,
                &ToyModel::new(vec![2.0]),
                &ToyOptimizer::default(),
                None,
                &metrics(&[("acc", 0.7)]),
            )
            .unwrap()
            .unwrap();
        let snapshot = ckpt.load_snapshot(&ckpt.best_model_path("acc")).unwrap();
        assert_eq!(snapshot.iteration, 4);
        assert_eq!(snapshot, ckpt.load_snapshot(&saved.path).unwrap());
    }

    #[test]
    fn test_is_new_best_updates_ledger_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt = Checkpointer::new(&logging(dir.path(), &[("loss", "min")])).unwrap();
        let fired: Vec<bool> = [0.8, 0.9, 0.3, 0.3]
            .into_iter()
            .map(|v| ckpt.is_new_best(&metrics(&[("loss", v)])).contains("loss"))
            .collect();
        assert_eq!(fired, vec![true, false, true, false]);
        assert_eq!(ckpt.best_metrics().get("loss"), Some(&0.3));
        assert!(file_names(dir.path()).is_empty());
    }

    #[test]
    fn test_should_checkpoint_on_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = logging(dir.path(), &[("acc", "max")]);
        config.evaluation_freq = 2;
        config.checkpointer.checkpoint_freq = 3;
        let ckpt = Checkpointer::new(&config).unwrap();
        assert!(ckpt.should_checkpoint(6));
        assert!(ckpt.should_checkpoint(12));
        assert!(!ckpt.should_checkpoint(4));
    }
}
