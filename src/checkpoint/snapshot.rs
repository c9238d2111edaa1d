use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::checkpoint::ledger::MetricDict;
use crate::error::CheckpointError;

/// Conversion to and from opaque bytes.
///
/// Every serde type gets this through JSON, so collaborators only need to derive
/// `Serialize`/`Deserialize` on their state to be checkpointable.
pub trait Serializable: Sized {
    fn serialize_bytes(&self) -> Result<Vec<u8>, CheckpointError>;
    fn deserialize_bytes(bytes: &[u8]) -> Result<Self, CheckpointError>;
}

impl<T: Serialize + DeserializeOwned> Serializable for T {
    fn serialize_bytes(&self) -> Result<Vec<u8>, CheckpointError> {
        serde_json::to_vec(self).map_err(|e| CheckpointError::StateDecode(e.to_string()))
    }

    fn deserialize_bytes(bytes: &[u8]) -> Result<Self, CheckpointError> {
        serde_json::from_slice(bytes).map_err(|e| CheckpointError::StateDecode(e.to_string()))
    }
}

/// Opaque collaborator state. Stored base64-encoded inside snapshot files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateBlob(pub Vec<u8>);

impl StateBlob {
    pub fn encode<T: Serializable>(value: &T) -> Result<Self, CheckpointError> {
        value.serialize_bytes().map(StateBlob)
    }

    pub fn decode<T: Serializable>(&self) -> Result<T, CheckpointError> {
        T::deserialize_bytes(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for StateBlob {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for StateBlob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(StateBlob)
            .map_err(serde::de::Error::custom)
    }
}

/// Something whose state can be captured and restored as an opaque blob
/// (optimizers, learning-rate schedulers).
pub trait StateDict {
    fn state_dict(&self) -> Result<StateBlob, CheckpointError>;
    fn load_state_dict(&mut self, state: &StateBlob) -> Result<(), CheckpointError>;
}

/// The model side of checkpointing. Its parameter layout stays opaque here.
pub trait CheckpointModel {
    fn name(&self) -> &str;
    fn set_name(&mut self, name: String);
    fn collect_state_dict(&self) -> Result<StateBlob, CheckpointError>;
    fn load_state_dict(&mut self, state: &StateBlob) -> Result<(), CheckpointError>;

    /// Called after a restore so the model can move parameters where it needs them.
    fn move_to_device(&mut self) {}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub name: String,
    pub module_pool: StateBlob,
}

/// Everything persisted for one checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSnapshot {
    pub iteration: u64,
    pub model: ModelSnapshot,
    pub optimizer: StateBlob,
    pub lr_scheduler: Option<StateBlob>,
    #[serde(with = "metric_values")]
    pub metric_dict: MetricDict,
}

impl TrainingSnapshot {
    pub fn collect(
        iteration: u64,
        model: &dyn CheckpointModel,
        optimizer: &dyn StateDict,
        lr_scheduler: Option<&dyn StateDict>,
        metric_dict: &MetricDict,
    ) -> Result<Self, CheckpointError> {
        Ok(TrainingSnapshot {
            iteration,
            model: ModelSnapshot {
                name: model.name().to_string(),
                module_pool: model.collect_state_dict()?,
            },
            optimizer: optimizer.state_dict()?,
            lr_scheduler: lr_scheduler.map(|s| s.state_dict()).transpose()?,
            metric_dict: metric_dict.clone(),
        })
    }

    /// Write to `path` through a temporary sibling and an atomic rename.
    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        let bytes = serde_json::to_vec(self).map_err(|e| CheckpointError::Snapshot {
            path: path.to_path_buf(),
            source: e,
        })?;
        let tmp = tmp_path(path);
        let result = fs::write(&tmp, bytes)
            .map_err(|e| CheckpointError::io(&tmp, e))
            .and_then(|()| fs::rename(&tmp, path).map_err(|e| CheckpointError::io(path, e)));
        discard_on_error(&tmp, result)
    }

    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        let bytes = fs::read(path).map_err(|e| CheckpointError::io(path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| CheckpointError::Snapshot {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Restore the model's name and parameters from this snapshot.
    pub fn restore_model(&self, model: &mut dyn CheckpointModel) -> Result<(), CheckpointError> {
        model.set_name(self.model.name.clone());
        model.load_state_dict(&self.model.module_pool)?;
        model.move_to_device();
        Ok(())
    }

    /// Restore model, optimizer and (when both sides have one) scheduler state.
    pub fn restore_all(
        &self,
        model: &mut dyn CheckpointModel,
        optimizer: &mut dyn StateDict,
        lr_scheduler: Option<&mut dyn StateDict>,
    ) -> Result<(), CheckpointError> {
        self.restore_model(model)?;
        optimizer.load_state_dict(&self.optimizer)?;
        if let (Some(scheduler), Some(state)) = (lr_scheduler, self.lr_scheduler.as_ref()) {
            scheduler.load_state_dict(state)?;
        }
        Ok(())
    }
}

/// Metric values as JSON. Non-finite values have no JSON number form, so they
/// are written as the strings `"inf"`, `"-inf"` and `"NaN"`.
mod metric_values {
    use std::collections::BTreeMap;

    use serde::de::Error;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::checkpoint::ledger::MetricDict;

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Value {
        Number(f64),
        Special(String),
    }

    impl From<f64> for Value {
        fn from(value: f64) -> Self {
            if value.is_finite() {
                Value::Number(value)
            } else if value.is_nan() {
                Value::Special("NaN".into())
            } else if value > 0.0 {
                Value::Special("inf".into())
            } else {
                Value::Special("-inf".into())
            }
        }
    }

    pub fn serialize<S: Serializer>(dict: &MetricDict, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(dict.len()))?;
        for (metric, &value) in dict {
            map.serialize_entry(metric, &Value::from(value))?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<MetricDict, D::Error> {
        BTreeMap::<String, Value>::deserialize(deserializer)?
            .into_iter()
            .map(|(metric, value)| {
                let value = match value {
                    Value::Number(n) => n,
                    Value::Special(s) => match s.as_str() {
                        "inf" => f64::INFINITY,
                        "-inf" => f64::NEG_INFINITY,
                        "NaN" => f64::NAN,
                        other => {
                            return Err(D::Error::custom(format!(
                                "invalid value '{other}' for metric '{metric}'"
                            )))
                        }
                    },
                };
                Ok((metric, value))
            })
            .collect()
    }
}

/// Copy `from` to `to` so that `to` only ever appears complete.
pub(crate) fn copy_atomic(from: &Path, to: &Path) -> Result<(), CheckpointError> {
    let mut src = File::open(from).map_err(|e| CheckpointError::io(from, e))?;
    let tmp = tmp_path(to);
    let result = File::create(&tmp)
        .and_then(|mut dst| io::copy(&mut src, &mut dst))
        .map_err(|e| CheckpointError::io(&tmp, e))
        .and_then(|_| fs::rename(&tmp, to).map_err(|e| CheckpointError::io(to, e)));
    discard_on_error(&tmp, result)
}

/// Remove a leftover temporary file when the write it belonged to failed.
fn discard_on_error(tmp: &Path, result: Result<(), CheckpointError>) -> Result<(), CheckpointError> {
    if result.is_err() && tmp.exists() {
        let _ = fs::remove_file(tmp);
    }
    result
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
