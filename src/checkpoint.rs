//! Timestamp-named checkpoints: a Burn binary record plus a JSON sidecar
//! carrying the model config, a training-args echo and final metrics.
//!
//! The stamp format (`%Y-%m-%d_%H-%M-%S`) sorts chronologically, so picking
//! the most recent checkpoint is a lexicographic sort over sidecar stems.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cnn::{CnnBackboneConfig, VariableCnnBackbone};
use crate::dataset::PolyKind;
use crate::model::{BackboneConfig, ConfigError, VariableBackbone};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("recorder error: {0}")]
    Recorder(#[from] RecorderError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no checkpoints found under {dir}")]
    Empty { dir: PathBuf },
    #[error("checkpoint at {path} holds a {found} model, expected {expected}")]
    WrongModel {
        path: PathBuf,
        found: &'static str,
        expected: &'static str,
    },
}

/// Which architecture the record holds, with enough config to rebuild it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ModelSpec {
    Mlp(BackboneConfig),
    Cnn(CnnBackboneConfig),
}

impl ModelSpec {
    fn name(&self) -> &'static str {
        match self {
            ModelSpec::Mlp(_) => "mlp",
            ModelSpec::Cnn(_) => "cnn",
        }
    }
}

/// Echo of the arguments the checkpoint was trained with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainEcho {
    pub poly: Option<PolyKind>,
    pub train_size: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub lr: f64,
    pub seed: u64,
    pub scramble_batches: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// RFC 3339 save time.
    pub saved_at: String,
    pub spec: ModelSpec,
    pub train: TrainEcho,
    pub metrics: BTreeMap<String, f64>,
}

fn recorder() -> BinFileRecorder<FullPrecisionSettings> {
    BinFileRecorder::<FullPrecisionSettings>::new()
}

/// Next free stamp-derived base path under `dir`.
fn unique_base(dir: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let base = dir.join(&stamp);
    if !base.with_extension("json").exists() {
        return base;
    }
    // Zero-padded so ten-plus collisions in one second still sort in save
    // order.
    let mut n = 1usize;
    loop {
        let candidate = dir.join(format!("{stamp}-{n:03}"));
        if !candidate.with_extension("json").exists() {
            return candidate;
        }
        n += 1;
    }
}

fn write_sidecar(base: &Path, meta: &CheckpointMeta) -> Result<(), CheckpointError> {
    let path = base.with_extension("json");
    let json = serde_json::to_string_pretty(meta).map_err(|source| CheckpointError::Json {
        path: path.clone(),
        source,
    })?;
    fs::write(&path, json).map_err(|source| CheckpointError::Io { path, source })
}

fn read_sidecar(base: &Path) -> Result<CheckpointMeta, CheckpointError> {
    let path = base.with_extension("json");
    let raw = fs::read_to_string(&path).map_err(|source| CheckpointError::Io {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| CheckpointError::Json { path, source })
}

/// Save the model record and its sidecar; returns the extension-free base path.
pub fn save_backbone<B: Backend>(
    dir: &Path,
    model: &VariableBackbone<B>,
    train: TrainEcho,
    metrics: BTreeMap<String, f64>,
) -> Result<PathBuf, CheckpointError> {
    fs::create_dir_all(dir).map_err(|source| CheckpointError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let base = unique_base(dir);
    let meta = CheckpointMeta {
        saved_at: chrono::Local::now().to_rfc3339(),
        spec: ModelSpec::Mlp(model.config.0.clone()),
        train,
        metrics,
    };
    write_sidecar(&base, &meta)?;
    model.clone().save_file(&base, &recorder())?;
    Ok(base)
}

pub fn save_cnn<B: Backend>(
    dir: &Path,
    model: &VariableCnnBackbone<B>,
    train: TrainEcho,
    metrics: BTreeMap<String, f64>,
) -> Result<PathBuf, CheckpointError> {
    fs::create_dir_all(dir).map_err(|source| CheckpointError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let base = unique_base(dir);
    let meta = CheckpointMeta {
        saved_at: chrono::Local::now().to_rfc3339(),
        spec: ModelSpec::Cnn(model.config.0.clone()),
        train,
        metrics,
    };
    write_sidecar(&base, &meta)?;
    model.clone().save_file(&base, &recorder())?;
    Ok(base)
}

pub fn read_meta(base: &Path) -> Result<CheckpointMeta, CheckpointError> {
    read_sidecar(base)
}

/// Rebuild the MLP ensemble from its sidecar config and load the record.
pub fn load_backbone<B: Backend>(
    base: &Path,
    device: &B::Device,
) -> Result<(VariableBackbone<B>, CheckpointMeta), CheckpointError> {
    let meta = read_sidecar(base)?;
    let config = match &meta.spec {
        ModelSpec::Mlp(config) => config.clone(),
        other => {
            return Err(CheckpointError::WrongModel {
                path: base.to_path_buf(),
                found: other.name(),
                expected: "mlp",
            })
        }
    };
    let model = VariableBackbone::<B>::new(config, device)?;
    let model = model.load_file(base, &recorder(), device)?;
    Ok((model, meta))
}

pub fn load_cnn<B: Backend>(
    base: &Path,
    device: &B::Device,
) -> Result<(VariableCnnBackbone<B>, CheckpointMeta), CheckpointError> {
    let meta = read_sidecar(base)?;
    let config = match &meta.spec {
        ModelSpec::Cnn(config) => config.clone(),
        other => {
            return Err(CheckpointError::WrongModel {
                path: base.to_path_buf(),
                found: other.name(),
                expected: "cnn",
            })
        }
    };
    let model = VariableCnnBackbone::<B>::new(config, device)?;
    let model = model.load_file(base, &recorder(), device)?;
    Ok((model, meta))
}

/// Base path of the most recently saved checkpoint in `dir`.
///
/// Lexicographically last sidecar stem wins; valid because the stamp format
/// sorts chronologically.
pub fn most_recent(dir: &Path) -> Result<PathBuf, CheckpointError> {
    let entries = fs::read_dir(dir).map_err(|source| CheckpointError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut stems: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("json"))
        .map(|p| p.with_extension(""))
        .collect();
    stems.sort();
    stems.pop().ok_or(CheckpointError::Empty {
        dir: dir.to_path_buf(),
    })
}
