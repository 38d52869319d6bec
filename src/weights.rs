//! Parameter-map checkpoints and model export.

use crate::error::Result;
use crate::models::{ParamMap, Sequential};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Parameters plus the non-learnable buffers needed for exact restoration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub params: ParamMap,
    #[serde(default)]
    pub buffers: ParamMap,
}

impl Checkpoint {
    pub fn from_model(model: &Sequential) -> Self {
        Self {
            params: model.state_dict(),
            buffers: model.buffers(),
        }
    }

    /// Copy the stored values into `model` in place.
    pub fn apply(&self, model: &mut Sequential) -> Result<()> {
        model.load_state_dict(&self.params)?;
        model.load_buffers(&self.buffers)
    }
}

/// Architecture metadata written next to exported weights.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArchInfo {
    pub model: String,
    pub dataset: String,
    pub num_classes: usize,
    pub layers: Vec<String>,
    pub num_params: usize,
}

impl ArchInfo {
    pub fn new(model_name: &str, dataset: &str, num_classes: usize, model: &Sequential) -> Self {
        Self {
            model: model_name.to_string(),
            dataset: dataset.to_string(),
            num_classes,
            layers: model.layers().iter().map(|l| l.kind().to_string()).collect(),
            num_params: model.num_params(),
        }
    }
}

/// Serialize any state to JSON at `path`, creating parent directories.
pub fn save_checkpoint<T: Serialize>(path: impl AsRef<Path>, state: &T) -> Result<()> {
    let path = path.as_ref();
    let txt = serde_json::to_string(state)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, txt)?;
    log::info!("saved checkpoint to {}", path.display());
    Ok(())
}

/// Load a checkpoint from `path` that was saved with [`save_checkpoint`].
pub fn load_checkpoint<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let txt = fs::read_to_string(path)?;
    let state = serde_json::from_str(&txt)?;
    log::info!("loaded checkpoint from {}", path.display());
    Ok(state)
}

pub fn save_weights(path: impl AsRef<Path>, model: &Sequential) -> Result<()> {
    save_checkpoint(path, &Checkpoint::from_model(model))
}

/// Restore weights saved by [`save_weights`]. Every model parameter must be
/// present with the same shape.
pub fn load_weights(path: impl AsRef<Path>, model: &mut Sequential) -> Result<()> {
    let ckpt: Checkpoint = load_checkpoint(path)?;
    ckpt.apply(model)
}

/// Write `arch.json` and `weights.json` into `dir`.
pub fn export_model(dir: impl AsRef<Path>, model: &Sequential, arch: &ArchInfo) -> Result<()> {
    let dir = dir.as_ref();
    save_checkpoint(dir.join("arch.json"), arch)?;
    save_checkpoint(dir.join("weights.json"), &model.state_dict())?;
    Ok(())
}
