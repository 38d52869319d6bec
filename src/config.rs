use crate::error::{NnError, Result};
use crate::models::presets;
use crate::optim::SchedulerSpec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// The four per-epoch metrics a callback may monitor.
pub const METRIC_NAMES: &[&str] = &["train_loss", "train_acc", "val_loss", "val_acc"];

/// Training configuration loaded from a TOML or JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dataset: String,
    /// Preset name; defaults per dataset when omitted.
    pub model: Option<String>,
    pub seed: u64,
    pub num_classes: usize,
    pub train: TrainSection,
    pub data: DataSection,
    pub callbacks: Vec<CallbackSpec>,
    pub scheduler: Option<SchedulerSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dataset: "mnist".to_string(),
            model: None,
            seed: crate::rng::DEFAULT_SEED,
            num_classes: 10,
            train: TrainSection::default(),
            data: DataSection::default(),
            callbacks: Vec::new(),
            scheduler: None,
        }
    }
}

/// Optimizer and loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainSection {
    pub optimizer: String,
    pub lr: f64,
    pub momentum: f64,
    pub nesterov: bool,
    pub weight_decay: f64,
    pub clip_grad_norm: Option<f64>,
    pub betas: (f64, f64),
    pub eps: f64,
    pub epochs: usize,
    pub batch_size: usize,
}

impl Default for TrainSection {
    fn default() -> Self {
        Self {
            optimizer: "sgd".to_string(),
            lr: 1e-2,
            momentum: 0.0,
            nesterov: false,
            weight_decay: 0.0,
            clip_grad_norm: None,
            betas: (0.9, 0.999),
            eps: 1e-8,
            epochs: 10,
            batch_size: 128,
        }
    }
}

/// Dataset files in the JSON interchange format, and where the per-epoch
/// CSV log goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSection {
    pub train: Option<PathBuf>,
    pub val: Option<PathBuf>,
    pub test: Option<PathBuf>,
    pub log_csv: Option<PathBuf>,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            train: None,
            val: None,
            test: None,
            log_csv: Some(PathBuf::from("reports/results.csv")),
        }
    }
}

fn default_val_loss() -> String {
    "val_loss".to_string()
}

fn default_val_acc() -> String {
    "val_acc".to_string()
}

fn default_es_patience() -> usize {
    5
}

fn default_plateau_patience() -> usize {
    3
}

fn default_factor() -> f64 {
    0.5
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("checkpoints/best.json")
}

/// One entry of the `callbacks` list, e.g.
/// `early_stopping = { monitor = "val_loss", patience = 5 }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackSpec {
    EarlyStopping {
        #[serde(default = "default_val_loss")]
        monitor: String,
        #[serde(default = "default_es_patience")]
        patience: usize,
    },
    Checkpoint {
        #[serde(default = "default_checkpoint_path")]
        filepath: PathBuf,
        #[serde(default = "default_val_acc")]
        monitor: String,
    },
    ReduceLrOnPlateau {
        #[serde(default = "default_val_loss")]
        monitor: String,
        #[serde(default = "default_factor")]
        factor: f64,
        #[serde(default = "default_plateau_patience")]
        patience: usize,
        #[serde(default)]
        min_lr: f64,
    },
}

impl CallbackSpec {
    pub fn monitor(&self) -> &str {
        match self {
            CallbackSpec::EarlyStopping { monitor, .. }
            | CallbackSpec::Checkpoint { monitor, .. }
            | CallbackSpec::ReduceLrOnPlateau { monitor, .. } => monitor,
        }
    }
}

impl Config {
    /// Load configuration from the given path. Supports TOML or JSON based on
    /// the file extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| NnError::config(format!("cannot read {}: {e}", path.display())))?;
        let cfg = if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json_str(&content)?
        } else {
            Self::from_toml_str(&content)?
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| NnError::config(format!("invalid TOML config: {e}")))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| NnError::config(format!("invalid JSON config: {e}")))
    }

    /// The preset to build: `model` if given, else the dataset default.
    pub fn model_name(&self) -> Result<String> {
        match &self.model {
            Some(m) => Ok(m.to_lowercase()),
            None => presets::default_model_for(&self.dataset.to_lowercase()).map(str::to_string),
        }
    }

    /// Reject unknown names and out-of-range values before any training
    /// state is built.
    pub fn validate(&self) -> Result<()> {
        let model = self.model_name()?;
        if !presets::MODEL_NAMES.contains(&model.as_str()) {
            return Err(NnError::config(format!("unknown model '{model}'")));
        }
        let opt = self.train.optimizer.to_lowercase();
        if opt != "sgd" && opt != "adam" {
            return Err(NnError::config(format!("unknown optimizer '{opt}'")));
        }
        if self.train.batch_size == 0 {
            return Err(NnError::config("batch_size must be >= 1"));
        }
        if self.num_classes == 0 {
            return Err(NnError::config("num_classes must be >= 1"));
        }
        for cb in &self.callbacks {
            if !METRIC_NAMES.contains(&cb.monitor()) {
                return Err(NnError::config(format!(
                    "unknown monitor '{}', expected one of {METRIC_NAMES:?}",
                    cb.monitor()
                )));
            }
        }
        Ok(())
    }
}
