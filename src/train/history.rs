use crate::error::{NnError, Result};
use csv::Writer;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::Path;

/// Scalars recorded at the end of one epoch. Validation fields are NaN when
/// no validation set was given.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_acc: f64,
    pub val_loss: f64,
    pub val_acc: f64,
}

impl EpochMetrics {
    /// Look a metric up by its column name.
    pub fn get(&self, name: &str) -> Result<f64> {
        match name {
            "train_loss" => Ok(self.train_loss),
            "train_acc" => Ok(self.train_acc),
            "val_loss" => Ok(self.val_loss),
            "val_acc" => Ok(self.val_acc),
            other => Err(NnError::config(format!("unknown metric '{other}'"))),
        }
    }
}

/// Append-only per-epoch record.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct History {
    records: Vec<EpochMetrics>,
    /// First epoch at which a callback asked training to stop.
    pub stop_requested_at: Option<usize>,
}

impl History {
    pub fn push(&mut self, metrics: EpochMetrics) {
        self.records.push(metrics);
    }

    pub fn records(&self) -> &[EpochMetrics] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.records.last()
    }

    /// All values of one metric in epoch order.
    pub fn series(&self, name: &str) -> Result<Vec<f64>> {
        self.records.iter().map(|m| m.get(name)).collect()
    }
}

/// CSV log with one row per epoch, flushed as each row is written.
pub struct MetricsLogger {
    csv: Writer<File>,
}

impl MetricsLogger {
    /// Create (or truncate) `path` and write the header row.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        let mut csv = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        csv.write_record(["epoch", "train_loss", "train_acc", "val_loss", "val_acc"])?;
        csv.flush()?;
        Ok(Self { csv })
    }

    pub fn log(&mut self, metrics: &EpochMetrics) -> Result<()> {
        self.csv.serialize(metrics)?;
        self.csv.flush()?;
        Ok(())
    }
}
