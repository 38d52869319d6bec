//! End-of-epoch callbacks.
//!
//! A callback is any `FnMut(&EpochState, &Sequential, &mut TrainingControl)`.
//! It may read the model (e.g. to save it) but can only change training
//! through [`TrainingControl`]: the learning rate and the stop flag.

use super::history::EpochMetrics;
use crate::config::CallbackSpec;
use crate::error::Result;
use crate::models::Sequential;
use crate::optim::clamp_lr;
use crate::weights;
use std::path::PathBuf;

/// Snapshot handed to callbacks after each epoch.
#[derive(Clone, Copy, Debug)]
pub struct EpochState {
    pub epoch: usize,
    pub metrics: EpochMetrics,
    /// Learning rate used during this epoch.
    pub lr: f64,
}

/// The sanctioned mutation points for callbacks.
#[derive(Debug)]
pub struct TrainingControl {
    lr: f64,
    stop_requested: bool,
}

impl TrainingControl {
    pub fn new(lr: f64) -> Self {
        Self {
            lr,
            stop_requested: false,
        }
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    /// Set the learning rate for the next epoch. Non-positive values are
    /// clamped to the floor.
    pub fn set_lr(&mut self, lr: f64) {
        self.lr = clamp_lr(lr);
    }

    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }
}

/// Hook invoked once per epoch, after metrics are recorded.
pub trait Callback {
    fn on_epoch_end(
        &mut self,
        state: &EpochState,
        model: &Sequential,
        control: &mut TrainingControl,
    ) -> Result<()>;
}

impl<F> Callback for F
where
    F: FnMut(&EpochState, &Sequential, &mut TrainingControl) -> Result<()>,
{
    fn on_epoch_end(
        &mut self,
        state: &EpochState,
        model: &Sequential,
        control: &mut TrainingControl,
    ) -> Result<()> {
        self(state, model, control)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Min,
    Max,
}

impl Mode {
    /// Metrics containing "loss" are minimized, everything else maximized.
    pub fn infer(monitor: &str) -> Self {
        if monitor.contains("loss") {
            Mode::Min
        } else {
            Mode::Max
        }
    }
}

/// Tracks the best value seen for one metric.
#[derive(Clone, Debug)]
struct Monitor {
    name: String,
    mode: Mode,
    best: f64,
}

impl Monitor {
    fn new(name: &str) -> Self {
        let mode = Mode::infer(name);
        Self {
            name: name.to_string(),
            mode,
            best: match mode {
                Mode::Min => f64::INFINITY,
                Mode::Max => f64::NEG_INFINITY,
            },
        }
    }

    /// Record `state`'s value; true when it beats the best so far. NaN never
    /// improves.
    fn update(&mut self, state: &EpochState) -> Result<bool> {
        let value = state.metrics.get(&self.name)?;
        let improved = match self.mode {
            Mode::Min => value < self.best,
            Mode::Max => value > self.best,
        };
        if improved {
            self.best = value;
        }
        Ok(improved)
    }
}

/// Request a stop after `patience` epochs without improvement.
///
/// The request is advisory: the loop only breaks when the caller opted in
/// via `TrainOptions::honor_stop_requests`.
pub struct EarlyStopping {
    monitor: Monitor,
    patience: usize,
    wait: usize,
    stopped: bool,
}

impl EarlyStopping {
    pub fn new(monitor: &str, patience: usize) -> Self {
        Self {
            monitor: Monitor::new(monitor),
            patience,
            wait: 0,
            stopped: false,
        }
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn best(&self) -> f64 {
        self.monitor.best
    }
}

impl Callback for EarlyStopping {
    fn on_epoch_end(
        &mut self,
        state: &EpochState,
        _model: &Sequential,
        control: &mut TrainingControl,
    ) -> Result<()> {
        if self.monitor.update(state)? {
            self.wait = 0;
            return Ok(());
        }
        self.wait += 1;
        if self.wait >= self.patience {
            if !self.stopped {
                log::info!(
                    "EarlyStopping: no improvement in {} epochs on {}",
                    self.patience,
                    self.monitor.name
                );
            }
            self.stopped = true;
            control.request_stop();
        }
        Ok(())
    }
}

/// Save the model's parameters and buffers whenever the monitored metric
/// improves.
pub struct ModelCheckpoint {
    filepath: PathBuf,
    monitor: Monitor,
}

impl ModelCheckpoint {
    pub fn new(filepath: impl Into<PathBuf>, monitor: &str) -> Self {
        Self {
            filepath: filepath.into(),
            monitor: Monitor::new(monitor),
        }
    }

    pub fn best(&self) -> f64 {
        self.monitor.best
    }
}

impl Callback for ModelCheckpoint {
    fn on_epoch_end(
        &mut self,
        state: &EpochState,
        model: &Sequential,
        _control: &mut TrainingControl,
    ) -> Result<()> {
        if self.monitor.update(state)? {
            weights::save_weights(&self.filepath, model)?;
        }
        Ok(())
    }
}

/// Multiply the learning rate by `factor` after `patience` epochs without
/// improvement, then start counting again.
pub struct ReduceLrOnPlateau {
    monitor: Monitor,
    factor: f64,
    patience: usize,
    min_lr: f64,
    wait: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(monitor: &str, factor: f64, patience: usize) -> Self {
        Self {
            monitor: Monitor::new(monitor),
            factor,
            patience,
            min_lr: 0.0,
            wait: 0,
        }
    }

    /// Never reduce below `min_lr`.
    pub fn with_min_lr(mut self, min_lr: f64) -> Self {
        self.min_lr = min_lr;
        self
    }
}

impl Callback for ReduceLrOnPlateau {
    fn on_epoch_end(
        &mut self,
        state: &EpochState,
        _model: &Sequential,
        control: &mut TrainingControl,
    ) -> Result<()> {
        if self.monitor.update(state)? {
            self.wait = 0;
            return Ok(());
        }
        self.wait += 1;
        if self.wait >= self.patience {
            control.set_lr((control.lr() * self.factor).max(self.min_lr));
            self.wait = 0;
            log::info!("ReduceLROnPlateau: lr -> {:.3e}", control.lr());
        }
        Ok(())
    }
}

/// Instantiate the callbacks listed in a configuration.
pub fn build_callbacks(specs: &[CallbackSpec]) -> Vec<Box<dyn Callback>> {
    specs
        .iter()
        .map(|spec| -> Box<dyn Callback> {
            match spec {
                CallbackSpec::EarlyStopping { monitor, patience } => {
                    Box::new(EarlyStopping::new(monitor, *patience))
                }
                CallbackSpec::Checkpoint { filepath, monitor } => {
                    Box::new(ModelCheckpoint::new(filepath.clone(), monitor))
                }
                CallbackSpec::ReduceLrOnPlateau {
                    monitor,
                    factor,
                    patience,
                    min_lr,
                } => Box::new(ReduceLrOnPlateau::new(monitor, *factor, *patience).with_min_lr(*min_lr)),
            }
        })
        .collect()
}
