use crate::error::{NnError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Smallest learning rate a schedule may hand to an optimizer.
pub const LR_FLOOR: f64 = 1e-12;

/// Epoch-indexed learning-rate schedule. Epochs count from 1.
pub trait LearningRateSchedule {
    fn next_lr(&self, epoch: usize) -> f64;
}

/// Clamp non-positive learning rates to [`LR_FLOOR`], warning when it
/// happens.
pub fn clamp_lr(lr: f64) -> f64 {
    if lr > 0.0 {
        lr
    } else {
        log::warn!("learning rate {lr} clamped to {LR_FLOOR}");
        LR_FLOOR
    }
}

/// `base_lr * gamma^(epoch / step_size)`
pub struct StepLr {
    base_lr: f64,
    step_size: usize,
    gamma: f64,
}

impl StepLr {
    pub fn new(base_lr: f64, step_size: usize, gamma: f64) -> Result<Self> {
        if step_size == 0 {
            return Err(NnError::config("step scheduler needs step_size >= 1"));
        }
        Ok(Self {
            base_lr,
            step_size,
            gamma,
        })
    }
}

impl LearningRateSchedule for StepLr {
    fn next_lr(&self, epoch: usize) -> f64 {
        let exp = (epoch / self.step_size) as i32;
        self.base_lr * self.gamma.powi(exp)
    }
}

/// Cosine annealing from `max_lr` at epoch 1 towards `min_lr`; the epoch is
/// clamped to `[1, t_max]`.
pub struct CosineLr {
    max_lr: f64,
    min_lr: f64,
    t_max: usize,
}

impl CosineLr {
    pub fn new(max_lr: f64, t_max: usize, min_lr: f64) -> Result<Self> {
        if t_max == 0 {
            return Err(NnError::config("cosine scheduler needs T_max >= 1"));
        }
        Ok(Self {
            max_lr,
            min_lr,
            t_max,
        })
    }
}

impl LearningRateSchedule for CosineLr {
    fn next_lr(&self, epoch: usize) -> f64 {
        let t = epoch.clamp(1, self.t_max);
        let inner = PI * (t - 1) as f64 / self.t_max as f64;
        self.min_lr + 0.5 * (self.max_lr - self.min_lr) * (1.0 + inner.cos())
    }
}

/// Linear warmup from `base_lr` to `max_lr` over `warmup_epochs`, then
/// cosine decay to `min_lr` over the following `t_max` epochs.
pub struct WarmupCosineLr {
    warmup_epochs: usize,
    t_max: usize,
    base_lr: f64,
    max_lr: f64,
    min_lr: f64,
}

impl WarmupCosineLr {
    pub fn new(
        warmup_epochs: usize,
        t_max: usize,
        base_lr: f64,
        max_lr: f64,
        min_lr: f64,
    ) -> Result<Self> {
        if t_max == 0 {
            return Err(NnError::config("warmup_cosine scheduler needs T_max >= 1"));
        }
        Ok(Self {
            warmup_epochs,
            t_max,
            base_lr,
            max_lr,
            min_lr,
        })
    }
}

impl LearningRateSchedule for WarmupCosineLr {
    fn next_lr(&self, epoch: usize) -> f64 {
        if epoch <= self.warmup_epochs {
            if self.warmup_epochs == 0 {
                return self.max_lr;
            }
            let alpha = epoch as f64 / self.warmup_epochs as f64;
            return self.base_lr + alpha * (self.max_lr - self.base_lr);
        }
        let t = (epoch - self.warmup_epochs).min(self.t_max);
        let inner = PI * t as f64 / self.t_max as f64;
        self.min_lr + 0.5 * (self.max_lr - self.min_lr) * (1.0 + inner.cos())
    }
}

fn default_step_size() -> usize {
    10
}

fn default_gamma() -> f64 {
    0.1
}

fn default_t_max() -> usize {
    50
}

fn default_warmup() -> usize {
    5
}

/// Scheduler section of a configuration file, tagged by `name`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum SchedulerSpec {
    Step {
        #[serde(default = "default_step_size")]
        step_size: usize,
        #[serde(default = "default_gamma")]
        gamma: f64,
    },
    Cosine {
        #[serde(rename = "T_max", default = "default_t_max")]
        t_max: usize,
        #[serde(default)]
        min_lr: f64,
    },
    WarmupCosine {
        #[serde(default = "default_warmup")]
        warmup_epochs: usize,
        #[serde(rename = "T_max", default = "default_t_max")]
        t_max: usize,
        #[serde(default)]
        max_lr: Option<f64>,
        #[serde(default)]
        base_lr: Option<f64>,
        #[serde(default)]
        min_lr: f64,
    },
}

/// Build a schedule anchored at the optimizer's initial learning rate.
pub fn build_scheduler(spec: &SchedulerSpec, initial_lr: f64) -> Result<Box<dyn LearningRateSchedule>> {
    let schedule: Box<dyn LearningRateSchedule> = match *spec {
        SchedulerSpec::Step { step_size, gamma } => Box::new(StepLr::new(initial_lr, step_size, gamma)?),
        SchedulerSpec::Cosine { t_max, min_lr } => Box::new(CosineLr::new(initial_lr, t_max, min_lr)?),
        SchedulerSpec::WarmupCosine {
            warmup_epochs,
            t_max,
            max_lr,
            base_lr,
            min_lr,
        } => Box::new(WarmupCosineLr::new(
            warmup_epochs,
            t_max,
            base_lr.unwrap_or(initial_lr),
            max_lr.unwrap_or(initial_lr),
            min_lr,
        )?),
    };
    Ok(schedule)
}
