pub mod adam;
pub mod clip;
pub mod lr_scheduler;
pub mod sgd;

pub use adam::Adam;
pub use clip::{clip_grad_norm, global_norm};
pub use lr_scheduler::{
    build_scheduler, clamp_lr, CosineLr, LearningRateSchedule, SchedulerSpec, StepLr,
    WarmupCosineLr,
};
pub use sgd::Sgd;

use crate::config::TrainSection;
use crate::error::{NnError, Result};
use crate::layers::Param;
use crate::models::ParamMap;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Common interface for optimizers.
///
/// `step` updates parameter values in place from their gradients. Per
/// parameter state is keyed by the parameter's name, created on first use,
/// and must keep the shape it was created with.
pub trait Optimizer {
    fn step(&mut self, params: &mut [Param<'_>]) -> Result<()>;

    fn lr(&self) -> f64;

    fn set_lr(&mut self, lr: f64);

    fn name(&self) -> &'static str;

    /// Snapshot of hyper-parameters and buffers.
    fn state_dict(&self) -> OptimizerState;

    fn load_state_dict(&mut self, state: OptimizerState) -> Result<()>;
}

/// Serializable optimizer state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerState {
    Sgd {
        lr: f64,
        momentum: f64,
        nesterov: bool,
        weight_decay: f64,
        clip_grad_norm: Option<f64>,
        velocity: Option<ParamMap>,
    },
    Adam {
        lr: f64,
        b1: f64,
        b2: f64,
        eps: f64,
        weight_decay: f64,
        clip_grad_norm: Option<f64>,
        t: u64,
        m: Option<ParamMap>,
        v: Option<ParamMap>,
    },
}

/// Effective gradients for one step: `grad + weight_decay * param`, then
/// global-norm clipping. Layer gradient buffers are left untouched.
pub(crate) fn prepared_grads(
    params: &[Param<'_>],
    weight_decay: f64,
    clip: Option<f64>,
) -> Result<Vec<Tensor>> {
    let mut grads = Vec::with_capacity(params.len());
    for p in params {
        p.grad.ensure_shape(&p.value.shape, &p.name)?;
        let mut g = p.grad.clone();
        if weight_decay > 0.0 {
            g.add_scaled_inplace(p.value, weight_decay)?;
        }
        grads.push(g);
    }
    if let Some(max_norm) = clip {
        clip_grad_norm(&mut grads, max_norm);
    }
    Ok(grads)
}

/// Fetch the state buffer for `name`, creating zeros on first use.
pub(crate) fn state_for<'a>(
    state: &'a mut BTreeMap<String, Tensor>,
    name: &str,
    like: &Tensor,
) -> Result<&'a mut Tensor> {
    let buf = state
        .entry(name.to_string())
        .or_insert_with(|| Tensor::zeros_like(like));
    if buf.shape != like.shape {
        return Err(NnError::state(format!(
            "optimizer state for '{name}' has shape {:?} but parameter is {:?}",
            buf.shape, like.shape
        )));
    }
    Ok(buf)
}

/// Verify that every state buffer a step would touch matches its
/// parameter's shape, without touching anything. Parameters sharing a name
/// within one step count as sharing a buffer.
pub(crate) fn check_state(state: &BTreeMap<String, Tensor>, params: &[Param<'_>]) -> Result<()> {
    let mut seen: BTreeMap<&str, &[usize]> = BTreeMap::new();
    for p in params {
        let expected = match state.get(&p.name) {
            Some(buf) => buf.shape.as_slice(),
            None => *seen.entry(p.name.as_str()).or_insert(p.value.shape.as_slice()),
        };
        if expected != p.value.shape.as_slice() {
            return Err(NnError::state(format!(
                "optimizer state for '{}' has shape {:?} but parameter is {:?}",
                p.name, expected, p.value.shape
            )));
        }
    }
    Ok(())
}

pub(crate) fn validate_lr(lr: f64) -> Result<f64> {
    if lr > 0.0 && lr.is_finite() {
        Ok(lr)
    } else {
        Err(NnError::config(format!("learning rate must be positive, got {lr}")))
    }
}

/// Build the optimizer named in the training section.
pub fn build_optimizer(cfg: &TrainSection) -> Result<Box<dyn Optimizer>> {
    match cfg.optimizer.to_lowercase().as_str() {
        "sgd" => Ok(Box::new(Sgd::new(
            cfg.lr,
            cfg.momentum,
            cfg.nesterov,
            cfg.weight_decay,
            cfg.clip_grad_norm,
        )?)),
        "adam" => Ok(Box::new(Adam::new(
            cfg.lr,
            cfg.betas,
            cfg.eps,
            cfg.weight_decay,
            cfg.clip_grad_norm,
        )?)),
        other => Err(NnError::config(format!(
            "unknown optimizer '{other}', expected 'sgd' or 'adam'"
        ))),
    }
}
