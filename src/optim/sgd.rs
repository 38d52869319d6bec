use super::{check_state, prepared_grads, state_for, validate_lr, Optimizer, OptimizerState};
use crate::error::{NnError, Result};
use crate::layers::Param;
use crate::models::ParamMap;

/// Stochastic gradient descent with optional momentum and Nesterov.
///
/// Weight decay is classic L2: `grad += weight_decay * param` before any
/// clipping. With momentum the velocity is `v = momentum * v + grad` and the
/// update is `lr * v`, or `lr * (momentum * v + grad)` for Nesterov.
pub struct Sgd {
    pub lr: f64,
    pub momentum: f64,
    pub nesterov: bool,
    pub weight_decay: f64,
    pub clip_grad_norm: Option<f64>,
    velocity: ParamMap,
}

impl Sgd {
    pub fn new(
        lr: f64,
        momentum: f64,
        nesterov: bool,
        weight_decay: f64,
        clip_grad_norm: Option<f64>,
    ) -> Result<Self> {
        if momentum < 0.0 {
            return Err(NnError::config(format!("momentum must be non-negative, got {momentum}")));
        }
        if weight_decay < 0.0 {
            return Err(NnError::config("weight_decay must be non-negative"));
        }
        Ok(Self {
            lr: validate_lr(lr)?,
            momentum,
            nesterov,
            weight_decay,
            clip_grad_norm,
            velocity: ParamMap::new(),
        })
    }

    /// Plain `param -= lr * grad`.
    pub fn plain(lr: f64) -> Result<Self> {
        Self::new(lr, 0.0, false, 0.0, None)
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut [Param<'_>]) -> Result<()> {
        let grads = prepared_grads(params, self.weight_decay, self.clip_grad_norm)?;
        check_state(&self.velocity, params)?;

        if self.momentum == 0.0 {
            for (p, g) in params.iter_mut().zip(&grads) {
                p.value.add_scaled_inplace(g, -self.lr)?;
            }
            return Ok(());
        }

        for (p, g) in params.iter_mut().zip(&grads) {
            let v = state_for(&mut self.velocity, &p.name, p.value)?;
            v.scale_inplace(self.momentum);
            v.add_scaled_inplace(g, 1.0)?;
            if self.nesterov {
                let mut update = v.clone();
                update.scale_inplace(self.momentum);
                update.add_scaled_inplace(g, 1.0)?;
                p.value.add_scaled_inplace(&update, -self.lr)?;
            } else {
                p.value.add_scaled_inplace(v, -self.lr)?;
            }
        }
        Ok(())
    }

    fn lr(&self) -> f64 {
        self.lr
    }

    fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }

    fn name(&self) -> &'static str {
        "sgd"
    }

    fn state_dict(&self) -> OptimizerState {
        OptimizerState::Sgd {
            lr: self.lr,
            momentum: self.momentum,
            nesterov: self.nesterov,
            weight_decay: self.weight_decay,
            clip_grad_norm: self.clip_grad_norm,
            velocity: (!self.velocity.is_empty()).then(|| self.velocity.clone()),
        }
    }

    fn load_state_dict(&mut self, state: OptimizerState) -> Result<()> {
        match state {
            OptimizerState::Sgd {
                lr,
                momentum,
                nesterov,
                weight_decay,
                clip_grad_norm,
                velocity,
            } => {
                self.lr = validate_lr(lr)?;
                self.momentum = momentum;
                self.nesterov = nesterov;
                self.weight_decay = weight_decay;
                self.clip_grad_norm = clip_grad_norm;
                self.velocity = velocity.unwrap_or_default();
                Ok(())
            }
            OptimizerState::Adam { .. } => Err(NnError::config("cannot load adam state into sgd")),
        }
    }
}
