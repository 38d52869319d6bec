use super::{check_state, prepared_grads, state_for, validate_lr, Optimizer, OptimizerState};
use crate::error::{NnError, Result};
use crate::layers::Param;
use crate::models::ParamMap;

/// Adam with bias-corrected moments.
///
/// The step counter `t` is shared by all parameters and increments once per
/// `step` call. Weight decay is added to the gradient (L2), not decoupled.
pub struct Adam {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub weight_decay: f64,
    pub clip_grad_norm: Option<f64>,
    t: u64,
    m: ParamMap,
    v: ParamMap,
}

impl Adam {
    pub fn new(
        lr: f64,
        betas: (f64, f64),
        eps: f64,
        weight_decay: f64,
        clip_grad_norm: Option<f64>,
    ) -> Result<Self> {
        let (beta1, beta2) = betas;
        if !(0.0..1.0).contains(&beta1) || !(0.0..1.0).contains(&beta2) {
            return Err(NnError::config(format!("betas must be in [0, 1), got {betas:?}")));
        }
        if weight_decay < 0.0 {
            return Err(NnError::config("weight_decay must be non-negative"));
        }
        Ok(Self {
            lr: validate_lr(lr)?,
            beta1,
            beta2,
            eps,
            weight_decay,
            clip_grad_norm,
            t: 0,
            m: ParamMap::new(),
            v: ParamMap::new(),
        })
    }

    /// Number of steps taken so far.
    pub fn steps(&self) -> u64 {
        self.t
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [Param<'_>]) -> Result<()> {
        let grads = prepared_grads(params, self.weight_decay, self.clip_grad_norm)?;
        check_state(&self.m, params)?;
        check_state(&self.v, params)?;

        self.t += 1;
        let (b1, b2) = (self.beta1, self.beta2);
        let bc1 = 1.0 - b1.powf(self.t as f64);
        let bc2 = 1.0 - b2.powf(self.t as f64);

        for (p, g) in params.iter_mut().zip(&grads) {
            let m = state_for(&mut self.m, &p.name, p.value)?;
            for (mi, gi) in m.data.iter_mut().zip(&g.data) {
                *mi = b1 * *mi + (1.0 - b1) * gi;
            }
            let v = state_for(&mut self.v, &p.name, p.value)?;
            for (vi, gi) in v.data.iter_mut().zip(&g.data) {
                *vi = b2 * *vi + (1.0 - b2) * gi * gi;
            }
            let (m, v) = (&self.m[&p.name], &self.v[&p.name]);
            for ((w, mi), vi) in p.value.data.iter_mut().zip(&m.data).zip(&v.data) {
                let m_hat = mi / bc1;
                let v_hat = vi / bc2;
                *w -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
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
        "adam"
    }

    fn state_dict(&self) -> OptimizerState {
        OptimizerState::Adam {
            lr: self.lr,
            b1: self.beta1,
            b2: self.beta2,
            eps: self.eps,
            weight_decay: self.weight_decay,
            clip_grad_norm: self.clip_grad_norm,
            t: self.t,
            m: (!self.m.is_empty()).then(|| self.m.clone()),
            v: (!self.v.is_empty()).then(|| self.v.clone()),
        }
    }

    fn load_state_dict(&mut self, state: OptimizerState) -> Result<()> {
        match state {
            OptimizerState::Adam {
                lr,
                b1,
                b2,
                eps,
                weight_decay,
                clip_grad_norm,
                t,
                m,
                v,
            } => {
                self.lr = validate_lr(lr)?;
                self.beta1 = b1;
                self.beta2 = b2;
                self.eps = eps;
                self.weight_decay = weight_decay;
                self.clip_grad_norm = clip_grad_norm;
                self.t = t;
                self.m = m.unwrap_or_default();
                self.v = v.unwrap_or_default();
                Ok(())
            }
            OptimizerState::Sgd { .. } => Err(NnError::config("cannot load sgd state into adam")),
        }
    }
}
