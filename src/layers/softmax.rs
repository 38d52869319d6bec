use super::layer::{missing_cache, Layer};
use crate::error::{NnError, Result};
use crate::math;
use crate::tensor::Tensor;

/// Softmax over the last axis.
///
/// Mostly useful at inference time. Training should pair raw logits with
/// [`crate::loss::softmax_cross_entropy`], whose fused gradient avoids the
/// Jacobian product computed here.
pub struct Softmax {
    training: bool,
    out: Option<Tensor>,
}

impl Softmax {
    pub fn new() -> Self {
        Self {
            training: true,
            out: None,
        }
    }
}

impl Default for Softmax {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for Softmax {
    fn kind(&self) -> &'static str {
        "Softmax"
    }

    fn forward(&mut self, x: &Tensor, training: Option<bool>) -> Result<Tensor> {
        if let Some(t) = training {
            self.training = t;
        }
        self.out = None;
        let out = math::softmax_last_axis(x)?;
        self.out = Some(out.clone());
        Ok(out)
    }

    /// `dx = y * (g - sum(g * y))` per row.
    fn backward(&mut self, grad_out: &Tensor) -> Result<Tensor> {
        let shape = &self.out.as_ref().ok_or_else(|| missing_cache("Softmax"))?.shape;
        grad_out.ensure_shape(shape, "Softmax.backward")?;
        let y = self.out.take().ok_or_else(|| missing_cache("Softmax"))?;
        let cols = *y
            .shape
            .last()
            .ok_or_else(|| NnError::shape("Softmax.backward on a scalar"))?;
        let mut grad = Tensor::zeros_like(&y);
        if cols == 0 {
            return Ok(grad);
        }
        for ((row_grad, row_out), dst) in grad_out
            .data
            .chunks(cols)
            .zip(y.data.chunks(cols))
            .zip(grad.data.chunks_mut(cols))
        {
            let dot: f64 = row_grad.iter().zip(row_out).map(|(g, o)| g * o).sum();
            for ((d, g), o) in dst.iter_mut().zip(row_grad).zip(row_out) {
                *d = o * (g - dot);
            }
        }
        Ok(grad)
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}
