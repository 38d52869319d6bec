use super::layer::{missing_cache, Layer};
use crate::error::Result;
use crate::tensor::Tensor;

/// Apply ReLU in place and return the positivity mask for backward.
pub fn forward_inplace(t: &mut Tensor) -> Vec<bool> {
    t.data
        .iter_mut()
        .map(|v| {
            let keep = *v > 0.0;
            if !keep {
                *v = 0.0;
            }
            keep
        })
        .collect()
}

/// Zero the gradient wherever the forward input was not positive.
pub fn backward_inplace(grad: &mut Tensor, mask: &[bool]) {
    for (g, &m) in grad.data.iter_mut().zip(mask.iter()) {
        if !m {
            *g = 0.0;
        }
    }
}

/// ReLU activation layer.
pub struct Relu {
    training: bool,
    // positivity mask and output shape of the last forward
    mask: Option<(Vec<bool>, Vec<usize>)>,
}

impl Relu {
    pub fn new() -> Self {
        Self {
            training: true,
            mask: None,
        }
    }
}

impl Default for Relu {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for Relu {
    fn kind(&self) -> &'static str {
        "ReLU"
    }

    fn forward(&mut self, x: &Tensor, training: Option<bool>) -> Result<Tensor> {
        if let Some(t) = training {
            self.training = t;
        }
        self.mask = None;
        let mut out = x.clone();
        self.mask = Some((forward_inplace(&mut out), out.shape.clone()));
        Ok(out)
    }

    fn backward(&mut self, grad_out: &Tensor) -> Result<Tensor> {
        let (_, shape) = self.mask.as_ref().ok_or_else(|| missing_cache("ReLU"))?;
        grad_out.ensure_shape(shape, "ReLU.backward")?;
        let (mask, _) = self.mask.take().ok_or_else(|| missing_cache("ReLU"))?;
        let mut grad = grad_out.clone();
        backward_inplace(&mut grad, &mask);
        Ok(grad)
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}
