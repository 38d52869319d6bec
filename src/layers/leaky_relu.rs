use super::layer::{missing_cache, Layer};
use crate::error::Result;
use crate::tensor::Tensor;

pub const DEFAULT_SLOPE: f64 = 0.01;

/// Leaky ReLU: `x` for positive inputs, `slope * x` otherwise.
pub struct LeakyRelu {
    slope: f64,
    training: bool,
    // pre-activation input; only its sign is needed for backward
    x: Option<Tensor>,
}

impl LeakyRelu {
    pub fn new(slope: f64) -> Self {
        Self {
            slope,
            training: true,
            x: None,
        }
    }

    pub fn slope(&self) -> f64 {
        self.slope
    }
}

impl Default for LeakyRelu {
    fn default() -> Self {
        Self::new(DEFAULT_SLOPE)
    }
}

impl Layer for LeakyRelu {
    fn kind(&self) -> &'static str {
        "LeakyReLU"
    }

    fn forward(&mut self, x: &Tensor, training: Option<bool>) -> Result<Tensor> {
        if let Some(t) = training {
            self.training = t;
        }
        self.x = None;
        let slope = self.slope;
        let y = x.map(|v| if v > 0.0 { v } else { slope * v });
        self.x = Some(x.clone());
        Ok(y)
    }

    fn backward(&mut self, grad_out: &Tensor) -> Result<Tensor> {
        let shape = &self.x.as_ref().ok_or_else(|| missing_cache("LeakyReLU"))?.shape;
        grad_out.ensure_shape(shape, "LeakyReLU.backward")?;
        let x = self.x.take().ok_or_else(|| missing_cache("LeakyReLU"))?;
        let slope = self.slope;
        grad_out.zip_map(&x, |g, v| if v < 0.0 { g * slope } else { g })
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}
