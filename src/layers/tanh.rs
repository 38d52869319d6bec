use super::layer::{missing_cache, Layer};
use crate::error::Result;
use crate::tensor::Tensor;

/// Hyperbolic tangent. Caches its own output since `d tanh = 1 - y²`.
pub struct Tanh {
    training: bool,
    y: Option<Tensor>,
}

impl Tanh {
    pub fn new() -> Self {
        Self {
            training: true,
            y: None,
        }
    }
}

impl Default for Tanh {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for Tanh {
    fn kind(&self) -> &'static str {
        "Tanh"
    }

    fn forward(&mut self, x: &Tensor, training: Option<bool>) -> Result<Tensor> {
        if let Some(t) = training {
            self.training = t;
        }
        self.y = None;
        let y = x.map(f64::tanh);
        self.y = Some(y.clone());
        Ok(y)
    }

    fn backward(&mut self, grad_out: &Tensor) -> Result<Tensor> {
        let shape = &self.y.as_ref().ok_or_else(|| missing_cache("Tanh"))?.shape;
        grad_out.ensure_shape(shape, "Tanh.backward")?;
        let y = self.y.take().ok_or_else(|| missing_cache("Tanh"))?;
        grad_out.zip_map(&y, |g, h| g * (1.0 - h * h))
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}
