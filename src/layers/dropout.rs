use super::layer::{missing_cache, Layer};
use crate::error::{NnError, Result};
use crate::rng::fork;
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::Rng;

/// Dropout layer that randomly zeros elements during training.
///
/// Each element is kept with probability `1 - p` and kept values are scaled
/// by `1/(1 - p)` to preserve the expected activation ("inverted" dropout).
/// In eval mode, or with `p == 0`, the layer is the identity and no mask is
/// drawn.
pub struct Dropout {
    p: f64,
    rng: StdRng,
    training: bool,
    // forward shape and keep mask; a `None` mask means the forward was the identity
    cache: Option<(Vec<usize>, Option<Vec<bool>>)>,
}

impl Dropout {
    /// Create a dropout layer drawing its masks from a generator forked off
    /// `rng`.
    pub fn new<R: Rng + ?Sized>(p: f64, rng: &mut R) -> Result<Self> {
        if !(0.0..1.0).contains(&p) {
            return Err(NnError::config(format!("dropout p must be in [0, 1), got {p}")));
        }
        Ok(Self {
            p,
            rng: fork(rng),
            training: true,
            cache: None,
        })
    }

    pub fn p(&self) -> f64 {
        self.p
    }

    fn scale(&self) -> f64 {
        1.0 / (1.0 - self.p)
    }
}

impl Layer for Dropout {
    fn kind(&self) -> &'static str {
        "Dropout"
    }

    fn forward(&mut self, x: &Tensor, training: Option<bool>) -> Result<Tensor> {
        if let Some(t) = training {
            self.training = t;
        }
        self.cache = None;
        if !self.training || self.p == 0.0 {
            self.cache = Some((x.shape.clone(), None));
            return Ok(x.clone());
        }
        let mask: Vec<bool> = (0..x.len()).map(|_| self.rng.gen::<f64>() >= self.p).collect();
        let scale = self.scale();
        let mut out = x.clone();
        for (v, &keep) in out.data.iter_mut().zip(&mask) {
            *v = if keep { *v * scale } else { 0.0 };
        }
        self.cache = Some((x.shape.clone(), Some(mask)));
        Ok(out)
    }

    fn backward(&mut self, grad_out: &Tensor) -> Result<Tensor> {
        let (shape, _) = self.cache.as_ref().ok_or_else(|| missing_cache("Dropout"))?;
        grad_out.ensure_shape(shape, "Dropout.backward")?;
        let mask = match self.cache.take() {
            Some((_, Some(mask))) => mask,
            _ => return Ok(grad_out.clone()),
        };
        let scale = self.scale();
        let mut dx = grad_out.clone();
        for (g, &keep) in dx.data.iter_mut().zip(&mask) {
            *g = if keep { *g * scale } else { 0.0 };
        }
        Ok(dx)
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}
