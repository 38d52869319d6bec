use super::layer::{missing_cache, Layer, Param};
use crate::error::{NnError, Result};
use crate::tensor::Tensor;

/// Batch normalization for `(N, C, H, W)` feature maps.
///
/// Statistics are per channel over the `(N, H, W)` axes. Training mode
/// normalizes with the biased batch variance and folds the batch statistics
/// into the running averages as
/// `running = momentum * running + (1 - momentum) * batch`. Eval mode uses the
/// running statistics and caches nothing, so `backward` after an eval-mode
/// forward is a state error.
pub struct BatchNorm2d {
    pub gamma: Tensor,
    pub beta: Tensor,
    pub running_mean: Tensor,
    pub running_var: Tensor,
    dgamma: Tensor,
    dbeta: Tensor,
    num_features: usize,
    eps: f64,
    momentum: f64,
    training: bool,
    cache: Option<BnCache>,
}

struct BnCache {
    x_hat: Tensor,
    inv_std: Vec<f64>,
}

impl BatchNorm2d {
    /// `eps = 1e-5`, `momentum = 0.9`.
    pub fn new(num_features: usize) -> Result<Self> {
        Self::with_params(num_features, 1e-5, 0.9)
    }

    pub fn with_params(num_features: usize, eps: f64, momentum: f64) -> Result<Self> {
        if num_features == 0 {
            return Err(NnError::config("BatchNorm2D needs at least one feature"));
        }
        if !(0.0..=1.0).contains(&momentum) || eps <= 0.0 {
            return Err(NnError::config(format!(
                "BatchNorm2D momentum must be in [0, 1] and eps > 0, got {momentum} / {eps}"
            )));
        }
        Ok(Self {
            gamma: Tensor::ones(&[num_features]),
            beta: Tensor::zeros(&[num_features]),
            running_mean: Tensor::zeros(&[num_features]),
            running_var: Tensor::ones(&[num_features]),
            dgamma: Tensor::zeros(&[num_features]),
            dbeta: Tensor::zeros(&[num_features]),
            num_features,
            eps,
            momentum,
            training: true,
            cache: None,
        })
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Sum `f(flat_index)` per channel over the batch and spatial axes.
    fn channel_sums(shape: (usize, usize, usize, usize), f: impl Fn(usize) -> f64) -> Vec<f64> {
        let (n, c, h, w) = shape;
        let plane = h * w;
        let mut sums = vec![0.0; c];
        for b in 0..n {
            for (ch, s) in sums.iter_mut().enumerate() {
                let start = (b * c + ch) * plane;
                *s += (start..start + plane).map(&f).sum::<f64>();
            }
        }
        sums
    }
}

impl Layer for BatchNorm2d {
    fn kind(&self) -> &'static str {
        "BatchNorm2D"
    }

    fn forward(&mut self, x: &Tensor, training: Option<bool>) -> Result<Tensor> {
        if let Some(t) = training {
            self.training = t;
        }
        self.cache = None;
        let shape = x.dims4()?;
        let (n, c, h, w) = shape;
        if c != self.num_features {
            return Err(NnError::shape(format!(
                "BatchNorm2D expects (N,C,H,W) with C={}, got {:?}",
                self.num_features, x.shape
            )));
        }
        let plane = h * w;
        let count = (n * plane) as f64;

        let (mean, inv_std) = if self.training {
            if count == 0.0 {
                return Err(NnError::shape("BatchNorm2D needs a non-empty batch in training mode"));
            }
            let mean: Vec<f64> = Self::channel_sums(shape, |i| x.data[i])
                .into_iter()
                .map(|s| s / count)
                .collect();
            let var: Vec<f64> = Self::channel_sums(shape, |i| {
                let d = x.data[i] - mean[(i / plane) % c];
                d * d
            })
            .into_iter()
            .map(|s| s / count)
            .collect();

            let m = self.momentum;
            for ch in 0..c {
                self.running_mean.data[ch] = m * self.running_mean.data[ch] + (1.0 - m) * mean[ch];
                self.running_var.data[ch] = m * self.running_var.data[ch] + (1.0 - m) * var[ch];
            }
            let inv_std: Vec<f64> = var.iter().map(|v| 1.0 / (v + self.eps).sqrt()).collect();
            (mean, inv_std)
        } else {
            let inv_std: Vec<f64> = self
                .running_var
                .data
                .iter()
                .map(|v| 1.0 / (v + self.eps).sqrt())
                .collect();
            (self.running_mean.data.clone(), inv_std)
        };

        let x_hat = Tensor::from_fn(&x.shape, |i| {
            let ch = (i / plane) % c;
            (x.data[i] - mean[ch]) * inv_std[ch]
        });
        let y = Tensor::from_fn(&x.shape, |i| {
            let ch = (i / plane) % c;
            self.gamma.data[ch] * x_hat.data[i] + self.beta.data[ch]
        });

        if self.training {
            self.cache = Some(BnCache { x_hat, inv_std });
        }
        Ok(y)
    }

    fn backward(&mut self, grad_out: &Tensor) -> Result<Tensor> {
        let cached = self.cache.as_ref().ok_or_else(|| {
            if self.training {
                missing_cache("BatchNorm2D")
            } else {
                NnError::state("BatchNorm2D.backward has no batch statistics in eval mode")
            }
        })?;
        grad_out.ensure_shape(&cached.x_hat.shape, "BatchNorm2D.backward")?;
        let cache = self.cache.take().ok_or_else(|| missing_cache("BatchNorm2D"))?;
        let shape = grad_out.dims4()?;
        let (n, c, h, w) = shape;
        let plane = h * w;
        let count = (n * plane) as f64;

        let sum_dy = Self::channel_sums(shape, |i| grad_out.data[i]);
        let sum_dy_xhat = Self::channel_sums(shape, |i| grad_out.data[i] * cache.x_hat.data[i]);

        let dx = Tensor::from_fn(&grad_out.shape, |i| {
            let ch = (i / plane) % c;
            let mean_dy = sum_dy[ch] / count;
            let mean_dy_xhat = sum_dy_xhat[ch] / count;
            self.gamma.data[ch]
                * cache.inv_std[ch]
                * (grad_out.data[i] - mean_dy - cache.x_hat.data[i] * mean_dy_xhat)
        });

        self.dgamma = Tensor::new(sum_dy_xhat, vec![c])?;
        self.dbeta = Tensor::new(sum_dy, vec![c])?;
        Ok(dx)
    }

    fn params(&self) -> Vec<(&'static str, &Tensor)> {
        vec![("gamma", &self.gamma), ("beta", &self.beta)]
    }

    fn grads(&self) -> Vec<(&'static str, &Tensor)> {
        vec![("gamma", &self.dgamma), ("beta", &self.dbeta)]
    }

    fn parameters(&mut self) -> Vec<Param<'_>> {
        vec![
            Param::new("gamma", &mut self.gamma, &self.dgamma),
            Param::new("beta", &mut self.beta, &self.dbeta),
        ]
    }

    fn buffers(&self) -> Vec<(&'static str, &Tensor)> {
        vec![
            ("running_mean", &self.running_mean),
            ("running_var", &self.running_var),
        ]
    }

    fn buffers_mut(&mut self) -> Vec<(&'static str, &mut Tensor)> {
        vec![
            ("running_mean", &mut self.running_mean),
            ("running_var", &mut self.running_var),
        ]
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn training_output_is_normalized_per_channel() {
        let mut bn = BatchNorm2d::new(2).unwrap();
        let x = Tensor::from_fn(&[3, 2, 2, 2], |i| (i as f64).sin() * 3.0 + 1.0);
        let y = bn.forward(&x, Some(true)).unwrap();
        let sums = BatchNorm2d::channel_sums((3, 2, 2, 2), |i| y.data[i]);
        for s in sums {
            assert!(s.abs() < 1e-9);
        }
    }

    #[test]
    fn eval_backward_is_state_error() {
        let mut bn = BatchNorm2d::new(1).unwrap();
        let x = Tensor::ones(&[2, 1, 2, 2]);
        bn.forward(&x, Some(false)).unwrap();
        assert!(matches!(
            bn.backward(&Tensor::ones(&[2, 1, 2, 2])),
            Err(NnError::State(_))
        ));
    }

    #[test]
    fn running_stats_follow_momentum() {
        let mut bn = BatchNorm2d::with_params(1, 1e-5, 0.5).unwrap();
        let x = Tensor::full(&[2, 1, 1, 1], 4.0);
        bn.forward(&x, Some(true)).unwrap();
        assert!((bn.running_mean.data[0] - 2.0).abs() < 1e-12);
        // batch variance is zero
        assert!((bn.running_var.data[0] - 0.5).abs() < 1e-12);
    }
}
