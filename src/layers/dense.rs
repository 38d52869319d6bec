use super::layer::{missing_cache, Layer, Param};
use crate::error::{NnError, Result};
use crate::init::{self, WeightInit};
use crate::math;
use crate::tensor::Tensor;
use rand::Rng;

/// Fully connected layer computing `y = x @ Wᵀ + b`.
///
/// `W` has shape `(out_features, in_features)`. Inputs with more than two
/// axes are flattened to `(batch, -1)` and the gradient is reshaped back to
/// the original input shape on the way out.
pub struct Dense {
    pub w: Tensor,
    pub b: Option<Tensor>,
    dw: Tensor,
    db: Option<Tensor>,
    in_features: usize,
    out_features: usize,
    training: bool,
    cache: Option<DenseCache>,
}

struct DenseCache {
    x: Tensor,
    input_shape: Vec<usize>,
}

impl Dense {
    /// Dense layer with bias and Xavier-uniform weights.
    pub fn new<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Result<Self> {
        Self::with_options(in_features, out_features, true, WeightInit::XavierUniform, rng)
    }

    pub fn with_options<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        bias: bool,
        weight_init: WeightInit,
        rng: &mut R,
    ) -> Result<Self> {
        if in_features == 0 || out_features == 0 {
            return Err(NnError::config(format!(
                "Dense({in_features}, {out_features}) needs positive sizes"
            )));
        }
        let w = weight_init.init(&[out_features, in_features], rng)?;
        let dw = Tensor::zeros_like(&w);
        let (b, db) = if bias {
            (Some(init::bias_zeros(out_features)), Some(init::bias_zeros(out_features)))
        } else {
            (None, None)
        };
        Ok(Self {
            w,
            b,
            dw,
            db,
            in_features,
            out_features,
            training: true,
            cache: None,
        })
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }
}

impl Layer for Dense {
    fn kind(&self) -> &'static str {
        "Dense"
    }

    fn forward(&mut self, x: &Tensor, training: Option<bool>) -> Result<Tensor> {
        if let Some(t) = training {
            self.training = t;
        }
        self.cache = None;
        if x.ndim() < 2 {
            return Err(NnError::shape(format!(
                "Dense expects at least 2D input, got shape {:?}",
                x.shape
            )));
        }
        let batch = x.shape[0];
        let features = if batch == 0 { 0 } else { x.len() / batch };
        if features != self.in_features {
            return Err(NnError::shape(format!(
                "Dense expects {} input features, got {} from shape {:?}",
                self.in_features, features, x.shape
            )));
        }
        let x2 = x.reshape(&[batch, features])?;
        let mut y = math::matmul_nt(&x2, &self.w)?;
        if let Some(b) = &self.b {
            for row in y.data.chunks_mut(self.out_features) {
                for (v, bv) in row.iter_mut().zip(&b.data) {
                    *v += bv;
                }
            }
        }
        self.cache = Some(DenseCache {
            x: x2,
            input_shape: x.shape.clone(),
        });
        Ok(y)
    }

    fn backward(&mut self, grad_out: &Tensor) -> Result<Tensor> {
        let batch = self.cache.as_ref().ok_or_else(|| missing_cache("Dense"))?.x.shape[0];
        grad_out.ensure_shape(&[batch, self.out_features], "Dense.backward")?;
        let cache = self.cache.take().ok_or_else(|| missing_cache("Dense"))?;

        self.dw = math::matmul_tn(grad_out, &cache.x)?;
        if let Some(db) = self.db.as_mut() {
            *db = math::sum_rows(grad_out)?;
        }
        let dx = math::matmul(grad_out, &self.w)?;
        dx.into_shape(&cache.input_shape)
    }

    fn params(&self) -> Vec<(&'static str, &Tensor)> {
        let mut out = vec![("W", &self.w)];
        if let Some(b) = &self.b {
            out.push(("b", b));
        }
        out
    }

    fn grads(&self) -> Vec<(&'static str, &Tensor)> {
        let mut out = vec![("W", &self.dw)];
        if let Some(db) = &self.db {
            out.push(("b", db));
        }
        out
    }

    fn parameters(&mut self) -> Vec<Param<'_>> {
        let mut out = vec![Param::new("W", &mut self.w, &self.dw)];
        if let (Some(b), Some(db)) = (self.b.as_mut(), self.db.as_ref()) {
            out.push(Param::new("b", b, db));
        }
        out
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
    use crate::rng::rng_from_seed;

    #[test]
    fn flattens_and_restores_shape() {
        let mut rng = rng_from_seed(0);
        let mut d = Dense::new(12, 5, &mut rng).unwrap();
        let x = Tensor::ones(&[2, 3, 2, 2]);
        let y = d.forward(&x, None).unwrap();
        assert_eq!(y.shape, vec![2, 5]);
        let dx = d.backward(&Tensor::ones(&[2, 5])).unwrap();
        assert_eq!(dx.shape, vec![2, 3, 2, 2]);
    }

    #[test]
    fn backward_without_forward_is_state_error() {
        let mut d = Dense::new(3, 2, &mut rng_from_seed(0)).unwrap();
        assert!(matches!(
            d.backward(&Tensor::ones(&[1, 2])),
            Err(NnError::State(_))
        ));
    }

    #[test]
    fn wrong_feature_count_is_shape_error() {
        let mut d = Dense::new(3, 2, &mut rng_from_seed(0)).unwrap();
        assert!(matches!(
            d.forward(&Tensor::ones(&[4, 5]), None),
            Err(NnError::Shape(_))
        ));
    }

    #[test]
    fn no_bias_variant_has_single_param() {
        let d = Dense::with_options(3, 2, false, WeightInit::HeNormal, &mut rng_from_seed(0)).unwrap();
        assert_eq!(d.params().len(), 1);
    }
}
