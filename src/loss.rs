//! Losses with hand-written gradients.

use crate::error::{NnError, Result};
use crate::math;
use crate::tensor::Tensor;

fn check_pair(pred: &Tensor, target: &Tensor, what: &str) -> Result<()> {
    if pred.shape != target.shape {
        return Err(NnError::shape(format!(
            "{what}: prediction {:?} and target {:?} differ",
            pred.shape, target.shape
        )));
    }
    Ok(())
}

/// Mean cross entropy between `softmax(logits)` and one-hot targets, both
/// `(N, C)`. Uses a max-shifted log-softmax so large logits stay finite.
pub fn softmax_cross_entropy(logits: &Tensor, y_onehot: &Tensor) -> Result<f64> {
    let (n, _) = logits.dims2()?;
    check_pair(logits, y_onehot, "softmax_cross_entropy")?;
    if n == 0 {
        return Err(NnError::shape("softmax_cross_entropy of an empty batch"));
    }
    let log_probs = math::log_softmax_rows(logits)?;
    Ok(-log_probs.dot(y_onehot)? / n as f64)
}

/// Gradient of [`softmax_cross_entropy`] with respect to the logits:
/// `(softmax(logits) - y) / N`.
pub fn softmax_cross_entropy_backward(logits: &Tensor, y_onehot: &Tensor) -> Result<Tensor> {
    let (n, _) = logits.dims2()?;
    check_pair(logits, y_onehot, "softmax_cross_entropy_backward")?;
    let inv_n = 1.0 / n.max(1) as f64;
    math::softmax_last_axis(logits)?.zip_map(y_onehot, |p, y| (p - y) * inv_n)
}

/// Mean squared error over all elements.
pub fn mse(pred: &Tensor, target: &Tensor) -> Result<f64> {
    check_pair(pred, target, "mse")?;
    let diff = pred.zip_map(target, |p, t| p - t)?;
    Ok(diff.sum_squares() / pred.len().max(1) as f64)
}

/// `2 * (pred - target) / num_elements`
pub fn mse_backward(pred: &Tensor, target: &Tensor) -> Result<Tensor> {
    check_pair(pred, target, "mse_backward")?;
    let scale = 2.0 / pred.len().max(1) as f64;
    pred.zip_map(target, |p, t| scale * (p - t))
}

/// A scalar loss with its gradient with respect to the prediction.
pub trait Loss {
    fn forward(&self, pred: &Tensor, target: &Tensor) -> Result<f64>;
    fn backward(&self, pred: &Tensor, target: &Tensor) -> Result<Tensor>;
}

/// Fused softmax + cross entropy on raw logits.
#[derive(Clone, Copy, Debug, Default)]
pub struct SoftmaxCrossEntropy;

impl Loss for SoftmaxCrossEntropy {
    fn forward(&self, pred: &Tensor, target: &Tensor) -> Result<f64> {
        softmax_cross_entropy(pred, target)
    }

    fn backward(&self, pred: &Tensor, target: &Tensor) -> Result<Tensor> {
        softmax_cross_entropy_backward(pred, target)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MeanSquaredError;

impl Loss for MeanSquaredError {
    fn forward(&self, pred: &Tensor, target: &Tensor) -> Result<f64> {
        mse(pred, target)
    }

    fn backward(&self, pred: &Tensor, target: &Tensor) -> Result<Tensor> {
        mse_backward(pred, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_logits_give_log_c() {
        let logits = Tensor::zeros(&[2, 4]);
        let y = math::one_hot(&[1, 3], 4).unwrap();
        let loss = softmax_cross_entropy(&logits, &y).unwrap();
        assert!((loss - 4f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn huge_logits_stay_finite() {
        let logits = Tensor::new(vec![1000.0, -1000.0, 0.0], vec![1, 3]).unwrap();
        let y = math::one_hot(&[0], 3).unwrap();
        let loss = softmax_cross_entropy(&logits, &y).unwrap();
        assert!(loss.is_finite());
        let g = softmax_cross_entropy_backward(&logits, &y).unwrap();
        assert!(g.data.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn mse_and_gradient() {
        let p = Tensor::new(vec![1.0, 2.0], vec![2]).unwrap();
        let t = Tensor::new(vec![0.0, 0.0], vec![2]).unwrap();
        assert!((mse(&p, &t).unwrap() - 2.5).abs() < 1e-12);
        assert_eq!(mse_backward(&p, &t).unwrap().data, vec![1.0, 2.0]);
    }

    #[test]
    fn mismatched_target_is_shape_error() {
        let p = Tensor::zeros(&[2, 3]);
        let t = Tensor::zeros(&[2, 4]);
        assert!(matches!(softmax_cross_entropy(&p, &t), Err(NnError::Shape(_))));
    }
}
