//! Serving helper: the only entry point an inference consumer needs.

use crate::error::{NnError, Result};
use crate::math;
use crate::models::Sequential;
use crate::tensor::Tensor;

/// Class probabilities for every row of `x`, from an eval-mode forward.
pub fn predict_proba(model: &mut Sequential, x: &Tensor) -> Result<Tensor> {
    let logits = model.forward(x, Some(false))?;
    math::softmax_last_axis(&logits)
}

/// The `k` most likely `(class, probability)` pairs per row, most likely
/// first. `k` is capped at the number of classes.
pub fn predict_top_k(model: &mut Sequential, x: &Tensor, k: usize) -> Result<Vec<Vec<(usize, f64)>>> {
    if k == 0 {
        return Err(NnError::config("predict_top_k needs k >= 1"));
    }
    let probs = predict_proba(model, x)?;
    let (_, c) = probs.dims2()?;
    Ok(probs
        .data
        .chunks(c.max(1))
        .map(|row| {
            let mut ranked: Vec<(usize, f64)> = row.iter().copied().enumerate().collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
            ranked.truncate(k);
            ranked
        })
        .collect())
}
