use crate::error::{NnError, Result};
use crate::math;
use crate::tensor::Tensor;

fn check_labels(scores: &Tensor, labels: &[usize]) -> Result<(usize, usize)> {
    let (n, c) = scores.dims2()?;
    if labels.len() != n {
        return Err(NnError::shape(format!(
            "{} labels for {} score rows",
            labels.len(),
            n
        )));
    }
    Ok((n, c))
}

/// Top-1 accuracy in `[0, 1]` for `(N, C)` logits or probabilities.
pub fn accuracy(scores: &Tensor, labels: &[usize]) -> Result<f64> {
    let (n, _) = check_labels(scores, labels)?;
    if n == 0 {
        return Ok(0.0);
    }
    let correct = math::argmax_rows(scores)?
        .iter()
        .zip(labels)
        .filter(|(p, y)| p == y)
        .count();
    Ok(correct as f64 / n as f64)
}

/// Fraction of rows whose label is among the `k` highest scores. `k` is
/// clamped to `[1, C]`.
pub fn topk_accuracy(scores: &Tensor, labels: &[usize], k: usize) -> Result<f64> {
    let (n, c) = check_labels(scores, labels)?;
    if n == 0 || c == 0 {
        return Ok(0.0);
    }
    let k = k.clamp(1, c);
    let mut correct = 0usize;
    for (row, &y) in scores.data.chunks(c).zip(labels) {
        if y >= c {
            continue;
        }
        // the label is in the top k iff fewer than k scores beat it
        let target = row[y];
        let better = row.iter().filter(|&&v| v > target).count();
        if better < k {
            correct += 1;
        }
    }
    Ok(correct as f64 / n as f64)
}
