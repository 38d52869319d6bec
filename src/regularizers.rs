//! Penalties and constraints applied outside the optimizer step.
//!
//! Parameter names are qualified (`"3.Dense.W"`); only the last segment is
//! compared against the exclusion list, case-insensitively.

use crate::error::Result;
use crate::layers::Param;
use crate::tensor::Tensor;
use std::collections::BTreeMap;

/// Biases and BatchNorm affine parameters are not penalized by default.
pub const DEFAULT_EXCLUDE: &[&str] = &["b", "bias", "beta", "gamma"];

fn is_excluded(name: &str, exclude: &[&str]) -> bool {
    let local = name.rsplit('.').next().unwrap_or(name);
    exclude.iter().any(|e| e.eq_ignore_ascii_case(local))
}

/// Sum of squared weights (no 1/2 factor). Add `lambda * l2_penalty(..)` to
/// the data loss.
pub fn l2_penalty(params: &BTreeMap<String, &Tensor>, exclude: &[&str]) -> f64 {
    params
        .iter()
        .filter(|(k, _)| !is_excluded(k, exclude))
        .map(|(_, t)| t.sum_squares())
        .sum()
}

/// Sum of absolute weights.
pub fn l1_penalty(params: &BTreeMap<String, &Tensor>, exclude: &[&str]) -> f64 {
    params
        .iter()
        .filter(|(k, _)| !is_excluded(k, exclude))
        .map(|(_, t)| t.data.iter().map(|v| v.abs()).sum::<f64>())
        .sum()
}

/// Rescale every non-excluded parameter whose L2 norm exceeds `max_value`
/// down to exactly `max_value`. Storage is modified in place.
pub fn max_norm(params: &mut [Param<'_>], max_value: f64, exclude: &[&str]) -> Result<()> {
    for p in params.iter_mut() {
        if is_excluded(&p.name, exclude) {
            continue;
        }
        let norm = p.value.norm_l2();
        if norm > max_value && norm > 0.0 {
            p.value.scale_inplace(max_value / norm);
        }
    }
    Ok(())
}
