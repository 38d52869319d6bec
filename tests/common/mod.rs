#![allow(dead_code)]

use manualgrad::tensor::Tensor;
use rand::Rng;

/// Central finite differences of `f` around `base`, one element at a time.
pub fn numeric_grad(base: &Tensor, eps: f64, mut f: impl FnMut(&Tensor) -> f64) -> Tensor {
    let mut grad = Tensor::zeros_like(base);
    let mut shifted = base.clone();
    for i in 0..base.len() {
        let orig = shifted.data[i];
        shifted.data[i] = orig + eps;
        let plus = f(&shifted);
        shifted.data[i] = orig - eps;
        let minus = f(&shifted);
        shifted.data[i] = orig;
        grad.data[i] = (plus - minus) / (2.0 * eps);
    }
    grad
}

/// `|a - b| / max(|a| + |b|, tiny)` over the flattened tensors.
pub fn rel_error(a: &Tensor, b: &Tensor) -> f64 {
    assert_eq!(a.shape, b.shape);
    let diff = a.zip_map(b, |x, y| x - y).unwrap().norm_l2();
    diff / (a.norm_l2() + b.norm_l2()).max(1e-12)
}

pub fn max_abs(t: &Tensor) -> f64 {
    t.data.iter().fold(0.0, |m, v| m.max(v.abs()))
}

pub fn random_tensor<R: Rng>(shape: &[usize], rng: &mut R) -> Tensor {
    Tensor::from_fn(shape, |_| rng.gen_range(-1.0..1.0))
}

/// Scalar test loss `sum(y * r)`, whose gradient with respect to `y` is `r`.
pub fn dot_loss(y: &Tensor, r: &Tensor) -> f64 {
    y.dot(r).unwrap()
}
