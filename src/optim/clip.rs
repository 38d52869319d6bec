use crate::tensor::Tensor;

/// Added to the global norm before comparing against the threshold.
pub const CLIP_EPS: f64 = 1e-12;

/// L2 norm of all gradients viewed as one concatenated vector.
pub fn global_norm(grads: &[Tensor]) -> f64 {
    grads.iter().map(Tensor::sum_squares).sum::<f64>().sqrt()
}

/// Rescale `grads` uniformly so their global norm does not exceed
/// `max_norm`. Returns the norm measured before clipping.
pub fn clip_grad_norm(grads: &mut [Tensor], max_norm: f64) -> f64 {
    let norm = global_norm(grads) + CLIP_EPS;
    if norm > max_norm {
        let scale = max_norm / norm;
        for g in grads.iter_mut() {
            g.scale_inplace(scale);
        }
    }
    norm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clips_to_threshold() {
        let mut grads = vec![
            Tensor::new(vec![3.0], vec![1]).unwrap(),
            Tensor::new(vec![4.0], vec![1]).unwrap(),
        ];
        let before = clip_grad_norm(&mut grads, 1.0);
        assert!((before - 5.0).abs() < 1e-9);
        assert!((global_norm(&grads) - 1.0).abs() < 1e-9);
        // direction is kept
        assert!((grads[0].data[0] / grads[1].data[0] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn small_gradients_untouched() {
        let mut grads = vec![Tensor::new(vec![0.1, 0.2], vec![2]).unwrap()];
        clip_grad_norm(&mut grads, 10.0);
        assert_eq!(grads[0].data, vec![0.1, 0.2]);
    }
}
