mod common;

use common::{dot_loss, numeric_grad, random_tensor, rel_error};
use manualgrad::layers::{Dense, Layer};
use manualgrad::rng::rng_from_seed;
use manualgrad::NnError;

const EPS: f64 = 1e-6;

#[test]
fn dense_gradients_match_finite_differences() {
    let mut rng = rng_from_seed(0);
    let mut layer = Dense::new(5, 3, &mut rng).unwrap();
    let x = random_tensor(&[4, 5], &mut rng);
    let r = random_tensor(&[4, 3], &mut rng);

    layer.forward(&x, Some(true)).unwrap();
    let dx = layer.backward(&r).unwrap();
    let grads: Vec<_> = layer.grads().into_iter().map(|(_, g)| g.clone()).collect();

    let num_dx = numeric_grad(&x, EPS, |xp| dot_loss(&layer.forward(xp, None).unwrap(), &r));
    assert!(rel_error(&dx, &num_dx) < 1e-7);

    let w0 = layer.w.clone();
    let num_dw = numeric_grad(&w0, EPS, |wp| {
        layer.w = wp.clone();
        dot_loss(&layer.forward(&x, None).unwrap(), &r)
    });
    layer.w = w0;
    assert!(rel_error(&grads[0], &num_dw) < 1e-7);

    let b0 = layer.b.clone().unwrap();
    let num_db = numeric_grad(&b0, EPS, |bp| {
        layer.b = Some(bp.clone());
        dot_loss(&layer.forward(&x, None).unwrap(), &r)
    });
    assert!(rel_error(&grads[1], &num_db) < 1e-7);
}

#[test]
fn dense_flattens_image_input_and_restores_gradient_shape() {
    let mut rng = rng_from_seed(1);
    let mut layer = Dense::new(2 * 3 * 3, 4, &mut rng).unwrap();
    let x = random_tensor(&[2, 2, 3, 3], &mut rng);
    let y = layer.forward(&x, Some(true)).unwrap();
    assert_eq!(y.shape, vec![2, 4]);
    let dx = layer.backward(&random_tensor(&[2, 4], &mut rng)).unwrap();
    assert_eq!(dx.shape, x.shape);
}

#[test]
fn dense_rejects_wrong_feature_count() {
    let mut rng = rng_from_seed(2);
    let mut layer = Dense::new(3, 2, &mut rng).unwrap();
    let x = random_tensor(&[2, 4], &mut rng);
    assert!(matches!(layer.forward(&x, None), Err(NnError::Shape(_))));
}

#[test]
fn backward_without_forward_is_state_error() {
    let mut rng = rng_from_seed(3);
    let mut layer = Dense::new(3, 2, &mut rng).unwrap();
    let g = random_tensor(&[1, 2], &mut rng);
    assert!(matches!(layer.backward(&g), Err(NnError::State(_))));

    // the cache is consumed by the first backward
    let x = random_tensor(&[1, 3], &mut rng);
    layer.forward(&x, None).unwrap();
    layer.backward(&g).unwrap();
    assert!(matches!(layer.backward(&g), Err(NnError::State(_))));
}

#[test]
fn rejected_gradient_keeps_the_forward_cache() {
    let mut rng = rng_from_seed(3);
    let mut layer = Dense::new(5, 3, &mut rng).unwrap();
    layer.forward(&random_tensor(&[4, 5], &mut rng), Some(true)).unwrap();
    assert!(matches!(
        layer.backward(&random_tensor(&[3, 4], &mut rng)),
        Err(NnError::Shape(_))
    ));
    let dx = layer.backward(&random_tensor(&[4, 3], &mut rng)).unwrap();
    assert_eq!(dx.shape, vec![4, 5]);
}
