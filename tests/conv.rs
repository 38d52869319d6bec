mod common;

use common::{dot_loss, numeric_grad, random_tensor, rel_error};
use manualgrad::init::WeightInit;
use manualgrad::layers::{Conv2d, Layer};
use manualgrad::rng::rng_from_seed;
use manualgrad::NnError;

#[test]
fn conv_output_shape_follows_stride_and_padding() {
    let mut rng = rng_from_seed(0);
    let mut conv = Conv2d::new(1, 6, 5, 1, 2, &mut rng).unwrap();
    let y = conv.forward(&random_tensor(&[2, 1, 28, 28], &mut rng), None).unwrap();
    assert_eq!(y.shape, vec![2, 6, 28, 28]);

    let mut strided = Conv2d::new(3, 4, 3, 2, 0, &mut rng).unwrap();
    let y = strided.forward(&random_tensor(&[1, 3, 7, 7], &mut rng), None).unwrap();
    assert_eq!(y.shape, vec![1, 4, 3, 3]);
}

#[test]
fn conv_gradients_match_finite_differences() {
    let mut rng = rng_from_seed(7);
    let mut conv = Conv2d::new(2, 3, 3, 2, 1, &mut rng).unwrap();
    let x = random_tensor(&[2, 2, 5, 5], &mut rng);
    let y = conv.forward(&x, Some(true)).unwrap();
    let r = random_tensor(&y.shape, &mut rng);
    let dx = conv.backward(&r).unwrap();
    let grads: Vec<_> = conv.grads().into_iter().map(|(_, g)| g.clone()).collect();

    let num_dx = numeric_grad(&x, 1e-5, |xp| dot_loss(&conv.forward(xp, None).unwrap(), &r));
    assert!(rel_error(&dx, &num_dx) < 1e-6);

    let w0 = conv.w.clone();
    let num_dw = numeric_grad(&w0, 1e-5, |wp| {
        conv.w = wp.clone();
        dot_loss(&conv.forward(&x, None).unwrap(), &r)
    });
    conv.w = w0;
    assert!(rel_error(&grads[0], &num_dw) < 1e-6);

    let b0 = conv.b.clone().unwrap();
    let num_db = numeric_grad(&b0, 1e-5, |bp| {
        conv.b = Some(bp.clone());
        dot_loss(&conv.forward(&x, None).unwrap(), &r)
    });
    assert!(rel_error(&grads[1], &num_db) < 1e-6);
}

#[test]
fn rectangular_kernel_without_bias() {
    let mut rng = rng_from_seed(3);
    let mut conv =
        Conv2d::with_kernel(1, 2, (2, 3), 1, 0, false, WeightInit::XavierUniform, &mut rng).unwrap();
    assert_eq!(conv.params().len(), 1);
    let x = random_tensor(&[1, 1, 4, 5], &mut rng);
    let y = conv.forward(&x, None).unwrap();
    assert_eq!(y.shape, vec![1, 2, 3, 3]);
    let dx = conv.backward(&random_tensor(&y.shape, &mut rng)).unwrap();
    assert_eq!(dx.shape, x.shape);
}

#[test]
fn channel_mismatch_is_shape_error() {
    let mut rng = rng_from_seed(1);
    let mut conv = Conv2d::new(3, 1, 1, 1, 0, &mut rng).unwrap();
    let x = random_tensor(&[1, 2, 4, 4], &mut rng);
    assert!(matches!(conv.forward(&x, None), Err(NnError::Shape(_))));
}

#[test]
fn non_positive_output_size_is_shape_error() {
    let mut rng = rng_from_seed(2);
    let mut conv = Conv2d::new(1, 1, 5, 1, 0, &mut rng).unwrap();
    let x = random_tensor(&[1, 1, 3, 3], &mut rng);
    assert!(matches!(conv.forward(&x, None), Err(NnError::Shape(_))));
}

#[test]
fn rank_three_input_is_shape_error() {
    let mut rng = rng_from_seed(4);
    let mut conv = Conv2d::new(1, 1, 1, 1, 0, &mut rng).unwrap();
    let x = random_tensor(&[1, 4, 4], &mut rng);
    assert!(matches!(conv.forward(&x, None), Err(NnError::Shape(_))));
}

#[test]
fn rejected_gradient_keeps_the_forward_cache() {
    let mut rng = rng_from_seed(8);
    let mut conv = Conv2d::new(2, 3, 3, 1, 1, &mut rng).unwrap();
    let y = conv.forward(&random_tensor(&[1, 2, 4, 4], &mut rng), Some(true)).unwrap();
    assert!(matches!(
        conv.backward(&random_tensor(&[1, 4, 4, 3], &mut rng)),
        Err(NnError::Shape(_))
    ));
    let dx = conv.backward(&random_tensor(&y.shape, &mut rng)).unwrap();
    assert_eq!(dx.shape, vec![1, 2, 4, 4]);
}
