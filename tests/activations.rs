mod common;

use common::{dot_loss, numeric_grad, random_tensor, rel_error};
use manualgrad::layers::{Dropout, Layer, LeakyRelu, Relu, Softmax, Tanh};
use manualgrad::rng::rng_from_seed;
use manualgrad::tensor::Tensor;
use manualgrad::NnError;

fn check_gradient(layer: &mut dyn Layer, shape: &[usize], seed: u64) {
    let mut rng = rng_from_seed(seed);
    let x = random_tensor(shape, &mut rng);
    let y = layer.forward(&x, None).unwrap();
    let r = random_tensor(&y.shape, &mut rng);
    let dx = layer.backward(&r).unwrap();
    let num = numeric_grad(&x, 1e-6, |xp| dot_loss(&layer.forward(xp, None).unwrap(), &r));
    assert!(rel_error(&dx, &num) < 1e-6, "{}", layer.kind());
}

#[test]
fn activation_gradients_match_finite_differences() {
    check_gradient(&mut Relu::new(), &[3, 7], 41);
    check_gradient(&mut LeakyRelu::new(0.1), &[2, 2, 3, 3], 42);
    check_gradient(&mut Tanh::new(), &[4, 5], 43);
    check_gradient(&mut Softmax::new(), &[3, 6], 44);
}

#[test]
fn leaky_relu_scales_negative_inputs() {
    let mut layer = LeakyRelu::new(0.2);
    let x = Tensor::new(vec![-2.0, 0.0, 3.0], vec![1, 3]).unwrap();
    let y = layer.forward(&x, None).unwrap();
    assert_eq!(y.data, vec![-0.4, 0.0, 3.0]);
}

#[test]
fn softmax_rows_sum_to_one() {
    let mut rng = rng_from_seed(45);
    let mut layer = Softmax::new();
    let y = layer.forward(&random_tensor(&[5, 4], &mut rng), None).unwrap();
    for row in y.data.chunks(4) {
        assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }
}

#[test]
fn dropout_is_identity_in_eval_mode() {
    let mut rng = rng_from_seed(46);
    let mut drop = Dropout::new(0.5, &mut rng).unwrap();
    let x = random_tensor(&[4, 8], &mut rng);
    let y = drop.forward(&x, Some(false)).unwrap();
    assert_eq!(y, x);
    let g = Tensor::ones(&[4, 8]);
    assert_eq!(drop.backward(&g).unwrap(), g);
}

#[test]
fn dropout_backward_reuses_forward_mask() {
    let mut rng = rng_from_seed(47);
    let mut drop = Dropout::new(0.5, &mut rng).unwrap();
    let x = Tensor::ones(&[10, 10]);
    let y = drop.forward(&x, Some(true)).unwrap();
    let dx = drop.backward(&Tensor::ones(&[10, 10])).unwrap();
    // kept units are scaled by 1 / (1 - p) in both directions
    assert_eq!(y, dx);
    assert!(y.data.iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-12));
}

#[test]
fn softmax_backward_after_failed_forward_is_state_error() {
    let mut layer = Softmax::new();
    let x = Tensor::ones(&[2, 3]);
    layer.forward(&x, None).unwrap();
    let scalar = Tensor::new(vec![1.0], vec![]).unwrap();
    assert!(matches!(layer.forward(&scalar, None), Err(NnError::Shape(_))));
    assert!(matches!(
        layer.backward(&Tensor::ones(&[2, 3])),
        Err(NnError::State(_))
    ));
}

#[test]
fn transposed_gradient_is_shape_error() {
    let mut rng = rng_from_seed(46);
    let x = random_tensor(&[3, 7], &mut rng);
    let g = Tensor::ones(&[7, 3]);
    let mut layers: Vec<Box<dyn Layer>> = vec![
        Box::new(Relu::new()),
        Box::new(LeakyRelu::new(0.1)),
        Box::new(Tanh::new()),
        Box::new(Softmax::new()),
        Box::new(Dropout::new(0.5, &mut rng).unwrap()),
    ];
    for layer in layers.iter_mut() {
        layer.forward(&x, Some(true)).unwrap();
        assert!(
            matches!(layer.backward(&g), Err(NnError::Shape(_))),
            "{}",
            layer.kind()
        );
        // the cache survives a rejected gradient
        assert!(layer.backward(&Tensor::ones(&[3, 7])).is_ok(), "{}", layer.kind());
    }
}

#[test]
fn dropout_eval_backward_checks_shape() {
    let mut layer = Dropout::new(0.5, &mut rng_from_seed(47)).unwrap();
    layer.forward(&Tensor::ones(&[3, 7]), Some(false)).unwrap();
    assert!(matches!(
        layer.backward(&Tensor::ones(&[7, 3])),
        Err(NnError::Shape(_))
    ));
}
