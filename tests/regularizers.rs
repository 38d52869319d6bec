use manualgrad::layers::{Dense, Layer};
use manualgrad::models::Sequential;
use manualgrad::regularizers::{l1_penalty, l2_penalty, max_norm, DEFAULT_EXCLUDE};
use manualgrad::rng::rng_from_seed;
use manualgrad::tensor::Tensor;

#[test]
fn max_norm_rescales_in_place() {
    let mut rng = rng_from_seed(0);
    let mut dense = Dense::new(1, 2, &mut rng).unwrap();
    dense.w = Tensor::new(vec![3.0, 4.0], vec![2, 1]).unwrap();
    dense.b = Some(Tensor::new(vec![30.0, 40.0], vec![2]).unwrap());
    let ptr = dense.w.data.as_ptr();

    let mut params = dense.parameters();
    max_norm(&mut params, 2.0, DEFAULT_EXCLUDE).unwrap();
    drop(params);

    assert!((dense.w.norm_l2() - 2.0).abs() < 1e-12);
    assert_eq!(dense.w.data.as_ptr(), ptr);
    // biases are excluded by default
    assert_eq!(dense.b.as_ref().unwrap().norm_l2(), 50.0);
}

#[test]
fn max_norm_leaves_small_parameters_alone() {
    let mut rng = rng_from_seed(1);
    let mut dense = Dense::new(1, 2, &mut rng).unwrap();
    dense.w = Tensor::new(vec![0.3, 0.4], vec![2, 1]).unwrap();
    max_norm(&mut dense.parameters(), 2.0, &[]).unwrap();
    assert_eq!(dense.w.data, vec![0.3, 0.4]);
}

#[test]
fn penalties_over_qualified_names() {
    let mut rng = rng_from_seed(2);
    let mut dense = Dense::new(2, 1, &mut rng).unwrap();
    dense.w = Tensor::new(vec![1.0, -2.0], vec![1, 2]).unwrap();
    dense.b = Some(Tensor::new(vec![5.0], vec![1]).unwrap());
    let layers: Vec<Box<dyn Layer>> = vec![Box::new(dense)];
    let model = Sequential::new(layers).unwrap();

    let params = model.params();
    assert_eq!(l2_penalty(&params, DEFAULT_EXCLUDE), 5.0);
    assert_eq!(l1_penalty(&params, DEFAULT_EXCLUDE), 3.0);
    assert_eq!(l2_penalty(&params, &[]), 30.0);
}
