use manualgrad::layers::{BatchNorm2d, Conv2d, Dense, Layer, Relu};
use manualgrad::loss::{softmax_cross_entropy, softmax_cross_entropy_backward};
use manualgrad::math::one_hot;
use manualgrad::models::{build_model, lenet_mnist, Sequential};
use manualgrad::rng::rng_from_seed;
use manualgrad::tensor::Tensor;
use manualgrad::NnError;
use rand::Rng;

#[test]
fn lenet_end_to_end_shapes() {
    let mut rng = rng_from_seed(42);
    let mut model = lenet_mnist(10, &mut rng).unwrap();
    let x = Tensor::from_fn(&[8, 1, 28, 28], |_| rng.gen_range(0.0..1.0));
    let logits = model.forward(&x, Some(true)).unwrap();
    assert_eq!(logits.shape, vec![8, 10]);

    let y = one_hot(&[0, 1, 2, 3, 4, 5, 6, 7], 10).unwrap();
    let loss = softmax_cross_entropy(&logits, &y).unwrap();
    assert!(loss.is_finite() && loss > 0.0);
    let grad = softmax_cross_entropy_backward(&logits, &y).unwrap();
    let dx = model.backward(&grad).unwrap();
    assert_eq!(dx.shape, x.shape);

    let params = model.params();
    let grads = model.grads();
    assert_eq!(params.keys().collect::<Vec<_>>(), grads.keys().collect::<Vec<_>>());
    for (name, p) in &params {
        assert_eq!(p.shape, grads[name].shape, "{name}");
    }
}

#[test]
fn vgg_tiny_accepts_cifar_batches() {
    let mut rng = rng_from_seed(7);
    let mut model = build_model("vgg_tiny_cifar10", 10, &mut rng).unwrap();
    let x = Tensor::from_fn(&[2, 3, 32, 32], |_| rng.gen_range(-1.0..1.0));
    let logits = model.forward(&x, Some(false)).unwrap();
    assert_eq!(logits.shape, vec![2, 10]);
    assert!(!model.is_training());
}

#[test]
fn unknown_preset_is_config_error() {
    let mut rng = rng_from_seed(0);
    assert!(matches!(build_model("resnet", 10, &mut rng), Err(NnError::Config(_))));
}

#[test]
fn empty_model_is_config_error() {
    assert!(matches!(Sequential::new(Vec::new()), Err(NnError::Config(_))));
}

fn small_model(seed: u64) -> Sequential {
    let mut rng = rng_from_seed(seed);
    let layers: Vec<Box<dyn Layer>> = vec![
        Box::new(Conv2d::new(1, 2, 3, 1, 1, &mut rng).unwrap()),
        Box::new(BatchNorm2d::new(2).unwrap()),
        Box::new(Relu::new()),
        Box::new(Dense::new(2 * 4 * 4, 3, &mut rng).unwrap()),
    ];
    Sequential::new(layers).unwrap()
}

#[test]
fn qualified_names_are_stable() {
    let model = small_model(1);
    let names: Vec<_> = model.params().into_keys().collect();
    assert_eq!(
        names,
        vec![
            "0.Conv2D.W",
            "0.Conv2D.b",
            "1.BatchNorm2D.beta",
            "1.BatchNorm2D.gamma",
            "3.Dense.W",
            "3.Dense.b",
        ]
    );
    let buffers: Vec<_> = model.buffers().into_keys().collect();
    assert_eq!(buffers, vec!["1.BatchNorm2D.running_mean", "1.BatchNorm2D.running_var"]);
}

#[test]
fn state_dict_round_trip_restores_outputs() {
    let mut source = small_model(1);
    let mut target = small_model(2);
    let x = Tensor::from_fn(&[2, 1, 4, 4], |i| (i as f64 * 0.37).sin());
    // move the running statistics away from their defaults
    source.forward(&x, Some(true)).unwrap();

    let ptr = target.params()["0.Conv2D.W"].data.as_ptr();
    target.load_state_dict(&source.state_dict()).unwrap();
    target.load_buffers(&source.buffers()).unwrap();
    assert_eq!(target.params()["0.Conv2D.W"].data.as_ptr(), ptr);

    let a = source.forward(&x, Some(false)).unwrap();
    let b = target.forward(&x, Some(false)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn missing_key_is_config_error_and_leaves_model_intact() {
    let source = small_model(1);
    let mut target = small_model(2);
    let before = target.state_dict();
    let mut state = source.state_dict();
    state.remove("3.Dense.b");
    assert!(matches!(target.load_state_dict(&state), Err(NnError::Config(_))));
    assert_eq!(target.state_dict(), before);
}

#[test]
fn shape_mismatch_is_shape_error() {
    let mut target = small_model(2);
    let mut state = target.state_dict();
    state.insert("3.Dense.W".to_string(), Tensor::zeros(&[3, 5]));
    assert!(matches!(target.load_state_dict(&state), Err(NnError::Shape(_))));
}

#[test]
fn num_params_counts_every_scalar() {
    let model = small_model(3);
    // conv 2*1*3*3 + 2, bn 2 + 2, dense 3*32 + 3
    assert_eq!(model.num_params(), 20 + 4 + 99);
}
