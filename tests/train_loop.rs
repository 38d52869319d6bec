use manualgrad::data::Dataset;
use manualgrad::layers::{Dense, Layer, Relu};
use manualgrad::models::Sequential;
use manualgrad::optim::{Optimizer, Sgd, StepLr};
use manualgrad::rng::rng_from_seed;
use manualgrad::tensor::Tensor;
use manualgrad::train::{
    evaluate, EarlyStopping, EpochState, ModelCheckpoint, ReduceLrOnPlateau, TrainOptions,
    Trainer, TrainingControl,
};
use manualgrad::weights;
use rand::Rng;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

/// Two classes split by the sign of `x0 + x1`.
fn synthetic(n: usize, seed: u64) -> Dataset {
    let mut rng = rng_from_seed(seed);
    let x = Tensor::from_fn(&[n, 4], |_| rng.gen_range(-1.0..1.0));
    let y = x
        .data
        .chunks(4)
        .map(|row| usize::from(row[0] + row[1] > 0.0))
        .collect();
    Dataset::new(x, y).unwrap()
}

fn mlp(seed: u64) -> Sequential {
    let mut rng = rng_from_seed(seed);
    let layers: Vec<Box<dyn Layer>> = vec![
        Box::new(Dense::new(4, 16, &mut rng).unwrap()),
        Box::new(Relu::new()),
        Box::new(Dense::new(16, 2, &mut rng).unwrap()),
    ];
    Sequential::new(layers).unwrap()
}

fn options(epochs: usize) -> TrainOptions {
    TrainOptions {
        epochs,
        batch_size: 16,
        num_classes: 2,
        show_progress: false,
        ..TrainOptions::default()
    }
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("manualgrad-{name}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn training_reduces_loss_and_logs_every_epoch() {
    let dir = scratch_dir("fit");
    let log_path = dir.join("reports/results.csv");
    let train = synthetic(256, 1);
    let val = synthetic(64, 2);
    let mut model = mlp(3);
    let mut opt = Sgd::new(0.05, 0.9, false, 0.0, None).unwrap();

    let mut trainer = Trainer::new(TrainOptions {
        log_path: Some(log_path.clone()),
        ..options(15)
    })
    .unwrap();
    let history = trainer
        .fit(&mut model, &mut opt, &train, Some(&val), &mut rng_from_seed(4))
        .unwrap();

    assert_eq!(history.len(), 15);
    let losses = history.series("train_loss").unwrap();
    assert!(losses[14] < losses[0]);
    let last = history.last().unwrap();
    assert!(last.train_acc > 0.85, "train_acc {}", last.train_acc);
    assert!(last.val_acc > 0.8, "val_acc {}", last.val_acc);
    assert!(model.is_training());

    let csv = std::fs::read_to_string(&log_path).unwrap();
    let lines: Vec<_> = csv.lines().collect();
    assert_eq!(lines[0], "epoch,train_loss,train_acc,val_loss,val_acc");
    assert_eq!(lines.len(), 16);
    assert!(lines[1].starts_with("1,"));
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn missing_validation_set_gives_nan_metrics() {
    let train = synthetic(32, 5);
    let mut model = mlp(6);
    let mut opt = Sgd::plain(0.05).unwrap();
    let history = Trainer::new(options(2))
        .unwrap()
        .fit(&mut model, &mut opt, &train, None, &mut rng_from_seed(0))
        .unwrap();
    let last = history.last().unwrap();
    assert!(last.val_loss.is_nan() && last.val_acc.is_nan());
    assert!(last.train_loss.is_finite());
}

#[test]
fn stop_requests_are_advisory_unless_honored() {
    let train = synthetic(32, 7);

    // val_loss is NaN without a validation set, so it never improves
    let mut model = mlp(8);
    let mut opt = Sgd::plain(0.05).unwrap();
    let history = Trainer::new(options(4))
        .unwrap()
        .with_callback(EarlyStopping::new("val_loss", 1))
        .fit(&mut model, &mut opt, &train, None, &mut rng_from_seed(0))
        .unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history.stop_requested_at, Some(1));

    let mut model = mlp(8);
    let mut opt = Sgd::plain(0.05).unwrap();
    let history = Trainer::new(TrainOptions {
        honor_stop_requests: true,
        ..options(4)
    })
    .unwrap()
    .with_callback(EarlyStopping::new("val_loss", 2))
    .fit(&mut model, &mut opt, &train, None, &mut rng_from_seed(0))
    .unwrap();
    assert_eq!(history.len(), 2);
}

#[test]
fn plateau_callback_lowers_the_learning_rate() {
    let train = synthetic(32, 9);
    let mut model = mlp(10);
    let mut opt = Sgd::plain(0.1).unwrap();
    Trainer::new(options(3))
        .unwrap()
        .with_callback(ReduceLrOnPlateau::new("val_acc", 0.5, 1).with_min_lr(0.02))
        .fit(&mut model, &mut opt, &train, None, &mut rng_from_seed(0))
        .unwrap();
    // 0.1 -> 0.05 -> 0.025 -> floor 0.02
    assert!((opt.lr() - 0.02).abs() < 1e-12);
}

#[test]
fn closures_see_each_epoch_and_scheduler_runs_last() {
    let train = synthetic(32, 11);
    let mut model = mlp(12);
    let mut opt = Sgd::plain(0.1).unwrap();
    let seen: Rc<RefCell<Vec<(usize, f64)>>> = Rc::default();
    let sink = Rc::clone(&seen);

    Trainer::new(options(3))
        .unwrap()
        .with_callback(
            move |state: &EpochState,
                  _model: &Sequential,
                  control: &mut TrainingControl|
                  -> manualgrad::Result<()> {
                sink.borrow_mut().push((state.epoch, state.lr));
                control.set_lr(-1.0);
                Ok(())
            },
        )
        .with_scheduler(Box::new(StepLr::new(0.1, 1, 0.5).unwrap()))
        .fit(&mut model, &mut opt, &train, None, &mut rng_from_seed(0))
        .unwrap();

    let seen = seen.borrow();
    assert_eq!(seen.iter().map(|s| s.0).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!((seen[0].1 - 0.1).abs() < 1e-12);
    assert!((seen[1].1 - 0.05).abs() < 1e-12);
    assert!((opt.lr() - 0.0125).abs() < 1e-12);
}

#[test]
fn checkpoint_callback_saves_restorable_weights() {
    let dir = scratch_dir("ckpt");
    let path = dir.join("best.json");
    let train = synthetic(64, 13);
    let mut model = mlp(14);
    let mut opt = Sgd::plain(0.1).unwrap();
    // a single epoch always improves on the initial best
    Trainer::new(options(1))
        .unwrap()
        .with_callback(ModelCheckpoint::new(&path, "train_loss"))
        .fit(&mut model, &mut opt, &train, None, &mut rng_from_seed(0))
        .unwrap();
    assert!(path.exists());

    let mut restored = mlp(99);
    weights::load_weights(&path, &mut restored).unwrap();
    let x = train.x.clone();
    let a = model.forward(&x, Some(false)).unwrap();
    let b = restored.forward(&x, Some(false)).unwrap();
    for (p, q) in a.data.iter().zip(&b.data) {
        assert!((p - q).abs() < 1e-12);
    }
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn evaluate_restores_the_previous_mode() {
    let data = synthetic(20, 15);
    let mut model = mlp(16);
    model.train();
    let e = evaluate(&mut model, &data, 8, 2).unwrap();
    assert!(model.is_training());
    assert!((0.0..=1.0).contains(&e.acc));
    // with two classes every label is in the top five
    assert_eq!(e.top5, 1.0);
}
