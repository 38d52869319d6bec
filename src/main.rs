use manualgrad::config::Config;
use manualgrad::data::Dataset;
use manualgrad::error::{NnError, Result};
use manualgrad::models::{build_model, presets};
use manualgrad::optim::{build_optimizer, build_scheduler};
use manualgrad::rng::{rng_from_seed, seed_from_env};
use manualgrad::train::{build_callbacks, evaluate, TrainOptions, Trainer};
use manualgrad::weights::{self, ArchInfo};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

const USAGE: &str = "Usage: manualgrad <train|evaluate|export> --config <file> [--weights <file>] [--out <dir>]";

struct Args {
    mode: String,
    config: Option<PathBuf>,
    weights: Option<PathBuf>,
    out: Option<PathBuf>,
}

fn parse_args<I>(mut args: I) -> Option<Args>
where
    I: Iterator<Item = String>,
{
    let mode = args.next()?;
    let mut parsed = Args {
        mode,
        config: None,
        weights: None,
        out: None,
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => parsed.config = args.next().map(PathBuf::from),
            "--weights" => parsed.weights = args.next().map(PathBuf::from),
            "--out" => parsed.out = args.next().map(PathBuf::from),
            other => log::warn!("ignoring unknown argument '{other}'"),
        }
    }
    Some(parsed)
}

/// Load one JSON split and check its samples match the preset's input.
fn load_split(path: &Option<PathBuf>, what: &str, model_name: &str) -> Result<Dataset> {
    let path = path
        .as_ref()
        .ok_or_else(|| NnError::Config(format!("no {what} dataset configured under [data]")))?;
    let ds = Dataset::load_json(path)?.into_nchw()?;
    let expected = presets::input_shape(model_name)?;
    if ds.x.shape[1..] != expected[..] {
        return Err(NnError::Shape(format!(
            "{what} samples have shape {:?}, {model_name} expects {expected:?}",
            &ds.x.shape[1..]
        )));
    }
    Ok(ds)
}

fn run(args: Args) -> Result<()> {
    let cfg = match &args.config {
        Some(path) => Config::from_path(path)?,
        None => {
            let cfg = Config::default();
            cfg.validate()?;
            cfg
        }
    };
    let model_name = cfg.model_name()?;
    let seed = seed_from_env(cfg.seed);
    let mut rng = rng_from_seed(seed);
    let mut model = build_model(&model_name, cfg.num_classes, &mut rng)?;
    log::info!("model {model_name} (seed {seed})\n{}", model.describe());

    if let Some(path) = &args.weights {
        weights::load_weights(path, &mut model)?;
    }

    match args.mode.as_str() {
        "train" => {
            let train = load_split(&cfg.data.train, "train", &model_name)?;
            let val = match &cfg.data.val {
                Some(_) => Some(load_split(&cfg.data.val, "val", &model_name)?),
                None => None,
            };
            let mut optimizer = build_optimizer(&cfg.train)?;
            let options = TrainOptions {
                epochs: cfg.train.epochs,
                batch_size: cfg.train.batch_size,
                num_classes: cfg.num_classes,
                log_path: cfg.data.log_csv.clone(),
                ..TrainOptions::default()
            };
            let mut trainer = Trainer::new(options)?.with_callbacks(build_callbacks(&cfg.callbacks));
            if let Some(spec) = &cfg.scheduler {
                trainer = trainer.with_scheduler(build_scheduler(spec, optimizer.lr())?);
            }
            let history = trainer.fit(&mut model, optimizer.as_mut(), &train, val.as_ref(), &mut rng)?;
            if let Some(epoch) = history.stop_requested_at {
                log::info!("a callback requested stopping at epoch {epoch}");
            }
            if let Some(out) = &args.out {
                weights::save_weights(out, &model)?;
            }
        }
        "evaluate" => {
            let test = load_split(&cfg.data.test, "test", &model_name)?;
            let e = evaluate(&mut model, &test, cfg.train.batch_size, cfg.num_classes)?;
            println!(
                "{{\"loss\":{:.6},\"acc\":{:.6},\"top5\":{:.6}}}",
                e.loss, e.acc, e.top5
            );
        }
        "export" => {
            let out = args.out.unwrap_or_else(|| PathBuf::from("export"));
            let arch = ArchInfo::new(&model_name, &cfg.dataset, cfg.num_classes, &model);
            weights::export_model(&out, &model, &arch)?;
            log::info!("exported {model_name} to {}", out.display());
        }
        other => {
            return Err(NnError::Config(format!(
                "unknown mode '{other}', expected train | evaluate | export"
            )))
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let Some(args) = parse_args(env::args().skip(1)) else {
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    };
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
