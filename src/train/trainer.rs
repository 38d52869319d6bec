use super::callbacks::{Callback, EpochState, TrainingControl};
use super::history::{EpochMetrics, History, MetricsLogger};
use crate::data::Dataset;
use crate::error::{NnError, Result};
use crate::loss;
use crate::math;
use crate::metrics;
use crate::models::Sequential;
use crate::optim::{clamp_lr, LearningRateSchedule, Optimizer};
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use std::path::PathBuf;
use std::time::Instant;

/// Loop settings for [`Trainer::fit`].
#[derive(Clone, Debug)]
pub struct TrainOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub num_classes: usize,
    /// Per-epoch CSV log, truncated at the start of `fit`.
    pub log_path: Option<PathBuf>,
    /// Break out of the loop once a callback requested a stop. Off by
    /// default: the request is only recorded in the history.
    pub honor_stop_requests: bool,
    pub show_progress: bool,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 128,
            num_classes: 10,
            log_path: None,
            honor_stop_requests: false,
            show_progress: true,
        }
    }
}

/// Loss and accuracies of a forward-only pass over a dataset.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Evaluation {
    pub loss: f64,
    pub acc: f64,
    pub top5: f64,
}

/// Mini-batch training loop with end-of-epoch hooks.
pub struct Trainer {
    options: TrainOptions,
    callbacks: Vec<Box<dyn Callback>>,
    scheduler: Option<Box<dyn LearningRateSchedule>>,
}

impl Trainer {
    pub fn new(options: TrainOptions) -> Result<Self> {
        if options.batch_size == 0 {
            return Err(NnError::config("batch_size must be >= 1"));
        }
        if options.num_classes == 0 {
            return Err(NnError::config("num_classes must be >= 1"));
        }
        Ok(Self {
            options,
            callbacks: Vec::new(),
            scheduler: None,
        })
    }

    pub fn options(&self) -> &TrainOptions {
        &self.options
    }

    pub fn with_callback(mut self, callback: impl Callback + 'static) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    pub fn with_callbacks(mut self, callbacks: Vec<Box<dyn Callback>>) -> Self {
        self.callbacks.extend(callbacks);
        self
    }

    pub fn with_scheduler(mut self, scheduler: Box<dyn LearningRateSchedule>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Train `model` for the configured number of epochs.
    ///
    /// Each epoch shuffles the training set, runs forward, loss, backward and
    /// an optimizer step per mini-batch, then evaluates on `val` when given
    /// (NaN metrics otherwise). The epoch record goes to the history and
    /// the CSV log before callbacks run; the scheduler runs last.
    pub fn fit<R: Rng + ?Sized>(
        &mut self,
        model: &mut Sequential,
        optimizer: &mut dyn Optimizer,
        train: &Dataset,
        val: Option<&Dataset>,
        rng: &mut R,
    ) -> Result<History> {
        if train.is_empty() {
            return Err(NnError::shape("cannot train on an empty dataset"));
        }
        let opts = self.options.clone();
        let mut logger = match &opts.log_path {
            Some(path) => Some(MetricsLogger::create(path)?),
            None => None,
        };
        let mut history = History::default();
        let num_batches = train.len().div_ceil(opts.batch_size);

        model.train();
        for epoch in 1..=opts.epochs {
            let started = Instant::now();
            let epoch_lr = optimizer.lr();
            let pb = progress_bar(num_batches, opts.show_progress);
            pb.set_message(format!("epoch {epoch}/{}", opts.epochs));

            let order = train.shuffled_indices(rng);
            let mut total_loss = 0.0;
            let mut total_correct = 0.0;
            for (start, end) in math::make_batches(train.len(), opts.batch_size) {
                let (xb, yb) = train.batch(&order[start..end])?;
                let y_one = math::one_hot(&yb, opts.num_classes)?;

                let logits = model.forward(&xb, Some(true))?;
                let batch_loss = loss::softmax_cross_entropy(&logits, &y_one)?;
                let grad = loss::softmax_cross_entropy_backward(&logits, &y_one)?;
                model.backward(&grad)?;
                optimizer.step(&mut model.parameters())?;

                let bs = (end - start) as f64;
                total_loss += batch_loss * bs;
                total_correct += metrics::accuracy(&logits, &yb)? * bs;
                pb.inc(1);
            }
            pb.finish_and_clear();

            let seen = train.len() as f64;
            let (val_loss, val_acc) = match val {
                Some(v) if !v.is_empty() => {
                    let e = evaluate(model, v, opts.batch_size, opts.num_classes)?;
                    (e.loss, e.acc)
                }
                _ => (f64::NAN, f64::NAN),
            };
            let record = EpochMetrics {
                epoch,
                train_loss: total_loss / seen,
                train_acc: total_correct / seen,
                val_loss,
                val_acc,
            };
            history.push(record);
            if let Some(l) = logger.as_mut() {
                l.log(&record)?;
            }

            let state = EpochState {
                epoch,
                metrics: record,
                lr: epoch_lr,
            };
            let mut control = TrainingControl::new(optimizer.lr());
            for cb in self.callbacks.iter_mut() {
                cb.on_epoch_end(&state, model, &mut control)?;
            }
            optimizer.set_lr(control.lr());
            if let Some(sched) = &self.scheduler {
                optimizer.set_lr(clamp_lr(sched.next_lr(epoch)));
            }

            log::info!(
                "[{epoch:03}] train_loss={:.4} acc={:.4} val_loss={:.4} val_acc={:.4} lr={:.3e} ({:.1}s)",
                record.train_loss,
                record.train_acc,
                record.val_loss,
                record.val_acc,
                optimizer.lr(),
                started.elapsed().as_secs_f64()
            );

            if control.stop_requested() {
                if history.stop_requested_at.is_none() {
                    history.stop_requested_at = Some(epoch);
                }
                if opts.honor_stop_requests {
                    log::info!("stopping after epoch {epoch} on callback request");
                    break;
                }
            }
        }
        Ok(history)
    }
}

fn progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len} batches") {
        pb.set_style(style);
    }
    pb
}

/// Forward-only pass over `data` in eval mode. The model's previous mode is
/// restored afterwards.
pub fn evaluate(
    model: &mut Sequential,
    data: &Dataset,
    batch_size: usize,
    num_classes: usize,
) -> Result<Evaluation> {
    if data.is_empty() {
        return Err(NnError::shape("cannot evaluate on an empty dataset"));
    }
    if batch_size == 0 {
        return Err(NnError::config("batch_size must be >= 1"));
    }
    let was_training = model.is_training();
    model.eval();
    let result = evaluate_batches(model, data, batch_size, num_classes);
    if was_training {
        model.train();
    }
    result
}

fn evaluate_batches(
    model: &mut Sequential,
    data: &Dataset,
    batch_size: usize,
    num_classes: usize,
) -> Result<Evaluation> {
    let mut loss_sum = 0.0;
    let mut acc_sum = 0.0;
    let mut top5_sum = 0.0;
    for (start, end) in math::make_batches(data.len(), batch_size) {
        let (xb, yb) = data.slice(start, end)?;
        let logits = model.forward(&xb, Some(false))?;
        let y_one = math::one_hot(&yb, num_classes)?;
        let bs = (end - start) as f64;
        loss_sum += loss::softmax_cross_entropy(&logits, &y_one)? * bs;
        acc_sum += metrics::accuracy(&logits, &yb)? * bs;
        top5_sum += metrics::topk_accuracy(&logits, &yb, 5)? * bs;
    }
    let n = data.len() as f64;
    Ok(Evaluation {
        loss: loss_sum / n,
        acc: acc_sum / n,
        top5: top5_sum / n,
    })
}
