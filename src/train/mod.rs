//! Training loop, per-epoch history and callbacks.

pub mod callbacks;
pub mod history;
pub mod trainer;

pub use callbacks::{
    build_callbacks, Callback, EarlyStopping, EpochState, Mode, ModelCheckpoint,
    ReduceLrOnPlateau, TrainingControl,
};
pub use history::{EpochMetrics, History, MetricsLogger};
pub use trainer::{evaluate, Evaluation, TrainOptions, Trainer};
