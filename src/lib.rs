//! Neural-network training engine with hand-derived backward passes.
//!
//! Every layer implements its own `forward` and `backward`; there is no
//! autograd graph. Models are [`models::Sequential`] stacks trained by
//! [`train::Trainer`].

pub mod config;
pub mod data;
pub mod error;
pub mod init;
pub mod layers;
pub mod loss;
pub mod math;
pub mod metrics;
pub mod models;
pub mod optim;
pub mod predict;
pub mod regularizers;
pub mod rng;
pub mod tensor;
pub mod train;
pub mod weights;

pub use error::{NnError, Result};
pub use tensor::Tensor;
