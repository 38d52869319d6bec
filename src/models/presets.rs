//! Small preset networks.

use super::sequential::Sequential;
use crate::error::{NnError, Result};
use crate::init::WeightInit;
use crate::layers::{BatchNorm2d, Conv2d, Dense, Dropout, Layer, MaxPool2d, Relu};
use rand::Rng;

/// Names accepted by [`build_model`].
pub const MODEL_NAMES: &[&str] = &["lenet_mnist", "vgg_tiny_cifar10"];

fn dense<R: Rng + ?Sized>(
    in_features: usize,
    out_features: usize,
    init: WeightInit,
    rng: &mut R,
) -> Result<Box<dyn Layer>> {
    Ok(Box::new(Dense::with_options(in_features, out_features, true, init, rng)?))
}

/// LeNet-style network for `(N, 1, 28, 28)` inputs.
pub fn lenet_mnist<R: Rng + ?Sized>(num_classes: usize, rng: &mut R) -> Result<Sequential> {
    let layers: Vec<Box<dyn Layer>> = vec![
        Box::new(Conv2d::new(1, 6, 5, 1, 2, rng)?), // -> (N, 6, 28, 28)
        Box::new(Relu::new()),
        Box::new(MaxPool2d::new(2, None)?), // -> (N, 6, 14, 14)
        Box::new(Conv2d::new(6, 16, 5, 1, 0, rng)?), // -> (N, 16, 10, 10)
        Box::new(Relu::new()),
        Box::new(MaxPool2d::new(2, None)?), // -> (N, 16, 5, 5)
        dense(16 * 5 * 5, 120, WeightInit::HeNormal, rng)?,
        Box::new(Relu::new()),
        dense(120, 84, WeightInit::HeNormal, rng)?,
        Box::new(Relu::new()),
        Box::new(Dropout::new(0.3, rng)?),
        dense(84, num_classes, WeightInit::XavierUniform, rng)?,
    ];
    Sequential::new(layers)
}

/// Two VGG blocks (conv-bn-relu twice, then pool and dropout) and a dense
/// head, for `(N, 3, 32, 32)` inputs.
pub fn vgg_tiny_cifar10<R: Rng + ?Sized>(num_classes: usize, rng: &mut R) -> Result<Sequential> {
    let mut layers: Vec<Box<dyn Layer>> = Vec::new();
    let mut in_channels = 3usize;
    let mut hw = 32usize;
    for out_channels in [32usize, 64] {
        for _ in 0..2 {
            layers.push(Box::new(Conv2d::new(in_channels, out_channels, 3, 1, 1, rng)?));
            layers.push(Box::new(BatchNorm2d::new(out_channels)?));
            layers.push(Box::new(Relu::new()));
            in_channels = out_channels;
        }
        layers.push(Box::new(MaxPool2d::new(2, None)?));
        layers.push(Box::new(Dropout::new(0.25, rng)?));
        hw /= 2;
    }
    layers.push(dense(in_channels * hw * hw, 256, WeightInit::HeNormal, rng)?);
    layers.push(Box::new(Relu::new()));
    layers.push(Box::new(Dropout::new(0.5, rng)?));
    layers.push(dense(256, num_classes, WeightInit::XavierUniform, rng)?);
    Sequential::new(layers)
}

/// Build a preset by name.
pub fn build_model<R: Rng + ?Sized>(name: &str, num_classes: usize, rng: &mut R) -> Result<Sequential> {
    if num_classes == 0 {
        return Err(NnError::config("num_classes must be positive"));
    }
    match name {
        "lenet_mnist" => lenet_mnist(num_classes, rng),
        "vgg_tiny_cifar10" => vgg_tiny_cifar10(num_classes, rng),
        other => Err(NnError::config(format!(
            "unknown model '{other}', expected one of {MODEL_NAMES:?}"
        ))),
    }
}

/// Preset used when a configuration names a dataset but no model.
pub fn default_model_for(dataset: &str) -> Result<&'static str> {
    match dataset {
        "mnist" => Ok("lenet_mnist"),
        "cifar10" => Ok("vgg_tiny_cifar10"),
        other => Err(NnError::config(format!("no default model for dataset '{other}'"))),
    }
}

/// Expected input shape (without batch) for a preset.
pub fn input_shape(name: &str) -> Result<[usize; 3]> {
    match name {
        "lenet_mnist" => Ok([1, 28, 28]),
        "vgg_tiny_cifar10" => Ok([3, 32, 32]),
        other => Err(NnError::config(format!("unknown model '{other}'"))),
    }
}
