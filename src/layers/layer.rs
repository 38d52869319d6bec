use crate::error::{NnError, Result};
use crate::tensor::Tensor;

/// A learnable tensor lent out together with its gradient buffer.
///
/// Optimizers and checkpoint loaders mutate `value` in place so that any
/// state keyed by `name` keeps pointing at the same storage.
pub struct Param<'a> {
    pub name: String,
    pub value: &'a mut Tensor,
    pub grad: &'a Tensor,
}

impl<'a> Param<'a> {
    pub fn new(name: impl Into<String>, value: &'a mut Tensor, grad: &'a Tensor) -> Self {
        Self {
            name: name.into(),
            value,
            grad,
        }
    }
}

/// Common interface for network layers.
///
/// Every layer hand-derives its backward pass. `forward` caches what
/// `backward` needs and `backward` consumes that cache, so each backward
/// call must be preceded by its own forward call.
pub trait Layer {
    /// Kind string used to build qualified parameter names, e.g. `"Conv2D"`.
    fn kind(&self) -> &'static str;

    /// Compute the layer output. `training`, when given, overrides the
    /// current mode before anything else happens.
    fn forward(&mut self, x: &Tensor, training: Option<bool>) -> Result<Tensor>;

    /// Backpropagate `grad_out` to the layer input and overwrite this layer's
    /// parameter gradients.
    fn backward(&mut self, grad_out: &Tensor) -> Result<Tensor>;

    /// Learnable tensors by local name. Empty for parameter-free layers.
    fn params(&self) -> Vec<(&'static str, &Tensor)> {
        Vec::new()
    }

    /// Gradient buffers, same keys and shapes as [`Layer::params`].
    fn grads(&self) -> Vec<(&'static str, &Tensor)> {
        Vec::new()
    }

    /// Mutable parameter/gradient pairs for optimisation and loading.
    fn parameters(&mut self) -> Vec<Param<'_>> {
        Vec::new()
    }

    /// Non-learnable state that must survive a checkpoint (running stats).
    fn buffers(&self) -> Vec<(&'static str, &Tensor)> {
        Vec::new()
    }

    fn buffers_mut(&mut self) -> Vec<(&'static str, &mut Tensor)> {
        Vec::new()
    }

    fn set_training(&mut self, training: bool);

    fn is_training(&self) -> bool;

    /// Switch to training mode (affects Dropout and BatchNorm).
    fn train(&mut self) {
        self.set_training(true);
    }

    /// Switch to inference mode.
    fn eval(&mut self) {
        self.set_training(false);
    }
}

/// Error for a `backward` call that has no cached forward state.
pub(crate) fn missing_cache(kind: &str) -> NnError {
    NnError::state(format!("{kind}.backward called before forward"))
}
