use crate::error::{NnError, Result};
use crate::layers::{Layer, Param};
use crate::tensor::Tensor;
use std::collections::BTreeMap;

/// Flat mapping from qualified parameter name to tensor.
pub type ParamMap = BTreeMap<String, Tensor>;

/// Build the qualified name `"{index}.{kind}.{local}"`, e.g. `"0.Conv2D.W"`.
pub fn qualified_name(index: usize, kind: &str, local: &str) -> String {
    format!("{index}.{kind}.{local}")
}

/// A container that applies layers sequentially.
///
/// Parameters, gradients and buffers of the children are exposed under
/// qualified names, which stay stable across save and load.
pub struct Sequential {
    layers: Vec<Box<dyn Layer>>,
    training: bool,
}

impl Sequential {
    /// Create a model from an ordered, non-empty list of layers.
    pub fn new(layers: Vec<Box<dyn Layer>>) -> Result<Self> {
        if layers.is_empty() {
            return Err(NnError::config("Sequential requires at least one layer"));
        }
        Ok(Self {
            layers,
            training: true,
        })
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Put every layer in training mode.
    pub fn train(&mut self) {
        self.training = true;
        for layer in self.layers.iter_mut() {
            layer.train();
        }
    }

    /// Put every layer in inference mode.
    pub fn eval(&mut self) {
        self.training = false;
        for layer in self.layers.iter_mut() {
            layer.eval();
        }
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Chain `forward` through every layer. A `training` override switches
    /// the whole stack before the first layer runs.
    pub fn forward(&mut self, x: &Tensor, training: Option<bool>) -> Result<Tensor> {
        match training {
            Some(true) => self.train(),
            Some(false) => self.eval(),
            None => {}
        }
        let mut out = x.clone();
        for layer in self.layers.iter_mut() {
            out = layer.forward(&out, None)?;
        }
        Ok(out)
    }

    /// Backward pass in reverse layer order, returning the gradient with
    /// respect to the model input.
    pub fn backward(&mut self, grad_out: &Tensor) -> Result<Tensor> {
        let mut grad = grad_out.clone();
        for layer in self.layers.iter_mut().rev() {
            grad = layer.backward(&grad)?;
        }
        Ok(grad)
    }

    /// Current parameters by qualified name.
    pub fn params(&self) -> BTreeMap<String, &Tensor> {
        self.collect(|l| l.params())
    }

    /// Gradients from the last backward pass, keyed like [`Sequential::params`].
    pub fn grads(&self) -> BTreeMap<String, &Tensor> {
        self.collect(|l| l.grads())
    }

    fn collect<'a>(
        &'a self,
        f: impl Fn(&'a dyn Layer) -> Vec<(&'static str, &'a Tensor)>,
    ) -> BTreeMap<String, &'a Tensor> {
        let mut out = BTreeMap::new();
        for (i, layer) in self.layers.iter().enumerate() {
            for (local, t) in f(layer.as_ref()) {
                out.insert(qualified_name(i, layer.kind(), local), t);
            }
        }
        out
    }

    /// Mutable parameter/gradient pairs under qualified names, in layer order.
    pub fn parameters(&mut self) -> Vec<Param<'_>> {
        let mut out = Vec::new();
        for (i, layer) in self.layers.iter_mut().enumerate() {
            let kind = layer.kind();
            for mut p in layer.parameters() {
                p.name = qualified_name(i, kind, &p.name);
                out.push(p);
            }
        }
        out
    }

    /// Total number of learnable scalars.
    pub fn num_params(&self) -> usize {
        self.layers
            .iter()
            .flat_map(|l| l.params())
            .map(|(_, t)| t.len())
            .sum()
    }

    /// Owned copy of every parameter, suitable for checkpointing.
    pub fn state_dict(&self) -> ParamMap {
        self.params()
            .into_iter()
            .map(|(k, t)| (k, t.clone()))
            .collect()
    }

    /// Owned copy of the non-learnable buffers (BatchNorm running stats).
    pub fn buffers(&self) -> ParamMap {
        self.collect(|l| l.buffers())
            .into_iter()
            .map(|(k, t)| (k, t.clone()))
            .collect()
    }

    /// Overwrite parameters in place from `state`.
    ///
    /// Every parameter of the model must be present in `state` with an
    /// identical shape. Extra keys are ignored.
    pub fn load_state_dict(&mut self, state: &ParamMap) -> Result<()> {
        // validate everything first so a failed load leaves the model intact
        for (name, current) in self.params() {
            let incoming = state
                .get(&name)
                .ok_or_else(|| NnError::config(format!("missing parameter '{name}' in checkpoint")))?;
            incoming.ensure_shape(&current.shape, &name)?;
        }
        for p in self.parameters() {
            if let Some(incoming) = state.get(&p.name) {
                p.value.copy_from(incoming)?;
            }
        }
        Ok(())
    }

    /// Restore buffers saved by [`Sequential::buffers`]. Buffers absent from
    /// `buffers` keep their current values.
    pub fn load_buffers(&mut self, buffers: &ParamMap) -> Result<()> {
        for (i, layer) in self.layers.iter_mut().enumerate() {
            let kind = layer.kind();
            for (local, t) in layer.buffers_mut() {
                let name = qualified_name(i, kind, local);
                match buffers.get(&name) {
                    Some(incoming) => t.copy_from(incoming)?,
                    None => log::warn!("buffer '{name}' not found, keeping current values"),
                }
            }
        }
        Ok(())
    }

    /// Multi-line description, one layer per line.
    pub fn describe(&self) -> String {
        let mut s = String::new();
        for (i, layer) in self.layers.iter().enumerate() {
            let shapes: Vec<String> = layer
                .params()
                .iter()
                .map(|(k, t)| format!("{k}{:?}", t.shape))
                .collect();
            s.push_str(&format!("{i:>3} {:<12} {}\n", layer.kind(), shapes.join(" ")));
        }
        s.push_str(&format!("params: {}", self.num_params()));
        s
    }
}
