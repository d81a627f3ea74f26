//! Executable pipeline produced by a full swap.

use super::LayerDescriptor;
use crate::asg::DType;
use crate::runtime::backend::{Backend, RuntimeError, TensorData};
use log::trace;
use ndarray::ArrayD;

/// Ordered layer descriptors, run one after the other on a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    layers: Vec<LayerDescriptor>,
    dtype: DType,
}

impl Model {
    /// Wraps descriptors produced for `dtype`, in execution order.
    pub fn new(layers: Vec<LayerDescriptor>, dtype: DType) -> Self {
        Self { layers, dtype }
    }

    /// Descriptors in execution order.
    pub fn layers(&self) -> &[LayerDescriptor] {
        &self.layers
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Runs every layer in order on `input`.
    pub fn predict(&self, backend: &dyn Backend, input: &TensorData) -> Result<TensorData, RuntimeError> {
        let mut x = input.cast(self.dtype)?;
        for (i, layer) in self.layers.iter().enumerate() {
            trace!("layer {}: {} on {}", i, layer, backend.name());
            x = backend.forward(layer, &x)?;
        }
        Ok(x)
    }

    /// `predict` on host data.
    pub fn predict_host(&self, backend: &dyn Backend, input: &ArrayD<f32>) -> Result<ArrayD<f32>, RuntimeError> {
        let data = TensorData::from_host(input, self.dtype)?;
        Ok(self.predict(backend, &data)?.into_host())
    }
}
