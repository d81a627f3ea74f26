//! Host-side wrapper that runs one lowered layer on a backend.

use super::LayerDescriptor;
use crate::nn::{Module, ModuleView};
use crate::runtime::backend::{Backend, RuntimeError, TensorData};
use ndarray::ArrayD;
use std::fmt;
use std::rc::Rc;

/// Stands in for a host submodule after a partial swap.
///
/// Host data is converted to the layer's dtype on the way in and back to
/// host precision on the way out.
pub struct SwappedModule {
    layer: LayerDescriptor,
    backend: Rc<dyn Backend>,
}

impl SwappedModule {
    /// Wraps `layer` so it runs on `backend` when the host tree is evaluated.
    pub fn new(layer: LayerDescriptor, backend: Rc<dyn Backend>) -> Self {
        Self { layer, backend }
    }
}

impl fmt::Debug for SwappedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwappedModule")
            .field("layer", &self.layer.to_string())
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Module for SwappedModule {
    fn view(&self) -> ModuleView<'_> {
        ModuleView::Lowered(&self.layer)
    }

    fn eval(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, RuntimeError> {
        let data = TensorData::from_host(input, self.layer.dtype())?;
        Ok(self.backend.forward(&self.layer, &data)?.into_host())
    }
}
