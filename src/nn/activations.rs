//! Parameter-free shape and activation layers: `ReLU` and `Flatten`.

use super::module::{Module, ModuleView};
use crate::runtime::backend::RuntimeError;
use crate::runtime::kernels;
use ndarray::ArrayD;

/// ReLU (Rectified Linear Unit) activation layer.
///
/// Applies the element-wise function `max(0, x)`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReLU;

impl ReLU {
    pub fn new() -> Self {
        ReLU
    }
}

impl Module for ReLU {
    fn view(&self) -> ModuleView<'_> {
        ModuleView::ReLU(self)
    }

    fn eval(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, RuntimeError> {
        Ok(kernels::relu(input.view()))
    }
}

/// Flattens dimensions `start_dim..=end_dim` into one.
///
/// As a layer it keeps the batch dimension (`start_dim = 1`). The inline
/// `Tensor::flatten` call has no such default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flatten {
    pub start_dim: isize,
    pub end_dim: isize,
}

impl Flatten {
    pub fn new() -> Self {
        Self {
            start_dim: 1,
            end_dim: -1,
        }
    }

    pub fn with_dims(start_dim: isize, end_dim: isize) -> Self {
        Self { start_dim, end_dim }
    }
}

impl Default for Flatten {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for Flatten {
    fn view(&self) -> ModuleView<'_> {
        ModuleView::Flatten(self)
    }

    fn eval(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, RuntimeError> {
        kernels::flatten(input.view(), self.start_dim, self.end_dim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, IxDyn};

    #[test]
    fn test_relu_eval() {
        let out = ReLU::new().eval(&array![-1.0f32, 0.0, 2.0].into_dyn()).unwrap();
        assert_eq!(out, array![0.0f32, 0.0, 2.0].into_dyn());
    }

    #[test]
    fn test_flatten_keeps_batch() {
        let out = Flatten::new().eval(&ArrayD::zeros(IxDyn(&[4, 2, 3, 3]))).unwrap();
        assert_eq!(out.shape(), &[4, 18]);
    }
}
