//! Dropout layer for regularization.
//!
//! During training it zeroes elements at random. At inference it is the
//! identity, which is why lowering skips it entirely.

use super::module::{Module, ModuleView};
use crate::runtime::backend::RuntimeError;
use ndarray::ArrayD;
use rand::Rng;

/// Dropout layer.
///
/// In training mode zeroes each element with probability `p` and scales the
/// rest by `1/(1-p)` to keep the expectation. In inference mode passes the
/// input through unchanged.
///
/// # Example
/// ```ignore
/// let mut dropout = Dropout::new(0.5);
/// dropout.inference(); // disable for evaluation
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Dropout {
    /// Zeroing probability (0.0 - 1.0)
    pub p: f32,
    pub training: bool,
}

impl Dropout {
    /// # Panics
    /// Panics if `p` is not in [0, 1).
    pub fn new(p: f32) -> Self {
        assert!(
            (0.0..1.0).contains(&p),
            "Dropout probability must be in [0, 1), got {}",
            p
        );
        Self { p, training: true }
    }

    pub fn train(&mut self) {
        self.training = true;
    }

    pub fn inference(&mut self) {
        self.training = false;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }
}

impl Default for Dropout {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl Module for Dropout {
    fn view(&self) -> ModuleView<'_> {
        ModuleView::Dropout(self)
    }

    fn eval(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, RuntimeError> {
        if !self.training || self.p == 0.0 {
            return Ok(input.clone());
        }
        let scale = 1.0 / (1.0 - self.p);
        let mut rng = rand::thread_rng();
        Ok(input.mapv(|v| if rng.gen::<f32>() < self.p { 0.0 } else { v * scale }))
    }
}
