//! Fully connected (linear) layer.

use super::module::{Module, ModuleView};
use crate::runtime::backend::RuntimeError;
use crate::runtime::kernels;
use ndarray::{Array1, Array2, ArrayD};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;

/// Fully connected layer computing `y = x W^T + b`.
///
/// `weight` has shape `[out_features, in_features]`.
#[derive(Debug, Clone)]
pub struct Linear {
    pub weight: Array2<f32>,
    pub bias: Option<Array1<f32>>,
}

impl Linear {
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self::init_with(in_features, out_features, true, &mut rand::thread_rng())
    }

    pub fn init_with<R: Rng + ?Sized>(in_features: usize, out_features: usize, bias: bool, rng: &mut R) -> Self {
        let bound = 1.0 / (in_features.max(1) as f32).sqrt();
        let dist = Uniform::new_inclusive(-bound, bound);
        let weight = Array2::random_using((out_features, in_features), dist, rng);
        let bias = bias.then(|| Array1::random_using(out_features, dist, rng));
        Self { weight, bias }
    }

    pub fn from_weights(weight: Array2<f32>, bias: Option<Array1<f32>>) -> Self {
        Self { weight, bias }
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }
}

impl Module for Linear {
    fn view(&self) -> ModuleView<'_> {
        ModuleView::Linear(self)
    }

    fn eval(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, RuntimeError> {
        kernels::linear(input.view(), self.weight.view(), self.bias.as_ref().map(|b| b.view()))
    }
}
