//! Ordered container of named submodules.

use super::module::{Module, ModuleView};
use crate::runtime::backend::RuntimeError;
use crate::runtime::interpreter::Interpreter;
use crate::tensor::Tensor;
use ndarray::ArrayD;

/// Runs its children one after another.
///
/// Children pushed with [`Sequential::push`] are named by their index
/// (`"0"`, `"1"`, ...), so the third child of `features` is addressed as
/// `features.2`.
#[derive(Debug, Default)]
pub struct Sequential {
    children: Vec<(String, Box<dyn Module>)>,
}

impl Sequential {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(self, module: impl Module + 'static) -> Self {
        let name = self.children.len().to_string();
        self.push_named(name, module)
    }

    pub fn push_named(mut self, name: impl Into<String>, module: impl Module + 'static) -> Self {
        self.children.push((name.into(), Box::new(module)));
        self
    }

    pub fn push_boxed(&mut self, name: impl Into<String>, module: Box<dyn Module>) {
        self.children.push((name.into(), module));
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl Module for Sequential {
    fn view(&self) -> ModuleView<'_> {
        ModuleView::Container
    }

    fn forward(&self, x: &Tensor) -> Tensor {
        self.children
            .iter()
            .fold(x.clone(), |h, (name, child)| h.apply(name, child.as_ref()))
    }

    fn eval(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, RuntimeError> {
        Interpreter::new().run(self, input)
    }

    fn child(&self, name: &str) -> Option<&dyn Module> {
        self.children
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, m)| m.as_ref())
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut Box<dyn Module>> {
        self.children
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, m)| m)
    }

    fn named_children(&self) -> Vec<(&str, &dyn Module)> {
        self.children
            .iter()
            .map(|(n, m)| (n.as_str(), m.as_ref()))
            .collect()
    }
}
