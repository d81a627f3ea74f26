//! The core `Module` trait shared by every layer and container.

use super::{AdaptiveAvgPool2d, AvgPool2d, Conv2d, Dropout, Flatten, Linear, MaxPool2d, ReLU};
use crate::asg::ModulePath;
use crate::runtime::backend::RuntimeError;
use crate::swap::LayerDescriptor;
use crate::tensor::Tensor;
use ndarray::ArrayD;
use std::fmt;

/// Closed view of what a module is, used for classification.
///
/// Every module reports exactly one variant, so the set of types the swap
/// engine understands is matched exhaustively instead of being probed.
#[derive(Debug, Clone, Copy)]
pub enum ModuleView<'a> {
    Conv2d(&'a Conv2d),
    Linear(&'a Linear),
    MaxPool2d(&'a MaxPool2d),
    AvgPool2d(&'a AvgPool2d),
    AdaptiveAvgPool2d(&'a AdaptiveAvgPool2d),
    ReLU(&'a ReLU),
    Flatten(&'a Flatten),
    Dropout(&'a Dropout),
    /// A submodule that already runs on an execution backend.
    Lowered(&'a LayerDescriptor),
    /// A module that is traced through (its children are called instead).
    Container,
    /// Any other leaf, identified by its type name.
    Other(&'a str),
}

/// Common interface of all layers and containers.
///
/// Leaves only need `view` and `eval`: their default `forward` records one
/// module call when traced. Containers override `forward` to call their
/// children through [`Tensor::apply`], and expose them by name so that
/// submodules can be addressed with a [`ModulePath`].
pub trait Module: fmt::Debug {
    fn view(&self) -> ModuleView<'_>;

    /// Symbolic forward pass.
    fn forward(&self, x: &Tensor) -> Tensor {
        x.record_module_call()
    }

    /// Eager forward pass on host data.
    fn eval(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, RuntimeError>;

    fn child(&self, _name: &str) -> Option<&dyn Module> {
        None
    }

    fn child_mut(&mut self, _name: &str) -> Option<&mut Box<dyn Module>> {
        None
    }

    fn named_children(&self) -> Vec<(&str, &dyn Module)> {
        Vec::new()
    }
}

/// All modules of a tree in depth-first pre-order, root first.
pub fn named_modules(root: &dyn Module) -> Vec<(ModulePath, &dyn Module)> {
    let mut out = Vec::new();
    collect(root, ModulePath::root(), &mut out);
    out
}

fn collect<'a>(module: &'a dyn Module, path: ModulePath, out: &mut Vec<(ModulePath, &'a dyn Module)>) {
    let children = module.named_children();
    out.push((path.clone(), module));
    for (name, child) in children {
        collect(child, path.child(name), out);
    }
}
