//! Swap orchestrators: full lowering and partial in-place patching.

use super::{
    build, resolve, set_module, AlgorithmPolicies, AlgorithmPolicy, LayerDescriptor, Model, OccurrenceCounter,
    OperatorKind, SwapError, SwapResult, SwappedModule, Traced, Tracer, PASSTHROUGH,
};
use crate::asg::{DType, ModulePath};
use crate::nn::Module;
use crate::runtime::backend::Backend;
use log::{debug, info};
use std::rc::Rc;

/// Lowers every operator of `root` into a descriptor, in execution order.
///
/// Fails on the first unsupported node, and on any node whose algorithm
/// resolves to `PASSTHROUGH`.
pub fn lower(root: &dyn Module, dtype: DType, policies: &AlgorithmPolicies) -> SwapResult<Vec<LayerDescriptor>> {
    let nodes = Tracer::strict().trace(root)?;
    let mut counter = OccurrenceCounter::new();
    let mut layers = Vec::with_capacity(nodes.len());

    for node in &nodes {
        let operator = match &node.traced {
            Traced::Supported(operator) => operator,
            Traced::Unsupported(target) => {
                return Err(SwapError::UnsupportedOperator {
                    position: Some(node.position),
                    target: target.clone(),
                })
            }
        };
        let kind = operator.kind();
        let algorithm = resolve(kind, operator, policies.get(kind), &mut counter).map_err(|e| e.at_node(node))?;
        if algorithm == PASSTHROUGH {
            return Err(SwapError::InvalidConfiguration(format!(
                "algorithm `{}` cannot be used when swapping the whole model",
                PASSTHROUGH
            ))
            .at_node(node));
        }
        let layer = build(operator, dtype, &algorithm).map_err(|e| e.at_node(node))?;
        debug!("bound {} to `{}`", node.describe(), algorithm);
        layers.push(layer);
    }

    info!("lowered {} operators to {}", layers.len(), dtype);
    Ok(layers)
}

/// `lower`, wrapped into an executable pipeline.
pub fn swap_backend(root: &dyn Module, dtype: DType, policies: &AlgorithmPolicies) -> SwapResult<Model> {
    Ok(Model::new(lower(root, dtype, policies)?, dtype))
}

/// Replaces every module of kind `target` with a backend-backed wrapper.
///
/// Other operators, including unsupported ones, stay on the host. Already
/// lowered modules and those resolving to `PASSTHROUGH` are left in place
/// but still advance a `Sequence` policy. All descriptors are built before
/// the tree is touched, so on error `root` is unchanged.
///
/// Returns the number of replaced submodules.
pub fn patch_one_kind_in_place(
    root: &mut Box<dyn Module>,
    target: OperatorKind,
    dtype: DType,
    policy: &AlgorithmPolicy,
    backend: Rc<dyn Backend>,
) -> SwapResult<usize> {
    let planned = plan(root.as_ref(), target, dtype, policy)?;
    let count = planned.len();
    for (path, layer) in planned {
        debug!("swapping `{}` for {} on {}", path, layer, backend.name());
        set_module(root, &path, Box::new(SwappedModule::new(layer, Rc::clone(&backend))))?;
    }
    info!("swapped {} {} modules to {}", count, target, backend.name());
    Ok(count)
}

fn plan(
    root: &dyn Module,
    target: OperatorKind,
    dtype: DType,
    policy: &AlgorithmPolicy,
) -> SwapResult<Vec<(ModulePath, LayerDescriptor)>> {
    let nodes = Tracer::lenient().trace(root)?;
    let mut counter = OccurrenceCounter::new();
    let mut planned: Vec<(ModulePath, LayerDescriptor)> = Vec::new();

    for node in &nodes {
        let (Some(operator), Some(path)) = (node.operator(), node.module_path()) else {
            continue;
        };
        if operator.kind() != target {
            continue;
        }
        let algorithm = resolve(target, operator, policy, &mut counter).map_err(|e| e.at_node(node))?;
        if operator.is_lowered() {
            debug!("{} already runs on a backend", node.describe());
            continue;
        }
        if algorithm == PASSTHROUGH {
            debug!("{} stays on the host", node.describe());
            continue;
        }
        // a module called more than once is swapped once
        if planned.iter().any(|(p, _)| p == path) {
            continue;
        }
        let layer = build(operator, dtype, &algorithm).map_err(|e| e.at_node(node))?;
        planned.push((path.clone(), layer));
    }

    Ok(planned)
}

/// Functional form of [`patch_one_kind_in_place`]: consumes the root and
/// returns the patched root.
pub fn patch_one_kind(
    mut root: Box<dyn Module>,
    target: OperatorKind,
    dtype: DType,
    policy: &AlgorithmPolicy,
    backend: Rc<dyn Backend>,
) -> SwapResult<Box<dyn Module>> {
    patch_one_kind_in_place(&mut root, target, dtype, policy, backend)?;
    Ok(root)
}

/// Swaps every `Conv2d` for a backend wrapper. Shorthand for
/// [`patch_one_kind`] with [`OperatorKind::Conv2d`].
pub fn swap_conv2d(
    root: Box<dyn Module>,
    dtype: DType,
    policy: &AlgorithmPolicy,
    backend: Rc<dyn Backend>,
) -> SwapResult<Box<dyn Module>> {
    patch_one_kind(root, OperatorKind::Conv2d, dtype, policy, backend)
}
