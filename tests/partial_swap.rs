//! Partial-swap tests: patching one operator kind in place while the rest
//! of the tree keeps running on the host.

use ndarray::{ArrayD, IxDyn};
use opswap::asg::{Arg, DType, Function, ModulePath};
use opswap::nn::{Conv2d, Conv2dConfig, Flatten, Linear, MaxPool2d, Module, ModuleView, Padding, ReLU, Sequential};
use opswap::runtime::backend::{Backend, RuntimeError};
use opswap::runtime::{CpuBackend, Interpreter};
use opswap::swap::{
    get_module, patch_one_kind, patch_one_kind_in_place, swap_conv2d, AlgorithmPolicy, OperatorKind, SwapError,
    PASSTHROUGH,
};
use opswap::tensor::Tensor;
use std::rc::Rc;

const TOL: f32 = 1e-4;

fn assert_tensors_close(expected: &ArrayD<f32>, actual: &ArrayD<f32>) {
    assert_eq!(expected.shape(), actual.shape());
    for (i, (e, a)) in expected.iter().zip(actual.iter()).enumerate() {
        assert!((e - a).abs() < TOL, "mismatch at {}: {} vs {}", i, e, a);
    }
}

fn ramp(shape: &[usize]) -> ArrayD<f32> {
    let n: usize = shape.iter().product();
    ArrayD::from_shape_vec(IxDyn(shape), (0..n).map(|i| ((i * 5) % 11) as f32 / 5.5 - 1.0).collect()).unwrap()
}

fn backend() -> Rc<dyn Backend> {
    Rc::new(CpuBackend)
}

fn address(root: &dyn Module, path: &str) -> *const () {
    get_module(root, &ModulePath::parse(path)).unwrap() as *const dyn Module as *const ()
}

fn is_lowered(root: &dyn Module, path: &str) -> bool {
    matches!(get_module(root, &ModulePath::parse(path)).unwrap().view(), ModuleView::Lowered(_))
}

/// conv -> relu -> pool -> conv -> relu -> flatten -> linear
fn cnn() -> Box<dyn Module> {
    Box::new(
        Sequential::new()
            .push(Conv2d::from_config(Conv2dConfig::new(1, 4, (3, 3)).with_padding(1)))
            .push(ReLU::new())
            .push(MaxPool2d::new(2))
            .push(Conv2d::new(4, 4, (3, 3)).with_padding(Padding::Same))
            .push(ReLU::new())
            .push(Flatten::new())
            .push(Linear::new(4 * 3 * 3, 3)),
    )
}

#[test]
fn test_swap_conv2d_only_touches_convolutions() {
    let model = cnn();
    let x = ramp(&[2, 1, 6, 6]);
    let expected = model.eval(&x).unwrap();
    let untouched: Vec<_> = ["1", "2", "4", "5", "6"].iter().map(|p| address(model.as_ref(), p)).collect();

    let patched = swap_conv2d(model, DType::F32, &AlgorithmPolicy::constant("kn2row"), backend()).unwrap();

    assert!(is_lowered(patched.as_ref(), "0"));
    assert!(is_lowered(patched.as_ref(), "3"));
    let after: Vec<_> = ["1", "2", "4", "5", "6"].iter().map(|p| address(patched.as_ref(), p)).collect();
    assert_eq!(untouched, after);

    match get_module(patched.as_ref(), &ModulePath::parse("3")).unwrap().view() {
        ModuleView::Lowered(layer) => {
            assert_eq!(layer.kind(), OperatorKind::Conv2d);
            assert_eq!(layer.algorithm(), "kn2row");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_tensors_close(&expected, &patched.eval(&x).unwrap());
}

#[test]
fn test_patch_in_double_precision() {
    let mut model = cnn();
    let x = ramp(&[1, 1, 6, 6]);
    let expected = model.eval(&x).unwrap();

    let count = patch_one_kind_in_place(
        &mut model,
        OperatorKind::Linear,
        DType::F64,
        &AlgorithmPolicy::constant("gemm"),
        backend(),
    )
    .unwrap();
    assert_eq!(count, 1);
    assert!(is_lowered(model.as_ref(), "6"));
    assert!(!is_lowered(model.as_ref(), "0"));
    assert_tensors_close(&expected, &model.eval(&x).unwrap());
}

#[test]
fn test_repatching_is_idempotent() {
    let policy = AlgorithmPolicy::sequence(["direct", "kn2row"]);
    let mut model = cnn();
    assert_eq!(
        patch_one_kind_in_place(&mut model, OperatorKind::Conv2d, DType::F32, &policy, backend()).unwrap(),
        2
    );
    let swapped = [address(model.as_ref(), "0"), address(model.as_ref(), "3")];

    // the sequence is walked again from the start and consumed by lowered nodes
    assert_eq!(
        patch_one_kind_in_place(&mut model, OperatorKind::Conv2d, DType::F32, &policy, backend()).unwrap(),
        0
    );
    assert_eq!(swapped, [address(model.as_ref(), "0"), address(model.as_ref(), "3")]);
}

#[test]
fn test_passthrough_keeps_host_module() {
    let policy = AlgorithmPolicy::sequence([PASSTHROUGH, "direct"]);
    let mut model = cnn();
    let first = address(model.as_ref(), "0");

    let count = patch_one_kind_in_place(&mut model, OperatorKind::Conv2d, DType::F32, &policy, backend()).unwrap();
    assert_eq!(count, 1);
    assert_eq!(first, address(model.as_ref(), "0"));
    assert!(!is_lowered(model.as_ref(), "0"));
    assert!(is_lowered(model.as_ref(), "3"));
}

#[test]
fn test_failure_leaves_tree_untouched() {
    let policy = AlgorithmPolicy::sequence(["direct"]);
    let mut model = cnn();
    let before = address(model.as_ref(), "0");

    let err = patch_one_kind_in_place(&mut model, OperatorKind::Conv2d, DType::F32, &policy, backend()).unwrap_err();
    assert!(matches!(err, SwapError::InvalidConfiguration(_)));
    assert_eq!(before, address(model.as_ref(), "0"));
    assert!(!is_lowered(model.as_ref(), "0"));
    assert!(!is_lowered(model.as_ref(), "3"));
}

#[derive(Debug)]
struct Softmax;

impl Module for Softmax {
    fn view(&self) -> ModuleView<'_> {
        ModuleView::Other("Softmax")
    }

    fn eval(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, RuntimeError> {
        let exp = input.mapv(f32::exp);
        let sum = exp.sum();
        Ok(exp / sum)
    }
}

/// `softmax(fc(relu(x)) + x)`: unsupported nodes around a target module.
#[derive(Debug)]
struct Block {
    fc: Box<dyn Module>,
    act: Box<dyn Module>,
    out: Box<dyn Module>,
}

impl Module for Block {
    fn view(&self) -> ModuleView<'_> {
        ModuleView::Container
    }

    fn forward(&self, x: &Tensor) -> Tensor {
        let h = x.relu().apply("fc", self.fc.as_ref()).apply("act", self.act.as_ref());
        (&h + x).apply("out", self.out.as_ref())
    }

    fn eval(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, RuntimeError> {
        Interpreter::new().run(self, input)
    }

    fn child(&self, name: &str) -> Option<&dyn Module> {
        match name {
            "fc" => Some(self.fc.as_ref()),
            "act" => Some(self.act.as_ref()),
            "out" => Some(self.out.as_ref()),
            _ => None,
        }
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut Box<dyn Module>> {
        match name {
            "fc" => Some(&mut self.fc),
            "act" => Some(&mut self.act),
            "out" => Some(&mut self.out),
            _ => None,
        }
    }

    fn named_children(&self) -> Vec<(&str, &dyn Module)> {
        vec![
            ("fc", self.fc.as_ref()),
            ("act", self.act.as_ref()),
            ("out", self.out.as_ref()),
        ]
    }
}

fn block() -> Box<dyn Module> {
    Box::new(Block {
        fc: Box::new(Linear::new(4, 4)),
        act: Box::new(ReLU::new()),
        out: Box::new(Softmax),
    })
}

#[test]
fn test_unrelated_unsupported_nodes_are_ignored() {
    let model = block();
    let x = ramp(&[3, 4]);
    let expected = model.eval(&x).unwrap();

    let patched = patch_one_kind(model, OperatorKind::Linear, DType::F32, &AlgorithmPolicy::default(), backend()).unwrap();
    assert!(is_lowered(patched.as_ref(), "fc"));
    assert!(!is_lowered(patched.as_ref(), "out"));
    assert_tensors_close(&expected, &patched.eval(&x).unwrap());
}

#[test]
fn test_inline_calls_stay_on_host() {
    // inline relu comes first in trace order but has no submodule to replace
    let policy = AlgorithmPolicy::sequence(["direct"]);
    let mut model = block();
    let count = patch_one_kind_in_place(&mut model, OperatorKind::ReLU, DType::F32, &AlgorithmPolicy::default(), backend())
        .unwrap();
    assert_eq!(count, 1);
    assert!(is_lowered(model.as_ref(), "act"));

    // the sequence is not consumed by the inline call
    let mut fresh = block();
    assert_eq!(
        patch_one_kind_in_place(&mut fresh, OperatorKind::ReLU, DType::F32, &policy, backend()).unwrap(),
        1
    );
}

/// `flatten(fc(x), 1.0)`: an inline flatten with a malformed `start_dim`.
#[derive(Debug)]
struct BadFlattenHead {
    fc: Box<dyn Module>,
}

impl Module for BadFlattenHead {
    fn view(&self) -> ModuleView<'_> {
        ModuleView::Container
    }

    fn forward(&self, x: &Tensor) -> Tensor {
        x.apply("fc", self.fc.as_ref())
            .call_function(Function::Flatten, vec![Arg::Float(1.0)], vec![])
    }

    fn eval(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, RuntimeError> {
        Interpreter::new().run(self, input)
    }

    fn child(&self, name: &str) -> Option<&dyn Module> {
        (name == "fc").then(|| self.fc.as_ref())
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut Box<dyn Module>> {
        match name {
            "fc" => Some(&mut self.fc),
            _ => None,
        }
    }

    fn named_children(&self) -> Vec<(&str, &dyn Module)> {
        vec![("fc", self.fc.as_ref())]
    }
}

#[test]
fn test_malformed_node_of_other_kind_is_ignored() {
    let model: Box<dyn Module> = Box::new(BadFlattenHead {
        fc: Box::new(Linear::new(4, 2)),
    });

    let patched = patch_one_kind(model, OperatorKind::Linear, DType::F32, &AlgorithmPolicy::default(), backend()).unwrap();
    assert!(is_lowered(patched.as_ref(), "fc"));
}

#[test]
fn test_leaf_root_is_replaced() {
    let conv: Box<dyn Module> = Box::new(Conv2d::new(2, 2, (1, 1)));
    let x = ramp(&[2, 3, 3]);
    let expected = conv.eval(&x).unwrap();

    let patched = swap_conv2d(conv, DType::F64, &AlgorithmPolicy::default(), backend()).unwrap();
    assert!(matches!(patched.view(), ModuleView::Lowered(_)));
    assert_tensors_close(&expected, &patched.eval(&x).unwrap());
}

#[test]
fn test_backend_errors_surface_at_eval() {
    let patched = swap_conv2d(cnn(), DType::F32, &AlgorithmPolicy::constant("winograd"), backend()).unwrap();
    let err = patched.eval(&ramp(&[1, 1, 6, 6])).unwrap_err();
    assert!(matches!(err, RuntimeError::UnsupportedAlgorithm { .. }));
}
