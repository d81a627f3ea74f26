//! Host interpreter: eager execution of a module tree.
//!
//! This is the host framework's own execution path. It traces the tree,
//! then evaluates the graph node by node in order, caching every value.
//! Module calls are resolved by path and run through `Module::eval`, so a
//! submodule that was swapped for a backend wrapper runs on its backend
//! while everything else stays on the host kernels.

use super::backend::RuntimeError;
use super::kernels;
use crate::asg::{flatten_dims, Arg, Asg, Function, NodeId, NodeType};
use crate::nn::Module;
use crate::swap::get_module;
use crate::tensor::GraphContext;
use log::trace;
use ndarray::ArrayD;

#[derive(Debug, Default, Clone, Copy)]
pub struct Interpreter;

impl Interpreter {
    pub fn new() -> Self {
        Self
    }

    /// Traces `root` and runs it on `input`.
    pub fn run(&self, root: &dyn Module, input: &ArrayD<f32>) -> Result<ArrayD<f32>, RuntimeError> {
        let graph = GraphContext::trace(root);
        self.run_graph(root, &graph, input)
    }

    /// Runs an already traced graph of `root`.
    pub fn run_graph(
        &self,
        root: &dyn Module,
        graph: &Asg,
        input: &ArrayD<f32>,
    ) -> Result<ArrayD<f32>, RuntimeError> {
        let mut memo: Vec<Option<ArrayD<f32>>> = vec![None; graph.nodes.len()];
        let mut result = None;

        for node in &graph.nodes {
            let value = match &node.node_type {
                NodeType::Placeholder { .. } => input.clone(),
                NodeType::CallModule { target, input: src } => {
                    let module = get_module(root, target)
                        .map_err(|_| RuntimeError::ModuleNotFound(target.to_string()))?;
                    trace!("eval {} ({:?})", target, module.view());
                    module.eval(fetch(&memo, *src)?)?
                }
                NodeType::CallFunction {
                    function,
                    args,
                    kwargs,
                } => {
                    let operand = args
                        .first()
                        .and_then(Arg::as_node)
                        .ok_or_else(|| RuntimeError::TypeError {
                            expected: "tensor as first argument".to_string(),
                            actual: format!("{:?}", args.first()),
                        })?;
                    let x = fetch(&memo, operand)?;
                    match function {
                        Function::Relu => kernels::relu(x.view()),
                        Function::Flatten => {
                            let (start, end) = flatten_dims(args, kwargs)
                                .map_err(|e| RuntimeError::Configuration(e.to_string()))?;
                            kernels::flatten(x.view(), start as isize, end as isize)?
                        }
                        Function::Add => {
                            let rhs = args
                                .get(1)
                                .and_then(Arg::as_node)
                                .ok_or_else(|| RuntimeError::TypeError {
                                    expected: "tensor as second argument".to_string(),
                                    actual: format!("{:?}", args.get(1)),
                                })?;
                            add(x, fetch(&memo, rhs)?)?
                        }
                        Function::Named(name) => {
                            return Err(RuntimeError::UnimplementedOperation(name.clone()))
                        }
                    }
                }
                NodeType::Output(src) => {
                    result = Some(fetch(&memo, *src)?.clone());
                    continue;
                }
            };
            memo[node.id] = Some(value);
        }

        result.ok_or_else(|| RuntimeError::UnimplementedOperation("graph without output".to_string()))
    }
}

fn fetch(memo: &[Option<ArrayD<f32>>], id: NodeId) -> Result<&ArrayD<f32>, RuntimeError> {
    memo.get(id)
        .and_then(Option::as_ref)
        .ok_or(RuntimeError::MissingValue(id))
}

fn add(lhs: &ArrayD<f32>, rhs: &ArrayD<f32>) -> Result<ArrayD<f32>, RuntimeError> {
    if lhs.shape() != rhs.shape() {
        return Err(RuntimeError::ShapeError(format!(
            "add: shapes {:?} and {:?} differ",
            lhs.shape(),
            rhs.shape()
        )));
    }
    Ok(lhs + rhs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Linear, ModuleView, ReLU, Sequential};
    use crate::tensor::Tensor;
    use ndarray::{array, IxDyn};

    /// `relu(fc(x)) + x`, a residual block with inline calls.
    #[derive(Debug)]
    struct Residual {
        fc: Box<dyn Module>,
    }

    impl Module for Residual {
        fn view(&self) -> ModuleView<'_> {
            ModuleView::Container
        }

        fn forward(&self, x: &Tensor) -> Tensor {
            let h = x.apply("fc", self.fc.as_ref()).relu();
            &h + x
        }

        fn eval(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, RuntimeError> {
            Interpreter::new().run(self, input)
        }

        fn child(&self, name: &str) -> Option<&dyn Module> {
            (name == "fc").then(|| self.fc.as_ref())
        }
    }

    #[test]
    fn test_residual_block() {
        let block = Residual {
            fc: Box::new(Linear::from_weights(array![[1.0, 0.0], [0.0, -1.0]], None)),
        };
        let out = block.eval(&array![[2.0f32, 3.0]].into_dyn()).unwrap();
        assert_eq!(out, array![[4.0f32, 3.0]].into_dyn());
    }

    #[test]
    fn test_sequential_matches_manual_composition() {
        let fc = Linear::new(3, 2);
        let seq = Sequential::new().push(fc.clone()).push(ReLU::new());
        let x = ArrayD::from_elem(IxDyn(&[4, 3]), 0.5);
        let expected = ReLU::new().eval(&fc.eval(&x).unwrap()).unwrap();
        assert_eq!(Interpreter::new().run(&seq, &x).unwrap(), expected);
    }

    #[test]
    fn test_shape_errors_propagate() {
        let seq = Sequential::new().push(Linear::new(3, 2));
        let err = Interpreter::new()
            .run(&seq, &ArrayD::zeros(IxDyn(&[1, 5])))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ShapeError(_)));
    }
}
