//! Symbolic tensors and the `GraphContext` that records a forward pass.
//!
//! A `Tensor` here holds no data. It is a handle to a node in the traced
//! `Asg`. Running a module's `forward` on a symbolic tensor does not compute
//! anything; it appends nodes describing what the module would do.
//!
//! Leaf modules are recorded as a single `CallModule` node addressed by their
//! path from the traced root. Containers are traced through: they open a
//! scope named after the child and call `forward` on it.

use crate::asg::{Arg, Asg, Function, ModulePath, NodeId, NodeType};
use crate::nn::Module;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ops::Add;
use std::rc::Rc;

/// Owns the graph under construction and the current submodule scope.
#[derive(Debug, Clone, Default)]
pub struct GraphContext {
    graph: Asg,
    scope: Vec<String>,
}

impl GraphContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn graph(&self) -> &Asg {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Asg {
        &mut self.graph
    }

    /// Path of the module whose `forward` is currently being traced.
    pub fn current_path(&self) -> ModulePath {
        ModulePath::from_segments(self.scope.iter().cloned())
    }

    /// Records one forward pass of `root` and returns the resulting graph.
    pub fn trace(root: &dyn Module) -> Asg {
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let input = Tensor::new_input(&context, "x");
        let output = root.forward(&input);
        context.borrow_mut().graph_mut().set_output(output.node_id);
        let graph = context.borrow().graph().clone();
        graph
    }
}

/// Symbolic handle to a node in the traced graph.
#[derive(Debug, Clone)]
pub struct Tensor {
    pub node_id: NodeId,
    pub context: Rc<RefCell<GraphContext>>,
}

impl Tensor {
    /// Adds a graph input.
    pub fn new_input(context: &Rc<RefCell<GraphContext>>, name: &str) -> Self {
        let mut ctx = context.borrow_mut();
        let graph = ctx.graph_mut();
        let node_id = graph.add_node(
            name.to_string(),
            NodeType::Placeholder {
                name: name.to_string(),
            },
        );
        graph.inputs.push(node_id);
        Self {
            node_id,
            context: Rc::clone(context),
        }
    }

    fn with_node(&self, name: String, node_type: NodeType) -> Self {
        let node_id = self.context.borrow_mut().graph_mut().add_node(name, node_type);
        Self {
            node_id,
            context: Rc::clone(&self.context),
        }
    }

    /// Calls child `name` of the module currently being traced.
    pub fn apply(&self, name: &str, module: &dyn Module) -> Tensor {
        self.context.borrow_mut().scope.push(name.to_string());
        let output = module.forward(self);
        self.context.borrow_mut().scope.pop();
        output
    }

    /// Records the current scope as a leaf module call.
    ///
    /// This is what the default `Module::forward` does.
    pub fn record_module_call(&self) -> Tensor {
        let target = self.context.borrow().current_path();
        let name = target.segments().join("_");
        self.with_node(
            name,
            NodeType::CallModule {
                target,
                input: self.node_id,
            },
        )
    }

    /// Records an arbitrary inline function call with `self` as the first
    /// positional argument.
    pub fn call_function(
        &self,
        function: Function,
        extra_args: Vec<Arg>,
        kwargs: Vec<(&str, Arg)>,
    ) -> Tensor {
        let mut args = Vec::with_capacity(extra_args.len() + 1);
        args.push(Arg::Node(self.node_id));
        args.extend(extra_args);
        let kwargs: BTreeMap<String, Arg> =
            kwargs.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        self.with_node(
            function.to_string(),
            NodeType::CallFunction {
                function,
                args,
                kwargs,
            },
        )
    }

    pub fn relu(&self) -> Tensor {
        self.call_function(Function::Relu, vec![], vec![])
    }

    /// Inline flatten over `start_dim..=end_dim`.
    pub fn flatten(&self, start_dim: i64, end_dim: i64) -> Tensor {
        self.call_function(
            Function::Flatten,
            vec![Arg::Int(start_dim), Arg::Int(end_dim)],
            vec![],
        )
    }
}

impl Add<&Tensor> for &Tensor {
    type Output = Tensor;
    fn add(self, rhs: &Tensor) -> Self::Output {
        self.call_function(Function::Add, vec![Arg::Node(rhs.node_id)], vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Linear, ReLU, Sequential};

    #[test]
    fn test_inline_calls_are_recorded_in_order() {
        let context = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&context, "x");
        let h = x.flatten(1, -1);
        let y = h.relu();

        let graph = context.borrow().graph().clone();
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(y.node_id, 2);
        match &graph.nodes[1].node_type {
            NodeType::CallFunction { function, args, .. } => {
                assert_eq!(function, &Function::Flatten);
                assert_eq!(args, &vec![Arg::Node(0), Arg::Int(1), Arg::Int(-1)]);
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_trace_nested_sequential_uses_dotted_targets() {
        let inner = Sequential::new().push(ReLU::new());
        let model = Sequential::new()
            .push(Linear::new(4, 4))
            .push(inner);

        let graph = GraphContext::trace(&model);
        let targets: Vec<String> = graph
            .nodes
            .iter()
            .filter_map(|n| match &n.node_type {
                NodeType::CallModule { target, .. } => Some(target.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(targets, vec!["0", "1.0"]);
        assert!(matches!(graph.nodes.last().unwrap().node_type, NodeType::Output(_)));
    }

    #[test]
    fn test_trace_of_leaf_root_targets_root_path() {
        let graph = GraphContext::trace(&ReLU::new());
        match &graph.nodes[1].node_type {
            NodeType::CallModule { target, .. } => assert!(target.is_root()),
            other => panic!("unexpected node {:?}", other),
        }
    }
}
