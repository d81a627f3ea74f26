//! Graph tracer: turns a module tree into the ordered list of operator
//! nodes of its forward pass.

use super::{classify_function, classify_module, get_module, Operator, OperatorKind, SwapError, SwapResult};
use crate::asg::{Function, ModulePath, NodeId, NodeType};
use crate::nn::Module;
use crate::tensor::GraphContext;
use log::debug;
use std::fmt;

/// What to do with a node the classifier does not support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    /// Fail on the first unsupported node.
    #[default]
    Strict,
    /// Record it as `Traced::Unsupported` and continue. Covers any
    /// classification failure, including malformed inline arguments.
    /// Path resolution failures stay fatal.
    Lenient,
}

/// Where a traced node came from.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceRef {
    Module(ModulePath),
    Inline(Function),
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::Module(path) => write!(f, "module `{}`", path),
            SourceRef::Inline(function) => write!(f, "inline `{}`", function),
        }
    }
}

/// Classification outcome of one traced node.
#[derive(Debug, Clone)]
pub enum Traced<'a> {
    Supported(Operator<'a>),
    Unsupported(String),
}

/// One computational node of a traced forward pass.
#[derive(Debug, Clone)]
pub struct OperatorNode<'a> {
    /// Node id in the traced graph.
    pub position: NodeId,
    pub source: SourceRef,
    pub traced: Traced<'a>,
}

impl<'a> OperatorNode<'a> {
    /// `None` for unsupported nodes.
    pub fn kind(&self) -> Option<OperatorKind> {
        self.operator().map(Operator::kind)
    }

    /// The classified operator, if any.
    pub fn operator(&self) -> Option<&Operator<'a>> {
        match &self.traced {
            Traced::Supported(op) => Some(op),
            Traced::Unsupported(_) => None,
        }
    }

    /// Path of the called submodule. `None` for inline calls.
    pub fn module_path(&self) -> Option<&ModulePath> {
        match &self.source {
            SourceRef::Module(path) => Some(path),
            SourceRef::Inline(_) => None,
        }
    }

    /// Short human-readable identification for diagnostics.
    pub fn describe(&self) -> String {
        match self.kind() {
            Some(kind) => format!("node {} ({} {})", self.position, kind, self.source),
            None => format!("node {} ({})", self.position, self.source),
        }
    }
}

/// Traces a module tree and classifies every computational node.
///
/// The same tree traced twice yields the same node positions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tracer {
    strictness: Strictness,
}

impl Tracer {
    pub fn new(strictness: Strictness) -> Self {
        Self { strictness }
    }

    /// Fails on the first node that cannot be classified.
    pub fn strict() -> Self {
        Self::new(Strictness::Strict)
    }

    /// Records unclassifiable nodes instead of failing.
    pub fn lenient() -> Self {
        Self::new(Strictness::Lenient)
    }

    /// Traces one forward pass of `root` and classifies every node.
    pub fn trace<'a>(&self, root: &'a dyn Module) -> SwapResult<Vec<OperatorNode<'a>>> {
        let graph = GraphContext::trace(root);
        let mut nodes = Vec::new();

        for node in graph.computational_nodes() {
            let (source, classified) = match &node.node_type {
                NodeType::CallModule { target, .. } => {
                    let module = get_module(root, target)?;
                    (SourceRef::Module(target.clone()), classify_module(module))
                }
                NodeType::CallFunction {
                    function,
                    args,
                    kwargs,
                } => (
                    SourceRef::Inline(function.clone()),
                    classify_function(function, args, kwargs).map(Some),
                ),
                NodeType::Placeholder { .. } | NodeType::Output(_) => continue,
            };

            let traced = match classified {
                Ok(Some(operator)) => Traced::Supported(operator),
                Ok(None) => {
                    debug!("node {}: skipping {}", node.id, source);
                    continue;
                }
                Err(e) if self.strictness == Strictness::Lenient => {
                    debug!("node {}: cannot classify {}: {}", node.id, source, e);
                    match e {
                        SwapError::UnsupportedOperator { target, .. } => Traced::Unsupported(target),
                        other => Traced::Unsupported(other.to_string()),
                    }
                }
                Err(e) => return Err(e.at_position(node.id)),
            };

            let traced_node = OperatorNode {
                position: node.id,
                source,
                traced,
            };
            debug!("traced {}", traced_node.describe());
            nodes.push(traced_node);
        }

        Ok(nodes)
    }
}

/// Strict trace of `root`.
pub fn trace(root: &dyn Module) -> SwapResult<Vec<OperatorNode<'_>>> {
    Tracer::strict().trace(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asg::Arg;
    use crate::nn::{Conv2d, Dropout, Linear, ModuleView, ReLU, Sequential};
    use crate::runtime::backend::RuntimeError;
    use crate::runtime::interpreter::Interpreter;
    use crate::tensor::Tensor;
    use ndarray::ArrayD;

    /// `fc(flatten(relu(x), 1)) + fc(...)`: inline calls around one leaf.
    #[derive(Debug)]
    struct Head {
        fc: Box<dyn Module>,
        residual: bool,
    }

    impl Module for Head {
        fn view(&self) -> ModuleView<'_> {
            ModuleView::Container
        }

        fn forward(&self, x: &Tensor) -> Tensor {
            let h = x.relu().flatten(1, -1);
            let y = h.apply("fc", self.fc.as_ref());
            if self.residual {
                &y + &h
            } else {
                y
            }
        }

        fn eval(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, RuntimeError> {
            Interpreter::new().run(self, input)
        }

        fn child(&self, name: &str) -> Option<&dyn Module> {
            (name == "fc").then(|| self.fc.as_ref())
        }
    }

    #[test]
    fn test_sequential_nodes_in_order() {
        let mut dropout = Dropout::new(0.2);
        dropout.inference();
        let model = Sequential::new()
            .push(Conv2d::new(1, 2, (3, 3)))
            .push(dropout)
            .push(ReLU::new());
        let nodes = trace(&model).unwrap();

        let kinds: Vec<_> = nodes.iter().map(|n| n.kind().unwrap()).collect();
        assert_eq!(kinds, vec![OperatorKind::Conv2d, OperatorKind::ReLU]);
        assert_eq!(nodes[0].module_path(), Some(&ModulePath::parse("0")));
        assert_eq!(nodes[1].module_path(), Some(&ModulePath::parse("2")));
        assert!(nodes[0].position < nodes[1].position);
    }

    #[test]
    fn test_inline_calls_are_traced() {
        let head = Head {
            fc: Box::new(Linear::new(4, 4)),
            residual: false,
        };
        let nodes = trace(&head).unwrap();
        let kinds: Vec<_> = nodes.iter().map(|n| n.kind().unwrap()).collect();
        assert_eq!(kinds, vec![OperatorKind::ReLU, OperatorKind::Flatten, OperatorKind::Linear]);
        assert_eq!(nodes[1].source, SourceRef::Inline(Function::Flatten));
        match nodes[1].operator() {
            Some(Operator::Flatten(f)) => assert_eq!((f.start_dim, f.end_dim), (1, -1)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_strict_fails_with_position() {
        let head = Head {
            fc: Box::new(Linear::new(4, 4)),
            residual: true,
        };
        let err = trace(&head).unwrap_err();
        match err {
            SwapError::UnsupportedOperator { position, target } => {
                assert_eq!(position, Some(4));
                assert!(target.contains("add"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    /// `flatten(fc(x), 1.0)`: `start_dim` is not an integer.
    #[derive(Debug)]
    struct BadFlatten {
        fc: Linear,
    }

    impl Module for BadFlatten {
        fn view(&self) -> ModuleView<'_> {
            ModuleView::Container
        }

        fn forward(&self, x: &Tensor) -> Tensor {
            x.apply("fc", &self.fc)
                .call_function(Function::Flatten, vec![Arg::Float(1.0)], vec![])
        }

        fn eval(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, RuntimeError> {
            Interpreter::new().run(self, input)
        }

        fn child(&self, name: &str) -> Option<&dyn Module> {
            (name == "fc").then_some(&self.fc as &dyn Module)
        }
    }

    #[test]
    fn test_malformed_inline_call() {
        let model = BadFlatten { fc: Linear::new(4, 2) };

        let err = trace(&model).unwrap_err();
        assert!(matches!(err, SwapError::InvalidConfiguration(_)));

        let nodes = Tracer::lenient().trace(&model).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].kind(), Some(OperatorKind::Linear));
        assert!(matches!(&nodes[1].traced, Traced::Unsupported(msg) if msg.contains("start_dim")));
    }

    #[test]
    fn test_lenient_records_unsupported() {
        let head = Head {
            fc: Box::new(Linear::new(4, 4)),
            residual: true,
        };
        let nodes = Tracer::lenient().trace(&head).unwrap();
        assert_eq!(nodes.len(), 4);
        assert!(nodes[3].kind().is_none());
        assert!(matches!(nodes[3].traced, Traced::Unsupported(_)));
    }
}
