//! ASG: the traced graph of one forward pass.
//!
//! A traced graph is a flat, ordered list of nodes. Node ids are assigned in
//! insertion order, so iterating `Asg::nodes` visits the forward pass in
//! execution order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Node identifier (its index in execution order).
pub type NodeId = usize;
/// Tensor shape.
pub type Shape = Vec<usize>;

pub type AsgResult<T> = std::result::Result<T, AsgError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AsgError {
    #[error("invalid argument `{name}` for {function}: {found}")]
    InvalidArgument {
        function: String,
        name: String,
        found: String,
    },
}

/// Element data types understood by the host framework.
///
/// Only `F32` and `F64` can be lowered onto a backend.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    F64,
    I32,
    Bool,
}

impl DType {
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::I32 => "i32",
            DType::Bool => "bool",
        };
        write!(f, "{}", s)
    }
}

/// Dotted path of a submodule inside a module tree, stored as segments.
///
/// The empty path addresses the root module itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModulePath(Vec<String>);

impl ModulePath {
    pub const DELIMITER: char = '.';

    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Splits a dotted string. An empty string yields the root path.
    pub fn parse(dotted: &str) -> Self {
        if dotted.is_empty() {
            return Self::root();
        }
        Self(dotted.split(Self::DELIMITER).map(str::to_string).collect())
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Splits into the parent path and the last segment.
    pub fn split_last(&self) -> Option<(ModulePath, &str)> {
        let (last, parent) = self.0.split_last()?;
        Some((Self(parent.to_vec()), last.as_str()))
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<root>");
        }
        write!(f, "{}", self.0.join("."))
    }
}

/// Inline (non-module) computations a forward pass may record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Function {
    Flatten,
    Relu,
    Add,
    /// Any other free function, identified by name.
    Named(String),
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Flatten => write!(f, "flatten"),
            Function::Relu => write!(f, "relu"),
            Function::Add => write!(f, "add"),
            Function::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Resolves `start_dim`/`end_dim` of an inline flatten call.
///
/// Positional arguments 1 and 2 are read first, keywords override them, and
/// omitted dims default to the full range `(0, -1)`.
pub fn flatten_dims(args: &[Arg], kwargs: &BTreeMap<String, Arg>) -> AsgResult<(i64, i64)> {
    let int_arg = |name: &str, arg: &Arg| {
        arg.as_int().ok_or_else(|| AsgError::InvalidArgument {
            function: Function::Flatten.to_string(),
            name: name.to_string(),
            found: format!("{:?}", arg),
        })
    };

    let mut start_dim = 0;
    let mut end_dim = -1;
    if let Some(arg) = args.get(1) {
        start_dim = int_arg("start_dim", arg)?;
    }
    if let Some(arg) = args.get(2) {
        end_dim = int_arg("end_dim", arg)?;
    }
    if let Some(arg) = kwargs.get("start_dim") {
        start_dim = int_arg("start_dim", arg)?;
    }
    if let Some(arg) = kwargs.get("end_dim") {
        end_dim = int_arg("end_dim", arg)?;
    }
    Ok((start_dim, end_dim))
}

/// A call argument: either a traced tensor or a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Arg {
    Node(NodeId),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Arg {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Arg::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Arg::Node(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub node_type: NodeType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeType {
    /// Graph input.
    Placeholder { name: String },
    /// Call of a leaf submodule, addressed by its path from the traced root.
    CallModule { target: ModulePath, input: NodeId },
    /// Inline computation. The first positional argument is usually the
    /// tensor it consumes.
    CallFunction {
        function: Function,
        args: Vec<Arg>,
        kwargs: BTreeMap<String, Arg>,
    },
    /// Graph output.
    Output(NodeId),
}

impl NodeType {
    /// Input/output markers carry no computation.
    pub fn is_marker(&self) -> bool {
        matches!(self, NodeType::Placeholder { .. } | NodeType::Output(_))
    }
}

/// Ordered graph produced by one trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Asg {
    pub nodes: Vec<Node>,
    pub inputs: Vec<NodeId>,
    pub outputs: Vec<NodeId>,
}

impl Asg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, name: String, node_type: NodeType) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node { id, name, node_type });
        id
    }

    pub fn set_output(&mut self, output: NodeId) {
        let id = self.add_node("output".to_string(), NodeType::Output(output));
        self.outputs = vec![id];
    }

    /// Nodes that perform computation, in execution order.
    pub fn computational_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| !n.node_type.is_marker())
    }
}
