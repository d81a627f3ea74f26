//! # Operator Substitution Engine
//!
//! Lowers a module tree onto an execution backend.
//!
//! ```text
//! module tree -> trace -> classify -> resolve algorithm -> build descriptor
//!                                                          |-> lower / swap_backend (all nodes)
//!                                                          `-> patch_one_kind (one kind, in place)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use opswap::asg::DType;
//! use opswap::swap::{lower, AlgorithmPolicies, AlgorithmPolicy, OperatorKind};
//!
//! let policies = AlgorithmPolicies::new()
//!     .with(OperatorKind::Conv2d, AlgorithmPolicy::sequence(["direct", "kn2row"]))
//!     .with(OperatorKind::Linear, AlgorithmPolicy::constant("gemm"));
//! let layers = lower(&model, DType::F32, &policies)?;
//! ```

pub mod algorithm;
pub mod classify;
pub mod layers;
pub mod model;
pub mod orchestrate;
pub mod path;
pub mod swapped;
pub mod trace;

pub use algorithm::{resolve, AlgorithmPolicies, AlgorithmPolicy, OccurrenceCounter, DEFAULT_ALGORITHM, PASSTHROUGH};
pub use classify::{classify_function, classify_module, Operator, OperatorKind};
pub use layers::{
    build, make_2d, make_padding_2d, AdaptiveAvgPool2dLayer, AvgPool2dLayer, Conv2dLayer, FlattenLayer,
    LayerDescriptor, LinearLayer, MaxPool2dLayer, ReluLayer,
};
pub use model::Model;
pub use orchestrate::{lower, patch_one_kind, patch_one_kind_in_place, swap_backend, swap_conv2d};
pub use path::{get_module, get_module_mut, set_module};
pub use swapped::SwappedModule;
pub use trace::{trace, OperatorNode, SourceRef, Strictness, Traced, Tracer};

use crate::asg::NodeId;
use thiserror::Error;

/// Errors of one swap call. All of them abort the call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SwapError {
    #[error("unsupported operator {target}{}", at_position(.position))]
    UnsupportedOperator {
        position: Option<NodeId>,
        target: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("no attribute `{segment}` while resolving module path `{path}`")]
    PathResolution { path: String, segment: String },
}

fn at_position(position: &Option<NodeId>) -> String {
    match position {
        Some(p) => format!(" at node {}", p),
        None => String::new(),
    }
}

pub type SwapResult<T> = std::result::Result<T, SwapError>;

impl SwapError {
    /// Unsupported operator without a position yet. The tracer fills it in.
    pub fn unsupported(target: impl Into<String>) -> Self {
        SwapError::UnsupportedOperator {
            position: None,
            target: target.into(),
        }
    }

    /// Attaches the traced node position to an unsupported-operator error.
    pub fn at_position(self, position: NodeId) -> Self {
        match self {
            SwapError::UnsupportedOperator { target, .. } => SwapError::UnsupportedOperator {
                position: Some(position),
                target,
            },
            other => other,
        }
    }

    /// Prefixes a configuration error with the node it was raised for.
    pub fn at_node(self, node: &OperatorNode<'_>) -> Self {
        match self {
            SwapError::InvalidConfiguration(msg) => {
                SwapError::InvalidConfiguration(format!("{}: {}", node.describe(), msg))
            }
            other => other.at_position(node.position),
        }
    }
}
