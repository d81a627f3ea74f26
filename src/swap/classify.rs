//! Operator classification: maps module views and inline calls onto the
//! operator kinds the engine can lower.

use super::{LayerDescriptor, SwapError, SwapResult};
use crate::asg::{flatten_dims, Arg, Function};
use crate::nn::{AdaptiveAvgPool2d, AvgPool2d, Conv2d, Flatten, Linear, MaxPool2d, Module, ModuleView};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The operator kinds a backend can be asked to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatorKind {
    Conv2d,
    Linear,
    MaxPool2d,
    AvgPool2d,
    AdaptiveAvgPool2d,
    ReLU,
    Flatten,
}

impl OperatorKind {
    /// Every kind, in declaration order.
    pub const ALL: [OperatorKind; 7] = [
        OperatorKind::Conv2d,
        OperatorKind::Linear,
        OperatorKind::MaxPool2d,
        OperatorKind::AvgPool2d,
        OperatorKind::AdaptiveAvgPool2d,
        OperatorKind::ReLU,
        OperatorKind::Flatten,
    ];

    /// Lowercase name used in config files and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorKind::Conv2d => "conv2d",
            OperatorKind::Linear => "linear",
            OperatorKind::MaxPool2d => "maxpool2d",
            OperatorKind::AvgPool2d => "avgpool2d",
            OperatorKind::AdaptiveAvgPool2d => "adaptiveavgpool2d",
            OperatorKind::ReLU => "relu",
            OperatorKind::Flatten => "flatten",
        }
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatorKind {
    type Err = SwapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperatorKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| SwapError::InvalidConfiguration(format!("unknown operator kind `{}`", s)))
    }
}

/// A classified operator.
///
/// Parameterised kinds borrow the host module. ReLU and inline flatten have
/// no module to borrow, so they carry an owned proxy instead.
#[derive(Debug, Clone, Copy)]
pub enum Operator<'a> {
    Conv2d(&'a Conv2d),
    Linear(&'a Linear),
    MaxPool2d(&'a MaxPool2d),
    AvgPool2d(&'a AvgPool2d),
    AdaptiveAvgPool2d(&'a AdaptiveAvgPool2d),
    ReLU,
    Flatten(Flatten),
    /// Already runs on a backend.
    Lowered(&'a LayerDescriptor),
}

impl Operator<'_> {
    pub fn kind(&self) -> OperatorKind {
        match self {
            Operator::Conv2d(_) => OperatorKind::Conv2d,
            Operator::Linear(_) => OperatorKind::Linear,
            Operator::MaxPool2d(_) => OperatorKind::MaxPool2d,
            Operator::AvgPool2d(_) => OperatorKind::AvgPool2d,
            Operator::AdaptiveAvgPool2d(_) => OperatorKind::AdaptiveAvgPool2d,
            Operator::ReLU => OperatorKind::ReLU,
            Operator::Flatten(_) => OperatorKind::Flatten,
            Operator::Lowered(layer) => layer.kind(),
        }
    }

    /// True for modules a previous swap already replaced.
    pub fn is_lowered(&self) -> bool {
        matches!(self, Operator::Lowered(_))
    }
}

/// Classifies a called leaf module. `Ok(None)` means the module is skipped.
pub fn classify_module(module: &dyn Module) -> SwapResult<Option<Operator<'_>>> {
    let operator = match module.view() {
        ModuleView::Conv2d(m) => Operator::Conv2d(m),
        ModuleView::Linear(m) => Operator::Linear(m),
        ModuleView::MaxPool2d(m) => Operator::MaxPool2d(m),
        ModuleView::AvgPool2d(m) => Operator::AvgPool2d(m),
        ModuleView::AdaptiveAvgPool2d(m) => Operator::AdaptiveAvgPool2d(m),
        ModuleView::ReLU(_) => Operator::ReLU,
        ModuleView::Flatten(m) => Operator::Flatten(*m),
        ModuleView::Lowered(layer) => Operator::Lowered(layer),
        ModuleView::Dropout(m) => {
            if m.is_training() {
                warn!("skipping dropout (p = {}) that is still in training mode", m.p);
            }
            return Ok(None);
        }
        ModuleView::Container => return Err(SwapError::unsupported("container called as a leaf module")),
        ModuleView::Other(type_name) => return Err(SwapError::unsupported(format!("module `{}`", type_name))),
    };
    Ok(Some(operator))
}

/// Classifies an inline function call.
pub fn classify_function(
    function: &Function,
    args: &[Arg],
    kwargs: &BTreeMap<String, Arg>,
) -> SwapResult<Operator<'static>> {
    match function {
        Function::Relu => Ok(Operator::ReLU),
        Function::Flatten => {
            let (start_dim, end_dim) =
                flatten_dims(args, kwargs).map_err(|e| SwapError::InvalidConfiguration(e.to_string()))?;
            Ok(Operator::Flatten(Flatten::with_dims(start_dim as isize, end_dim as isize)))
        }
        other => Err(SwapError::unsupported(format!("function `{}`", other))),
    }
}
