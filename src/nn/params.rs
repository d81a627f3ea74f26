//! Shape-like hyperparameters as host modules accept them: a single integer
//! or an explicit sequence, and named padding policies.

use crate::swap::SwapError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kernel size, stride, dilation or explicit padding of a 2D operator.
///
/// Normalised to an `(h, w)` pair by [`crate::swap::make_2d`]; a sequence
/// whose length is not 2 is rejected there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Shape2d {
    Scalar(usize),
    Seq(Vec<usize>),
}

impl From<usize> for Shape2d {
    fn from(v: usize) -> Self {
        Shape2d::Scalar(v)
    }
}

impl From<(usize, usize)> for Shape2d {
    fn from((h, w): (usize, usize)) -> Self {
        Shape2d::Seq(vec![h, w])
    }
}

impl From<[usize; 2]> for Shape2d {
    fn from(v: [usize; 2]) -> Self {
        Shape2d::Seq(v.to_vec())
    }
}

impl From<Vec<usize>> for Shape2d {
    fn from(v: Vec<usize>) -> Self {
        Shape2d::Seq(v)
    }
}

impl fmt::Display for Shape2d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape2d::Scalar(v) => write!(f, "{}", v),
            Shape2d::Seq(v) => write!(f, "{:?}", v),
        }
    }
}

/// Padding of a convolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Padding {
    Size(Shape2d),
    /// No padding.
    Valid,
    /// Pad so that a unit-stride output keeps the input's spatial size.
    Same,
}

impl Default for Padding {
    fn default() -> Self {
        Padding::Size(Shape2d::Scalar(0))
    }
}

impl From<usize> for Padding {
    fn from(v: usize) -> Self {
        Padding::Size(Shape2d::Scalar(v))
    }
}

impl From<(usize, usize)> for Padding {
    fn from(v: (usize, usize)) -> Self {
        Padding::Size(v.into())
    }
}

impl From<Shape2d> for Padding {
    fn from(v: Shape2d) -> Self {
        Padding::Size(v)
    }
}

impl FromStr for Padding {
    type Err = SwapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "valid" => Ok(Padding::Valid),
            "same" => Ok(Padding::Same),
            other => Err(SwapError::InvalidConfiguration(format!(
                "invalid padding string: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Padding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Padding::Size(s) => write!(f, "{}", s),
            Padding::Valid => write!(f, "valid"),
            Padding::Same => write!(f, "same"),
        }
    }
}

/// How a convolution fills its padded border.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaddingMode {
    #[default]
    Zeros,
    Reflect,
    Replicate,
    Circular,
}

impl fmt::Display for PaddingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaddingMode::Zeros => "zeros",
            PaddingMode::Reflect => "reflect",
            PaddingMode::Replicate => "replicate",
            PaddingMode::Circular => "circular",
        };
        write!(f, "{}", s)
    }
}
