//! Abstract interface for execution backends, plus the typed tensor data
//! that crosses the boundary between the host framework and a backend.

use crate::asg::{DType, NodeId};
use crate::swap::{LayerDescriptor, SwapError};
use ndarray::ArrayD;
use thiserror::Error;

/// Errors raised while executing a layer or a traced graph.
/// Shared by every backend and by the host interpreter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("Type mismatch: operation expected {expected}, got {actual}.")]
    TypeError { expected: String, actual: String },

    #[error("Tensor shape error: {0}. Check the dimensions of the input tensors.")]
    ShapeError(String),

    #[error("Backend '{backend}' has no algorithm '{algorithm}' for {kind}.")]
    UnsupportedAlgorithm {
        backend: String,
        kind: String,
        algorithm: String,
    },

    #[error("Operation '{0}' is not implemented by this backend.")]
    UnimplementedOperation(String),

    #[error("Submodule '{0}' not found in the executed module tree.")]
    ModuleNotFound(String),

    #[error("Node {0} has no computed value. The graph is not in execution order.")]
    MissingValue(NodeId),

    #[error("Invalid layer configuration: {0}")]
    Configuration(String),
}

impl From<SwapError> for RuntimeError {
    fn from(err: SwapError) -> Self {
        RuntimeError::Configuration(err.to_string())
    }
}

/// Tensor data in one of the two precisions a backend can run.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

impl TensorData {
    pub fn dtype(&self) -> DType {
        match self {
            TensorData::F32(_) => DType::F32,
            TensorData::F64(_) => DType::F64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            TensorData::F32(a) => a.shape(),
            TensorData::F64(a) => a.shape(),
        }
    }

    /// Converts a host (single precision) tensor into backend data of `dtype`.
    pub fn from_host(host: &ArrayD<f32>, dtype: DType) -> Result<Self, RuntimeError> {
        match dtype {
            DType::F32 => Ok(TensorData::F32(host.clone())),
            DType::F64 => Ok(TensorData::F64(host.mapv(f64::from))),
            other => Err(RuntimeError::TypeError {
                expected: "f32 or f64".to_string(),
                actual: other.to_string(),
            }),
        }
    }

    /// Converts back into the host representation.
    pub fn into_host(self) -> ArrayD<f32> {
        match self {
            TensorData::F32(a) => a,
            TensorData::F64(a) => a.mapv(|v| v as f32),
        }
    }

    pub fn cast(&self, dtype: DType) -> Result<Self, RuntimeError> {
        match (self, dtype) {
            (TensorData::F32(a), DType::F32) => Ok(TensorData::F32(a.clone())),
            (TensorData::F64(a), DType::F64) => Ok(TensorData::F64(a.clone())),
            (TensorData::F32(a), DType::F64) => Ok(TensorData::F64(a.mapv(f64::from))),
            (TensorData::F64(a), DType::F32) => Ok(TensorData::F32(a.mapv(|v| v as f32))),
            (_, other) => Err(RuntimeError::TypeError {
                expected: "f32 or f64".to_string(),
                actual: other.to_string(),
            }),
        }
    }
}

/// An execution backend: runs one lowered layer on one input.
///
/// Implementations must be deterministic and free of side effects for a
/// given descriptor and input.
pub trait Backend {
    /// Short identifier used in diagnostics.
    fn name(&self) -> &str;

    /// Runs `layer` on `input` with the layer's bound algorithm.
    fn forward(&self, layer: &LayerDescriptor, input: &TensorData)
        -> Result<TensorData, RuntimeError>;
}
