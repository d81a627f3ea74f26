//! Backend layer descriptors and the builder that snapshots host operators
//! into them.

use super::{Operator, OperatorKind, SwapError, SwapResult};
use crate::asg::DType;
use crate::nn::{Padding, PaddingMode, Shape2d};
use crate::runtime::backend::TensorData;
use ndarray::{Array, Dimension};
use std::fmt;

/// 2D convolution with resolved padding and a parameter snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Conv2dLayer {
    /// `[C_out, C_in / groups, kH, kW]`
    pub weight: TensorData,
    pub bias: Option<TensorData>,
    pub stride: (usize, usize),
    pub padding: (usize, usize),
    pub dilation: (usize, usize),
    pub padding_mode: PaddingMode,
    pub groups: usize,
    pub dtype: DType,
    pub algorithm: String,
}

/// Fully connected layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearLayer {
    /// `[out_features, in_features]`
    pub weight: TensorData,
    pub bias: Option<TensorData>,
    pub dtype: DType,
    pub algorithm: String,
}

/// Max pooling. Padding is already resolved to sizes.
#[derive(Debug, Clone, PartialEq)]
pub struct MaxPool2dLayer {
    pub kernel_shape: (usize, usize),
    pub stride: (usize, usize),
    pub padding: (usize, usize),
    pub dilation: (usize, usize),
    pub ceil_mode: bool,
    pub dtype: DType,
    pub algorithm: String,
}

/// Average pooling.
#[derive(Debug, Clone, PartialEq)]
pub struct AvgPool2dLayer {
    pub kernel_shape: (usize, usize),
    pub stride: (usize, usize),
    pub padding: (usize, usize),
    pub ceil_mode: bool,
    pub count_include_pad: bool,
    pub divisor_override: Option<usize>,
    pub dtype: DType,
    pub algorithm: String,
}

/// Adaptive average pooling. `None` keeps that input dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveAvgPool2dLayer {
    pub output_size: (Option<usize>, Option<usize>),
    pub dtype: DType,
    pub algorithm: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReluLayer {
    pub dtype: DType,
    pub algorithm: String,
}

/// Flatten over `start_dim..=end_dim`. Negative dims count from the end.
#[derive(Debug, Clone, PartialEq)]
pub struct FlattenLayer {
    pub start_dim: isize,
    pub end_dim: isize,
    pub dtype: DType,
    pub algorithm: String,
}

/// An immutable, backend-ready description of one operator.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerDescriptor {
    Conv2d(Conv2dLayer),
    Linear(LinearLayer),
    MaxPool2d(MaxPool2dLayer),
    AvgPool2d(AvgPool2dLayer),
    AdaptiveAvgPool2d(AdaptiveAvgPool2dLayer),
    ReLU(ReluLayer),
    Flatten(FlattenLayer),
}

impl LayerDescriptor {
    /// Operator kind this descriptor runs.
    pub fn kind(&self) -> OperatorKind {
        match self {
            LayerDescriptor::Conv2d(_) => OperatorKind::Conv2d,
            LayerDescriptor::Linear(_) => OperatorKind::Linear,
            LayerDescriptor::MaxPool2d(_) => OperatorKind::MaxPool2d,
            LayerDescriptor::AvgPool2d(_) => OperatorKind::AvgPool2d,
            LayerDescriptor::AdaptiveAvgPool2d(_) => OperatorKind::AdaptiveAvgPool2d,
            LayerDescriptor::ReLU(_) => OperatorKind::ReLU,
            LayerDescriptor::Flatten(_) => OperatorKind::Flatten,
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            LayerDescriptor::Conv2d(l) => l.dtype,
            LayerDescriptor::Linear(l) => l.dtype,
            LayerDescriptor::MaxPool2d(l) => l.dtype,
            LayerDescriptor::AvgPool2d(l) => l.dtype,
            LayerDescriptor::AdaptiveAvgPool2d(l) => l.dtype,
            LayerDescriptor::ReLU(l) => l.dtype,
            LayerDescriptor::Flatten(l) => l.dtype,
        }
    }

    /// Algorithm name the backend is asked to use.
    pub fn algorithm(&self) -> &str {
        match self {
            LayerDescriptor::Conv2d(l) => &l.algorithm,
            LayerDescriptor::Linear(l) => &l.algorithm,
            LayerDescriptor::MaxPool2d(l) => &l.algorithm,
            LayerDescriptor::AvgPool2d(l) => &l.algorithm,
            LayerDescriptor::AdaptiveAvgPool2d(l) => &l.algorithm,
            LayerDescriptor::ReLU(l) => &l.algorithm,
            LayerDescriptor::Flatten(l) => &l.algorithm,
        }
    }

    /// Same parameters, cast to `dtype`, bound to `algorithm`.
    pub fn rebind(&self, dtype: DType, algorithm: &str) -> SwapResult<LayerDescriptor> {
        check_dtype(dtype)?;
        let algorithm = algorithm.to_string();
        let layer = match self {
            LayerDescriptor::Conv2d(l) => LayerDescriptor::Conv2d(Conv2dLayer {
                weight: cast(&l.weight, dtype)?,
                bias: l.bias.as_ref().map(|b| cast(b, dtype)).transpose()?,
                dtype,
                algorithm,
                ..l.clone()
            }),
            LayerDescriptor::Linear(l) => LayerDescriptor::Linear(LinearLayer {
                weight: cast(&l.weight, dtype)?,
                bias: l.bias.as_ref().map(|b| cast(b, dtype)).transpose()?,
                dtype,
                algorithm,
            }),
            LayerDescriptor::MaxPool2d(l) => LayerDescriptor::MaxPool2d(MaxPool2dLayer {
                dtype,
                algorithm,
                ..l.clone()
            }),
            LayerDescriptor::AvgPool2d(l) => LayerDescriptor::AvgPool2d(AvgPool2dLayer {
                dtype,
                algorithm,
                ..l.clone()
            }),
            LayerDescriptor::AdaptiveAvgPool2d(l) => LayerDescriptor::AdaptiveAvgPool2d(AdaptiveAvgPool2dLayer {
                dtype,
                algorithm,
                ..l.clone()
            }),
            LayerDescriptor::ReLU(_) => LayerDescriptor::ReLU(ReluLayer { dtype, algorithm }),
            LayerDescriptor::Flatten(l) => LayerDescriptor::Flatten(FlattenLayer {
                dtype,
                algorithm,
                ..l.clone()
            }),
        };
        Ok(layer)
    }
}

impl fmt::Display for LayerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}] {}", self.kind(), self.algorithm(), self.dtype())?;
        match self {
            LayerDescriptor::Conv2d(l) => write!(
                f,
                " weight={:?} stride={:?} padding={:?} dilation={:?} groups={}",
                l.weight.shape(),
                l.stride,
                l.padding,
                l.dilation,
                l.groups
            ),
            LayerDescriptor::Linear(l) => write!(f, " weight={:?} bias={}", l.weight.shape(), l.bias.is_some()),
            LayerDescriptor::MaxPool2d(l) => write!(
                f,
                " kernel={:?} stride={:?} padding={:?} dilation={:?}",
                l.kernel_shape, l.stride, l.padding, l.dilation
            ),
            LayerDescriptor::AvgPool2d(l) => write!(
                f,
                " kernel={:?} stride={:?} padding={:?}",
                l.kernel_shape, l.stride, l.padding
            ),
            LayerDescriptor::AdaptiveAvgPool2d(l) => write!(f, " output_size={:?}", l.output_size),
            LayerDescriptor::ReLU(_) => Ok(()),
            LayerDescriptor::Flatten(l) => write!(f, " dims={}..={}", l.start_dim, l.end_dim),
        }
    }
}

/// Normalises an int-or-pair hyperparameter to `(h, w)`.
pub fn make_2d(value: &Shape2d, what: &str) -> SwapResult<(usize, usize)> {
    match value {
        Shape2d::Scalar(n) => Ok((*n, *n)),
        Shape2d::Seq(seq) => match seq.as_slice() {
            [h, w] => Ok((*h, *w)),
            _ => Err(SwapError::InvalidConfiguration(format!(
                "{} must be an int or a pair, got {:?}",
                what, seq
            ))),
        },
    }
}

/// Resolves a padding policy to explicit `(h, w)` padding.
///
/// `same` is only defined for unit stride.
pub fn make_padding_2d(
    padding: &Padding,
    stride: (usize, usize),
    dilation: (usize, usize),
    kernel: (usize, usize),
) -> SwapResult<(usize, usize)> {
    match padding {
        Padding::Valid => Ok((0, 0)),
        Padding::Same => {
            if stride != (1, 1) {
                return Err(SwapError::InvalidConfiguration(format!(
                    "padding 'same' requires stride 1, got {:?}",
                    stride
                )));
            }
            Ok((
                dilation.0 * kernel.0.saturating_sub(1) / 2,
                dilation.1 * kernel.1.saturating_sub(1) / 2,
            ))
        }
        Padding::Size(size) => make_2d(size, "padding"),
    }
}

fn unsupported_dtype(dtype: DType) -> SwapError {
    SwapError::InvalidConfiguration(format!("unsupported dtype {}: expected f32 or f64", dtype))
}

fn check_dtype(dtype: DType) -> SwapResult<()> {
    if dtype.is_float() {
        Ok(())
    } else {
        Err(unsupported_dtype(dtype))
    }
}

fn to_data<D: Dimension>(array: &Array<f32, D>, dtype: DType) -> SwapResult<TensorData> {
    match dtype {
        DType::F32 => Ok(TensorData::F32(array.clone().into_dyn())),
        DType::F64 => Ok(TensorData::F64(array.mapv(f64::from).into_dyn())),
        other => Err(unsupported_dtype(other)),
    }
}

fn cast(data: &TensorData, dtype: DType) -> SwapResult<TensorData> {
    data.cast(dtype).map_err(|e| SwapError::InvalidConfiguration(e.to_string()))
}

/// Snapshots `operator` into a descriptor of `dtype` bound to `algorithm`.
///
/// Host parameters are copied; the descriptor never aliases the module.
pub fn build(operator: &Operator<'_>, dtype: DType, algorithm: &str) -> SwapResult<LayerDescriptor> {
    check_dtype(dtype)?;
    let algorithm = algorithm.to_string();
    let layer = match operator {
        Operator::Conv2d(conv) => {
            let config = &conv.config;
            let (_, _, kh, kw) = conv.weight.dim();
            let stride = make_2d(&config.stride, "stride")?;
            let dilation = make_2d(&config.dilation, "dilation")?;
            let padding = make_padding_2d(&config.padding, stride, dilation, (kh, kw))?;
            LayerDescriptor::Conv2d(Conv2dLayer {
                weight: to_data(&conv.weight, dtype)?,
                bias: conv.bias.as_ref().map(|b| to_data(b, dtype)).transpose()?,
                stride,
                padding,
                dilation,
                padding_mode: config.padding_mode,
                groups: config.groups,
                dtype,
                algorithm,
            })
        }
        Operator::Linear(linear) => LayerDescriptor::Linear(LinearLayer {
            weight: to_data(&linear.weight, dtype)?,
            bias: linear.bias.as_ref().map(|b| to_data(b, dtype)).transpose()?,
            dtype,
            algorithm,
        }),
        Operator::MaxPool2d(pool) => LayerDescriptor::MaxPool2d(MaxPool2dLayer {
            kernel_shape: make_2d(&pool.kernel_size, "kernel_size")?,
            stride: make_2d(pool.effective_stride(), "stride")?,
            padding: make_2d(&pool.padding, "padding")?,
            dilation: make_2d(&pool.dilation, "dilation")?,
            ceil_mode: pool.ceil_mode,
            dtype,
            algorithm,
        }),
        Operator::AvgPool2d(pool) => LayerDescriptor::AvgPool2d(AvgPool2dLayer {
            kernel_shape: make_2d(&pool.kernel_size, "kernel_size")?,
            stride: make_2d(pool.effective_stride(), "stride")?,
            padding: make_2d(&pool.padding, "padding")?,
            ceil_mode: pool.ceil_mode,
            count_include_pad: pool.count_include_pad,
            divisor_override: pool.divisor_override,
            dtype,
            algorithm,
        }),
        Operator::AdaptiveAvgPool2d(pool) => LayerDescriptor::AdaptiveAvgPool2d(AdaptiveAvgPool2dLayer {
            output_size: pool.output_size,
            dtype,
            algorithm,
        }),
        Operator::ReLU => LayerDescriptor::ReLU(ReluLayer { dtype, algorithm }),
        Operator::Flatten(flatten) => LayerDescriptor::Flatten(FlattenLayer {
            start_dim: flatten.start_dim,
            end_dim: flatten.end_dim,
            dtype,
            algorithm,
        }),
        Operator::Lowered(layer) => layer.rebind(dtype, &algorithm)?,
    };
    Ok(layer)
}
