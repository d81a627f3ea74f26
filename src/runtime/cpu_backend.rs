//! Reference CPU backend.
//!
//! Executes layer descriptors with the `ndarray` kernels in
//! [`super::kernels`], in either precision. Each kind understands a small
//! set of algorithm names; anything else is an `UnsupportedAlgorithm` error.

use super::backend::{Backend, RuntimeError, TensorData};
use super::kernels::{self, Element};
use crate::nn::PaddingMode;
use crate::swap::{LayerDescriptor, DEFAULT_ALGORITHM};
use ndarray::{ArrayD, ArrayView, Dimension, Ix1, Ix2, Ix4};

#[derive(Debug, Default, Clone, Copy)]
pub struct CpuBackend;

impl CpuBackend {
    pub const NAME: &'static str = "cpu";

    pub fn new() -> Self {
        Self
    }

    /// Algorithm names this backend runs for `layer`'s kind.
    pub fn algorithms(layer: &LayerDescriptor) -> &'static [&'static str] {
        match layer {
            LayerDescriptor::Conv2d(l) if l.groups == 1 => &[DEFAULT_ALGORITHM, "direct", "kn2row"],
            LayerDescriptor::Conv2d(_) => &[DEFAULT_ALGORITHM, "direct"],
            LayerDescriptor::Linear(_) => &[DEFAULT_ALGORITHM, "gemm"],
            LayerDescriptor::MaxPool2d(_) | LayerDescriptor::AvgPool2d(_) | LayerDescriptor::AdaptiveAvgPool2d(_) => {
                &[DEFAULT_ALGORITHM, "direct"]
            }
            LayerDescriptor::ReLU(_) | LayerDescriptor::Flatten(_) => &[DEFAULT_ALGORITHM],
        }
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn forward(&self, layer: &LayerDescriptor, input: &TensorData) -> Result<TensorData, RuntimeError> {
        if input.dtype() != layer.dtype() {
            return Err(RuntimeError::TypeError {
                expected: format!("{} input for {}", layer.dtype(), layer.kind()),
                actual: input.dtype().to_string(),
            });
        }
        if !Self::algorithms(layer).contains(&layer.algorithm()) {
            return Err(RuntimeError::UnsupportedAlgorithm {
                backend: Self::NAME.to_string(),
                kind: layer.kind().to_string(),
                algorithm: layer.algorithm().to_string(),
            });
        }
        match input {
            TensorData::F32(x) => run::<f32>(layer, x).map(f32::wrap),
            TensorData::F64(x) => run::<f64>(layer, x).map(f64::wrap),
        }
    }
}

/// Views a parameter as an array of rank `D` in element type `T`.
fn param<T: Element, D: Dimension>(data: &TensorData) -> Result<ArrayView<'_, T, D>, RuntimeError> {
    T::data(data)
        .ok_or_else(|| RuntimeError::TypeError {
            expected: T::DTYPE.to_string(),
            actual: data.dtype().to_string(),
        })?
        .view()
        .into_dimensionality::<D>()
        .map_err(|e| RuntimeError::ShapeError(e.to_string()))
}

fn run<T: Element>(layer: &LayerDescriptor, x: &ArrayD<T>) -> Result<ArrayD<T>, RuntimeError> {
    match layer {
        LayerDescriptor::Conv2d(conv) => {
            if conv.padding_mode != PaddingMode::Zeros {
                return Err(RuntimeError::UnimplementedOperation(format!(
                    "conv2d with padding_mode '{}'",
                    conv.padding_mode
                )));
            }
            let weight = param::<T, Ix4>(&conv.weight)?;
            let bias = conv.bias.as_ref().map(param::<T, Ix1>).transpose()?;
            if conv.algorithm == "kn2row" {
                kernels::spatial(x, |v| {
                    kernels::conv2d_kn2row(v, weight, bias, conv.stride, conv.padding, conv.dilation)
                })
            } else {
                kernels::spatial(x, |v| {
                    kernels::conv2d_direct(v, weight, bias, conv.stride, conv.padding, conv.dilation, conv.groups)
                })
            }
        }
        LayerDescriptor::Linear(linear) => {
            let weight = param::<T, Ix2>(&linear.weight)?;
            let bias = linear.bias.as_ref().map(param::<T, Ix1>).transpose()?;
            kernels::linear(x.view(), weight, bias)
        }
        LayerDescriptor::MaxPool2d(pool) => kernels::spatial(x, |v| {
            kernels::max_pool2d(v, pool.kernel_shape, pool.stride, pool.padding, pool.dilation, pool.ceil_mode)
        }),
        LayerDescriptor::AvgPool2d(pool) => kernels::spatial(x, |v| {
            kernels::avg_pool2d(
                v,
                pool.kernel_shape,
                pool.stride,
                pool.padding,
                pool.ceil_mode,
                pool.count_include_pad,
                pool.divisor_override,
            )
        }),
        LayerDescriptor::AdaptiveAvgPool2d(pool) => {
            kernels::spatial(x, |v| kernels::adaptive_avg_pool2d(v, pool.output_size))
        }
        LayerDescriptor::ReLU(_) => Ok(kernels::relu(x.view())),
        LayerDescriptor::Flatten(flatten) => kernels::flatten(x.view(), flatten.start_dim, flatten.end_dim),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asg::DType;
    use crate::nn::{Conv2d, Conv2dConfig, Linear, MaxPool2d, Module};
    use crate::swap::{build, Operator};
    use ndarray::{array, Array4, IxDyn};

    fn assert_close(a: &ArrayD<f32>, b: &ArrayD<f32>, tol: f32) {
        assert_eq!(a.shape(), b.shape());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() <= tol, "{} vs {}", x, y);
        }
    }

    #[test]
    fn test_conv_algorithms_match_host() {
        let conv = Conv2d::from_config(Conv2dConfig::new(2, 3, (3, 3)).with_padding(1));
        let x = ArrayD::from_shape_fn(IxDyn(&[1, 2, 5, 5]), |ix| (ix[2] * 5 + ix[3]) as f32 * 0.1 - ix[1] as f32);
        let expected = conv.eval(&x).unwrap();

        for algorithm in ["default", "direct", "kn2row"] {
            let layer = build(&Operator::Conv2d(&conv), DType::F64, algorithm).unwrap();
            let input = TensorData::from_host(&x, DType::F64).unwrap();
            let out = CpuBackend.forward(&layer, &input).unwrap();
            assert_eq!(out.dtype(), DType::F64);
            assert_close(&out.into_host(), &expected, 1e-4);
        }
    }

    #[test]
    fn test_unknown_algorithm() {
        let linear = Linear::new(2, 2);
        let layer = build(&Operator::Linear(&linear), DType::F32, "winograd").unwrap();
        let input = TensorData::F32(ArrayD::zeros(IxDyn(&[1, 2])));
        let err = CpuBackend.forward(&layer, &input).unwrap_err();
        assert_eq!(
            err,
            RuntimeError::UnsupportedAlgorithm {
                backend: "cpu".to_string(),
                kind: "linear".to_string(),
                algorithm: "winograd".to_string()
            }
        );
    }

    #[test]
    fn test_kn2row_requires_single_group() {
        let config = Conv2dConfig::new(2, 2, (1, 1)).with_groups(2);
        let conv = Conv2d::from_weights(Array4::ones((2, 1, 1, 1)), None, config);
        let layer = build(&Operator::Conv2d(&conv), DType::F32, "kn2row").unwrap();
        let input = TensorData::F32(ArrayD::ones(IxDyn(&[2, 3, 3])));
        assert!(matches!(
            CpuBackend.forward(&layer, &input),
            Err(RuntimeError::UnsupportedAlgorithm { .. })
        ));
    }

    #[test]
    fn test_dtype_mismatch() {
        let layer = build(&Operator::ReLU, DType::F64, "default").unwrap();
        let input = TensorData::F32(array![-1.0, 2.0].into_dyn());
        assert!(matches!(
            CpuBackend.forward(&layer, &input),
            Err(RuntimeError::TypeError { .. })
        ));
    }

    #[test]
    fn test_max_pool_unbatched() {
        let pool = MaxPool2d::new(2);
        let layer = build(&Operator::MaxPool2d(&pool), DType::F32, "direct").unwrap();
        let x = array![[[1.0f32, 2.0], [-3.0, 0.5]]].into_dyn();
        let out = CpuBackend.forward(&layer, &TensorData::F32(x)).unwrap();
        assert_eq!(out, TensorData::F32(array![[[2.0f32]]].into_dyn()));
    }
}
