//! Reference `ndarray` kernels shared by the host modules and `CpuBackend`.
//!
//! Every kernel is generic over the element type through [`Element`], which
//! ties a Rust float type to its `DType` and to the matching `TensorData`
//! variant. Spatial kernels work on NCHW arrays; callers that accept
//! unbatched CHW input go through [`spatial`].

use super::backend::{RuntimeError, TensorData};
use crate::asg::DType;
use ndarray::{s, Array2, Array4, ArrayD, ArrayView1, ArrayView2, ArrayView4, ArrayViewD, Axis, Ix2, Ix4, IxDyn, LinalgScalar};
use num_traits::Float;
use std::fmt;
use std::ops::AddAssign;

/// Bridge between a Rust float type and the runtime `DType`.
pub trait Element: Float + LinalgScalar + AddAssign + fmt::Debug + Send + Sync + 'static {
    const DTYPE: DType;

    fn from_usize(n: usize) -> Self;

    /// Borrows the array if `data` holds this element type.
    fn data(data: &TensorData) -> Option<&ArrayD<Self>>;

    fn wrap(array: ArrayD<Self>) -> TensorData;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    fn from_usize(n: usize) -> Self {
        n as f32
    }

    fn data(data: &TensorData) -> Option<&ArrayD<Self>> {
        match data {
            TensorData::F32(a) => Some(a),
            _ => None,
        }
    }

    fn wrap(array: ArrayD<Self>) -> TensorData {
        TensorData::F32(array)
    }
}

impl Element for f64 {
    const DTYPE: DType = DType::F64;

    fn from_usize(n: usize) -> Self {
        n as f64
    }

    fn data(data: &TensorData) -> Option<&ArrayD<Self>> {
        match data {
            TensorData::F64(a) => Some(a),
            _ => None,
        }
    }

    fn wrap(array: ArrayD<Self>) -> TensorData {
        TensorData::F64(array)
    }
}

type Result<T> = std::result::Result<T, RuntimeError>;

/// Output length of one spatial dimension of a convolution or pooling window.
///
/// With `ceil_mode` the last window must still start inside the input or the
/// left padding.
pub fn output_dim(
    input: usize,
    kernel: usize,
    padding: usize,
    dilation: usize,
    stride: usize,
    ceil_mode: bool,
) -> Result<usize> {
    if stride == 0 || kernel == 0 || dilation == 0 {
        return Err(RuntimeError::ShapeError(format!(
            "kernel {}, stride {} and dilation {} must be positive",
            kernel, stride, dilation
        )));
    }
    let effective = dilation * (kernel - 1) + 1;
    let padded = input + 2 * padding;
    if padded < effective {
        return Err(RuntimeError::ShapeError(format!(
            "window of size {} does not fit input {} with padding {}",
            effective, input, padding
        )));
    }
    let span = padded - effective;
    let mut out = if ceil_mode {
        (span + stride - 1) / stride + 1
    } else {
        span / stride + 1
    };
    if ceil_mode && (out - 1) * stride >= input + padding {
        out -= 1;
    }
    Ok(out)
}

/// Runs an NCHW kernel on CHW or NCHW input, keeping the caller's rank.
pub fn spatial<T, F>(input: &ArrayD<T>, kernel: F) -> Result<ArrayD<T>>
where
    T: Element,
    F: FnOnce(ArrayView4<T>) -> Result<Array4<T>>,
{
    match input.ndim() {
        3 => {
            let batched = input
                .view()
                .insert_axis(Axis(0))
                .into_dimensionality::<Ix4>()
                .map_err(|e| RuntimeError::ShapeError(e.to_string()))?;
            let out = kernel(batched)?;
            Ok(out.index_axis_move(Axis(0), 0).into_dyn())
        }
        4 => {
            let batched = input
                .view()
                .into_dimensionality::<Ix4>()
                .map_err(|e| RuntimeError::ShapeError(e.to_string()))?;
            Ok(kernel(batched)?.into_dyn())
        }
        n => Err(RuntimeError::ShapeError(format!(
            "spatial operator expects a 3D or 4D input, got {}D",
            n
        ))),
    }
}

/// Direct convolution, one output element at a time.
#[allow(clippy::too_many_arguments)]
pub fn conv2d_direct<T: Element>(
    input: ArrayView4<T>,
    weight: ArrayView4<T>,
    bias: Option<ArrayView1<T>>,
    stride: (usize, usize),
    padding: (usize, usize),
    dilation: (usize, usize),
    groups: usize,
) -> Result<Array4<T>> {
    let (batch_size, in_channels, in_h, in_w) = input.dim();
    let (out_channels, weight_in_channels, kernel_h, kernel_w) = weight.dim();

    if groups == 0 || in_channels != weight_in_channels * groups || out_channels % groups != 0 {
        return Err(RuntimeError::ShapeError(format!(
            "Conv2d: input channels {} != weight_in_channels {} * groups {}",
            in_channels, weight_in_channels, groups
        )));
    }
    check_bias(bias, out_channels)?;

    let (stride_h, stride_w) = stride;
    let (pad_h, pad_w) = padding;
    let (dil_h, dil_w) = dilation;
    let out_h = output_dim(in_h, kernel_h, pad_h, dil_h, stride_h, false)?;
    let out_w = output_dim(in_w, kernel_w, pad_w, dil_w, stride_w, false)?;

    let mut output = Array4::<T>::zeros((batch_size, out_channels, out_h, out_w));
    let out_channels_per_group = out_channels / groups;

    for n in 0..batch_size {
        for g in 0..groups {
            let in_ch_start = g * weight_in_channels;
            let out_ch_start = g * out_channels_per_group;

            for oc in 0..out_channels_per_group {
                let out_ch = out_ch_start + oc;
                for oh in 0..out_h {
                    for ow in 0..out_w {
                        let mut sum = T::zero();
                        for ic in 0..weight_in_channels {
                            let in_ch = in_ch_start + ic;
                            for kh in 0..kernel_h {
                                for kw in 0..kernel_w {
                                    let ih = (oh * stride_h + kh * dil_h) as isize - pad_h as isize;
                                    let iw = (ow * stride_w + kw * dil_w) as isize - pad_w as isize;
                                    if ih >= 0 && ih < in_h as isize && iw >= 0 && iw < in_w as isize {
                                        sum += input[[n, in_ch, ih as usize, iw as usize]]
                                            * weight[[out_ch, ic, kh, kw]];
                                    }
                                }
                            }
                        }
                        if let Some(b) = bias {
                            sum += b[out_ch];
                        }
                        output[[n, out_ch, oh, ow]] = sum;
                    }
                }
            }
        }
    }

    Ok(output)
}

/// Kernel-to-row convolution: the kernel is split into `kh * kw` 1x1
/// convolutions whose products are shifted and accumulated into the output.
pub fn conv2d_kn2row<T: Element>(
    input: ArrayView4<T>,
    weight: ArrayView4<T>,
    bias: Option<ArrayView1<T>>,
    stride: (usize, usize),
    padding: (usize, usize),
    dilation: (usize, usize),
) -> Result<Array4<T>> {
    let (batch_size, in_channels, in_h, in_w) = input.dim();
    let (out_channels, weight_in_channels, kernel_h, kernel_w) = weight.dim();
    if in_channels != weight_in_channels {
        return Err(RuntimeError::ShapeError(format!(
            "kn2row conv2d: input channels {} != weight channels {}",
            in_channels, weight_in_channels
        )));
    }
    check_bias(bias, out_channels)?;

    let (stride_h, stride_w) = stride;
    let (pad_h, pad_w) = padding;
    let (dil_h, dil_w) = dilation;
    let out_h = output_dim(in_h, kernel_h, pad_h, dil_h, stride_h, false)?;
    let out_w = output_dim(in_w, kernel_w, pad_w, dil_w, stride_w, false)?;

    let mut output = Array4::<T>::zeros((batch_size, out_channels, out_h, out_w));

    for kh in 0..kernel_h {
        for kw in 0..kernel_w {
            let w_k: ArrayView2<T> = weight.slice(s![.., .., kh, kw]);
            for n in 0..batch_size {
                for oh in 0..out_h {
                    let ih = (oh * stride_h + kh * dil_h) as isize - pad_h as isize;
                    if ih < 0 || ih >= in_h as isize {
                        continue;
                    }
                    for ow in 0..out_w {
                        let iw = (ow * stride_w + kw * dil_w) as isize - pad_w as isize;
                        if iw < 0 || iw >= in_w as isize {
                            continue;
                        }
                        let column = input.slice(s![n, .., ih as usize, iw as usize]);
                        let mut dst = output.slice_mut(s![n, .., oh, ow]);
                        dst += &w_k.dot(&column);
                    }
                }
            }
        }
    }

    if let Some(b) = bias {
        for n in 0..batch_size {
            for oc in 0..out_channels {
                output
                    .slice_mut(s![n, oc, .., ..])
                    .mapv_inplace(|v| v + b[oc]);
            }
        }
    }

    Ok(output)
}

fn check_bias<T>(bias: Option<ArrayView1<T>>, out_channels: usize) -> Result<()> {
    match bias {
        Some(b) if b.len() != out_channels => Err(RuntimeError::ShapeError(format!(
            "bias has {} elements, expected {}",
            b.len(),
            out_channels
        ))),
        _ => Ok(()),
    }
}

/// `y = x W^T + b` for a 1D sample or a 2D batch. `weight` is
/// `[out_features, in_features]`.
pub fn linear<T: Element>(
    input: ArrayViewD<T>,
    weight: ArrayView2<T>,
    bias: Option<ArrayView1<T>>,
) -> Result<ArrayD<T>> {
    let (out_features, in_features) = weight.dim();
    check_bias(bias, out_features)?;
    let unbatched = input.ndim() == 1;
    let batch: Array2<T> = match input.ndim() {
        1 => input
            .insert_axis(Axis(0))
            .into_dimensionality::<Ix2>()
            .map_err(|e| RuntimeError::ShapeError(e.to_string()))?
            .to_owned(),
        2 => input
            .into_dimensionality::<Ix2>()
            .map_err(|e| RuntimeError::ShapeError(e.to_string()))?
            .to_owned(),
        n => {
            return Err(RuntimeError::ShapeError(format!(
                "linear expects a 1D or 2D input, got {}D",
                n
            )))
        }
    };
    if batch.ncols() != in_features {
        return Err(RuntimeError::ShapeError(format!(
            "Invalid matrix multiplication: input width={} weight width={}",
            batch.ncols(),
            in_features
        )));
    }

    let mut out = batch.dot(&weight.t());
    if let Some(b) = bias {
        out += &b;
    }
    if unbatched {
        Ok(out.index_axis_move(Axis(0), 0).into_dyn())
    } else {
        Ok(out.into_dyn())
    }
}

/// Max pooling. Padded positions never win.
pub fn max_pool2d<T: Element>(
    input: ArrayView4<T>,
    kernel: (usize, usize),
    stride: (usize, usize),
    padding: (usize, usize),
    dilation: (usize, usize),
    ceil_mode: bool,
) -> Result<Array4<T>> {
    let (n, c, in_h, in_w) = input.dim();
    let out_h = output_dim(in_h, kernel.0, padding.0, dilation.0, stride.0, ceil_mode)?;
    let out_w = output_dim(in_w, kernel.1, padding.1, dilation.1, stride.1, ceil_mode)?;
    let mut output = Array4::<T>::zeros((n, c, out_h, out_w));

    for n_idx in 0..n {
        for c_idx in 0..c {
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let mut cur_max = T::neg_infinity();
                    for kr in 0..kernel.0 {
                        for kc in 0..kernel.1 {
                            let ih = (oh * stride.0 + kr * dilation.0) as isize - padding.0 as isize;
                            let iw = (ow * stride.1 + kc * dilation.1) as isize - padding.1 as isize;
                            if ih >= 0 && ih < in_h as isize && iw >= 0 && iw < in_w as isize {
                                cur_max = cur_max.max(input[[n_idx, c_idx, ih as usize, iw as usize]]);
                            }
                        }
                    }
                    output[[n_idx, c_idx, oh, ow]] = cur_max;
                }
            }
        }
    }

    Ok(output)
}

/// Average pooling with the usual divisor rules: `divisor_override` wins,
/// then `count_include_pad` counts padded cells, otherwise only real cells.
#[allow(clippy::too_many_arguments)]
pub fn avg_pool2d<T: Element>(
    input: ArrayView4<T>,
    kernel: (usize, usize),
    stride: (usize, usize),
    padding: (usize, usize),
    ceil_mode: bool,
    count_include_pad: bool,
    divisor_override: Option<usize>,
) -> Result<Array4<T>> {
    if divisor_override == Some(0) {
        return Err(RuntimeError::ShapeError("divisor_override must be positive".to_string()));
    }
    let (n, c, in_h, in_w) = input.dim();
    let out_h = output_dim(in_h, kernel.0, padding.0, 1, stride.0, ceil_mode)?;
    let out_w = output_dim(in_w, kernel.1, padding.1, 1, stride.1, ceil_mode)?;
    let mut output = Array4::<T>::zeros((n, c, out_h, out_w));

    for n_idx in 0..n {
        for c_idx in 0..c {
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let h_start = (oh * stride.0) as isize - padding.0 as isize;
                    let w_start = (ow * stride.1) as isize - padding.1 as isize;
                    let mut total = T::zero();
                    let mut pooled = 0usize;
                    for kr in 0..kernel.0 {
                        for kc in 0..kernel.1 {
                            let ih = h_start + kr as isize;
                            let iw = w_start + kc as isize;
                            if ih >= 0 && ih < in_h as isize && iw >= 0 && iw < in_w as isize {
                                total += input[[n_idx, c_idx, ih as usize, iw as usize]];
                                pooled += 1;
                            }
                        }
                    }

                    let divisor = match divisor_override {
                        Some(d) => d,
                        None if count_include_pad => {
                            let h_end = (h_start + kernel.0 as isize).min((in_h + padding.0) as isize);
                            let w_end = (w_start + kernel.1 as isize).min((in_w + padding.1) as isize);
                            ((h_end - h_start) * (w_end - w_start)) as usize
                        }
                        None => pooled,
                    };
                    output[[n_idx, c_idx, oh, ow]] = if divisor > 0 {
                        total / T::from_usize(divisor)
                    } else {
                        T::zero()
                    };
                }
            }
        }
    }

    Ok(output)
}

/// Adaptive average pooling. `None` keeps the input size of that dimension.
pub fn adaptive_avg_pool2d<T: Element>(
    input: ArrayView4<T>,
    output_size: (Option<usize>, Option<usize>),
) -> Result<Array4<T>> {
    let (n, c, in_h, in_w) = input.dim();
    let out_h = output_size.0.unwrap_or(in_h);
    let out_w = output_size.1.unwrap_or(in_w);
    if out_h == 0 || out_w == 0 {
        return Err(RuntimeError::ShapeError(format!(
            "adaptive pooling output size ({}, {}) must be positive",
            out_h, out_w
        )));
    }
    let mut output = Array4::<T>::zeros((n, c, out_h, out_w));

    for n_idx in 0..n {
        for c_idx in 0..c {
            for oh in 0..out_h {
                let h_start = (oh * in_h) / out_h;
                let h_end = ((oh + 1) * in_h + out_h - 1) / out_h;
                for ow in 0..out_w {
                    let w_start = (ow * in_w) / out_w;
                    let w_end = ((ow + 1) * in_w + out_w - 1) / out_w;
                    let window = input.slice(s![n_idx, c_idx, h_start..h_end, w_start..w_end]);
                    let count = window.len();
                    output[[n_idx, c_idx, oh, ow]] = if count > 0 {
                        window.sum() / T::from_usize(count)
                    } else {
                        T::zero()
                    };
                }
            }
        }
    }

    Ok(output)
}

/// Elementwise `max(x, 0)`.
pub fn relu<T: Element>(input: ArrayViewD<T>) -> ArrayD<T> {
    input.mapv(|v| v.max(T::zero()))
}

/// Merges dimensions `start_dim..=end_dim` into one. Negative dims count
/// from the end.
pub fn flatten<T: Element>(input: ArrayViewD<T>, start_dim: isize, end_dim: isize) -> Result<ArrayD<T>> {
    let rank = input.ndim().max(1) as isize;
    let normalize = |d: isize| if d < 0 { d + rank } else { d };
    let (start, end) = (normalize(start_dim), normalize(end_dim));
    if start < 0 || end >= rank || start > end {
        return Err(RuntimeError::ShapeError(format!(
            "flatten dims ({}, {}) out of range for a {}D tensor",
            start_dim,
            end_dim,
            input.ndim()
        )));
    }
    if input.ndim() == 0 {
        return input
            .to_owned()
            .into_shape_with_order(IxDyn(&[1]))
            .map_err(|e| RuntimeError::ShapeError(e.to_string()));
    }

    let (start, end) = (start as usize, end as usize);
    let shape = input.shape();
    let mut new_shape: Vec<usize> = shape[..start].to_vec();
    new_shape.push(shape[start..=end].iter().product());
    new_shape.extend_from_slice(&shape[end + 1..]);

    input
        .to_shape(IxDyn(&new_shape))
        .map(|a| a.into_owned())
        .map_err(|e| RuntimeError::ShapeError(e.to_string()))
}
