//! Module implementing pooling layers for CNNs.

use super::module::{Module, ModuleView};
use super::params::Shape2d;
use crate::runtime::backend::RuntimeError;
use crate::runtime::kernels;
use crate::swap::make_2d;
use ndarray::ArrayD;

/// Max Pooling 2D layer.
///
/// Selects the maximum of each window of an input of shape [N, C, H, W]
/// or [C, H, W].
///
/// # Example
///
/// ```rust,ignore
/// let pool = MaxPool2d::new(2); // stride defaults to the kernel size
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct MaxPool2d {
    pub kernel_size: Shape2d,
    /// `None` means "same as `kernel_size`".
    pub stride: Option<Shape2d>,
    pub padding: Shape2d,
    pub dilation: Shape2d,
    pub ceil_mode: bool,
}

impl MaxPool2d {
    pub fn new(kernel_size: impl Into<Shape2d>) -> Self {
        Self {
            kernel_size: kernel_size.into(),
            stride: None,
            padding: Shape2d::Scalar(0),
            dilation: Shape2d::Scalar(1),
            ceil_mode: false,
        }
    }

    pub fn with_stride(mut self, stride: impl Into<Shape2d>) -> Self {
        self.stride = Some(stride.into());
        self
    }

    pub fn with_padding(mut self, padding: impl Into<Shape2d>) -> Self {
        self.padding = padding.into();
        self
    }

    pub fn with_dilation(mut self, dilation: impl Into<Shape2d>) -> Self {
        self.dilation = dilation.into();
        self
    }

    pub fn with_ceil_mode(mut self, ceil_mode: bool) -> Self {
        self.ceil_mode = ceil_mode;
        self
    }

    pub fn effective_stride(&self) -> &Shape2d {
        self.stride.as_ref().unwrap_or(&self.kernel_size)
    }
}

impl Module for MaxPool2d {
    fn view(&self) -> ModuleView<'_> {
        ModuleView::MaxPool2d(self)
    }

    fn eval(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, RuntimeError> {
        let kernel = make_2d(&self.kernel_size, "kernel_size")?;
        let stride = make_2d(self.effective_stride(), "stride")?;
        let padding = make_2d(&self.padding, "padding")?;
        let dilation = make_2d(&self.dilation, "dilation")?;
        kernels::spatial(input, |x| {
            kernels::max_pool2d(x, kernel, stride, padding, dilation, self.ceil_mode)
        })
    }
}

/// Average Pooling 2D layer.
#[derive(Debug, Clone, PartialEq)]
pub struct AvgPool2d {
    pub kernel_size: Shape2d,
    /// `None` means "same as `kernel_size`".
    pub stride: Option<Shape2d>,
    pub padding: Shape2d,
    pub ceil_mode: bool,
    /// Count padded cells in the divisor.
    pub count_include_pad: bool,
    /// Fixed divisor replacing the window size.
    pub divisor_override: Option<usize>,
}

impl AvgPool2d {
    pub fn new(kernel_size: impl Into<Shape2d>) -> Self {
        Self {
            kernel_size: kernel_size.into(),
            stride: None,
            padding: Shape2d::Scalar(0),
            ceil_mode: false,
            count_include_pad: true,
            divisor_override: None,
        }
    }

    pub fn with_stride(mut self, stride: impl Into<Shape2d>) -> Self {
        self.stride = Some(stride.into());
        self
    }

    pub fn with_padding(mut self, padding: impl Into<Shape2d>) -> Self {
        self.padding = padding.into();
        self
    }

    pub fn with_ceil_mode(mut self, ceil_mode: bool) -> Self {
        self.ceil_mode = ceil_mode;
        self
    }

    pub fn with_count_include_pad(mut self, count_include_pad: bool) -> Self {
        self.count_include_pad = count_include_pad;
        self
    }

    pub fn with_divisor_override(mut self, divisor: usize) -> Self {
        self.divisor_override = Some(divisor);
        self
    }

    pub fn effective_stride(&self) -> &Shape2d {
        self.stride.as_ref().unwrap_or(&self.kernel_size)
    }
}

impl Module for AvgPool2d {
    fn view(&self) -> ModuleView<'_> {
        ModuleView::AvgPool2d(self)
    }

    fn eval(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, RuntimeError> {
        let kernel = make_2d(&self.kernel_size, "kernel_size")?;
        let stride = make_2d(self.effective_stride(), "stride")?;
        let padding = make_2d(&self.padding, "padding")?;
        kernels::spatial(input, |x| {
            kernels::avg_pool2d(
                x,
                kernel,
                stride,
                padding,
                self.ceil_mode,
                self.count_include_pad,
                self.divisor_override,
            )
        })
    }
}

/// Adaptive Average Pooling 2D.
///
/// Computes pooling windows so that the output has `output_size`
/// regardless of input size. A `None` entry keeps that input dimension.
///
/// # Example
///
/// ```rust,ignore
/// // Always outputs size [N, C, 1, 1] regardless of input size
/// let gap = AdaptiveAvgPool2d::global();
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveAvgPool2d {
    pub output_size: (Option<usize>, Option<usize>),
}

impl AdaptiveAvgPool2d {
    pub fn new(output_size: (usize, usize)) -> Self {
        Self {
            output_size: (Some(output_size.0), Some(output_size.1)),
        }
    }

    /// Global average pooling: output size (1, 1).
    pub fn global() -> Self {
        Self::new((1, 1))
    }

    pub fn with_partial_size(output_size: (Option<usize>, Option<usize>)) -> Self {
        Self { output_size }
    }
}

impl Module for AdaptiveAvgPool2d {
    fn view(&self) -> ModuleView<'_> {
        ModuleView::AdaptiveAvgPool2d(self)
    }

    fn eval(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, RuntimeError> {
        kernels::spatial(input, |x| kernels::adaptive_avg_pool2d(x, self.output_size))
    }
}
