//! 2D convolution layer.

use super::module::{Module, ModuleView};
use super::params::{Padding, PaddingMode, Shape2d};
use crate::runtime::backend::RuntimeError;
use crate::runtime::kernels;
use crate::swap::{make_2d, make_padding_2d};
use ndarray::{Array1, Array4, ArrayD};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;

/// Configuration for Conv2d layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Conv2dConfig {
    /// Number of input channels.
    pub in_channels: usize,
    /// Number of output channels (filters).
    pub out_channels: usize,
    /// Convolution kernel size.
    pub kernel_size: (usize, usize),
    /// Convolution stride.
    pub stride: Shape2d,
    /// Padding.
    pub padding: Padding,
    /// Dilation (kernel expansion).
    pub dilation: Shape2d,
    /// Number of groups for grouped/depthwise convolution.
    pub groups: usize,
    /// Use bias.
    pub bias: bool,
    pub padding_mode: PaddingMode,
}

impl Default for Conv2dConfig {
    fn default() -> Self {
        Self {
            in_channels: 1,
            out_channels: 1,
            kernel_size: (3, 3),
            stride: Shape2d::Scalar(1),
            padding: Padding::default(),
            dilation: Shape2d::Scalar(1),
            groups: 1,
            bias: true,
            padding_mode: PaddingMode::Zeros,
        }
    }
}

impl Conv2dConfig {
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: (usize, usize)) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size,
            ..Default::default()
        }
    }

    pub fn with_stride(mut self, stride: impl Into<Shape2d>) -> Self {
        self.stride = stride.into();
        self
    }

    pub fn with_padding(mut self, padding: impl Into<Padding>) -> Self {
        self.padding = padding.into();
        self
    }

    pub fn with_dilation(mut self, dilation: impl Into<Shape2d>) -> Self {
        self.dilation = dilation.into();
        self
    }

    pub fn with_groups(mut self, groups: usize) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    pub fn with_padding_mode(mut self, padding_mode: PaddingMode) -> Self {
        self.padding_mode = padding_mode;
        self
    }
}

/// 2D Convolutional layer.
///
/// Applies 2D convolution to input tensor of shape [N, C_in, H, W] or
/// [C_in, H, W]. The weight has shape [C_out, C_in/groups, kH, kW].
///
/// # Example
///
/// ```rust,ignore
/// use opswap::nn::{Conv2d, Conv2dConfig};
///
/// let conv = Conv2d::from_config(Conv2dConfig::new(3, 64, (3, 3)).with_padding(1));
/// ```
#[derive(Debug, Clone)]
pub struct Conv2d {
    pub weight: Array4<f32>,
    pub bias: Option<Array1<f32>>,
    pub config: Conv2dConfig,
}

impl Conv2d {
    /// Creates a randomly initialised layer with default hyperparameters.
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: (usize, usize)) -> Self {
        Self::from_config(Conv2dConfig::new(in_channels, out_channels, kernel_size))
    }

    pub fn from_config(config: Conv2dConfig) -> Self {
        Self::init_with(config, &mut rand::thread_rng())
    }

    /// Initialises weights uniformly in `±1/sqrt(fan_in)` from `rng`.
    pub fn init_with<R: Rng + ?Sized>(config: Conv2dConfig, rng: &mut R) -> Self {
        let groups = config.groups.max(1);
        let (kh, kw) = config.kernel_size;
        let fan_in = (config.in_channels / groups * kh * kw).max(1);
        let bound = 1.0 / (fan_in as f32).sqrt();
        let dist = Uniform::new_inclusive(-bound, bound);

        let weight = Array4::random_using(
            (config.out_channels, config.in_channels / groups, kh, kw),
            dist,
            rng,
        );
        let bias = if config.bias {
            Some(Array1::random_using(config.out_channels, dist, rng))
        } else {
            None
        };
        Self { weight, bias, config }
    }

    /// Builds a layer around existing weights. Channel counts and kernel
    /// size in `config` are taken from the weight.
    pub fn from_weights(weight: Array4<f32>, bias: Option<Array1<f32>>, mut config: Conv2dConfig) -> Self {
        let (out_channels, in_per_group, kh, kw) = weight.dim();
        config.out_channels = out_channels;
        config.in_channels = in_per_group * config.groups.max(1);
        config.kernel_size = (kh, kw);
        config.bias = bias.is_some();
        Self { weight, bias, config }
    }

    pub fn with_stride(mut self, stride: impl Into<Shape2d>) -> Self {
        self.config.stride = stride.into();
        self
    }

    pub fn with_padding(mut self, padding: impl Into<Padding>) -> Self {
        self.config.padding = padding.into();
        self
    }

    pub fn with_dilation(mut self, dilation: impl Into<Shape2d>) -> Self {
        self.config.dilation = dilation.into();
        self
    }

    pub fn with_padding_mode(mut self, padding_mode: PaddingMode) -> Self {
        self.config.padding_mode = padding_mode;
        self
    }
}

impl Module for Conv2d {
    fn view(&self) -> ModuleView<'_> {
        ModuleView::Conv2d(self)
    }

    fn eval(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, RuntimeError> {
        if self.config.padding_mode != PaddingMode::Zeros {
            return Err(RuntimeError::UnimplementedOperation(format!(
                "conv2d with padding_mode '{}'",
                self.config.padding_mode
            )));
        }
        let stride = make_2d(&self.config.stride, "stride")?;
        let dilation = make_2d(&self.config.dilation, "dilation")?;
        let padding = make_padding_2d(&self.config.padding, stride, dilation, self.config.kernel_size)?;
        kernels::spatial(input, |x| {
            kernels::conv2d_direct(
                x,
                self.weight.view(),
                self.bias.as_ref().map(|b| b.view()),
                stride,
                padding,
                dilation,
                self.config.groups,
            )
        })
    }
}
