//! # Host Module Tree
//!
//! Building blocks of the models the swap engine rewrites. Every layer
//! holds real weights and can run eagerly on host data (`Module::eval`), and
//! every module can be traced symbolically (`Module::forward`).
//!
//! ## Available Layers
//!
//! - [`Conv2d`]: 2D convolution with stride, padding policy, dilation, groups
//! - [`Linear`]: fully connected layer
//! - [`MaxPool2d`], [`AvgPool2d`], [`AdaptiveAvgPool2d`]: pooling
//! - [`ReLU`], [`Flatten`]: parameter-free layers
//! - [`Dropout`]: regularization (identity at inference)
//! - [`Sequential`]: ordered container
//!
//! User-defined composites implement [`Module`] directly: `forward` calls
//! children through `Tensor::apply` and may interleave inline calls such as
//! `Tensor::flatten`.
//!
//! ## Example
//!
//! ```ignore
//! use opswap::nn::{Conv2d, Flatten, Linear, ReLU, Sequential};
//!
//! let model = Sequential::new()
//!     .push(Conv2d::new(3, 8, (3, 3)))
//!     .push(ReLU::new())
//!     .push(Flatten::new())
//!     .push(Linear::new(8 * 30 * 30, 10));
//! ```

pub mod activations;
pub mod container;
pub mod conv;
pub mod dropout;
pub mod linear;
pub mod module;
pub mod params;
pub mod pooling;

pub use activations::{Flatten, ReLU};
pub use container::Sequential;
pub use conv::{Conv2d, Conv2dConfig};
pub use dropout::Dropout;
pub use linear::Linear;
pub use module::{named_modules, Module, ModuleView};
pub use params::{Padding, PaddingMode, Shape2d};
pub use pooling::{AdaptiveAvgPool2d, AvgPool2d, MaxPool2d};
