//! JSON description of a module tree.
//!
//! Weights are not stored: `build` draws them from a seeded generator, so
//! one description and seed always yield the same model.
//!
//! ```json
//! { "type": "sequential", "layers": [
//!     { "type": "conv2d", "in_channels": 3, "out_channels": 8, "kernel_size": 3, "padding": "same" },
//!     { "type": "relu" },
//!     { "type": "flatten" },
//!     { "type": "linear", "in_features": 512, "out_features": 10 } ] }
//! ```

use crate::config::{ConfigError, Result};
use crate::nn::{
    AdaptiveAvgPool2d, AvgPool2d, Conv2d, Conv2dConfig, Dropout, Flatten, Linear, MaxPool2d, Module, Padding,
    PaddingMode, ReLU, Sequential, Shape2d,
};
use crate::swap::make_2d;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Conv padding as written in JSON: a size, or `"same"` / `"valid"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PaddingSpec {
    Size(Shape2d),
    Named(String),
}

impl Default for PaddingSpec {
    fn default() -> Self {
        PaddingSpec::Size(Shape2d::Scalar(0))
    }
}

impl PaddingSpec {
    fn resolve(&self) -> Result<Padding> {
        match self {
            PaddingSpec::Size(size) => Ok(Padding::Size(size.clone())),
            PaddingSpec::Named(name) => Ok(name.parse::<Padding>()?),
        }
    }
}

fn one() -> Shape2d {
    Shape2d::Scalar(1)
}

fn zero() -> Shape2d {
    Shape2d::Scalar(0)
}

fn one_group() -> usize {
    1
}

fn yes() -> bool {
    true
}

fn start_dim() -> isize {
    1
}

fn end_dim() -> isize {
    -1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum ModuleSpec {
    Conv2d {
        in_channels: usize,
        out_channels: usize,
        kernel_size: Shape2d,
        #[serde(default = "one")]
        stride: Shape2d,
        #[serde(default)]
        padding: PaddingSpec,
        #[serde(default = "one")]
        dilation: Shape2d,
        #[serde(default = "one_group")]
        groups: usize,
        #[serde(default = "yes")]
        bias: bool,
        #[serde(default)]
        padding_mode: PaddingMode,
    },
    Linear {
        in_features: usize,
        out_features: usize,
        #[serde(default = "yes")]
        bias: bool,
    },
    MaxPool2d {
        kernel_size: Shape2d,
        #[serde(default)]
        stride: Option<Shape2d>,
        #[serde(default = "zero")]
        padding: Shape2d,
        #[serde(default = "one")]
        dilation: Shape2d,
        #[serde(default)]
        ceil_mode: bool,
    },
    AvgPool2d {
        kernel_size: Shape2d,
        #[serde(default)]
        stride: Option<Shape2d>,
        #[serde(default = "zero")]
        padding: Shape2d,
        #[serde(default)]
        ceil_mode: bool,
        #[serde(default = "yes")]
        count_include_pad: bool,
        #[serde(default)]
        divisor_override: Option<usize>,
    },
    AdaptiveAvgPool2d {
        output_size: (Option<usize>, Option<usize>),
    },
    Relu,
    Flatten {
        #[serde(default = "start_dim")]
        start_dim: isize,
        #[serde(default = "end_dim")]
        end_dim: isize,
    },
    Dropout {
        p: f32,
        #[serde(default)]
        training: bool,
    },
    Sequential {
        layers: Vec<ModuleSpec>,
    },
}

impl ModuleSpec {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    /// Instantiates the tree with weights drawn from `StdRng::seed_from_u64(seed)`.
    pub fn build(&self, seed: u64) -> Result<Box<dyn Module>> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.build_with(&mut rng)
    }

    fn build_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Box<dyn Module>> {
        let module: Box<dyn Module> = match self {
            ModuleSpec::Conv2d {
                in_channels,
                out_channels,
                kernel_size,
                stride,
                padding,
                dilation,
                groups,
                bias,
                padding_mode,
            } => {
                if *groups == 0 || in_channels % groups != 0 || out_channels % groups != 0 {
                    return Err(ConfigError::Invalid(format!(
                        "conv2d: {} groups do not divide {} -> {} channels",
                        groups, in_channels, out_channels
                    )));
                }
                let config = Conv2dConfig::new(*in_channels, *out_channels, make_2d(kernel_size, "kernel_size")?)
                    .with_stride(stride.clone())
                    .with_padding(padding.resolve()?)
                    .with_dilation(dilation.clone())
                    .with_groups(*groups)
                    .with_bias(*bias)
                    .with_padding_mode(*padding_mode);
                Box::new(Conv2d::init_with(config, rng))
            }
            ModuleSpec::Linear {
                in_features,
                out_features,
                bias,
            } => Box::new(Linear::init_with(*in_features, *out_features, *bias, rng)),
            ModuleSpec::MaxPool2d {
                kernel_size,
                stride,
                padding,
                dilation,
                ceil_mode,
            } => {
                let mut pool = MaxPool2d::new(kernel_size.clone())
                    .with_padding(padding.clone())
                    .with_dilation(dilation.clone())
                    .with_ceil_mode(*ceil_mode);
                pool.stride = stride.clone();
                Box::new(pool)
            }
            ModuleSpec::AvgPool2d {
                kernel_size,
                stride,
                padding,
                ceil_mode,
                count_include_pad,
                divisor_override,
            } => {
                let mut pool = AvgPool2d::new(kernel_size.clone())
                    .with_padding(padding.clone())
                    .with_ceil_mode(*ceil_mode)
                    .with_count_include_pad(*count_include_pad);
                pool.stride = stride.clone();
                pool.divisor_override = *divisor_override;
                Box::new(pool)
            }
            ModuleSpec::AdaptiveAvgPool2d { output_size } => {
                Box::new(AdaptiveAvgPool2d::with_partial_size(*output_size))
            }
            ModuleSpec::Relu => Box::new(ReLU::new()),
            ModuleSpec::Flatten { start_dim, end_dim } => Box::new(Flatten::with_dims(*start_dim, *end_dim)),
            ModuleSpec::Dropout { p, training } => {
                if !(0.0..1.0).contains(p) {
                    return Err(ConfigError::Invalid(format!("dropout probability {} is not in [0, 1)", p)));
                }
                let mut dropout = Dropout::new(*p);
                if !*training {
                    dropout.inference();
                }
                Box::new(dropout)
            }
            ModuleSpec::Sequential { layers } => {
                let mut seq = Sequential::new();
                for (i, layer) in layers.iter().enumerate() {
                    seq.push_boxed(i.to_string(), layer.build_with(rng)?);
                }
                Box::new(seq)
            }
        };
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::ModuleView;
    use crate::swap::{get_module, SwapError};
    use crate::asg::ModulePath;

    const MODEL: &str = r#"{ "type": "sequential", "layers": [
        { "type": "conv2d", "in_channels": 1, "out_channels": 2, "kernel_size": 3, "padding": "same" },
        { "type": "max_pool2d", "kernel_size": [2, 2] },
        { "type": "dropout", "p": 0.5 },
        { "type": "sequential", "layers": [ { "type": "relu" }, { "type": "flatten" } ] },
        { "type": "linear", "in_features": 8, "out_features": 3 }
    ] }"#;

    #[test]
    fn test_parse_and_build() {
        let spec = ModuleSpec::from_json_str(MODEL).unwrap();
        let model = spec.build(7).unwrap();

        match get_module(model.as_ref(), &ModulePath::parse("0")).unwrap().view() {
            ModuleView::Conv2d(conv) => {
                assert_eq!(conv.config.padding, Padding::Same);
                assert_eq!(conv.weight.dim(), (2, 1, 3, 3));
            }
            other => panic!("unexpected {:?}", other),
        }
        match get_module(model.as_ref(), &ModulePath::parse("2")).unwrap().view() {
            ModuleView::Dropout(d) => assert!(!d.is_training()),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            get_module(model.as_ref(), &ModulePath::parse("3.1")).unwrap().view(),
            ModuleView::Flatten(_)
        ));
    }

    #[test]
    fn test_same_seed_same_weights() {
        let spec = ModuleSpec::from_json_str(MODEL).unwrap();
        let weights = |seed| match get_module(spec.build(seed).unwrap().as_ref(), &ModulePath::parse("4"))
            .unwrap()
            .view()
        {
            ModuleView::Linear(l) => l.weight.clone(),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(weights(1), weights(1));
        assert_ne!(weights(1), weights(2));
    }

    #[test]
    fn test_invalid_specs() {
        let bad_padding = r#"{ "type": "conv2d", "in_channels": 1, "out_channels": 1, "kernel_size": 3, "padding": "full" }"#;
        assert!(matches!(
            ModuleSpec::from_json_str(bad_padding).unwrap().build(0),
            Err(ConfigError::Swap(SwapError::InvalidConfiguration(_)))
        ));

        let bad_groups = r#"{ "type": "conv2d", "in_channels": 3, "out_channels": 4, "kernel_size": 1, "groups": 2 }"#;
        assert!(matches!(
            ModuleSpec::from_json_str(bad_groups).unwrap().build(0),
            Err(ConfigError::Invalid(_))
        ));

        assert!(ModuleSpec::from_json_str(r#"{ "type": "softmax" }"#).is_err());
    }
}
