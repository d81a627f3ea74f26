//! JSON configuration of a swap call: target dtype and algorithm policies.
//!
//! ```json
//! { "dtype": "f64",
//!   "default_algorithm": "default",
//!   "algorithms": { "conv2d": ["direct", "kn2row"], "linear": "gemm" } }
//! ```
//!
//! A string is a constant policy, a list is a sequence policy. Callback
//! policies exist only in code.

use crate::asg::DType;
use crate::swap::{AlgorithmPolicies, AlgorithmPolicy, OperatorKind, SwapError, DEFAULT_ALGORITHM};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Swap(#[from] SwapError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PolicySpec {
    Constant(String),
    Sequence(Vec<String>),
}

impl From<&PolicySpec> for AlgorithmPolicy {
    fn from(spec: &PolicySpec) -> Self {
        match spec {
            PolicySpec::Constant(name) => AlgorithmPolicy::constant(name.as_str()),
            PolicySpec::Sequence(names) => AlgorithmPolicy::Sequence(names.clone()),
        }
    }
}

fn default_dtype() -> DType {
    DType::F32
}

fn default_algorithm() -> String {
    DEFAULT_ALGORITHM.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwapConfig {
    #[serde(default = "default_dtype")]
    pub dtype: DType,
    /// Algorithm of kinds not listed in `algorithms`.
    #[serde(default = "default_algorithm")]
    pub default_algorithm: String,
    #[serde(default)]
    pub algorithms: BTreeMap<OperatorKind, PolicySpec>,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            dtype: default_dtype(),
            default_algorithm: default_algorithm(),
            algorithms: BTreeMap::new(),
        }
    }
}

impl SwapConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SwapConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    fn validate(&self) -> Result<()> {
        if !self.dtype.is_float() {
            return Err(ConfigError::Invalid(format!(
                "dtype must be f32 or f64, got {}",
                self.dtype
            )));
        }
        for (kind, spec) in &self.algorithms {
            if let PolicySpec::Sequence(names) = spec {
                if names.is_empty() {
                    return Err(ConfigError::Invalid(format!("empty algorithm list for {}", kind)));
                }
            }
        }
        Ok(())
    }

    pub fn policy(&self, kind: OperatorKind) -> AlgorithmPolicy {
        self.algorithms
            .get(&kind)
            .map(AlgorithmPolicy::from)
            .unwrap_or_else(|| AlgorithmPolicy::constant(self.default_algorithm.as_str()))
    }

    pub fn policies(&self) -> AlgorithmPolicies {
        self.algorithms
            .iter()
            .map(|(kind, spec)| (*kind, AlgorithmPolicy::from(spec)))
            .collect::<AlgorithmPolicies>()
            .with_fallback(AlgorithmPolicy::constant(self.default_algorithm.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "dtype": "f64",
        "default_algorithm": "direct",
        "algorithms": { "conv2d": ["direct", "kn2row"], "linear": "gemm" }
    }"#;

    #[test]
    fn test_parse_sample() {
        let config = SwapConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(config.dtype, DType::F64);
        assert_eq!(
            config.algorithms.get(&OperatorKind::Conv2d),
            Some(&PolicySpec::Sequence(vec!["direct".into(), "kn2row".into()]))
        );

        let policies = config.policies();
        assert!(matches!(policies.get(OperatorKind::Linear), AlgorithmPolicy::Constant(n) if n == "gemm"));
        assert!(matches!(policies.get(OperatorKind::ReLU), AlgorithmPolicy::Constant(n) if n == "direct"));
        assert!(matches!(config.policy(OperatorKind::Conv2d), AlgorithmPolicy::Sequence(v) if v.len() == 2));
    }

    #[test]
    fn test_defaults() {
        let config = SwapConfig::from_json_str("{}").unwrap();
        assert_eq!(config, SwapConfig::default());
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            SwapConfig::from_json_str(r#"{ "dtype": "i32" }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SwapConfig::from_json_str(r#"{ "algorithms": { "softmax": "default" } }"#),
            Err(ConfigError::JsonError(_))
        ));
        assert!(matches!(
            SwapConfig::from_json_str(r#"{ "algorithms": { "relu": [] } }"#),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = SwapConfig::load(file.path()).unwrap();
        assert_eq!(config.default_algorithm, "direct");

        let missing = file.path().with_extension("missing");
        assert!(matches!(SwapConfig::load(&missing), Err(ConfigError::FileNotFound(_))));
    }
}
