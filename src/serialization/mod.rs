//! Serialization of module trees.
//!
//! Models are described in JSON ([`ModuleSpec`]) and instantiated with
//! deterministic random weights.
//!
//! # Example
//!
//! ```rust,ignore
//! use opswap::serialization::ModuleSpec;
//!
//! let model = ModuleSpec::load("model.json")?.build(42)?;
//! ```

pub mod model_spec;

pub use model_spec::{ModuleSpec, PaddingSpec};
