//! # opswap: operator substitution for neural-network module trees
//!
//! **opswap** takes a model built from host modules ([`nn`]) and lowers it
//! onto an alternative execution backend. It traces a forward pass, maps
//! each operator to a backend layer descriptor bound to a chosen algorithm,
//! and either produces a complete backend pipeline or swaps one kind of
//! submodule in place while the rest keeps running on the host.
//!
//! ## Usage Example
//!
//! ```no_run
//! use std::rc::Rc;
//! use ndarray::{ArrayD, IxDyn};
//! use opswap::asg::DType;
//! use opswap::nn::{Conv2d, Flatten, Linear, Module, ReLU, Sequential};
//! use opswap::runtime::CpuBackend;
//! use opswap::swap::{swap_backend, swap_conv2d, AlgorithmPolicies, AlgorithmPolicy, OperatorKind};
//!
//! let model = Sequential::new()
//!     .push(Conv2d::new(3, 8, (3, 3)))
//!     .push(ReLU::new())
//!     .push(Flatten::new())
//!     .push(Linear::new(8 * 6 * 6, 10));
//! let x = ArrayD::<f32>::zeros(IxDyn(&[1, 3, 8, 8]));
//!
//! // Full swap: every operator runs on the backend.
//! let policies = AlgorithmPolicies::new().with(OperatorKind::Linear, "gemm");
//! let pipeline = swap_backend(&model, DType::F64, &policies).unwrap();
//! let y = pipeline.predict_host(&CpuBackend, &x).unwrap();
//!
//! // Partial swap: only the convolutions move.
//! let patched = swap_conv2d(Box::new(model), DType::F32, &AlgorithmPolicy::constant("kn2row"), Rc::new(CpuBackend)).unwrap();
//! let y2 = patched.eval(&x).unwrap();
//! ```

pub mod asg;
pub mod config;
pub mod nn;
pub mod runtime;
pub mod serialization;
pub mod swap;
pub mod tensor;
