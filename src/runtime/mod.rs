//! Execution: the backend contract, the reference CPU backend, the shared
//! kernels and the host interpreter.

pub mod backend;
pub mod cpu_backend;
pub mod interpreter;
pub mod kernels;

pub use backend::{Backend, RuntimeError, TensorData};
pub use cpu_backend::CpuBackend;
pub use interpreter::Interpreter;
