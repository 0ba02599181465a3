//! Backend-agnostic device contract

pub mod device;
pub mod types;

pub use device::{GpuBackend, GpuDevice};
pub use types::*;
