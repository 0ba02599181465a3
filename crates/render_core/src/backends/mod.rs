//! Backend implementations of [`GpuDevice`](crate::render::api::GpuDevice)
//!
//! Vulkan is the production backend; the mock device simulates a queue in
//! memory for tests.

/// In-memory device with an event log and misuse detection
pub mod mock;

/// Vulkan backend on ash and vk-mem
pub mod vulkan;
