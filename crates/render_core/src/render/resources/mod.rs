//! RAII wrappers over device objects

pub mod buffer;
pub mod image;

pub use buffer::GpuBuffer;
pub use image::{mip_level_count, GpuImage, GpuTexture, ImageView, Sampler};
