//! # Render Core
//!
//! GPU resource lifetime and frame synchronization for a Vulkan deferred renderer.
//!
//! ## Features
//!
//! - **Device selection**: adapter scoring, logical device and memory allocator
//! - **Uploads**: staged buffer and texture transfers with mip generation
//! - **Frame loop**: bounded frames in flight with fence/semaphore pacing
//! - **Swapchain**: negotiation, resize and out-of-date recovery
//! - **G-buffer**: framebuffers with four color channels plus shared depth
//! - **Materials**: descriptor sets from a fixed pool, safe texture swaps
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_core::prelude::*;
//! use render_core::backends::mock::MockBackend;
//!
//! fn main() -> Result<(), RenderError> {
//!     let config = RendererConfig::new("demo");
//!     let mut renderer = Renderer::initialize(&MockBackend::default(), &config, Extent2D::new(1280, 720))?;
//!     let cube = renderer.register_mesh(&MeshData::cube())?;
//!     let material = renderer.register_material(&MaterialDesc::new(MaterialParams::default()))?;
//!
//!     if let Some(frame) = renderer.begin_frame()? {
//!         let scene = SceneData { draws: vec![DrawItem { mesh: cube, material }], ..SceneData::default() };
//!         renderer.record_scene(&frame, &scene)?;
//!         renderer.end_frame()?;
//!     }
//!     renderer.shutdown()
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod core;
pub mod foundation;
pub mod render;
pub mod backends;

/// Common imports for hosts
pub mod prelude {
    pub use crate::{
        core::config::{ApplicationConfig, Config, RendererConfig},
        render::{
            api::{Extent2D, GpuBackend, GpuDevice, PipelineHandle, PresentOutcome},
            DrawItem, ErrorSeverity, FrameContext, FrameStats, MaterialDesc, MaterialHandle, MaterialParams,
            MeshData, MeshHandle, RenderError, RenderResult, Renderer, SceneData, TextureData, TextureSlot,
        },
    };
}
