//! # Rendering Core
//!
//! GPU resource lifetime and frame synchronization for a deferred renderer.
//!
//! ## Architecture
//!
//! - **DeviceContext**: adapter selection, logical device and memory allocator
//! - **TransferEngine**: staging uploads, read-backs and mip generation
//! - **RenderTargets**: swapchain plus the G-buffer framebuffers built on it
//! - **FrameSynchronizer**: per-slot fences and semaphores, acquire/submit/present
//! - **DescriptorAllocator**: material descriptor sets from a bounded pool
//! - **Renderer**: registries and the frame loop tying the above together
//!
//! Everything is generic over [`api::GpuDevice`]; the Vulkan backend and the
//! in-memory test device both implement it.

pub mod api;
pub mod commands;
pub mod descriptor;
pub mod device_context;
pub mod error;
pub mod framebuffer;
pub mod material;
pub mod mesh;
pub mod renderer;
pub mod resources;
pub mod swapchain;
pub mod sync;
pub mod targets;
pub mod transfer;

pub use api::{Extent2D, GpuBackend, GpuDevice, PresentOutcome};
pub use descriptor::{DescriptorAllocator, DescriptorSetLayout, DescriptorSetLayoutBuilder};
pub use device_context::DeviceContext;
pub use error::{ErrorSeverity, RenderError, RenderResult};
pub use framebuffer::{FramebufferManager, SampledImageHandle, GBUFFER_CHANNELS};
pub use material::{DefaultTextures, Material, MaterialDesc, MaterialParams, TextureSlot};
pub use mesh::{GpuMesh, MeshData, SkinningData, Vertex};
pub use renderer::{
    DrawItem, FrameStats, MaterialHandle, MeshHandle, Renderer, SceneData, TextureSwapFailure, TextureSwapQueue,
};
pub use swapchain::{Swapchain, SwapchainManager};
pub use sync::{FrameContext, FrameSynchronizer, InFlightWait, SlotState};
pub use targets::RenderTargets;
pub use transfer::{TextureData, TransferEngine};
