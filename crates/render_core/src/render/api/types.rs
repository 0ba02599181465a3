//! Backend-neutral handle and descriptor types
//!
//! Handles are plain `u64` newtypes. A value of zero is the null handle; the
//! Vulkan backend stores raw `vk::Handle` values, the mock device stores ids
//! from its own allocator.

use bitflags::bitflags;
use std::fmt;

macro_rules! gpu_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub u64);

        impl $name {
            /// The null handle
            pub const NULL: Self = Self(0);

            /// Whether this is the null handle
            pub fn is_null(self) -> bool {
                self.0 == 0
            }

            /// Raw handle value
            pub fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:#x})"), self.0)
            }
        }
    };
}

gpu_handle!(
    /// Device buffer
    BufferHandle
);
gpu_handle!(
    /// Device image
    ImageHandle
);
gpu_handle!(
    /// View onto an image
    ImageViewHandle
);
gpu_handle!(
    /// Texture sampler
    SamplerHandle
);
gpu_handle!(
    /// Command pool
    CommandPoolHandle
);
gpu_handle!(
    /// Primary command buffer
    CommandBufferHandle
);
gpu_handle!(
    /// CPU-visible completion signal
    FenceHandle
);
gpu_handle!(
    /// GPU-side binary semaphore
    SemaphoreHandle
);
gpu_handle!(
    /// Presentable image chain
    SwapchainHandle
);
gpu_handle!(
    /// Render pass describing the attachment layout
    RenderPassHandle
);
gpu_handle!(
    /// Framebuffer binding attachments to a render pass
    FramebufferHandle
);
gpu_handle!(
    /// Descriptor set layout
    DescriptorSetLayoutHandle
);
gpu_handle!(
    /// Descriptor pool
    DescriptorPoolHandle
);
gpu_handle!(
    /// Descriptor set
    DescriptorSetHandle
);
gpu_handle!(
    /// Pipeline layout
    PipelineLayoutHandle
);
gpu_handle!(
    /// Graphics pipeline created by the host application
    PipelineHandle
);

/// Two-dimensional extent in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2D {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Extent2D {
    /// Create an extent
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether either side is zero (minimized window)
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Clamp each side into `[min, max]`
    pub fn clamp(self, min: Self, max: Self) -> Self {
        Self {
            width: self.width.clamp(min.width, max.width.max(min.width)),
            height: self.height.clamp(min.height, max.height.max(min.height)),
        }
    }
}

impl fmt::Display for Extent2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel formats the core knows how to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// 8-bit BGRA, sRGB encoded
    B8G8R8A8Srgb,
    /// 8-bit BGRA, linear
    B8G8R8A8Unorm,
    /// 8-bit RGBA, sRGB encoded
    R8G8B8A8Srgb,
    /// 8-bit RGBA, linear
    R8G8B8A8Unorm,
    /// 16-bit float RGBA
    R16G16B16A16Sfloat,
    /// 32-bit float RGBA
    R32G32B32A32Sfloat,
    /// 32-bit float depth
    D32Sfloat,
    /// Any other backend format, stored raw
    Other(i32),
}

impl Format {
    /// 8-bit sRGB color formats preferred for presentation
    pub fn is_srgb8(self) -> bool {
        matches!(self, Self::B8G8R8A8Srgb | Self::R8G8B8A8Srgb)
    }

    /// Whether this is a depth format
    pub fn is_depth(self) -> bool {
        matches!(self, Self::D32Sfloat)
    }

    /// Bytes per texel for formats the core uploads
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            Self::B8G8R8A8Srgb
            | Self::B8G8R8A8Unorm
            | Self::R8G8B8A8Srgb
            | Self::R8G8B8A8Unorm
            | Self::D32Sfloat => Some(4),
            Self::R16G16B16A16Sfloat => Some(8),
            Self::R32G32B32A32Sfloat => Some(16),
            Self::Other(_) => None,
        }
    }
}

/// Surface color space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    /// Standard sRGB non-linear
    SrgbNonlinear,
    /// Any other color space, stored raw
    Other(i32),
}

/// Format/color-space pair offered by a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceFormat {
    /// Pixel format
    pub format: Format,
    /// Color space
    pub color_space: ColorSpace,
}

/// Presentation modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresentMode {
    /// No vsync, may tear
    Immediate,
    /// Low-latency triple buffering
    Mailbox,
    /// Vsync queue, always available
    Fifo,
    /// Vsync that tears when late
    FifoRelaxed,
}

/// Surface limits reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceCapabilities {
    /// Minimum number of images
    pub min_image_count: u32,
    /// Maximum number of images, 0 meaning unbounded
    pub max_image_count: u32,
    /// Fixed extent imposed by the surface, `None` when the window decides
    pub current_extent: Option<Extent2D>,
    /// Smallest supported extent
    pub min_extent: Extent2D,
    /// Largest supported extent
    pub max_extent: Extent2D,
}

bitflags! {
    /// Buffer usage
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Vertex attribute source
        const VERTEX = 1 << 0;
        /// Index source
        const INDEX = 1 << 1;
        /// Uniform buffer
        const UNIFORM = 1 << 2;
        /// Storage buffer
        const STORAGE = 1 << 3;
        /// Copy source
        const TRANSFER_SRC = 1 << 4;
        /// Copy destination
        const TRANSFER_DST = 1 << 5;
    }
}

bitflags! {
    /// Image usage
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        /// Sampled from shaders
        const SAMPLED = 1 << 0;
        /// Color render target
        const COLOR_ATTACHMENT = 1 << 1;
        /// Depth render target
        const DEPTH_ATTACHMENT = 1 << 2;
        /// Read as subpass input
        const INPUT_ATTACHMENT = 1 << 3;
        /// Copy/blit source
        const TRANSFER_SRC = 1 << 4;
        /// Copy/blit destination
        const TRANSFER_DST = 1 << 5;
    }
}

bitflags! {
    /// Shader stages a descriptor is visible to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        /// Vertex stage
        const VERTEX = 1 << 0;
        /// Fragment stage
        const FRAGMENT = 1 << 1;
        /// Compute stage
        const COMPUTE = 1 << 2;
    }
}

/// Where an allocation lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    /// Device-local, not mappable
    DeviceLocal,
    /// Host-visible and coherent, mappable
    HostVisible,
}

/// Buffer creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    /// Size in bytes
    pub size: u64,
    /// Usage flags
    pub usage: BufferUsage,
    /// Memory placement
    pub location: MemoryLocation,
}

/// Image creation parameters (2D, single layer)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    /// Size of mip 0
    pub extent: Extent2D,
    /// Pixel format
    pub format: Format,
    /// Usage flags
    pub usage: ImageUsage,
    /// Number of mip levels
    pub mip_levels: u32,
}

/// Which aspect of an image a view exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageAspect {
    /// Color data
    Color,
    /// Depth data
    Depth,
}

/// Sampler creation parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    /// Number of mip levels the sampler may read
    pub mip_levels: u32,
    /// Maximum anisotropy, `None` to disable
    pub max_anisotropy: Option<f32>,
}

/// Image layouts the core transitions between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    /// Contents undefined
    Undefined,
    /// Copy/blit destination
    TransferDst,
    /// Copy/blit source
    TransferSrc,
    /// Sampled read-only
    ShaderReadOnly,
    /// Color attachment
    ColorAttachment,
    /// Depth attachment
    DepthAttachment,
    /// Ready for presentation
    PresentSrc,
}

/// Memory access classes used by barriers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Written by a transfer
    TransferWrite,
    /// Read by a transfer
    TransferRead,
    /// Read as vertex attributes
    VertexAttributeRead,
    /// Read as indices
    IndexRead,
    /// Read as uniforms
    UniformRead,
    /// Read by shaders
    ShaderRead,
    /// Read by the host
    HostRead,
}

impl Access {
    /// The read access implied by a destination buffer's usage
    pub fn read_for_usage(usage: BufferUsage) -> Self {
        if usage.contains(BufferUsage::VERTEX) {
            Self::VertexAttributeRead
        } else if usage.contains(BufferUsage::INDEX) {
            Self::IndexRead
        } else if usage.contains(BufferUsage::UNIFORM) {
            Self::UniformRead
        } else {
            Self::ShaderRead
        }
    }
}

/// Buffer memory barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBarrier {
    /// Buffer being transitioned
    pub buffer: BufferHandle,
    /// Access that must complete
    pub src: Access,
    /// Access that must wait
    pub dst: Access,
}

/// Image layout transition over a mip range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    /// Image being transitioned
    pub image: ImageHandle,
    /// First mip level
    pub base_mip: u32,
    /// Number of mip levels
    pub mip_count: u32,
    /// Layout before
    pub old_layout: ImageLayout,
    /// Layout after
    pub new_layout: ImageLayout,
}

/// Blit from one mip level to the next, halving the extent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipBlit {
    /// Image blitted within
    pub image: ImageHandle,
    /// Source level
    pub src_mip: u32,
    /// Source extent
    pub src_extent: Extent2D,
    /// Destination extent
    pub dst_extent: Extent2D,
}

/// Pipeline stages a semaphore wait applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    /// Start of the pipeline
    TopOfPipe,
    /// Transfer operations
    Transfer,
    /// Color attachment output
    ColorAttachmentOutput,
    /// Fragment shading
    FragmentShader,
}

/// One queue submission
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitInfo {
    /// Command buffers executed in order
    pub command_buffers: Vec<CommandBufferHandle>,
    /// Semaphores waited on and the stage the wait blocks
    pub wait: Vec<(SemaphoreHandle, PipelineStage)>,
    /// Semaphores signaled on completion
    pub signal: Vec<SemaphoreHandle>,
}

/// Result of a fence wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// All fences signaled
    Signaled,
    /// Timeout expired first
    TimedOut,
}

/// Result of acquiring a swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Image acquired
    Acquired {
        /// Index into the swapchain images
        index: u32,
        /// Surface still works but no longer matches exactly
        suboptimal: bool,
    },
    /// Swapchain must be rebuilt
    OutOfDate,
}

/// Result of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented normally
    Presented,
    /// Presented, but the swapchain should be rebuilt
    Suboptimal,
    /// Not presented, the swapchain must be rebuilt
    OutOfDate,
}

/// Swapchain creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDesc {
    /// Minimum number of images
    pub image_count: u32,
    /// Negotiated format
    pub format: SurfaceFormat,
    /// Negotiated present mode
    pub present_mode: PresentMode,
    /// Negotiated extent
    pub extent: Extent2D,
}

/// Load behaviour of a render pass attachment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    /// Clear to color
    Color([f32; 4]),
    /// Clear to depth
    Depth(f32),
}

/// One attachment of a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentDesc {
    /// Pixel format
    pub format: Format,
    /// Layout after the pass
    pub final_layout: ImageLayout,
}

/// Single-subpass render pass writing every color attachment plus depth
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPassDesc {
    /// Color attachments in binding order
    pub color: Vec<AttachmentDesc>,
    /// Depth attachment
    pub depth: AttachmentDesc,
}

/// Descriptor types the core binds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    /// Uniform buffer
    UniformBuffer,
    /// Combined image sampler
    CombinedImageSampler,
}

/// One binding slot in a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorBindingLayout {
    /// Binding number
    pub binding: u32,
    /// Descriptor type
    pub ty: DescriptorType,
    /// Visible stages
    pub stages: ShaderStages,
}

/// Pool capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPoolSizes {
    /// Maximum number of sets
    pub max_sets: u32,
    /// Uniform buffer descriptors
    pub uniform_buffers: u32,
    /// Combined image sampler descriptors
    pub image_samplers: u32,
}

/// Concrete resource written into a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorResource {
    /// Buffer range
    Buffer {
        /// Buffer
        buffer: BufferHandle,
        /// Byte offset
        offset: u64,
        /// Byte range
        range: u64,
    },
    /// Sampled image
    Image {
        /// Image view
        view: ImageViewHandle,
        /// Sampler
        sampler: SamplerHandle,
    },
}

/// A binding update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorWrite {
    /// Binding number
    pub binding: u32,
    /// Descriptor type
    pub ty: DescriptorType,
    /// Resource bound
    pub resource: DescriptorResource,
}

impl DescriptorWrite {
    /// Uniform buffer write covering `range` bytes
    pub fn uniform(binding: u32, buffer: BufferHandle, range: u64) -> Self {
        Self {
            binding,
            ty: DescriptorType::UniformBuffer,
            resource: DescriptorResource::Buffer { buffer, offset: 0, range },
        }
    }

    /// Combined image sampler write
    pub fn image(binding: u32, view: ImageViewHandle, sampler: SamplerHandle) -> Self {
        Self {
            binding,
            ty: DescriptorType::CombinedImageSampler,
            resource: DescriptorResource::Image { view, sampler },
        }
    }
}

/// Physical adapter category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    /// Dedicated GPU
    Discrete,
    /// GPU sharing memory with the CPU
    Integrated,
    /// Virtualized GPU
    Virtual,
    /// Software rasterizer
    Cpu,
    /// Anything else
    Other,
}

/// Optional features that feed the adapter score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdapterFeatures {
    /// Anisotropic filtering
    pub sampler_anisotropy: bool,
    /// Independent blend per attachment (needed for G-buffer blending)
    pub independent_blend: bool,
    /// Wireframe fill modes
    pub fill_mode_non_solid: bool,
    /// Geometry shaders
    pub geometry_shader: bool,
    /// Maximum simultaneous color attachments
    pub max_color_attachments: u32,
    /// Largest 2D image side
    pub max_image_dimension_2d: u32,
}

/// A physical adapter as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// Enumeration index
    pub index: usize,
    /// Human-readable name
    pub name: String,
    /// Adapter category
    pub kind: AdapterKind,
    /// Queue family supporting both graphics and presentation to the surface
    pub graphics_present_family: Option<u32>,
    /// Optional features
    pub features: AdapterFeatures,
}
