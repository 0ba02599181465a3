//! The device contract every graphics backend implements
//!
//! Mirrors the explicit low-level API shape (buffers, images, command buffers,
//! fences, semaphores, swapchains) without prescribing a particular binding.
//! Creation calls return handles; destruction calls cannot fail and are
//! invoked exactly once by the owning RAII wrapper.

use super::types::*;
use crate::render::error::RenderResult;
use std::time::Duration;

/// Logical device with one graphics+present queue and a memory allocator
///
/// All methods take `&self`; backends synchronize internally where the
/// underlying API requires external synchronization.
pub trait GpuDevice: Send + Sync + 'static {
    /// Adapter the device was opened on
    fn adapter(&self) -> &AdapterInfo;

    /// Bind a device-memory allocator; called once before any allocation
    fn create_allocator(&mut self) -> RenderResult<()>;

    // --- Buffers ---

    /// Allocate a buffer
    fn create_buffer(&self, desc: &BufferDesc) -> RenderResult<BufferHandle>;
    /// Release a buffer and its memory
    fn destroy_buffer(&self, buffer: BufferHandle);
    /// Copy bytes into a host-visible buffer
    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()>;
    /// Copy bytes out of a host-visible buffer
    fn read_buffer(&self, buffer: BufferHandle, offset: u64, out: &mut [u8]) -> RenderResult<()>;

    // --- Images ---

    /// Allocate a 2D image
    fn create_image(&self, desc: &ImageDesc) -> RenderResult<ImageHandle>;
    /// Release an image and its memory
    fn destroy_image(&self, image: ImageHandle);
    /// Create a view over all mip levels of an image
    fn create_image_view(
        &self,
        image: ImageHandle,
        format: Format,
        aspect: ImageAspect,
        mip_levels: u32,
    ) -> RenderResult<ImageViewHandle>;
    /// Destroy an image view
    fn destroy_image_view(&self, view: ImageViewHandle);
    /// Create a linear, repeating sampler
    fn create_sampler(&self, desc: &SamplerDesc) -> RenderResult<SamplerHandle>;
    /// Destroy a sampler
    fn destroy_sampler(&self, sampler: SamplerHandle);

    // --- Command recording ---

    /// Create a command pool on the graphics queue family
    fn create_command_pool(&self, transient: bool) -> RenderResult<CommandPoolHandle>;
    /// Destroy a pool and every command buffer allocated from it
    fn destroy_command_pool(&self, pool: CommandPoolHandle);
    /// Allocate primary command buffers
    fn allocate_command_buffers(
        &self,
        pool: CommandPoolHandle,
        count: u32,
    ) -> RenderResult<Vec<CommandBufferHandle>>;
    /// Begin recording
    fn begin_command_buffer(&self, cmd: CommandBufferHandle, one_time: bool) -> RenderResult<()>;
    /// Finish recording
    fn end_command_buffer(&self, cmd: CommandBufferHandle) -> RenderResult<()>;
    /// Return a command buffer to the initial state
    fn reset_command_buffer(&self, cmd: CommandBufferHandle) -> RenderResult<()>;

    /// Record a buffer-to-buffer copy of `size` bytes
    fn cmd_copy_buffer(&self, cmd: CommandBufferHandle, src: BufferHandle, dst: BufferHandle, size: u64);
    /// Record a copy from a buffer into mip 0 of an image in `TransferDst` layout
    fn cmd_copy_buffer_to_image(
        &self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: ImageHandle,
        extent: Extent2D,
    );
    /// Record a buffer memory barrier
    fn cmd_buffer_barrier(&self, cmd: CommandBufferHandle, barrier: &BufferBarrier);
    /// Record an image layout transition
    fn cmd_image_barrier(&self, cmd: CommandBufferHandle, barrier: &ImageBarrier);
    /// Record a linear blit from one mip level to the next
    fn cmd_blit_mip(&self, cmd: CommandBufferHandle, blit: &MipBlit);
    /// Begin a render pass over the whole framebuffer
    fn cmd_begin_render_pass(
        &self,
        cmd: CommandBufferHandle,
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        extent: Extent2D,
        clears: &[ClearValue],
    );
    /// End the current render pass
    fn cmd_end_render_pass(&self, cmd: CommandBufferHandle);
    /// Set a full-extent viewport and scissor
    fn cmd_set_viewport_scissor(&self, cmd: CommandBufferHandle, extent: Extent2D);
    /// Bind a graphics pipeline
    fn cmd_bind_pipeline(&self, cmd: CommandBufferHandle, pipeline: PipelineHandle);
    /// Bind a descriptor set at `set_index`
    fn cmd_bind_descriptor_set(
        &self,
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        set_index: u32,
        set: DescriptorSetHandle,
    );
    /// Bind a vertex buffer at `binding`
    fn cmd_bind_vertex_buffer(&self, cmd: CommandBufferHandle, binding: u32, buffer: BufferHandle);
    /// Bind a `u32` index buffer
    fn cmd_bind_index_buffer(&self, cmd: CommandBufferHandle, buffer: BufferHandle);
    /// Draw indexed geometry
    fn cmd_draw_indexed(&self, cmd: CommandBufferHandle, index_count: u32);

    // --- Synchronization and queue ---

    /// Create a fence, optionally already signaled
    fn create_fence(&self, signaled: bool) -> RenderResult<FenceHandle>;
    /// Destroy a fence
    fn destroy_fence(&self, fence: FenceHandle);
    /// Block until every fence signals, or the timeout expires (`None` waits forever)
    fn wait_for_fences(
        &self,
        fences: &[FenceHandle],
        timeout: Option<Duration>,
    ) -> RenderResult<FenceStatus>;
    /// Move fences back to the unsignaled state
    fn reset_fences(&self, fences: &[FenceHandle]) -> RenderResult<()>;
    /// Non-blocking fence query
    fn fence_signaled(&self, fence: FenceHandle) -> RenderResult<bool>;
    /// Create a binary semaphore
    fn create_semaphore(&self) -> RenderResult<SemaphoreHandle>;
    /// Destroy a semaphore
    fn destroy_semaphore(&self, semaphore: SemaphoreHandle);
    /// Submit work to the graphics queue, signaling `fence` on completion
    fn queue_submit(&self, submit: &SubmitInfo, fence: Option<FenceHandle>) -> RenderResult<()>;
    /// Block until the device has no pending work
    fn wait_idle(&self) -> RenderResult<()>;

    // --- Surface and swapchain ---

    /// Current surface limits
    fn surface_capabilities(&self) -> RenderResult<SurfaceCapabilities>;
    /// Formats the surface accepts
    fn surface_formats(&self) -> RenderResult<Vec<SurfaceFormat>>;
    /// Present modes the surface accepts
    fn surface_present_modes(&self) -> RenderResult<Vec<PresentMode>>;
    /// Create a swapchain
    fn create_swapchain(&self, desc: &SwapchainDesc) -> RenderResult<SwapchainHandle>;
    /// Images owned by a swapchain, in presentation index order
    fn swapchain_images(&self, swapchain: SwapchainHandle) -> RenderResult<Vec<ImageHandle>>;
    /// Destroy a swapchain along with its images
    fn destroy_swapchain(&self, swapchain: SwapchainHandle);
    /// Acquire the next image, signaling `signal` when it is ready
    fn acquire_next_image(
        &self,
        swapchain: SwapchainHandle,
        signal: SemaphoreHandle,
    ) -> RenderResult<AcquireOutcome>;
    /// Queue an image for presentation once `wait` signals
    fn queue_present(
        &self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: &[SemaphoreHandle],
    ) -> RenderResult<PresentOutcome>;

    // --- Render passes, framebuffers and descriptors ---

    /// Create a single-subpass render pass
    fn create_render_pass(&self, desc: &RenderPassDesc) -> RenderResult<RenderPassHandle>;
    /// Destroy a render pass
    fn destroy_render_pass(&self, render_pass: RenderPassHandle);
    /// Create a framebuffer over `attachments` in render pass order
    fn create_framebuffer(
        &self,
        render_pass: RenderPassHandle,
        attachments: &[ImageViewHandle],
        extent: Extent2D,
    ) -> RenderResult<FramebufferHandle>;
    /// Destroy a framebuffer
    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle);
    /// Create a descriptor set layout
    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBindingLayout],
    ) -> RenderResult<DescriptorSetLayoutHandle>;
    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle);
    /// Create a pool that allows freeing individual sets
    fn create_descriptor_pool(&self, sizes: &DescriptorPoolSizes) -> RenderResult<DescriptorPoolHandle>;
    /// Destroy a pool and every set allocated from it
    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle);
    /// Allocate one set; an empty pool reports `DescriptorPoolExhausted`
    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> RenderResult<DescriptorSetHandle>;
    /// Write bindings into a set that no pending submission uses
    fn update_descriptor_set(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) -> RenderResult<()>;
    /// Return a set to its pool
    fn free_descriptor_set(&self, pool: DescriptorPoolHandle, set: DescriptorSetHandle) -> RenderResult<()>;
    /// Create a pipeline layout from set layouts
    fn create_pipeline_layout(
        &self,
        set_layouts: &[DescriptorSetLayoutHandle],
    ) -> RenderResult<PipelineLayoutHandle>;
    /// Destroy a pipeline layout
    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle);
}

/// Entry point of a graphics API: lists adapters and opens devices
pub trait GpuBackend {
    /// Device type produced by this backend
    type Device: GpuDevice;

    /// Physical adapters in enumeration order
    fn enumerate_adapters(&self) -> RenderResult<Vec<AdapterInfo>>;

    /// Open a logical device on the chosen adapter
    fn open_device(&self, adapter: &AdapterInfo) -> RenderResult<Self::Device>;
}
