//! In-memory device for tests
//!
//! Simulates an in-order graphics queue. Submissions stay pending until a
//! fence wait (or `complete_*`) retires them; buffer copies execute on
//! retirement so uploads and read-backs round-trip real bytes. Every call is
//! logged as a [`MockEvent`], and misuse that a validation layer would flag
//! is collected in [`MockDevice::violations`].

use crate::foundation::collections::IdAllocator;
use crate::render::api::*;
use crate::render::error::{RenderError, RenderResult};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Resource categories tracked for leaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// Buffer
    Buffer,
    /// Image (swapchain images excluded)
    Image,
    /// Image view
    ImageView,
    /// Sampler
    Sampler,
    /// Command pool
    CommandPool,
    /// Fence
    Fence,
    /// Semaphore
    Semaphore,
    /// Swapchain
    Swapchain,
    /// Framebuffer
    Framebuffer,
    /// Render pass
    RenderPass,
    /// Descriptor set layout
    DescriptorSetLayout,
    /// Descriptor pool
    DescriptorPool,
    /// Pipeline layout
    PipelineLayout,
}

/// Observable device call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// Resource created
    Created(ResourceKind, u64),
    /// Resource destroyed
    Destroyed(ResourceKind, u64),
    /// Recording began
    BeginCommandBuffer(u64),
    /// Recording ended
    EndCommandBuffer(u64),
    /// Render pass began in a command buffer
    BeginRenderPass(u64),
    /// Render pass ended in a command buffer
    EndRenderPass(u64),
    /// Work submitted
    Submitted {
        /// Command buffers in submission order
        command_buffers: Vec<u64>,
        /// Fence signaled on completion
        fence: Option<u64>,
    },
    /// Host waited on a fence
    WaitFence(u64),
    /// Submission retired and its fence signaled
    FenceSignaled(u64),
    /// Fence reset
    FenceReset(u64),
    /// Swapchain image acquired
    Acquired(u32),
    /// Swapchain image presented
    Presented(u32),
    /// Descriptor set written
    DescriptorUpdated(u64),
    /// Host waited for the whole queue to drain
    WaitIdle,
    /// Mip blit recorded
    Blit {
        /// Image
        image: u64,
        /// Source level
        src_mip: u32,
    },
}

#[derive(Debug, Clone, Copy)]
enum Recorded {
    Copy { src: u64, dst: u64, size: u64 },
}

#[derive(Debug, Default)]
struct CommandBufferState {
    pool: u64,
    commands: Vec<Recorded>,
    refs: HashSet<u64>,
    bound_sets: HashSet<u64>,
}

#[derive(Debug)]
struct Submission {
    command_buffers: Vec<u64>,
    fence: Option<u64>,
    commands: Vec<Recorded>,
    refs: HashSet<u64>,
}

#[derive(Debug)]
struct SwapchainState {
    images: Vec<ImageHandle>,
    extent: Extent2D,
    next_image: u32,
}

#[derive(Debug)]
struct DescriptorPoolState {
    max_sets: u32,
    sets: HashSet<u64>,
}

#[derive(Debug)]
struct Surface {
    extent: Extent2D,
    formats: Vec<SurfaceFormat>,
    present_modes: Vec<PresentMode>,
    min_image_count: u32,
    max_image_count: u32,
}

impl Default for Surface {
    fn default() -> Self {
        Self {
            extent: Extent2D::new(1600, 900),
            formats: vec![
                SurfaceFormat { format: Format::B8G8R8A8Unorm, color_space: ColorSpace::SrgbNonlinear },
                SurfaceFormat { format: Format::B8G8R8A8Srgb, color_space: ColorSpace::SrgbNonlinear },
            ],
            present_modes: vec![PresentMode::Fifo, PresentMode::Mailbox],
            min_image_count: 2,
            max_image_count: 8,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    ids: IdAllocator,
    allocator_ready: bool,
    live: HashMap<u64, ResourceKind>,
    events: Vec<MockEvent>,
    violations: Vec<String>,

    buffers: HashMap<u64, Vec<u8>>,
    swapchain_images: HashSet<u64>,
    command_buffers: HashMap<u64, CommandBufferState>,
    pending: VecDeque<Submission>,
    signaled_fences: HashSet<u64>,
    signaled_semaphores: HashSet<u64>,
    swapchains: HashMap<u64, SwapchainState>,
    framebuffers: HashMap<u64, (Extent2D, Vec<ImageViewHandle>)>,
    descriptor_pools: HashMap<u64, DescriptorPoolState>,
    descriptor_sets: HashMap<u64, HashMap<u32, DescriptorResource>>,

    surface: Surface,
    hung: bool,
    forced_out_of_date: u32,
    fail_next_submit: bool,
    fail_next_descriptor_update: bool,
}

impl MockState {
    fn create(&mut self, kind: ResourceKind) -> u64 {
        let id = self.ids.allocate();
        self.live.insert(id, kind);
        self.events.push(MockEvent::Created(kind, id));
        id
    }

    fn violation(&mut self, message: String) {
        log::warn!("Mock device violation: {message}");
        self.violations.push(message);
    }

    fn in_pending(&self, id: u64) -> bool {
        self.pending.iter().any(|s| s.refs.contains(&id))
    }

    /// Returns false when the destroy was invalid
    fn destroy(&mut self, kind: ResourceKind, id: u64) -> bool {
        if self.live.get(&id) != Some(&kind) {
            self.violation(format!("destroy of unknown or already destroyed {kind:?} {id:#x}"));
            return false;
        }
        if self.in_pending(id) {
            self.violation(format!("{kind:?} {id:#x} destroyed while a submission uses it"));
        }
        self.live.remove(&id);
        self.events.push(MockEvent::Destroyed(kind, id));
        true
    }

    fn reference(&mut self, cmd: CommandBufferHandle, id: u64) {
        if let Some(state) = self.command_buffers.get_mut(&cmd.raw()) {
            state.refs.insert(id);
        }
    }

    fn retire_front(&mut self) -> bool {
        let Some(submission) = self.pending.pop_front() else {
            return false;
        };
        for command in &submission.commands {
            match *command {
                Recorded::Copy { src, dst, size } => {
                    let bytes = self
                        .buffers
                        .get(&src)
                        .map(|data| data[..(size as usize).min(data.len())].to_vec());
                    if let (Some(bytes), Some(target)) = (bytes, self.buffers.get_mut(&dst)) {
                        let len = bytes.len().min(target.len());
                        target[..len].copy_from_slice(&bytes[..len]);
                    }
                }
            }
        }
        if let Some(fence) = submission.fence {
            self.signaled_fences.insert(fence);
            self.events.push(MockEvent::FenceSignaled(fence));
        }
        true
    }

    fn retire_through_fence(&mut self, fence: u64) -> bool {
        let Some(position) = self.pending.iter().position(|s| s.fence == Some(fence)) else {
            return false;
        };
        for _ in 0..=position {
            self.retire_front();
        }
        true
    }

    fn swapchain_current(&self, swapchain: u64) -> Option<bool> {
        self.swapchains.get(&swapchain).map(|s| s.extent == self.surface.extent)
    }
}

fn default_adapter() -> AdapterInfo {
    AdapterInfo {
        index: 0,
        name: "Mock GPU".to_string(),
        kind: AdapterKind::Discrete,
        graphics_present_family: Some(0),
        features: AdapterFeatures {
            sampler_anisotropy: true,
            independent_blend: true,
            fill_mode_non_solid: true,
            geometry_shader: true,
            max_color_attachments: 8,
            max_image_dimension_2d: 16_384,
        },
    }
}

/// Test double of a logical device
#[derive(Debug)]
pub struct MockDevice {
    adapter: AdapterInfo,
    allocator_failure: bool,
    state: Mutex<MockState>,
}

impl MockDevice {
    /// Device on the given adapter, allocator not yet created
    pub fn new(adapter: AdapterInfo) -> Self {
        Self { adapter, allocator_failure: false, state: Mutex::new(MockState::default()) }
    }

    /// Ready-to-use device behind an `Arc`
    pub fn shared() -> Arc<Self> {
        let device = Self::new(default_adapter());
        device.lock().allocator_ready = true;
        Arc::new(device)
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every call so far
    pub fn events(&self) -> Vec<MockEvent> {
        self.lock().events.clone()
    }

    /// Misuse detected so far
    pub fn violations(&self) -> Vec<String> {
        self.lock().violations.clone()
    }

    /// Live resources of one kind
    pub fn live_count(&self, kind: ResourceKind) -> usize {
        self.lock().live.values().filter(|k| **k == kind).count()
    }

    /// Live resources of every kind
    pub fn live_total(&self) -> usize {
        self.lock().live.len()
    }

    /// Live resources, sorted by kind then id
    pub fn live_resources(&self) -> Vec<(ResourceKind, u64)> {
        let mut live: Vec<_> = self.lock().live.iter().map(|(id, kind)| (*kind, *id)).collect();
        live.sort();
        live
    }

    /// Extent a framebuffer was created with
    pub fn framebuffer_extent(&self, framebuffer: FramebufferHandle) -> Option<Extent2D> {
        self.lock().framebuffers.get(&framebuffer.raw()).map(|(extent, _)| *extent)
    }

    /// Attachments a framebuffer was created with
    pub fn framebuffer_attachments(&self, framebuffer: FramebufferHandle) -> Option<Vec<ImageViewHandle>> {
        self.lock().framebuffers.get(&framebuffer.raw()).map(|(_, views)| views.clone())
    }

    /// Current bindings of a live descriptor set
    pub fn descriptor_bindings(&self, set: DescriptorSetHandle) -> Option<HashMap<u32, DescriptorResource>> {
        self.lock().descriptor_sets.get(&set.raw()).cloned()
    }

    /// Submissions the simulated GPU has not finished
    pub fn pending_submissions(&self) -> usize {
        self.lock().pending.len()
    }

    /// Finish the oldest pending submission
    pub fn complete_oldest(&self) -> bool {
        self.lock().retire_front()
    }

    /// Finish every pending submission
    pub fn complete_all(&self) {
        let mut state = self.lock();
        while state.retire_front() {}
    }

    /// While hung, fence waits time out and nothing retires
    pub fn set_hung(&self, hung: bool) {
        self.lock().hung = hung;
    }

    /// Resize the window surface; swapchains of another size go out of date
    pub fn resize_surface(&self, extent: Extent2D) {
        self.lock().surface.extent = extent;
    }

    /// Make the next `count` acquires report out-of-date
    pub fn force_out_of_date_acquires(&self, count: u32) {
        self.lock().forced_out_of_date = count;
    }

    /// Make the next queue submission fail
    pub fn fail_next_submit(&self) {
        self.lock().fail_next_submit = true;
    }

    /// Make the next descriptor set update fail
    pub fn fail_next_descriptor_update(&self) {
        self.lock().fail_next_descriptor_update = true;
    }
}

impl GpuDevice for MockDevice {
    fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    fn create_allocator(&mut self) -> RenderResult<()> {
        if self.allocator_failure {
            return Err(RenderError::AllocatorInit("mock allocator refused".to_string()));
        }
        self.lock().allocator_ready = true;
        Ok(())
    }

    fn create_buffer(&self, desc: &BufferDesc) -> RenderResult<BufferHandle> {
        let mut state = self.lock();
        if !state.allocator_ready {
            return Err(RenderError::AllocatorInit("allocator not created".to_string()));
        }
        let id = state.create(ResourceKind::Buffer);
        state.buffers.insert(id, vec![0; desc.size as usize]);
        Ok(BufferHandle(id))
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let mut state = self.lock();
        if state.destroy(ResourceKind::Buffer, buffer.raw()) {
            state.buffers.remove(&buffer.raw());
        }
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()> {
        let mut state = self.lock();
        let memory = state
            .buffers
            .get_mut(&buffer.raw())
            .ok_or(RenderError::ResourceNotFound { id: buffer.raw() })?;
        let start = offset as usize;
        let end = start + data.len();
        if end > memory.len() {
            return Err(RenderError::invalid(format!("write of {end} bytes past buffer end")));
        }
        memory[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, out: &mut [u8]) -> RenderResult<()> {
        let state = self.lock();
        let memory = state
            .buffers
            .get(&buffer.raw())
            .ok_or(RenderError::ResourceNotFound { id: buffer.raw() })?;
        let start = offset as usize;
        let end = start + out.len();
        if end > memory.len() {
            return Err(RenderError::invalid(format!("read of {end} bytes past buffer end")));
        }
        out.copy_from_slice(&memory[start..end]);
        Ok(())
    }

    fn create_image(&self, desc: &ImageDesc) -> RenderResult<ImageHandle> {
        let mut state = self.lock();
        if !state.allocator_ready {
            return Err(RenderError::AllocatorInit("allocator not created".to_string()));
        }
        if desc.extent.is_empty() || desc.mip_levels == 0 {
            return Err(RenderError::invalid(format!("image of {} with {} mips", desc.extent, desc.mip_levels)));
        }
        Ok(ImageHandle(state.create(ResourceKind::Image)))
    }

    fn destroy_image(&self, image: ImageHandle) {
        self.lock().destroy(ResourceKind::Image, image.raw());
    }

    fn create_image_view(
        &self,
        image: ImageHandle,
        _format: Format,
        _aspect: ImageAspect,
        _mip_levels: u32,
    ) -> RenderResult<ImageViewHandle> {
        let mut state = self.lock();
        let known = state.live.get(&image.raw()) == Some(&ResourceKind::Image)
            || state.swapchain_images.contains(&image.raw());
        if !known {
            return Err(RenderError::ResourceNotFound { id: image.raw() });
        }
        Ok(ImageViewHandle(state.create(ResourceKind::ImageView)))
    }

    fn destroy_image_view(&self, view: ImageViewHandle) {
        let mut state = self.lock();
        let attached = state.framebuffers.values().any(|(_, views)| views.contains(&view));
        if attached {
            state.violation(format!("image view {:#x} destroyed while a framebuffer uses it", view.raw()));
        }
        state.destroy(ResourceKind::ImageView, view.raw());
    }

    fn create_sampler(&self, _desc: &SamplerDesc) -> RenderResult<SamplerHandle> {
        Ok(SamplerHandle(self.lock().create(ResourceKind::Sampler)))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        self.lock().destroy(ResourceKind::Sampler, sampler.raw());
    }

    fn create_command_pool(&self, _transient: bool) -> RenderResult<CommandPoolHandle> {
        Ok(CommandPoolHandle(self.lock().create(ResourceKind::CommandPool)))
    }

    fn destroy_command_pool(&self, pool: CommandPoolHandle) {
        let mut state = self.lock();
        let owned: Vec<u64> = state
            .command_buffers
            .iter()
            .filter(|(_, cb)| cb.pool == pool.raw())
            .map(|(id, _)| *id)
            .collect();
        for cmd in &owned {
            if state.in_pending(*cmd) {
                state.violation(format!("command buffer {cmd:#x} freed while pending"));
            }
            state.command_buffers.remove(cmd);
        }
        state.destroy(ResourceKind::CommandPool, pool.raw());
    }

    fn allocate_command_buffers(&self, pool: CommandPoolHandle, count: u32) -> RenderResult<Vec<CommandBufferHandle>> {
        let mut state = self.lock();
        if state.live.get(&pool.raw()) != Some(&ResourceKind::CommandPool) {
            return Err(RenderError::ResourceNotFound { id: pool.raw() });
        }
        Ok((0..count)
            .map(|_| {
                let id = state.ids.allocate();
                state
                    .command_buffers
                    .insert(id, CommandBufferState { pool: pool.raw(), ..Default::default() });
                CommandBufferHandle(id)
            })
            .collect())
    }

    fn begin_command_buffer(&self, cmd: CommandBufferHandle, _one_time: bool) -> RenderResult<()> {
        let mut state = self.lock();
        if state.in_pending(cmd.raw()) {
            state.violation(format!("command buffer {:#x} re-recorded while pending", cmd.raw()));
        }
        let buffer = state
            .command_buffers
            .get_mut(&cmd.raw())
            .ok_or(RenderError::ResourceNotFound { id: cmd.raw() })?;
        buffer.commands.clear();
        buffer.refs.clear();
        buffer.bound_sets.clear();
        state.events.push(MockEvent::BeginCommandBuffer(cmd.raw()));
        Ok(())
    }

    fn end_command_buffer(&self, cmd: CommandBufferHandle) -> RenderResult<()> {
        self.lock().events.push(MockEvent::EndCommandBuffer(cmd.raw()));
        Ok(())
    }

    fn reset_command_buffer(&self, cmd: CommandBufferHandle) -> RenderResult<()> {
        let mut state = self.lock();
        if state.in_pending(cmd.raw()) {
            state.violation(format!("command buffer {:#x} reset while pending", cmd.raw()));
        }
        Ok(())
    }

    fn cmd_copy_buffer(&self, cmd: CommandBufferHandle, src: BufferHandle, dst: BufferHandle, size: u64) {
        let mut state = self.lock();
        if let Some(buffer) = state.command_buffers.get_mut(&cmd.raw()) {
            buffer.commands.push(Recorded::Copy { src: src.raw(), dst: dst.raw(), size });
        }
        state.reference(cmd, src.raw());
        state.reference(cmd, dst.raw());
    }

    fn cmd_copy_buffer_to_image(&self, cmd: CommandBufferHandle, src: BufferHandle, dst: ImageHandle, _extent: Extent2D) {
        let mut state = self.lock();
        state.reference(cmd, src.raw());
        state.reference(cmd, dst.raw());
    }

    fn cmd_buffer_barrier(&self, cmd: CommandBufferHandle, barrier: &BufferBarrier) {
        self.lock().reference(cmd, barrier.buffer.raw());
    }

    fn cmd_image_barrier(&self, cmd: CommandBufferHandle, barrier: &ImageBarrier) {
        self.lock().reference(cmd, barrier.image.raw());
    }

    fn cmd_blit_mip(&self, cmd: CommandBufferHandle, blit: &MipBlit) {
        let mut state = self.lock();
        state.reference(cmd, blit.image.raw());
        state.events.push(MockEvent::Blit { image: blit.image.raw(), src_mip: blit.src_mip });
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: CommandBufferHandle,
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        _extent: Extent2D,
        _clears: &[ClearValue],
    ) {
        let mut state = self.lock();
        state.reference(cmd, render_pass.raw());
        state.reference(cmd, framebuffer.raw());
        let attachments = state
            .framebuffers
            .get(&framebuffer.raw())
            .map(|(_, views)| views.clone())
            .unwrap_or_default();
        for view in attachments {
            state.reference(cmd, view.raw());
        }
        state.events.push(MockEvent::BeginRenderPass(cmd.raw()));
    }

    fn cmd_end_render_pass(&self, cmd: CommandBufferHandle) {
        self.lock().events.push(MockEvent::EndRenderPass(cmd.raw()));
    }

    fn cmd_set_viewport_scissor(&self, _cmd: CommandBufferHandle, _extent: Extent2D) {}

    fn cmd_bind_pipeline(&self, cmd: CommandBufferHandle, pipeline: PipelineHandle) {
        self.lock().reference(cmd, pipeline.raw());
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        _set_index: u32,
        set: DescriptorSetHandle,
    ) {
        let mut state = self.lock();
        state.reference(cmd, layout.raw());
        state.reference(cmd, set.raw());
        if let Some(buffer) = state.command_buffers.get_mut(&cmd.raw()) {
            buffer.bound_sets.insert(set.raw());
        }
    }

    fn cmd_bind_vertex_buffer(&self, cmd: CommandBufferHandle, _binding: u32, buffer: BufferHandle) {
        self.lock().reference(cmd, buffer.raw());
    }

    fn cmd_bind_index_buffer(&self, cmd: CommandBufferHandle, buffer: BufferHandle) {
        self.lock().reference(cmd, buffer.raw());
    }

    fn cmd_draw_indexed(&self, _cmd: CommandBufferHandle, _index_count: u32) {}

    fn create_fence(&self, signaled: bool) -> RenderResult<FenceHandle> {
        let mut state = self.lock();
        let id = state.create(ResourceKind::Fence);
        if signaled {
            state.signaled_fences.insert(id);
        }
        Ok(FenceHandle(id))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        let mut state = self.lock();
        state.signaled_fences.remove(&fence.raw());
        state.destroy(ResourceKind::Fence, fence.raw());
    }

    fn wait_for_fences(&self, fences: &[FenceHandle], _timeout: Option<Duration>) -> RenderResult<FenceStatus> {
        let mut state = self.lock();
        for fence in fences {
            state.events.push(MockEvent::WaitFence(fence.raw()));
            if state.signaled_fences.contains(&fence.raw()) {
                continue;
            }
            if !state.pending.iter().any(|s| s.fence == Some(fence.raw())) {
                state.violation(format!("wait on unsignaled fence {:#x} with no pending work", fence.raw()));
                return Ok(FenceStatus::TimedOut);
            }
            if state.hung {
                return Ok(FenceStatus::TimedOut);
            }
            state.retire_through_fence(fence.raw());
        }
        Ok(FenceStatus::Signaled)
    }

    fn reset_fences(&self, fences: &[FenceHandle]) -> RenderResult<()> {
        let mut state = self.lock();
        for fence in fences {
            if state.pending.iter().any(|s| s.fence == Some(fence.raw())) {
                state.violation(format!("fence {:#x} reset while pending", fence.raw()));
            }
            state.signaled_fences.remove(&fence.raw());
            state.events.push(MockEvent::FenceReset(fence.raw()));
        }
        Ok(())
    }

    fn fence_signaled(&self, fence: FenceHandle) -> RenderResult<bool> {
        Ok(self.lock().signaled_fences.contains(&fence.raw()))
    }

    fn create_semaphore(&self) -> RenderResult<SemaphoreHandle> {
        Ok(SemaphoreHandle(self.lock().create(ResourceKind::Semaphore)))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        let mut state = self.lock();
        state.signaled_semaphores.remove(&semaphore.raw());
        state.destroy(ResourceKind::Semaphore, semaphore.raw());
    }

    fn queue_submit(&self, submit: &SubmitInfo, fence: Option<FenceHandle>) -> RenderResult<()> {
        let mut state = self.lock();
        if std::mem::take(&mut state.fail_next_submit) {
            return Err(RenderError::Api { call: "vkQueueSubmit", code: "ERROR_OUT_OF_DEVICE_MEMORY".to_string() });
        }

        let mut commands = Vec::new();
        let mut refs: HashSet<u64> = HashSet::new();
        for cmd in &submit.command_buffers {
            refs.insert(cmd.raw());
            let Some(buffer) = state.command_buffers.get(&cmd.raw()) else {
                return Err(RenderError::ResourceNotFound { id: cmd.raw() });
            };
            commands.extend(buffer.commands.iter().copied());
            refs.extend(buffer.refs.iter().copied());
            for set in &buffer.bound_sets {
                if let Some(bindings) = state.descriptor_sets.get(set) {
                    for resource in bindings.values() {
                        match resource {
                            DescriptorResource::Buffer { buffer, .. } => refs.insert(buffer.raw()),
                            DescriptorResource::Image { view, sampler } => {
                                refs.insert(sampler.raw());
                                refs.insert(view.raw())
                            }
                        };
                    }
                }
            }
        }

        for (semaphore, _) in &submit.wait {
            state.signaled_semaphores.remove(&semaphore.raw());
        }
        for semaphore in &submit.signal {
            state.signaled_semaphores.insert(semaphore.raw());
        }
        if let Some(fence) = fence {
            if state.signaled_fences.contains(&fence.raw()) {
                state.violation(format!("submitted with already signaled fence {:#x}", fence.raw()));
            }
            refs.insert(fence.raw());
        }

        state.events.push(MockEvent::Submitted {
            command_buffers: submit.command_buffers.iter().map(|c| c.raw()).collect(),
            fence: fence.map(FenceHandle::raw),
        });
        state.pending.push_back(Submission {
            command_buffers: submit.command_buffers.iter().map(|c| c.raw()).collect(),
            fence: fence.map(FenceHandle::raw),
            commands,
            refs,
        });
        Ok(())
    }

    fn wait_idle(&self) -> RenderResult<()> {
        let mut state = self.lock();
        state.events.push(MockEvent::WaitIdle);
        if state.hung && !state.pending.is_empty() {
            return Err(RenderError::device_lost("mock queue hung"));
        }
        while state.retire_front() {}
        Ok(())
    }

    fn surface_capabilities(&self) -> RenderResult<SurfaceCapabilities> {
        let state = self.lock();
        Ok(SurfaceCapabilities {
            min_image_count: state.surface.min_image_count,
            max_image_count: state.surface.max_image_count,
            current_extent: Some(state.surface.extent),
            min_extent: Extent2D::new(1, 1),
            max_extent: Extent2D::new(16_384, 16_384),
        })
    }

    fn surface_formats(&self) -> RenderResult<Vec<SurfaceFormat>> {
        Ok(self.lock().surface.formats.clone())
    }

    fn surface_present_modes(&self) -> RenderResult<Vec<PresentMode>> {
        Ok(self.lock().surface.present_modes.clone())
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RenderResult<SwapchainHandle> {
        let mut state = self.lock();
        if desc.extent.is_empty() {
            return Err(RenderError::SurfaceUnsupported(format!("swapchain extent {}", desc.extent)));
        }
        let id = state.create(ResourceKind::Swapchain);
        let images = (0..desc.image_count)
            .map(|_| {
                let image = state.ids.allocate();
                state.swapchain_images.insert(image);
                ImageHandle(image)
            })
            .collect();
        state
            .swapchains
            .insert(id, SwapchainState { images, extent: desc.extent, next_image: 0 });
        Ok(SwapchainHandle(id))
    }

    fn swapchain_images(&self, swapchain: SwapchainHandle) -> RenderResult<Vec<ImageHandle>> {
        self.lock()
            .swapchains
            .get(&swapchain.raw())
            .map(|s| s.images.clone())
            .ok_or(RenderError::ResourceNotFound { id: swapchain.raw() })
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) {
        let mut state = self.lock();
        if let Some(removed) = state.swapchains.remove(&swapchain.raw()) {
            for image in removed.images {
                state.swapchain_images.remove(&image.raw());
            }
        }
        state.destroy(ResourceKind::Swapchain, swapchain.raw());
    }

    fn acquire_next_image(&self, swapchain: SwapchainHandle, signal: SemaphoreHandle) -> RenderResult<AcquireOutcome> {
        let mut state = self.lock();
        if state.forced_out_of_date > 0 {
            state.forced_out_of_date -= 1;
            return Ok(AcquireOutcome::OutOfDate);
        }
        match state.swapchain_current(swapchain.raw()) {
            None => return Err(RenderError::ResourceNotFound { id: swapchain.raw() }),
            Some(false) => return Ok(AcquireOutcome::OutOfDate),
            Some(true) => {}
        }
        if !state.signaled_semaphores.insert(signal.raw()) {
            state.violation(format!("acquire signals semaphore {:#x} that is already signaled", signal.raw()));
        }

        let index = match state.swapchains.get_mut(&swapchain.raw()) {
            Some(chain) => {
                let index = chain.next_image;
                chain.next_image = (index + 1) % chain.images.len().max(1) as u32;
                index
            }
            None => return Err(RenderError::ResourceNotFound { id: swapchain.raw() }),
        };
        state.events.push(MockEvent::Acquired(index));
        Ok(AcquireOutcome::Acquired { index, suboptimal: false })
    }

    fn queue_present(
        &self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: &[SemaphoreHandle],
    ) -> RenderResult<PresentOutcome> {
        let mut state = self.lock();
        for semaphore in wait {
            state.signaled_semaphores.remove(&semaphore.raw());
        }
        match state.swapchain_current(swapchain.raw()) {
            None => Err(RenderError::ResourceNotFound { id: swapchain.raw() }),
            Some(false) => Ok(PresentOutcome::OutOfDate),
            Some(true) => {
                state.events.push(MockEvent::Presented(image_index));
                Ok(PresentOutcome::Presented)
            }
        }
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> RenderResult<RenderPassHandle> {
        if desc.color.len() as u32 > self.adapter.features.max_color_attachments {
            return Err(RenderError::invalid(format!("{} color attachments", desc.color.len())));
        }
        Ok(RenderPassHandle(self.lock().create(ResourceKind::RenderPass)))
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        self.lock().destroy(ResourceKind::RenderPass, render_pass.raw());
    }

    fn create_framebuffer(
        &self,
        render_pass: RenderPassHandle,
        attachments: &[ImageViewHandle],
        extent: Extent2D,
    ) -> RenderResult<FramebufferHandle> {
        let mut state = self.lock();
        if state.live.get(&render_pass.raw()) != Some(&ResourceKind::RenderPass) {
            return Err(RenderError::ResourceNotFound { id: render_pass.raw() });
        }
        if let Some(missing) = attachments
            .iter()
            .find(|view| state.live.get(&view.raw()) != Some(&ResourceKind::ImageView))
        {
            return Err(RenderError::ResourceNotFound { id: missing.raw() });
        }
        let id = state.create(ResourceKind::Framebuffer);
        state.framebuffers.insert(id, (extent, attachments.to_vec()));
        Ok(FramebufferHandle(id))
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        let mut state = self.lock();
        if state.destroy(ResourceKind::Framebuffer, framebuffer.raw()) {
            state.framebuffers.remove(&framebuffer.raw());
        }
    }

    fn create_descriptor_set_layout(&self, _bindings: &[DescriptorBindingLayout]) -> RenderResult<DescriptorSetLayoutHandle> {
        Ok(DescriptorSetLayoutHandle(self.lock().create(ResourceKind::DescriptorSetLayout)))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        self.lock().destroy(ResourceKind::DescriptorSetLayout, layout.raw());
    }

    fn create_descriptor_pool(&self, sizes: &DescriptorPoolSizes) -> RenderResult<DescriptorPoolHandle> {
        let mut state = self.lock();
        let id = state.create(ResourceKind::DescriptorPool);
        state
            .descriptor_pools
            .insert(id, DescriptorPoolState { max_sets: sizes.max_sets, sets: HashSet::new() });
        Ok(DescriptorPoolHandle(id))
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        let mut state = self.lock();
        if let Some(removed) = state.descriptor_pools.remove(&pool.raw()) {
            for set in removed.sets {
                if state.in_pending(set) {
                    state.violation(format!("descriptor set {set:#x} freed with its pool while pending"));
                }
                state.descriptor_sets.remove(&set);
            }
        }
        state.destroy(ResourceKind::DescriptorPool, pool.raw());
    }

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> RenderResult<DescriptorSetHandle> {
        let mut state = self.lock();
        if state.live.get(&layout.raw()) != Some(&ResourceKind::DescriptorSetLayout) {
            return Err(RenderError::ResourceNotFound { id: layout.raw() });
        }
        let id = state.ids.allocate();
        let pool_state = state
            .descriptor_pools
            .get_mut(&pool.raw())
            .ok_or(RenderError::ResourceNotFound { id: pool.raw() })?;
        if pool_state.sets.len() as u32 >= pool_state.max_sets {
            return Err(RenderError::DescriptorPoolExhausted { max_sets: pool_state.max_sets });
        }
        pool_state.sets.insert(id);
        state.descriptor_sets.insert(id, HashMap::new());
        Ok(DescriptorSetHandle(id))
    }

    fn update_descriptor_set(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) -> RenderResult<()> {
        let mut state = self.lock();
        if std::mem::take(&mut state.fail_next_descriptor_update) {
            return Err(RenderError::Api { call: "vkUpdateDescriptorSets", code: "ERROR_OUT_OF_HOST_MEMORY".to_string() });
        }
        if state.in_pending(set.raw()) {
            state.violation(format!("descriptor set {:#x} updated while a submission uses it", set.raw()));
        }
        let bindings = state
            .descriptor_sets
            .get_mut(&set.raw())
            .ok_or(RenderError::ResourceNotFound { id: set.raw() })?;
        for write in writes {
            bindings.insert(write.binding, write.resource);
        }
        state.events.push(MockEvent::DescriptorUpdated(set.raw()));
        Ok(())
    }

    fn free_descriptor_set(&self, pool: DescriptorPoolHandle, set: DescriptorSetHandle) -> RenderResult<()> {
        let mut state = self.lock();
        if state.in_pending(set.raw()) {
            state.violation(format!("descriptor set {:#x} freed while pending", set.raw()));
        }
        let removed = state
            .descriptor_pools
            .get_mut(&pool.raw())
            .map_or(false, |p| p.sets.remove(&set.raw()));
        if !removed {
            return Err(RenderError::ResourceNotFound { id: set.raw() });
        }
        state.descriptor_sets.remove(&set.raw());
        Ok(())
    }

    fn create_pipeline_layout(&self, _set_layouts: &[DescriptorSetLayoutHandle]) -> RenderResult<PipelineLayoutHandle> {
        Ok(PipelineLayoutHandle(self.lock().create(ResourceKind::PipelineLayout)))
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) {
        self.lock().destroy(ResourceKind::PipelineLayout, layout.raw());
    }
}

/// Backend producing [`MockDevice`]s from a fixed adapter list
#[derive(Debug, Clone)]
pub struct MockBackend {
    adapters: Vec<AdapterInfo>,
    allocator_failure: bool,
}

impl MockBackend {
    /// Backend reporting `adapters` in order
    pub fn new(adapters: Vec<AdapterInfo>) -> Self {
        Self { adapters, allocator_failure: false }
    }

    /// Devices from this backend refuse to create an allocator
    pub fn with_allocator_failure(mut self) -> Self {
        self.allocator_failure = true;
        self
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new(vec![default_adapter()])
    }
}

impl GpuBackend for MockBackend {
    type Device = MockDevice;

    fn enumerate_adapters(&self) -> RenderResult<Vec<AdapterInfo>> {
        Ok(self.adapters.clone())
    }

    fn open_device(&self, adapter: &AdapterInfo) -> RenderResult<MockDevice> {
        let mut device = MockDevice::new(adapter.clone());
        device.allocator_failure = self.allocator_failure;
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit(device: &MockDevice, fence: FenceHandle) -> CommandBufferHandle {
        let pool = device.create_command_pool(false).expect("pool");
        let cmd = device.allocate_command_buffers(pool, 1).expect("cmd")[0];
        device.begin_command_buffer(cmd, true).expect("begin");
        device.end_command_buffer(cmd).expect("end");
        let info = SubmitInfo { command_buffers: vec![cmd], ..Default::default() };
        device.queue_submit(&info, Some(fence)).expect("submit");
        cmd
    }

    #[test]
    fn test_wait_retires_in_order() {
        let device = MockDevice::shared();
        let first = device.create_fence(false).expect("fence");
        let second = device.create_fence(false).expect("fence");
        submit(&device, first);
        submit(&device, second);

        assert_eq!(device.wait_for_fences(&[second], None).expect("wait"), FenceStatus::Signaled);
        assert!(device.fence_signaled(first).expect("query"));
        assert_eq!(device.pending_submissions(), 0);
    }

    #[test]
    fn test_copies_execute_on_retirement() {
        let device = MockDevice::shared();
        let desc = |size| BufferDesc { size, usage: BufferUsage::TRANSFER_SRC, location: MemoryLocation::HostVisible };
        let src = device.create_buffer(&desc(4)).expect("src");
        let dst = device.create_buffer(&desc(4)).expect("dst");
        device.write_buffer(src, 0, &[9, 8, 7, 6]).expect("write");

        let pool = device.create_command_pool(true).expect("pool");
        let cmd = device.allocate_command_buffers(pool, 1).expect("cmd")[0];
        device.begin_command_buffer(cmd, true).expect("begin");
        device.cmd_copy_buffer(cmd, src, dst, 4);
        device.end_command_buffer(cmd).expect("end");
        let fence = device.create_fence(false).expect("fence");
        let info = SubmitInfo { command_buffers: vec![cmd], ..Default::default() };
        device.queue_submit(&info, Some(fence)).expect("submit");

        let mut out = [0u8; 4];
        device.read_buffer(dst, 0, &mut out).expect("read");
        assert_eq!(out, [0; 4]);
        device.wait_for_fences(&[fence], None).expect("wait");
        device.read_buffer(dst, 0, &mut out).expect("read");
        assert_eq!(out, [9, 8, 7, 6]);
    }

    #[test]
    fn test_destroying_pending_resources_is_flagged() {
        let device = MockDevice::shared();
        let fence = device.create_fence(false).expect("fence");
        submit(&device, fence);
        device.destroy_fence(fence);
        assert_eq!(device.violations().len(), 1);

        device.destroy_fence(fence);
        assert_eq!(device.violations().len(), 2);
    }

    #[test]
    fn test_hung_device_times_out() {
        let device = MockDevice::shared();
        let fence = device.create_fence(false).expect("fence");
        submit(&device, fence);
        device.set_hung(true);
        let status = device.wait_for_fences(&[fence], Some(Duration::from_millis(1))).expect("wait");
        assert_eq!(status, FenceStatus::TimedOut);
        assert!(device.wait_idle().is_err());
        device.set_hung(false);
        device.complete_all();
        assert_eq!(device.pending_submissions(), 0);
    }

    #[test]
    fn test_acquire_goes_out_of_date_after_resize() {
        let device = MockDevice::shared();
        let swapchain = device
            .create_swapchain(&SwapchainDesc {
                image_count: 2,
                format: SurfaceFormat { format: Format::B8G8R8A8Srgb, color_space: ColorSpace::SrgbNonlinear },
                present_mode: PresentMode::Fifo,
                extent: Extent2D::new(1600, 900),
            })
            .expect("swapchain");
        let semaphore = device.create_semaphore().expect("semaphore");
        assert_eq!(
            device.acquire_next_image(swapchain, semaphore).expect("acquire"),
            AcquireOutcome::Acquired { index: 0, suboptimal: false }
        );
        device.resize_surface(Extent2D::new(800, 600));
        device.queue_present(swapchain, 0, &[semaphore]).expect("present");
        assert_eq!(device.acquire_next_image(swapchain, semaphore).expect("acquire"), AcquireOutcome::OutOfDate);
    }
}
