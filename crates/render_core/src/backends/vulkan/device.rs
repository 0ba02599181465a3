//! Vulkan implementation of [`GpuDevice`]
//!
//! Handles cross the core boundary as raw `u64` values from `vk::Handle`.
//! Buffer and image memory comes from a vk-mem allocator; allocations are
//! kept in maps keyed by the raw handle so destruction can hand them back.

use super::convert::{self, vk_error};
use super::instance::VulkanInstance;
use crate::render::api::*;
use crate::render::error::{RenderError, RenderResult};
use ash::extensions::khr::Swapchain;
use ash::vk::{self, Handle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use vk_mem::Alloc;

fn vkh<H: Handle>(raw: u64) -> H {
    H::from_raw(raw)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct BufferAllocation {
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: u64,
    host_visible: bool,
}

struct ImageAllocation {
    image: vk::Image,
    allocation: vk_mem::Allocation,
    format: Format,
}

/// Logical device, graphics queue and memory allocator
pub struct VulkanDevice {
    adapter: AdapterInfo,
    physical_device: vk::PhysicalDevice,
    queue: Mutex<vk::Queue>,
    swapchain_loader: Swapchain,
    allocator: Option<vk_mem::Allocator>,
    buffers: Mutex<HashMap<u64, BufferAllocation>>,
    images: Mutex<HashMap<u64, ImageAllocation>>,
    pool_capacity: Mutex<HashMap<u64, u32>>,
    device: ash::Device,
    instance: Arc<VulkanInstance>,
}

// Queue access and allocation maps are serialized by the mutexes above;
// the vk-mem allocator is internally synchronized.
unsafe impl Send for VulkanDevice {}
unsafe impl Sync for VulkanDevice {}

impl VulkanDevice {
    pub(super) fn new(
        instance: Arc<VulkanInstance>,
        adapter: AdapterInfo,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        queue_family: u32,
    ) -> Self {
        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        let swapchain_loader = Swapchain::new(instance.instance(), &device);
        Self {
            adapter,
            physical_device,
            queue: Mutex::new(queue),
            swapchain_loader,
            allocator: None,
            buffers: Mutex::new(HashMap::new()),
            images: Mutex::new(HashMap::new()),
            pool_capacity: Mutex::new(HashMap::new()),
            device,
            instance,
        }
    }

    /// Raw ash device for host-side pipeline creation
    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    /// Instance the device was created from
    pub fn instance(&self) -> &Arc<VulkanInstance> {
        &self.instance
    }

    fn allocator(&self) -> RenderResult<&vk_mem::Allocator> {
        self.allocator
            .as_ref()
            .ok_or_else(|| RenderError::AllocatorInit("allocator not created".to_string()))
    }

    fn image_aspect(&self, image: ImageHandle) -> vk::ImageAspectFlags {
        match lock(&self.images).get(&image.raw()) {
            Some(allocation) if allocation.format.is_depth() => vk::ImageAspectFlags::DEPTH,
            _ => vk::ImageAspectFlags::COLOR,
        }
    }

    fn host_buffer<R>(
        &self,
        buffer: BufferHandle,
        offset: u64,
        len: usize,
        access: impl FnOnce(*mut u8) -> R,
    ) -> RenderResult<R> {
        let allocator = self.allocator()?;
        let mut buffers = lock(&self.buffers);
        let entry = buffers
            .get_mut(&buffer.raw())
            .ok_or(RenderError::ResourceNotFound { id: buffer.raw() })?;
        if !entry.host_visible {
            return Err(RenderError::invalid("buffer memory is not host visible"));
        }
        if offset + len as u64 > entry.size {
            return Err(RenderError::invalid(format!(
                "access of {len} bytes at {offset} exceeds buffer of {} bytes",
                entry.size
            )));
        }

        let mapped = unsafe { allocator.map_memory(&mut entry.allocation) }.map_err(vk_error("vmaMapMemory"))?;
        let result = access(unsafe { mapped.add(offset as usize) });
        unsafe { allocator.unmap_memory(&mut entry.allocation) };
        Ok(result)
    }
}

impl GpuDevice for VulkanDevice {
    fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    fn create_allocator(&mut self) -> RenderResult<()> {
        let create_info =
            vk_mem::AllocatorCreateInfo::new(self.instance.instance(), &self.device, self.physical_device);
        #[allow(unused_unsafe)]
        let allocator = unsafe { vk_mem::Allocator::new(create_info) }
            .map_err(|e| RenderError::AllocatorInit(format!("vmaCreateAllocator: {e:?}")))?;
        self.allocator = Some(allocator);
        log::debug!("Memory allocator ready on {}", self.adapter.name);
        Ok(())
    }

    fn create_buffer(&self, desc: &BufferDesc) -> RenderResult<BufferHandle> {
        let allocator = self.allocator()?;
        let info = vk::BufferCreateInfo::builder()
            .size(desc.size)
            .usage(convert::buffer_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let host_visible = desc.location == MemoryLocation::HostVisible;
        let alloc_info = if host_visible {
            vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
                required_flags: vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                ..Default::default()
            }
        } else {
            vk_mem::AllocationCreateInfo { usage: vk_mem::MemoryUsage::AutoPreferDevice, ..Default::default() }
        };

        let (buffer, allocation) =
            unsafe { allocator.create_buffer(&info, &alloc_info) }.map_err(vk_error("vmaCreateBuffer"))?;
        let handle = BufferHandle(buffer.as_raw());
        lock(&self.buffers).insert(handle.raw(), BufferAllocation { buffer, allocation, size: desc.size, host_visible });
        Ok(handle)
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let Some(mut entry) = lock(&self.buffers).remove(&buffer.raw()) else {
            log::warn!("destroy_buffer on unknown {buffer:?}");
            return;
        };
        if let Some(allocator) = &self.allocator {
            unsafe { allocator.destroy_buffer(entry.buffer, &mut entry.allocation) };
        }
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()> {
        self.host_buffer(buffer, offset, data.len(), |ptr| unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
        })
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, out: &mut [u8]) -> RenderResult<()> {
        let len = out.len();
        self.host_buffer(buffer, offset, len, |ptr| unsafe {
            std::ptr::copy_nonoverlapping(ptr as *const u8, out.as_mut_ptr(), len);
        })
    }

    fn create_image(&self, desc: &ImageDesc) -> RenderResult<ImageHandle> {
        let allocator = self.allocator()?;
        let info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D { width: desc.extent.width, height: desc.extent.height, depth: 1 })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .format(convert::format(desc.format))
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(convert::image_usage(desc.usage))
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let alloc_info =
            vk_mem::AllocationCreateInfo { usage: vk_mem::MemoryUsage::AutoPreferDevice, ..Default::default() };

        let (image, allocation) =
            unsafe { allocator.create_image(&info, &alloc_info) }.map_err(vk_error("vmaCreateImage"))?;
        let handle = ImageHandle(image.as_raw());
        lock(&self.images).insert(handle.raw(), ImageAllocation { image, allocation, format: desc.format });
        Ok(handle)
    }

    fn destroy_image(&self, image: ImageHandle) {
        let Some(mut entry) = lock(&self.images).remove(&image.raw()) else {
            log::warn!("destroy_image on unknown {image:?}");
            return;
        };
        if let Some(allocator) = &self.allocator {
            unsafe { allocator.destroy_image(entry.image, &mut entry.allocation) };
        }
    }

    fn create_image_view(
        &self,
        image: ImageHandle,
        format: Format,
        aspect: ImageAspect,
        mip_levels: u32,
    ) -> RenderResult<ImageViewHandle> {
        let info = vk::ImageViewCreateInfo::builder()
            .image(vkh(image.raw()))
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(convert::format(format))
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: convert::aspect(aspect),
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe { self.device.create_image_view(&info, None) }.map_err(vk_error("vkCreateImageView"))?;
        Ok(ImageViewHandle(view.as_raw()))
    }

    fn destroy_image_view(&self, view: ImageViewHandle) {
        unsafe { self.device.destroy_image_view(vkh(view.raw()), None) };
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> RenderResult<SamplerHandle> {
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(desc.max_anisotropy.is_some())
            .max_anisotropy(desc.max_anisotropy.unwrap_or(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(desc.mip_levels as f32);
        let sampler = unsafe { self.device.create_sampler(&info, None) }.map_err(vk_error("vkCreateSampler"))?;
        Ok(SamplerHandle(sampler.as_raw()))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        unsafe { self.device.destroy_sampler(vkh(sampler.raw()), None) };
    }

    fn create_command_pool(&self, transient: bool) -> RenderResult<CommandPoolHandle> {
        let mut flags = vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER;
        if transient {
            flags |= vk::CommandPoolCreateFlags::TRANSIENT;
        }
        let family = self.adapter.graphics_present_family.ok_or(RenderError::NoSuitableDevice)?;
        let info = vk::CommandPoolCreateInfo::builder().queue_family_index(family).flags(flags);
        let pool = unsafe { self.device.create_command_pool(&info, None) }.map_err(vk_error("vkCreateCommandPool"))?;
        Ok(CommandPoolHandle(pool.as_raw()))
    }

    fn destroy_command_pool(&self, pool: CommandPoolHandle) {
        unsafe { self.device.destroy_command_pool(vkh(pool.raw()), None) };
    }

    fn allocate_command_buffers(&self, pool: CommandPoolHandle, count: u32) -> RenderResult<Vec<CommandBufferHandle>> {
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(vkh(pool.raw()))
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        let buffers =
            unsafe { self.device.allocate_command_buffers(&info) }.map_err(vk_error("vkAllocateCommandBuffers"))?;
        Ok(buffers.into_iter().map(|cmd| CommandBufferHandle(cmd.as_raw())).collect())
    }

    fn begin_command_buffer(&self, cmd: CommandBufferHandle, one_time: bool) -> RenderResult<()> {
        let flags = if one_time {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        let info = vk::CommandBufferBeginInfo::builder().flags(flags);
        unsafe { self.device.begin_command_buffer(vkh(cmd.raw()), &info) }.map_err(vk_error("vkBeginCommandBuffer"))
    }

    fn end_command_buffer(&self, cmd: CommandBufferHandle) -> RenderResult<()> {
        unsafe { self.device.end_command_buffer(vkh(cmd.raw())) }.map_err(vk_error("vkEndCommandBuffer"))
    }

    fn reset_command_buffer(&self, cmd: CommandBufferHandle) -> RenderResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(vkh(cmd.raw()), vk::CommandBufferResetFlags::empty())
        }
        .map_err(vk_error("vkResetCommandBuffer"))
    }

    fn cmd_copy_buffer(&self, cmd: CommandBufferHandle, src: BufferHandle, dst: BufferHandle, size: u64) {
        let region = vk::BufferCopy { src_offset: 0, dst_offset: 0, size };
        unsafe {
            self.device
                .cmd_copy_buffer(vkh(cmd.raw()), vkh(src.raw()), vkh(dst.raw()), &[region])
        };
    }

    fn cmd_copy_buffer_to_image(&self, cmd: CommandBufferHandle, src: BufferHandle, dst: ImageHandle, extent: Extent2D) {
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: vk::Extent3D { width: extent.width, height: extent.height, depth: 1 },
        };
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                vkh(cmd.raw()),
                vkh(src.raw()),
                vkh(dst.raw()),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            )
        };
    }

    fn cmd_buffer_barrier(&self, cmd: CommandBufferHandle, barrier: &BufferBarrier) {
        let (src_access, src_stage) = convert::buffer_access(barrier.src);
        let (dst_access, dst_stage) = convert::buffer_access(barrier.dst);
        let vk_barrier = vk::BufferMemoryBarrier::builder()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(vkh(barrier.buffer.raw()))
            .offset(0)
            .size(vk::WHOLE_SIZE)
            .build();
        unsafe {
            self.device.cmd_pipeline_barrier(
                vkh(cmd.raw()),
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[vk_barrier],
                &[],
            )
        };
    }

    fn cmd_image_barrier(&self, cmd: CommandBufferHandle, barrier: &ImageBarrier) {
        let (src_access, src_stage) = convert::layout_access(barrier.old_layout);
        let (dst_access, dst_stage) = convert::layout_access(barrier.new_layout);
        let vk_barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(convert::image_layout(barrier.old_layout))
            .new_layout(convert::image_layout(barrier.new_layout))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(vkh(barrier.image.raw()))
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: self.image_aspect(barrier.image),
                base_mip_level: barrier.base_mip,
                level_count: barrier.mip_count,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .build();
        unsafe {
            self.device.cmd_pipeline_barrier(
                vkh(cmd.raw()),
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[vk_barrier],
            )
        };
    }

    fn cmd_blit_mip(&self, cmd: CommandBufferHandle, blit: &MipBlit) {
        let corner = |extent: Extent2D| vk::Offset3D { x: extent.width as i32, y: extent.height as i32, z: 1 };
        let layers = |mip_level| vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level,
            base_array_layer: 0,
            layer_count: 1,
        };
        let region = vk::ImageBlit {
            src_subresource: layers(blit.src_mip),
            src_offsets: [vk::Offset3D::default(), corner(blit.src_extent)],
            dst_subresource: layers(blit.src_mip + 1),
            dst_offsets: [vk::Offset3D::default(), corner(blit.dst_extent)],
        };
        let image = vkh(blit.image.raw());
        unsafe {
            self.device.cmd_blit_image(
                vkh(cmd.raw()),
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
                vk::Filter::LINEAR,
            )
        };
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: CommandBufferHandle,
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        extent: Extent2D,
        clears: &[ClearValue],
    ) {
        let clear_values: Vec<vk::ClearValue> = clears.iter().copied().map(convert::clear_value).collect();
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(vkh(render_pass.raw()))
            .framebuffer(vkh(framebuffer.raw()))
            .render_area(vk::Rect2D { offset: vk::Offset2D::default(), extent: convert::extent(extent) })
            .clear_values(&clear_values);
        unsafe {
            self.device
                .cmd_begin_render_pass(vkh(cmd.raw()), &info, vk::SubpassContents::INLINE)
        };
    }

    fn cmd_end_render_pass(&self, cmd: CommandBufferHandle) {
        unsafe { self.device.cmd_end_render_pass(vkh(cmd.raw())) };
    }

    fn cmd_set_viewport_scissor(&self, cmd: CommandBufferHandle, extent: Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D { offset: vk::Offset2D::default(), extent: convert::extent(extent) };
        unsafe {
            self.device.cmd_set_viewport(vkh(cmd.raw()), 0, &[viewport]);
            self.device.cmd_set_scissor(vkh(cmd.raw()), 0, &[scissor]);
        }
    }

    fn cmd_bind_pipeline(&self, cmd: CommandBufferHandle, pipeline: PipelineHandle) {
        unsafe {
            self.device
                .cmd_bind_pipeline(vkh(cmd.raw()), vk::PipelineBindPoint::GRAPHICS, vkh(pipeline.raw()))
        };
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        set_index: u32,
        set: DescriptorSetHandle,
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                vkh(cmd.raw()),
                vk::PipelineBindPoint::GRAPHICS,
                vkh(layout.raw()),
                set_index,
                &[vkh(set.raw())],
                &[],
            )
        };
    }

    fn cmd_bind_vertex_buffer(&self, cmd: CommandBufferHandle, binding: u32, buffer: BufferHandle) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(vkh(cmd.raw()), binding, &[vkh(buffer.raw())], &[0])
        };
    }

    fn cmd_bind_index_buffer(&self, cmd: CommandBufferHandle, buffer: BufferHandle) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(vkh(cmd.raw()), vkh(buffer.raw()), 0, vk::IndexType::UINT32)
        };
    }

    fn cmd_draw_indexed(&self, cmd: CommandBufferHandle, index_count: u32) {
        unsafe { self.device.cmd_draw_indexed(vkh(cmd.raw()), index_count, 1, 0, 0, 0) };
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<FenceHandle> {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { self.device.create_fence(&info, None) }.map_err(vk_error("vkCreateFence"))?;
        Ok(FenceHandle(fence.as_raw()))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        unsafe { self.device.destroy_fence(vkh(fence.raw()), None) };
    }

    fn wait_for_fences(&self, fences: &[FenceHandle], timeout: Option<Duration>) -> RenderResult<FenceStatus> {
        let fences: Vec<vk::Fence> = fences.iter().map(|f| vkh(f.raw())).collect();
        match unsafe { self.device.wait_for_fences(&fences, true, convert::timeout_ns(timeout)) } {
            Ok(()) => Ok(FenceStatus::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(FenceStatus::TimedOut),
            Err(e) => Err(vk_error("vkWaitForFences")(e)),
        }
    }

    fn reset_fences(&self, fences: &[FenceHandle]) -> RenderResult<()> {
        let fences: Vec<vk::Fence> = fences.iter().map(|f| vkh(f.raw())).collect();
        unsafe { self.device.reset_fences(&fences) }.map_err(vk_error("vkResetFences"))
    }

    fn fence_signaled(&self, fence: FenceHandle) -> RenderResult<bool> {
        unsafe { self.device.get_fence_status(vkh(fence.raw())) }.map_err(vk_error("vkGetFenceStatus"))
    }

    fn create_semaphore(&self) -> RenderResult<SemaphoreHandle> {
        let info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe { self.device.create_semaphore(&info, None) }.map_err(vk_error("vkCreateSemaphore"))?;
        Ok(SemaphoreHandle(semaphore.as_raw()))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        unsafe { self.device.destroy_semaphore(vkh(semaphore.raw()), None) };
    }

    fn queue_submit(&self, submit: &SubmitInfo, fence: Option<FenceHandle>) -> RenderResult<()> {
        let command_buffers: Vec<vk::CommandBuffer> = submit.command_buffers.iter().map(|c| vkh(c.raw())).collect();
        let wait_semaphores: Vec<vk::Semaphore> = submit.wait.iter().map(|(s, _)| vkh(s.raw())).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> =
            submit.wait.iter().map(|(_, stage)| convert::pipeline_stage(*stage)).collect();
        let signal_semaphores: Vec<vk::Semaphore> = submit.signal.iter().map(|s| vkh(s.raw())).collect();

        let info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();
        let fence = fence.map_or(vk::Fence::null(), |f| vkh(f.raw()));

        let queue = lock(&self.queue);
        unsafe { self.device.queue_submit(*queue, &[info], fence) }.map_err(vk_error("vkQueueSubmit"))
    }

    fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(vk_error("vkDeviceWaitIdle"))
    }

    fn surface_capabilities(&self) -> RenderResult<SurfaceCapabilities> {
        let caps = unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_capabilities(self.physical_device, self.instance.surface())
        }
        .map_err(vk_error("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?;
        Ok(convert::surface_capabilities_from(&caps))
    }

    fn surface_formats(&self) -> RenderResult<Vec<SurfaceFormat>> {
        let formats = unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_formats(self.physical_device, self.instance.surface())
        }
        .map_err(vk_error("vkGetPhysicalDeviceSurfaceFormatsKHR"))?;
        Ok(formats.into_iter().map(convert::surface_format_from).collect())
    }

    fn surface_present_modes(&self) -> RenderResult<Vec<PresentMode>> {
        let modes = unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_present_modes(self.physical_device, self.instance.surface())
        }
        .map_err(vk_error("vkGetPhysicalDeviceSurfacePresentModesKHR"))?;
        Ok(modes.into_iter().filter_map(convert::present_mode_from).collect())
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RenderResult<SwapchainHandle> {
        let caps = unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_capabilities(self.physical_device, self.instance.surface())
        }
        .map_err(vk_error("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?;

        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.instance.surface())
            .min_image_count(desc.image_count)
            .image_format(convert::format(desc.format.format))
            .image_color_space(convert::color_space(desc.format.color_space))
            .image_extent(convert::extent(desc.extent))
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(convert::present_mode(desc.present_mode))
            .clipped(true);

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&info, None) }
            .map_err(vk_error("vkCreateSwapchainKHR"))?;
        Ok(SwapchainHandle(swapchain.as_raw()))
    }

    fn swapchain_images(&self, swapchain: SwapchainHandle) -> RenderResult<Vec<ImageHandle>> {
        let images = unsafe { self.swapchain_loader.get_swapchain_images(vkh(swapchain.raw())) }
            .map_err(vk_error("vkGetSwapchainImagesKHR"))?;
        Ok(images.into_iter().map(|image| ImageHandle(image.as_raw())).collect())
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) {
        unsafe { self.swapchain_loader.destroy_swapchain(vkh(swapchain.raw()), None) };
    }

    fn acquire_next_image(&self, swapchain: SwapchainHandle, signal: SemaphoreHandle) -> RenderResult<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(vkh(swapchain.raw()), u64::MAX, vkh(signal.raw()), vk::Fence::null())
        };
        match result {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Acquired { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(vk_error("vkAcquireNextImageKHR")(e)),
        }
    }

    fn queue_present(
        &self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: &[SemaphoreHandle],
    ) -> RenderResult<PresentOutcome> {
        let wait_semaphores: Vec<vk::Semaphore> = wait.iter().map(|s| vkh(s.raw())).collect();
        let swapchains = [vkh::<vk::SwapchainKHR>(swapchain.raw())];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let queue = lock(&self.queue);
        match unsafe { self.swapchain_loader.queue_present(*queue, &info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(vk_error("vkQueuePresentKHR")(e)),
        }
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> RenderResult<RenderPassHandle> {
        let attachment = |format: Format, final_layout: ImageLayout, store: vk::AttachmentStoreOp| {
            vk::AttachmentDescription::builder()
                .format(convert::format(format))
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(store)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(convert::image_layout(final_layout))
                .build()
        };

        let mut attachments: Vec<vk::AttachmentDescription> = desc
            .color
            .iter()
            .map(|a| attachment(a.format, a.final_layout, vk::AttachmentStoreOp::STORE))
            .collect();
        attachments.push(attachment(desc.depth.format, desc.depth.final_layout, vk::AttachmentStoreOp::DONT_CARE));

        let color_refs: Vec<vk::AttachmentReference> = (0..desc.color.len() as u32)
            .map(|attachment| vk::AttachmentReference { attachment, layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL })
            .collect();
        let depth_ref = vk::AttachmentReference {
            attachment: desc.color.len() as u32,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)
            .build()];

        let dependencies = convert::gbuffer_pass_dependencies();

        let info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let render_pass =
            unsafe { self.device.create_render_pass(&info, None) }.map_err(vk_error("vkCreateRenderPass"))?;
        Ok(RenderPassHandle(render_pass.as_raw()))
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        unsafe { self.device.destroy_render_pass(vkh(render_pass.raw()), None) };
    }

    fn create_framebuffer(
        &self,
        render_pass: RenderPassHandle,
        attachments: &[ImageViewHandle],
        extent: Extent2D,
    ) -> RenderResult<FramebufferHandle> {
        let views: Vec<vk::ImageView> = attachments.iter().map(|v| vkh(v.raw())).collect();
        let info = vk::FramebufferCreateInfo::builder()
            .render_pass(vkh(render_pass.raw()))
            .attachments(&views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        let framebuffer =
            unsafe { self.device.create_framebuffer(&info, None) }.map_err(vk_error("vkCreateFramebuffer"))?;
        Ok(FramebufferHandle(framebuffer.as_raw()))
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        unsafe { self.device.destroy_framebuffer(vkh(framebuffer.raw()), None) };
    }

    fn create_descriptor_set_layout(&self, bindings: &[DescriptorBindingLayout]) -> RenderResult<DescriptorSetLayoutHandle> {
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(b.binding)
                    .descriptor_type(convert::descriptor_type(b.ty))
                    .descriptor_count(1)
                    .stage_flags(convert::shader_stages(b.stages))
                    .build()
            })
            .collect();
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&vk_bindings);
        let layout = unsafe { self.device.create_descriptor_set_layout(&info, None) }
            .map_err(vk_error("vkCreateDescriptorSetLayout"))?;
        Ok(DescriptorSetLayoutHandle(layout.as_raw()))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        unsafe { self.device.destroy_descriptor_set_layout(vkh(layout.raw()), None) };
    }

    fn create_descriptor_pool(&self, sizes: &DescriptorPoolSizes) -> RenderResult<DescriptorPoolHandle> {
        let pool_sizes: Vec<vk::DescriptorPoolSize> = [
            (vk::DescriptorType::UNIFORM_BUFFER, sizes.uniform_buffers),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, sizes.image_samplers),
        ]
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(ty, descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count })
        .collect();

        let info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .pool_sizes(&pool_sizes)
            .max_sets(sizes.max_sets);
        let pool = unsafe { self.device.create_descriptor_pool(&info, None) }
            .map_err(vk_error("vkCreateDescriptorPool"))?;
        lock(&self.pool_capacity).insert(pool.as_raw(), sizes.max_sets);
        Ok(DescriptorPoolHandle(pool.as_raw()))
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        lock(&self.pool_capacity).remove(&pool.raw());
        unsafe { self.device.destroy_descriptor_pool(vkh(pool.raw()), None) };
    }

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> RenderResult<DescriptorSetHandle> {
        let layouts = [vkh::<vk::DescriptorSetLayout>(layout.raw())];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(vkh(pool.raw()))
            .set_layouts(&layouts);
        match unsafe { self.device.allocate_descriptor_sets(&info) } {
            Ok(sets) => sets
                .first()
                .map(|set| DescriptorSetHandle(set.as_raw()))
                .ok_or_else(|| RenderError::invalid("descriptor allocation returned no set")),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                let max_sets = lock(&self.pool_capacity).get(&pool.raw()).copied().unwrap_or(0);
                Err(RenderError::DescriptorPoolExhausted { max_sets })
            }
            Err(e) => Err(vk_error("vkAllocateDescriptorSets")(e)),
        }
    }

    fn update_descriptor_set(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) -> RenderResult<()> {
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = writes
            .iter()
            .filter_map(|w| match w.resource {
                DescriptorResource::Buffer { buffer, offset, range } => {
                    Some(vk::DescriptorBufferInfo { buffer: vkh(buffer.raw()), offset, range })
                }
                DescriptorResource::Image { .. } => None,
            })
            .collect();
        let image_infos: Vec<vk::DescriptorImageInfo> = writes
            .iter()
            .filter_map(|w| match w.resource {
                DescriptorResource::Image { view, sampler } => Some(vk::DescriptorImageInfo {
                    sampler: vkh(sampler.raw()),
                    image_view: vkh(view.raw()),
                    image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                }),
                DescriptorResource::Buffer { .. } => None,
            })
            .collect();

        let (mut next_buffer, mut next_image) = (0, 0);
        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .map(|w| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(vkh(set.raw()))
                    .dst_binding(w.binding)
                    .dst_array_element(0)
                    .descriptor_type(convert::descriptor_type(w.ty));
                match w.resource {
                    DescriptorResource::Buffer { .. } => {
                        next_buffer += 1;
                        builder.buffer_info(&buffer_infos[next_buffer - 1..next_buffer]).build()
                    }
                    DescriptorResource::Image { .. } => {
                        next_image += 1;
                        builder.image_info(&image_infos[next_image - 1..next_image]).build()
                    }
                }
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
        Ok(())
    }

    fn free_descriptor_set(&self, pool: DescriptorPoolHandle, set: DescriptorSetHandle) -> RenderResult<()> {
        unsafe { self.device.free_descriptor_sets(vkh(pool.raw()), &[vkh(set.raw())]) }
            .map_err(vk_error("vkFreeDescriptorSets"))
    }

    fn create_pipeline_layout(&self, set_layouts: &[DescriptorSetLayoutHandle]) -> RenderResult<PipelineLayoutHandle> {
        let layouts: Vec<vk::DescriptorSetLayout> = set_layouts.iter().map(|l| vkh(l.raw())).collect();
        let info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&layouts);
        let layout = unsafe { self.device.create_pipeline_layout(&info, None) }
            .map_err(vk_error("vkCreatePipelineLayout"))?;
        Ok(PipelineLayoutHandle(layout.as_raw()))
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) {
        unsafe { self.device.destroy_pipeline_layout(vkh(layout.raw()), None) };
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::error!("Device not idle at teardown: {e:?}");
            }

            let buffers: Vec<BufferAllocation> = lock(&self.buffers).drain().map(|(_, b)| b).collect();
            let images: Vec<ImageAllocation> = lock(&self.images).drain().map(|(_, i)| i).collect();
            if !buffers.is_empty() || !images.is_empty() {
                log::warn!("{} buffers and {} images still alive at device teardown", buffers.len(), images.len());
            }
            if let Some(allocator) = self.allocator.take() {
                for mut buffer in buffers {
                    allocator.destroy_buffer(buffer.buffer, &mut buffer.allocation);
                }
                for mut image in images {
                    allocator.destroy_image(image.image, &mut image.allocation);
                }
                drop(allocator);
            }

            self.device.destroy_device(None);
        }
    }
}
