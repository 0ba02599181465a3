//! Command buffer management
//!
//! Type-safe command buffer recording with RAII scopes: a [`CommandPool`]
//! releases every buffer allocated from it, and an [`ActiveRenderPass`] ends
//! its pass when dropped.

use crate::render::api::{
    BufferBarrier, BufferHandle, ClearValue, CommandBufferHandle, CommandPoolHandle, DescriptorSetHandle,
    Extent2D, FramebufferHandle, GpuDevice, ImageBarrier, ImageHandle, MipBlit, PipelineHandle,
    PipelineLayoutHandle, RenderPassHandle,
};
use crate::render::error::{RenderError, RenderResult};
use std::sync::Arc;

/// Command pool wrapper with RAII cleanup
///
/// The owner must ensure no buffer from this pool is still executing when it
/// is dropped.
pub struct CommandPool<D: GpuDevice> {
    device: Arc<D>,
    handle: CommandPoolHandle,
}

impl<D: GpuDevice> CommandPool<D> {
    /// Create a pool whose buffers can be reset individually
    pub fn new(device: Arc<D>) -> RenderResult<Self> {
        let handle = device.create_command_pool(false)?;
        Ok(Self { device, handle })
    }

    /// Create a pool for short-lived one-shot buffers
    pub fn transient(device: Arc<D>) -> RenderResult<Self> {
        let handle = device.create_command_pool(true)?;
        Ok(Self { device, handle })
    }

    /// Allocate command buffers
    pub fn allocate_command_buffers(&self, count: u32) -> RenderResult<Vec<CommandBufferHandle>> {
        self.device.allocate_command_buffers(self.handle, count)
    }

    /// Get the command pool handle
    pub fn handle(&self) -> CommandPoolHandle {
        self.handle
    }

    /// Begin single-time command buffer
    pub fn begin_single_time(&self) -> RenderResult<CommandRecorder<'_, D>> {
        let command_buffer = self
            .allocate_command_buffers(1)?
            .into_iter()
            .next()
            .ok_or_else(|| RenderError::invalid("Command pool returned no buffers"))?;

        let mut recorder = CommandRecorder::new(command_buffer, self.device.as_ref());
        recorder.begin(true)?;
        Ok(recorder)
    }
}

impl<D: GpuDevice> Drop for CommandPool<D> {
    fn drop(&mut self) {
        // Frees every command buffer allocated from the pool
        self.device.destroy_command_pool(self.handle);
    }
}

/// Type-safe command buffer recorder
pub struct CommandRecorder<'d, D: GpuDevice> {
    command_buffer: CommandBufferHandle,
    device: &'d D,
    recording: bool,
}

impl<'d, D: GpuDevice> CommandRecorder<'d, D> {
    /// Create a new command recorder
    pub fn new(command_buffer: CommandBufferHandle, device: &'d D) -> Self {
        Self { command_buffer, device, recording: false }
    }

    /// Begin command recording
    pub fn begin(&mut self, one_time: bool) -> RenderResult<&mut Self> {
        if self.recording {
            return Err(RenderError::invalid("Command buffer already recording"));
        }

        self.device.begin_command_buffer(self.command_buffer, one_time)?;
        self.recording = true;
        Ok(self)
    }

    /// Resume a recorder over a buffer that is already recording
    pub(crate) fn resume(command_buffer: CommandBufferHandle, device: &'d D) -> Self {
        Self { command_buffer, device, recording: true }
    }

    /// Command buffer being recorded
    pub fn handle(&self) -> CommandBufferHandle {
        self.command_buffer
    }

    fn ensure_recording(&self) -> RenderResult<()> {
        if self.recording {
            Ok(())
        } else {
            Err(RenderError::invalid("Command buffer not recording"))
        }
    }

    /// Copy `size` bytes between buffers
    pub fn copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle, size: u64) -> RenderResult<()> {
        self.ensure_recording()?;
        self.device.cmd_copy_buffer(self.command_buffer, src, dst, size);
        Ok(())
    }

    /// Copy a buffer into mip 0 of an image
    pub fn copy_buffer_to_image(&mut self, src: BufferHandle, dst: ImageHandle, extent: Extent2D) -> RenderResult<()> {
        self.ensure_recording()?;
        self.device.cmd_copy_buffer_to_image(self.command_buffer, src, dst, extent);
        Ok(())
    }

    /// Insert a buffer memory barrier
    pub fn buffer_barrier(&mut self, barrier: &BufferBarrier) -> RenderResult<()> {
        self.ensure_recording()?;
        self.device.cmd_buffer_barrier(self.command_buffer, barrier);
        Ok(())
    }

    /// Insert an image layout transition
    pub fn image_barrier(&mut self, barrier: &ImageBarrier) -> RenderResult<()> {
        self.ensure_recording()?;
        self.device.cmd_image_barrier(self.command_buffer, barrier);
        Ok(())
    }

    /// Blit one mip level into the next
    pub fn blit_mip(&mut self, blit: &MipBlit) -> RenderResult<()> {
        self.ensure_recording()?;
        self.device.cmd_blit_mip(self.command_buffer, blit);
        Ok(())
    }

    /// Begin render pass
    pub fn begin_render_pass(
        &mut self,
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        extent: Extent2D,
        clear_values: &[ClearValue],
    ) -> RenderResult<ActiveRenderPass<'_, 'd, D>> {
        self.ensure_recording()?;
        self.device
            .cmd_begin_render_pass(self.command_buffer, render_pass, framebuffer, extent, clear_values);
        Ok(ActiveRenderPass { recorder: self })
    }

    /// End command recording
    pub fn end(mut self) -> RenderResult<CommandBufferHandle> {
        self.ensure_recording()?;
        self.device.end_command_buffer(self.command_buffer)?;
        self.recording = false;
        Ok(self.command_buffer)
    }
}

/// Active render pass; ends the pass when dropped
pub struct ActiveRenderPass<'r, 'd, D: GpuDevice> {
    recorder: &'r mut CommandRecorder<'d, D>,
}

impl<'r, 'd, D: GpuDevice> ActiveRenderPass<'r, 'd, D> {
    /// Full-extent viewport and scissor
    pub fn set_viewport_scissor(&mut self, extent: Extent2D) {
        self.recorder.device.cmd_set_viewport_scissor(self.recorder.command_buffer, extent);
    }

    /// Bind graphics pipeline
    pub fn bind_pipeline(&mut self, pipeline: PipelineHandle) {
        self.recorder.device.cmd_bind_pipeline(self.recorder.command_buffer, pipeline);
    }

    /// Bind a descriptor set
    pub fn bind_descriptor_set(&mut self, layout: PipelineLayoutHandle, set_index: u32, set: DescriptorSetHandle) {
        self.recorder
            .device
            .cmd_bind_descriptor_set(self.recorder.command_buffer, layout, set_index, set);
    }

    /// Bind vertex buffer at binding 0
    pub fn bind_vertex_buffer(&mut self, buffer: BufferHandle) {
        self.recorder.device.cmd_bind_vertex_buffer(self.recorder.command_buffer, 0, buffer);
    }

    /// Bind index buffer
    pub fn bind_index_buffer(&mut self, buffer: BufferHandle) {
        self.recorder.device.cmd_bind_index_buffer(self.recorder.command_buffer, buffer);
    }

    /// Draw indexed
    pub fn draw_indexed(&mut self, index_count: u32) {
        self.recorder.device.cmd_draw_indexed(self.recorder.command_buffer, index_count);
    }
}

impl<'r, 'd, D: GpuDevice> Drop for ActiveRenderPass<'r, 'd, D> {
    fn drop(&mut self) {
        self.recorder.device.cmd_end_render_pass(self.recorder.command_buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::{MockDevice, MockEvent};

    #[test]
    fn test_single_time_recorder_begins_and_ends() {
        let device = MockDevice::shared();
        let pool = CommandPool::transient(device.clone()).expect("Should create pool");
        let recorder = pool.begin_single_time().expect("Should begin");
        let cmd = recorder.end().expect("Should end");
        let events = device.events();
        assert!(events.contains(&MockEvent::BeginCommandBuffer(cmd.raw())));
        assert!(events.contains(&MockEvent::EndCommandBuffer(cmd.raw())));
    }

    #[test]
    fn test_double_begin_is_invalid() {
        let device = MockDevice::shared();
        let pool = CommandPool::new(device.clone()).expect("Should create pool");
        let cmd = pool.allocate_command_buffers(1).expect("Should allocate")[0];
        let mut recorder = CommandRecorder::new(cmd, device.as_ref());
        recorder.begin(false).expect("Should begin");
        assert!(matches!(recorder.begin(false), Err(RenderError::InvalidOperation { .. })));
    }

    #[test]
    fn test_render_pass_scope_ends_on_drop() {
        let device = MockDevice::shared();
        let pool = CommandPool::new(device.clone()).expect("Should create pool");
        let mut recorder = pool.begin_single_time().expect("Should begin");
        {
            let mut pass = recorder
                .begin_render_pass(RenderPassHandle(1), FramebufferHandle(1), Extent2D::new(8, 8), &[])
                .expect("Should begin pass");
            pass.draw_indexed(3);
        }
        let cmd = recorder.end().expect("Should end");
        let events = device.events();
        let begin = events.iter().position(|e| *e == MockEvent::BeginRenderPass(cmd.raw()));
        let end = events.iter().position(|e| *e == MockEvent::EndRenderPass(cmd.raw()));
        assert!(begin.is_some() && end.is_some() && begin < end);
    }

    #[test]
    fn test_commands_require_recording() {
        let device = MockDevice::shared();
        let pool = CommandPool::new(device.clone()).expect("Should create pool");
        let cmd = pool.allocate_command_buffers(1).expect("Should allocate")[0];
        let mut recorder = CommandRecorder::new(cmd, device.as_ref());
        assert!(recorder.copy_buffer(BufferHandle(1), BufferHandle(2), 4).is_err());
    }
}
