//! Frame synchronization
//!
//! Fences, semaphores and the N-slot frame loop. A slot moves through
//! `Idle -> Recording -> Submitted` and back to `Idle` once its fence is
//! observed signaled; its command buffer is only re-recorded from `Idle`.

use crate::core::RendererConfig;
use crate::render::api::{
    AcquireOutcome, CommandBufferHandle, Extent2D, FenceHandle, FenceStatus, FramebufferHandle, GpuDevice,
    PipelineStage, PresentOutcome, SemaphoreHandle, SubmitInfo,
};
use crate::render::commands::CommandPool;
use crate::render::error::{RenderError, RenderResult};
use crate::render::targets::RenderTargets;
use std::sync::Arc;
use std::time::Duration;

/// Something that can block until no submitted frame is still executing
///
/// Used by swapchain rebuilds, descriptor rewrites and teardown paths that
/// must not touch resources a recorded frame may still read.
pub trait InFlightWait {
    /// Block until every submitted frame has finished on the GPU
    fn wait_for_in_flight(&self) -> RenderResult<()>;
}

/// Fence wrapper with RAII cleanup
pub struct Fence<D: GpuDevice> {
    device: Arc<D>,
    handle: FenceHandle,
}

impl<D: GpuDevice> Fence<D> {
    /// Create a fence, optionally in the signaled state
    pub fn new(device: Arc<D>, signaled: bool) -> RenderResult<Self> {
        let handle = device.create_fence(signaled)?;
        Ok(Self { device, handle })
    }

    /// Block until signaled; an expired timeout is reported as device loss
    pub fn wait(&self, timeout: Option<Duration>, context: &str) -> RenderResult<()> {
        match self.device.wait_for_fences(&[self.handle], timeout)? {
            FenceStatus::Signaled => Ok(()),
            FenceStatus::TimedOut => Err(RenderError::device_lost(format!(
                "{context} (fence not signaled within {:?})",
                timeout.unwrap_or(Duration::MAX)
            ))),
        }
    }

    /// Return the fence to the unsignaled state
    pub fn reset(&self) -> RenderResult<()> {
        self.device.reset_fences(&[self.handle])
    }

    /// Get fence handle
    pub fn handle(&self) -> FenceHandle {
        self.handle
    }
}

impl<D: GpuDevice> Drop for Fence<D> {
    fn drop(&mut self) {
        self.device.destroy_fence(self.handle);
    }
}

/// Semaphore wrapper with RAII cleanup
pub struct Semaphore<D: GpuDevice> {
    device: Arc<D>,
    handle: SemaphoreHandle,
}

impl<D: GpuDevice> Semaphore<D> {
    /// Create a binary semaphore
    pub fn new(device: Arc<D>) -> RenderResult<Self> {
        let handle = device.create_semaphore()?;
        Ok(Self { device, handle })
    }

    /// Get semaphore handle
    pub fn handle(&self) -> SemaphoreHandle {
        self.handle
    }
}

impl<D: GpuDevice> Drop for Semaphore<D> {
    fn drop(&mut self) {
        self.device.destroy_semaphore(self.handle);
    }
}

/// Lifecycle state of a frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Free to record
    Idle,
    /// Command buffer is being recorded
    Recording,
    /// Submitted; the fence signals when the GPU is done
    Submitted,
}

/// One reusable execution context
pub struct FrameSlot<D: GpuDevice> {
    command_buffer: CommandBufferHandle,
    image_available: Semaphore<D>,
    render_finished: Semaphore<D>,
    in_flight: Fence<D>,
    state: SlotState,
}

impl<D: GpuDevice> FrameSlot<D> {
    fn new(device: &Arc<D>, command_buffer: CommandBufferHandle) -> RenderResult<Self> {
        Ok(Self {
            command_buffer,
            image_available: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
            // Created signaled so the first wait returns immediately
            in_flight: Fence::new(device.clone(), true)?,
            state: SlotState::Idle,
        })
    }

    /// Command buffer owned by this slot
    pub fn command_buffer(&self) -> CommandBufferHandle {
        self.command_buffer
    }

    /// Completion fence
    pub fn fence(&self) -> FenceHandle {
        self.in_flight.handle()
    }

    /// Current state
    pub fn state(&self) -> SlotState {
        self.state
    }
}

/// Per-frame recording context handed to the host between `begin_frame` and `end_frame`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameContext {
    /// Frame slot in use
    pub slot: usize,
    /// Acquired swapchain image
    pub image_index: u32,
    /// Command buffer in the recording state
    pub command_buffer: CommandBufferHandle,
    /// Framebuffer for the acquired image
    pub framebuffer: FramebufferHandle,
    /// Extent of the framebuffer
    pub extent: Extent2D,
}

#[derive(Debug, Clone, Copy)]
struct ActiveFrame {
    slot: usize,
    image_index: u32,
}

/// Manages N in-flight frame slots
pub struct FrameSynchronizer<D: GpuDevice> {
    // Slots drop before the pool that owns their command buffers
    slots: Vec<FrameSlot<D>>,
    // Taken only to leak it when the queue never drains
    command_pool: Option<CommandPool<D>>,
    device: Arc<D>,
    current: usize,
    active: Option<ActiveFrame>,
    fence_timeout: Option<Duration>,
    frames_submitted: u64,
    rebuilds: u64,
}

impl<D: GpuDevice> FrameSynchronizer<D> {
    /// Create `config.frames_in_flight` slots
    pub fn new(device: Arc<D>, config: &RendererConfig) -> RenderResult<Self> {
        log::debug!("Creating FrameSynchronizer with {} frames in flight", config.frames_in_flight);

        let command_pool = CommandPool::new(device.clone())?;
        let command_buffers = command_pool.allocate_command_buffers(config.frames_in_flight as u32)?;
        let slots = command_buffers
            .into_iter()
            .map(|cmd| FrameSlot::new(&device, cmd))
            .collect::<RenderResult<Vec<_>>>()?;

        Ok(Self {
            slots,
            command_pool: Some(command_pool),
            device,
            current: 0,
            active: None,
            fence_timeout: config.fence_timeout(),
            frames_submitted: 0,
            rebuilds: 0,
        })
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Slot the next `begin_frame` will use
    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// Inspect a slot
    pub fn slot(&self, index: usize) -> Option<&FrameSlot<D>> {
        self.slots.get(index)
    }

    /// Whether a frame is between `begin_frame` and `end_frame`
    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Frames handed to the queue so far
    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    /// Swapchain rebuilds triggered from the frame loop
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    fn wait_slot(&mut self, index: usize) -> RenderResult<()> {
        let slot = &mut self.slots[index];
        if slot.state == SlotState::Submitted {
            slot.in_flight
                .wait(self.fence_timeout, &format!("waiting for frame slot {index}"))?;
            slot.state = SlotState::Idle;
        }
        Ok(())
    }

    fn rebuild_targets(&mut self, targets: &mut RenderTargets<D>) -> RenderResult<()> {
        targets.rebuild(&*self)?;
        self.rebuilds += 1;
        Ok(())
    }

    fn acquire(&self, slot: usize, targets: &mut RenderTargets<D>) -> RenderResult<Option<u32>> {
        let semaphore = self.slots[slot].image_available.handle();
        match self.device.acquire_next_image(targets.swapchain_handle(), semaphore) {
            Ok(AcquireOutcome::Acquired { index, suboptimal }) => {
                if suboptimal {
                    log::debug!("Acquired suboptimal swapchain image {index}; rebuilding next frame");
                    targets.mark_stale();
                }
                Ok(Some(index))
            }
            Ok(AcquireOutcome::OutOfDate) | Err(RenderError::SwapchainOutOfDate) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Wait on the slot's fence, acquire an image and begin recording
    ///
    /// A stale swapchain is rebuilt before acquiring; an out-of-date acquire
    /// rebuilds and retries once, and a second failure is fatal. The fence is
    /// reset only after an image was acquired.
    pub fn begin_frame(&mut self, targets: &mut RenderTargets<D>) -> RenderResult<FrameContext> {
        if self.active.is_some() {
            return Err(RenderError::invalid("begin_frame called while a frame is recording"));
        }

        let slot = self.current;
        self.wait_slot(slot)?;

        if targets.is_stale() {
            self.rebuild_targets(targets)?;
        }

        let image_index = match self.acquire(slot, targets)? {
            Some(index) => index,
            None => {
                log::warn!("Swapchain out of date during acquire; rebuilding and retrying");
                self.rebuild_targets(targets)?;
                self.acquire(slot, targets)?
                    .ok_or(RenderError::SwapchainRebuildFailed { operation: "acquire" })?
            }
        };

        let frame_slot = &mut self.slots[slot];
        frame_slot.in_flight.reset()?;
        self.device.reset_command_buffer(frame_slot.command_buffer)?;
        self.device.begin_command_buffer(frame_slot.command_buffer, true)?;
        frame_slot.state = SlotState::Recording;

        self.active = Some(ActiveFrame { slot, image_index });

        Ok(FrameContext {
            slot,
            image_index,
            command_buffer: frame_slot.command_buffer,
            framebuffer: targets.framebuffer(image_index)?,
            extent: targets.extent(),
        })
    }

    /// Finish recording, submit and present
    ///
    /// Suboptimal and out-of-date presents mark the targets stale so the next
    /// `begin_frame` rebuilds before acquiring.
    pub fn end_frame(&mut self, targets: &mut RenderTargets<D>) -> RenderResult<PresentOutcome> {
        let active = self
            .active
            .take()
            .ok_or_else(|| RenderError::invalid("end_frame called without begin_frame"))?;

        let slot = &mut self.slots[active.slot];
        self.device.end_command_buffer(slot.command_buffer)?;

        let submit = SubmitInfo {
            command_buffers: vec![slot.command_buffer],
            wait: vec![(slot.image_available.handle(), PipelineStage::ColorAttachmentOutput)],
            signal: vec![slot.render_finished.handle()],
        };
        if let Err(e) = self.device.queue_submit(&submit, Some(slot.in_flight.handle())) {
            // Nothing will ever signal the reset fence
            slot.state = SlotState::Idle;
            return Err(e);
        }
        slot.state = SlotState::Submitted;
        self.frames_submitted += 1;

        let outcome = match self.device.queue_present(
            targets.swapchain_handle(),
            active.image_index,
            &[slot.render_finished.handle()],
        ) {
            Err(RenderError::SwapchainOutOfDate) => PresentOutcome::OutOfDate,
            other => other?,
        };
        if outcome != PresentOutcome::Presented {
            log::debug!("Present reported {outcome:?}; swapchain marked stale");
            targets.mark_stale();
        }

        self.current = (self.current + 1) % self.slots.len();
        Ok(outcome)
    }

    /// Block until every slot's submitted work is finished
    pub fn shutdown(&mut self) -> RenderResult<()> {
        log::debug!("Waiting for {} frame slots before teardown", self.slots.len());
        self.wait_for_in_flight()?;
        for slot in &mut self.slots {
            slot.state = SlotState::Idle;
        }
        self.active = None;
        Ok(())
    }
}

impl<D: GpuDevice> InFlightWait for FrameSynchronizer<D> {
    fn wait_for_in_flight(&self) -> RenderResult<()> {
        let fences: Vec<FenceHandle> = self
            .slots
            .iter()
            .filter(|slot| slot.state == SlotState::Submitted)
            .map(|slot| slot.in_flight.handle())
            .collect();
        if fences.is_empty() {
            return Ok(());
        }

        match self.device.wait_for_fences(&fences, self.fence_timeout)? {
            FenceStatus::Signaled => Ok(()),
            FenceStatus::TimedOut => Err(RenderError::device_lost("waiting for frames in flight")),
        }
    }
}

impl<D: GpuDevice> Drop for FrameSynchronizer<D> {
    fn drop(&mut self) {
        let Err(e) = self.wait_for_in_flight() else {
            return;
        };
        log::error!("Frame slots not idle at teardown: {e}");
        if let Err(idle) = self.device.wait_idle() {
            // Semaphores, fences and command buffers may still be in use
            log::error!("Queue never drained ({idle}); leaking {} frame slots", self.slots.len());
            std::mem::forget(std::mem::take(&mut self.slots));
            std::mem::forget(self.command_pool.take());
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::{MockDevice, MockEvent, ResourceKind};
    use std::collections::HashMap;

    fn setup(config: &RendererConfig) -> (Arc<MockDevice>, RenderTargets<MockDevice>, FrameSynchronizer<MockDevice>) {
        let device = MockDevice::shared();
        let targets = RenderTargets::new(device.clone(), config, Extent2D::new(1600, 900))
            .expect("Should build targets");
        let sync = FrameSynchronizer::new(device.clone(), config).expect("Should create synchronizer");
        (device, targets, sync)
    }

    fn run_frame(sync: &mut FrameSynchronizer<MockDevice>, targets: &mut RenderTargets<MockDevice>) {
        sync.begin_frame(targets).expect("Should begin frame");
        sync.end_frame(targets).expect("Should end frame");
    }

    #[test]
    fn test_slot_never_rerecorded_while_fence_unsignaled() {
        let config = RendererConfig::default();
        let (device, mut targets, mut sync) = setup(&config);

        for frame in 0..10 {
            run_frame(&mut sync, &mut targets);
            if frame % 4 == 0 {
                device.complete_oldest();
            }
        }

        // Replay the log: a command buffer may only begin once the fence of
        // its previous submission has signaled
        let mut pending: HashMap<u64, u64> = HashMap::new();
        for event in device.events() {
            match event {
                MockEvent::Submitted { command_buffers, fence: Some(fence) } => {
                    for cmd in command_buffers {
                        pending.insert(cmd, fence);
                    }
                }
                MockEvent::FenceSignaled(fence) => pending.retain(|_, f| *f != fence),
                MockEvent::BeginCommandBuffer(cmd) => {
                    assert!(!pending.contains_key(&cmd), "command buffer {cmd:#x} re-recorded in flight");
                }
                _ => {}
            }
        }
        assert_eq!(sync.frames_submitted(), 10);
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn test_slots_rotate() {
        let config = RendererConfig::default();
        let (_device, mut targets, mut sync) = setup(&config);
        let mut slots = Vec::new();
        for _ in 0..4 {
            let frame = sync.begin_frame(&mut targets).expect("Should begin");
            slots.push(frame.slot);
            sync.end_frame(&mut targets).expect("Should end");
        }
        assert_eq!(slots, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_fence_reset_follows_successful_acquire() {
        let config = RendererConfig::default();
        let (device, mut targets, mut sync) = setup(&config);
        run_frame(&mut sync, &mut targets);
        run_frame(&mut sync, &mut targets);
        run_frame(&mut sync, &mut targets);

        device.force_out_of_date_acquires(1);
        let fence = sync.slot(0).expect("slot 0").fence();
        sync.begin_frame(&mut targets).expect("Should recover after one rebuild");
        assert_eq!(sync.rebuilds(), 1);

        let events = device.events();
        let reset = events
            .iter()
            .rposition(|e| *e == MockEvent::FenceReset(fence.raw()))
            .expect("fence reset");
        let acquired = events
            .iter()
            .rposition(|e| matches!(e, MockEvent::Acquired(_)))
            .expect("acquired");
        assert!(acquired < reset);
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn test_second_out_of_date_acquire_is_fatal() {
        let config = RendererConfig::default();
        let (device, mut targets, mut sync) = setup(&config);
        device.force_out_of_date_acquires(2);
        let err = sync.begin_frame(&mut targets).expect_err("Should escalate");
        assert_eq!(err, RenderError::SwapchainRebuildFailed { operation: "acquire" });
        assert!(err.is_fatal());
        assert!(!sync.is_recording());
    }

    #[test]
    fn test_hung_device_reports_device_lost() {
        let config = RendererConfig::default().with_fence_timeout_ms(20);
        let (device, mut targets, mut sync) = setup(&config);
        for _ in 0..3 {
            run_frame(&mut sync, &mut targets);
        }
        device.set_hung(true);
        let err = sync.begin_frame(&mut targets).expect_err("Should time out");
        assert!(matches!(err, RenderError::DeviceLost { .. }));
        device.set_hung(false);
    }

    #[test]
    fn test_suboptimal_present_marks_targets_stale() {
        let config = RendererConfig::default();
        let (device, mut targets, mut sync) = setup(&config);
        sync.begin_frame(&mut targets).expect("Should begin");
        device.resize_surface(Extent2D::new(800, 450));
        let outcome = sync.end_frame(&mut targets).expect("Should end");
        assert_eq!(outcome, PresentOutcome::OutOfDate);
        assert!(targets.is_stale());
    }

    #[test]
    fn test_end_without_begin_is_invalid() {
        let config = RendererConfig::default();
        let (_device, mut targets, mut sync) = setup(&config);
        assert!(matches!(sync.end_frame(&mut targets), Err(RenderError::InvalidOperation { .. })));
    }

    #[test]
    fn test_shutdown_drains_pending_submissions() {
        let config = RendererConfig::default();
        let (device, mut targets, mut sync) = setup(&config);
        for _ in 0..3 {
            run_frame(&mut sync, &mut targets);
        }
        device.complete_oldest();
        assert_eq!(device.pending_submissions(), 2);
        sync.shutdown().expect("Should shut down");
        assert_eq!(device.pending_submissions(), 0);
        assert!((0..3).all(|i| sync.slot(i).map(|s| s.state()) == Some(SlotState::Idle)));
    }

    #[test]
    fn test_drop_on_hung_queue_leaks_slots_in_use() {
        let config = RendererConfig::default().with_frames_in_flight(3).with_fence_timeout_ms(10);
        let (device, mut targets, mut sync) = setup(&config);
        for _ in 0..3 {
            run_frame(&mut sync, &mut targets);
        }
        device.set_hung(true);
        let err = sync.begin_frame(&mut targets).expect_err("Should time out on a hung queue");
        assert!(matches!(err, RenderError::DeviceLost { .. }));

        drop(sync);
        assert!(device.violations().is_empty(), "{:?}", device.violations());
        assert_eq!(device.live_count(ResourceKind::Fence), 3);
        assert_eq!(device.live_count(ResourceKind::CommandPool), 1);
    }

    #[test]
    fn test_drop_after_timeout_drains_when_queue_recovers() {
        let config = RendererConfig::default().with_frames_in_flight(2).with_fence_timeout_ms(10);
        let (device, mut targets, mut sync) = setup(&config);
        run_frame(&mut sync, &mut targets);
        run_frame(&mut sync, &mut targets);
        device.set_hung(true);
        assert!(sync.wait_for_in_flight().is_err());
        device.set_hung(false);

        drop(sync);
        assert_eq!(device.pending_submissions(), 0);
        assert_eq!(device.live_count(ResourceKind::Fence), 0);
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }
}
