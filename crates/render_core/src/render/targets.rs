//! Presentation targets: the swapchain and the framebuffers built on it
//!
//! Both are rebuilt together. Framebuffers are released before the swapchain
//! views they reference, and nothing is destroyed until every in-flight frame
//! has finished.

use crate::core::RendererConfig;
use crate::render::api::{Extent2D, FramebufferHandle, GpuDevice, ImageViewHandle, RenderPassHandle, SwapchainHandle};
use crate::render::error::RenderResult;
use crate::render::framebuffer::{FramebufferManager, SampledImageHandle};
use crate::render::swapchain::{Swapchain, SwapchainManager};
use crate::render::sync::InFlightWait;
use std::sync::Arc;

/// Swapchain plus framebuffers, with staleness tracking
pub struct RenderTargets<D: GpuDevice> {
    // Framebuffers reference swapchain views and drop first
    framebuffers: FramebufferManager<D>,
    swapchain: SwapchainManager<D>,
    live_extent: Extent2D,
    stale: bool,
}

impl<D: GpuDevice> RenderTargets<D> {
    /// Build the swapchain and its framebuffers for a window of `live_extent`
    pub fn new(device: Arc<D>, config: &RendererConfig, live_extent: Extent2D) -> RenderResult<Self> {
        let swapchain = SwapchainManager::new(device.clone(), config, live_extent)?;
        let mut framebuffers = FramebufferManager::new(device)?;
        {
            let current = swapchain.current()?;
            framebuffers.build(&current.image_views(), current.format().format, current.extent())?;
        }
        Ok(Self { framebuffers, swapchain, live_extent, stale: false })
    }

    /// Wait on all in-flight frames, then destroy and recreate everything
    pub fn rebuild(&mut self, in_flight: &dyn InFlightWait) -> RenderResult<()> {
        log::info!("Rebuilding swapchain and framebuffers for {}", self.live_extent);
        in_flight.wait_for_in_flight()?;
        self.framebuffers.release();
        self.swapchain.rebuild(in_flight, self.live_extent)?;

        let current = self.swapchain.current()?;
        self.framebuffers
            .build(&current.image_views(), current.format().format, current.extent())?;
        self.stale = false;
        Ok(())
    }

    /// Record a new window size; the next frame rebuilds
    pub fn resize(&mut self, live_extent: Extent2D) {
        if live_extent != self.live_extent {
            log::debug!("Surface resized {} -> {}", self.live_extent, live_extent);
            self.live_extent = live_extent;
            self.stale = true;
        }
    }

    /// Force a rebuild before the next acquire
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Whether a rebuild is pending
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Last size reported by the window
    pub fn live_extent(&self) -> Extent2D {
        self.live_extent
    }

    /// Extent of the current framebuffers
    pub fn extent(&self) -> Extent2D {
        self.framebuffers.extent()
    }

    /// Current swapchain handle
    pub fn swapchain_handle(&self) -> SwapchainHandle {
        self.swapchain.handle()
    }

    /// Current swapchain
    pub fn swapchain(&self) -> RenderResult<&Swapchain<D>> {
        self.swapchain.current()
    }

    /// Framebuffer for an acquired image
    pub fn framebuffer(&self, image_index: u32) -> RenderResult<FramebufferHandle> {
        self.framebuffers.framebuffer(image_index)
    }

    /// All framebuffers in image order
    pub fn framebuffers(&self) -> &[FramebufferHandle] {
        self.framebuffers.framebuffers()
    }

    /// Depth and G-buffer views
    pub fn attachment_views(&self) -> Vec<ImageViewHandle> {
        self.framebuffers.attachment_views()
    }

    /// G-buffer render pass
    pub fn render_pass(&self) -> RenderPassHandle {
        self.framebuffers.render_pass()
    }

    /// Read-only handle to a G-buffer channel
    pub fn imgui_handle(&self, attachment_index: usize) -> RenderResult<SampledImageHandle> {
        self.framebuffers.imgui_handle(attachment_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::{MockDevice, ResourceKind};
    use crate::render::error::RenderError;
    use std::cell::Cell;

    struct CountingWait(Cell<u32>);
    impl InFlightWait for CountingWait {
        fn wait_for_in_flight(&self) -> RenderResult<()> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn test_rebuild_after_resize_matches_surface() {
        let device = MockDevice::shared();
        let mut targets = RenderTargets::new(device.clone(), &RendererConfig::default(), Extent2D::new(1600, 900))
            .expect("Should build targets");
        assert_eq!(targets.extent(), Extent2D::new(1600, 900));

        device.resize_surface(Extent2D::new(800, 450));
        targets.resize(Extent2D::new(800, 450));
        assert!(targets.is_stale());

        let wait = CountingWait(Cell::new(0));
        targets.rebuild(&wait).expect("Should rebuild");
        assert!(wait.0.get() >= 1);
        assert!(!targets.is_stale());
        for &framebuffer in targets.framebuffers() {
            assert_eq!(device.framebuffer_extent(framebuffer), Some(Extent2D::new(800, 450)));
        }
        assert!(targets.attachment_views().iter().all(|v| !v.is_null()));
        assert_eq!(device.live_count(ResourceKind::Swapchain), 1);
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn test_resize_to_same_size_is_not_stale() {
        let device = MockDevice::shared();
        let mut targets = RenderTargets::new(device, &RendererConfig::default(), Extent2D::new(1600, 900))
            .expect("Should build targets");
        targets.resize(Extent2D::new(1600, 900));
        assert!(!targets.is_stale());
    }

    #[test]
    fn test_failed_wait_leaves_targets_untouched() {
        struct Lost;
        impl InFlightWait for Lost {
            fn wait_for_in_flight(&self) -> RenderResult<()> {
                Err(RenderError::device_lost("test"))
            }
        }
        let device = MockDevice::shared();
        let mut targets = RenderTargets::new(device.clone(), &RendererConfig::default(), Extent2D::new(1600, 900))
            .expect("Should build targets");
        let before = targets.framebuffers().to_vec();
        assert!(matches!(targets.rebuild(&Lost), Err(RenderError::DeviceLost { .. })));
        assert_eq!(targets.framebuffers(), before.as_slice());
    }
}
