//! Swapchain management
//!
//! Handles swapchain creation and recreation against the current surface
//! capabilities, following RAII principles for the per-image views.

use crate::core::RendererConfig;
use crate::render::api::{
    ColorSpace, Extent2D, GpuDevice, ImageAspect, ImageHandle, ImageViewHandle, PresentMode,
    SurfaceCapabilities, SurfaceFormat, SwapchainDesc, SwapchainHandle,
};
use crate::render::error::{RenderError, RenderResult};
use crate::render::resources::ImageView;
use crate::render::sync::InFlightWait;
use std::sync::Arc;

/// Check the requested image count against `[min, max]`, max 0 meaning unbounded
pub fn check_image_count(requested: u32, caps: &SurfaceCapabilities) -> RenderResult<u32> {
    let above_max = caps.max_image_count != 0 && requested > caps.max_image_count;
    if requested < caps.min_image_count || above_max {
        return Err(RenderError::ImageCountOutOfRange {
            requested,
            min: caps.min_image_count,
            max: caps.max_image_count,
        });
    }
    Ok(requested)
}

/// Prefer 8-bit sRGB with the sRGB non-linear color space, else the first format
pub fn choose_surface_format(formats: &[SurfaceFormat]) -> RenderResult<SurfaceFormat> {
    formats
        .iter()
        .find(|sf| sf.format.is_srgb8() && sf.color_space == ColorSpace::SrgbNonlinear)
        .or_else(|| formats.first())
        .copied()
        .ok_or_else(|| RenderError::SurfaceUnsupported("surface reports no formats".to_string()))
}

/// Mailbox when offered and wanted, otherwise FIFO (always available)
pub fn choose_present_mode(modes: &[PresentMode], prefer_low_latency: bool) -> PresentMode {
    if prefer_low_latency && modes.contains(&PresentMode::Mailbox) {
        PresentMode::Mailbox
    } else {
        PresentMode::Fifo
    }
}

/// Surface-imposed extent if any, else the live framebuffer size clamped to the limits
pub fn choose_extent(caps: &SurfaceCapabilities, live: Extent2D) -> Extent2D {
    match caps.current_extent {
        Some(extent) => extent,
        None => live.clamp(caps.min_extent, caps.max_extent),
    }
}

/// Presentable image chain plus one view per image
pub struct Swapchain<D: GpuDevice> {
    device: Arc<D>,
    handle: SwapchainHandle,
    images: Vec<ImageHandle>,
    image_views: Vec<ImageView<D>>,
    format: SurfaceFormat,
    present_mode: PresentMode,
    extent: Extent2D,
}

impl<D: GpuDevice> Swapchain<D> {
    /// Negotiate format, present mode and extent, then create the chain
    pub fn build(
        device: Arc<D>,
        desired_image_count: u32,
        prefer_low_latency: bool,
        live_extent: Extent2D,
    ) -> RenderResult<Self> {
        let caps = device.surface_capabilities()?;
        let image_count = check_image_count(desired_image_count, &caps)?;
        let format = choose_surface_format(&device.surface_formats()?)?;
        let present_mode = choose_present_mode(&device.surface_present_modes()?, prefer_low_latency);
        let extent = choose_extent(&caps, live_extent);

        if extent.is_empty() {
            return Err(RenderError::invalid("Cannot build a swapchain for a zero-area surface"));
        }

        let handle = device.create_swapchain(&SwapchainDesc { image_count, format, present_mode, extent })?;
        let images = match device.swapchain_images(handle) {
            Ok(images) => images,
            Err(e) => {
                device.destroy_swapchain(handle);
                return Err(e);
            }
        };

        let mut swapchain = Self {
            device: device.clone(),
            handle,
            images,
            image_views: Vec::new(),
            format,
            present_mode,
            extent,
        };
        // Views are pushed one by one so a failure drops the ones already made
        let images = swapchain.images.clone();
        for image in images {
            let view = ImageView::new(device.clone(), image, format.format, ImageAspect::Color, 1)?;
            swapchain.image_views.push(view);
        }

        log::info!(
            "Swapchain created: {} images, {:?} {:?}, {:?}, {}",
            swapchain.images.len(),
            format.format,
            format.color_space,
            present_mode,
            extent
        );
        Ok(swapchain)
    }

    /// Get swapchain handle
    pub fn handle(&self) -> SwapchainHandle {
        self.handle
    }

    /// Number of presentable images
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Get image views in image index order
    pub fn image_views(&self) -> Vec<ImageViewHandle> {
        self.image_views.iter().map(ImageView::handle).collect()
    }

    /// Negotiated surface format
    pub fn format(&self) -> SurfaceFormat {
        self.format
    }

    /// Negotiated present mode
    pub fn present_mode(&self) -> PresentMode {
        self.present_mode
    }

    /// Negotiated extent
    pub fn extent(&self) -> Extent2D {
        self.extent
    }
}

impl<D: GpuDevice> Drop for Swapchain<D> {
    fn drop(&mut self) {
        self.image_views.clear();
        self.device.destroy_swapchain(self.handle);
    }
}

/// Owns the current swapchain and rebuilds it on demand
pub struct SwapchainManager<D: GpuDevice> {
    device: Arc<D>,
    desired_image_count: u32,
    prefer_low_latency: bool,
    swapchain: Option<Swapchain<D>>,
}

impl<D: GpuDevice> SwapchainManager<D> {
    /// Build the initial swapchain
    pub fn new(device: Arc<D>, config: &RendererConfig, live_extent: Extent2D) -> RenderResult<Self> {
        let swapchain = Swapchain::build(
            device.clone(),
            config.swapchain_image_count,
            config.prefer_low_latency,
            live_extent,
        )?;
        Ok(Self {
            device,
            desired_image_count: config.swapchain_image_count,
            prefer_low_latency: config.prefer_low_latency,
            swapchain: Some(swapchain),
        })
    }

    /// Wait for every in-flight frame, destroy the old chain and build a new one
    pub fn rebuild(&mut self, in_flight: &dyn InFlightWait, live_extent: Extent2D) -> RenderResult<()> {
        in_flight.wait_for_in_flight()?;
        self.swapchain = None;
        self.swapchain = Some(Swapchain::build(
            self.device.clone(),
            self.desired_image_count,
            self.prefer_low_latency,
            live_extent,
        )?);
        Ok(())
    }

    /// Current swapchain
    pub fn current(&self) -> RenderResult<&Swapchain<D>> {
        self.swapchain
            .as_ref()
            .ok_or(RenderError::SwapchainRebuildFailed { operation: "rebuild" })
    }

    /// Handle of the current swapchain, null while none exists
    pub fn handle(&self) -> SwapchainHandle {
        self.swapchain.as_ref().map_or(SwapchainHandle::NULL, Swapchain::handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::Format;
    use crate::backends::mock::{MockDevice, MockEvent, ResourceKind};

    struct NoFrames;
    impl InFlightWait for NoFrames {
        fn wait_for_in_flight(&self) -> RenderResult<()> {
            Ok(())
        }
    }

    fn caps(min: u32, max: u32) -> SurfaceCapabilities {
        SurfaceCapabilities {
            min_image_count: min,
            max_image_count: max,
            current_extent: None,
            min_extent: Extent2D::new(1, 1),
            max_extent: Extent2D::new(4096, 4096),
        }
    }

    #[test]
    fn test_image_count_range() {
        assert_eq!(check_image_count(3, &caps(2, 3)).expect("in range"), 3);
        assert_eq!(check_image_count(16, &caps(2, 0)).expect("unbounded"), 16);
        assert_eq!(
            check_image_count(1, &caps(2, 8)),
            Err(RenderError::ImageCountOutOfRange { requested: 1, min: 2, max: 8 })
        );
        assert!(check_image_count(9, &caps(2, 8)).is_err());
    }

    #[test]
    fn test_format_prefers_srgb() {
        let unorm = SurfaceFormat { format: Format::B8G8R8A8Unorm, color_space: ColorSpace::SrgbNonlinear };
        let srgb = SurfaceFormat { format: Format::R8G8B8A8Srgb, color_space: ColorSpace::SrgbNonlinear };
        let odd = SurfaceFormat { format: Format::B8G8R8A8Srgb, color_space: ColorSpace::Other(1000104001) };
        assert_eq!(choose_surface_format(&[unorm, odd, srgb]).expect("format"), srgb);
        assert_eq!(choose_surface_format(&[unorm, odd]).expect("format"), unorm);
        assert!(matches!(choose_surface_format(&[]), Err(RenderError::SurfaceUnsupported(_))));
    }

    #[test]
    fn test_present_mode_selection() {
        let modes = [PresentMode::Immediate, PresentMode::Fifo, PresentMode::Mailbox];
        assert_eq!(choose_present_mode(&modes, true), PresentMode::Mailbox);
        assert_eq!(choose_present_mode(&modes, false), PresentMode::Fifo);
        assert_eq!(choose_present_mode(&[PresentMode::Fifo], true), PresentMode::Fifo);
    }

    #[test]
    fn test_extent_uses_surface_or_clamped_live_size() {
        let mut limits = caps(2, 8);
        limits.max_extent = Extent2D::new(1920, 1080);
        assert_eq!(choose_extent(&limits, Extent2D::new(2560, 1440)), Extent2D::new(1920, 1080));
        limits.current_extent = Some(Extent2D::new(800, 600));
        assert_eq!(choose_extent(&limits, Extent2D::new(2560, 1440)), Extent2D::new(800, 600));
    }

    #[test]
    fn test_rebuild_twice_is_stable() {
        let device = MockDevice::shared();
        let config = RendererConfig::default();
        let mut manager = SwapchainManager::new(device.clone(), &config, Extent2D::new(1280, 720))
            .expect("Should build swapchain");
        let first = manager.current().expect("swapchain");
        let (count, extent) = (first.image_count(), first.extent());

        for _ in 0..2 {
            manager.rebuild(&NoFrames, Extent2D::new(1280, 720)).expect("Should rebuild");
            let rebuilt = manager.current().expect("swapchain");
            assert_eq!(rebuilt.image_count(), count);
            assert_eq!(rebuilt.extent(), extent);
        }
        assert_eq!(device.live_count(ResourceKind::Swapchain), 1);
        assert_eq!(device.live_count(ResourceKind::ImageView), count as usize);
        assert!(device.violations().is_empty());
    }

    #[test]
    fn test_views_destroyed_before_swapchain() {
        let device = MockDevice::shared();
        let manager = SwapchainManager::new(device.clone(), &RendererConfig::default(), Extent2D::new(640, 480))
            .expect("Should build swapchain");
        let handle = manager.handle();
        drop(manager);

        let events = device.events();
        let swapchain_gone = events
            .iter()
            .position(|e| *e == MockEvent::Destroyed(ResourceKind::Swapchain, handle.raw()))
            .expect("swapchain destroyed");
        let last_view = events
            .iter()
            .rposition(|e| matches!(e, MockEvent::Destroyed(ResourceKind::ImageView, _)))
            .expect("views destroyed");
        assert!(last_view < swapchain_gone);
    }
}
