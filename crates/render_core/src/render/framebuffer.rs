//! Framebuffer and G-buffer attachment management
//!
//! One framebuffer per swapchain image. Every framebuffer shares a single
//! depth attachment and one set of G-buffer color attachments; only the
//! presentation view differs. Attachments are destroyed and recreated as a
//! unit whenever the swapchain is rebuilt.

use crate::render::api::{
    AttachmentDesc, Extent2D, Format, FramebufferHandle, GpuDevice, ImageDesc, ImageLayout, ImageUsage,
    ImageViewHandle, RenderPassDesc, RenderPassHandle, SamplerDesc, SamplerHandle,
};
use crate::render::error::{RenderError, RenderResult};
use crate::render::resources::{GpuImage, ImageView, Sampler};
use std::sync::Arc;

/// G-buffer channel names and formats, in attachment order after the presentation target
pub const GBUFFER_CHANNELS: [(&str, Format); 4] = [
    ("position", Format::R16G16B16A16Sfloat),
    ("normal", Format::R16G16B16A16Sfloat),
    ("albedo", Format::R8G8B8A8Unorm),
    ("material", Format::R8G8B8A8Unorm),
];

/// Format of the shared depth attachment
pub const DEPTH_FORMAT: Format = Format::D32Sfloat;

/// Read-only view of an attachment for the editor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampledImageHandle {
    /// Image view
    pub view: ImageViewHandle,
    /// Sampler to read it with
    pub sampler: SamplerHandle,
    /// Layout the image is in when sampled
    pub layout: ImageLayout,
}

/// Image plus view owned by the manager
struct Attachment<D: GpuDevice> {
    // View drops before its image
    view: ImageView<D>,
    _image: GpuImage<D>,
}

impl<D: GpuDevice> Attachment<D> {
    fn new(device: &Arc<D>, extent: Extent2D, format: Format, usage: ImageUsage) -> RenderResult<Self> {
        let image = GpuImage::new(device.clone(), ImageDesc { extent, format, usage, mip_levels: 1 })?;
        let view = image.create_view()?;
        Ok(Self { view, _image: image })
    }
}

/// Owns the render pass, the depth and G-buffer attachments and one framebuffer per image
pub struct FramebufferManager<D: GpuDevice> {
    device: Arc<D>,
    render_pass: RenderPassHandle,
    color_format: Option<Format>,
    framebuffers: Vec<FramebufferHandle>,
    depth: Option<Attachment<D>>,
    gbuffer: Vec<Attachment<D>>,
    sampler: Sampler<D>,
    extent: Extent2D,
}

impl<D: GpuDevice> FramebufferManager<D> {
    /// Create an empty manager; call [`build`](Self::build) before use
    pub fn new(device: Arc<D>) -> RenderResult<Self> {
        let sampler = Sampler::new(device.clone(), SamplerDesc { mip_levels: 1, max_anisotropy: None })?;
        Ok(Self {
            device,
            render_pass: RenderPassHandle::NULL,
            color_format: None,
            framebuffers: Vec::new(),
            depth: None,
            gbuffer: Vec::new(),
            sampler,
            extent: Extent2D::default(),
        })
    }

    /// Render pass layout: presentation target, G-buffer channels, then depth
    pub fn render_pass_desc(color_format: Format) -> RenderPassDesc {
        let mut color = vec![AttachmentDesc { format: color_format, final_layout: ImageLayout::PresentSrc }];
        color.extend(GBUFFER_CHANNELS.iter().map(|&(_, format)| AttachmentDesc {
            format,
            final_layout: ImageLayout::ShaderReadOnly,
        }));
        RenderPassDesc {
            color,
            depth: AttachmentDesc { format: DEPTH_FORMAT, final_layout: ImageLayout::DepthAttachment },
        }
    }

    fn ensure_render_pass(&mut self, color_format: Format) -> RenderResult<()> {
        if self.color_format == Some(color_format) && !self.render_pass.is_null() {
            return Ok(());
        }
        if !self.render_pass.is_null() {
            log::debug!("Presentation format changed to {color_format:?}; recreating render pass");
            self.device.destroy_render_pass(self.render_pass);
            self.render_pass = RenderPassHandle::NULL;
        }
        self.render_pass = self.device.create_render_pass(&Self::render_pass_desc(color_format))?;
        self.color_format = Some(color_format);
        Ok(())
    }

    /// Create the attachments and one framebuffer per presentation view
    pub fn build(&mut self, image_views: &[ImageViewHandle], color_format: Format, extent: Extent2D) -> RenderResult<()> {
        if !self.framebuffers.is_empty() {
            return Err(RenderError::invalid("Framebuffers must be released before rebuilding"));
        }
        self.ensure_render_pass(color_format)?;

        let depth = Attachment::new(&self.device, extent, DEPTH_FORMAT, ImageUsage::DEPTH_ATTACHMENT)?;
        let gbuffer_usage = ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED | ImageUsage::INPUT_ATTACHMENT;
        let gbuffer = GBUFFER_CHANNELS
            .iter()
            .map(|&(_, format)| Attachment::new(&self.device, extent, format, gbuffer_usage))
            .collect::<RenderResult<Vec<_>>>()?;

        self.depth = Some(depth);
        self.gbuffer = gbuffer;
        self.extent = extent;

        for &present_view in image_views {
            let mut attachments = Vec::with_capacity(GBUFFER_CHANNELS.len() + 2);
            attachments.push(present_view);
            attachments.extend(self.gbuffer.iter().map(|a| a.view.handle()));
            attachments.extend(self.depth.iter().map(|a| a.view.handle()));

            match self.device.create_framebuffer(self.render_pass, &attachments, extent) {
                Ok(framebuffer) => self.framebuffers.push(framebuffer),
                Err(e) => {
                    self.release();
                    return Err(e);
                }
            }
        }

        log::debug!("Built {} framebuffers at {}", self.framebuffers.len(), extent);
        Ok(())
    }

    /// Destroy framebuffers, then the attachments they referenced
    pub fn release(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            self.device.destroy_framebuffer(framebuffer);
        }
        self.gbuffer.clear();
        self.depth = None;
    }

    /// Framebuffer for a swapchain image
    pub fn framebuffer(&self, image_index: u32) -> RenderResult<FramebufferHandle> {
        self.framebuffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| RenderError::invalid(format!("No framebuffer for image {image_index}")))
    }

    /// All framebuffers in image order
    pub fn framebuffers(&self) -> &[FramebufferHandle] {
        &self.framebuffers
    }

    /// Render pass every framebuffer is compatible with
    pub fn render_pass(&self) -> RenderPassHandle {
        self.render_pass
    }

    /// Size of every attachment
    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    /// Shared depth view followed by the G-buffer views
    pub fn attachment_views(&self) -> Vec<ImageViewHandle> {
        self.depth
            .iter()
            .chain(self.gbuffer.iter())
            .map(|a| a.view.handle())
            .collect()
    }

    /// Sampled-image handle for G-buffer channel `attachment_index`
    pub fn imgui_handle(&self, attachment_index: usize) -> RenderResult<SampledImageHandle> {
        let attachment = self.gbuffer.get(attachment_index).ok_or_else(|| {
            RenderError::invalid(format!(
                "G-buffer attachment {attachment_index} out of range (0..{})",
                GBUFFER_CHANNELS.len()
            ))
        })?;
        Ok(SampledImageHandle {
            view: attachment.view.handle(),
            sampler: self.sampler.handle(),
            layout: ImageLayout::ShaderReadOnly,
        })
    }
}

impl<D: GpuDevice> Drop for FramebufferManager<D> {
    fn drop(&mut self) {
        self.release();
        if !self.render_pass.is_null() {
            self.device.destroy_render_pass(self.render_pass);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::{MockDevice, ResourceKind};

    fn present_views(device: &Arc<MockDevice>, count: usize, extent: Extent2D) -> Vec<GpuImage<MockDevice>> {
        (0..count)
            .map(|_| {
                GpuImage::new(
                    device.clone(),
                    ImageDesc {
                        extent,
                        format: Format::B8G8R8A8Srgb,
                        usage: ImageUsage::COLOR_ATTACHMENT,
                        mip_levels: 1,
                    },
                )
                .expect("Should create image")
            })
            .collect()
    }

    #[test]
    fn test_render_pass_layout() {
        let desc = FramebufferManager::<MockDevice>::render_pass_desc(Format::B8G8R8A8Srgb);
        assert_eq!(desc.color.len(), 5);
        assert_eq!(desc.color[0].final_layout, ImageLayout::PresentSrc);
        assert!(desc.color[1..].iter().all(|a| a.final_layout == ImageLayout::ShaderReadOnly));
        assert_eq!(desc.depth.format, DEPTH_FORMAT);
    }

    #[test]
    fn test_build_one_framebuffer_per_image_with_shared_attachments() {
        let device = MockDevice::shared();
        let extent = Extent2D::new(320, 240);
        let images = present_views(&device, 3, extent);
        let views: Vec<_> = images.iter().map(|i| i.create_view().expect("view")).collect();
        let handles: Vec<_> = views.iter().map(ImageView::handle).collect();

        let mut manager = FramebufferManager::new(device.clone()).expect("Should create manager");
        manager.build(&handles, Format::B8G8R8A8Srgb, extent).expect("Should build");

        assert_eq!(manager.framebuffers().len(), 3);
        assert_eq!(manager.attachment_views().len(), 5);
        for &framebuffer in manager.framebuffers() {
            assert_eq!(device.framebuffer_extent(framebuffer), Some(extent));
            assert_eq!(device.framebuffer_attachments(framebuffer).map(|a| a.len()), Some(6));
        }
        assert_eq!(device.live_count(ResourceKind::Image), 3 + 5);

        manager.release();
        assert_eq!(device.live_count(ResourceKind::Framebuffer), 0);
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn test_imgui_handle_is_read_only_sampled_image() {
        let device = MockDevice::shared();
        let extent = Extent2D::new(64, 64);
        let images = present_views(&device, 1, extent);
        let view = images[0].create_view().expect("view");
        let mut manager = FramebufferManager::new(device).expect("Should create manager");
        manager.build(&[view.handle()], Format::B8G8R8A8Srgb, extent).expect("Should build");

        let handle = manager.imgui_handle(2).expect("albedo handle");
        assert!(!handle.view.is_null());
        assert!(!handle.sampler.is_null());
        assert_eq!(handle.layout, ImageLayout::ShaderReadOnly);
        assert!(manager.imgui_handle(4).is_err());
        drop(manager);
    }

    #[test]
    fn test_build_requires_release() {
        let device = MockDevice::shared();
        let extent = Extent2D::new(64, 64);
        let images = present_views(&device, 1, extent);
        let view = images[0].create_view().expect("view");
        let mut manager = FramebufferManager::new(device).expect("Should create manager");
        manager.build(&[view.handle()], Format::B8G8R8A8Srgb, extent).expect("Should build");
        assert!(manager.build(&[view.handle()], Format::B8G8R8A8Srgb, extent).is_err());
    }
}
