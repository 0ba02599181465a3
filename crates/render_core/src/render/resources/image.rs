//! Images, views, samplers and sampled textures

use crate::render::api::{
    Extent2D, Format, GpuDevice, ImageAspect, ImageDesc, ImageHandle, ImageViewHandle,
    SamplerDesc, SamplerHandle,
};
use crate::render::error::RenderResult;
use std::sync::Arc;

/// Number of mip levels for a full chain: `floor(log2(max(w, h))) + 1`
pub fn mip_level_count(extent: Extent2D) -> u32 {
    let largest = extent.width.max(extent.height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Device image with RAII cleanup
pub struct GpuImage<D: GpuDevice> {
    device: Arc<D>,
    handle: ImageHandle,
    desc: ImageDesc,
}

impl<D: GpuDevice> GpuImage<D> {
    /// Allocate an image
    pub fn new(device: Arc<D>, desc: ImageDesc) -> RenderResult<Self> {
        let handle = device.create_image(&desc)?;
        Ok(Self { device, handle, desc })
    }

    /// Image handle
    pub fn handle(&self) -> ImageHandle {
        self.handle
    }

    /// Creation parameters
    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    /// Size of mip 0
    pub fn extent(&self) -> Extent2D {
        self.desc.extent
    }

    /// Create a view covering every mip level
    pub fn create_view(&self) -> RenderResult<ImageView<D>> {
        let aspect = if self.desc.format.is_depth() { ImageAspect::Depth } else { ImageAspect::Color };
        ImageView::new(self.device.clone(), self.handle, self.desc.format, aspect, self.desc.mip_levels)
    }
}

impl<D: GpuDevice> Drop for GpuImage<D> {
    fn drop(&mut self) {
        self.device.destroy_image(self.handle);
    }
}

/// Image view with RAII cleanup
///
/// Views over swapchain images are owned here too; the images themselves
/// belong to the swapchain.
pub struct ImageView<D: GpuDevice> {
    device: Arc<D>,
    handle: ImageViewHandle,
}

impl<D: GpuDevice> ImageView<D> {
    /// Create a view onto `image`
    pub fn new(
        device: Arc<D>,
        image: ImageHandle,
        format: Format,
        aspect: ImageAspect,
        mip_levels: u32,
    ) -> RenderResult<Self> {
        let handle = device.create_image_view(image, format, aspect, mip_levels)?;
        Ok(Self { device, handle })
    }

    /// View handle
    pub fn handle(&self) -> ImageViewHandle {
        self.handle
    }
}

impl<D: GpuDevice> Drop for ImageView<D> {
    fn drop(&mut self) {
        self.device.destroy_image_view(self.handle);
    }
}

/// Sampler with RAII cleanup
pub struct Sampler<D: GpuDevice> {
    device: Arc<D>,
    handle: SamplerHandle,
}

impl<D: GpuDevice> Sampler<D> {
    /// Create a linear sampler
    pub fn new(device: Arc<D>, desc: SamplerDesc) -> RenderResult<Self> {
        let handle = device.create_sampler(&desc)?;
        Ok(Self { device, handle })
    }

    /// Sampler handle
    pub fn handle(&self) -> SamplerHandle {
        self.handle
    }
}

impl<D: GpuDevice> Drop for Sampler<D> {
    fn drop(&mut self) {
        self.device.destroy_sampler(self.handle);
    }
}

/// Sampled texture: image, full-chain view and sampler
///
/// Fields drop in declaration order, so the sampler and view go before the
/// image they reference.
pub struct GpuTexture<D: GpuDevice> {
    sampler: Sampler<D>,
    view: ImageView<D>,
    image: GpuImage<D>,
}

impl<D: GpuDevice> GpuTexture<D> {
    /// Assemble a texture from already-created parts
    pub fn from_parts(image: GpuImage<D>, view: ImageView<D>, sampler: Sampler<D>) -> Self {
        Self { sampler, view, image }
    }

    /// Underlying image
    pub fn image(&self) -> &GpuImage<D> {
        &self.image
    }

    /// View handle for descriptor writes
    pub fn view(&self) -> ImageViewHandle {
        self.view.handle()
    }

    /// Sampler handle for descriptor writes
    pub fn sampler(&self) -> SamplerHandle {
        self.sampler.handle()
    }

    /// Size of mip 0
    pub fn extent(&self) -> Extent2D {
        self.image.extent()
    }

    /// Number of mip levels
    pub fn mip_levels(&self) -> u32 {
        self.image.desc().mip_levels
    }
}

impl<D: GpuDevice> std::fmt::Debug for GpuTexture<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuTexture")
            .field("image", &self.image.handle())
            .field("view", &self.view.handle())
            .field("sampler", &self.sampler.handle())
            .field("extent", &self.extent())
            .field("mip_levels", &self.mip_levels())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::{MockDevice, MockEvent, ResourceKind};
    use crate::render::api::ImageUsage;

    #[test]
    fn test_mip_level_count() {
        assert_eq!(mip_level_count(Extent2D::new(1, 1)), 1);
        assert_eq!(mip_level_count(Extent2D::new(2, 1)), 2);
        assert_eq!(mip_level_count(Extent2D::new(256, 256)), 9);
        assert_eq!(mip_level_count(Extent2D::new(1024, 300)), 11);
        assert_eq!(mip_level_count(Extent2D::new(1023, 1)), 10);
        assert_eq!(mip_level_count(Extent2D::new(0, 0)), 1);
    }

    #[test]
    fn test_texture_teardown_order() {
        let device = MockDevice::shared();
        let image = GpuImage::new(
            device.clone(),
            ImageDesc {
                extent: Extent2D::new(4, 4),
                format: Format::R8G8B8A8Srgb,
                usage: ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
                mip_levels: 3,
            },
        )
        .expect("Should create image");
        let view = image.create_view().expect("Should create view");
        let sampler = Sampler::new(device.clone(), SamplerDesc { mip_levels: 3, max_anisotropy: None })
            .expect("Should create sampler");
        drop(GpuTexture::from_parts(image, view, sampler));

        let kinds: Vec<ResourceKind> = device
            .events()
            .iter()
            .filter_map(|event| match event {
                MockEvent::Destroyed(kind, _) => Some(*kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![ResourceKind::Sampler, ResourceKind::ImageView, ResourceKind::Image]);
        assert!(device.violations().is_empty());
    }

    #[test]
    fn test_texture_debug_names_its_handles() {
        let device = MockDevice::shared();
        let image = GpuImage::new(
            device.clone(),
            ImageDesc {
                extent: Extent2D::new(8, 2),
                format: Format::R8G8B8A8Unorm,
                usage: ImageUsage::SAMPLED,
                mip_levels: 4,
            },
        )
        .expect("Should create image");
        let view = image.create_view().expect("Should create view");
        let sampler = Sampler::new(device, SamplerDesc { mip_levels: 4, max_anisotropy: None })
            .expect("Should create sampler");
        let texture = GpuTexture::from_parts(image, view, sampler);

        let printed = format!("{texture:?}");
        assert!(printed.starts_with("GpuTexture"));
        assert!(printed.contains("mip_levels: 4"));
    }
}
