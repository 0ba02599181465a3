//! Staged uploads into device-local memory
//!
//! Every upload allocates its own staging buffer and one-shot command pool,
//! submits with a dedicated fence and blocks until it signals. The scoped
//! wrappers release staging memory on every exit path. Uploads are used at
//! load time only and are never retried.

use crate::render::api::{
    Access, BufferBarrier, BufferUsage, Extent2D, Format, GpuDevice, ImageBarrier, ImageDesc, ImageLayout,
    ImageUsage, MemoryLocation, MipBlit, SamplerDesc, SubmitInfo,
};
use crate::render::commands::{CommandPool, CommandRecorder};
use crate::render::error::{RenderError, RenderResult};
use crate::render::resources::{mip_level_count, GpuBuffer, GpuImage, GpuTexture, Sampler};
use crate::render::sync::Fence;
use std::sync::Arc;
use std::time::Duration;

/// Decoded RGBA8 pixels handed over by the asset loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Tightly packed RGBA8 rows
    pub pixels: Vec<u8>,
    /// Whether the pixels are sRGB encoded (color) or linear (normals, masks)
    pub srgb: bool,
}

impl TextureData {
    /// sRGB color texture
    pub fn rgba8_srgb(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self { width, height, pixels, srgb: true }
    }

    /// Linear data texture
    pub fn rgba8_linear(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self { width, height, pixels, srgb: false }
    }

    /// 1x1 texture of a single color
    pub fn solid(rgba: [u8; 4], srgb: bool) -> Self {
        Self { width: 1, height: 1, pixels: rgba.to_vec(), srgb }
    }

    /// Size of mip 0
    pub fn extent(&self) -> Extent2D {
        Extent2D::new(self.width, self.height)
    }

    /// Device format matching the pixel encoding
    pub fn format(&self) -> Format {
        if self.srgb {
            Format::R8G8B8A8Srgb
        } else {
            Format::R8G8B8A8Unorm
        }
    }

    /// Check dimensions against the pixel buffer
    pub fn validate(&self) -> RenderResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::TransferFailed(format!(
                "texture has zero extent {}x{}",
                self.width, self.height
            )));
        }
        let expected = self.width as u64 * self.height as u64 * 4;
        if self.pixels.len() as u64 != expected {
            return Err(RenderError::TransferFailed(format!(
                "expected {expected} bytes for {}x{} RGBA8, got {}",
                self.width,
                self.height,
                self.pixels.len()
            )));
        }
        Ok(())
    }
}

/// Uploads host data through staging buffers
pub struct TransferEngine<D: GpuDevice> {
    device: Arc<D>,
    max_upload_bytes: u64,
    fence_timeout: Option<Duration>,
}

impl<D: GpuDevice> TransferEngine<D> {
    /// Create an engine that rejects uploads above `max_upload_bytes`
    pub fn new(device: Arc<D>, max_upload_bytes: u64, fence_timeout: Option<Duration>) -> Self {
        Self { device, max_upload_bytes, fence_timeout }
    }

    fn check_size(&self, len: u64) -> RenderResult<()> {
        if len == 0 {
            return Err(RenderError::TransferFailed("upload of zero bytes".to_string()));
        }
        if len > self.max_upload_bytes {
            return Err(RenderError::TransferFailed(format!(
                "upload of {len} bytes exceeds the {} byte limit",
                self.max_upload_bytes
            )));
        }
        Ok(())
    }

    /// Record, submit and block on a one-shot command buffer
    ///
    /// `in_use` holds what the submission touches and is handed back once the
    /// fence signals. If the wait fails and the queue cannot be drained, the
    /// pool, fence and `in_use` are leaked rather than destroyed under a live
    /// submission.
    fn one_shot<K, F>(&self, what: &str, in_use: K, record: F) -> RenderResult<K>
    where
        F: FnOnce(&mut CommandRecorder<'_, D>, &K) -> RenderResult<()>,
    {
        let pool = CommandPool::transient(self.device.clone())?;
        let mut recorder = pool.begin_single_time()?;
        record(&mut recorder, &in_use)?;
        let command_buffer = recorder.end()?;

        let fence = Fence::new(self.device.clone(), false)?;
        let submit = SubmitInfo { command_buffers: vec![command_buffer], ..SubmitInfo::default() };
        self.device.queue_submit(&submit, Some(fence.handle()))?;

        match fence.wait(self.fence_timeout, what) {
            Ok(()) => Ok(in_use),
            Err(e) => {
                if let Err(idle) = self.device.wait_idle() {
                    log::error!("Leaking resources of a stuck transfer ({what}): {idle}");
                    std::mem::forget((in_use, fence, pool));
                }
                Err(e)
            }
        }
    }

    /// Upload `data` into a new device-local buffer
    ///
    /// The buffer also gets transfer-src usage so it can be read back.
    pub fn upload(&self, data: &[u8], usage: BufferUsage) -> RenderResult<GpuBuffer<D>> {
        self.check_size(data.len() as u64)?;
        self.upload_buffer(data, usage)
            .map_err(|e| e.into_transfer("buffer upload"))
    }

    fn upload_buffer(&self, data: &[u8], usage: BufferUsage) -> RenderResult<GpuBuffer<D>> {
        let size = data.len() as u64;
        let destination = GpuBuffer::new(
            self.device.clone(),
            size,
            usage | BufferUsage::TRANSFER_DST | BufferUsage::TRANSFER_SRC,
            MemoryLocation::DeviceLocal,
        )?;
        let staging = GpuBuffer::staging(self.device.clone(), size)?;
        staging.write(0, data)?;

        let (destination, _staging) = self.one_shot(
            "waiting for buffer upload",
            (destination, staging),
            |recorder, (destination, staging)| {
                recorder.copy_buffer(staging.handle(), destination.handle(), size)?;
                recorder.buffer_barrier(&BufferBarrier {
                    buffer: destination.handle(),
                    src: Access::TransferWrite,
                    dst: Access::read_for_usage(usage),
                })
            },
        )?;

        log::debug!("Uploaded {size} bytes as {usage:?}");
        Ok(destination)
    }

    /// Upload RGBA8 pixels, generate the full mip chain and build view + sampler
    pub fn upload_texture(&self, texture: &TextureData) -> RenderResult<GpuTexture<D>> {
        texture.validate()?;
        self.check_size(texture.pixels.len() as u64)?;
        self.upload_image(texture)
            .map_err(|e| e.into_transfer("texture upload"))
    }

    fn upload_image(&self, texture: &TextureData) -> RenderResult<GpuTexture<D>> {
        let extent = texture.extent();
        let mip_levels = mip_level_count(extent);
        log::debug!("Creating texture {} with {} mip levels", extent, mip_levels);

        let image = GpuImage::new(
            self.device.clone(),
            ImageDesc {
                extent,
                format: texture.format(),
                usage: ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST | ImageUsage::TRANSFER_SRC,
                mip_levels,
            },
        )?;
        let staging = GpuBuffer::staging(self.device.clone(), texture.pixels.len() as u64)?;
        staging.write(0, &texture.pixels)?;

        let (image, _staging) =
            self.one_shot("waiting for texture upload", (image, staging), |recorder, (image, staging)| {
                recorder.image_barrier(&ImageBarrier {
                    image: image.handle(),
                    base_mip: 0,
                    mip_count: mip_levels,
                    old_layout: ImageLayout::Undefined,
                    new_layout: ImageLayout::TransferDst,
                })?;
                recorder.copy_buffer_to_image(staging.handle(), image.handle(), extent)?;
                generate_mipmaps(recorder, image, mip_levels)
            })?;

        let view = image.create_view()?;
        let anisotropy = self.device.adapter().features.sampler_anisotropy.then_some(16.0);
        let sampler = Sampler::new(self.device.clone(), SamplerDesc { mip_levels, max_anisotropy: anisotropy })?;
        Ok(GpuTexture::from_parts(image, view, sampler))
    }

    /// Copy a device buffer back to host memory (debugging and tests)
    pub fn read_back(&self, buffer: &GpuBuffer<D>) -> RenderResult<Vec<u8>> {
        if !buffer.usage().contains(BufferUsage::TRANSFER_SRC) {
            return Err(RenderError::invalid("Buffer was not created with transfer-src usage"));
        }
        let readback = GpuBuffer::new(
            self.device.clone(),
            buffer.size(),
            BufferUsage::TRANSFER_DST,
            MemoryLocation::HostVisible,
        )?;

        let readback = self.one_shot("waiting for read-back", readback, |recorder, readback| {
            recorder.copy_buffer(buffer.handle(), readback.handle(), buffer.size())?;
            recorder.buffer_barrier(&BufferBarrier {
                buffer: readback.handle(),
                src: Access::TransferWrite,
                dst: Access::HostRead,
            })
        })?;

        readback.read_all()
    }
}

/// Blit each mip level from the previous one
///
/// Expects every level in `TransferDst`; leaves every level in `ShaderReadOnly`.
fn generate_mipmaps<D: GpuDevice>(
    recorder: &mut CommandRecorder<'_, D>,
    image: &GpuImage<D>,
    mip_levels: u32,
) -> RenderResult<()> {
    let mut src_extent = image.extent();

    for level in 1..mip_levels {
        let dst_extent = Extent2D::new((src_extent.width / 2).max(1), (src_extent.height / 2).max(1));
        let src_mip = level - 1;

        recorder.image_barrier(&ImageBarrier {
            image: image.handle(),
            base_mip: src_mip,
            mip_count: 1,
            old_layout: ImageLayout::TransferDst,
            new_layout: ImageLayout::TransferSrc,
        })?;
        recorder.blit_mip(&MipBlit { image: image.handle(), src_mip, src_extent, dst_extent })?;
        recorder.image_barrier(&ImageBarrier {
            image: image.handle(),
            base_mip: src_mip,
            mip_count: 1,
            old_layout: ImageLayout::TransferSrc,
            new_layout: ImageLayout::ShaderReadOnly,
        })?;

        src_extent = dst_extent;
    }

    // Last level was only ever written
    recorder.image_barrier(&ImageBarrier {
        image: image.handle(),
        base_mip: mip_levels - 1,
        mip_count: 1,
        old_layout: ImageLayout::TransferDst,
        new_layout: ImageLayout::ShaderReadOnly,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::{MockDevice, MockEvent, ResourceKind};
    use crate::render::error::ErrorSeverity;

    fn engine(device: &Arc<MockDevice>) -> TransferEngine<MockDevice> {
        TransferEngine::new(device.clone(), 1 << 20, None)
    }

    #[test]
    fn test_upload_round_trip_is_byte_identical() {
        let device = MockDevice::shared();
        let engine = engine(&device);
        let data: Vec<u8> = (0..4099u32).map(|i| (i * 31 % 251) as u8).collect();

        let buffer = engine.upload(&data, BufferUsage::VERTEX).expect("Should upload");
        assert_eq!(buffer.location(), MemoryLocation::DeviceLocal);
        assert_eq!(engine.read_back(&buffer).expect("Should read back"), data);

        // Only the destination survives
        assert_eq!(device.live_count(ResourceKind::Buffer), 1);
        assert_eq!(device.live_count(ResourceKind::CommandPool), 0);
        assert_eq!(device.live_count(ResourceKind::Fence), 0);
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn test_upload_rejects_empty_and_oversized_data() {
        let device = MockDevice::shared();
        let engine = TransferEngine::new(device.clone(), 16, None);
        let empty = engine.upload(&[], BufferUsage::INDEX).expect_err("empty");
        assert_eq!(empty.severity(), ErrorSeverity::CallerResponsibility);
        let big = engine.upload(&[0u8; 17], BufferUsage::INDEX).expect_err("too big");
        assert!(matches!(big, RenderError::TransferFailed(_)));
        assert_eq!(device.live_count(ResourceKind::Buffer), 0);
    }

    #[test]
    fn test_allocation_failure_releases_staging() {
        let device = MockDevice::shared();
        let engine = engine(&device);
        device.fail_next_submit();
        let err = engine.upload(&[1, 2, 3, 4], BufferUsage::UNIFORM).expect_err("submit fails");
        assert!(matches!(err, RenderError::TransferFailed(_)));
        assert_eq!(device.live_count(ResourceKind::Buffer), 0);
        assert_eq!(device.live_count(ResourceKind::CommandPool), 0);
    }

    #[test]
    fn test_hung_device_keeps_device_lost_identity() {
        let device = MockDevice::shared();
        let engine = TransferEngine::new(device.clone(), 1024, Some(Duration::from_millis(10)));
        device.set_hung(true);
        let err = engine.upload(&[7; 32], BufferUsage::VERTEX).expect_err("hung");
        assert!(matches!(err, RenderError::DeviceLost { .. }));
        assert!(err.is_fatal());

        // Nothing the stuck copy touches was destroyed under it
        assert!(device.violations().is_empty(), "{:?}", device.violations());
        assert_eq!(device.pending_submissions(), 1);
        assert_eq!(device.live_count(ResourceKind::Buffer), 2);
        assert_eq!(device.live_count(ResourceKind::Fence), 1);
        assert_eq!(device.live_count(ResourceKind::CommandPool), 1);
    }

    #[test]
    fn test_hung_texture_upload_leaks_instead_of_destroying() {
        let device = MockDevice::shared();
        let engine = TransferEngine::new(device.clone(), 1 << 20, Some(Duration::from_millis(10)));
        device.set_hung(true);
        let err = engine
            .upload_texture(&TextureData::rgba8_srgb(8, 8, vec![255; 8 * 8 * 4]))
            .expect_err("hung");
        assert!(matches!(err, RenderError::DeviceLost { .. }));
        assert!(device.violations().is_empty(), "{:?}", device.violations());
        assert_eq!(device.live_count(ResourceKind::Image), 1);
        assert_eq!(device.live_count(ResourceKind::Buffer), 1);
    }

    #[test]
    fn test_texture_upload_generates_mip_chain() {
        let device = MockDevice::shared();
        let engine = engine(&device);
        let texture = TextureData::rgba8_srgb(256, 128, vec![200; 256 * 128 * 4]);
        let gpu = engine.upload_texture(&texture).expect("Should upload texture");

        assert_eq!(gpu.mip_levels(), 9);
        assert_eq!(gpu.image().desc().format, Format::R8G8B8A8Srgb);
        let blits = device.events().iter().filter(|e| matches!(e, MockEvent::Blit { .. })).count();
        assert_eq!(blits, 8);
        assert!(!gpu.view().is_null());
        assert_eq!(device.live_count(ResourceKind::Buffer), 0);
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn test_texture_with_bad_pixel_count_is_rejected() {
        let device = MockDevice::shared();
        let engine = engine(&device);
        let err = engine
            .upload_texture(&TextureData::rgba8_linear(4, 4, vec![0; 10]))
            .expect_err("bad size");
        assert_eq!(err.severity(), ErrorSeverity::CallerResponsibility);
        assert_eq!(device.live_count(ResourceKind::Image), 0);
    }
}
