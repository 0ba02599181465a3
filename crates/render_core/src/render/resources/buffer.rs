//! Buffer management for vertex, index, uniform and staging data
//!
//! Memory management following RAII patterns: a [`GpuBuffer`] owns its
//! allocation and releases it exactly once on drop. The device stays alive
//! for as long as any buffer refers to it.

use crate::render::api::{BufferDesc, BufferHandle, BufferUsage, GpuDevice, MemoryLocation};
use crate::render::error::{RenderError, RenderResult};
use std::sync::Arc;

/// Buffer wrapper with memory management
pub struct GpuBuffer<D: GpuDevice> {
    device: Arc<D>,
    handle: BufferHandle,
    size: u64,
    usage: BufferUsage,
    location: MemoryLocation,
}

impl<D: GpuDevice> GpuBuffer<D> {
    /// Create a new buffer with memory allocation
    pub fn new(device: Arc<D>, size: u64, usage: BufferUsage, location: MemoryLocation) -> RenderResult<Self> {
        if size == 0 {
            return Err(RenderError::invalid("Buffer size must be non-zero"));
        }

        let handle = device.create_buffer(&BufferDesc { size, usage, location })?;
        Ok(Self { device, handle, size, usage, location })
    }

    /// Host-visible buffer used to shuttle data into device-local memory
    pub fn staging(device: Arc<D>, size: u64) -> RenderResult<Self> {
        Self::new(device, size, BufferUsage::TRANSFER_SRC, MemoryLocation::HostVisible)
    }

    /// Host-visible uniform buffer initialised from `data`
    pub fn uniform_with_data(device: Arc<D>, data: &[u8]) -> RenderResult<Self> {
        let buffer = Self::new(device, data.len() as u64, BufferUsage::UNIFORM, MemoryLocation::HostVisible)?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    /// Write data to a host-visible buffer
    pub fn write(&self, offset: u64, data: &[u8]) -> RenderResult<()> {
        self.check_host_range(offset, data.len())?;
        self.device.write_buffer(self.handle, offset, data)
    }

    /// Read the whole contents of a host-visible buffer
    pub fn read_all(&self) -> RenderResult<Vec<u8>> {
        let mut out = vec![0u8; self.size as usize];
        self.check_host_range(0, out.len())?;
        self.device.read_buffer(self.handle, 0, &mut out)?;
        Ok(out)
    }

    fn check_host_range(&self, offset: u64, len: usize) -> RenderResult<()> {
        if self.location != MemoryLocation::HostVisible {
            return Err(RenderError::invalid("Buffer is not host visible"));
        }
        if offset + len as u64 > self.size {
            return Err(RenderError::invalid(format!(
                "Range {}..{} exceeds buffer size {}",
                offset,
                offset + len as u64,
                self.size
            )));
        }
        Ok(())
    }

    /// Get buffer handle
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    /// Get size
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Usage flags the buffer was created with
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Memory placement
    pub fn location(&self) -> MemoryLocation {
        self.location
    }

    /// Device the buffer lives on
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }
}

impl<D: GpuDevice> Drop for GpuBuffer<D> {
    fn drop(&mut self) {
        self.device.destroy_buffer(self.handle);
    }
}

impl<D: GpuDevice> std::fmt::Debug for GpuBuffer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuBuffer")
            .field("handle", &self.handle)
            .field("size", &self.size)
            .field("usage", &self.usage)
            .field("location", &self.location)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::{MockDevice, MockEvent, ResourceKind};

    #[test]
    fn test_host_visible_write_and_read() {
        let device = MockDevice::shared();
        let buffer = GpuBuffer::new(device.clone(), 8, BufferUsage::UNIFORM, MemoryLocation::HostVisible)
            .expect("Should create buffer");
        buffer.write(2, &[1, 2, 3]).expect("Should write");
        assert_eq!(buffer.read_all().expect("Should read"), vec![0, 0, 1, 2, 3, 0, 0, 0]);
    }

    #[test]
    fn test_device_local_buffer_rejects_host_access() {
        let device = MockDevice::shared();
        let buffer = GpuBuffer::new(device, 4, BufferUsage::VERTEX, MemoryLocation::DeviceLocal)
            .expect("Should create buffer");
        assert!(matches!(buffer.write(0, &[1]), Err(RenderError::InvalidOperation { .. })));
    }

    #[test]
    fn test_out_of_range_write_is_rejected() {
        let device = MockDevice::shared();
        let buffer = GpuBuffer::staging(device, 4).expect("Should create buffer");
        assert!(buffer.write(2, &[0; 4]).is_err());
    }

    #[test]
    fn test_drop_destroys_exactly_once() {
        let device = MockDevice::shared();
        let handle = {
            let buffer = GpuBuffer::staging(device.clone(), 16).expect("Should create buffer");
            buffer.handle()
        };
        let destroyed = device
            .events()
            .iter()
            .filter(|e| **e == MockEvent::Destroyed(ResourceKind::Buffer, handle.raw()))
            .count();
        assert_eq!(destroyed, 1);
        assert_eq!(device.live_count(ResourceKind::Buffer), 0);
        assert!(device.violations().is_empty());
    }
}
