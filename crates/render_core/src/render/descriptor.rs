//! Descriptor set layouts and the descriptor allocator
//!
//! The pool is sized once at startup from [`DescriptorPoolConfig`] and never
//! grown. Running out is fatal. Sets are rewritten in place on texture swaps,
//! never reallocated.

use crate::core::DescriptorPoolConfig;
use crate::render::api::{
    DescriptorBindingLayout, DescriptorPoolHandle, DescriptorPoolSizes, DescriptorSetHandle, DescriptorSetLayoutHandle,
    DescriptorType, DescriptorWrite, GpuDevice, ShaderStages,
};
use crate::render::error::{RenderError, RenderResult};
use crate::render::sync::InFlightWait;
use std::sync::Arc;

/// Descriptor set layout builder for creating reusable layouts
#[derive(Debug, Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<DescriptorBindingLayout>,
}

impl DescriptorSetLayoutBuilder {
    /// Create a new descriptor set layout builder
    pub fn new() -> Self {
        Self::default()
    }

    fn add(mut self, binding: u32, ty: DescriptorType, stages: ShaderStages) -> Self {
        self.bindings.push(DescriptorBindingLayout { binding, ty, stages });
        self
    }

    /// Add a uniform buffer binding
    pub fn add_uniform_buffer(self, binding: u32, stages: ShaderStages) -> Self {
        self.add(binding, DescriptorType::UniformBuffer, stages)
    }

    /// Add a combined image sampler binding
    pub fn add_combined_image_sampler(self, binding: u32, stages: ShaderStages) -> Self {
        self.add(binding, DescriptorType::CombinedImageSampler, stages)
    }

    /// Build the descriptor set layout
    pub fn build<D: GpuDevice>(self, device: Arc<D>) -> RenderResult<DescriptorSetLayout<D>> {
        let handle = device.create_descriptor_set_layout(&self.bindings)?;
        Ok(DescriptorSetLayout { device, handle, bindings: self.bindings })
    }
}

/// Descriptor set layout wrapper with automatic cleanup
pub struct DescriptorSetLayout<D: GpuDevice> {
    device: Arc<D>,
    handle: DescriptorSetLayoutHandle,
    bindings: Vec<DescriptorBindingLayout>,
}

impl<D: GpuDevice> DescriptorSetLayout<D> {
    /// Get the layout handle
    pub fn handle(&self) -> DescriptorSetLayoutHandle {
        self.handle
    }

    /// Get the bindings used in this layout
    pub fn bindings(&self) -> &[DescriptorBindingLayout] {
        &self.bindings
    }
}

impl<D: GpuDevice> Drop for DescriptorSetLayout<D> {
    fn drop(&mut self) {
        self.device.destroy_descriptor_set_layout(self.handle);
    }
}

/// Fixed-size descriptor pool with per-set free
pub struct DescriptorAllocator<D: GpuDevice> {
    device: Arc<D>,
    pool: DescriptorPoolHandle,
    max_sets: u32,
    allocated: u32,
}

impl<D: GpuDevice> DescriptorAllocator<D> {
    /// Create the pool
    pub fn new(device: Arc<D>, config: &DescriptorPoolConfig) -> RenderResult<Self> {
        let sizes = DescriptorPoolSizes {
            max_sets: config.max_sets,
            uniform_buffers: config.max_sets * config.uniform_buffers_per_set,
            image_samplers: config.max_sets * config.image_samplers_per_set,
        };
        let pool = device.create_descriptor_pool(&sizes)?;
        log::debug!("Descriptor pool created for {} sets", config.max_sets);
        Ok(Self { device, pool, max_sets: config.max_sets, allocated: 0 })
    }

    /// Allocate one set; exhaustion is fatal and never retried
    pub fn allocate(&mut self, layout: &DescriptorSetLayout<D>) -> RenderResult<DescriptorSetHandle> {
        if self.allocated >= self.max_sets {
            log::error!("Descriptor pool exhausted: {} of {} sets in use", self.allocated, self.max_sets);
            return Err(RenderError::DescriptorPoolExhausted { max_sets: self.max_sets });
        }

        let set = self
            .device
            .allocate_descriptor_set(self.pool, layout.handle())
            .map_err(|e| match e {
                RenderError::DescriptorPoolExhausted { .. } => {
                    RenderError::DescriptorPoolExhausted { max_sets: self.max_sets }
                }
                other => other,
            })?;
        self.allocated += 1;
        Ok(set)
    }

    /// Write bindings into a set no recorded frame uses yet
    pub fn write(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) -> RenderResult<()> {
        self.device.update_descriptor_set(set, writes)
    }

    /// Update bindings of a set that may be in use by recorded frames
    ///
    /// Waits for every in-flight frame first, then updates the same set
    /// handle in place.
    pub fn rewrite(
        &self,
        set: DescriptorSetHandle,
        writes: &[DescriptorWrite],
        in_flight: &dyn InFlightWait,
    ) -> RenderResult<()> {
        in_flight.wait_for_in_flight()?;
        self.device.update_descriptor_set(set, writes)
    }

    /// Return a set to the pool
    pub fn free(&mut self, set: DescriptorSetHandle) -> RenderResult<()> {
        self.device.free_descriptor_set(self.pool, set)?;
        self.allocated = self.allocated.saturating_sub(1);
        Ok(())
    }

    /// Sets currently allocated
    pub fn allocated(&self) -> u32 {
        self.allocated
    }

    /// Pool capacity
    pub fn capacity(&self) -> u32 {
        self.max_sets
    }
}

impl<D: GpuDevice> Drop for DescriptorAllocator<D> {
    fn drop(&mut self) {
        self.device.destroy_descriptor_pool(self.pool);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::{MockDevice, MockEvent};
    use crate::render::api::{BufferHandle, DescriptorResource, ImageViewHandle, SamplerHandle};
    use std::cell::Cell;

    struct CountingWait(Cell<u32>);
    impl InFlightWait for CountingWait {
        fn wait_for_in_flight(&self) -> RenderResult<()> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    fn small_pool(max_sets: u32) -> DescriptorPoolConfig {
        DescriptorPoolConfig { max_sets, ..DescriptorPoolConfig::default() }
    }

    fn material_layout(device: &Arc<MockDevice>) -> DescriptorSetLayout<MockDevice> {
        DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, ShaderStages::VERTEX | ShaderStages::FRAGMENT)
            .add_combined_image_sampler(1, ShaderStages::FRAGMENT)
            .build(device.clone())
            .expect("Should build layout")
    }

    #[test]
    fn test_exhaustion_is_fatal() {
        let device = MockDevice::shared();
        let layout = material_layout(&device);
        let mut allocator = DescriptorAllocator::new(device.clone(), &small_pool(2)).expect("Should create pool");
        allocator.allocate(&layout).expect("first");
        allocator.allocate(&layout).expect("second");
        let err = allocator.allocate(&layout).expect_err("Should be exhausted");
        assert_eq!(err, RenderError::DescriptorPoolExhausted { max_sets: 2 });
        assert!(err.is_fatal());
    }

    #[test]
    fn test_free_returns_capacity() {
        let device = MockDevice::shared();
        let layout = material_layout(&device);
        let mut allocator = DescriptorAllocator::new(device.clone(), &small_pool(1)).expect("Should create pool");
        let set = allocator.allocate(&layout).expect("first");
        allocator.free(set).expect("Should free");
        assert_eq!(allocator.allocated(), 0);
        allocator.allocate(&layout).expect("Should allocate again");
    }

    #[test]
    fn test_rewrite_waits_and_keeps_handle() {
        let device = MockDevice::shared();
        let layout = material_layout(&device);
        let mut allocator = DescriptorAllocator::new(device.clone(), &small_pool(4)).expect("Should create pool");
        let set = allocator.allocate(&layout).expect("set");
        allocator
            .write(
                set,
                &[
                    DescriptorWrite::uniform(0, BufferHandle(11), 64),
                    DescriptorWrite::image(1, ImageViewHandle(21), SamplerHandle(31)),
                ],
            )
            .expect("Should write");

        let wait = CountingWait(Cell::new(0));
        allocator
            .rewrite(set, &[DescriptorWrite::image(1, ImageViewHandle(22), SamplerHandle(31))], &wait)
            .expect("Should rewrite");
        assert_eq!(wait.0.get(), 1);

        let bindings = device.descriptor_bindings(set).expect("set is live");
        assert_eq!(
            bindings.get(&1),
            Some(&DescriptorResource::Image { view: ImageViewHandle(22), sampler: SamplerHandle(31) })
        );
        assert!(matches!(bindings.get(&0), Some(DescriptorResource::Buffer { .. })));
        let updates = device
            .events()
            .iter()
            .filter(|e| **e == MockEvent::DescriptorUpdated(set.raw()))
            .count();
        assert_eq!(updates, 2);
    }
}
