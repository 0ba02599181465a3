//! High-level renderer: registries, the texture-swap queue and the frame loop
//!
//! ```text
//! while !window.should_close() {
//!     if let Some(frame) = renderer.begin_frame()? {
//!         renderer.record_scene(&frame, &scene)?;
//!         renderer.end_frame()?;
//!     }
//! }
//! ```

use crate::core::RendererConfig;
use crate::foundation::collections::{new_key_type, SlotMap};
use crate::render::api::{
    ClearValue, DescriptorWrite, Extent2D, GpuBackend, GpuDevice, PipelineHandle, PipelineLayoutHandle,
    PresentOutcome, RenderPassHandle, BufferUsage,
};
use crate::render::commands::CommandRecorder;
use crate::render::descriptor::{DescriptorAllocator, DescriptorSetLayout};
use crate::render::device_context::DeviceContext;
use crate::render::error::{RenderError, RenderResult};
use crate::render::framebuffer::{SampledImageHandle, GBUFFER_CHANNELS};
use crate::render::material::{material_layout, DefaultTextures, Material, MaterialDesc, TextureSlot};
use crate::render::mesh::{GpuMesh, MeshData};
use crate::render::sync::{FrameContext, FrameSynchronizer, InFlightWait};
use crate::render::targets::RenderTargets;
use crate::render::transfer::{TextureData, TransferEngine};
use slotmap::Key;
use std::collections::VecDeque;
use std::sync::Arc;

new_key_type! {
    /// Stable key of a registered mesh
    pub struct MeshHandle;
    /// Stable key of a registered material
    pub struct MaterialHandle;
}

/// "Swap material M's texture at slot i"
#[derive(Debug, Clone)]
pub struct TextureSwapRequest {
    /// Material to modify
    pub material: MaterialHandle,
    /// Slot to replace
    pub slot: TextureSlot,
    /// New pixels
    pub texture: TextureData,
}

/// A swap that could not be applied
#[derive(Debug, Clone, PartialEq)]
pub struct TextureSwapFailure {
    /// Material the swap targeted
    pub material: MaterialHandle,
    /// Slot the swap targeted
    pub slot: TextureSlot,
    /// Why it failed
    pub error: RenderError,
}

/// Editor-facing queue of texture swaps, drained once per frame
#[derive(Debug, Default)]
pub struct TextureSwapQueue {
    pending: VecDeque<TextureSwapRequest>,
    failures: Vec<TextureSwapFailure>,
}

impl TextureSwapQueue {
    /// Queue a swap for the next `begin_frame`
    pub fn enqueue(&mut self, material: MaterialHandle, slot: TextureSlot, texture: TextureData) {
        self.pending.push_back(TextureSwapRequest { material, slot, texture });
    }

    /// Swaps waiting for the next frame
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Failed swaps since the last call
    pub fn take_failures(&mut self) -> Vec<TextureSwapFailure> {
        std::mem::take(&mut self.failures)
    }

    fn drain(&mut self) -> Vec<TextureSwapRequest> {
        self.pending.drain(..).collect()
    }

    fn fail(&mut self, request: &TextureSwapRequest, error: RenderError) {
        log::warn!("Texture swap for {:?} slot {:?} failed: {}", request.material, request.slot, error);
        self.failures.push(TextureSwapFailure { material: request.material, slot: request.slot, error });
    }
}

/// One draw: a registered mesh with a registered material
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawItem {
    /// Mesh to draw
    pub mesh: MeshHandle,
    /// Material bound at set 0
    pub material: MaterialHandle,
}

/// What `record_scene` draws this frame
#[derive(Debug, Clone, Default)]
pub struct SceneData {
    /// Host-created pipeline compatible with the G-buffer pass; no draws without one
    pub pipeline: Option<PipelineHandle>,
    /// Draw list
    pub draws: Vec<DrawItem>,
    /// Clear color of the presentation target
    pub clear_color: [f32; 4],
}

/// Counters for the frame loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames submitted to the queue
    pub frames_submitted: u64,
    /// Swapchain rebuilds from resize or staleness
    pub swapchain_rebuilds: u64,
    /// Texture swaps applied
    pub texture_swaps: u64,
    /// Texture swaps that failed
    pub texture_swap_failures: u64,
    /// Frames skipped because the surface had zero area
    pub skipped_frames: u64,
}

/// Deferred renderer core
pub struct Renderer<D: GpuDevice> {
    sync: FrameSynchronizer<D>,
    meshes: SlotMap<MeshHandle, GpuMesh<D>>,
    materials: SlotMap<MaterialHandle, Material<D>>,
    defaults: DefaultTextures<D>,
    descriptors: DescriptorAllocator<D>,
    material_layout: DescriptorSetLayout<D>,
    pipeline_layout: PipelineLayoutHandle,
    targets: RenderTargets<D>,
    transfer: TransferEngine<D>,
    texture_swaps: TextureSwapQueue,
    stats: FrameStats,
    context: DeviceContext<D>,
}

impl<D: GpuDevice> Renderer<D> {
    /// Initialize the device on the best adapter and build the renderer
    pub fn initialize<B>(backend: &B, config: &RendererConfig, live_extent: Extent2D) -> RenderResult<Self>
    where
        B: GpuBackend<Device = D>,
    {
        let context = DeviceContext::initialize(backend)?;
        Self::new(context, config, live_extent)
    }

    /// Build the renderer on an initialized device
    pub fn new(context: DeviceContext<D>, config: &RendererConfig, live_extent: Extent2D) -> RenderResult<Self> {
        config.validate().map_err(|e| RenderError::invalid(e.to_string()))?;
        let device = context.device().clone();

        let transfer = TransferEngine::new(device.clone(), config.max_upload_bytes, config.fence_timeout());
        let targets = RenderTargets::new(device.clone(), config, live_extent)?;
        let material_layout = material_layout(device.clone())?;
        let pipeline_layout = device.create_pipeline_layout(&[material_layout.handle()])?;
        let descriptors = DescriptorAllocator::new(device.clone(), &config.descriptor_pool)?;
        let defaults = DefaultTextures::new(&transfer)?;
        let sync = FrameSynchronizer::new(device, config)?;

        log::info!(
            "Renderer ready: {} frames in flight, {} G-buffer channels, {}",
            config.frames_in_flight,
            GBUFFER_CHANNELS.len(),
            targets.extent()
        );

        Ok(Self {
            sync,
            meshes: SlotMap::with_key(),
            materials: SlotMap::with_key(),
            defaults,
            descriptors,
            material_layout,
            pipeline_layout,
            targets,
            transfer,
            texture_swaps: TextureSwapQueue::default(),
            stats: FrameStats::default(),
            context,
        })
    }

    /// Shared device
    pub fn device(&self) -> &Arc<D> {
        self.context.device()
    }

    /// Device context
    pub fn context(&self) -> &DeviceContext<D> {
        &self.context
    }

    /// Transfer engine for ad-hoc uploads
    pub fn transfer(&self) -> &TransferEngine<D> {
        &self.transfer
    }

    /// Swapchain and framebuffers
    pub fn targets(&self) -> &RenderTargets<D> {
        &self.targets
    }

    /// G-buffer render pass host pipelines must be compatible with
    pub fn render_pass(&self) -> RenderPassHandle {
        self.targets.render_pass()
    }

    /// Pipeline layout with the material set at index 0
    pub fn pipeline_layout(&self) -> PipelineLayoutHandle {
        self.pipeline_layout
    }

    /// Editor texture-swap queue
    pub fn texture_swaps(&mut self) -> &mut TextureSwapQueue {
        &mut self.texture_swaps
    }

    /// Read-only handle to a G-buffer channel for editor panels
    pub fn imgui_handle(&self, attachment_index: usize) -> RenderResult<SampledImageHandle> {
        self.targets.imgui_handle(attachment_index)
    }

    /// Frame loop counters
    pub fn stats(&self) -> FrameStats {
        FrameStats {
            frames_submitted: self.sync.frames_submitted(),
            swapchain_rebuilds: self.sync.rebuilds(),
            ..self.stats
        }
    }

    /// Report a new window size
    pub fn resize(&mut self, width: u32, height: u32) {
        self.targets.resize(Extent2D::new(width, height));
    }

    /// Upload a mesh
    pub fn register_mesh(&mut self, data: &MeshData) -> RenderResult<MeshHandle> {
        let mesh = GpuMesh::upload(&self.transfer, data)?;
        Ok(self.meshes.insert(mesh))
    }

    /// Release a mesh once no frame can still draw it
    pub fn remove_mesh(&mut self, handle: MeshHandle) -> RenderResult<()> {
        if !self.meshes.contains_key(handle) {
            return Err(RenderError::ResourceNotFound { id: handle.data().as_ffi() });
        }
        self.sync.wait_for_in_flight()?;
        self.meshes.remove(handle);
        Ok(())
    }

    /// Upload a material's parameters and textures and write its descriptor set
    pub fn register_material(&mut self, desc: &MaterialDesc) -> RenderResult<MaterialHandle> {
        let params_buffer = self.transfer.upload(bytemuck::bytes_of(&desc.params), BufferUsage::UNIFORM)?;

        let mut textures: [Option<_>; 4] = Default::default();
        for (slot, texture) in desc.textures.iter().enumerate() {
            if let Some(data) = texture {
                textures[slot] = Some(self.transfer.upload_texture(data)?);
            }
        }

        let set = self.descriptors.allocate(&self.material_layout)?;
        let material = Material::new(desc.params, params_buffer, textures, set);
        if let Err(e) = self.descriptors.write(set, &material.writes(&self.defaults)) {
            if let Err(free_err) = self.descriptors.free(set) {
                log::warn!("Failed to free descriptor set {set:?} after a failed write: {free_err}");
            }
            return Err(e);
        }
        Ok(self.materials.insert(material))
    }

    /// Release a material and its set once no frame can still bind it
    pub fn remove_material(&mut self, handle: MaterialHandle) -> RenderResult<()> {
        if !self.materials.contains_key(handle) {
            return Err(RenderError::ResourceNotFound { id: handle.data().as_ffi() });
        }
        self.sync.wait_for_in_flight()?;
        if let Some(material) = self.materials.remove(handle) {
            self.descriptors.free(material.descriptor_set())?;
        }
        Ok(())
    }

    /// Registered material
    pub fn material(&self, handle: MaterialHandle) -> Option<&Material<D>> {
        self.materials.get(handle)
    }

    /// Registered mesh
    pub fn mesh(&self, handle: MeshHandle) -> Option<&GpuMesh<D>> {
        self.meshes.get(handle)
    }

    /// Apply queued texture swaps
    ///
    /// Runs before the frame slot's fence is reset. Each rewrite waits for
    /// every in-flight frame, so the replaced texture can be dropped as soon
    /// as the set points at the new one.
    fn apply_texture_swaps(&mut self) -> RenderResult<()> {
        if self.texture_swaps.is_empty() {
            return Ok(());
        }

        for request in self.texture_swaps.drain() {
            let Some(set) = self.materials.get(request.material).map(Material::descriptor_set) else {
                let id = request.material.data().as_ffi();
                self.texture_swaps.fail(&request, RenderError::ResourceNotFound { id });
                self.stats.texture_swap_failures += 1;
                continue;
            };

            let texture = match self.transfer.upload_texture(&request.texture) {
                Ok(texture) => texture,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    self.texture_swaps.fail(&request, e);
                    self.stats.texture_swap_failures += 1;
                    continue;
                }
            };

            let write = DescriptorWrite::image(request.slot.binding(), texture.view(), texture.sampler());
            self.descriptors.rewrite(set, &[write], &self.sync)?;

            if let Some(material) = self.materials.get_mut(request.material) {
                drop(material.replace_texture(request.slot, texture));
            }
            self.stats.texture_swaps += 1;
            log::debug!("Swapped {:?} texture of {:?}", request.slot, request.material);
        }
        Ok(())
    }

    /// Start a frame; `None` while the surface has zero area
    pub fn begin_frame(&mut self) -> RenderResult<Option<FrameContext>> {
        if self.sync.is_recording() {
            return Err(RenderError::invalid("begin_frame called while a frame is recording"));
        }
        if self.targets.live_extent().is_empty() {
            self.stats.skipped_frames += 1;
            return Ok(None);
        }

        self.apply_texture_swaps()?;
        self.sync.begin_frame(&mut self.targets).map(Some)
    }

    /// Record the G-buffer pass for `scene` into the frame's command buffer
    pub fn record_scene(&self, frame: &FrameContext, scene: &SceneData) -> RenderResult<()> {
        if !self.sync.is_recording() {
            return Err(RenderError::invalid("record_scene called outside begin_frame/end_frame"));
        }

        let mut clears = vec![ClearValue::Color(scene.clear_color)];
        clears.extend(GBUFFER_CHANNELS.iter().map(|_| ClearValue::Color([0.0; 4])));
        clears.push(ClearValue::Depth(1.0));

        let mut recorder = CommandRecorder::resume(frame.command_buffer, self.device().as_ref());
        let mut pass = recorder.begin_render_pass(self.render_pass(), frame.framebuffer, frame.extent, &clears)?;
        pass.set_viewport_scissor(frame.extent);

        let Some(pipeline) = scene.pipeline else {
            return Ok(());
        };
        pass.bind_pipeline(pipeline);

        for draw in &scene.draws {
            let mesh = self
                .meshes
                .get(draw.mesh)
                .ok_or(RenderError::ResourceNotFound { id: draw.mesh.data().as_ffi() })?;
            let material = self
                .materials
                .get(draw.material)
                .ok_or(RenderError::ResourceNotFound { id: draw.material.data().as_ffi() })?;

            pass.bind_descriptor_set(self.pipeline_layout, 0, material.descriptor_set());
            pass.bind_vertex_buffer(mesh.vertex_buffer().handle());
            pass.bind_index_buffer(mesh.index_buffer().handle());
            pass.draw_indexed(mesh.index_count());
        }
        Ok(())
    }

    /// Submit and present the frame
    pub fn end_frame(&mut self) -> RenderResult<PresentOutcome> {
        self.sync.end_frame(&mut self.targets)
    }

    /// Wait for every frame slot, then for the queue
    pub fn shutdown(&mut self) -> RenderResult<()> {
        self.sync.shutdown()?;
        self.context.wait_idle()
    }
}

impl<D: GpuDevice> Drop for Renderer<D> {
    fn drop(&mut self) {
        if let Err(e) = self.sync.shutdown() {
            log::error!("Renderer shutdown failed: {e}");
        }
        // Uploads and other work outside the frame slots
        if let Err(e) = self.context.wait_idle() {
            log::error!("Queue not idle at renderer teardown: {e}");
        }
        self.device().destroy_pipeline_layout(self.pipeline_layout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::{MockBackend, MockDevice, MockEvent, ResourceKind};
    use crate::render::api::{DescriptorResource, FenceHandle};

    fn renderer(config: &RendererConfig) -> (Arc<MockDevice>, Renderer<MockDevice>) {
        let renderer = Renderer::initialize(&MockBackend::default(), config, Extent2D::new(1600, 900))
            .expect("Should initialize renderer");
        (renderer.device().clone(), renderer)
    }

    fn scene_with(renderer: &mut Renderer<MockDevice>) -> (SceneData, MaterialHandle) {
        let mesh = renderer.register_mesh(&MeshData::cube()).expect("Should register mesh");
        let material = renderer
            .register_material(
                &MaterialDesc::default()
                    .with_texture(TextureSlot::Albedo, TextureData::rgba8_srgb(2, 2, vec![90; 16]))
                    .with_texture(TextureSlot::MetallicRoughness, TextureData::rgba8_linear(2, 2, vec![128; 16])),
            )
            .expect("Should register material");
        let scene = SceneData {
            pipeline: Some(PipelineHandle(0xfeed)),
            draws: vec![DrawItem { mesh, material }],
            clear_color: [0.1, 0.1, 0.1, 1.0],
        };
        (scene, material)
    }

    fn frame(renderer: &mut Renderer<MockDevice>, scene: &SceneData) -> FrameContext {
        let frame = renderer.begin_frame().expect("Should begin").expect("Should not skip");
        renderer.record_scene(&frame, scene).expect("Should record");
        renderer.end_frame().expect("Should end");
        frame
    }

    #[test]
    fn test_resize_rebuilds_framebuffers_on_next_frame() {
        let (device, mut renderer) = renderer(&RendererConfig::default());
        let scene = SceneData::default();
        frame(&mut renderer, &scene);
        assert_eq!(renderer.targets().extent(), Extent2D::new(1600, 900));

        device.resize_surface(Extent2D::new(800, 450));
        renderer.resize(800, 450);
        let next = renderer.begin_frame().expect("Should begin").expect("frame");
        assert_eq!(next.extent, Extent2D::new(800, 450));
        for &framebuffer in renderer.targets().framebuffers() {
            assert_eq!(device.framebuffer_extent(framebuffer), Some(Extent2D::new(800, 450)));
        }
        assert!(renderer.targets().attachment_views().iter().all(|v| !v.is_null()));
        renderer.end_frame().expect("Should end");
        assert_eq!(renderer.stats().swapchain_rebuilds, 1);
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn test_zero_area_surface_skips_frame() {
        let (device, mut renderer) = renderer(&RendererConfig::default());
        device.resize_surface(Extent2D::new(0, 0));
        renderer.resize(0, 0);
        assert!(renderer.begin_frame().expect("Should not fail").is_none());
        assert_eq!(renderer.stats().skipped_frames, 1);

        device.resize_surface(Extent2D::new(640, 480));
        renderer.resize(640, 480);
        let frame = renderer.begin_frame().expect("Should begin").expect("frame");
        assert_eq!(frame.extent, Extent2D::new(640, 480));
        renderer.end_frame().expect("Should end");
    }

    #[test]
    fn test_texture_swap_keeps_old_binding_until_frames_finish() {
        let (device, mut renderer) = renderer(&RendererConfig::default());
        let (scene, material) = scene_with(&mut renderer);
        let set = renderer.material(material).expect("material").descriptor_set();
        let old_view = renderer
            .material(material)
            .and_then(|m| m.texture(TextureSlot::MetallicRoughness))
            .expect("metallic-roughness")
            .view();

        // Three frames recorded, the oldest already finished on the GPU
        let slots: Vec<FenceHandle> = (0..3)
            .map(|_| {
                let ctx = frame(&mut renderer, &scene);
                renderer.sync.slot(ctx.slot).expect("slot").fence()
            })
            .collect();
        device.complete_oldest();
        assert_eq!(device.pending_submissions(), 2);
        let mark = device.events().len();

        renderer
            .texture_swaps()
            .enqueue(material, TextureSlot::MetallicRoughness, TextureData::rgba8_linear(1, 1, vec![1, 2, 3, 4]));
        let next = renderer.begin_frame().expect("Should begin").expect("frame");
        renderer.record_scene(&next, &scene).expect("Should record");
        renderer.end_frame().expect("Should end");

        let events = device.events()[mark..].to_vec();
        let signaled = |fence: FenceHandle| {
            events
                .iter()
                .position(|e| *e == MockEvent::FenceSignaled(fence.raw()))
                .expect("pending frame fence signaled")
        };
        let updated = events
            .iter()
            .position(|e| *e == MockEvent::DescriptorUpdated(set.raw()))
            .expect("set rewritten");
        let old_destroyed = events
            .iter()
            .position(|e| *e == MockEvent::Destroyed(ResourceKind::ImageView, old_view.raw()))
            .expect("old view released");
        for fence in &slots[1..] {
            assert!(signaled(*fence) < updated);
            assert!(signaled(*fence) < old_destroyed);
        }

        let material_ref = renderer.material(material).expect("material");
        assert_eq!(material_ref.descriptor_set(), set);
        let bindings = device.descriptor_bindings(set).expect("set live");
        assert!(matches!(
            bindings.get(&TextureSlot::MetallicRoughness.binding()),
            Some(DescriptorResource::Image { view, .. }) if *view != old_view
        ));
        let swapped = material_ref.texture(TextureSlot::MetallicRoughness).expect("swapped texture");
        assert_eq!(swapped.extent(), Extent2D::new(1, 1));
        assert_eq!(renderer.stats().texture_swaps, 1);
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn test_failed_swaps_are_reported_not_fatal() {
        let (device, mut renderer) = renderer(&RendererConfig::default());
        let (scene, material) = scene_with(&mut renderer);
        let doomed = renderer.register_material(&MaterialDesc::default()).expect("Should register");

        renderer
            .texture_swaps()
            .enqueue(material, TextureSlot::Normal, TextureData::rgba8_linear(4, 4, vec![0; 3]));
        renderer
            .texture_swaps()
            .enqueue(doomed, TextureSlot::Albedo, TextureData::solid([1, 1, 1, 1], true));
        renderer.remove_material(doomed).expect("Should remove");

        // Neither failure stops the frame
        frame(&mut renderer, &scene);

        let failures = renderer.texture_swaps().take_failures();
        assert_eq!(failures.len(), 2);
        assert!(matches!(failures[0].error, RenderError::TransferFailed(_)));
        assert_eq!(failures[0].material, material);
        assert_eq!(failures[0].slot, TextureSlot::Normal);
        assert_eq!(failures[1].error, RenderError::ResourceNotFound { id: doomed.data().as_ffi() });
        assert_eq!(failures[1].material, doomed);
        assert_eq!(renderer.stats().texture_swap_failures, 2);
        assert_eq!(renderer.stats().texture_swaps, 0);

        let live = renderer.material(material).expect("material kept");
        assert!(live.texture(TextureSlot::Normal).is_none());
        assert!(live.texture(TextureSlot::Albedo).is_some());

        // Drawing the removed material is still an error
        let doomed_scene = SceneData {
            draws: vec![DrawItem { mesh: scene.draws[0].mesh, material: doomed }],
            ..scene.clone()
        };
        let next = renderer.begin_frame().expect("Should begin").expect("frame");
        let err = renderer.record_scene(&next, &doomed_scene).expect_err("material was removed");
        assert!(matches!(err, RenderError::ResourceNotFound { .. }));
        renderer.end_frame().expect("Should end");
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn test_failed_descriptor_write_frees_the_set() {
        let (device, mut renderer) = renderer(&RendererConfig::default());
        let before = renderer.descriptors.allocated();
        let buffers_before = device.live_count(ResourceKind::Buffer);

        device.fail_next_descriptor_update();
        let err = renderer
            .register_material(&MaterialDesc::default())
            .expect_err("descriptor write fails");
        assert!(matches!(err, RenderError::Api { call: "vkUpdateDescriptorSets", .. }));
        assert_eq!(renderer.descriptors.allocated(), before);
        assert_eq!(device.live_count(ResourceKind::Buffer), buffers_before);

        renderer.register_material(&MaterialDesc::default()).expect("Should register after the failure");
        assert_eq!(renderer.descriptors.allocated(), before + 1);
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn test_shutdown_waits_for_in_flight_frames_before_destroying() {
        let (device, mut renderer) = renderer(&RendererConfig::default());
        let (scene, _) = scene_with(&mut renderer);
        let fences: Vec<FenceHandle> = (0..3)
            .map(|_| {
                let ctx = frame(&mut renderer, &scene);
                renderer.sync.slot(ctx.slot).expect("slot").fence()
            })
            .collect();
        device.complete_oldest();
        assert_eq!(device.pending_submissions(), 2);

        let mark = device.events().len();
        drop(renderer);

        let events = device.events()[mark..].to_vec();
        let idle = events.iter().position(|e| *e == MockEvent::WaitIdle).expect("queue drained at teardown");
        let first_destroy = events
            .iter()
            .position(|e| matches!(e, MockEvent::Destroyed(..)))
            .expect("resources destroyed");
        for fence in &fences[1..] {
            let signaled = events
                .iter()
                .position(|e| *e == MockEvent::FenceSignaled(fence.raw()))
                .expect("fence signaled during shutdown");
            assert!(signaled < first_destroy);
        }
        assert!(idle < first_destroy);
        assert_eq!(device.pending_submissions(), 0);
        assert_eq!(device.live_total(), 0, "leaked: {:?}", device.live_resources());
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn test_remove_mesh_waits_and_releases_buffers() {
        let (device, mut renderer) = renderer(&RendererConfig::default());
        let (scene, _) = scene_with(&mut renderer);
        frame(&mut renderer, &scene);
        let buffers = device.live_count(ResourceKind::Buffer);
        renderer.remove_mesh(scene.draws[0].mesh).expect("Should remove");
        assert_eq!(device.live_count(ResourceKind::Buffer), buffers - 2);
        assert_eq!(device.pending_submissions(), 0);
        assert!(renderer.remove_mesh(scene.draws[0].mesh).is_err());
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = RendererConfig::default().with_frames_in_flight(0);
        let result = Renderer::initialize(&MockBackend::default(), &config, Extent2D::new(640, 480));
        assert!(matches!(result, Err(RenderError::InvalidOperation { .. })));
    }

    #[test]
    fn test_imgui_handles_for_every_channel() {
        let (_device, renderer) = renderer(&RendererConfig::default());
        for index in 0..GBUFFER_CHANNELS.len() {
            let handle = renderer.imgui_handle(index).expect("handle");
            assert!(!handle.view.is_null());
        }
    }
}
