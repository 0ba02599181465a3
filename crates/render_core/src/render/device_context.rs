//! Device context: adapter selection, logical device and memory allocator

use crate::render::api::{AdapterInfo, AdapterKind, GpuBackend, GpuDevice};
use crate::render::error::{RenderError, RenderResult};
use crate::render::framebuffer::GBUFFER_CHANNELS;
use std::sync::Arc;

/// Color attachments the G-buffer pass writes (presentation target + channels)
pub const REQUIRED_COLOR_ATTACHMENTS: u32 = GBUFFER_CHANNELS.len() as u32 + 1;

/// Deterministic adapter score, `None` when the adapter cannot run the renderer
///
/// Adapter kind dominates; optional features only separate adapters of the
/// same kind.
pub fn score_adapter(adapter: &AdapterInfo) -> Option<u64> {
    adapter.graphics_present_family?;

    let features = &adapter.features;
    if features.max_color_attachments < REQUIRED_COLOR_ATTACHMENTS {
        return None;
    }

    let kind = match adapter.kind {
        AdapterKind::Discrete => 100_000,
        AdapterKind::Integrated => 10_000,
        AdapterKind::Virtual => 1_000,
        AdapterKind::Cpu => 100,
        AdapterKind::Other => 0,
    };

    let mut score = kind;
    if features.sampler_anisotropy {
        score += 40;
    }
    if features.independent_blend {
        score += 30;
    }
    if features.fill_mode_non_solid {
        score += 10;
    }
    if features.geometry_shader {
        score += 10;
    }
    score += u64::from(features.max_image_dimension_2d.min(16_384) / 1024);
    Some(score)
}

/// Highest-scoring adapter; ties go to the earlier one in enumeration order
pub fn select_adapter(adapters: &[AdapterInfo]) -> Option<&AdapterInfo> {
    let mut best: Option<(&AdapterInfo, u64)> = None;
    for adapter in adapters {
        let Some(score) = score_adapter(adapter) else {
            log::debug!("Adapter {} unsuitable", adapter.name);
            continue;
        };
        log::debug!("Adapter {} ({:?}) scored {}", adapter.name, adapter.kind, score);
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((adapter, score));
        }
    }
    best.map(|(adapter, _)| adapter)
}

/// Owns the logical device, its graphics queue and the memory allocator
pub struct DeviceContext<D: GpuDevice> {
    device: Arc<D>,
    adapter: AdapterInfo,
}

impl<D: GpuDevice> DeviceContext<D> {
    /// Select an adapter, open the device and bind the allocator
    pub fn initialize<B>(backend: &B) -> RenderResult<Self>
    where
        B: GpuBackend<Device = D>,
    {
        let adapters = backend.enumerate_adapters()?;
        log::debug!("Found {} adapters", adapters.len());

        let adapter = select_adapter(&adapters).ok_or(RenderError::NoSuitableDevice)?.clone();
        log::info!("Selected GPU: {} ({:?})", adapter.name, adapter.kind);

        let mut device = backend.open_device(&adapter)?;
        Self::create_allocator(&mut device)?;

        Ok(Self { device: Arc::new(device), adapter })
    }

    /// Bind the memory allocator; any failure is fatal
    pub fn create_allocator(device: &mut D) -> RenderResult<()> {
        device.create_allocator().map_err(|e| match e {
            RenderError::AllocatorInit(_) => e,
            other => RenderError::AllocatorInit(other.to_string()),
        })
    }

    /// Shared device handle
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Adapter the device runs on
    pub fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    /// Block until the queue is idle
    pub fn wait_idle(&self) -> RenderResult<()> {
        self.device.wait_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::{MockBackend, MockDevice};
    use crate::render::api::AdapterFeatures;

    fn adapter(index: usize, kind: AdapterKind, family: Option<u32>, anisotropy: bool) -> AdapterInfo {
        AdapterInfo {
            index,
            name: format!("adapter {index}"),
            kind,
            graphics_present_family: family,
            features: AdapterFeatures {
                sampler_anisotropy: anisotropy,
                independent_blend: true,
                fill_mode_non_solid: false,
                geometry_shader: false,
                max_color_attachments: 8,
                max_image_dimension_2d: 16_384,
            },
        }
    }

    #[test]
    fn test_discrete_beats_better_featured_integrated() {
        let adapters = [
            adapter(0, AdapterKind::Integrated, Some(0), true),
            adapter(1, AdapterKind::Discrete, Some(0), false),
        ];
        assert_eq!(select_adapter(&adapters).map(|a| a.index), Some(1));
    }

    #[test]
    fn test_features_break_same_kind() {
        let adapters = [
            adapter(0, AdapterKind::Discrete, Some(0), false),
            adapter(1, AdapterKind::Discrete, Some(0), true),
        ];
        assert_eq!(select_adapter(&adapters).map(|a| a.index), Some(1));
    }

    #[test]
    fn test_ties_go_to_enumeration_order() {
        let adapters = [
            adapter(0, AdapterKind::Integrated, Some(1), true),
            adapter(1, AdapterKind::Integrated, Some(0), true),
        ];
        assert_eq!(select_adapter(&adapters).map(|a| a.index), Some(0));
    }

    #[test]
    fn test_adapter_without_present_queue_is_unsuitable() {
        assert_eq!(score_adapter(&adapter(0, AdapterKind::Discrete, None, true)), None);
        let mut small = adapter(1, AdapterKind::Discrete, Some(0), true);
        small.features.max_color_attachments = 4;
        assert_eq!(score_adapter(&small), None);
    }

    #[test]
    fn test_initialize_without_suitable_adapter() {
        let backend = MockBackend::new(vec![adapter(0, AdapterKind::Discrete, None, true)]);
        let result = DeviceContext::<MockDevice>::initialize(&backend);
        assert!(matches!(result, Err(RenderError::NoSuitableDevice)));
    }

    #[test]
    fn test_allocator_failure_is_fatal() {
        let backend = MockBackend::new(vec![adapter(0, AdapterKind::Discrete, Some(0), true)]).with_allocator_failure();
        let err = DeviceContext::<MockDevice>::initialize(&backend).err().expect("Should fail");
        assert!(matches!(err, RenderError::AllocatorInit(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_initialize_picks_best_adapter() {
        let backend = MockBackend::new(vec![
            adapter(0, AdapterKind::Cpu, Some(0), true),
            adapter(1, AdapterKind::Discrete, Some(2), true),
        ]);
        let context = DeviceContext::initialize(&backend).expect("Should initialize");
        assert_eq!(context.adapter().index, 1);
        assert_eq!(context.device().adapter().graphics_present_family, Some(2));
    }
}
