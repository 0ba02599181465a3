//! Conversions between core types and `ash::vk`

use crate::render::api::*;
use crate::render::error::RenderError;
use ash::vk;

/// Map a failed call onto the core error taxonomy
pub fn vk_error(call: &'static str) -> impl Fn(vk::Result) -> RenderError {
    move |result| match result {
        vk::Result::ERROR_DEVICE_LOST => RenderError::device_lost(call),
        vk::Result::ERROR_OUT_OF_DATE_KHR => RenderError::SwapchainOutOfDate,
        vk::Result::ERROR_SURFACE_LOST_KHR => RenderError::SurfaceUnsupported(format!("surface lost in {call}")),
        other => RenderError::Api { call, code: format!("{other:?}") },
    }
}

pub fn extent(extent: Extent2D) -> vk::Extent2D {
    vk::Extent2D { width: extent.width, height: extent.height }
}

pub fn extent_from(extent: vk::Extent2D) -> Extent2D {
    Extent2D::new(extent.width, extent.height)
}

pub fn format(format: Format) -> vk::Format {
    match format {
        Format::B8G8R8A8Srgb => vk::Format::B8G8R8A8_SRGB,
        Format::B8G8R8A8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::R8G8B8A8Srgb => vk::Format::R8G8B8A8_SRGB,
        Format::R8G8B8A8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::R16G16B16A16Sfloat => vk::Format::R16G16B16A16_SFLOAT,
        Format::R32G32B32A32Sfloat => vk::Format::R32G32B32A32_SFLOAT,
        Format::D32Sfloat => vk::Format::D32_SFLOAT,
        Format::Other(raw) => vk::Format::from_raw(raw),
    }
}

pub fn format_from(format: vk::Format) -> Format {
    match format {
        vk::Format::B8G8R8A8_SRGB => Format::B8G8R8A8Srgb,
        vk::Format::B8G8R8A8_UNORM => Format::B8G8R8A8Unorm,
        vk::Format::R8G8B8A8_SRGB => Format::R8G8B8A8Srgb,
        vk::Format::R8G8B8A8_UNORM => Format::R8G8B8A8Unorm,
        vk::Format::R16G16B16A16_SFLOAT => Format::R16G16B16A16Sfloat,
        vk::Format::R32G32B32A32_SFLOAT => Format::R32G32B32A32Sfloat,
        vk::Format::D32_SFLOAT => Format::D32Sfloat,
        other => Format::Other(other.as_raw()),
    }
}

pub fn color_space(space: ColorSpace) -> vk::ColorSpaceKHR {
    match space {
        ColorSpace::SrgbNonlinear => vk::ColorSpaceKHR::SRGB_NONLINEAR,
        ColorSpace::Other(raw) => vk::ColorSpaceKHR::from_raw(raw),
    }
}

pub fn surface_format_from(surface_format: vk::SurfaceFormatKHR) -> SurfaceFormat {
    SurfaceFormat {
        format: format_from(surface_format.format),
        color_space: match surface_format.color_space {
            vk::ColorSpaceKHR::SRGB_NONLINEAR => ColorSpace::SrgbNonlinear,
            other => ColorSpace::Other(other.as_raw()),
        },
    }
}

pub fn present_mode(mode: PresentMode) -> vk::PresentModeKHR {
    match mode {
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
        PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
    }
}

/// `None` for modes the core never selects
pub fn present_mode_from(mode: vk::PresentModeKHR) -> Option<PresentMode> {
    match mode {
        vk::PresentModeKHR::IMMEDIATE => Some(PresentMode::Immediate),
        vk::PresentModeKHR::MAILBOX => Some(PresentMode::Mailbox),
        vk::PresentModeKHR::FIFO => Some(PresentMode::Fifo),
        vk::PresentModeKHR::FIFO_RELAXED => Some(PresentMode::FifoRelaxed),
        _ => None,
    }
}

pub fn surface_capabilities_from(caps: &vk::SurfaceCapabilitiesKHR) -> SurfaceCapabilities {
    // u32::MAX in current_extent means the window decides
    let current_extent = (caps.current_extent.width != u32::MAX).then(|| extent_from(caps.current_extent));
    SurfaceCapabilities {
        min_image_count: caps.min_image_count,
        max_image_count: caps.max_image_count,
        current_extent,
        min_extent: extent_from(caps.min_image_extent),
        max_extent: extent_from(caps.max_image_extent),
    }
}

pub fn buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    let pairs = [
        (BufferUsage::VERTEX, vk::BufferUsageFlags::VERTEX_BUFFER),
        (BufferUsage::INDEX, vk::BufferUsageFlags::INDEX_BUFFER),
        (BufferUsage::UNIFORM, vk::BufferUsageFlags::UNIFORM_BUFFER),
        (BufferUsage::STORAGE, vk::BufferUsageFlags::STORAGE_BUFFER),
        (BufferUsage::TRANSFER_SRC, vk::BufferUsageFlags::TRANSFER_SRC),
        (BufferUsage::TRANSFER_DST, vk::BufferUsageFlags::TRANSFER_DST),
    ];
    for (ours, theirs) in pairs {
        if usage.contains(ours) {
            flags |= theirs;
        }
    }
    flags
}

pub fn image_usage(usage: ImageUsage) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    let pairs = [
        (ImageUsage::SAMPLED, vk::ImageUsageFlags::SAMPLED),
        (ImageUsage::COLOR_ATTACHMENT, vk::ImageUsageFlags::COLOR_ATTACHMENT),
        (ImageUsage::DEPTH_ATTACHMENT, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT),
        (ImageUsage::INPUT_ATTACHMENT, vk::ImageUsageFlags::INPUT_ATTACHMENT),
        (ImageUsage::TRANSFER_SRC, vk::ImageUsageFlags::TRANSFER_SRC),
        (ImageUsage::TRANSFER_DST, vk::ImageUsageFlags::TRANSFER_DST),
    ];
    for (ours, theirs) in pairs {
        if usage.contains(ours) {
            flags |= theirs;
        }
    }
    flags
}

pub fn shader_stages(stages: ShaderStages) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStages::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stages.contains(ShaderStages::COMPUTE) {
        flags |= vk::ShaderStageFlags::COMPUTE;
    }
    flags
}

pub fn descriptor_type(ty: DescriptorType) -> vk::DescriptorType {
    match ty {
        DescriptorType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorType::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    }
}

pub fn image_layout(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ImageLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

/// Access mask and stage that touch an image in `layout`
pub fn layout_access(layout: ImageLayout) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        ImageLayout::Undefined => (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE),
        ImageLayout::TransferDst => (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
        ImageLayout::TransferSrc => (vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER),
        ImageLayout::ShaderReadOnly => (vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER),
        ImageLayout::ColorAttachment => (
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        ImageLayout::DepthAttachment => (
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        ),
        ImageLayout::PresentSrc => (vk::AccessFlags::empty(), vk::PipelineStageFlags::BOTTOM_OF_PIPE),
    }
}

/// Access mask and stage of a buffer access
pub fn buffer_access(access: Access) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    let shaders = vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER;
    match access {
        Access::TransferWrite => (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
        Access::TransferRead => (vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER),
        Access::VertexAttributeRead => (vk::AccessFlags::VERTEX_ATTRIBUTE_READ, vk::PipelineStageFlags::VERTEX_INPUT),
        Access::IndexRead => (vk::AccessFlags::INDEX_READ, vk::PipelineStageFlags::VERTEX_INPUT),
        Access::UniformRead => (vk::AccessFlags::UNIFORM_READ, shaders),
        Access::ShaderRead => (vk::AccessFlags::SHADER_READ, shaders),
        Access::HostRead => (vk::AccessFlags::HOST_READ, vk::PipelineStageFlags::HOST),
    }
}

pub fn pipeline_stage(stage: PipelineStage) -> vk::PipelineStageFlags {
    match stage {
        PipelineStage::TopOfPipe => vk::PipelineStageFlags::TOP_OF_PIPE,
        PipelineStage::Transfer => vk::PipelineStageFlags::TRANSFER,
        PipelineStage::ColorAttachmentOutput => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        PipelineStage::FragmentShader => vk::PipelineStageFlags::FRAGMENT_SHADER,
    }
}

pub fn aspect(aspect: ImageAspect) -> vk::ImageAspectFlags {
    match aspect {
        ImageAspect::Color => vk::ImageAspectFlags::COLOR,
        ImageAspect::Depth => vk::ImageAspectFlags::DEPTH,
    }
}

pub fn adapter_kind(device_type: vk::PhysicalDeviceType) -> AdapterKind {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => AdapterKind::Discrete,
        vk::PhysicalDeviceType::INTEGRATED_GPU => AdapterKind::Integrated,
        vk::PhysicalDeviceType::VIRTUAL_GPU => AdapterKind::Virtual,
        vk::PhysicalDeviceType::CPU => AdapterKind::Cpu,
        _ => AdapterKind::Other,
    }
}

pub fn clear_value(clear: ClearValue) -> vk::ClearValue {
    match clear {
        ClearValue::Color(float32) => vk::ClearValue { color: vk::ClearColorValue { float32 } },
        ClearValue::Depth(depth) => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
        },
    }
}

/// Vulkan timeout in nanoseconds; `None` waits forever
pub fn timeout_ns(timeout: Option<std::time::Duration>) -> u64 {
    timeout.map_or(u64::MAX, |t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX))
}

/// External dependencies of the single-subpass G-buffer pass
///
/// The color and depth attachments are shared by every frame, so the pass
/// orders its writes after both the previous frame's sampling and its
/// attachment writes, including late depth tests.
pub fn gbuffer_pass_dependencies() -> [vk::SubpassDependency; 2] {
    let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    let attachment_writes =
        vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    [
        vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(attachment_stages | vk::PipelineStageFlags::FRAGMENT_SHADER)
            .dst_stage_mask(attachment_stages)
            .src_access_mask(vk::AccessFlags::SHADER_READ | attachment_writes)
            .dst_access_mask(attachment_writes | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ)
            .build(),
        vk::SubpassDependency::builder()
            .src_subpass(0)
            .dst_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(attachment_stages)
            .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
            .src_access_mask(attachment_writes)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .build(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_device_loss_keeps_identity() {
        let err = vk_error("vkQueueSubmit")(vk::Result::ERROR_DEVICE_LOST);
        assert!(matches!(err, RenderError::DeviceLost { .. }));
        assert_eq!(vk_error("vkAcquireNextImageKHR")(vk::Result::ERROR_OUT_OF_DATE_KHR), RenderError::SwapchainOutOfDate);
        assert!(matches!(
            vk_error("vkCreateBuffer")(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            RenderError::Api { call: "vkCreateBuffer", .. }
        ));
    }

    #[test]
    fn test_formats_round_trip_known_values() {
        for ours in [Format::B8G8R8A8Srgb, Format::R16G16B16A16Sfloat, Format::D32Sfloat] {
            assert_eq!(format_from(format(ours)), ours);
        }
        assert_eq!(format_from(vk::Format::R5G6B5_UNORM_PACK16), Format::Other(vk::Format::R5G6B5_UNORM_PACK16.as_raw()));
    }

    #[test]
    fn test_window_defined_extent_is_none() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_count: 2,
            ..Default::default()
        };
        assert_eq!(surface_capabilities_from(&caps).current_extent, None);
    }

    #[test]
    fn test_usage_flags() {
        let flags = buffer_usage(BufferUsage::VERTEX | BufferUsage::TRANSFER_DST);
        assert_eq!(flags, vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST);
        assert_eq!(image_usage(ImageUsage::empty()), vk::ImageUsageFlags::empty());
    }

    #[test]
    fn test_timeouts() {
        assert_eq!(timeout_ns(None), u64::MAX);
        assert_eq!(timeout_ns(Some(Duration::from_millis(5))), 5_000_000);
    }

    #[test]
    fn test_gbuffer_pass_orders_depth_writes_across_frames() {
        let [incoming, outgoing] = gbuffer_pass_dependencies();
        assert_eq!(incoming.src_subpass, vk::SUBPASS_EXTERNAL);
        assert!(incoming.src_stage_mask.contains(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS));
        assert!(incoming.src_access_mask.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert!(incoming.src_access_mask.contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
        assert!(incoming.dst_stage_mask.contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));

        assert_eq!(outgoing.dst_subpass, vk::SUBPASS_EXTERNAL);
        assert!(outgoing.src_access_mask.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert_eq!(outgoing.dst_access_mask, vk::AccessFlags::SHADER_READ);
    }
}
