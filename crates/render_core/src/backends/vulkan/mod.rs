//! Vulkan backend built on `ash` with `vk-mem` allocations
//!
//! The host creates a [`VulkanBackend`] from its window, then hands it to
//! [`DeviceContext::initialize`](crate::render::DeviceContext::initialize),
//! which scores the adapters and opens a [`VulkanDevice`].

mod convert;

/// Logical device implementing the core device contract
pub mod device;

/// Instance, debug messenger and surface
pub mod instance;

pub use device::VulkanDevice;
pub use instance::{SurfaceProvider, VulkanInstance};

use crate::core::config::RendererConfig;
use crate::render::api::{AdapterFeatures, AdapterInfo, GpuBackend};
use crate::render::error::{RenderError, RenderResult};
use ash::extensions::khr::Swapchain;
use ash::vk;
use convert::vk_error;
use std::ffi::CStr;
use std::sync::Arc;

/// Instance-level entry point for the Vulkan backend
pub struct VulkanBackend {
    instance: Arc<VulkanInstance>,
}

impl VulkanBackend {
    /// Create the instance and window surface
    pub fn new(window: &mut impl SurfaceProvider, config: &RendererConfig) -> RenderResult<Self> {
        let instance = VulkanInstance::new(window, &config.application_name, config.validation_enabled())?;
        Ok(Self { instance: Arc::new(instance) })
    }

    /// Shared instance
    pub fn instance(&self) -> &Arc<VulkanInstance> {
        &self.instance
    }

    fn physical_devices(&self) -> RenderResult<Vec<vk::PhysicalDevice>> {
        unsafe { self.instance.instance().enumerate_physical_devices() }
            .map_err(vk_error("vkEnumeratePhysicalDevices"))
    }

    /// First queue family offering both graphics and presentation
    fn graphics_present_family(&self, device: vk::PhysicalDevice) -> RenderResult<Option<u32>> {
        let families = unsafe {
            self.instance
                .instance()
                .get_physical_device_queue_family_properties(device)
        };

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            if !family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                continue;
            }
            let present_support = unsafe {
                self.instance
                    .surface_loader()
                    .get_physical_device_surface_support(device, index, self.instance.surface())
            }
            .map_err(vk_error("vkGetPhysicalDeviceSurfaceSupportKHR"))?;
            if present_support {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    fn supports_swapchain(&self, device: vk::PhysicalDevice) -> RenderResult<bool> {
        let extensions = unsafe {
            self.instance
                .instance()
                .enumerate_device_extension_properties(device)
        }
        .map_err(vk_error("vkEnumerateDeviceExtensionProperties"))?;

        Ok(extensions.iter().any(|available| {
            let name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
            name == Swapchain::name()
        }))
    }
}

impl GpuBackend for VulkanBackend {
    type Device = VulkanDevice;

    fn enumerate_adapters(&self) -> RenderResult<Vec<AdapterInfo>> {
        let instance = self.instance.instance();
        let mut adapters = Vec::new();

        for (index, device) in self.physical_devices()?.into_iter().enumerate() {
            let properties = unsafe { instance.get_physical_device_properties(device) };
            let features = unsafe { instance.get_physical_device_features(device) };
            let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
                .to_string_lossy()
                .into_owned();

            // No swapchain means no presentation, whatever the queues say
            let graphics_present_family = if self.supports_swapchain(device)? {
                self.graphics_present_family(device)?
            } else {
                log::debug!("{name} lacks {}", Swapchain::name().to_string_lossy());
                None
            };

            adapters.push(AdapterInfo {
                index,
                name,
                kind: convert::adapter_kind(properties.device_type),
                graphics_present_family,
                features: AdapterFeatures {
                    sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
                    independent_blend: features.independent_blend == vk::TRUE,
                    fill_mode_non_solid: features.fill_mode_non_solid == vk::TRUE,
                    geometry_shader: features.geometry_shader == vk::TRUE,
                    max_color_attachments: properties.limits.max_color_attachments,
                    max_image_dimension_2d: properties.limits.max_image_dimension2_d,
                },
            });
        }

        Ok(adapters)
    }

    fn open_device(&self, adapter: &AdapterInfo) -> RenderResult<VulkanDevice> {
        let family = adapter.graphics_present_family.ok_or(RenderError::NoSuitableDevice)?;
        let physical_device = self
            .physical_devices()?
            .get(adapter.index)
            .copied()
            .ok_or(RenderError::NoSuitableDevice)?;

        let priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(family)
            .queue_priorities(&priorities)
            .build()];
        let extensions = [Swapchain::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(adapter.features.sampler_anisotropy)
            .independent_blend(adapter.features.independent_blend)
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe {
            self.instance
                .instance()
                .create_device(physical_device, &create_info, None)
        }
        .map_err(vk_error("vkCreateDevice"))?;

        log::info!("Opened {} (queue family {family})", adapter.name);
        Ok(VulkanDevice::new(
            Arc::clone(&self.instance),
            adapter.clone(),
            physical_device,
            device,
            family,
        ))
    }
}
