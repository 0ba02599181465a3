//! Vulkan instance, debug messenger and window surface

use crate::render::error::{RenderError, RenderResult};
use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::Surface;
use ash::{vk, Entry, Instance};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;

/// Window-system side of surface creation
///
/// Implemented by the host's window type so the core never links a
/// windowing library.
pub trait SurfaceProvider {
    /// Instance extensions the window system needs
    fn required_instance_extensions(&self) -> RenderResult<Vec<String>>;

    /// Create a presentation surface for `instance`
    fn create_surface(&mut self, instance: &Instance) -> RenderResult<vk::SurfaceKHR>;
}

/// Instance with its window surface
///
/// Dropped after every device created from it.
pub struct VulkanInstance {
    entry: Entry,
    instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    surface_loader: Surface,
    surface: vk::SurfaceKHR,
}

fn c_string(value: &str) -> RenderResult<CString> {
    CString::new(value).map_err(|e| RenderError::invalid(format!("string {value:?} contains a NUL byte: {e}")))
}

impl VulkanInstance {
    /// Load Vulkan, create the instance and the window surface
    pub fn new(window: &mut impl SurfaceProvider, app_name: &str, enable_validation: bool) -> RenderResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| RenderError::Api { call: "vkGetInstanceProcAddr", code: e.to_string() })?;

        let app_name = c_string(app_name)?;
        let engine_name = c_string("render_core")?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let required = window.required_instance_extensions()?;
        let extension_names = required.iter().map(|ext| c_string(ext)).collect::<RenderResult<Vec<_>>>()?;
        let mut extensions: Vec<*const c_char> = extension_names.iter().map(|ext| ext.as_ptr()).collect();
        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation { vec![c_string("VK_LAYER_KHRONOS_validation")?] } else { Vec::new() };
        let layers: Vec<*const c_char> = layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|e| RenderError::Api { call: "vkCreateInstance", code: format!("{e:?}") })?;

        let debug = if enable_validation {
            let utils = DebugUtils::new(&entry, &instance);
            match Self::create_messenger(&utils) {
                Ok(messenger) => Some((utils, messenger)),
                Err(e) => {
                    log::warn!("Validation requested but debug messenger failed: {e}");
                    None
                }
            }
        } else {
            None
        };

        let surface_loader = Surface::new(&entry, &instance);
        let surface = match window.create_surface(&instance) {
            Ok(surface) => surface,
            Err(e) => {
                unsafe {
                    if let Some((utils, messenger)) = &debug {
                        utils.destroy_debug_utils_messenger(*messenger, None);
                    }
                    instance.destroy_instance(None);
                }
                return Err(e);
            }
        };

        log::info!("Vulkan instance created (validation {})", if debug.is_some() { "on" } else { "off" });
        Ok(Self { entry, instance, debug, surface_loader, surface })
    }

    fn create_messenger(utils: &DebugUtils) -> RenderResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe { utils.create_debug_utils_messenger(&create_info, None) }
            .map_err(|e| RenderError::Api { call: "vkCreateDebugUtilsMessengerEXT", code: format!("{e:?}") })
    }

    /// Loader entry point
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Instance function table
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Surface extension loader
    pub fn surface_loader(&self) -> &Surface {
        &self.surface_loader
    }

    /// Window surface
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((utils, messenger)) = self.debug.take() {
                utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Routes validation messages into `log`
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}
