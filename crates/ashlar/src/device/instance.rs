//! Vulkan loader and instance
//!
//! The instance is shared through an `Arc`; surfaces and logical devices keep
//! it alive, and their handles refer back to it weakly.

use std::ffi::{c_char, CStr, CString};

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::Surface as SurfaceLoader;
use ash::{vk, Entry, Instance};
use raw_window_handle::RawDisplayHandle;

use crate::config::RendererConfig;
use crate::error::{VulkanError, VulkanResult};

const VALIDATION_LAYER: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };
const ENGINE_NAME: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"ashlar\0") };

/// Vulkan instance with its loader and extension tables
pub struct VulkanInstance {
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    surface_loader: SurfaceLoader,
    instance: Instance,
    entry: Entry,
}

impl VulkanInstance {
    /// Load Vulkan and create an instance
    ///
    /// `display` selects the window-system surface extensions; pass `None` for
    /// headless use.
    pub fn new(config: &RendererConfig, display: Option<RawDisplayHandle>) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {}", e)))?;

        let app_name = CString::new(config.application_name.as_str())
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid application name: {}", e)))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(ENGINE_NAME)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        let mut extensions: Vec<*const c_char> = match display {
            Some(display) => ash_window::enumerate_required_extensions(display)
                .map_err(VulkanError::Api)?
                .to_vec(),
            None => Vec::new(),
        };

        let validation = config.enable_validation && Self::has_validation_layer(&entry)?;
        if config.enable_validation && !validation {
            log::warn!("Validation requested but {} is not installed", VALIDATION_LAYER.to_string_lossy());
        }
        if validation {
            extensions.push(DebugUtils::name().as_ptr());
        }
        let layers: Vec<*const c_char> = if validation { vec![VALIDATION_LAYER.as_ptr()] } else { Vec::new() };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None).map_err(VulkanError::Api)? };

        let debug = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(err) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(err);
                }
            }
        } else {
            None
        };

        let surface_loader = SurfaceLoader::new(&entry, &instance);
        log::info!(
            "Vulkan instance created for '{}' (validation {})",
            config.application_name,
            if validation { "on" } else { "off" }
        );

        Ok(Self { debug, surface_loader, instance, entry })
    }

    fn has_validation_layer(entry: &Entry) -> VulkanResult<bool> {
        let layers = entry.enumerate_instance_layer_properties().map_err(VulkanError::Api)?;
        Ok(layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER))
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
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

        unsafe { debug_utils.create_debug_utils_messenger(&create_info, None).map_err(VulkanError::Api) }
    }

    /// Loader entry points
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Instance function table
    pub fn raw(&self) -> &Instance {
        &self.instance
    }

    /// `VK_KHR_surface` function table
    pub fn surface_loader(&self) -> &SurfaceLoader {
        &self.surface_loader
    }

    /// Whether validation messages are routed to the log
    pub fn validation_enabled(&self) -> bool {
        self.debug.is_some()
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        log::debug!("Vulkan instance destroyed");
    }
}

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
        log::error!(target: "vulkan", "{:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!(target: "vulkan", "{:?} - {}", message_type, message);
    } else {
        log::debug!(target: "vulkan", "{:?} - {}", message_type, message);
    }

    vk::FALSE
}
