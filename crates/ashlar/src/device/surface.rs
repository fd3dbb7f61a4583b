//! Presentation surface
//!
//! Window creation lives outside the crate; this wraps the surface the
//! window system hands over and answers the capability queries the device
//! selection and swapchain code need.

use std::sync::{Arc, Weak};

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::device::instance::VulkanInstance;
use crate::error::{VulkanError, VulkanResult};
use crate::ownership::Owned;

fn destroy_surface(instance: &VulkanInstance, surface: vk::SurfaceKHR, callbacks: Option<&vk::AllocationCallbacks>) {
    unsafe { instance.surface_loader().destroy_surface(surface, callbacks) }
}

/// Capabilities, formats and present modes of a surface on one device
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    /// Image count, extent and transform limits
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported color formats
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// A `VkSurfaceKHR` owned by its instance
pub struct Surface {
    surface: Owned<vk::SurfaceKHR, Weak<VulkanInstance>>,
    instance: Arc<VulkanInstance>,
}

impl Surface {
    /// Create a surface for a window
    pub fn new(instance: &Arc<VulkanInstance>, display: RawDisplayHandle, window: RawWindowHandle) -> VulkanResult<Self> {
        let handle = unsafe {
            ash_window::create_surface(instance.entry(), instance.raw(), display, window, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self::from_raw(instance, handle))
    }

    /// Adopt a surface created elsewhere on the same instance
    pub fn from_raw(instance: &Arc<VulkanInstance>, handle: vk::SurfaceKHR) -> Self {
        Self {
            surface: Owned::new(handle, Arc::downgrade(instance), destroy_surface),
            instance: Arc::clone(instance),
        }
    }

    /// Raw handle
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface.get()
    }

    /// Whether `family` on `physical_device` can present to this surface
    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, family: u32) -> VulkanResult<bool> {
        unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_support(physical_device, family, self.handle())
                .map_err(VulkanError::Api)
        }
    }

    /// Query everything the swapchain needs
    pub fn support(&self, physical_device: vk::PhysicalDevice) -> VulkanResult<SurfaceSupport> {
        let loader = self.instance.surface_loader();
        let surface = self.handle();
        unsafe {
            Ok(SurfaceSupport {
                capabilities: loader
                    .get_physical_device_surface_capabilities(physical_device, surface)
                    .map_err(VulkanError::Api)?,
                formats: loader
                    .get_physical_device_surface_formats(physical_device, surface)
                    .map_err(VulkanError::Api)?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(physical_device, surface)
                    .map_err(VulkanError::Api)?,
            })
        }
    }
}
