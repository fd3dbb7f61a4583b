//! Logical device and its queues
//!
//! [`DeviceShared`] is the parent of every device child. It lives in an
//! `Arc`; children hold a `Weak` to it through [`DeviceChild`], so a child
//! dropped after the device is gone skips its destroy call.

use std::sync::{Arc, Weak};

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};

use crate::device::instance::VulkanInstance;
use crate::device::physical::{PhysicalDeviceInfo, QueueFamilyIndices, QueueRole};
use crate::error::{VulkanError, VulkanResult};
use crate::ownership::{DestroyFn, Owned};

/// A handle created from a [`DeviceShared`]
pub type DeviceChild<H> = Owned<H, Weak<DeviceShared>>;

/// Owner of a `VkDevice`, destroyed when the last `Arc` goes away
pub struct DeviceShared {
    device: Device,
    swapchain_loader: SwapchainLoader,
    physical_device: vk::PhysicalDevice,
    instance: Arc<VulkanInstance>,
}

impl DeviceShared {
    /// Create the logical device with one queue per distinct family
    pub fn new(
        instance: &Arc<VulkanInstance>,
        physical: &PhysicalDeviceInfo,
        families: &QueueFamilyIndices,
    ) -> VulkanResult<Arc<Self>> {
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extensions = [SwapchainLoader::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::builder().geometry_shader(true);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .raw()
                .create_device(physical.handle, &create_info, None)
                .map_err(VulkanError::Api)?
        };
        let swapchain_loader = SwapchainLoader::new(instance.raw(), &device);
        log::debug!("Logical device created on '{}' with {} queue(s)", physical.name(), queue_infos.len());

        Ok(Arc::new(Self {
            device,
            swapchain_loader,
            physical_device: physical.handle,
            instance: Arc::clone(instance),
        }))
    }

    /// Device function table
    pub fn raw(&self) -> &Device {
        &self.device
    }

    /// `VK_KHR_swapchain` function table
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.swapchain_loader
    }

    /// Physical device the logical device was created on
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Instance the device belongs to
    pub fn instance(&self) -> &Arc<VulkanInstance> {
        &self.instance
    }

    /// Block until all queues are idle
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device_wait_idle().map_err(VulkanError::Api) }
    }

    /// Wrap a freshly created handle so it is destroyed through this device
    pub fn own<H>(self: &Arc<Self>, handle: H, destroy: DestroyFn<H, Weak<DeviceShared>>) -> DeviceChild<H>
    where
        H: crate::ownership::NullableHandle,
    {
        Owned::new(handle, Arc::downgrade(self), destroy)
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                log::warn!("device_wait_idle failed during teardown: {:?}", err);
            }
            self.device.destroy_device(None);
        }
        log::debug!("Logical device destroyed");
    }
}

/// Queues fetched from the device, one per role
#[derive(Debug, Clone, Copy)]
pub struct Queues {
    /// Graphics queue
    pub graphics: vk::Queue,
    /// Present queue, possibly the same as `graphics`
    pub present: vk::Queue,
    /// Compute queue
    pub compute: vk::Queue,
    /// Transfer queue
    pub transfer: vk::Queue,
}

impl Queues {
    /// Fetch queue 0 of each role's family
    pub fn fetch(device: &DeviceShared, families: &QueueFamilyIndices) -> VulkanResult<Self> {
        let queue = |role: QueueRole| -> VulkanResult<vk::Queue> {
            let family = families.require(role)?;
            Ok(unsafe { device.raw().get_device_queue(family, 0) })
        };
        let graphics = queue(QueueRole::Graphics)?;
        Ok(Self {
            graphics,
            present: queue(QueueRole::Present)?,
            compute: queue(QueueRole::Compute).unwrap_or(graphics),
            transfer: queue(QueueRole::Transfer).unwrap_or(graphics),
        })
    }
}

macro_rules! destroy_through_device {
    ($($name:ident: $handle:ty => $method:ident;)*) => {
        $(
            pub(crate) fn $name(device: &DeviceShared, handle: $handle, callbacks: Option<&vk::AllocationCallbacks>) {
                unsafe { device.raw().$method(handle, callbacks) }
            }
        )*
    };
}

/// Destroy functions for [`DeviceChild`] handles
pub(crate) mod destroy {
    use super::*;

    destroy_through_device! {
        pipeline: vk::Pipeline => destroy_pipeline;
        pipeline_layout: vk::PipelineLayout => destroy_pipeline_layout;
        descriptor_set_layout: vk::DescriptorSetLayout => destroy_descriptor_set_layout;
        render_pass: vk::RenderPass => destroy_render_pass;
        shader_module: vk::ShaderModule => destroy_shader_module;
        framebuffer: vk::Framebuffer => destroy_framebuffer;
        image_view: vk::ImageView => destroy_image_view;
        semaphore: vk::Semaphore => destroy_semaphore;
        fence: vk::Fence => destroy_fence;
        command_pool: vk::CommandPool => destroy_command_pool;
    }

    pub(crate) fn swapchain(device: &DeviceShared, handle: vk::SwapchainKHR, callbacks: Option<&vk::AllocationCallbacks>) {
        unsafe { device.swapchain_loader().destroy_swapchain(handle, callbacks) }
    }
}
