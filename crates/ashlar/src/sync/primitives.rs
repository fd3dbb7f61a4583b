//! Semaphores, fences and the per-slot bundle built from them

use std::sync::Arc;

use ash::vk;

use crate::device::logical::{destroy, DeviceChild, DeviceShared};
use crate::error::{VulkanError, VulkanResult};

/// Binary semaphore for GPU-GPU ordering
pub struct Semaphore {
    semaphore: DeviceChild<vk::Semaphore>,
}

impl Semaphore {
    /// Create an unsignaled semaphore
    pub fn new(device: &Arc<DeviceShared>) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe { device.raw().create_semaphore(&create_info, None).map_err(VulkanError::Api)? };
        Ok(Self { semaphore: device.own(semaphore, destroy::semaphore) })
    }

    /// Semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore.get()
    }
}

/// Fence for CPU-GPU ordering
pub struct Fence {
    fence: DeviceChild<vk::Fence>,
}

impl Fence {
    /// Create a fence, optionally already signaled
    pub fn new(device: &Arc<DeviceShared>, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { device.raw().create_fence(&create_info, None).map_err(VulkanError::Api)? };
        Ok(Self { fence: device.own(fence, destroy::fence) })
    }

    /// Block until signaled or `timeout` nanoseconds pass
    pub fn wait(&self, device: &DeviceShared, timeout: u64) -> VulkanResult<()> {
        unsafe { device.raw().wait_for_fences(&[self.handle()], true, timeout).map_err(VulkanError::Api) }
    }

    /// Return to the unsignaled state
    pub fn reset(&self, device: &DeviceShared) -> VulkanResult<()> {
        unsafe { device.raw().reset_fences(&[self.handle()]).map_err(VulkanError::Api) }
    }

    /// Fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence.get()
    }
}

/// Sync objects of one in-flight slot
pub struct FrameSyncObject {
    /// Signaled when the swapchain image is ready to be rendered to
    pub image_acquired: Semaphore,
    /// Signaled when rendering finished, waited on by presentation
    pub render_finished: Semaphore,
    /// Signaled when the slot's submission retired; created signaled
    pub frame_complete: Fence,
}

impl FrameSyncObject {
    /// Create the bundle with the fence already signaled
    pub fn new(device: &Arc<DeviceShared>) -> VulkanResult<Self> {
        Ok(Self {
            image_acquired: Semaphore::new(device)?,
            render_finished: Semaphore::new(device)?,
            frame_complete: Fence::new(device, true)?,
        })
    }
}
