//! Swapchain, its image views and the framebuffers rendered into them
//!
//! Surface format, present mode, extent and image count are chosen by the
//! free functions below, which keeps those rules testable without a device.
//! Recreation hands the old swapchain to the driver as `old_swapchain` and
//! leaves framebuffers to be rebuilt against the main render pass.

use std::sync::Arc;

use ash::prelude::VkResult;
use ash::vk;

use crate::device::logical::{destroy, DeviceChild, DeviceShared};
use crate::device::surface::{Surface, SurfaceSupport};
use crate::error::{VulkanError, VulkanResult};
use crate::pipeline::graphics::RenderTarget;

/// Prefer sRGB BGRA, else whatever the surface lists first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// MAILBOX when preferred and available, otherwise FIFO (always supported)
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], prefer_mailbox: bool) -> vk::PresentModeKHR {
    if prefer_mailbox && modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Surface extent if fixed, else the window extent clamped to the limits
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, window: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: window
            .width
            .clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
        height: window
            .height
            .clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
    }
}

/// One more than the minimum, capped by the maximum (0 = unbounded)
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        wanted.min(capabilities.max_image_count)
    } else {
        wanted
    }
}

/// Swapchain plus per-image views and framebuffers
pub struct Swapchain {
    framebuffers: Vec<DeviceChild<vk::Framebuffer>>,
    image_views: Vec<DeviceChild<vk::ImageView>>,
    swapchain: DeviceChild<vk::SwapchainKHR>,
    images: Vec<vk::Image>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    device: Arc<DeviceShared>,
}

impl Swapchain {
    /// Create a swapchain for `surface` sized to `window_extent`
    pub fn new(
        device: &Arc<DeviceShared>,
        surface: &Surface,
        window_extent: vk::Extent2D,
        prefer_mailbox: bool,
    ) -> VulkanResult<Self> {
        Self::create(device, surface, window_extent, prefer_mailbox, vk::SwapchainKHR::null())
    }

    /// Replace this swapchain with one sized to `window_extent`
    ///
    /// The caller must make sure the GPU no longer uses the old images.
    /// Framebuffers are dropped and have to be rebuilt with
    /// [`Swapchain::create_framebuffers`].
    pub fn recreate(&mut self, surface: &Surface, window_extent: vk::Extent2D, prefer_mailbox: bool) -> VulkanResult<()> {
        let replacement =
            Self::create(&self.device, surface, window_extent, prefer_mailbox, self.swapchain.get())?;
        log::debug!(
            "Swapchain recreated: {}x{} -> {}x{}",
            self.extent.width,
            self.extent.height,
            replacement.extent.width,
            replacement.extent.height
        );
        *self = replacement;
        Ok(())
    }

    fn create(
        device: &Arc<DeviceShared>,
        surface: &Surface,
        window_extent: vk::Extent2D,
        prefer_mailbox: bool,
        old_swapchain: vk::SwapchainKHR,
    ) -> VulkanResult<Self> {
        let SurfaceSupport { capabilities, formats, present_modes } = surface.support(device.physical_device())?;

        let format = choose_surface_format(&formats)
            .ok_or_else(|| VulkanError::InitializationFailed("Surface reports no formats".to_string()))?;
        let present_mode = choose_present_mode(&present_modes, prefer_mailbox);
        let extent = choose_extent(&capabilities, window_extent);
        if extent.width == 0 || extent.height == 0 {
            return Err(VulkanError::InitializationFailed("Cannot create a zero-sized swapchain".to_string()));
        }
        let image_count = choose_image_count(&capabilities);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe {
            device
                .swapchain_loader()
                .create_swapchain(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        let swapchain = device.own(swapchain, destroy::swapchain);

        let images = unsafe {
            device
                .swapchain_loader()
                .get_swapchain_images(swapchain.get())
                .map_err(VulkanError::Api)?
        };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { device.raw().create_image_view(&create_info, None).map_err(VulkanError::Api)? };
            image_views.push(device.own(view, destroy::image_view));
        }

        log::info!(
            "Swapchain created: {} images, {}x{}, {:?}, {:?}",
            images.len(),
            extent.width,
            extent.height,
            format.format,
            present_mode
        );

        Ok(Self {
            framebuffers: Vec::new(),
            image_views,
            swapchain,
            images,
            format,
            extent,
            present_mode,
            device: Arc::clone(device),
        })
    }

    /// Build one framebuffer per image for `render_pass`, replacing any existing ones
    ///
    /// Existing framebuffers may be referenced by frames in flight, so the
    /// device is waited idle before they are destroyed.
    pub fn create_framebuffers(&mut self, render_pass: vk::RenderPass) -> VulkanResult<()> {
        if !self.framebuffers.is_empty() {
            self.device.wait_idle()?;
        }
        self.framebuffers.clear();
        let mut framebuffers = Vec::with_capacity(self.image_views.len());
        for view in &self.image_views {
            let attachments = [view.get()];
            let create_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);
            let framebuffer =
                unsafe { self.device.raw().create_framebuffer(&create_info, None).map_err(VulkanError::Api)? };
            framebuffers.push(self.device.own(framebuffer, destroy::framebuffer));
        }
        self.framebuffers = framebuffers;
        Ok(())
    }

    /// Request the next image; `Ok((index, suboptimal))` or the raw result
    pub fn acquire_next_image(&self, timeout: u64, signal: vk::Semaphore) -> VkResult<(u32, bool)> {
        unsafe {
            self.device
                .swapchain_loader()
                .acquire_next_image(self.swapchain.get(), timeout, signal, vk::Fence::null())
        }
    }

    /// Queue `image_index` for presentation; `Ok(true)` means suboptimal
    pub fn present(&self, queue: vk::Queue, wait: vk::Semaphore, image_index: u32) -> VkResult<bool> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain.get()];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        unsafe { self.device.swapchain_loader().queue_present(queue, &present_info) }
    }

    /// Swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain.get()
    }

    /// Image format and color space
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Image extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Present mode in use
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Number of images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Format and extent a graphics pipeline renders at
    pub fn render_target(&self) -> RenderTarget {
        RenderTarget { format: self.format.format, extent: self.extent }
    }

    /// Framebuffer for `image_index`, null before [`Swapchain::create_framebuffers`]
    pub fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.framebuffers
            .get(image_index as usize)
            .map_or_else(vk::Framebuffer::null, |framebuffer| framebuffer.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            min_image_extent: vk::Extent2D { width: min.0, height: min.1 },
            max_image_extent: vk::Extent2D { width: max.0, height: max.1 },
            min_image_count: 2,
            max_image_count: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_prefers_srgb_bgra() {
        let formats = [
            vk::SurfaceFormatKHR { format: vk::Format::R8G8B8A8_UNORM, color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR },
            vk::SurfaceFormatKHR { format: vk::Format::B8G8R8A8_SRGB, color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR },
        ];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(choose_surface_format(&formats[..1]).unwrap().format, vk::Format::R8G8B8A8_UNORM);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&modes[..1], true), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_extent_clamped_when_surface_is_flexible() {
        let caps = capabilities((u32::MAX, u32::MAX), (100, 100), (1920, 1080));
        let extent = choose_extent(&caps, vk::Extent2D { width: 4000, height: 50 });
        assert_eq!((extent.width, extent.height), (1920, 100));

        let fixed = capabilities((800, 600), (1, 1), (4096, 4096));
        let extent = choose_extent(&fixed, vk::Extent2D { width: 10, height: 10 });
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn test_image_count_respects_maximum() {
        let mut caps = capabilities((1, 1), (1, 1), (1, 1));
        assert_eq!(choose_image_count(&caps), 3);
        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);
        caps.max_image_count = 0;
        assert_eq!(choose_image_count(&caps), 3);
    }
}
