//! # Physical Device Selection
//!
//! Ranks the GPUs the instance reports and finds the queue families a
//! logical device needs.
//!
//! ## Scoring
//!
//! - **Requirement**: geometry shader support, otherwise the score is 0
//! - **Tier**: discrete before integrated before everything else
//! - **Tie break**: the largest 2D image dimension, within one tier only
//!
//! ## Queue Families
//!
//! Graphics and present come from the first family that supports them.
//! Compute and transfer prefer a dedicated family and fall back to any
//! family with the capability.

use std::ffi::CStr;
use std::fmt;

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::vk;

use crate::device::instance::VulkanInstance;
use crate::device::surface::Surface;
use crate::error::{VulkanError, VulkanResult};

const DISCRETE_TIER: u64 = 3;
const INTEGRATED_TIER: u64 = 2;
const OTHER_TIER: u64 = 1;

/// Suitability score; 0 means unusable
///
/// The device type tier sits in the upper 32 bits and the largest 2D image
/// dimension in the lower 32, so any discrete GPU outranks any integrated
/// one regardless of limits, and the dimension only orders devices of the
/// same type. Geometry shader support is mandatory.
pub fn score_device(properties: &vk::PhysicalDeviceProperties, features: &vk::PhysicalDeviceFeatures) -> u64 {
    if features.geometry_shader == vk::FALSE {
        return 0;
    }
    let tier = match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => DISCRETE_TIER,
        vk::PhysicalDeviceType::INTEGRATED_GPU => INTEGRATED_TIER,
        _ => OTHER_TIER,
    };
    (tier << 32) | u64::from(properties.limits.max_image_dimension2_d)
}

/// What a queue family is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    /// Graphics command submission
    Graphics,
    /// Presentation to the surface
    Present,
    /// Compute dispatch
    Compute,
    /// Transfer operations
    Transfer,
}

impl fmt::Display for QueueRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Graphics => "graphics",
            Self::Present => "present",
            Self::Compute => "compute",
            Self::Transfer => "transfer",
        };
        f.write_str(name)
    }
}

/// Queue family index per role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// First family with graphics support
    pub graphics: Option<u32>,
    /// First family that can present to the surface
    pub present: Option<u32>,
    /// Dedicated compute family if any, else the first with compute support
    pub compute: Option<u32>,
    /// Dedicated transfer family if any, else the first with transfer support
    pub transfer: Option<u32>,
}

impl QueueFamilyIndices {
    /// Discover families; `supports_present` is queried per family index
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> VulkanResult<bool>,
    ) -> VulkanResult<Self> {
        let mut indices = Self::default();
        let with = |flags: vk::QueueFlags, without: vk::QueueFlags| {
            families
                .iter()
                .position(|family| {
                    family.queue_count > 0 && family.queue_flags.contains(flags) && !family.queue_flags.intersects(without)
                })
                .map(|index| index as u32)
        };

        indices.graphics = with(vk::QueueFlags::GRAPHICS, vk::QueueFlags::empty());
        indices.compute =
            with(vk::QueueFlags::COMPUTE, vk::QueueFlags::GRAPHICS).or_else(|| with(vk::QueueFlags::COMPUTE, vk::QueueFlags::empty()));
        // Graphics and compute queues implicitly support transfer.
        indices.transfer = with(vk::QueueFlags::TRANSFER, vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            .or_else(|| with(vk::QueueFlags::TRANSFER, vk::QueueFlags::empty()))
            .or(indices.graphics);

        for index in 0..families.len() as u32 {
            if supports_present(index)? {
                indices.present = Some(index);
                break;
            }
        }

        Ok(indices)
    }

    /// Family index for a role
    pub fn get(&self, role: QueueRole) -> Option<u32> {
        match role {
            QueueRole::Graphics => self.graphics,
            QueueRole::Present => self.present,
            QueueRole::Compute => self.compute,
            QueueRole::Transfer => self.transfer,
        }
    }

    /// Family index for a role that must exist
    pub fn require(&self, role: QueueRole) -> VulkanResult<u32> {
        self.get(role)
            .ok_or_else(|| VulkanError::InitializationFailed(format!("No {} queue family", role)))
    }

    /// Graphics and present are both available
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Distinct family indices in ascending order, one queue is created per entry
    pub fn unique(&self) -> Vec<u32> {
        let mut families: Vec<u32> =
            [self.graphics, self.present, self.compute, self.transfer].into_iter().flatten().collect();
        families.sort_unstable();
        families.dedup();
        families
    }
}

/// A physical device with the properties used for selection
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Device handle
    pub handle: vk::PhysicalDevice,
    /// Properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported features
    pub features: vk::PhysicalDeviceFeatures,
    /// Queue families
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    /// Result of [`score_device`]
    pub score: u64,
}

impl PhysicalDeviceInfo {
    /// Enumerate every physical device, best score first
    pub fn enumerate(instance: &VulkanInstance) -> VulkanResult<Vec<Self>> {
        let raw = instance.raw();
        let handles = unsafe { raw.enumerate_physical_devices().map_err(VulkanError::Api)? };

        let mut devices: Vec<Self> = handles
            .into_iter()
            .map(|handle| {
                let properties = unsafe { raw.get_physical_device_properties(handle) };
                let features = unsafe { raw.get_physical_device_features(handle) };
                let queue_families = unsafe { raw.get_physical_device_queue_family_properties(handle) };
                let score = score_device(&properties, &features);
                Self { handle, properties, features, queue_families, score }
            })
            .collect();
        devices.sort_by(|a, b| b.score.cmp(&a.score));

        for device in &devices {
            log::debug!("Found GPU '{}' ({:?}), score {}", device.name(), device.properties.device_type, device.score);
        }
        Ok(devices)
    }

    /// Device name as reported by the driver
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }.to_string_lossy().into_owned()
    }

    /// Whether every extension in `required` is available
    pub fn supports_extensions(&self, instance: &VulkanInstance, required: &[&CStr]) -> VulkanResult<bool> {
        let available = unsafe {
            instance
                .raw()
                .enumerate_device_extension_properties(self.handle)
                .map_err(VulkanError::Api)?
        };
        Ok(required.iter().all(|required| {
            available
                .iter()
                .any(|extension| unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) } == *required)
        }))
    }

    /// Queue families of this device against a surface
    pub fn queue_families_for(&self, surface: &Surface) -> VulkanResult<QueueFamilyIndices> {
        QueueFamilyIndices::find(&self.queue_families, |family| surface.supports_present(self.handle, family))
    }
}

impl fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.name())
            .field("device_type", &self.properties.device_type)
            .field("score", &self.score)
            .finish()
    }
}

/// Pick the best-scoring usable device for `surface`
///
/// `candidates` must be sorted best first, as [`PhysicalDeviceInfo::enumerate`]
/// returns them.
pub fn select_device(
    instance: &VulkanInstance,
    candidates: &[PhysicalDeviceInfo],
    surface: &Surface,
) -> VulkanResult<(PhysicalDeviceInfo, QueueFamilyIndices)> {
    for candidate in candidates.iter().filter(|candidate| candidate.score > 0) {
        let families = candidate.queue_families_for(surface)?;
        if !families.is_complete() {
            log::debug!("Skipping '{}': missing graphics or present queue family", candidate.name());
            continue;
        }
        if !candidate.supports_extensions(instance, &[SwapchainLoader::name()])? {
            log::debug!("Skipping '{}': no swapchain support", candidate.name());
            continue;
        }
        log::info!("Selected GPU: {} (score {})", candidate.name(), candidate.score);
        return Ok((candidate.clone(), families));
    }
    Err(VulkanError::NoSuitableDevice)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(device_type: vk::PhysicalDeviceType, max_2d: u32) -> vk::PhysicalDeviceProperties {
        vk::PhysicalDeviceProperties {
            device_type,
            limits: vk::PhysicalDeviceLimits { max_image_dimension2_d: max_2d, ..Default::default() },
            ..Default::default()
        }
    }

    fn geometry(enabled: bool) -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures { geometry_shader: if enabled { vk::TRUE } else { vk::FALSE }, ..Default::default() }
    }

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties { queue_flags: flags, queue_count: 1, ..Default::default() }
    }

    #[test]
    fn test_device_type_dominates_image_dimension() {
        let discrete = score_device(&properties(vk::PhysicalDeviceType::DISCRETE_GPU, 8192), &geometry(true));
        let integrated = score_device(&properties(vk::PhysicalDeviceType::INTEGRATED_GPU, 16384), &geometry(true));
        let cpu = score_device(&properties(vk::PhysicalDeviceType::CPU, u32::MAX), &geometry(true));
        assert!(discrete > integrated);
        assert!(integrated > cpu);
    }

    #[test]
    fn test_weak_discrete_still_outranks_integrated() {
        let discrete = score_device(&properties(vk::PhysicalDeviceType::DISCRETE_GPU, 1), &geometry(true));
        let integrated = score_device(&properties(vk::PhysicalDeviceType::INTEGRATED_GPU, u32::MAX), &geometry(true));
        assert!(discrete > integrated);
    }

    #[test]
    fn test_image_dimension_breaks_ties() {
        let small = score_device(&properties(vk::PhysicalDeviceType::DISCRETE_GPU, 8192), &geometry(true));
        let large = score_device(&properties(vk::PhysicalDeviceType::DISCRETE_GPU, 16384), &geometry(true));
        assert!(large > small);
    }

    #[test]
    fn test_missing_geometry_shader_zeroes_score() {
        assert_eq!(score_device(&properties(vk::PhysicalDeviceType::DISCRETE_GPU, 16384), &geometry(false)), 0);
    }

    #[test]
    fn test_queue_families_shared_graphics_present() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)];
        let indices = QueueFamilyIndices::find(&families, |_| Ok(true)).unwrap();
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(0));
        assert_eq!(indices.compute, Some(0));
        assert_eq!(indices.transfer, Some(0));
        assert!(indices.is_complete());
        assert_eq!(indices.unique(), vec![0]);
    }

    #[test]
    fn test_queue_families_prefer_dedicated() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = QueueFamilyIndices::find(&families, |index| Ok(index == 1)).unwrap();
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(1));
        assert_eq!(indices.compute, Some(1));
        assert_eq!(indices.transfer, Some(2));
        assert_eq!(indices.unique(), vec![0, 1, 2]);
        assert_eq!(indices.get(QueueRole::Present), Some(1));
    }

    #[test]
    fn test_missing_present_is_incomplete() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::find(&families, |_| Ok(false)).unwrap();
        assert!(!indices.is_complete());
        assert!(indices.require(QueueRole::Present).is_err());
    }

    #[test]
    fn test_present_query_error_propagates() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let result = QueueFamilyIndices::find(&families, |_| Err(VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR)));
        assert!(matches!(result, Err(VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR))));
    }
}
