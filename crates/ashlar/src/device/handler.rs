//! # Device Handler
//!
//! Top-level owner of the Vulkan instance and every logical device. Creating
//! the handler installs logging, creates the instance and ranks the physical
//! devices; logical devices are then added one at a time against a surface.
//!
//! ## Addressing
//!
//! Devices are registered by name and can be looked up either by that name
//! or by their registration index through [`DeviceId`]. Names are unique.
//!
//! ## Teardown
//!
//! Devices are released in reverse creation order, and the instance only
//! after every device is gone.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::config::RendererConfig;
use crate::device::elements::{DeviceBoundElements, RecordContext};
use crate::device::instance::VulkanInstance;
use crate::device::physical::{select_device, PhysicalDeviceInfo};
use crate::device::surface::Surface;
use crate::error::{VulkanError, VulkanResult};
use crate::logging::LoggingContext;
use crate::shader::{ShaderStage, ShaderStageUnit};
use crate::sync::FrameStatus;

/// Reference to a registered device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceId<'a> {
    /// Registration index
    Index(usize),
    /// Registration name
    Name(&'a str),
}

impl From<usize> for DeviceId<'_> {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl<'a> From<&'a str> for DeviceId<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

impl fmt::Display for DeviceId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "#{}", index),
            Self::Name(name) => write!(f, "'{}'", name),
        }
    }
}

/// Name and index bookkeeping for registered devices
#[derive(Debug, Default, Clone)]
pub struct DeviceDirectory {
    names: Vec<String>,
    by_name: HashMap<String, usize>,
}

impl DeviceDirectory {
    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Reserve the next index for `name`; fails if the name is taken
    pub fn register(&mut self, name: &str) -> VulkanResult<usize> {
        if self.contains(name) {
            return Err(VulkanError::InitializationFailed(format!("a device named '{}' already exists", name)));
        }
        let index = self.names.len();
        self.names.push(name.to_string());
        self.by_name.insert(name.to_string(), index);
        Ok(index)
    }

    /// Index of `id`
    pub fn resolve(&self, id: DeviceId<'_>) -> VulkanResult<usize> {
        let index = match id {
            DeviceId::Index(index) => Some(index).filter(|&index| index < self.names.len()),
            DeviceId::Name(name) => self.by_name.get(name).copied(),
        };
        index.ok_or_else(|| VulkanError::DeviceNotFound(id.to_string()))
    }

    /// Names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Number of registered devices
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no device is registered
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Owns the instance, the physical device list and all device bundles
pub struct DeviceHandler {
    devices: Vec<DeviceBoundElements>,
    directory: DeviceDirectory,
    physical_devices: Vec<PhysicalDeviceInfo>,
    config: RendererConfig,
    logging: LoggingContext,
    instance: Arc<VulkanInstance>,
}

impl DeviceHandler {
    /// Install logging, create the instance and enumerate GPUs
    ///
    /// `display` selects the window-system surface extensions; pass `None`
    /// for headless use.
    pub fn new(config: RendererConfig, display: Option<RawDisplayHandle>) -> VulkanResult<Self> {
        let logging = LoggingContext::init(&config.logging);
        Self::with_logging(config, display, logging)
    }

    /// Like [`Self::new`], with logging already set up by the host
    pub fn with_logging(
        config: RendererConfig,
        display: Option<RawDisplayHandle>,
        logging: LoggingContext,
    ) -> VulkanResult<Self> {
        config.validate()?;
        let instance = Arc::new(VulkanInstance::new(&config, display)?);
        let physical_devices = PhysicalDeviceInfo::enumerate(&instance)?;
        if physical_devices.is_empty() {
            log::warn!("No Vulkan physical devices found");
        }

        Ok(Self {
            devices: Vec::new(),
            directory: DeviceDirectory::default(),
            physical_devices,
            config,
            logging,
            instance,
        })
    }

    /// Vulkan instance
    pub fn instance(&self) -> &Arc<VulkanInstance> {
        &self.instance
    }

    /// Active configuration
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Logging sink state
    pub fn logging(&self) -> &LoggingContext {
        &self.logging
    }

    /// Physical devices, best score first
    pub fn physical_devices(&self) -> &[PhysicalDeviceInfo] {
        &self.physical_devices
    }

    /// Create a surface for a window on this handler's instance
    pub fn create_surface(&self, display: RawDisplayHandle, window: RawWindowHandle) -> VulkanResult<Arc<Surface>> {
        Surface::new(&self.instance, display, window).map(Arc::new)
    }

    /// Create a logical device on the best GPU that can present to `surface`
    ///
    /// Returns the device's index.
    pub fn add_logical_device(&mut self, name: &str, surface: Arc<Surface>) -> VulkanResult<usize> {
        if self.directory.contains(name) {
            return Err(VulkanError::InitializationFailed(format!("a device named '{}' already exists", name)));
        }
        let (physical, families) = select_device(&self.instance, &self.physical_devices, &surface)?;
        let elements = DeviceBoundElements::new(name, &self.instance, physical, families, surface, &self.config)?;

        let index = self.directory.register(name)?;
        self.devices.push(elements);
        Ok(index)
    }

    /// Device bundle by index or name
    pub fn device<'a>(&self, id: impl Into<DeviceId<'a>>) -> VulkanResult<&DeviceBoundElements> {
        let index = self.directory.resolve(id.into())?;
        self.devices.get(index).ok_or_else(|| VulkanError::DeviceNotFound(index.to_string()))
    }

    /// Mutable device bundle by index or name
    pub fn device_mut<'a>(&mut self, id: impl Into<DeviceId<'a>>) -> VulkanResult<&mut DeviceBoundElements> {
        let index = self.directory.resolve(id.into())?;
        self.devices.get_mut(index).ok_or_else(|| VulkanError::DeviceNotFound(index.to_string()))
    }

    /// Registered device names in index order
    pub fn device_names(&self) -> impl Iterator<Item = &str> {
        self.directory.names()
    }

    /// Number of logical devices
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Create the device's swapchain
    pub fn attach_swapchain<'a>(&mut self, id: impl Into<DeviceId<'a>>, extent: vk::Extent2D) -> VulkanResult<()> {
        self.device_mut(id)?.attach_swapchain(extent)
    }

    /// Build and register a graphics pipeline on the device
    pub fn attach_graphics_pipeline<'a>(
        &mut self,
        id: impl Into<DeviceId<'a>>,
        name: &str,
        units: &[ShaderStageUnit],
        main: bool,
    ) -> VulkanResult<()> {
        self.device_mut(id)?.attach_graphics_pipeline(name, units, main).map(|_| ())
    }

    /// Build and register a compute pipeline on the device
    pub fn attach_compute_pipeline<'a>(
        &mut self,
        id: impl Into<DeviceId<'a>>,
        name: &str,
        units: &[ShaderStageUnit],
        main: bool,
    ) -> VulkanResult<()> {
        self.device_mut(id)?.attach_compute_pipeline(name, units, main).map(|_| ())
    }

    /// Load a SPIR-V binary into the device's shader cache
    pub fn load_shader<'a>(
        &mut self,
        id: impl Into<DeviceId<'a>>,
        name: &str,
        bytes: &[u8],
        stage: ShaderStage,
    ) -> VulkanResult<()> {
        self.device_mut(id)?.load_shader(name, bytes, stage).map(|_| ())
    }

    /// Rebuild the device's swapchain at `extent`
    pub fn recreate_swapchain<'a>(&mut self, id: impl Into<DeviceId<'a>>, extent: vk::Extent2D) -> VulkanResult<()> {
        self.device_mut(id)?.recreate_swapchain(extent)
    }

    /// Tell the device the surface was resized
    pub fn notify_resized<'a>(&mut self, id: impl Into<DeviceId<'a>>) -> VulkanResult<()> {
        self.device_mut(id)?.notify_resized();
        Ok(())
    }

    /// Run one frame on the device
    pub fn draw_frame<'a, F>(&mut self, id: impl Into<DeviceId<'a>>, record: F) -> VulkanResult<FrameStatus>
    where
        F: FnOnce(&RecordContext<'_>) -> VulkanResult<()>,
    {
        self.device_mut(id)?.draw_frame(record)
    }

    /// Wait until every device is idle
    pub fn wait_idle(&self) -> VulkanResult<()> {
        self.devices.iter().try_for_each(DeviceBoundElements::wait_idle)
    }
}

impl Drop for DeviceHandler {
    fn drop(&mut self) {
        // Later devices first, the reverse of creation.
        while let Some(device) = self.devices.pop() {
            drop(device);
        }
        log::debug!("Device handler released");
    }
}
