//! Instance, GPU selection, logical devices and the per-device bundle

pub mod elements;
pub mod handler;
pub mod instance;
pub mod logical;
pub mod physical;
pub mod surface;

pub use elements::{DeviceBoundElements, RecordContext};
pub use handler::{DeviceDirectory, DeviceHandler, DeviceId};
pub use instance::VulkanInstance;
pub use logical::{DeviceChild, DeviceShared, Queues};
pub use physical::{score_device, select_device, PhysicalDeviceInfo, QueueFamilyIndices, QueueRole};
pub use surface::{Surface, SurfaceSupport};
