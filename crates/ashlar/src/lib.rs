//! # Ashlar
//!
//! Vulkan resource lifecycle and reflection-driven pipeline construction.
//!
//! ## Features
//!
//! - **Ownership**: native handles are wrapped in [`Owned`] and destroyed
//!   through their parent exactly once
//! - **Pipelines**: graphics, compute and ray tracing layouts are derived
//!   from shader reflection, with stage interface checks
//! - **Devices**: [`DeviceHandler`] selects GPUs and keeps one
//!   [`DeviceBoundElements`] bundle per logical device
//! - **Frames**: [`SynchronisationManager`] drives the acquire, record,
//!   submit and present cycle over a ring of in-flight slots
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ashlar::prelude::*;
//! use ash::vk;
//!
//! fn run(display: RawDisplayHandle, window: RawWindowHandle) -> VulkanResult<()> {
//!     let mut handler = DeviceHandler::new(RendererConfig::default(), Some(display))?;
//!     let surface = handler.create_surface(display, window)?;
//!     let device = handler.add_logical_device("main", surface)?;
//!     handler.attach_swapchain(device, vk::Extent2D { width: 1280, height: 720 })?;
//!
//!     for (file, stage) in [("triangle.vert", ShaderStage::Vertex), ("triangle.frag", ShaderStage::Fragment)] {
//!         let bytes = std::fs::read(format!("shaders/{}.spv", file))
//!             .map_err(|err| VulkanError::InvalidShader(err.to_string()))?;
//!         handler.load_shader("main", file, &bytes, stage)?;
//!     }
//!     handler
//!         .device_mut("main")?
//!         .attach_graphics_pipeline_from_cache("triangle", &["triangle.vert", "triangle.frag"], true)?;
//!
//!     let status = handler.draw_frame("main", |ctx| {
//!         let pass = ctx.begin_main_pass([0.0, 0.0, 0.0, 1.0])?;
//!         pass.draw(3, 1, 0, 0);
//!         Ok(())
//!     })?;
//!     if status.needs_recreation() {
//!         handler.recreate_swapchain("main", vk::Extent2D { width: 1280, height: 720 })?;
//!     }
//!     handler.wait_idle()
//! }
//! ```

pub mod commands;
pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod ownership;
pub mod pipeline;
pub mod shader;
pub mod slot;
pub mod swapchain;
pub mod sync;

pub use config::{Config, ConfigError, RendererConfig};
pub use device::{DeviceBoundElements, DeviceHandler, DeviceId, RecordContext};
pub use error::{VulkanError, VulkanResult};
pub use logging::{LoggingConfig, LoggingContext};
pub use ownership::{NoParent, NullableHandle, Owned, Parent};
pub use pipeline::{ComputePipeline, GraphicsPipeline, PipelineManager, RayTracingPipeline};
pub use shader::{ShaderReflection, ShaderStage, ShaderStageUnit};
pub use slot::{SlotState, VersionedSlot};
pub use sync::{FrameStatus, SynchronisationManager};

/// Common imports for crate users
pub mod prelude {
    pub use crate::{
        config::{Config, RendererConfig},
        device::{DeviceHandler, DeviceId, RecordContext},
        error::{VulkanError, VulkanResult},
        pipeline::{GraphicsPipeline, PipelineManager},
        shader::{ShaderStage, ShaderStageUnit},
        sync::FrameStatus,
    };
    pub use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
}
