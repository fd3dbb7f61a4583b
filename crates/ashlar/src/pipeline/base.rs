//! State shared by every pipeline variant

use std::ffi::CString;
use std::sync::{Arc, Weak};

use ash::vk;

use crate::device::logical::{destroy, DeviceChild, DeviceShared};
use crate::error::{VulkanError, VulkanResult};
use crate::ownership::Parent;
use crate::pipeline::layout::PipelineLayout;
use crate::shader::ShaderStageUnit;

/// Shader module plus the entry point name the stage info points at
///
/// Must outlive the pipeline create call that uses [`ShaderModule::stage_info`].
pub struct ShaderModule {
    module: DeviceChild<vk::ShaderModule>,
    entry_point: CString,
    stage: vk::ShaderStageFlags,
}

impl ShaderModule {
    /// Create a module from a unit's SPIR-V words
    pub fn new(device: &Arc<DeviceShared>, unit: &ShaderStageUnit) -> VulkanResult<Self> {
        let entry_point = CString::new(unit.entry_point()).map_err(|_| {
            VulkanError::InvalidShader(format!("'{}' has an entry point name containing NUL", unit.name()))
        })?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(unit.code());
        let module = unsafe { device.raw().create_shader_module(&create_info, None).map_err(VulkanError::Api)? };
        log::trace!("Shader module created for '{}' ({} bytes)", unit.name(), unit.code_size());
        Ok(Self { module: device.own(module, destroy::shader_module), entry_point, stage: unit.stage().to_vk() })
    }

    /// Create one module per unit, in order
    pub fn for_units<'a>(
        device: &Arc<DeviceShared>,
        units: impl IntoIterator<Item = &'a ShaderStageUnit>,
    ) -> VulkanResult<Vec<Self>> {
        units.into_iter().map(|unit| Self::new(device, unit)).collect()
    }

    /// Stage create info borrowing this module
    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(self.stage)
            .module(self.module.get())
            .name(&self.entry_point)
            .build()
    }
}

/// Native pipeline and its layout
///
/// The pipeline is declared first so it is destroyed before its layout.
pub struct PipelineBase {
    pipeline: DeviceChild<vk::Pipeline>,
    layout: PipelineLayout,
    bind_point: vk::PipelineBindPoint,
    name: String,
}

impl PipelineBase {
    /// Take ownership of a freshly created pipeline
    pub fn new(
        device: &Arc<DeviceShared>,
        name: impl Into<String>,
        pipeline: vk::Pipeline,
        layout: PipelineLayout,
        bind_point: vk::PipelineBindPoint,
    ) -> Self {
        Self { pipeline: device.own(pipeline, destroy::pipeline), layout, bind_point, name: name.into() }
    }

    /// Pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline.get()
    }

    /// Layout the pipeline was created with
    pub fn layout(&self) -> &PipelineLayout {
        &self.layout
    }

    /// Graphics, compute or ray tracing
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    /// Registry name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `f` with the device that owns the pipeline
    pub(crate) fn with_device<R>(&self, f: impl FnOnce(&DeviceShared) -> R) -> VulkanResult<R> {
        let parent: &Weak<DeviceShared> = self.pipeline.parent();
        parent
            .with_live(f)
            .ok_or_else(|| VulkanError::DeviceNotFound(format!("device of pipeline '{}' was destroyed", self.name)))
    }

    /// Record `vkCmdBindPipeline`
    pub fn bind(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.with_device(|device| unsafe {
            device.raw().cmd_bind_pipeline(command_buffer, self.bind_point, self.handle());
        })
    }
}
