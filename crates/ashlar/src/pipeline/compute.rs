//! Compute pipeline

use std::sync::Arc;

use ash::vk;

use crate::device::logical::DeviceShared;
use crate::error::{VulkanError, VulkanResult};
use crate::pipeline::base::{PipelineBase, ShaderModule};
use crate::pipeline::layout::PipelineLayoutDescription;
use crate::shader::{ShaderStage, ShaderStageUnit};

/// First compute unit of `units`
pub fn select_compute_stage(units: &[ShaderStageUnit]) -> VulkanResult<&ShaderStageUnit> {
    let mut compute = units.iter().filter(|unit| unit.stage() == ShaderStage::Compute);
    let selected = compute
        .next()
        .ok_or(VulkanError::MissingShaderStage { pipeline: "compute", stage: ShaderStage::Compute.name() })?;
    for ignored in compute {
        log::warn!("Ignoring extra compute shader '{}', using '{}'", ignored.name(), selected.name());
    }
    Ok(selected)
}

/// Single-stage compute pipeline
pub struct ComputePipeline {
    base: PipelineBase,
    shader: String,
}

impl ComputePipeline {
    /// Build from the compute unit among `units`
    pub fn new(device: &Arc<DeviceShared>, name: impl Into<String>, units: &[ShaderStageUnit]) -> VulkanResult<Self> {
        let name = name.into();
        let unit = select_compute_stage(units)?;
        let layout = PipelineLayoutDescription::from_units([unit]).build(device)?;
        let module = ShaderModule::new(device, unit)?;

        let create_info = vk::ComputePipelineCreateInfo::builder()
            .stage(module.stage_info())
            .layout(layout.handle());

        let pipelines = unsafe {
            device
                .raw()
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info.build()], None)
                .map_err(|(_, err)| VulkanError::Api(err))?
        };
        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InitializationFailed("Driver returned no compute pipeline".to_string()))?;

        log::debug!("Compute pipeline '{}' created from '{}'", name, unit.name());
        Ok(Self {
            base: PipelineBase::new(device, name, pipeline, layout, vk::PipelineBindPoint::COMPUTE),
            shader: unit.name().to_string(),
        })
    }

    /// Shared pipeline state
    pub fn base(&self) -> &PipelineBase {
        &self.base
    }

    /// Name of the compute shader in use
    pub fn shader(&self) -> &str {
        &self.shader
    }

    /// Bind the pipeline
    pub fn bind(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.base.bind(command_buffer)
    }

    /// Record a dispatch of `groups` workgroups
    pub fn dispatch(&self, command_buffer: vk::CommandBuffer, groups: [u32; 3]) -> VulkanResult<()> {
        self.base.with_device(|device| unsafe {
            device.raw().cmd_dispatch(command_buffer, groups[0], groups[1], groups[2]);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::SPIRV_MAGIC;

    fn bare(name: &str, stage: ShaderStage) -> ShaderStageUnit {
        ShaderStageUnit::new(name, vec![SPIRV_MAGIC], stage, None).unwrap()
    }

    #[test]
    fn test_requires_compute_unit() {
        assert!(matches!(
            select_compute_stage(&[]),
            Err(VulkanError::MissingShaderStage { pipeline: "compute", stage: "compute" })
        ));
        let units = vec![bare("vs", ShaderStage::Vertex)];
        assert!(select_compute_stage(&units).is_err());
    }

    #[test]
    fn test_first_compute_unit_wins() {
        let units = vec![bare("vs", ShaderStage::Vertex), bare("cull", ShaderStage::Compute), bare("blur", ShaderStage::Compute)];
        assert_eq!(select_compute_stage(&units).unwrap().name(), "cull");
    }
}
