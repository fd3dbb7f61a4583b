//! Ray tracing pipeline
//!
//! Shader groups and the layout are derived from the units. The native
//! pipeline object, the shader binding table and `trace_rays` are not
//! implemented yet and report [`VulkanError::Unimplemented`].

use std::sync::Arc;

use ash::vk;

use crate::device::logical::DeviceShared;
use crate::error::{VulkanError, VulkanResult};
use crate::pipeline::layout::{PipelineLayout, PipelineLayoutDescription};
use crate::shader::{ShaderStage, ShaderStageUnit};

/// A shader group; indices refer to the pipeline's stage list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderGroup {
    /// Ray generation, miss or callable shader
    General {
        /// Stage index
        shader: u32,
    },
    /// Triangle hit group
    TrianglesHit {
        /// Closest-hit stage index
        closest_hit: Option<u32>,
        /// Any-hit stage index
        any_hit: Option<u32>,
    },
    /// Procedural hit group
    ProceduralHit {
        /// Intersection stage index
        intersection: u32,
    },
}

impl ShaderGroup {
    /// Native group description
    pub fn to_vk(self) -> vk::RayTracingShaderGroupCreateInfoKHR {
        let unused = vk::SHADER_UNUSED_KHR;
        let (ty, general, closest_hit, any_hit, intersection) = match self {
            Self::General { shader } => {
                (vk::RayTracingShaderGroupTypeKHR::GENERAL, shader, unused, unused, unused)
            }
            Self::TrianglesHit { closest_hit, any_hit } => (
                vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP,
                unused,
                closest_hit.unwrap_or(unused),
                any_hit.unwrap_or(unused),
                unused,
            ),
            Self::ProceduralHit { intersection } => {
                (vk::RayTracingShaderGroupTypeKHR::PROCEDURAL_HIT_GROUP, unused, unused, unused, intersection)
            }
        };
        vk::RayTracingShaderGroupCreateInfoKHR::builder()
            .ty(ty)
            .general_shader(general)
            .closest_hit_shader(closest_hit)
            .any_hit_shader(any_hit)
            .intersection_shader(intersection)
            .build()
    }
}

/// Assign the ray tracing units to shader groups
///
/// Every general stage gets its own group. A closest-hit and an any-hit unit
/// that are adjacent in `units` share one triangles hit group; an unpaired
/// hit unit gets a group with the other slot unused. Fails when there is no
/// ray generation unit. Non ray tracing units are skipped with a warning and
/// do not consume a stage index.
pub fn classify_shader_groups(units: &[ShaderStageUnit]) -> VulkanResult<(Vec<&ShaderStageUnit>, Vec<ShaderGroup>)> {
    if !units.iter().any(|unit| unit.stage() == ShaderStage::RayGeneration) {
        return Err(VulkanError::MissingShaderStage {
            pipeline: "ray tracing",
            stage: ShaderStage::RayGeneration.name(),
        });
    }

    let mut stages = Vec::new();
    let mut groups = Vec::new();
    for unit in units {
        if !unit.stage().is_ray_tracing() {
            log::warn!("Ignoring {} shader '{}' in a ray tracing pipeline", unit.stage(), unit.name());
            continue;
        }
        let index = stages.len() as u32;
        stages.push(unit);

        // Fill the open slot of the previous hit group if this unit completes it.
        let paired = match (unit.stage(), groups.last_mut()) {
            (ShaderStage::ClosestHit, Some(ShaderGroup::TrianglesHit { closest_hit: slot @ None, any_hit: Some(prev) }))
            | (ShaderStage::AnyHit, Some(ShaderGroup::TrianglesHit { closest_hit: Some(prev), any_hit: slot @ None }))
                if *prev + 1 == index =>
            {
                *slot = Some(index);
                true
            }
            _ => false,
        };
        if paired {
            continue;
        }

        groups.push(match unit.stage() {
            ShaderStage::ClosestHit => ShaderGroup::TrianglesHit { closest_hit: Some(index), any_hit: None },
            ShaderStage::AnyHit => ShaderGroup::TrianglesHit { closest_hit: None, any_hit: Some(index) },
            ShaderStage::Intersection => ShaderGroup::ProceduralHit { intersection: index },
            _ => ShaderGroup::General { shader: index },
        });
    }
    Ok((stages, groups))
}

/// Ray tracing pipeline with layout and groups but no native pipeline yet
pub struct RayTracingPipeline {
    layout: PipelineLayout,
    groups: Vec<ShaderGroup>,
    stages: Vec<ShaderStageUnit>,
    name: String,
}

impl RayTracingPipeline {
    /// Classify `units` and build the layout
    pub fn new(device: &Arc<DeviceShared>, name: impl Into<String>, units: &[ShaderStageUnit]) -> VulkanResult<Self> {
        let name = name.into();
        let (stages, groups) = classify_shader_groups(units)?;
        let layout = PipelineLayoutDescription::from_units(stages.iter().copied()).build(device)?;
        log::warn!(
            "Ray tracing pipeline '{}' has {} group(s) but no native pipeline; tracing is not implemented",
            name,
            groups.len()
        );
        Ok(Self { layout, groups, stages: stages.into_iter().cloned().collect(), name })
    }

    /// Registry name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pipeline layout
    pub fn layout(&self) -> &PipelineLayout {
        &self.layout
    }

    /// Shader groups in stage order
    pub fn groups(&self) -> &[ShaderGroup] {
        &self.groups
    }

    /// Units the groups index into
    pub fn stages(&self) -> &[ShaderStageUnit] {
        &self.stages
    }

    /// Native pipeline handle; not implemented
    pub fn handle(&self) -> VulkanResult<vk::Pipeline> {
        Err(VulkanError::Unimplemented("ray tracing pipeline object"))
    }

    /// Shader binding table buffer; not implemented
    pub fn shader_binding_table(&self) -> VulkanResult<vk::Buffer> {
        Err(VulkanError::Unimplemented("shader binding table"))
    }

    /// Bind the pipeline; not implemented
    pub fn bind(&self, _command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        Err(VulkanError::Unimplemented("ray tracing pipeline binding"))
    }

    /// Record a trace of `width` x `height` x `depth` rays; not implemented
    pub fn trace_rays(&self, _command_buffer: vk::CommandBuffer, _width: u32, _height: u32, _depth: u32) -> VulkanResult<()> {
        Err(VulkanError::Unimplemented("trace_rays"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::SPIRV_MAGIC;

    fn bare(stage: ShaderStage) -> ShaderStageUnit {
        ShaderStageUnit::new(stage.name(), vec![SPIRV_MAGIC], stage, None).unwrap()
    }

    #[test]
    fn test_groups_classified_by_stage() {
        let units = vec![
            bare(ShaderStage::RayGeneration),
            bare(ShaderStage::Vertex),
            bare(ShaderStage::Miss),
            bare(ShaderStage::ClosestHit),
            bare(ShaderStage::AnyHit),
            bare(ShaderStage::Intersection),
            bare(ShaderStage::Callable),
        ];
        let (stages, groups) = classify_shader_groups(&units).unwrap();
        assert_eq!(stages.len(), 6);
        assert_eq!(
            groups,
            vec![
                ShaderGroup::General { shader: 0 },
                ShaderGroup::General { shader: 1 },
                ShaderGroup::TrianglesHit { closest_hit: Some(2), any_hit: Some(3) },
                ShaderGroup::ProceduralHit { intersection: 4 },
                ShaderGroup::General { shader: 5 },
            ]
        );
    }

    #[test]
    fn test_hit_pairs_form_in_either_order() {
        let units = vec![
            bare(ShaderStage::RayGeneration),
            bare(ShaderStage::AnyHit),
            bare(ShaderStage::ClosestHit),
            bare(ShaderStage::ClosestHit),
            bare(ShaderStage::Miss),
            bare(ShaderStage::AnyHit),
        ];
        let (_, groups) = classify_shader_groups(&units).unwrap();
        assert_eq!(
            groups,
            vec![
                ShaderGroup::General { shader: 0 },
                ShaderGroup::TrianglesHit { closest_hit: Some(2), any_hit: Some(1) },
                ShaderGroup::TrianglesHit { closest_hit: Some(3), any_hit: None },
                ShaderGroup::General { shader: 4 },
                ShaderGroup::TrianglesHit { closest_hit: None, any_hit: Some(5) },
            ]
        );
    }

    #[test]
    fn test_ray_generation_required() {
        let units = vec![bare(ShaderStage::Miss)];
        assert!(matches!(
            classify_shader_groups(&units),
            Err(VulkanError::MissingShaderStage { pipeline: "ray tracing", stage: "ray generation" })
        ));
    }

    #[test]
    fn test_group_to_vk_marks_unused() {
        let info = ShaderGroup::TrianglesHit { closest_hit: Some(2), any_hit: None }.to_vk();
        assert_eq!(info.ty, vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP);
        assert_eq!(info.closest_hit_shader, 2);
        assert_eq!(info.any_hit_shader, vk::SHADER_UNUSED_KHR);
        assert_eq!(info.general_shader, vk::SHADER_UNUSED_KHR);
    }
}
