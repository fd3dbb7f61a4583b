//! Pipeline stage declared by a compiled shader

use std::fmt;

use ash::vk;
use serde::{Deserialize, Serialize};

/// Pipeline stage a shader binary was compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ShaderStage {
    /// Vertex stage
    Vertex,
    /// Tessellation control stage
    TessellationControl,
    /// Tessellation evaluation stage
    TessellationEvaluation,
    /// Geometry stage
    Geometry,
    /// Fragment stage
    Fragment,
    /// Compute stage
    Compute,
    /// Ray generation stage
    RayGeneration,
    /// Any-hit stage
    AnyHit,
    /// Closest-hit stage
    ClosestHit,
    /// Miss stage
    Miss,
    /// Intersection stage
    Intersection,
    /// Callable stage
    Callable,
}

/// Fixed order of the graphics stages
pub const GRAPHICS_STAGE_ORDER: [ShaderStage; 5] = [
    ShaderStage::Vertex,
    ShaderStage::TessellationControl,
    ShaderStage::TessellationEvaluation,
    ShaderStage::Geometry,
    ShaderStage::Fragment,
];

impl ShaderStage {
    /// Vulkan stage flag
    pub fn to_vk(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::TessellationControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            Self::TessellationEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            Self::Geometry => vk::ShaderStageFlags::GEOMETRY,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
            Self::Compute => vk::ShaderStageFlags::COMPUTE,
            Self::RayGeneration => vk::ShaderStageFlags::RAYGEN_KHR,
            Self::AnyHit => vk::ShaderStageFlags::ANY_HIT_KHR,
            Self::ClosestHit => vk::ShaderStageFlags::CLOSEST_HIT_KHR,
            Self::Miss => vk::ShaderStageFlags::MISS_KHR,
            Self::Intersection => vk::ShaderStageFlags::INTERSECTION_KHR,
            Self::Callable => vk::ShaderStageFlags::CALLABLE_KHR,
        }
    }

    /// Human-readable stage name used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::TessellationControl => "tessellation control",
            Self::TessellationEvaluation => "tessellation evaluation",
            Self::Geometry => "geometry",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
            Self::RayGeneration => "ray generation",
            Self::AnyHit => "any hit",
            Self::ClosestHit => "closest hit",
            Self::Miss => "miss",
            Self::Intersection => "intersection",
            Self::Callable => "callable",
        }
    }

    /// Position in [`GRAPHICS_STAGE_ORDER`], `None` for non-graphics stages
    pub fn graphics_order(self) -> Option<usize> {
        GRAPHICS_STAGE_ORDER.iter().position(|&stage| stage == self)
    }

    /// Whether the stage belongs to a ray tracing pipeline
    pub fn is_ray_tracing(self) -> bool {
        matches!(
            self,
            Self::RayGeneration | Self::AnyHit | Self::ClosestHit | Self::Miss | Self::Intersection | Self::Callable
        )
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
