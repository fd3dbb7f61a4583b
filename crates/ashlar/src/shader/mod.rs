//! Compiled shaders and the metadata the pipeline builders read from them

pub mod reflection;
pub mod stage;
pub mod unit;

#[cfg(feature = "spirv-reflect")]
pub mod spirv;

pub use reflection::{BuiltIn, DescriptorBindingInfo, InterfaceVariable, PushConstantInfo, ShaderReflection};
pub use stage::{ShaderStage, GRAPHICS_STAGE_ORDER};
pub use unit::{ShaderStageUnit, SPIRV_MAGIC};
