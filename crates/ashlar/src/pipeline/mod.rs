//! Reflection-driven pipeline construction
//!
//! Shader units flow through [`layout::PipelineLayoutDescription`] into one
//! of the variants, which are stored by name in [`manager::PipelineManager`].

pub mod base;
pub mod compute;
pub mod graphics;
pub mod interface;
pub mod layout;
pub mod manager;
pub mod ray_tracing;

pub use base::{PipelineBase, ShaderModule};
pub use compute::ComputePipeline;
pub use graphics::{GraphicsPipeline, GraphicsPipelinePlan, RenderTarget};
pub use interface::InterfaceDiagnostic;
pub use layout::{DescriptorBindingDescription, DescriptorSetLayoutDescription, PipelineLayout, PipelineLayoutDescription};
pub use manager::{NamedRegistry, PipelineKind, PipelineManager, PipelineVariant};
pub use ray_tracing::{RayTracingPipeline, ShaderGroup};
