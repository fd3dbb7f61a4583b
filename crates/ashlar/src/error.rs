//! Error types shared by every Vulkan-facing module
//!
//! Configuration mistakes and native API failures are reported through
//! [`VulkanError`]. Presentation state that merely asks the caller to rebuild
//! the swapchain is *not* an error; see [`crate::sync::FrameStatus`].

use ash::vk;
use thiserror::Error;

use crate::config::ConfigError;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Vulkan loader or instance initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No physical device satisfies the queue-family and feature contract
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// A pipeline was requested without one of its mandatory shader stages
    #[error("{pipeline} pipeline requires a {stage} shader stage")]
    MissingShaderStage {
        /// Kind of pipeline being built
        pipeline: &'static str,
        /// Name of the missing stage
        stage: &'static str,
    },

    /// No device bundle is registered under the given index or name
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The operation needs a swapchain that has not been attached yet
    #[error("No swapchain attached to device")]
    SwapchainMissing,

    /// No pipeline of the requested kind is registered under the given name
    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    /// Shader binary is malformed (size, alignment or magic number)
    #[error("Invalid shader: {0}")]
    InvalidShader(String),

    /// Reflection metadata could not be extracted from a shader binary
    #[error("Shader reflection failed: {0}")]
    Reflection(String),

    /// The requested functionality is a documented placeholder
    #[error("Not implemented: {0}")]
    Unimplemented(&'static str),

    /// Configuration could not be loaded or is invalid
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<vk::Result> for VulkanError {
    fn from(result: vk::Result) -> Self {
        Self::Api(result)
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_stage_message_names_pipeline_and_stage() {
        let err = VulkanError::MissingShaderStage { pipeline: "graphics", stage: "fragment" };
        assert_eq!(err.to_string(), "graphics pipeline requires a fragment shader stage");
    }

    #[test]
    fn test_api_error_from_result() {
        let err: VulkanError = vk::Result::ERROR_DEVICE_LOST.into();
        assert!(matches!(err, VulkanError::Api(vk::Result::ERROR_DEVICE_LOST)));
    }
}
