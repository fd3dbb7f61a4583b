//! Configuration system
//!
//! Renderer settings are plain serde structs loaded from `.toml` or `.ron`
//! files through the [`Config`] trait.

use std::path::Path;

pub use serde::{Deserialize, Serialize};

use crate::logging::LoggingConfig;

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        match extension(path) {
            Some("toml") => toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string())),
            Some("ron") => ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string())),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// Save configuration to file
    fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = match extension(path) {
            Some("toml") => toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?,
            Some("ron") => ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?,
            _ => return Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|ext| ext.to_str())
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A value is outside its accepted range
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

/// Settings consumed by [`crate::device::DeviceHandler`] and the frame loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name reported to the Vulkan driver
    pub application_name: String,
    /// Enable `VK_LAYER_KHRONOS_validation` and route its messages to `log`
    pub enable_validation: bool,
    /// Number of in-flight frame slots
    pub frames_in_flight: usize,
    /// Host timeout for frame fence waits, in nanoseconds; unset waits forever
    pub fence_timeout_ns: Option<u64>,
    /// Prefer MAILBOX over FIFO presentation when the surface supports it
    pub prefer_mailbox: bool,
    /// Logging sink configuration
    pub logging: LoggingConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "ashlar".to_string(),
            enable_validation: cfg!(debug_assertions),
            frames_in_flight: 2,
            fence_timeout_ns: None,
            prefer_mailbox: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl Config for RendererConfig {}

impl RendererConfig {
    /// Fence wait timeout as passed to `vkWaitForFences`
    pub fn fence_timeout(&self) -> u64 {
        self.fence_timeout_ns.unwrap_or(u64::MAX)
    }

    /// Reject settings the frame loop cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frames_in_flight == 0 {
            return Err(ConfigError::Invalid {
                field: "frames_in_flight",
                reason: "at least one in-flight slot is required".to_string(),
            });
        }
        if self.fence_timeout_ns == Some(0) {
            return Err(ConfigError::Invalid {
                field: "fence_timeout_ns",
                reason: "a zero timeout would never let a frame complete".to_string(),
            });
        }
        Ok(())
    }
}
