//! Compiled shader plus its declared stage and reflection

use std::io::Cursor;
use std::sync::Arc;

use crate::error::{VulkanError, VulkanResult};
use crate::shader::reflection::ShaderReflection;
use crate::shader::stage::ShaderStage;

/// SPIR-V magic number, first word of every module
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Immutable compiled shader: word stream, stage and reflection
///
/// Cheap to clone; the code is shared.
#[derive(Debug, Clone)]
pub struct ShaderStageUnit {
    name: String,
    code: Arc<[u32]>,
    stage: ShaderStage,
    reflection: Option<ShaderReflection>,
}

impl ShaderStageUnit {
    /// Wrap an already word-aligned SPIR-V stream
    pub fn new(
        name: impl Into<String>,
        code: impl Into<Arc<[u32]>>,
        stage: ShaderStage,
        reflection: Option<ShaderReflection>,
    ) -> VulkanResult<Self> {
        let name = name.into();
        let code = code.into();
        match code.first() {
            None => return Err(VulkanError::InvalidShader(format!("'{}' is empty", name))),
            Some(&magic) if magic != SPIRV_MAGIC => {
                return Err(VulkanError::InvalidShader(format!(
                    "'{}' does not start with the SPIR-V magic number (found {:#010x})",
                    name, magic
                )))
            }
            Some(_) => {}
        }
        Ok(Self { name, code, stage, reflection })
    }

    /// Build from raw bytes as read from a `.spv` file
    ///
    /// Either byte order is accepted; a module written big-endian is
    /// swapped to host words.
    pub fn from_bytes(
        name: impl Into<String>,
        bytes: &[u8],
        stage: ShaderStage,
        reflection: Option<ShaderReflection>,
    ) -> VulkanResult<Self> {
        let name = name.into();
        if bytes.len() % 4 != 0 {
            return Err(VulkanError::InvalidShader(format!(
                "'{}' is {} bytes, not a multiple of 4",
                name,
                bytes.len()
            )));
        }
        let words = ash::util::read_spv(&mut Cursor::new(bytes))
            .map_err(|e| VulkanError::InvalidShader(format!("'{}' could not be read: {}", name, e)))?;
        Self::new(name, words, stage, reflection)
    }

    /// Build from bytes and extract reflection from the binary itself
    #[cfg(feature = "spirv-reflect")]
    pub fn from_bytes_reflected(name: impl Into<String>, bytes: &[u8], stage: ShaderStage) -> VulkanResult<Self> {
        let mut unit = Self::from_bytes(name, bytes, stage, None)?;
        match crate::shader::spirv::reflect(&unit.code, stage) {
            Ok(reflection) => unit.reflection = Some(reflection),
            Err(err) => log::warn!("Shader '{}' has no usable reflection: {}", unit.name, err),
        }
        Ok(unit)
    }

    /// Name used in diagnostics and as the shader-cache key
    pub fn name(&self) -> &str {
        &self.name
    }

    /// SPIR-V words
    pub fn code(&self) -> &[u32] {
        &self.code
    }

    /// Size of the binary in bytes
    pub fn code_size(&self) -> usize {
        self.code.len() * 4
    }

    /// Declared stage
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Reflection data, if present and valid
    pub fn reflection(&self) -> Option<&ShaderReflection> {
        self.reflection.as_ref().filter(|reflection| reflection.is_valid())
    }

    /// Entry point name, defaulting to `main`
    pub fn entry_point(&self) -> &str {
        self.reflection().map_or("main", |reflection| reflection.entry_point.as_str())
    }
}
