//! Reflection metadata extracted from a compiled shader
//!
//! These are plain data records. They are produced either by the in-crate
//! SPIR-V reflector (`spirv-reflect` feature) or handed over by whatever
//! tool compiled the shader.

use ash::vk;

/// One descriptor binding declared by a shader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBindingInfo {
    /// Descriptor set index
    pub set: u32,
    /// Binding index inside the set
    pub binding: u32,
    /// Resource kind
    pub kind: vk::DescriptorType,
    /// Array element count (1 for non-arrays)
    pub count: u32,
}

/// A push-constant block declared by a shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushConstantInfo {
    /// Byte offset of the first member
    pub offset: u32,
    /// Size in bytes
    pub size: u32,
}

/// Built-in interface variables the crate cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltIn {
    /// `gl_Position`
    Position,
    /// `gl_PointSize`
    PointSize,
    /// `gl_ClipDistance`
    ClipDistance,
    /// `gl_CullDistance`
    CullDistance,
    /// Any other built-in, by its SPIR-V `BuiltIn` value
    Other(u32),
}

impl BuiltIn {
    /// Map a SPIR-V `BuiltIn` enumerant
    pub fn from_spirv(value: u32) -> Self {
        match value {
            0 => Self::Position,
            1 => Self::PointSize,
            3 => Self::ClipDistance,
            4 => Self::CullDistance,
            other => Self::Other(other),
        }
    }
}

/// A stage input or output variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceVariable {
    /// Variable name, if the binary kept debug names
    pub name: Option<String>,
    /// `Location` decoration; `None` when absent or invalid
    pub location: Option<u32>,
    /// Data format of the variable
    pub format: vk::Format,
    /// Built-in tag, `None` for user-defined varyings
    pub built_in: Option<BuiltIn>,
}

impl InterfaceVariable {
    /// A user-defined varying at `location`
    pub fn located(name: impl Into<String>, location: u32, format: vk::Format) -> Self {
        Self { name: Some(name.into()), location: Some(location), format, built_in: None }
    }

    /// A built-in variable
    pub fn built_in(name: impl Into<String>, built_in: BuiltIn, format: vk::Format) -> Self {
        Self { name: Some(name.into()), location: None, format, built_in: Some(built_in) }
    }

    /// Whether this variable takes part in location matching
    pub fn is_built_in(&self) -> bool {
        self.built_in.is_some()
    }

    /// Name for diagnostics
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|name| !name.is_empty()).unwrap_or("<unnamed>")
    }

    /// Whether this output carries the vertex position
    ///
    /// Binaries stripped of built-in decorations still expose the position
    /// block as an unnamed variable without a valid location.
    pub fn is_position(&self) -> bool {
        match self.built_in {
            Some(built_in) => built_in == BuiltIn::Position,
            None => self.location.is_none() && self.name.as_deref().map_or(true, str::is_empty),
        }
    }
}

/// Everything the pipeline builders need to know about one shader
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderReflection {
    /// Entry point name
    pub entry_point: String,
    /// Descriptor bindings
    pub descriptor_bindings: Vec<DescriptorBindingInfo>,
    /// Push-constant blocks
    pub push_constants: Vec<PushConstantInfo>,
    /// Stage inputs, in declaration order
    pub inputs: Vec<InterfaceVariable>,
    /// Stage outputs, in declaration order
    pub outputs: Vec<InterfaceVariable>,
}

impl ShaderReflection {
    /// Empty reflection for the given entry point
    pub fn new(entry_point: impl Into<String>) -> Self {
        Self { entry_point: entry_point.into(), ..Self::default() }
    }

    /// Add a descriptor binding
    #[must_use]
    pub fn with_binding(mut self, set: u32, binding: u32, kind: vk::DescriptorType, count: u32) -> Self {
        self.descriptor_bindings.push(DescriptorBindingInfo { set, binding, kind, count });
        self
    }

    /// Add a push-constant block
    #[must_use]
    pub fn with_push_constant(mut self, offset: u32, size: u32) -> Self {
        self.push_constants.push(PushConstantInfo { offset, size });
        self
    }

    /// Add a stage input
    #[must_use]
    pub fn with_input(mut self, variable: InterfaceVariable) -> Self {
        self.inputs.push(variable);
        self
    }

    /// Add a stage output
    #[must_use]
    pub fn with_output(mut self, variable: InterfaceVariable) -> Self {
        self.outputs.push(variable);
        self
    }

    /// Reflection is usable when it names an entry point
    pub fn is_valid(&self) -> bool {
        !self.entry_point.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_detection() {
        let tagged = InterfaceVariable::built_in("gl_Position", BuiltIn::Position, vk::Format::R32G32B32A32_SFLOAT);
        assert!(tagged.is_position());

        let stripped = InterfaceVariable { name: None, location: None, format: vk::Format::UNDEFINED, built_in: None };
        assert!(stripped.is_position());

        let varying = InterfaceVariable::located("color", 0, vk::Format::R32G32B32_SFLOAT);
        assert!(!varying.is_position());

        let point_size = InterfaceVariable::built_in("gl_PointSize", BuiltIn::PointSize, vk::Format::R32_SFLOAT);
        assert!(!point_size.is_position());
    }

    #[test]
    fn test_display_name_fallback() {
        let unnamed = InterfaceVariable { name: Some(String::new()), location: Some(1), format: vk::Format::R32_SFLOAT, built_in: None };
        assert_eq!(unnamed.display_name(), "<unnamed>");
    }
}
