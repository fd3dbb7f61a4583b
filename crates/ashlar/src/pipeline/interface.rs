//! Graphics stage ordering and inter-stage interface checks
//!
//! Interface problems are reported, never fatal: a mismatched varying shows
//! up as a rendering defect, not as a failed pipeline.

use ash::vk;
use thiserror::Error;

use crate::error::{VulkanError, VulkanResult};
use crate::shader::{InterfaceVariable, ShaderStage, ShaderStageUnit};

/// One problem found while matching stage outputs to the next stage's inputs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterfaceDiagnostic {
    /// The vertex stage does not write a position
    #[error("{stage} shader '{shader}' does not write the position built-in")]
    MissingPosition {
        /// Stage checked
        stage: ShaderStage,
        /// Shader name
        shader: String,
    },

    /// Output and input share a location but not a format
    #[error(
        "location {location}: {producer} output '{output}' is {output_format:?} but {consumer} input '{input}' is {input_format:?}"
    )]
    FormatMismatch {
        /// Shared location
        location: u32,
        /// Writing stage
        producer: ShaderStage,
        /// Reading stage
        consumer: ShaderStage,
        /// Output variable name
        output: String,
        /// Input variable name
        input: String,
        /// Format written
        output_format: vk::Format,
        /// Format read
        input_format: vk::Format,
    },

    /// An output nobody reads
    #[error("location {location}: {producer} output '{variable}' has no matching {consumer} input")]
    UnmatchedOutput {
        /// Output location
        location: u32,
        /// Writing stage
        producer: ShaderStage,
        /// Next stage
        consumer: ShaderStage,
        /// Output variable name
        variable: String,
    },

    /// An input nobody writes
    #[error("location {location}: {consumer} input '{variable}' is not written by the {producer} stage")]
    UnsatisfiedInput {
        /// Input location
        location: u32,
        /// Previous stage
        producer: ShaderStage,
        /// Reading stage
        consumer: ShaderStage,
        /// Input variable name
        variable: String,
    },
}

/// Sort graphics units into pipeline order, checking mandatory stages
///
/// Fails with [`VulkanError::MissingShaderStage`] when no vertex or no
/// fragment unit is present. Non-graphics units and repeated stages are
/// dropped with a warning.
pub fn order_graphics_stages(units: &[ShaderStageUnit]) -> VulkanResult<Vec<&ShaderStageUnit>> {
    for required in [ShaderStage::Vertex, ShaderStage::Fragment] {
        if !units.iter().any(|unit| unit.stage() == required) {
            return Err(VulkanError::MissingShaderStage { pipeline: "graphics", stage: required.name() });
        }
    }

    let mut ordered: Vec<&ShaderStageUnit> = Vec::with_capacity(units.len());
    for unit in units {
        if unit.stage().graphics_order().is_none() {
            log::warn!("Ignoring {} shader '{}' in a graphics pipeline", unit.stage(), unit.name());
            continue;
        }
        if let Some(kept) = ordered.iter().find(|kept| kept.stage() == unit.stage()) {
            log::warn!("Ignoring second {} shader '{}', keeping '{}'", unit.stage(), unit.name(), kept.name());
            continue;
        }
        ordered.push(unit);
    }
    ordered.sort_by_key(|unit| unit.stage().graphics_order());
    Ok(ordered)
}

fn located(variables: &[InterfaceVariable]) -> impl Iterator<Item = (u32, &InterfaceVariable)> {
    variables
        .iter()
        .filter(|variable| !variable.is_built_in())
        .filter_map(|variable| variable.location.map(|location| (location, variable)))
}

/// Check ordered graphics stages pairwise; every diagnostic is also logged
pub fn validate_stage_interfaces(ordered: &[&ShaderStageUnit]) -> Vec<InterfaceDiagnostic> {
    let mut diagnostics = Vec::new();

    if let Some(vertex) = ordered.iter().find(|unit| unit.stage() == ShaderStage::Vertex) {
        match vertex.reflection() {
            Some(reflection) if !reflection.outputs.iter().any(InterfaceVariable::is_position) => {
                diagnostics.push(InterfaceDiagnostic::MissingPosition {
                    stage: ShaderStage::Vertex,
                    shader: vertex.name().to_string(),
                });
            }
            Some(_) => {}
            None => log::debug!("Vertex shader '{}' has no reflection, position check skipped", vertex.name()),
        }
    }

    for pair in ordered.windows(2) {
        let (producer, consumer) = (pair[0], pair[1]);
        let (Some(outputs), Some(inputs)) = (producer.reflection(), consumer.reflection()) else {
            log::debug!(
                "Skipping interface check {} -> {}: reflection missing",
                producer.stage(),
                consumer.stage()
            );
            continue;
        };

        for (location, output) in located(&outputs.outputs) {
            match located(&inputs.inputs).find(|&(input_location, _)| input_location == location) {
                Some((_, input)) if input.format != output.format => {
                    diagnostics.push(InterfaceDiagnostic::FormatMismatch {
                        location,
                        producer: producer.stage(),
                        consumer: consumer.stage(),
                        output: output.display_name().to_string(),
                        input: input.display_name().to_string(),
                        output_format: output.format,
                        input_format: input.format,
                    });
                }
                Some(_) => {}
                None => diagnostics.push(InterfaceDiagnostic::UnmatchedOutput {
                    location,
                    producer: producer.stage(),
                    consumer: consumer.stage(),
                    variable: output.display_name().to_string(),
                }),
            }
        }

        for (location, input) in located(&inputs.inputs) {
            if !located(&outputs.outputs).any(|(output_location, _)| output_location == location) {
                diagnostics.push(InterfaceDiagnostic::UnsatisfiedInput {
                    location,
                    producer: producer.stage(),
                    consumer: consumer.stage(),
                    variable: input.display_name().to_string(),
                });
            }
        }
    }

    for diagnostic in &diagnostics {
        log::error!("Shader interface: {}", diagnostic);
    }
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::{BuiltIn, ShaderReflection, SPIRV_MAGIC};

    fn unit(name: &str, stage: ShaderStage, reflection: ShaderReflection) -> ShaderStageUnit {
        ShaderStageUnit::new(name, vec![SPIRV_MAGIC], stage, Some(reflection)).unwrap()
    }

    fn bare(stage: ShaderStage) -> ShaderStageUnit {
        ShaderStageUnit::new(stage.name(), vec![SPIRV_MAGIC], stage, None).unwrap()
    }

    fn position() -> InterfaceVariable {
        InterfaceVariable::built_in("gl_Position", BuiltIn::Position, vk::Format::R32G32B32A32_SFLOAT)
    }

    fn vec3(name: &str, location: u32) -> InterfaceVariable {
        InterfaceVariable::located(name, location, vk::Format::R32G32B32_SFLOAT)
    }

    #[test]
    fn test_missing_fragment_fails_before_anything_else() {
        let units = vec![bare(ShaderStage::Vertex), bare(ShaderStage::Geometry)];
        let err = order_graphics_stages(&units).unwrap_err();
        assert!(matches!(err, VulkanError::MissingShaderStage { pipeline: "graphics", stage: "fragment" }));
    }

    #[test]
    fn test_missing_vertex_is_reported() {
        let units = vec![bare(ShaderStage::Fragment)];
        let err = order_graphics_stages(&units).unwrap_err();
        assert!(matches!(err, VulkanError::MissingShaderStage { stage: "vertex", .. }));
    }

    #[test]
    fn test_stages_sorted_and_filtered() {
        let units = vec![
            bare(ShaderStage::Fragment),
            bare(ShaderStage::Compute),
            bare(ShaderStage::TessellationEvaluation),
            bare(ShaderStage::Vertex),
            bare(ShaderStage::Fragment),
            bare(ShaderStage::TessellationControl),
        ];
        let ordered = order_graphics_stages(&units).unwrap();
        let stages: Vec<ShaderStage> = ordered.iter().map(|unit| unit.stage()).collect();
        assert_eq!(
            stages,
            vec![
                ShaderStage::Vertex,
                ShaderStage::TessellationControl,
                ShaderStage::TessellationEvaluation,
                ShaderStage::Fragment,
            ]
        );
    }

    #[test]
    fn test_single_format_mismatch_gives_one_diagnostic() {
        let units = vec![
            unit("vs", ShaderStage::Vertex, ShaderReflection::new("main").with_output(position()).with_output(vec3("a", 3))),
            unit(
                "tcs",
                ShaderStage::TessellationControl,
                ShaderReflection::new("main").with_input(vec3("a", 3)).with_output(vec3("b", 3)),
            ),
            unit(
                "tes",
                ShaderStage::TessellationEvaluation,
                ShaderReflection::new("main")
                    .with_input(InterfaceVariable::located("b_in", 3, vk::Format::R32G32B32A32_SFLOAT))
                    .with_output(vec3("c", 3)),
            ),
            unit(
                "gs",
                ShaderStage::Geometry,
                ShaderReflection::new("main").with_input(vec3("c", 3)).with_output(vec3("d", 3)),
            ),
            unit("fs", ShaderStage::Fragment, ShaderReflection::new("main").with_input(vec3("d", 3))),
        ];

        let ordered = order_graphics_stages(&units).unwrap();
        let diagnostics = validate_stage_interfaces(&ordered);
        assert_eq!(
            diagnostics,
            vec![InterfaceDiagnostic::FormatMismatch {
                location: 3,
                producer: ShaderStage::TessellationControl,
                consumer: ShaderStage::TessellationEvaluation,
                output: "b".to_string(),
                input: "b_in".to_string(),
                output_format: vk::Format::R32G32B32_SFLOAT,
                input_format: vk::Format::R32G32B32A32_SFLOAT,
            }]
        );

        let message = diagnostics[0].to_string();
        assert!(message.contains("tessellation control"));
        assert!(message.contains("tessellation evaluation"));
        assert!(message.contains("location 3"));
        assert!(message.contains("R32G32B32_SFLOAT"));
        assert!(message.contains("R32G32B32A32_SFLOAT"));
    }

    #[test]
    fn test_unmatched_and_unsatisfied_locations() {
        let units = vec![
            unit("vs", ShaderStage::Vertex, ShaderReflection::new("main").with_output(position()).with_output(vec3("uv", 1))),
            unit("fs", ShaderStage::Fragment, ShaderReflection::new("main").with_input(vec3("normal", 2))),
        ];
        let ordered = order_graphics_stages(&units).unwrap();
        let diagnostics = validate_stage_interfaces(&ordered);
        assert_eq!(diagnostics.len(), 2);
        assert!(matches!(diagnostics[0], InterfaceDiagnostic::UnmatchedOutput { location: 1, .. }));
        assert!(matches!(diagnostics[1], InterfaceDiagnostic::UnsatisfiedInput { location: 2, .. }));
    }

    #[test]
    fn test_missing_position_reported() {
        let units = vec![
            unit("vs", ShaderStage::Vertex, ShaderReflection::new("main").with_output(vec3("color", 0))),
            unit("fs", ShaderStage::Fragment, ShaderReflection::new("main").with_input(vec3("color", 0))),
        ];
        let ordered = order_graphics_stages(&units).unwrap();
        let diagnostics = validate_stage_interfaces(&ordered);
        assert_eq!(
            diagnostics,
            vec![InterfaceDiagnostic::MissingPosition { stage: ShaderStage::Vertex, shader: "vs".to_string() }]
        );
    }

    #[test]
    fn test_stripped_position_block_accepted() {
        let stripped = InterfaceVariable { name: None, location: None, format: vk::Format::UNDEFINED, built_in: None };
        let units = vec![
            unit("vs", ShaderStage::Vertex, ShaderReflection::new("main").with_output(stripped)),
            unit("fs", ShaderStage::Fragment, ShaderReflection::new("main")),
        ];
        let ordered = order_graphics_stages(&units).unwrap();
        assert!(validate_stage_interfaces(&ordered).is_empty());
    }

    #[test]
    fn test_missing_reflection_skips_pair() {
        let units = vec![bare(ShaderStage::Vertex), unit("fs", ShaderStage::Fragment, ShaderReflection::new("main").with_input(vec3("x", 0)))];
        let ordered = order_graphics_stages(&units).unwrap();
        assert!(validate_stage_interfaces(&ordered).is_empty());
    }
}
