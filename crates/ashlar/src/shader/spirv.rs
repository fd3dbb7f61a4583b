//! SPIR-V reflection using spirq
//!
//! spirq reports descriptors, push constants and located interface
//! variables. Built-ins are not part of its interface listing, so the word
//! stream is scanned for `BuiltIn` decorations separately; that is enough to
//! tell whether a vertex shader writes `gl_Position`.

use ash::vk;
use spirq::ty::{DescriptorType, ScalarType, Type};
use spirq::var::Variable;
use spirq::ReflectConfig;

use crate::error::{VulkanError, VulkanResult};
use crate::shader::reflection::{BuiltIn, InterfaceVariable, PushConstantInfo, ShaderReflection};
use crate::shader::stage::ShaderStage;

const HEADER_WORDS: usize = 5;
const OP_DECORATE: u32 = 71;
const OP_MEMBER_DECORATE: u32 = 72;
const DECORATION_BUILT_IN: u32 = 11;

/// Extract [`ShaderReflection`] from a SPIR-V module
pub fn reflect(code: &[u32], stage: ShaderStage) -> VulkanResult<ShaderReflection> {
    let entry_points = ReflectConfig::new()
        .spv(code)
        .ref_all_rscs(true)
        .reflect()
        .map_err(|e| VulkanError::Reflection(format!("{:?}", e)))?;

    let entry_point = entry_points
        .first()
        .ok_or_else(|| VulkanError::Reflection("module declares no entry point".to_string()))?;
    if entry_points.len() > 1 {
        log::debug!("Module has {} entry points, reflecting '{}'", entry_points.len(), entry_point.name);
    }

    let mut reflection = ShaderReflection::new(entry_point.name.clone());

    for var in &entry_point.vars {
        match var {
            Variable::Input { name, location, ty, .. } => {
                reflection.inputs.push(InterfaceVariable {
                    name: name.clone(),
                    location: Some(location.loc()),
                    format: format_of(ty),
                    built_in: None,
                });
            }
            Variable::Output { name, location, ty, .. } => {
                reflection.outputs.push(InterfaceVariable {
                    name: name.clone(),
                    location: Some(location.loc()),
                    format: format_of(ty),
                    built_in: None,
                });
            }
            Variable::Descriptor { desc_bind, desc_ty, nbind, .. } => {
                reflection = reflection.with_binding(
                    desc_bind.set(),
                    desc_bind.bind(),
                    descriptor_kind(desc_ty)?,
                    (*nbind).max(1),
                );
            }
            Variable::PushConstant { ty, .. } => {
                if let Some(range) = push_constant_range(ty) {
                    reflection.push_constants.push(range);
                }
            }
            _ => {}
        }
    }

    if stage == ShaderStage::Vertex && scan_built_ins(code).contains(&BuiltIn::Position) {
        reflection
            .outputs
            .push(InterfaceVariable::built_in("gl_Position", BuiltIn::Position, vk::Format::R32G32B32A32_SFLOAT));
    }

    Ok(reflection)
}

/// Every `BuiltIn` decoration in the module, in word order
pub fn scan_built_ins(code: &[u32]) -> Vec<BuiltIn> {
    let mut found = Vec::new();
    let mut cursor = HEADER_WORDS;

    while cursor < code.len() {
        let word_count = (code[cursor] >> 16) as usize;
        let opcode = code[cursor] & 0xffff;
        if word_count == 0 || cursor + word_count > code.len() {
            log::warn!("Truncated SPIR-V instruction at word {}", cursor);
            break;
        }
        let operands = &code[cursor + 1..cursor + word_count];
        let decoration = match opcode {
            // OpDecorate %target Decoration ...
            OP_DECORATE => operands.get(1..),
            // OpMemberDecorate %struct member Decoration ...
            OP_MEMBER_DECORATE => operands.get(2..),
            _ => None,
        };
        if let Some([DECORATION_BUILT_IN, value, ..]) = decoration {
            found.push(BuiltIn::from_spirv(*value));
        }
        cursor += word_count;
    }

    found
}

fn descriptor_kind(desc_ty: &DescriptorType) -> VulkanResult<vk::DescriptorType> {
    #[allow(unreachable_patterns)]
    let kind = match desc_ty {
        DescriptorType::Sampler(..) => vk::DescriptorType::SAMPLER,
        DescriptorType::CombinedImageSampler(..) => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        DescriptorType::SampledImage(..) => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorType::StorageImage(..) => vk::DescriptorType::STORAGE_IMAGE,
        DescriptorType::UniformTexelBuffer(..) => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        DescriptorType::StorageTexelBuffer(..) => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        DescriptorType::UniformBuffer(..) => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorType::StorageBuffer(..) => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorType::InputAttachment(..) => vk::DescriptorType::INPUT_ATTACHMENT,
        DescriptorType::AccelStruct(..) => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
        other => return Err(VulkanError::Reflection(format!("unsupported descriptor type {:?}", other))),
    };
    Ok(kind)
}

fn push_constant_range(ty: &Type) -> Option<PushConstantInfo> {
    let size = ty.nbyte()?;
    let offset = match ty {
        Type::Struct(st) => st.members.iter().filter_map(|member| member.offset).min().unwrap_or(0),
        _ => 0,
    };
    Some(PushConstantInfo { offset: offset as u32, size: size.saturating_sub(offset) as u32 })
}

fn format_of(ty: &Type) -> vk::Format {
    match ty {
        Type::Scalar(scalar) => scalar_format(scalar, 1),
        Type::Vector(vector) => scalar_format(&vector.scalar_ty, vector.nscalar as usize),
        _ => vk::Format::UNDEFINED,
    }
}

fn scalar_format(scalar: &ScalarType, components: usize) -> vk::Format {
    const F32: [vk::Format; 4] = [
        vk::Format::R32_SFLOAT,
        vk::Format::R32G32_SFLOAT,
        vk::Format::R32G32B32_SFLOAT,
        vk::Format::R32G32B32A32_SFLOAT,
    ];
    const F64: [vk::Format; 4] = [
        vk::Format::R64_SFLOAT,
        vk::Format::R64G64_SFLOAT,
        vk::Format::R64G64B64_SFLOAT,
        vk::Format::R64G64B64A64_SFLOAT,
    ];
    const I32: [vk::Format; 4] = [
        vk::Format::R32_SINT,
        vk::Format::R32G32_SINT,
        vk::Format::R32G32B32_SINT,
        vk::Format::R32G32B32A32_SINT,
    ];
    const U32: [vk::Format; 4] = [
        vk::Format::R32_UINT,
        vk::Format::R32G32_UINT,
        vk::Format::R32G32B32_UINT,
        vk::Format::R32G32B32A32_UINT,
    ];

    let table = match scalar {
        ScalarType::Float { bits: 64 } => &F64,
        ScalarType::Float { .. } => &F32,
        ScalarType::Integer { is_signed: true, .. } => &I32,
        ScalarType::Integer { is_signed: false, .. } => &U32,
        _ => return vk::Format::UNDEFINED,
    };
    components
        .checked_sub(1)
        .and_then(|index| table.get(index))
        .copied()
        .unwrap_or(vk::Format::UNDEFINED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::unit::SPIRV_MAGIC;

    fn instruction(opcode: u32, operands: &[u32]) -> Vec<u32> {
        let mut words = vec![((operands.len() as u32 + 1) << 16) | opcode];
        words.extend_from_slice(operands);
        words
    }

    fn module(body: &[Vec<u32>]) -> Vec<u32> {
        let mut words = vec![SPIRV_MAGIC, 0x0001_0000, 0, 16, 0];
        for inst in body {
            words.extend_from_slice(inst);
        }
        words
    }

    #[test]
    fn test_scan_finds_member_position() {
        let code = module(&[
            instruction(OP_MEMBER_DECORATE, &[8, 0, DECORATION_BUILT_IN, 0]),
            instruction(OP_MEMBER_DECORATE, &[8, 1, DECORATION_BUILT_IN, 1]),
            instruction(OP_DECORATE, &[9, 30, 0]),
        ]);
        assert_eq!(scan_built_ins(&code), vec![BuiltIn::Position, BuiltIn::PointSize]);
    }

    #[test]
    fn test_scan_ignores_location_decorations() {
        // OpDecorate %12 Location 0
        let code = module(&[instruction(OP_DECORATE, &[12, 30, 0])]);
        assert!(scan_built_ins(&code).is_empty());
    }

    #[test]
    fn test_scan_stops_on_truncated_instruction() {
        let mut code = module(&[instruction(OP_DECORATE, &[5, DECORATION_BUILT_IN, 0])]);
        code.push((9 << 16) | OP_DECORATE);
        assert_eq!(scan_built_ins(&code), vec![BuiltIn::Position]);
    }

    #[test]
    fn test_scalar_format_table() {
        let float = ScalarType::Float { bits: 32 };
        assert_eq!(scalar_format(&float, 4), vk::Format::R32G32B32A32_SFLOAT);
        assert_eq!(scalar_format(&float, 0), vk::Format::UNDEFINED);
        assert_eq!(scalar_format(&ScalarType::Boolean, 1), vk::Format::UNDEFINED);
    }
}
