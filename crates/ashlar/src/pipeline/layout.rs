//! Pipeline layout derived from shader reflection
//!
//! Bindings are identified by `(set, binding)` and push-constant ranges by
//! `(offset, size)`. A second declaration of the same identity only widens
//! the stage visibility. Declaring different descriptor kinds at one
//! `(set, binding)` is not detected; the first kind wins.

use std::sync::Arc;

use ash::vk;

use crate::device::logical::{destroy, DeviceChild, DeviceShared};
use crate::error::{VulkanError, VulkanResult};
use crate::shader::{DescriptorBindingInfo, PushConstantInfo, ShaderStageUnit};

/// One binding of a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBindingDescription {
    /// Binding index
    pub binding: u32,
    /// Resource kind
    pub kind: vk::DescriptorType,
    /// Array element count
    pub count: u32,
    /// Stages that access the binding
    pub stages: vk::ShaderStageFlags,
}

impl DescriptorBindingDescription {
    fn to_vk(self) -> vk::DescriptorSetLayoutBinding {
        vk::DescriptorSetLayoutBinding::builder()
            .binding(self.binding)
            .descriptor_type(self.kind)
            .descriptor_count(self.count)
            .stage_flags(self.stages)
            .build()
    }
}

/// De-duplicated bindings of one descriptor set, sorted by binding index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorSetLayoutDescription {
    bindings: Vec<DescriptorBindingDescription>,
}

impl DescriptorSetLayoutDescription {
    fn merge(&mut self, info: &DescriptorBindingInfo, stage: vk::ShaderStageFlags) {
        match self.bindings.binary_search_by_key(&info.binding, |existing| existing.binding) {
            Ok(index) => {
                let existing = &mut self.bindings[index];
                if existing.kind != info.kind {
                    log::debug!(
                        "Binding {} declared as {:?} and {:?}; keeping the first",
                        info.binding,
                        existing.kind,
                        info.kind
                    );
                }
                existing.stages |= stage;
            }
            Err(index) => self.bindings.insert(
                index,
                DescriptorBindingDescription { binding: info.binding, kind: info.kind, count: info.count, stages: stage },
            ),
        }
    }

    /// Bindings of this set
    pub fn bindings(&self) -> &[DescriptorBindingDescription] {
        &self.bindings
    }

    /// Binding by index
    pub fn binding(&self, binding: u32) -> Option<&DescriptorBindingDescription> {
        self.bindings.iter().find(|description| description.binding == binding)
    }

    /// Whether the set is a gap filler
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Merged layout of every stage of one pipeline
#[derive(Debug, Clone, Default)]
pub struct PipelineLayoutDescription {
    sets: Vec<DescriptorSetLayoutDescription>,
    push_constants: Vec<vk::PushConstantRange>,
}

impl PipelineLayoutDescription {
    /// Empty description
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge all `units` in order
    pub fn from_units<'a>(units: impl IntoIterator<Item = &'a ShaderStageUnit>) -> Self {
        let mut description = Self::new();
        for unit in units {
            description.add_unit(unit);
        }
        description
    }

    /// Merge one unit; units without usable reflection are skipped
    pub fn add_unit(&mut self, unit: &ShaderStageUnit) {
        let Some(reflection) = unit.reflection() else {
            log::warn!("Shader '{}' ({}) has no reflection data, skipped in layout", unit.name(), unit.stage());
            return;
        };
        let stage = unit.stage().to_vk();

        for binding in &reflection.descriptor_bindings {
            let set = binding.set as usize;
            if self.sets.len() <= set {
                self.sets.resize_with(set + 1, DescriptorSetLayoutDescription::default);
            }
            self.sets[set].merge(binding, stage);
        }

        for &PushConstantInfo { offset, size } in &reflection.push_constants {
            match self.push_constants.iter_mut().find(|range| range.offset == offset && range.size == size) {
                Some(range) => range.stage_flags |= stage,
                None => self.push_constants.push(vk::PushConstantRange { stage_flags: stage, offset, size }),
            }
        }
    }

    /// Set descriptions indexed by set number, gaps included
    pub fn sets(&self) -> &[DescriptorSetLayoutDescription] {
        &self.sets
    }

    /// Push-constant ranges with unioned stages
    pub fn push_constants(&self) -> &[vk::PushConstantRange] {
        &self.push_constants
    }

    /// Create the descriptor set layouts and the pipeline layout
    pub fn build(&self, device: &Arc<DeviceShared>) -> VulkanResult<PipelineLayout> {
        let mut set_layouts = Vec::with_capacity(self.sets.len());
        for set in &self.sets {
            let bindings: Vec<vk::DescriptorSetLayoutBinding> =
                set.bindings.iter().map(|binding| binding.to_vk()).collect();
            let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
            let layout = unsafe {
                device
                    .raw()
                    .create_descriptor_set_layout(&create_info, None)
                    .map_err(VulkanError::Api)?
            };
            set_layouts.push(device.own(layout, destroy::descriptor_set_layout));
        }

        let raw_set_layouts: Vec<vk::DescriptorSetLayout> = set_layouts.iter().map(|layout| layout.get()).collect();
        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&raw_set_layouts)
            .push_constant_ranges(&self.push_constants);
        let layout = unsafe { device.raw().create_pipeline_layout(&create_info, None).map_err(VulkanError::Api)? };

        log::debug!(
            "Pipeline layout created: {} set(s), {} push-constant range(s)",
            set_layouts.len(),
            self.push_constants.len()
        );

        Ok(PipelineLayout {
            layout: device.own(layout, destroy::pipeline_layout),
            set_layouts,
            description: self.clone(),
        })
    }
}

/// Native pipeline layout with the set layouts it references
pub struct PipelineLayout {
    layout: DeviceChild<vk::PipelineLayout>,
    set_layouts: Vec<DeviceChild<vk::DescriptorSetLayout>>,
    description: PipelineLayoutDescription,
}

impl PipelineLayout {
    /// Pipeline layout handle
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout.get()
    }

    /// Descriptor set layout for `set`
    pub fn set_layout(&self, set: usize) -> Option<vk::DescriptorSetLayout> {
        self.set_layouts.get(set).map(|layout| layout.get())
    }

    /// Description the layout was built from
    pub fn description(&self) -> &PipelineLayoutDescription {
        &self.description
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::{ShaderReflection, ShaderStage, SPIRV_MAGIC};

    fn unit(stage: ShaderStage, reflection: Option<ShaderReflection>) -> ShaderStageUnit {
        ShaderStageUnit::new(format!("{}", stage), vec![SPIRV_MAGIC], stage, reflection).unwrap()
    }

    #[test]
    fn test_shared_binding_unions_stages() {
        let vertex = unit(
            ShaderStage::Vertex,
            Some(ShaderReflection::new("main").with_binding(0, 0, vk::DescriptorType::UNIFORM_BUFFER, 1)),
        );
        let fragment = unit(
            ShaderStage::Fragment,
            Some(
                ShaderReflection::new("main")
                    .with_binding(0, 0, vk::DescriptorType::UNIFORM_BUFFER, 1)
                    .with_binding(0, 1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1),
            ),
        );

        let description = PipelineLayoutDescription::from_units([&vertex, &fragment]);
        assert_eq!(description.sets().len(), 1);
        let set = &description.sets()[0];
        assert_eq!(set.bindings().len(), 2);
        assert_eq!(
            set.binding(0).unwrap().stages,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(set.binding(1).unwrap().stages, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_set_gaps_are_filled_with_empty_sets() {
        let vertex = unit(
            ShaderStage::Vertex,
            Some(
                ShaderReflection::new("main")
                    .with_binding(2, 0, vk::DescriptorType::STORAGE_BUFFER, 1)
                    .with_binding(0, 0, vk::DescriptorType::UNIFORM_BUFFER, 1),
            ),
        );
        let description = PipelineLayoutDescription::from_units([&vertex]);
        assert_eq!(description.sets().len(), 3);
        assert!(!description.sets()[0].is_empty());
        assert!(description.sets()[1].is_empty());
        assert_eq!(description.sets()[2].bindings()[0].kind, vk::DescriptorType::STORAGE_BUFFER);
    }

    #[test]
    fn test_push_constants_merge_by_offset_and_size() {
        let vertex = unit(ShaderStage::Vertex, Some(ShaderReflection::new("main").with_push_constant(0, 64)));
        let fragment = unit(
            ShaderStage::Fragment,
            Some(ShaderReflection::new("main").with_push_constant(0, 64).with_push_constant(64, 16)),
        );
        let description = PipelineLayoutDescription::from_units([&vertex, &fragment]);
        let ranges = description.push_constants();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].stage_flags, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
        assert_eq!((ranges[1].offset, ranges[1].size), (64, 16));
        assert_eq!(ranges[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_unit_without_reflection_is_skipped() {
        let bare = unit(ShaderStage::Vertex, None);
        let invalid = unit(ShaderStage::Geometry, Some(ShaderReflection::default()));
        let fragment = unit(
            ShaderStage::Fragment,
            Some(ShaderReflection::new("main").with_binding(1, 3, vk::DescriptorType::SAMPLER, 2)),
        );
        let description = PipelineLayoutDescription::from_units([&bare, &invalid, &fragment]);
        assert_eq!(description.sets().len(), 2);
        let binding = description.sets()[1].binding(3).unwrap();
        assert_eq!(binding.count, 2);
        assert_eq!(binding.stages, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_conflicting_kind_keeps_first() {
        let vertex = unit(
            ShaderStage::Vertex,
            Some(ShaderReflection::new("main").with_binding(0, 0, vk::DescriptorType::UNIFORM_BUFFER, 1)),
        );
        let fragment = unit(
            ShaderStage::Fragment,
            Some(ShaderReflection::new("main").with_binding(0, 0, vk::DescriptorType::STORAGE_BUFFER, 1)),
        );
        let description = PipelineLayoutDescription::from_units([&vertex, &fragment]);
        let binding = description.sets()[0].binding(0).unwrap();
        assert_eq!(binding.kind, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(binding.stages, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_bindings_sorted_by_index() {
        let compute = unit(
            ShaderStage::Compute,
            Some(
                ShaderReflection::new("main")
                    .with_binding(0, 5, vk::DescriptorType::STORAGE_IMAGE, 1)
                    .with_binding(0, 1, vk::DescriptorType::STORAGE_BUFFER, 1),
            ),
        );
        let description = PipelineLayoutDescription::from_units([&compute]);
        let indices: Vec<u32> = description.sets()[0].bindings().iter().map(|b| b.binding).collect();
        assert_eq!(indices, vec![1, 5]);
    }
}
