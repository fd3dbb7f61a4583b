//! Graphics pipeline with its single-attachment render pass

use std::sync::Arc;

use ash::vk;

use crate::device::logical::{destroy, DeviceChild, DeviceShared};
use crate::error::{VulkanError, VulkanResult};
use crate::pipeline::base::{PipelineBase, ShaderModule};
use crate::pipeline::interface::{order_graphics_stages, validate_stage_interfaces, InterfaceDiagnostic};
use crate::pipeline::layout::PipelineLayoutDescription;
use crate::shader::ShaderStageUnit;

/// Color format and size a graphics pipeline renders at
#[derive(Debug, Clone, Copy)]
pub struct RenderTarget {
    /// Color attachment format
    pub format: vk::Format,
    /// Initial viewport and scissor size
    pub extent: vk::Extent2D,
}

/// Everything decided before touching the device
///
/// Building the plan checks the mandatory stages, orders the units, runs the
/// interface checks and merges the layout. Nothing native exists yet.
#[derive(Debug, Clone)]
pub struct GraphicsPipelinePlan {
    stages: Vec<ShaderStageUnit>,
    layout: PipelineLayoutDescription,
    diagnostics: Vec<InterfaceDiagnostic>,
}

impl GraphicsPipelinePlan {
    /// Validate and order `units`
    pub fn new(units: &[ShaderStageUnit]) -> VulkanResult<Self> {
        let ordered = order_graphics_stages(units)?;
        let diagnostics = validate_stage_interfaces(&ordered);
        let layout = PipelineLayoutDescription::from_units(ordered.iter().copied());
        Ok(Self { stages: ordered.into_iter().cloned().collect(), layout, diagnostics })
    }

    /// Units in pipeline order
    pub fn stages(&self) -> &[ShaderStageUnit] {
        &self.stages
    }

    /// Merged layout
    pub fn layout(&self) -> &PipelineLayoutDescription {
        &self.layout
    }

    /// Interface problems found
    pub fn diagnostics(&self) -> &[InterfaceDiagnostic] {
        &self.diagnostics
    }
}

fn viewport_for(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

fn scissor_for(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent }
}

fn create_render_pass(device: &Arc<DeviceShared>, format: vk::Format) -> VulkanResult<DeviceChild<vk::RenderPass>> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();
    let attachments = [color_attachment];

    let color_refs = [vk::AttachmentReference { attachment: 0, layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL }];
    let subpasses = [vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)
        .build()];

    // The image-acquired semaphore is waited on at this stage, so the layout
    // transition has to wait for it too.
    let dependencies = [vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .build()];

    let create_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    let render_pass = unsafe { device.raw().create_render_pass(&create_info, None).map_err(VulkanError::Api)? };
    Ok(device.own(render_pass, destroy::render_pass))
}

/// Graphics pipeline rendering into one color attachment
pub struct GraphicsPipeline {
    base: PipelineBase,
    render_pass: DeviceChild<vk::RenderPass>,
    target: RenderTarget,
    viewport: vk::Viewport,
    scissor: vk::Rect2D,
    diagnostics: Vec<InterfaceDiagnostic>,
}

impl GraphicsPipeline {
    /// Validate `units` and build the pipeline for `target`
    pub fn new(
        device: &Arc<DeviceShared>,
        name: impl Into<String>,
        units: &[ShaderStageUnit],
        target: RenderTarget,
    ) -> VulkanResult<Self> {
        let plan = GraphicsPipelinePlan::new(units)?;
        Self::from_plan(device, name, plan, target)
    }

    /// Build from an already validated plan
    pub fn from_plan(
        device: &Arc<DeviceShared>,
        name: impl Into<String>,
        plan: GraphicsPipelinePlan,
        target: RenderTarget,
    ) -> VulkanResult<Self> {
        let name = name.into();
        let render_pass = create_render_pass(device, target.format)?;
        let modules = ShaderModule::for_units(device, &plan.stages)?;
        let layout = plan.layout.build(device)?;

        let stages: Vec<vk::PipelineShaderStageCreateInfo> = modules.iter().map(ShaderModule::stage_info).collect();

        // Vertices are generated in the shader; nothing is bound.
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder().viewport_count(1).scissor_count(1);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .render_pass(render_pass.get())
            .subpass(0);

        let pipelines = unsafe {
            device
                .raw()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
                .map_err(|(_, err)| VulkanError::Api(err))?
        };
        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InitializationFailed("Driver returned no graphics pipeline".to_string()))?;

        log::debug!(
            "Graphics pipeline '{}' created: {} stage(s), {} interface diagnostic(s)",
            name,
            stages.len(),
            plan.diagnostics.len()
        );

        Ok(Self {
            base: PipelineBase::new(device, name, pipeline, layout, vk::PipelineBindPoint::GRAPHICS),
            render_pass,
            target,
            viewport: viewport_for(target.extent),
            scissor: scissor_for(target.extent),
            diagnostics: plan.diagnostics,
        })
    }

    /// Shared pipeline state
    pub fn base(&self) -> &PipelineBase {
        &self.base
    }

    /// Render pass handle
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.get()
    }

    /// Color format the render pass was created for
    pub fn color_format(&self) -> vk::Format {
        self.target.format
    }

    /// Current dynamic viewport
    pub fn viewport(&self) -> vk::Viewport {
        self.viewport
    }

    /// Current dynamic scissor
    pub fn scissor(&self) -> vk::Rect2D {
        self.scissor
    }

    /// Resize the dynamic viewport and scissor
    pub fn set_extent(&mut self, extent: vk::Extent2D) {
        self.target.extent = extent;
        self.viewport = viewport_for(extent);
        self.scissor = scissor_for(extent);
    }

    /// Interface diagnostics found at construction
    pub fn diagnostics(&self) -> &[InterfaceDiagnostic] {
        &self.diagnostics
    }

    /// Bind the pipeline and set viewport and scissor
    pub fn bind(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.base.with_device(|device| unsafe {
            let raw = device.raw();
            raw.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, self.base.handle());
            raw.cmd_set_viewport(command_buffer, 0, &[self.viewport]);
            raw.cmd_set_scissor(command_buffer, 0, &[self.scissor]);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::{BuiltIn, InterfaceVariable, ShaderReflection, ShaderStage, SPIRV_MAGIC};

    fn unit(stage: ShaderStage, reflection: ShaderReflection) -> ShaderStageUnit {
        ShaderStageUnit::new(stage.name(), vec![SPIRV_MAGIC], stage, Some(reflection)).unwrap()
    }

    #[test]
    fn test_plan_without_fragment_is_rejected() {
        let units = vec![unit(ShaderStage::Vertex, ShaderReflection::new("main"))];
        assert!(matches!(
            GraphicsPipelinePlan::new(&units),
            Err(VulkanError::MissingShaderStage { pipeline: "graphics", stage: "fragment" })
        ));
    }

    #[test]
    fn test_plan_orders_and_merges() {
        let position = InterfaceVariable::built_in("gl_Position", BuiltIn::Position, vk::Format::R32G32B32A32_SFLOAT);
        let units = vec![
            unit(
                ShaderStage::Fragment,
                ShaderReflection::new("main").with_binding(0, 0, vk::DescriptorType::UNIFORM_BUFFER, 1),
            ),
            unit(
                ShaderStage::Vertex,
                ShaderReflection::new("main")
                    .with_output(position)
                    .with_binding(0, 0, vk::DescriptorType::UNIFORM_BUFFER, 1),
            ),
        ];
        let plan = GraphicsPipelinePlan::new(&units).unwrap();
        assert_eq!(plan.stages()[0].stage(), ShaderStage::Vertex);
        assert_eq!(plan.stages()[1].stage(), ShaderStage::Fragment);
        assert!(plan.diagnostics().is_empty());
        assert_eq!(
            plan.layout().sets()[0].binding(0).unwrap().stages,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn test_plan_keeps_diagnostics_without_failing() {
        let units = vec![
            unit(ShaderStage::Vertex, ShaderReflection::new("main")),
            unit(
                ShaderStage::Fragment,
                ShaderReflection::new("main").with_input(InterfaceVariable::located("uv", 0, vk::Format::R32G32_SFLOAT)),
            ),
        ];
        let plan = GraphicsPipelinePlan::new(&units).unwrap();
        assert_eq!(plan.diagnostics().len(), 2);
    }

    #[test]
    fn test_viewport_follows_extent() {
        let extent = vk::Extent2D { width: 640, height: 480 };
        let viewport = viewport_for(extent);
        assert_eq!((viewport.width, viewport.height), (640.0, 480.0));
        assert_eq!(viewport.max_depth, 1.0);
        assert_eq!(scissor_for(extent).extent.width, 640);
    }
}
