//! # Device-Bound Elements
//!
//! Everything that belongs to one logical device: its queues, command pool,
//! swapchain, shader cache, pipelines and in-flight frame slots. The
//! [`DeviceBoundElements`] bundle is what the handler hands out per device,
//! and every attach or draw call on a device lands here.
//!
//! ## Lifecycle
//!
//! - **Creation**: the logical device, command pool and frame slots are built
//!   from the chosen physical device and the configured frame count
//! - **Attachment**: a swapchain first, then graphics pipelines that target it;
//!   compute and ray tracing pipelines need no swapchain
//! - **Replacement**: rebuilding a pipeline or the framebuffers waits for the
//!   device to go idle before the old objects are destroyed
//! - **Teardown**: the device is waited idle, then fields drop in order
//!
//! ## Drop Order
//!
//! Field order is drop order: frame slots, pipelines and the swapchain go
//! before the surface and the command pool, and the device `Arc` goes last.

use std::sync::Arc;

use ash::vk;

use crate::commands::{ActiveRenderPass, CommandPool};
use crate::config::RendererConfig;
use crate::device::instance::VulkanInstance;
use crate::device::logical::{DeviceShared, Queues};
use crate::device::physical::{PhysicalDeviceInfo, QueueFamilyIndices, QueueRole};
use crate::device::surface::Surface;
use crate::error::{VulkanError, VulkanResult};
use crate::pipeline::{ComputePipeline, GraphicsPipeline, NamedRegistry, PipelineManager, RayTracingPipeline};
use crate::shader::{ShaderStage, ShaderStageUnit};
use crate::swapchain::Swapchain;
use crate::sync::{FrameContext, FrameSlot, FrameStatus, FrameSyncArray, SynchronisationManager, VulkanFrameBackend};

/// What a frame's record callback can reach
pub struct RecordContext<'a> {
    /// Slot, image and command buffer of this frame
    pub frame: &'a FrameContext,
    /// Device function table for `cmd_*` calls
    pub device: &'a ash::Device,
    /// Pipelines registered on the device
    pub pipelines: &'a PipelineManager,
}

impl<'a> RecordContext<'a> {
    /// Begin the main graphics pipeline's render pass on this frame's image and bind the pipeline
    pub fn begin_main_pass(&self, clear_color: [f32; 4]) -> VulkanResult<ActiveRenderPass<'a>> {
        let pipeline = self
            .pipelines
            .main_graphics()
            .ok_or_else(|| VulkanError::PipelineNotFound("main graphics pipeline".to_string()))?;
        let pass = ActiveRenderPass::begin(
            self.device,
            self.frame.command_buffer,
            pipeline.render_pass(),
            self.frame.framebuffer,
            self.frame.extent,
            clear_color,
        );
        pipeline.bind(self.frame.command_buffer)?;
        Ok(pass)
    }

    /// Command buffer being recorded
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.frame.command_buffer
    }
}

/// Look up `names` in a shader cache, in order
pub fn resolve_shaders(cache: &NamedRegistry<ShaderStageUnit>, names: &[&str]) -> VulkanResult<Vec<ShaderStageUnit>> {
    names
        .iter()
        .map(|name| {
            cache
                .get(name)
                .cloned()
                .ok_or_else(|| VulkanError::InvalidShader(format!("no shader named '{}' is loaded", name)))
        })
        .collect()
}

/// Logical device bundle: queues, frame slots, swapchain, pipelines and shader cache
pub struct DeviceBoundElements {
    name: String,
    frames: SynchronisationManager<FrameSlot>,
    pipelines: PipelineManager,
    swapchain: Option<Swapchain>,
    surface: Arc<Surface>,
    shaders: NamedRegistry<ShaderStageUnit>,
    command_pool: CommandPool,
    queues: Queues,
    families: QueueFamilyIndices,
    physical: PhysicalDeviceInfo,
    prefer_mailbox: bool,
    fence_timeout: u64,
    device: Arc<DeviceShared>,
}

impl DeviceBoundElements {
    /// Create the logical device on `physical` and its per-frame resources
    pub fn new(
        name: impl Into<String>,
        instance: &Arc<VulkanInstance>,
        physical: PhysicalDeviceInfo,
        families: QueueFamilyIndices,
        surface: Arc<Surface>,
        config: &RendererConfig,
    ) -> VulkanResult<Self> {
        let name = name.into();
        let device = DeviceShared::new(instance, &physical, &families)?;
        let queues = Queues::fetch(&device, &families)?;

        let command_pool = CommandPool::new(&device, families.require(QueueRole::Graphics)?)?;
        let command_buffers = command_pool.allocate(&device, config.frames_in_flight as u32)?;
        let frames = FrameSyncArray::build(command_buffers.len(), |slot| FrameSlot::new(&device, command_buffers[slot]))?
            .ok_or_else(|| VulkanError::InitializationFailed("at least one in-flight frame is required".to_string()))?;

        log::info!("Device '{}' ready on '{}', {} frame(s) in flight", name, physical.name(), frames.len());

        Ok(Self {
            name,
            frames: SynchronisationManager::new(frames),
            pipelines: PipelineManager::new(),
            swapchain: None,
            surface,
            shaders: NamedRegistry::new(),
            command_pool,
            queues,
            families,
            physical,
            prefer_mailbox: config.prefer_mailbox,
            fence_timeout: config.fence_timeout(),
            device,
        })
    }

    /// Registry name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared device
    pub fn device(&self) -> &Arc<DeviceShared> {
        &self.device
    }

    /// Physical device in use
    pub fn physical(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    /// Queue family per role
    pub fn families(&self) -> &QueueFamilyIndices {
        &self.families
    }

    /// Queue per role
    pub fn queues(&self) -> Queues {
        self.queues
    }

    /// Command pool the frame command buffers come from
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    /// Attached swapchain
    pub fn swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.as_ref()
    }

    /// Registered pipelines
    pub fn pipelines(&self) -> &PipelineManager {
        &self.pipelines
    }

    /// Registered pipelines, mutably
    pub fn pipelines_mut(&mut self) -> &mut PipelineManager {
        &mut self.pipelines
    }

    /// Frame protocol state
    pub fn frames(&self) -> &SynchronisationManager<FrameSlot> {
        &self.frames
    }

    /// Report a surface resize to the next frame
    pub fn notify_resized(&mut self) {
        self.frames.notify_resized();
    }

    /// Create the swapchain for the bundle's surface, replacing any existing one
    pub fn attach_swapchain(&mut self, extent: vk::Extent2D) -> VulkanResult<()> {
        if self.swapchain.is_some() {
            log::warn!("Device '{}' already has a swapchain; recreating it", self.name);
            return self.recreate_swapchain(extent);
        }
        let mut swapchain = Swapchain::new(&self.device, &self.surface, extent, self.prefer_mailbox)?;
        if let Some(main) = self.pipelines.main_graphics() {
            swapchain.create_framebuffers(main.render_pass())?;
        }
        log::info!(
            "Swapchain attached to '{}': {}x{}, {} image(s), {:?}",
            self.name,
            swapchain.extent().width,
            swapchain.extent().height,
            swapchain.image_count(),
            swapchain.present_mode()
        );
        self.swapchain = Some(swapchain);
        Ok(())
    }

    /// Build a graphics pipeline targeting the swapchain
    ///
    /// The first graphics pipeline becomes main even when `main` is false.
    /// Framebuffers follow the main pipeline's render pass. Replacing a
    /// pipeline or existing framebuffers waits for the device to go idle.
    pub fn attach_graphics_pipeline(
        &mut self,
        name: impl Into<String>,
        units: &[ShaderStageUnit],
        main: bool,
    ) -> VulkanResult<&GraphicsPipeline> {
        let name = name.into();
        let swapchain = self.swapchain.as_mut().ok_or(VulkanError::SwapchainMissing)?;
        let main = main || self.pipelines.main_graphics().is_none();
        self.pipelines
            .create_graphics(&self.device, name.clone(), units, swapchain.render_target(), main)?;

        if let Some(main) = self.pipelines.main_graphics() {
            swapchain.create_framebuffers(main.render_pass())?;
        }
        self.pipelines.graphics(&name).ok_or(VulkanError::PipelineNotFound(name))
    }

    /// Build a graphics pipeline from shaders already in the cache
    pub fn attach_graphics_pipeline_from_cache(
        &mut self,
        name: impl Into<String>,
        shaders: &[&str],
        main: bool,
    ) -> VulkanResult<&GraphicsPipeline> {
        let units = resolve_shaders(&self.shaders, shaders)?;
        self.attach_graphics_pipeline(name, &units, main)
    }

    /// Build a compute pipeline
    pub fn attach_compute_pipeline(
        &mut self,
        name: impl Into<String>,
        units: &[ShaderStageUnit],
        main: bool,
    ) -> VulkanResult<&ComputePipeline> {
        self.pipelines.create_compute(&self.device, name, units, main)
    }

    /// Build a ray tracing pipeline description
    pub fn attach_ray_tracing_pipeline(
        &mut self,
        name: impl Into<String>,
        units: &[ShaderStageUnit],
        main: bool,
    ) -> VulkanResult<&RayTracingPipeline> {
        self.pipelines.create_ray_tracing(&self.device, name, units, main)
    }

    /// Load SPIR-V bytes into the shader cache under `name`
    pub fn load_shader(&mut self, name: impl Into<String>, bytes: &[u8], stage: ShaderStage) -> VulkanResult<&ShaderStageUnit> {
        let name = name.into();
        #[cfg(feature = "spirv-reflect")]
        let unit = ShaderStageUnit::from_bytes_reflected(name.clone(), bytes, stage)?;
        #[cfg(not(feature = "spirv-reflect"))]
        let unit = ShaderStageUnit::from_bytes(name.clone(), bytes, stage, None)?;
        log::debug!("Loaded {} shader '{}' ({} bytes)", stage, name, bytes.len());
        Ok(self.insert_shader(unit))
    }

    /// Put an already built unit into the shader cache
    pub fn insert_shader(&mut self, unit: ShaderStageUnit) -> &ShaderStageUnit {
        let name = unit.name().to_string();
        let (stored, _) = self.shaders.insert(name, unit);
        stored
    }

    /// Cached shader by name
    pub fn shader(&self, name: &str) -> Option<&ShaderStageUnit> {
        self.shaders.get(name)
    }

    /// Rebuild the swapchain for a new window size
    ///
    /// Waits for the device to go idle, then rebuilds framebuffers and
    /// resizes every graphics pipeline's viewport.
    pub fn recreate_swapchain(&mut self, extent: vk::Extent2D) -> VulkanResult<()> {
        let swapchain = self.swapchain.as_mut().ok_or(VulkanError::SwapchainMissing)?;
        self.device.wait_idle()?;
        swapchain.recreate(&self.surface, extent, self.prefer_mailbox)?;

        if let Some(main) = self.pipelines.main_graphics() {
            if main.color_format() != swapchain.format().format {
                log::warn!(
                    "Swapchain format changed to {:?}; pipeline '{}' renders {:?}",
                    swapchain.format().format,
                    main.base().name(),
                    main.color_format()
                );
            }
            swapchain.create_framebuffers(main.render_pass())?;
        }

        let extent = swapchain.extent();
        let names: Vec<String> = self.pipelines.names().map(str::to_string).collect();
        for name in names {
            if let Some(pipeline) = self.pipelines.graphics_mut(&name) {
                pipeline.set_extent(extent);
            }
        }
        Ok(())
    }

    /// Run one frame; `record` fills the frame's command buffer
    ///
    /// A status other than [`FrameStatus::Presented`] asks the caller to
    /// call [`Self::recreate_swapchain`].
    pub fn draw_frame<F>(&mut self, record: F) -> VulkanResult<FrameStatus>
    where
        F: FnOnce(&RecordContext<'_>) -> VulkanResult<()>,
    {
        let swapchain = self.swapchain.as_ref().ok_or(VulkanError::SwapchainMissing)?;
        let mut backend = VulkanFrameBackend::new(&self.device, swapchain, self.queues, self.fence_timeout);
        let device = self.device.raw();
        let pipelines = &self.pipelines;

        let status = self
            .frames
            .draw_frame(&mut backend, |frame| record(&RecordContext { frame, device, pipelines }))?;
        if status != FrameStatus::Presented {
            log::debug!("Frame on '{}' reported {:?}", self.name, status);
        }
        Ok(status)
    }

    /// Block until the device has no work in flight
    pub fn wait_idle(&self) -> VulkanResult<()> {
        self.device.wait_idle()
    }
}

impl Drop for DeviceBoundElements {
    fn drop(&mut self) {
        if let Err(err) = self.device.wait_idle() {
            log::warn!("Device '{}' failed to go idle before teardown: {}", self.name, err);
        }
        log::debug!("Releasing device '{}'", self.name);
    }
}
