//! Command pool and per-frame command buffer recording

use std::sync::Arc;

use ash::vk;

use crate::device::logical::{destroy, DeviceChild, DeviceShared};
use crate::error::{VulkanError, VulkanResult};

/// Command pool whose buffers can be reset individually
///
/// Buffers allocated from the pool are freed with it.
pub struct CommandPool {
    pool: DeviceChild<vk::CommandPool>,
    queue_family: u32,
}

impl CommandPool {
    /// Create a pool for `queue_family`
    pub fn new(device: &Arc<DeviceShared>, queue_family: u32) -> VulkanResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);

        let pool = unsafe { device.raw().create_command_pool(&create_info, None).map_err(VulkanError::Api)? };
        Ok(Self { pool: device.own(pool, destroy::command_pool), queue_family })
    }

    /// Allocate `count` primary command buffers
    pub fn allocate(&self, device: &DeviceShared, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool.get())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { device.raw().allocate_command_buffers(&alloc_info).map_err(VulkanError::Api) }
    }

    /// Pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.pool.get()
    }

    /// Queue family the pool submits to
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }
}

/// Reset `command_buffer`, run `record` between begin and end
pub fn record_one_time<F>(device: &ash::Device, command_buffer: vk::CommandBuffer, record: F) -> VulkanResult<()>
where
    F: FnOnce() -> VulkanResult<()>,
{
    let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    unsafe {
        device
            .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
            .map_err(VulkanError::Api)?;
        device.begin_command_buffer(command_buffer, &begin_info).map_err(VulkanError::Api)?;
    }

    let recorded = record();

    // End even on failure so the buffer does not stay in the recording state.
    let ended = unsafe { device.end_command_buffer(command_buffer).map_err(VulkanError::Api) };
    recorded?;
    ended
}

/// Render pass scope; ends the pass when dropped
pub struct ActiveRenderPass<'a> {
    device: &'a ash::Device,
    command_buffer: vk::CommandBuffer,
}

impl<'a> ActiveRenderPass<'a> {
    /// Begin `render_pass` on `framebuffer`, clearing the color attachment
    pub fn begin(
        device: &'a ash::Device,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) -> Self {
        let clear_values = [vk::ClearValue { color: vk::ClearColorValue { float32: clear_color } }];
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent })
            .clear_values(&clear_values);

        unsafe { device.cmd_begin_render_pass(command_buffer, &begin_info, vk::SubpassContents::INLINE) };
        Self { device, command_buffer }
    }

    /// Non-indexed draw
    pub fn draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.device
                .cmd_draw(self.command_buffer, vertex_count, instance_count, first_vertex, first_instance)
        }
    }

    /// Push constant bytes for `stages`
    pub fn push_constants(&self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]) {
        unsafe { self.device.cmd_push_constants(self.command_buffer, layout, stages, offset, data) }
    }

    /// Command buffer being recorded
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }
}

impl Drop for ActiveRenderPass<'_> {
    fn drop(&mut self) {
        unsafe { self.device.cmd_end_render_pass(self.command_buffer) }
    }
}
