// Command buffers
//
// One primary buffer per ring slot, reset and re-recorded every frame.
// The same pool also serves blocking one-shot uploads at load time.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::device::DeviceContext;

pub struct CommandRing {
    pub pool: vk::CommandPool,
    pub buffers: Vec<vk::CommandBuffer>,
    device: Arc<DeviceContext>,
}

impl CommandRing {
    pub fn new(device: &Arc<DeviceContext>, slots: usize) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(device.queue_families.graphics);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(slots as u32);

        let buffers = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")?;

        Ok(Self {
            pool,
            buffers,
            device: Arc::clone(device),
        })
    }

    pub fn get(&self, slot: usize) -> vk::CommandBuffer {
        self.buffers[slot]
    }

    /// Record and submit a throwaway command buffer, then wait for the
    /// graphics queue to drain
    pub fn submit_one_time<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let device = &self.device.device;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let cmd = unsafe { device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate one-time command buffer")?[0];

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        let result = (|| -> Result<()> {
            unsafe {
                device
                    .begin_command_buffer(cmd, &begin_info)
                    .context("Failed to begin one-time command buffer")?;
                record(cmd);
                device
                    .end_command_buffer(cmd)
                    .context("Failed to end one-time command buffer")?;

                let command_buffers = [cmd];
                let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
                device
                    .queue_submit(
                        self.device.graphics_queue,
                        &[submit_info.build()],
                        vk::Fence::null(),
                    )
                    .context("Failed to submit one-time command buffer")?;
                device
                    .queue_wait_idle(self.device.graphics_queue)
                    .context("Failed waiting for one-time submission")?;
            }
            Ok(())
        })();

        unsafe {
            device.free_command_buffers(self.pool, &[cmd]);
        }

        result
    }
}

impl Drop for CommandRing {
    fn drop(&mut self) {
        unsafe {
            // Frees the buffers with it
            self.device.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// Color first, then depth/stencil, matching the render pass attachments
pub fn clear_values(color: [f32; 4]) -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ]
}

/// Everything needed to record the single indexed draw of a frame
#[derive(Debug, Clone, Copy)]
pub struct DrawCall {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub clear_color: [f32; 4],
}

/// Reset `cmd` and record one render pass with one indexed draw
pub fn record_draw(device: &ash::Device, cmd: vk::CommandBuffer, draw: &DrawCall) -> Result<()> {
    let clear_values = clear_values(draw.clear_color);

    let render_pass_info = vk::RenderPassBeginInfo::builder()
        .render_pass(draw.render_pass)
        .framebuffer(draw.framebuffer)
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: draw.extent,
        })
        .clear_values(&clear_values);

    unsafe {
        device
            .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
            .context("Failed to reset command buffer")?;

        device
            .begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::builder())
            .context("Failed to begin command buffer")?;

        device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, draw.pipeline);
        device.cmd_bind_vertex_buffers(cmd, 0, &[draw.vertex_buffer], &[0]);
        device.cmd_bind_index_buffer(cmd, draw.index_buffer, 0, vk::IndexType::UINT32);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            draw.pipeline_layout,
            0,
            &[draw.descriptor_set],
            &[],
        );
        device.cmd_draw_indexed(cmd, draw.index_count, 1, 0, 0, 0);
        device.cmd_end_render_pass(cmd);

        device
            .end_command_buffer(cmd)
            .context("Failed to record command buffer")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_values_hold_color_then_far_depth() {
        let values = clear_values([0.1, 0.2, 0.3, 1.0]);
        unsafe {
            assert_eq!(values[0].color.float32, [0.1, 0.2, 0.3, 1.0]);
            assert_eq!(values[1].depth_stencil.depth, 1.0);
            assert_eq!(values[1].depth_stencil.stencil, 0);
        }
    }
}
