// Per-swapchain-image resources
//
// Framebuffers, uniform buffers and descriptor sets are indexed by the
// acquired image, not by the ring slot. They are rebuilt with the swapchain.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use gpu_allocator::MemoryLocation;
use std::mem::size_of;
use std::sync::Arc;

use super::buffer::Buffer;
use super::device::DeviceContext;
use super::pipeline::GraphicsPipeline;
use super::swapchain::Swapchain;
use super::texture::Texture;
use crate::scene::CameraMatrices;

/// Matches the uniform block at binding 0 of the vertex shader
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBufferObject {
    pub fn from_camera(camera: &CameraMatrices) -> Self {
        let mut proj = camera.projection;
        // Vulkan clip space has Y pointing down
        proj.y_axis.y *= -1.0;

        Self {
            model: Mat4::IDENTITY,
            view: camera.view,
            proj,
        }
    }
}

/// Exactly one set's worth of each descriptor type per image
pub fn descriptor_pool_sizes(image_count: u32) -> [vk::DescriptorPoolSize; 2] {
    [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: image_count,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: image_count,
        },
    ]
}

pub struct FrameResources {
    pub framebuffers: Vec<vk::Framebuffer>,
    pub descriptor_sets: Vec<vk::DescriptorSet>,
    descriptor_pool: vk::DescriptorPool,
    uniform_buffers: Vec<Buffer>,
    device: Arc<DeviceContext>,
}

impl FrameResources {
    pub fn new(
        device: &Arc<DeviceContext>,
        swapchain: &Swapchain,
        pipeline: &GraphicsPipeline,
        texture: &Texture,
    ) -> Result<Self> {
        let image_count = swapchain.image_count();

        let mut resources = Self {
            framebuffers: Vec::with_capacity(image_count),
            descriptor_sets: Vec::new(),
            descriptor_pool: vk::DescriptorPool::null(),
            uniform_buffers: Vec::with_capacity(image_count),
            device: Arc::clone(device),
        };

        for &view in &swapchain.image_views {
            let attachments = [view, swapchain.depth.view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(pipeline.render_pass)
                .attachments(&attachments)
                .width(swapchain.extent.width)
                .height(swapchain.extent.height)
                .layers(1);

            let framebuffer = unsafe { device.device.create_framebuffer(&framebuffer_info, None) }
                .context("Failed to create framebuffer")?;
            resources.framebuffers.push(framebuffer);
        }

        for image in 0..image_count {
            resources.uniform_buffers.push(Buffer::new(
                device,
                size_of::<UniformBufferObject>() as vk::DeviceSize,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
                &format!("uniforms[{}]", image),
            )?);
        }

        let pool_sizes = descriptor_pool_sizes(image_count as u32);
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(image_count as u32);

        resources.descriptor_pool = unsafe { device.device.create_descriptor_pool(&pool_info, None) }
            .context("Failed to create descriptor pool")?;

        let layouts = vec![pipeline.descriptor_set_layout; image_count];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(resources.descriptor_pool)
            .set_layouts(&layouts);

        resources.descriptor_sets = unsafe { device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor sets")?;

        for (set, uniform) in resources.descriptor_sets.iter().zip(&resources.uniform_buffers) {
            let buffer_info = [vk::DescriptorBufferInfo {
                buffer: uniform.handle,
                offset: 0,
                range: uniform.size,
            }];
            let image_info = [vk::DescriptorImageInfo {
                sampler: texture.sampler,
                image_view: texture.image.view,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            }];

            let writes = [
                vk::WriteDescriptorSet::builder()
                    .dst_set(*set)
                    .dst_binding(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&buffer_info)
                    .build(),
                vk::WriteDescriptorSet::builder()
                    .dst_set(*set)
                    .dst_binding(1)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(&image_info)
                    .build(),
            ];

            unsafe { device.device.update_descriptor_sets(&writes, &[]) };
        }

        log::debug!("Created frame resources for {} images", image_count);

        Ok(resources)
    }

    /// Write the camera into the uniform buffer bound to `image_index`
    pub fn update_uniforms(&mut self, image_index: usize, camera: &CameraMatrices) -> Result<()> {
        let ubo = UniformBufferObject::from_camera(camera);
        self.uniform_buffers
            .get_mut(image_index)
            .with_context(|| format!("No uniform buffer for image {}", image_index))?
            .write(&[ubo])
    }
}

impl Drop for FrameResources {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
            // Destroying the pool frees its sets
            if self.descriptor_pool != vk::DescriptorPool::null() {
                self.device
                    .device
                    .destroy_descriptor_pool(self.descriptor_pool, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn uniform_record_flips_projection_y() {
        let camera = CameraMatrices {
            view: Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0)),
            projection: Mat4::perspective_rh(1.0, 1.5, 0.1, 10.0),
        };
        let ubo = UniformBufferObject::from_camera(&camera);

        assert_eq!(ubo.model, Mat4::IDENTITY);
        assert_eq!(ubo.view, camera.view);
        assert_eq!(ubo.proj.y_axis.y, -camera.projection.y_axis.y);
        // Everything else in the projection is untouched
        assert_eq!(ubo.proj.x_axis, camera.projection.x_axis);
        assert_eq!(ubo.proj.z_axis, camera.projection.z_axis);
        assert_eq!(ubo.proj.w_axis, camera.projection.w_axis);
    }

    #[test]
    fn flipped_projection_maps_up_to_negative_clip_y() {
        let camera = CameraMatrices {
            view: Mat4::IDENTITY,
            projection: Mat4::perspective_rh(1.0, 1.0, 0.1, 10.0),
        };
        let ubo = UniformBufferObject::from_camera(&camera);
        let clip = ubo.proj * Vec4::new(0.0, 1.0, -1.0, 1.0);
        assert!(clip.y < 0.0);
    }

    #[test]
    fn uniform_record_is_three_packed_matrices() {
        assert_eq!(size_of::<UniformBufferObject>(), 3 * 64);
        let ubo = UniformBufferObject::from_camera(&CameraMatrices::default());
        let bytes = bytemuck::bytes_of(&ubo);
        assert_eq!(bytes.len(), 192);
    }

    #[test]
    fn pool_holds_one_set_of_each_type_per_image() {
        let sizes = descriptor_pool_sizes(3);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 3);
        assert_eq!(sizes[1].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(sizes[1].descriptor_count, 3);
    }
}
