// Buffers and images backed by the device's sub-allocator
//
// Host-visible buffers stay persistently mapped for their whole life.
// Device-local data goes through a staging buffer once at load time.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::commands::CommandRing;
use super::device::DeviceContext;

pub struct Buffer {
    pub handle: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
    device: Arc<DeviceContext>,
}

impl Buffer {
    pub fn new(
        device: &Arc<DeviceContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = unsafe { device.device.create_buffer(&buffer_info, None) }
            .with_context(|| format!("Failed to create buffer '{}'", name))?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(handle) };

        let allocation = device
            .allocator()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .with_context(|| format!("Failed to allocate memory for buffer '{}'", name))?;

        unsafe {
            device
                .device
                .bind_buffer_memory(handle, allocation.memory(), allocation.offset())
        }
        .with_context(|| format!("Failed to bind memory for buffer '{}'", name))?;

        Ok(Self {
            handle,
            size,
            allocation: Some(allocation),
            device: Arc::clone(device),
        })
    }

    /// Host-visible buffer filled with `data`
    pub fn with_data<T: Pod>(
        device: &Arc<DeviceContext>,
        usage: vk::BufferUsageFlags,
        data: &[T],
        name: &str,
    ) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mut buffer = Self::new(
            device,
            bytes.len() as vk::DeviceSize,
            usage,
            MemoryLocation::CpuToGpu,
            name,
        )?;
        buffer.write(data)?;
        Ok(buffer)
    }

    /// Device-local buffer filled through a staging copy. Blocks until the
    /// copy has finished.
    pub fn device_local_with_data<T: Pod>(
        device: &Arc<DeviceContext>,
        commands: &CommandRing,
        usage: vk::BufferUsageFlags,
        data: &[T],
        name: &str,
    ) -> Result<Self> {
        let staging = Self::with_data(
            device,
            vk::BufferUsageFlags::TRANSFER_SRC,
            data,
            &format!("{} staging", name),
        )?;

        let buffer = Self::new(
            device,
            staging.size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            name,
        )?;

        commands.submit_one_time(|cmd| {
            let region = vk::BufferCopy::builder().size(staging.size).build();
            unsafe {
                device
                    .device
                    .cmd_copy_buffer(cmd, staging.handle, buffer.handle, &[region]);
            }
        })?;

        Ok(buffer)
    }

    /// Copy `data` to the start of the mapped range
    pub fn write<T: Pod>(&mut self, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .context("Buffer is not host visible")?;

        if bytes.len() > mapped.len() {
            anyhow::bail!(
                "Write of {} bytes exceeds buffer of {} bytes",
                bytes.len(),
                mapped.len()
            );
        }

        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().free(allocation) {
                log::error!("Failed to free buffer memory: {}", e);
            }
        }
        unsafe {
            self.device.device.destroy_buffer(self.handle, None);
        }
    }
}

/// 2D image with a single mip level and a matching view
pub struct Image {
    pub handle: vk::Image,
    pub view: vk::ImageView,
    allocation: Option<Allocation>,
    device: Arc<DeviceContext>,
}

impl Image {
    pub fn new(
        device: &Arc<DeviceContext>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
        name: &str,
    ) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = unsafe { device.device.create_image(&image_info, None) }
            .with_context(|| format!("Failed to create image '{}'", name))?;

        let requirements = unsafe { device.device.get_image_memory_requirements(handle) };

        let allocation = device
            .allocator()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .with_context(|| format!("Failed to allocate memory for image '{}'", name))?;

        unsafe {
            device
                .device
                .bind_image_memory(handle, allocation.memory(), allocation.offset())
        }
        .with_context(|| format!("Failed to bind memory for image '{}'", name))?;

        let view = create_image_view(&device.device, handle, format, aspect)?;

        Ok(Self {
            handle,
            view,
            allocation: Some(allocation),
            device: Arc::clone(device),
        })
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_image_view(self.view, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().free(allocation) {
                log::error!("Failed to free image memory: {}", e);
            }
        }
        unsafe {
            self.device.device.destroy_image(self.handle, None);
        }
    }
}

pub fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(single_level_range(aspect));

    unsafe { device.create_image_view(&view_info, None) }.context("Failed to create image view")
}

pub fn single_level_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}
