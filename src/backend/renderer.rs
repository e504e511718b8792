// Renderer - composition root
//
// Wires the device, swapchain, pipeline and per-frame resources together and
// drives them through the frame scheduler. Startup order is
// device -> commands/sync -> static scene -> swapchain -> pipeline -> frame resources;
// teardown runs in reverse after the device has gone idle.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;

use super::buffer::Buffer;
use super::commands::{record_draw, CommandRing, DrawCall};
use super::device::DeviceContext;
use super::frame_resources::FrameResources;
use super::pipeline::{find_depth_format, GraphicsPipeline};
use super::scheduler::{has_area, FrameBackend, FrameScheduler, FrameStatus};
use super::swapchain::{AcquireOutcome, PresentOutcome, Swapchain};
use super::sync::SyncSet;
use super::texture::Texture;
use crate::config::{Config, ShaderConfig};
use crate::scene::{CameraMatrices, StaticScene};

/// Everything that is thrown away when the swapchain goes stale.
/// Field order is drop order.
struct SwapchainBundle {
    frame_resources: FrameResources,
    pipeline: GraphicsPipeline,
    swapchain: Swapchain,
}

impl SwapchainBundle {
    fn new(
        device: &Arc<DeviceContext>,
        window_extent: vk::Extent2D,
        depth_format: vk::Format,
        shaders: &ShaderConfig,
        texture: &Texture,
    ) -> Result<Self> {
        let swapchain = Swapchain::new(Arc::clone(device), window_extent, depth_format)?;
        let pipeline = GraphicsPipeline::new(
            device,
            swapchain.format,
            depth_format,
            swapchain.extent,
            shaders,
        )?;
        let frame_resources = FrameResources::new(device, &swapchain, &pipeline, texture)?;

        Ok(Self {
            frame_resources,
            pipeline,
            swapchain,
        })
    }
}

/// Static mesh uploaded once before the loop starts
struct MeshBuffers {
    vertex: Buffer,
    index: Buffer,
    index_count: u32,
}

impl MeshBuffers {
    fn upload(device: &Arc<DeviceContext>, commands: &CommandRing, scene: &StaticScene) -> Result<Self> {
        if scene.vertices.is_empty() || scene.indices.is_empty() {
            anyhow::bail!("Scene mesh has no geometry");
        }

        let vertex = Buffer::device_local_with_data(
            device,
            commands,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &scene.vertices,
            "vertices",
        )?;
        let index = Buffer::device_local_with_data(
            device,
            commands,
            vk::BufferUsageFlags::INDEX_BUFFER,
            &scene.indices,
            "indices",
        )?;

        log::info!(
            "Uploaded mesh: {} vertices, {} indices",
            scene.vertices.len(),
            scene.indices.len()
        );

        Ok(Self {
            vertex,
            index,
            index_count: scene.indices.len() as u32,
        })
    }
}

/// Vulkan implementation of the frame steps
struct GpuState {
    bundle: Option<SwapchainBundle>,
    commands: CommandRing,
    sync: SyncSet,
    mesh: MeshBuffers,
    texture: Texture,
    depth_format: vk::Format,
    shaders: ShaderConfig,
    clear_color: [f32; 4],
    device: Arc<DeviceContext>,
}

impl GpuState {
    fn bundle(&self) -> Result<&SwapchainBundle> {
        self.bundle.as_ref().context("Swapchain is not available")
    }

    fn bundle_mut(&mut self) -> Result<&mut SwapchainBundle> {
        self.bundle.as_mut().context("Swapchain is not available")
    }
}

impl FrameBackend for GpuState {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        self.sync.slot(slot).wait(&self.device.device)
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        let semaphore = self.sync.slot(slot).image_available;
        self.bundle()?.swapchain.acquire_next_image(semaphore)
    }

    fn update_uniforms(&mut self, image_index: u32, camera: &CameraMatrices) -> Result<()> {
        self.bundle_mut()?
            .frame_resources
            .update_uniforms(image_index as usize, camera)
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let bundle = self.bundle()?;
        let image = image_index as usize;

        let draw = DrawCall {
            render_pass: bundle.pipeline.render_pass,
            framebuffer: bundle.frame_resources.framebuffers[image],
            extent: bundle.swapchain.extent,
            pipeline: bundle.pipeline.handle,
            pipeline_layout: bundle.pipeline.layout,
            descriptor_set: bundle.frame_resources.descriptor_sets[image],
            vertex_buffer: self.mesh.vertex.handle,
            index_buffer: self.mesh.index.handle,
            index_count: self.mesh.index_count,
            clear_color: self.clear_color,
        };

        record_draw(&self.device.device, self.commands.get(slot), &draw)
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let device = &self.device.device;
        let sync = self.sync.slot(slot);

        debug_assert!(
            sync.is_signalled(device).unwrap_or(false),
            "ring slot {} reused while its fence is unsignalled",
            slot
        );

        sync.reset(device)?;

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.commands.get(slot)];
        let signal_semaphores = [sync.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                sync.in_flight_fence,
            )
        }
        .context("Failed to submit draw command buffer")
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        let semaphore = self.sync.slot(slot).render_finished;
        self.bundle()?.swapchain.present(semaphore, image_index)
    }

    fn recreate_swapchain(&mut self, window_extent: vk::Extent2D) -> Result<usize> {
        self.device.wait_idle()?;

        // Old objects go first; the surface allows only one live swapchain
        self.bundle = None;

        let bundle = SwapchainBundle::new(
            &self.device,
            window_extent,
            self.depth_format,
            &self.shaders,
            &self.texture,
        )
        .context("Failed to recreate swapchain")?;

        let image_count = bundle.swapchain.image_count();
        self.bundle = Some(bundle);
        Ok(image_count)
    }
}

impl Drop for GpuState {
    fn drop(&mut self) {
        // Nothing may be destroyed while the GPU still references it
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle during teardown: {:#}", e);
        }
    }
}

pub struct Renderer {
    scheduler: FrameScheduler,
    gpu: GpuState,
}

impl Renderer {
    pub fn new<W>(
        config: &Config,
        window: &W,
        window_extent: vk::Extent2D,
        scene: &StaticScene,
    ) -> Result<Self>
    where
        W: HasRawDisplayHandle + HasRawWindowHandle,
    {
        let device = DeviceContext::new(&config.window.title, config.validation_enabled(), window)?;

        let depth_format = find_depth_format(&device)?;
        log::info!("Depth format: {:?}", depth_format);

        let frames_in_flight = config.graphics.max_frames_in_flight;
        let commands = CommandRing::new(&device, frames_in_flight)?;
        let sync = SyncSet::new(&device, frames_in_flight)?;

        let mesh = MeshBuffers::upload(&device, &commands, scene)?;
        let texture = Texture::from_rgba(&device, &commands, &scene.texture)?;

        // A window that starts minimized gets its swapchain on the first
        // frame with area
        let (bundle, scheduler) = if has_area(window_extent) {
            let bundle =
                SwapchainBundle::new(&device, window_extent, depth_format, &config.shaders, &texture)?;
            let image_count = bundle.swapchain.image_count();
            log::info!(
                "Renderer ready: {} frames in flight, {} swapchain images",
                frames_in_flight,
                image_count
            );
            (Some(bundle), FrameScheduler::new(frames_in_flight, image_count))
        } else {
            log::info!(
                "Renderer ready: {} frames in flight, swapchain deferred until the window has area",
                frames_in_flight
            );
            (None, FrameScheduler::without_swapchain(frames_in_flight))
        };

        Ok(Self {
            scheduler,
            gpu: GpuState {
                bundle,
                commands,
                sync,
                mesh,
                texture,
                depth_format,
                shaders: config.shaders.clone(),
                clear_color: config.graphics.clear_color,
                device,
            },
        })
    }

    /// Once per host tick. Errors are fatal.
    pub fn draw_frame(
        &mut self,
        camera: &CameraMatrices,
        window_extent: vk::Extent2D,
    ) -> Result<FrameStatus> {
        self.scheduler.draw_frame(&mut self.gpu, camera, window_extent)
    }

    pub fn notify_resized(&mut self) {
        self.scheduler.notify_resized();
    }

    pub fn frame_counter(&self) -> u64 {
        self.scheduler.frame_counter()
    }

    pub fn device_wait_idle(&self) -> Result<()> {
        self.gpu.device.wait_idle()
    }

    /// Drain the GPU and release everything before the window goes away
    pub fn shutdown(self) -> Result<()> {
        log::info!("Shutting down renderer after {} frames", self.frame_counter());
        self.device_wait_idle()?;
        drop(self);
        Ok(())
    }
}
