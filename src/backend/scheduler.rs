// Frame scheduler - the acquire/submit/present loop
//
// Owns the ring counter, the image ownership table and the recreation
// decision. All GPU work goes through `FrameBackend`, so the ordering rules
// here can be exercised without a device.

use anyhow::Result;
use ash::vk;

use super::swapchain::{AcquireOutcome, PresentOutcome};
use super::sync::ImagesInFlight;
use crate::scene::CameraMatrices;

/// GPU side of one frame, split at the points where the scheduler decides
/// what happens next
pub trait FrameBackend {
    /// Block until the slot's previous submission has finished
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;

    /// Acquire with the slot's image-available semaphore
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;

    fn update_uniforms(&mut self, image_index: u32, camera: &CameraMatrices) -> Result<()>;

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()>;

    /// Reset the slot's fence and submit its command buffer
    fn submit(&mut self, slot: usize) -> Result<()>;

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;

    /// Wait for idle, tear down every swapchain-dependent object and build
    /// it again. Returns the new image count.
    fn recreate_swapchain(&mut self, window_extent: vk::Extent2D) -> Result<usize>;
}

/// A zero-sized framebuffer (minimized window) cannot back a swapchain
pub fn has_area(extent: vk::Extent2D) -> bool {
    extent.width > 0 && extent.height > 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented { slot: usize, image_index: u32 },
    /// The swapchain was rebuilt; no frame reached the screen this call
    /// unless it was presented just before the rebuild
    Recreated,
    /// Window has no area; nothing was done
    Deferred,
}

pub struct FrameScheduler {
    frames_in_flight: usize,
    frame_counter: u64,
    state: FrameState,
    images_in_flight: ImagesInFlight,
    framebuffer_resized: bool,
    recreate_pending: bool,
}

impl FrameScheduler {
    pub fn new(frames_in_flight: usize, image_count: usize) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            frame_counter: 0,
            state: FrameState::Idle,
            images_in_flight: ImagesInFlight::new(image_count),
            framebuffer_resized: false,
            recreate_pending: false,
        }
    }

    /// Scheduler for a renderer that has no swapchain yet. The first call to
    /// `draw_frame` with a non-zero extent builds it.
    pub fn without_swapchain(frames_in_flight: usize) -> Self {
        Self {
            recreate_pending: true,
            ..Self::new(frames_in_flight, 0)
        }
    }

    /// Picked up after the next present
    pub fn notify_resized(&mut self) {
        self.framebuffer_resized = true;
    }

    pub fn current_slot(&self) -> usize {
        (self.frame_counter % self.frames_in_flight as u64) as usize
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn recreate_pending(&self) -> bool {
        self.recreate_pending
    }

    /// Run one iteration of the frame loop.
    ///
    /// `window_extent` is the current framebuffer size, polled every call so
    /// a minimized window defers recreation instead of building a
    /// zero-sized swapchain.
    pub fn draw_frame<B: FrameBackend>(
        &mut self,
        backend: &mut B,
        camera: &CameraMatrices,
        window_extent: vk::Extent2D,
    ) -> Result<FrameStatus> {
        if self.recreate_pending {
            return self.try_recreate(backend, window_extent);
        }

        let slot = self.current_slot();

        self.state = FrameState::Acquiring;
        backend.wait_for_slot(slot)?;

        let image_index = match backend.acquire_image(slot)? {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    log::debug!("Acquired suboptimal image {}", image_index);
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain out of date on acquire");
                self.state = FrameState::Idle;
                self.recreate_pending = true;
                return self.try_recreate(backend, window_extent);
            }
        };

        // An earlier slot may still be rendering into this image
        if let Some(owner) = self.images_in_flight.claim(image_index as usize, slot) {
            log::trace!("Image {} still owned by slot {}, waiting", image_index, owner);
            backend.wait_for_slot(owner)?;
        }

        self.state = FrameState::Recording;
        backend.update_uniforms(image_index, camera)?;
        backend.record(slot, image_index)?;

        self.state = FrameState::Submitted;
        backend.submit(slot)?;

        self.state = FrameState::Presenting;
        let presented = backend.present(slot, image_index)?;

        self.frame_counter += 1;
        self.state = FrameState::Idle;

        if presented.needs_recreation() || self.framebuffer_resized {
            log::debug!(
                "Recreating after present ({:?}, resized: {})",
                presented,
                self.framebuffer_resized
            );
            self.framebuffer_resized = false;
            self.recreate_pending = true;
            return self.try_recreate(backend, window_extent);
        }

        Ok(FrameStatus::Presented { slot, image_index })
    }

    fn try_recreate<B: FrameBackend>(
        &mut self,
        backend: &mut B,
        window_extent: vk::Extent2D,
    ) -> Result<FrameStatus> {
        if !has_area(window_extent) {
            log::trace!("Window has no area, deferring swapchain recreation");
            return Ok(FrameStatus::Deferred);
        }

        let image_count = backend.recreate_swapchain(window_extent)?;
        self.images_in_flight.reset(image_count);
        self.recreate_pending = false;
        // A resize reported while we were deferring is covered by this rebuild
        self.framebuffer_resized = false;

        log::info!(
            "Swapchain recreated at {}x{} with {} images",
            window_extent.width,
            window_extent.height,
            image_count
        );

        Ok(FrameStatus::Recreated)
    }
}
