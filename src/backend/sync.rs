// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync.
// Ring slots own their primitives for the renderer's whole life; only the
// per-image ownership table is resized when the swapchain is rebuilt.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::device::DeviceContext;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &ash::Device) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait on each slot returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            Ok(Self {
                image_available: device
                    .create_semaphore(&semaphore_info, None)
                    .context("Failed to create semaphore")?,
                render_finished: device
                    .create_semaphore(&semaphore_info, None)
                    .context("Failed to create semaphore")?,
                in_flight_fence: device
                    .create_fence(&fence_info, None)
                    .context("Failed to create fence")?,
            })
        }
    }

    pub fn wait(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.wait_for_fences(&[self.in_flight_fence], true, u64::MAX) }
            .context("Failed to wait for in-flight fence")
    }

    pub fn reset(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.reset_fences(&[self.in_flight_fence]) }
            .context("Failed to reset in-flight fence")
    }

    pub fn is_signalled(&self, device: &ash::Device) -> Result<bool> {
        unsafe { device.get_fence_status(self.in_flight_fence) }
            .context("Failed to query in-flight fence")
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// One `FrameSync` per ring slot
pub struct SyncSet {
    slots: Vec<FrameSync>,
    device: Arc<DeviceContext>,
}

impl SyncSet {
    pub fn new(device: &Arc<DeviceContext>, frames_in_flight: usize) -> Result<Self> {
        let mut set = Self {
            slots: Vec::with_capacity(frames_in_flight),
            device: Arc::clone(device),
        };
        // Pushed one by one so Drop cleans up whatever was created before a failure
        for _ in 0..frames_in_flight {
            set.slots.push(FrameSync::new(&device.device)?);
        }
        Ok(set)
    }

    pub fn slot(&self, slot: usize) -> &FrameSync {
        &self.slots[slot]
    }
}

impl Drop for SyncSet {
    fn drop(&mut self) {
        for sync in &self.slots {
            sync.destroy(&self.device.device);
        }
    }
}

/// Which ring slot's fence last used each swapchain image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImagesInFlight {
    owners: Vec<Option<usize>>,
}

impl ImagesInFlight {
    pub fn new(image_count: usize) -> Self {
        Self {
            owners: vec![None; image_count],
        }
    }

    /// Forget all owners and match the new image count
    pub fn reset(&mut self, image_count: usize) {
        self.owners.clear();
        self.owners.resize(image_count, None);
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn owner(&self, image: usize) -> Option<usize> {
        self.owners.get(image).copied().flatten()
    }

    /// Hand `image` to `slot`. Returns the previous owner when it was a
    /// different slot; the caller must wait on that slot's fence.
    ///
    /// The table is sized by `new`/`reset` only. An index past the end means
    /// a recreation skipped `reset`.
    pub fn claim(&mut self, image: usize, slot: usize) -> Option<usize> {
        debug_assert!(
            image < self.owners.len(),
            "image {} out of range for {} tracked images",
            image,
            self.owners.len()
        );
        let previous = self.owners.get_mut(image)?.replace(slot);
        previous.filter(|&owner| owner != slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_images_have_no_owner() {
        let mut images = ImagesInFlight::new(3);
        assert_eq!(images.len(), 3);
        assert_eq!(images.owner(1), None);
        assert_eq!(images.claim(1, 0), None);
        assert_eq!(images.owner(1), Some(0));
    }

    #[test]
    fn claiming_from_another_slot_reports_it() {
        let mut images = ImagesInFlight::new(3);
        images.claim(2, 0);
        assert_eq!(images.claim(2, 1), Some(0));
        assert_eq!(images.owner(2), Some(1));
    }

    #[test]
    fn reclaiming_by_the_same_slot_needs_no_wait() {
        let mut images = ImagesInFlight::new(2);
        images.claim(0, 1);
        assert_eq!(images.claim(0, 1), None);
    }

    #[test]
    fn reset_resizes_and_clears() {
        let mut images = ImagesInFlight::new(2);
        images.claim(0, 0);
        images.claim(1, 1);
        images.reset(4);
        assert_eq!(images.len(), 4);
        assert!((0..4).all(|i| images.owner(i).is_none()));

        images.reset(0);
        assert!(images.is_empty());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "out of range")]
    fn claim_past_the_table_is_caught() {
        let mut images = ImagesInFlight::new(3);
        images.claim(4, 0);
    }

    #[test]
    fn claim_after_growing_reset_covers_new_images() {
        let mut images = ImagesInFlight::new(3);
        images.claim(2, 0);
        images.reset(5);
        assert_eq!(images.claim(4, 1), None);
        assert_eq!(images.claim(4, 0), Some(1));
    }

    #[test]
    fn out_of_range_owner_is_none() {
        let images = ImagesInFlight::new(1);
        assert_eq!(images.owner(5), None);
    }
}
