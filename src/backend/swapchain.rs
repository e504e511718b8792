// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen, plus the
// depth buffer sized to match. The whole thing is thrown away and rebuilt when
// the surface changes; nothing here survives a recreation.

use anyhow::{Context, Result};
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

use super::buffer::{create_image_view, Image};
use super::device::{DeviceContext, QueueFamilies};
use super::error::RenderError;
use super::pipeline::depth_aspect;

pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Preferred pair if offered, else the first supported format.
/// `None` only for an empty list.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == PREFERRED_SURFACE_FORMAT.format
                && f.color_space == PREFERRED_SURFACE_FORMAT.color_space
        })
        .or_else(|| formats.first())
        .copied()
}

/// MAILBOX: no vsync, no tearing, triple buffered
/// FIFO: vsync, guaranteed available
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: vk::Extent2D) -> vk::Extent2D {
    // u32::MAX means the surface size is determined by the swapchain
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: window
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: window
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    // Zero max means no upper bound
    if caps.max_image_count > 0 {
        desired.min(caps.max_image_count)
    } else {
        desired
    }
}

/// Concurrent sharing across both families when they differ
pub fn sharing_mode(families: QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.present],
        )
    }
}

/// What the surface can do right now
#[derive(Debug, Clone)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub fn query(
        surface_loader: &ash::extensions::khr::Surface,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        unsafe {
            Ok(Self {
                capabilities: surface_loader
                    .get_physical_device_surface_capabilities(physical_device, surface)
                    .context("Failed to query surface capabilities")?,
                formats: surface_loader
                    .get_physical_device_surface_formats(physical_device, surface)
                    .context("Failed to query surface formats")?,
                present_modes: surface_loader
                    .get_physical_device_surface_present_modes(physical_device, surface)
                    .context("Failed to query present modes")?,
            })
        }
    }

    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Every choice that goes into a swapchain create info
#[derive(Debug, Clone, Copy)]
pub struct SwapchainConfig {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainConfig {
    pub fn derive(support: &SwapchainSupport, window_extent: vk::Extent2D) -> Result<Self, RenderError> {
        let surface_format =
            choose_surface_format(&support.formats).ok_or(RenderError::NoSurfaceFormats)?;

        Ok(Self {
            surface_format,
            present_mode: choose_present_mode(&support.present_modes),
            extent: choose_extent(&support.capabilities, window_extent),
            image_count: choose_image_count(&support.capabilities),
            pre_transform: support.capabilities.current_transform,
        })
    }
}

/// Result of asking the presentation engine for an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Suboptimal images are still rendered to; present decides on recreation
    Acquired { image_index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn needs_recreation(self) -> bool {
        !matches!(self, PresentOutcome::Presented)
    }
}

/// Out-of-date is recoverable; every other error code is fatal
pub fn classify_acquire(result: VkResult<(u32, bool)>) -> Result<AcquireOutcome, RenderError> {
    match result {
        Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
            image_index,
            suboptimal,
        }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(result) => Err(RenderError::Api {
            call: "vkAcquireNextImageKHR",
            result,
        }),
    }
}

pub fn classify_present(result: VkResult<bool>) -> Result<PresentOutcome, RenderError> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) => Ok(PresentOutcome::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
        Err(result) => Err(RenderError::Api {
            call: "vkQueuePresentKHR",
            result,
        }),
    }
}

pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub depth: Image,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: Arc<DeviceContext>,
}

impl Swapchain {
    pub fn new(
        device: Arc<DeviceContext>,
        window_extent: vk::Extent2D,
        depth_format: vk::Format,
    ) -> Result<Self> {
        let support = device.swapchain_support()?;
        let config = SwapchainConfig::derive(&support, window_extent)?;

        log::info!(
            "Creating swapchain: {}x{} {:?}, at least {} images",
            config.extent.width,
            config.extent.height,
            config.surface_format.format,
            config.image_count
        );

        let (sharing, family_indices) = sharing_mode(device.queue_families);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface)
            .min_image_count(config.image_count)
            .image_format(config.surface_format.format)
            .image_color_space(config.surface_format.color_space)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing)
            .queue_family_indices(&family_indices)
            .pre_transform(config.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(config.present_mode)
            .clipped(true);

        let handle = unsafe { device.swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let images = unsafe { device.swapchain_loader.get_swapchain_images(handle) }
            .context("Failed to get swapchain images")?;

        log::info!(
            "Created swapchain with {} images, present mode {:?}",
            images.len(),
            config.present_mode
        );

        let image_views = images
            .iter()
            .map(|&image| {
                create_image_view(
                    &device.device,
                    image,
                    config.surface_format.format,
                    vk::ImageAspectFlags::COLOR,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let depth = Image::new(
            &device,
            config.extent,
            depth_format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            depth_aspect(depth_format),
            "depth buffer",
        )?;

        Ok(Self {
            handle,
            images,
            image_views,
            depth,
            format: config.surface_format.format,
            extent: config.extent,
            device,
        })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire next image for rendering, signalling `semaphore` once the
    /// presentation engine releases it
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.device.swapchain_loader.acquire_next_image(
                self.handle,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        Ok(classify_acquire(result)?)
    }

    /// Present rendered image to screen
    pub fn present(&self, wait_semaphore: vk::Semaphore, image_index: u32) -> Result<PresentOutcome> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.handle];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.device
                .swapchain_loader
                .queue_present(self.device.present_queue, &present_info)
        };

        Ok(classify_present(result)?)
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        log::debug!("Destroying swapchain ({} images)", self.images.len());
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.device
                .swapchain_loader
                .destroy_swapchain(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    fn undefined_extent_caps() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 32,
            },
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..caps(2, 0)
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn assert_extent(actual: vk::Extent2D, width: u32, height: u32) {
        assert_eq!((actual.width, actual.height), (width, height));
    }

    #[test]
    fn preferred_format_wins_wherever_it_appears() {
        let preferred = PREFERRED_SURFACE_FORMAT;
        let others = [
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];

        for position in 0..=others.len() {
            let mut formats = others.to_vec();
            formats.insert(position, preferred);
            let chosen = choose_surface_format(&formats).unwrap();
            assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
            assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        }
    }

    #[test]
    fn missing_preferred_format_falls_back_to_first() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn preferred_format_with_wrong_color_space_does_not_match() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn empty_format_list_has_no_choice() {
        assert!(choose_surface_format(&[]).is_none());

        let support = SwapchainSupport {
            capabilities: caps(2, 0),
            formats: vec![],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(!support.is_adequate());
        assert!(matches!(
            SwapchainConfig::derive(&support, extent(800, 600)),
            Err(RenderError::NoSurfaceFormats)
        ));
    }

    #[test]
    fn mailbox_preferred_over_fifo() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn fifo_only_selects_fifo() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn fixed_current_extent_is_used_verbatim() {
        let chosen = choose_extent(&caps(2, 0), extent(1234, 5678));
        assert_extent(chosen, 800, 600);
    }

    #[test]
    fn undefined_current_extent_clamps_window_size() {
        let caps = undefined_extent_caps();
        assert_extent(choose_extent(&caps, extent(800, 600)), 800, 600);
        assert_extent(choose_extent(&caps, extent(10, 5000)), 64, 1080);
        assert_extent(choose_extent(&caps, extent(4000, 0)), 1920, 32);
    }

    #[test]
    fn image_count_scenarios() {
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
        assert_eq!(choose_image_count(&caps(3, 3)), 3);
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
    }

    #[test]
    fn image_count_stays_within_bounds() {
        for min in 1..6 {
            for max in 0..8 {
                if max != 0 && max < min {
                    continue;
                }
                let count = choose_image_count(&caps(min, max));
                assert!(count >= min);
                if max > 0 {
                    assert!(count <= max);
                }
                // Same capabilities, same answer
                assert_eq!(count, choose_image_count(&caps(min, max)));
            }
        }
    }

    #[test]
    fn sharing_mode_depends_on_family_split() {
        let (mode, indices) = sharing_mode(QueueFamilies {
            graphics: 0,
            present: 0,
        });
        assert_eq!(mode, vk::SharingMode::EXCLUSIVE);
        assert!(indices.is_empty());

        let (mode, indices) = sharing_mode(QueueFamilies {
            graphics: 0,
            present: 2,
        });
        assert_eq!(mode, vk::SharingMode::CONCURRENT);
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn recreating_with_identical_capabilities_reproduces_config() {
        let support = SwapchainSupport {
            capabilities: undefined_extent_caps(),
            formats: vec![
                surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                PREFERRED_SURFACE_FORMAT,
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        };

        let first = SwapchainConfig::derive(&support, extent(1280, 720)).unwrap();
        let second = SwapchainConfig::derive(&support, extent(1280, 720)).unwrap();

        assert_eq!(first.image_count, second.image_count);
        assert_eq!(first.surface_format.format, second.surface_format.format);
        assert_eq!(first.surface_format.color_space, second.surface_format.color_space);
        assert_eq!(first.present_mode, second.present_mode);
        assert_extent(second.extent, first.extent.width, first.extent.height);
        assert_extent(first.extent, 1280, 720);
        assert_eq!(first.image_count, 3);
    }

    #[test]
    fn acquire_results_are_classified() {
        assert_eq!(
            classify_acquire(Ok((2, false))).unwrap(),
            AcquireOutcome::Acquired {
                image_index: 2,
                suboptimal: false
            }
        );
        assert_eq!(
            classify_acquire(Ok((1, true))).unwrap(),
            AcquireOutcome::Acquired {
                image_index: 1,
                suboptimal: true
            }
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::OutOfDate
        );
        assert!(matches!(
            classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(RenderError::Api {
                result: vk::Result::ERROR_DEVICE_LOST,
                ..
            })
        ));
    }

    #[test]
    fn present_results_are_classified() {
        assert_eq!(classify_present(Ok(false)).unwrap(), PresentOutcome::Presented);
        assert_eq!(classify_present(Ok(true)).unwrap(), PresentOutcome::Suboptimal);
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            PresentOutcome::OutOfDate
        );
        assert!(classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());

        assert!(!PresentOutcome::Presented.needs_recreation());
        assert!(PresentOutcome::Suboptimal.needs_recreation());
        assert!(PresentOutcome::OutOfDate.needs_recreation());
    }
}
