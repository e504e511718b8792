// Backend module - Vulkan rendering core
//
// Design: Thin wrapper around ash with RAII cleanup
// Every component borrows one shared DeviceContext; nothing reaches for globals.

pub mod buffer;
pub mod commands;
pub mod device;
pub mod error;
pub mod frame_resources;
pub mod pipeline;
pub mod renderer;
pub mod scheduler;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use device::DeviceContext;
pub use error::RenderError;
pub use renderer::Renderer;
pub use scheduler::{FrameScheduler, FrameStatus};
pub use swapchain::Swapchain;
