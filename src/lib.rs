// frame-core - minimal Vulkan rendering core
//
// `backend` holds the device, swapchain, pipeline and frame loop.
// `scene` and `config` are the small collaborators the demo binary feeds it.

pub mod backend;
pub mod config;
pub mod scene;
