// Fatal error taxonomy
//
// Anything that ends up here terminates the renderer. Recoverable
// presentation results are modelled as outcomes in swapchain.rs instead.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no GPU exposes graphics and present queues, the required device extensions and sampler anisotropy")]
    NoSuitableDevice,

    #[error("validation layer {0} was requested but is not installed")]
    ValidationLayerUnavailable(String),

    #[error("surface reports no supported formats")]
    NoSurfaceFormats,

    #[error("none of the depth formats {0:?} support optimal-tiling depth attachments")]
    NoSupportedDepthFormat(Vec<vk::Format>),

    #[error("failed to load shader module {path:?}: {reason}")]
    ShaderLoad { path: PathBuf, reason: String },

    #[error("{call} failed: {result}")]
    Api { call: &'static str, result: vk::Result },
}
