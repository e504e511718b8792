// Shader module loading
//
// Vulkan consumes SPIR-V bytecode. Modules are read from disk when the
// pipeline is built; a missing or malformed file is fatal, there is no
// fallback shader.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

use super::device::DeviceContext;
use super::error::RenderError;

pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode SPIR-V bytes into aligned words and check the header magic
pub fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>, String> {
    // read_spv handles alignment and rejects lengths that are not a multiple of 4
    let words = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| e.to_string())?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(other) => Err(format!("bad magic number {:#010x}", other)),
        None => Err("file is empty".to_string()),
    }
}

pub fn read_spirv(path: &Path) -> Result<Vec<u32>, RenderError> {
    let shader_load = |reason: String| RenderError::ShaderLoad {
        path: path.to_path_buf(),
        reason,
    };

    let bytes = std::fs::read(path).map_err(|e| shader_load(e.to_string()))?;
    parse_spirv(&bytes).map_err(shader_load)
}

pub fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe { device.create_shader_module(&create_info, None) }
        .context("Failed to create shader module")
}

pub fn load_shader_module(device: &DeviceContext, path: &Path) -> Result<vk::ShaderModule> {
    log::debug!("Loading shader {:?}", path);
    let code = read_spirv(path)?;
    create_shader_module(&device.device, &code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn valid_header_parses() {
        let bytes = words_to_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
        let words = parse_spirv(&bytes).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let bytes = words_to_bytes(&[0xdead_beef, 0]);
        let err = parse_spirv(&bytes).unwrap_err();
        assert!(err.contains("magic"));
    }

    #[test]
    fn truncated_file_is_rejected() {
        let mut bytes = words_to_bytes(&[SPIRV_MAGIC, 0]);
        bytes.pop();
        assert!(parse_spirv(&bytes).is_err());
        assert!(parse_spirv(&[]).is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let path = Path::new("no/such/shader.spv");
        match read_spirv(path) {
            Err(RenderError::ShaderLoad { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
