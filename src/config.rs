// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Missing file -> defaults. Every section and field is optional.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::scene::Shape;

/// Largest texture edge accepted from the file; the common device limit
pub const MAX_TEXTURE_SIZE: u32 = 16384;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub shaders: ShaderConfig,
    pub scene: SceneConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "frame-core".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub clear_color: [f32; 4],
    /// Ring size F: how many frames the CPU may record ahead of the GPU
    pub max_frames_in_flight: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            max_frames_in_flight: 2,
        }
    }
}

/// Precompiled SPIR-V modules, read at pipeline-build time
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/vert.spv"),
            fragment: PathBuf::from("shaders/frag.spv"),
        }
    }
}

/// Static scene drawn by the demo host
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub shape: Shape,
    pub texture_size: u32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            shape: Shape::Cube,
            texture_size: 256,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Only honoured in debug builds
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "frame_core.log".to_string(),
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration, falling back to defaults on any error.
    ///
    /// Runs before the logger exists, so the error is handed back for the
    /// caller to report once logging is up.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        match Self::load_from_path(path) {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        }
    }

    /// Load configuration from a specific path. A missing file is not an error.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.graphics.max_frames_in_flight == 0 {
            anyhow::bail!("graphics.max_frames_in_flight must be at least 1");
        }
        if self.scene.texture_size == 0 {
            anyhow::bail!("scene.texture_size must be at least 1");
        }
        if self.scene.texture_size > MAX_TEXTURE_SIZE {
            anyhow::bail!(
                "scene.texture_size {} exceeds the maximum of {}",
                self.scene.texture_size,
                MAX_TEXTURE_SIZE
            );
        }
        Ok(())
    }

    /// Validation is compiled out of release builds regardless of the file
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert_eq!(config.shaders.vertex, PathBuf::from("shaders/vert.spv"));
        assert_eq!(config.shaders.fragment, PathBuf::from("shaders/frag.spv"));
        assert_eq!(config.scene.shape, Shape::Cube);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = Config::from_toml_str(
            r#"
            [graphics]
            max_frames_in_flight = 3

            [scene]
            shape = "quad"
            "#,
        )
        .unwrap();

        assert_eq!(config.graphics.max_frames_in_flight, 3);
        assert_eq!(config.graphics.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(config.scene.shape, Shape::Quad);
        assert_eq!(config.scene.texture_size, 256);
        assert_eq!(config.window.title, "frame-core");
    }

    #[test]
    fn shader_paths_are_configurable() {
        let config = Config::from_toml_str(
            r#"
            [shaders]
            vertex = "build/a.spv"
            "#,
        )
        .unwrap();

        assert_eq!(config.shaders.vertex, PathBuf::from("build/a.spv"));
        assert_eq!(config.shaders.fragment, PathBuf::from("shaders/frag.spv"));
    }

    #[test]
    fn zero_frames_in_flight_is_rejected() {
        let err = Config::from_toml_str("[graphics]\nmax_frames_in_flight = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_frames_in_flight"));
    }

    #[test]
    fn unknown_shape_is_a_parse_error() {
        assert!(Config::from_toml_str("[scene]\nshape = \"teapot\"\n").is_err());
    }

    #[test]
    fn oversized_texture_is_rejected() {
        let err = Config::from_toml_str("[scene]\ntexture_size = 40000\n").unwrap_err();
        assert!(err.to_string().contains("texture_size"));

        let config = Config::from_toml_str("[scene]\ntexture_size = 16384\n").unwrap();
        assert_eq!(config.scene.texture_size, MAX_TEXTURE_SIZE);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load_from_path("definitely/not/here/config.toml").unwrap();
        assert_eq!(config.window.height, 720);

        let (config, error) = Config::load_or_default("definitely/not/here/config.toml");
        assert_eq!(config.window.height, 720);
        assert!(error.is_none());
    }

    #[test]
    fn malformed_file_yields_defaults_and_the_error() {
        let path = std::env::temp_dir().join(format!(
            "frame-core-malformed-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[graphics\nmax_frames_in_flight = ").unwrap();

        let (config, error) = Config::load_or_default(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.graphics.max_frames_in_flight, 2);
        let error = error.expect("malformed file should report an error");
        assert!(format!("{:#}", error).contains("Failed to parse config file"));
    }
}
