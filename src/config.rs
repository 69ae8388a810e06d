// Configuration - Load settings from config.toml
//
// Provides sensible defaults if the config file is missing or has errors.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub kernel: KernelConfig,
    pub debug: DebugConfig,
}

/// Window settings. The window is created non-resizable: the swapchain is
/// sized once and never recreated.
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
            title: "GPU raytracer".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// Compute kernel settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Compiled SPIR-V blob, loaded at startup
    pub path: String,
    /// Third dispatch dimension: parallel samples per pixel
    pub rays_per_pixel: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            path: "shaders/raytrace.comp.spv".to_string(),
            rays_per_pixel: 4,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_800x600_window() {
        let config = Config::default();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.kernel.rays_per_pixel, 4);
    }

    #[test]
    fn partial_config_keeps_defaults_elsewhere() {
        let config: Config = toml::from_str(
            r#"
            [window]
            width = 1280

            [kernel]
            rays_per_pixel = 16
            "#,
        )
        .unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.kernel.rays_per_pixel, 16);
        assert_eq!(config.kernel.path, "shaders/raytrace.comp.spv");
    }
}
