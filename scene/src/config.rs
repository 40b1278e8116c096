//! Engine configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```toml
//! [window]
//! width = 1920
//! height = 1080
//!
//! [renderer]
//! backend = "software"
//! shadow_map_resolution = 2048
//!
//! [assets]
//! root = "assets"
//! hot_reload = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use umbra_graphics::{BackendKind, RendererConfig};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub window: WindowConfig,
    pub renderer: RenderSettings,
    pub assets: AssetConfig,
    pub jobs: JobConfig,
    pub physics: PhysicsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub backend: BackendKind,
    pub clear_color: [f32; 4],
    /// Edge length of every shadow map.
    pub shadow_map_resolution: u32,
    /// Cubemap edge length of captured environments.
    pub environment_resolution: u32,
    /// Default blur passes of new bloom components.
    pub bloom_iterations: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Software,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            shadow_map_resolution: 1024,
            environment_resolution: 512,
            bloom_iterations: 9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    pub root: PathBuf,
    pub cache: bool,
    pub hot_reload: bool,
    pub poll_interval_ms: u64,
    /// How long a changed file must stay quiet before it is reloaded.
    pub settle_delay_ms: u64,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("assets"),
            cache: true,
            hot_reload: false,
            poll_interval_ms: 500,
            settle_delay_ms: 100,
        }
    }
}

impl AssetConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Background worker threads; 0 uses the available parallelism.
    pub workers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    pub enabled: bool,
    pub gravity: [f32; 3],
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            gravity: [0.0, -9.81, 0.0],
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        log::info!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Renderer settings derived from the window and renderer tables.
    pub fn renderer_config(&self) -> RendererConfig {
        RendererConfig {
            backend: self.renderer.backend,
            width: self.window.width,
            height: self.window.height,
            clear_color: self.renderer.clear_color,
            ..RendererConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [window]
            width = 800

            [renderer]
            backend = "wgpu"
            bloom_iterations = 5

            [assets]
            hot_reload = true
            settle_delay_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.renderer.backend, BackendKind::Wgpu);
        assert_eq!(config.renderer.bloom_iterations, 5);
        assert_eq!(config.renderer.shadow_map_resolution, 1024);
        assert!(config.assets.hot_reload);
        assert_eq!(config.assets.settle_delay(), Duration::from_millis(250));
        assert!(config.assets.cache);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(matches!(
            EngineConfig::from_toml_str("[renderer]\nbackend = \"vulkan\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reads_file_and_survives_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        let mut config = EngineConfig::default();
        config.physics.gravity = [0.0, -1.62, 0.0];
        config.jobs.workers = 3;
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        assert_eq!(EngineConfig::load(&path).unwrap(), config);
        assert!(matches!(
            EngineConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn renderer_config_uses_window_size() {
        let mut config = EngineConfig::default();
        config.window.width = 64;
        config.window.height = 32;
        let renderer = config.renderer_config();
        assert_eq!((renderer.width, renderer.height), (64, 32));
        assert_eq!(renderer.backend, BackendKind::Software);
    }
}
