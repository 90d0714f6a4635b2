// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section and field has a default, so a partial (or missing) file is
// fine. Parse errors fall back to defaults with a warning.

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::Deserialize;
use std::path::Path;

use crate::graphics::frame::{DEFAULT_CLEAR_COLOR, DEFAULT_STEP};
use crate::graphics::{DeviceOptions, PresentOptions};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub controls: ControlsConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    /// 0 means the primary monitor's width
    pub initial_width: u32,
    /// 0 means the primary monitor's height
    pub initial_height: u32,
    /// Start in fullscreen
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Triangle".to_string(),
            initial_width: 0,
            initial_height: 0,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub vsync: bool,
    pub clear_color: [f32; 4],
    /// Animation time added per frame
    pub animation_step: f32,
    pub buffer_count: u32,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            vsync: true,
            clear_color: DEFAULT_CLEAR_COLOR,
            animation_step: DEFAULT_STEP,
            buffer_count: 2,
        }
    }
}

impl GraphicsConfig {
    pub fn sync_interval(&self) -> u32 {
        u32::from(self.vsync)
    }

    pub fn present_options(&self) -> PresentOptions {
        PresentOptions {
            buffer_count: self.buffer_count,
            vsync: self.vsync,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
            log_to_file: false,
            log_file: "tri_renderer.log".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl DebugConfig {
    pub fn level_filter(&self) -> LevelFilter {
        self.log_level.parse().unwrap_or_else(|_| {
            log::warn!("Unknown log level '{}', defaulting to info", self.log_level);
            LevelFilter::Info
        })
    }
}

/// Control key bindings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub fullscreen_key: String,
    pub quit_key: String,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            fullscreen_key: "F11".to_string(),
            quit_key: "Escape".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
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

    pub fn device_options(&self) -> DeviceOptions {
        DeviceOptions {
            app_name: self.window.title.clone(),
            validation: self.debug.validation_layers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(dir.path().join("config.toml")).unwrap();
        assert!(config.graphics.vsync);
        assert_eq!(config.graphics.animation_step, 0.01);
        assert_eq!(config.controls.fullscreen_key, "F11");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[graphics]\nvsync = false\n\n[window]\ninitial_width = 1280").unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        assert!(!config.graphics.vsync);
        assert_eq!(config.graphics.sync_interval(), 0);
        assert_eq!(config.graphics.buffer_count, 2);
        assert_eq!(config.window.initial_width, 1280);
        assert_eq!(config.window.initial_height, 0);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[graphics\nvsync = ").unwrap();
        assert!(Config::load_from_path(file.path()).is_err());
    }

    #[test]
    fn log_level_parses_case_insensitively() {
        let debug = DebugConfig {
            log_level: "DEBUG".to_string(),
            ..DebugConfig::default()
        };
        assert_eq!(debug.level_filter(), LevelFilter::Debug);
    }
}
