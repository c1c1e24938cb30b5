// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every field has a default, so a missing file or a partial file is fine.
// A malformed file is reported and replaced by defaults.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub shaders: ShaderConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan triangle".to_string(),
            width: 800,
            height: 600,
            resizable: true,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// "auto", "mailbox", "immediate", "fifo" or "fifo_relaxed"
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub msaa_samples: u32,
    /// "discrete", "integrated", "virtual", "cpu" or "any"
    pub device_type: String,
    /// Rebuild the swapchain when acquire/present report a stale surface
    pub rebuild_on_stale: bool,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "auto".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            msaa_samples: 4,
            device_type: "discrete".to_string(),
            rebuild_on_stale: true,
        }
    }
}

/// Pre-compiled SPIR-V inputs
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/vertex.spv"),
            fragment: PathBuf::from("shaders/fragment.spv"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: String,
    /// Write log output to this file instead of stderr
    pub log_file: Option<PathBuf>,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

/// Device class a candidate GPU must report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceTier {
    Exactly(vk::PhysicalDeviceType),
    Any,
}

impl DeviceTier {
    pub fn accepts(self, device_type: vk::PhysicalDeviceType) -> bool {
        match self {
            DeviceTier::Exactly(required) => required == device_type,
            DeviceTier::Any => true,
        }
    }
}

/// Where the active configuration came from
#[derive(Debug)]
pub enum ConfigSource {
    File(PathBuf),
    /// No file at this path
    Defaults(PathBuf),
    /// The file exists but could not be read or parsed
    Fallback(anyhow::Error),
}

impl ConfigSource {
    pub fn report(&self, config: &Config) {
        match self {
            ConfigSource::File(path) => log::info!("Loaded configuration from {:?}", path),
            ConfigSource::Defaults(path) => {
                log::info!("Config file not found at {:?}, using defaults", path)
            }
            ConfigSource::Fallback(e) => {
                log::warn!("Failed to load config file: {:#}. Using defaults.", e)
            }
        }
        log::debug!("Config: {:?}", config);
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> (Self, ConfigSource) {
        Self::load_with_source("config.toml")
    }

    /// Load from `path`, falling back to defaults when the file is missing
    /// or malformed. Nothing is logged here; the logger is configured from
    /// the result, so call `ConfigSource::report` once it exists.
    pub fn load_with_source<P: AsRef<Path>>(path: P) -> (Self, ConfigSource) {
        let path = path.as_ref();
        if !path.exists() {
            return (Config::default(), ConfigSource::Defaults(path.to_path_buf()));
        }

        match Self::load_from_path(path) {
            Ok(config) => (config, ConfigSource::File(path.to_path_buf())),
            Err(e) => (Config::default(), ConfigSource::Fallback(e)),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Preferred present mode, `None` meaning "use the selection policy"
    pub fn preferred_present_mode(&self) -> Option<vk::PresentModeKHR> {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "auto" => None,
            "immediate" => Some(vk::PresentModeKHR::IMMEDIATE),
            "mailbox" => Some(vk::PresentModeKHR::MAILBOX),
            "fifo" => Some(vk::PresentModeKHR::FIFO),
            "fifo_relaxed" => Some(vk::PresentModeKHR::FIFO_RELAXED),
            other => {
                log::warn!("Unknown present mode '{}', using automatic selection", other);
                None
            }
        }
    }

    pub fn device_tier(&self) -> DeviceTier {
        match self.graphics.device_type.to_lowercase().as_str() {
            "discrete" => DeviceTier::Exactly(vk::PhysicalDeviceType::DISCRETE_GPU),
            "integrated" => DeviceTier::Exactly(vk::PhysicalDeviceType::INTEGRATED_GPU),
            "virtual" => DeviceTier::Exactly(vk::PhysicalDeviceType::VIRTUAL_GPU),
            "cpu" => DeviceTier::Exactly(vk::PhysicalDeviceType::CPU),
            "any" => DeviceTier::Any,
            other => {
                log::warn!("Unknown device type '{}', requiring a discrete GPU", other);
                DeviceTier::Exactly(vk::PhysicalDeviceType::DISCRETE_GPU)
            }
        }
    }

    pub fn log_filter(&self) -> log::LevelFilter {
        self.debug.log_level.parse().unwrap_or_else(|_| {
            eprintln!("Unknown log level '{}', using info", self.debug.log_level);
            log::LevelFilter::Info
        })
    }
}
