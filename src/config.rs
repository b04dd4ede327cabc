// Configuration - load settings from config.toml
//
// Provides sensible defaults if the config file is missing or has errors.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Preferred present mode; degrades to mailbox, then fifo.
    pub present_mode: String,
    /// Swap depth: frames in flight and minimum swap-set size (2-4).
    pub swapchain_depth: u32,
    /// Image acquisition timeout so a lost surface cannot hang the process.
    pub acquire_timeout_ms: u64,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            swapchain_depth: 4,
            acquire_timeout_ms: 100,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self { validation_layers: true }
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

    /// Get the preferred present mode as a Vulkan enum
    pub fn preferred_present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::FIFO
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.graphics.swapchain_depth, 4);
        assert_eq!(config.graphics.acquire_timeout_ms, 100);
        assert_eq!(config.preferred_present_mode(), ash::vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn parses_partial_config() {
        let config: Config = toml::from_str(
            r#"
            [graphics]
            present_mode = "mailbox"
            swapchain_depth = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.preferred_present_mode(), ash::vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.graphics.swapchain_depth, 2);
        // unspecified sections keep their defaults
        assert!(config.debug.validation_layers);
        assert_eq!(config.graphics.acquire_timeout_ms, 100);
    }

    #[test]
    fn unknown_present_mode_defaults_to_fifo() {
        let config: Config = toml::from_str(
            r#"
            [graphics]
            present_mode = "quadruple-buffered"
            "#,
        )
        .unwrap();

        assert_eq!(config.preferred_present_mode(), ash::vk::PresentModeKHR::FIFO);
    }
}
