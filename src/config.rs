// Configuration - load settings from gpukit.toml
//
// Provides sensible defaults if the config file is missing or has errors.
// The debug toggle must be applied before the first device/instance use
// to take effect (the native instance is created once per process).

use serde::Deserialize;
use std::path::Path;

use crate::backend::device::DeviceOptions;
use crate::backend::instance;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub debug: DebugConfig,
    pub device: DeviceConfig,
    pub swapchain: SwapchainConfig,
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Enable the Vulkan validation layer and message capture.
    pub validation: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self { validation: false }
    }
}

/// Adapter selection settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Explicit adapter index from `discover()`; `None` auto-selects.
    pub adapter_index: Option<usize>,
    /// When auto-selecting, score discrete GPUs above integrated ones.
    pub prefer_discrete: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adapter_index: None,
            prefer_discrete: true,
        }
    }
}

/// Swapchain settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SwapchainConfig {
    pub present_mode: String,
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("gpukit.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load gpukit.toml: {}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Apply process-wide switches (currently the debug toggle) and
    /// return device options derived from this config.
    pub fn apply(&self) -> DeviceOptions {
        instance::set_debug(self.debug.validation);
        DeviceOptions {
            adapter_index: self.device.adapter_index,
            prefer_discrete: self.device.prefer_discrete,
        }
    }

    /// Get present mode as Vulkan enum
    pub fn present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.swapchain.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.swapchain.present_mode
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
    fn defaults_when_file_missing() {
        let config = Config::load_from_path("/definitely/not/here.toml").unwrap();
        assert!(!config.debug.validation);
        assert!(config.device.prefer_discrete);
        assert_eq!(config.present_mode(), ash::vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn parses_partial_config() {
        let config: Config = toml::from_str(
            r#"
            [debug]
            validation = true

            [swapchain]
            present_mode = "mailbox"
            "#,
        )
        .unwrap();
        assert!(config.debug.validation);
        assert_eq!(config.present_mode(), ash::vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.device.adapter_index, None);
    }
}
