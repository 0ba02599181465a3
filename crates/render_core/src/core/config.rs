//! # Configuration System
//!
//! Configuration structures for the render core and its host application.
//!
//! ## Configuration Categories
//!
//! - **Renderer Config**: frames in flight, swapchain negotiation, fence timeouts,
//!   descriptor pool sizing and upload limits
//! - **Logging Config**: default log filter for `env_logger`
//! - **Application Config**: the two above grouped for file loading
//!
//! Files are read as TOML or RON depending on the extension.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A value is outside its allowed range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Descriptor pool sizing, fixed for the lifetime of the renderer
///
/// The pool is deliberately oversized; running out is treated as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorPoolConfig {
    /// Maximum number of descriptor sets
    pub max_sets: u32,
    /// Uniform buffer descriptors reserved per set
    pub uniform_buffers_per_set: u32,
    /// Combined image sampler descriptors reserved per set
    pub image_samplers_per_set: u32,
}

impl Default for DescriptorPoolConfig {
    fn default() -> Self {
        Self {
            max_sets: 1024,
            uniform_buffers_per_set: 4,
            image_samplers_per_set: 8,
        }
    }
}

/// # Renderer Configuration
///
/// Settings for the device, swapchain and frame loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for instance creation
    pub application_name: String,
    /// Number of frame slots rotating through the GPU
    pub frames_in_flight: usize,
    /// Requested number of presentable images
    pub swapchain_image_count: u32,
    /// Use a low-latency present mode (mailbox) when the surface offers one
    pub prefer_low_latency: bool,
    /// Finite fence timeout used to detect a hung device; `None` waits forever
    pub fence_timeout_ms: Option<u64>,
    /// Whether to enable validation layers (`None` = debug builds only)
    pub enable_validation: Option<bool>,
    /// Descriptor pool sizing
    pub descriptor_pool: DescriptorPoolConfig,
    /// Largest single upload accepted by the transfer engine
    pub max_upload_bytes: u64,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            frames_in_flight: 3,
            swapchain_image_count: 3,
            prefer_low_latency: true,
            fence_timeout_ms: None,
            enable_validation: None,
            descriptor_pool: DescriptorPoolConfig::default(),
            max_upload_bytes: 256 * 1024 * 1024,
        }
    }

    /// Set the number of frames in flight
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Set the requested swapchain image count
    pub fn with_swapchain_image_count(mut self, count: u32) -> Self {
        self.swapchain_image_count = count;
        self
    }

    /// Prefer or avoid the low-latency present mode
    pub fn with_low_latency(mut self, enabled: bool) -> Self {
        self.prefer_low_latency = enabled;
        self
    }

    /// Use a finite fence timeout for hung-device detection
    pub fn with_fence_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.fence_timeout_ms = Some(timeout_ms);
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Override descriptor pool sizing
    pub fn with_descriptor_pool(mut self, pool: DescriptorPoolConfig) -> Self {
        self.descriptor_pool = pool;
        self
    }

    /// Cap the size of a single upload
    pub fn with_max_upload_bytes(mut self, bytes: u64) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    /// Fence timeout as a duration, `None` meaning wait forever
    pub fn fence_timeout(&self) -> Option<Duration> {
        self.fence_timeout_ms.map(Duration::from_millis)
    }

    /// Whether validation layers should be requested
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("Application name cannot be empty".to_string()));
        }

        if self.frames_in_flight == 0 {
            return Err(ConfigError::Invalid("Frames in flight must be at least 1".to_string()));
        }

        if self.frames_in_flight > 8 {
            return Err(ConfigError::Invalid(
                "Frames in flight should not exceed 8".to_string(),
            ));
        }

        if self.swapchain_image_count == 0 {
            return Err(ConfigError::Invalid(
                "Swapchain image count must be at least 1".to_string(),
            ));
        }

        if self.descriptor_pool.max_sets == 0 {
            return Err(ConfigError::Invalid(
                "Descriptor pool must allow at least one set".to_string(),
            ));
        }

        if self.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid("Upload cap must be non-zero".to_string()));
        }

        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Deferred Renderer")
    }
}

/// # Logging Configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter used when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: if cfg!(debug_assertions) { "debug" } else { "info" }.to_string(),
        }
    }
}

/// # Complete Application Configuration
///
/// Top-level configuration applications load from disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Renderer configuration
    pub renderer: RendererConfig,
}

impl ApplicationConfig {
    /// Create a new application configuration with defaults
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            logging: LoggingConfig::default(),
            renderer: RendererConfig::new(app_name),
        }
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.renderer.validate()
    }
}

impl Config for ApplicationConfig {}
impl Config for RendererConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_triple_buffered_and_valid() {
        let config = RendererConfig::default();
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.swapchain_image_count, 3);
        assert!(config.fence_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_frames() {
        let config = RendererConfig::default().with_frames_in_flight(0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_empty_descriptor_pool() {
        let config = RendererConfig::default().with_descriptor_pool(DescriptorPoolConfig {
            max_sets: 0,
            ..DescriptorPoolConfig::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fence_timeout_conversion() {
        let config = RendererConfig::default().with_fence_timeout_ms(250);
        assert_eq!(config.fence_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_toml_partial_document_uses_defaults() {
        let parsed: ApplicationConfig = toml::from_str(
            r#"
            [renderer]
            frames_in_flight = 2
            fence_timeout_ms = 5000
            "#,
        )
        .expect("valid toml");
        assert_eq!(parsed.renderer.frames_in_flight, 2);
        assert_eq!(parsed.renderer.fence_timeout_ms, Some(5000));
        assert_eq!(parsed.renderer.swapchain_image_count, 3);
        assert_eq!(parsed.renderer.descriptor_pool, DescriptorPoolConfig::default());
    }

    #[test]
    fn test_ron_document_parses() {
        let parsed: RendererConfig =
            ron::from_str("(application_name: \"viewer\", prefer_low_latency: false)")
                .expect("valid ron");
        assert_eq!(parsed.application_name, "viewer");
        assert!(!parsed.prefer_low_latency);
        assert_eq!(parsed.frames_in_flight, 3);
    }

    #[test]
    fn test_save_and_load_round_trip_through_file() {
        let path = std::env::temp_dir().join("render_core_config_test.toml");
        let path = path.to_string_lossy().to_string();
        let config = ApplicationConfig::new("file test");
        config.save_to_file(&path).expect("save");
        let loaded = ApplicationConfig::load_from_file(&path).expect("load");
        assert_eq!(loaded, config);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let result = ApplicationConfig::load_from_file("config.json");
        assert!(matches!(result, Err(ConfigError::Io(_)) | Err(ConfigError::UnsupportedFormat(_))));
    }
}
