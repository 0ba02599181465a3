//! # Core Module
//!
//! Shared configuration used by every subsystem of the render core.

pub mod config;

pub use config::{
    ApplicationConfig,
    Config,
    ConfigError,
    DescriptorPoolConfig,
    LoggingConfig,
    RendererConfig,
};
