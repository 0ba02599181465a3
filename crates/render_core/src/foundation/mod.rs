//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the core:
//! - Logging setup
//! - Explicit identifier allocation and handle collections

pub mod collections;
pub mod logging;
