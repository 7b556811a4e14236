//! Shared utilities for the termvpn components.
//!
//! This crate provides the configuration model and the logging setup used by
//! the tunnel engine, the management API client and the `tunnelctl` binary.

pub mod config;
pub mod logging;

// Re-export commonly used modules for convenience
pub use config::{Config, ConfigError, ConfigManager};
