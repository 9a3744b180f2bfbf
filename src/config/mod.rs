//! Configuration module
//!
//! Service endpoint, credential backend and logging settings, stored as TOML.

pub mod config;

pub use config::{ApiConfig, Config, CredentialConfig, LoggingConfig};
