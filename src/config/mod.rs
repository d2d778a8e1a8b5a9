//! Configuration management
//!
//! Handles connection parameters read from the environment and gateway
//! settings read from TOML.

pub mod connection;
pub mod settings;

pub use connection::{ConnectionConfig, Keepalive, SslMode};
pub use settings::{Settings, load_settings, load_settings_from};
