//! Common types, errors, and configuration for partyroom.
//!
//! This crate provides shared functionality used across the partyroom workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for the room runtime and edge router
//! - TOML configuration file loading

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{EdgeConfig, RoomConfig, RuntimeConfig};
pub use config_file::{AdminConfig, ConfigFile, ConfigFileError, PartyEntry, ServerConfigFile};
pub use error::{HandlerError, PartyError};
