//! Haven Common - Shared configuration, errors, and logging for the Haven service.
//!
//! This crate provides:
//! - Configuration types, loading, and validation
//! - The unified error type and HTTP status mapping
//! - Logging setup with noise filtering

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    Config, ObservabilityConfig, ProviderConfig, ServerConfig, SessionConfig,
};
pub use error::{Error, Result};
pub use logging::init_logging;
