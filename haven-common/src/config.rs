//! Configuration management for the Haven service.
//!
//! Configuration lives in a single JSON file at `~/.haven/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! ## Server
//! - `HAVEN_BIND_ADDRESS` → server.bind
//! - `PORT` → server.port
//! - `HAVEN_STATIC_DIR` → server.static_dir
//! - `ORIGIN` → server.allowed_origins (comma-separated)
//! - `ENFORCE_HTTPS` → server.enforce_https ("true" enables)
//! - `REVERSE_PROXY_IP` → server.trusted_proxy
//!
//! ## Sessions
//! - `HAVEN_SESSION_TTL_SECS` → sessions.idle_ttl_secs
//! - `HAVEN_SWEEP_INTERVAL_SECS` → sessions.sweep_interval_secs
//!
//! ## Provider
//! - `GEMINI_API_KEY` / `GOOGLE_API_KEY` → provider.api_key
//! - `HAVEN_MODEL` → provider.model
//!
//! ## Observability
//! - `HAVEN_LOG_LEVEL` → observability.log_level
//! - `HAVEN_LOG_FORMAT` → observability.log_format

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".haven"),
        |dirs| dirs.home_dir().join(".haven"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Server Configuration
// ============================================================================

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the server.
    /// Default: "127.0.0.1" (conservative, local only)
    /// Set to "0.0.0.0" for remote access
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory served for static assets (router fallback)
    #[serde(default = "default_static_dir")]
    pub static_dir: String,

    /// Origins allowed by CORS. Empty means any origin (with a warning).
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Redirect plain-HTTP requests (as seen via X-Forwarded-Proto) to HTTPS
    #[serde(default)]
    pub enforce_https: bool,

    /// Reverse proxy address trusted to supply X-Forwarded-For
    #[serde(default)]
    pub trusted_proxy: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_port(),
            static_dir: default_static_dir(),
            allowed_origins: Vec::new(),
            enforce_https: false,
            trusted_proxy: None,
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    3000
}

fn default_static_dir() -> String {
    "./static".into()
}

// ============================================================================
// Session Configuration
// ============================================================================

/// Session cache lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum idle time before a session is evicted, in seconds
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,

    /// Interval between eviction sweeps, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl SessionConfig {
    /// Idle TTL as a `Duration`.
    pub const fn idle_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.idle_ttl_secs)
    }

    /// Sweep interval as a `Duration`.
    pub const fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: default_idle_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_idle_ttl_secs() -> u64 {
    30 * 60
}

fn default_sweep_interval_secs() -> u64 {
    10 * 60
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// Text-generation provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key for the provider. Usually supplied via GEMINI_API_KEY.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// System instruction applied to every conversation
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Top-k sampling cutoff
    #[serde(default = "default_top_k")]
    pub top_k: i32,

    /// Top-p (nucleus) sampling cutoff
    #[serde(default = "default_top_p")]
    pub top_p: f64,

    /// Maximum tokens generated per reply
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: i64,

    /// Upper bound on a single exchange, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ProviderConfig {
    /// Per-exchange timeout as a `Duration`.
    pub const fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            system_prompt: default_system_prompt(),
            temperature: default_temperature(),
            top_k: default_top_k(),
            top_p: default_top_p(),
            max_output_tokens: default_max_output_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_model() -> String {
    "gemini-2.0-flash".into()
}

fn default_system_prompt() -> String {
    "You are a specialized AI assistant for home security systems. Answer the \
     following question about home security. If the question is not related to \
     home security, politely decline to answer and explain that you only answer \
     questions about home security systems, cameras, alarms, sensors, etc. Keep \
     responses concise, informative, and helpful for home owners. If the user \
     asks you to control a home security device, behave as if you have done it."
        .into()
}

fn default_temperature() -> f64 {
    1.0
}

fn default_top_k() -> i32 {
    40
}

fn default_top_p() -> f64 {
    0.95
}

fn default_max_output_tokens() -> i64 {
    8192
}

fn default_request_timeout_secs() -> u64 {
    120
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Base log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format: "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Top-level Configuration
// ============================================================================

/// Unified configuration for the Haven service.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub sessions: SessionConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path with env overrides applied.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    /// Load configuration from an explicit path with env overrides applied.
    ///
    /// A missing file is not an error: defaults are used. This is also the
    /// entry point for tests that need isolated config files.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)?;
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides on top of file/default values.
    fn apply_env_overrides(&mut self) {
        if let Ok(bind) = std::env::var("HAVEN_BIND_ADDRESS") {
            self.server.bind = bind;
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(dir) = std::env::var("HAVEN_STATIC_DIR") {
            self.server.static_dir = dir;
        }
        if let Ok(origins) = std::env::var("ORIGIN") {
            self.server.allowed_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(enforce) = std::env::var("ENFORCE_HTTPS") {
            self.server.enforce_https = enforce == "true";
        }
        if let Ok(proxy) = std::env::var("REVERSE_PROXY_IP") {
            if !proxy.is_empty() {
                self.server.trusted_proxy = Some(proxy);
            }
        }

        if let Ok(ttl) = std::env::var("HAVEN_SESSION_TTL_SECS") {
            if let Ok(ttl) = ttl.parse() {
                self.sessions.idle_ttl_secs = ttl;
            }
        }
        if let Ok(interval) = std::env::var("HAVEN_SWEEP_INTERVAL_SECS") {
            if let Ok(interval) = interval.parse() {
                self.sessions.sweep_interval_secs = interval;
            }
        }

        if let Ok(key) =
            std::env::var("GEMINI_API_KEY").or_else(|_| std::env::var("GOOGLE_API_KEY"))
        {
            if !key.is_empty() {
                self.provider.api_key = Some(key);
            }
        }
        if let Ok(model) = std::env::var("HAVEN_MODEL") {
            self.provider.model = model;
        }

        if let Ok(level) = std::env::var("HAVEN_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("HAVEN_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Check value ranges that would otherwise only fail at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.sessions.idle_ttl_secs == 0 {
            return Err(Error::Config("sessions.idle_ttl_secs must be positive".into()));
        }
        if self.sessions.sweep_interval_secs == 0 {
            return Err(Error::Config(
                "sessions.sweep_interval_secs must be positive".into(),
            ));
        }
        if self.provider.model.is_empty() {
            return Err(Error::Config("provider.model must not be empty".into()));
        }
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(Error::Config(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.provider.request_timeout_secs == 0 {
            return Err(Error::Config(
                "provider.request_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}
