//! # Configuration Management
//!
//! Loads the mesh trust settings from `MESH_TRUST_*` environment variables,
//! falling back to defaults, and validates the result.

mod settings;

pub use settings::{AdminClientConfig, AppConfig, ControlPlaneConfig, ObservabilityConfig};

use crate::Result;
use std::path::PathBuf;

impl AppConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = AdminClientConfig::default();

        let admin = AdminClientConfig {
            client_cert_path: env_path("MESH_TRUST_ADMIN_CLIENT_CERT"),
            client_key_path: env_path("MESH_TRUST_ADMIN_CLIENT_KEY"),
            default_admin_port: env_parse(
                "MESH_TRUST_ADMIN_DEFAULT_PORT",
                defaults.default_admin_port,
            )?,
            dial_timeout_ms: env_parse("MESH_TRUST_ADMIN_DIAL_TIMEOUT_MS", defaults.dial_timeout_ms)?,
            tls_handshake_timeout_ms: env_parse(
                "MESH_TRUST_ADMIN_TLS_HANDSHAKE_TIMEOUT_MS",
                defaults.tls_handshake_timeout_ms,
            )?,
            request_timeout_ms: env_parse(
                "MESH_TRUST_ADMIN_REQUEST_TIMEOUT_MS",
                defaults.request_timeout_ms,
            )?,
            plaintext_loopback: std::env::var("MESH_TRUST_ADMIN_PLAINTEXT_LOOPBACK")
                .map(|value| is_truthy(&value))
                .unwrap_or(defaults.plaintext_loopback),
        };

        let control_plane = ControlPlaneConfig {
            admin_proxy_cert_path: env_path("MESH_TRUST_ADMIN_PROXY_CERT"),
            admin_proxy_key_path: env_path("MESH_TRUST_ADMIN_PROXY_KEY"),
        };

        let mut observability = ObservabilityConfig::default();
        if let Ok(level) = std::env::var("MESH_TRUST_LOG_LEVEL") {
            observability.log_level = level;
        }
        if let Ok(value) = std::env::var("MESH_TRUST_LOG_JSON") {
            observability.json_logging = is_truthy(&value);
        }

        let config = Self { admin, control_plane, observability };
        config.validate()?;
        Ok(config)
    }

    /// Load a `.env` file if present, then read the environment.
    pub fn load() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(crate::Error::config_with_source("Failed to read .env file", Box::new(e)));
            }
        }
        Self::from_env()
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty()).map(PathBuf::from)
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| crate::Error::config(format!("Invalid value for {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
