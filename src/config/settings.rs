//! # Configuration Settings
//!
//! Defines the configuration structure for the mesh trust core.

use crate::errors::{MeshTrustError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    /// Proxy admin channel configuration
    #[validate(nested)]
    pub admin: AdminClientConfig,

    /// Control plane identity used on proxy-facing listeners
    #[validate(nested)]
    pub control_plane: ControlPlaneConfig,

    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(MeshTrustError::from)?;

        self.validate_custom()?;

        Ok(())
    }

    fn validate_custom(&self) -> Result<()> {
        if self.admin.client_cert_path.is_some() != self.admin.client_key_path.is_some() {
            return Err(MeshTrustError::config(
                "Admin client certificate and key must be configured together",
            ));
        }

        if self.control_plane.admin_proxy_cert_path.is_some()
            != self.control_plane.admin_proxy_key_path.is_some()
        {
            return Err(MeshTrustError::config(
                "Admin proxy certificate and key must be configured together",
            ));
        }

        if self.admin.request_timeout_ms < self.admin.dial_timeout_ms {
            return Err(MeshTrustError::config(
                "Admin request timeout cannot be shorter than the dial timeout",
            ));
        }

        Ok(())
    }
}

/// Client settings for the verified channel to proxy admin endpoints
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AdminClientConfig {
    /// Control plane client certificate presented to proxies
    pub client_cert_path: Option<PathBuf>,

    /// Private key for the client certificate
    pub client_key_path: Option<PathBuf>,

    /// Admin port used when a proxy does not declare one
    #[validate(range(min = 1, max = 65535, message = "Admin port must be between 1 and 65535"))]
    pub default_admin_port: u32,

    /// TCP connect timeout in milliseconds
    #[validate(range(min = 1, max = 60000, message = "Dial timeout must be between 1 and 60000 ms"))]
    pub dial_timeout_ms: u64,

    /// TLS handshake timeout in milliseconds
    #[validate(range(
        min = 1,
        max = 60000,
        message = "TLS handshake timeout must be between 1 and 60000 ms"
    ))]
    pub tls_handshake_timeout_ms: u64,

    /// Overall request timeout in milliseconds
    #[validate(range(
        min = 1,
        max = 300000,
        message = "Request timeout must be between 1 and 300000 ms"
    ))]
    pub request_timeout_ms: u64,

    /// Reach admin endpoints on loopback IPs over plain HTTP
    pub plaintext_loopback: bool,
}

impl Default for AdminClientConfig {
    fn default() -> Self {
        Self {
            client_cert_path: None,
            client_key_path: None,
            default_admin_port: 9901,
            dial_timeout_ms: 3000,
            tls_handshake_timeout_ms: 3000,
            request_timeout_ms: 5000,
            plaintext_loopback: true,
        }
    }
}

impl AdminClientConfig {
    /// Get dial timeout as Duration
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    /// Get TLS handshake timeout as Duration
    pub fn tls_handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.tls_handshake_timeout_ms)
    }

    /// Get overall request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Connect phase budget. The HTTP client bounds TCP connect and the TLS
    /// handshake with a single timer.
    pub fn connect_timeout(&self) -> Duration {
        self.dial_timeout() + self.tls_handshake_timeout()
    }
}

/// Control plane material used when securing proxy-facing listeners
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct ControlPlaneConfig {
    /// Self-signed admin proxy certificate used when a mesh has no mTLS
    pub admin_proxy_cert_path: Option<PathBuf>,

    /// Private key for the admin proxy certificate
    pub admin_proxy_key_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    /// Service name attached to log output
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Log level or `EnvFilter` directive (trace, debug, info, warn, error)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "mesh-trust".to_string(),
            log_level: "info".to_string(),
            json_logging: false,
        }
    }
}
