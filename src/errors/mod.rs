//! # Error Handling
//!
//! Error types for CA backends, secret tracking, TLS context construction and
//! the proxy admin channel.

pub mod tls;
pub mod types;

pub use tls::TlsError;
pub use types::{MeshTrustError, Result};

/// Short alias used across the crate
pub type Error = MeshTrustError;
