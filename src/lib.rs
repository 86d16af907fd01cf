//! # Mesh Trust
//!
//! Trust and transport-security core of a service mesh control plane. It
//! issues, distributes and enforces mutual-TLS identity between the control
//! plane and its Envoy proxies, and opens a verified admin channel back to
//! each proxy.
//!
//! ## Architecture
//!
//! ```text
//! Mesh config + CA registry → CA material → Secrets tracker → TLS contexts
//!                                                    ↓              ↓
//!                                          SDS secret generator   Filter chain configurer
//!
//! CA registry + mesh CA pool → Admin channel (mTLS client) → proxy admin endpoint
//! ```
//!
//! ## Core Components
//!
//! - **CA backends** ([`ca`]): pluggable managers producing mesh roots and
//!   workload identity certificates, selected by backend type.
//! - **xDS** ([`xds`]): secrets tracking, SDS secrets, TLS contexts and the
//!   filter chain configurer for proxy-facing listeners.
//! - **Admin channel** ([`admin`]): stats, clusters, config dump and graceful
//!   shutdown over mTLS with SPIFFE identity verification.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mesh_trust::admin::{AdminClient, EnvoyAdminClient};
//! use mesh_trust::ca::default_ca_managers;
//! use mesh_trust::domain::DataplaneResource;
//! use mesh_trust::storage::MemoryResourceManager;
//! use mesh_trust::utils::CallContext;
//! use mesh_trust::{config::AppConfig, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = AppConfig::load()?;
//!     mesh_trust::observability::init_logging(&config.observability)?;
//!
//!     let client = AdminClient::from_config(
//!         Arc::new(default_ca_managers()),
//!         Arc::new(MemoryResourceManager::new()),
//!         config.admin,
//!     )?;
//!     let proxy = DataplaneResource::new("default", "web-1", "10.0.0.5").with_service("web");
//!     let stats = client.stats(&CallContext::background(), &proxy).await?;
//!     println!("{}", String::from_utf8_lossy(&stats));
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod ca;
pub mod config;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod storage;
pub mod utils;
pub mod xds;

// Re-export commonly used types and traits
pub use config::AppConfig;
pub use errors::{Error, Result};
pub use observability::init_logging;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
