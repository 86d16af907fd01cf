//! # Proxy Admin Channel
//!
//! Authenticated calls from the control plane to a proxy's Envoy admin
//! endpoint: runtime stats, cluster status, a sanitized config dump and
//! graceful shutdown.

pub mod client;
pub mod sanitize;
pub mod verifier;

pub use client::{AdminChannel, AdminClient, AdminScheme, QuitOutcome};
pub use sanitize::sanitize_config_dump;
pub use verifier::{verify_peer_certificate, PeerIdentityVerifier, VerificationError};

use async_trait::async_trait;

use crate::domain::{DataplaneResource, ResourceWithAddress};
use crate::errors::Result;
use crate::utils::CallContext;

/// Administrative operations against a single proxy.
#[async_trait]
pub trait EnvoyAdminClient: Send + Sync {
    /// Request a graceful shutdown. A proxy that closes the connection
    /// without answering is already terminating and counts as success.
    async fn post_quit(&self, ctx: &CallContext, dataplane: &DataplaneResource) -> Result<()>;

    async fn stats(&self, ctx: &CallContext, proxy: &dyn ResourceWithAddress) -> Result<Vec<u8>>;

    async fn clusters(&self, ctx: &CallContext, proxy: &dyn ResourceWithAddress) -> Result<Vec<u8>>;

    /// Sanitized config dump as indented JSON.
    async fn config_dump(
        &self,
        ctx: &CallContext,
        proxy: &dyn ResourceWithAddress,
    ) -> Result<Vec<u8>>;
}
