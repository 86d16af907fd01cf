//! Per-session record of the secrets a proxy has been handed.
//!
//! Every configuration pass that references a mesh CA bundle or the proxy's
//! identity certificate goes through the tracker, so the secret responder
//! knows exactly which SDS resources the session needs.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use rustls::pki_types::UnixTime;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::Result;
use crate::utils::certificates::certificate_info;
use crate::utils::{CaPool, KeyPair};
use crate::xds::tls::{IDENTITY_CERT_SECRET_PREFIX, MESH_CA_SECRET_PREFIX};

/// Handle to the CA bundle secret of one mesh.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CaRequest {
    mesh: String,
}

impl CaRequest {
    pub fn mesh_name(&self) -> &str {
        &self.mesh
    }

    /// SDS resource name of the bundle.
    pub fn name(&self) -> String {
        format!("{}{}", MESH_CA_SECRET_PREFIX, self.mesh)
    }
}

/// Handle to the identity certificate secret of the session's proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityCertRequest {
    mesh: String,
}

impl IdentityCertRequest {
    pub fn mesh_name(&self) -> &str {
        &self.mesh
    }

    /// SDS resource name of the identity certificate.
    pub fn name(&self) -> String {
        format!("{}{}", IDENTITY_CERT_SECRET_PREFIX, self.mesh)
    }
}

const IDENTITY_ORIGIN: &str = "identity certificate";

/// Identity issued for a session, with what it was issued for.
#[derive(Debug, Clone)]
struct IssuedIdentity {
    key_pair: KeyPair,
    services: Vec<String>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl IssuedIdentity {
    fn new(key_pair: KeyPair, services: &[String]) -> Result<Self> {
        let chain = key_pair.certificate_chain(IDENTITY_ORIGIN)?;
        let info = certificate_info(&chain[0], IDENTITY_ORIGIN)?;
        Ok(Self {
            key_pair,
            services: services.to_vec(),
            not_before: info.not_before,
            not_after: info.not_after,
        })
    }

    /// Why this identity can no longer be served, if it can't.
    ///
    /// Identities are renewed once 80% of their validity has passed.
    fn stale_reason(
        &self,
        services: &[String],
        pool: Option<&CaPool>,
        now: DateTime<Utc>,
    ) -> Option<&'static str> {
        if self.services != services {
            return Some("services changed");
        }
        let renew_at = self.not_before + (self.not_after - self.not_before) * 4 / 5;
        if now >= renew_at {
            return Some("nearing expiry");
        }
        let pool = pool?;
        let Ok(chain) = self.key_pair.certificate_chain(IDENTITY_ORIGIN) else {
            return Some("unreadable certificate");
        };
        let now = UnixTime::since_unix_epoch(Duration::from_secs(
            u64::try_from(now.timestamp()).unwrap_or_default(),
        ));
        if pool.verify_chain(&chain[0], &chain[1..], now).is_err() {
            return Some("issuer no longer trusted");
        }
        None
    }
}

/// Append-only secret bookkeeping for one proxy session.
///
/// Safe to share between concurrent configuration passes of the same session.
#[derive(Debug)]
pub struct SecretsTracker {
    own_mesh: String,
    used_cas: DashSet<String>,
    identity_used: AtomicBool,
    identity: Mutex<Option<IssuedIdentity>>,
}

impl SecretsTracker {
    pub fn new(own_mesh: impl Into<String>) -> Self {
        Self {
            own_mesh: own_mesh.into(),
            used_cas: DashSet::new(),
            identity_used: AtomicBool::new(false),
            identity: Mutex::new(None),
        }
    }

    pub fn own_mesh(&self) -> &str {
        &self.own_mesh
    }

    /// Record that the CA bundle of `mesh` is needed.
    pub fn request_ca(&self, mesh: &str) -> CaRequest {
        if self.used_cas.insert(mesh.to_string()) {
            debug!(mesh = %mesh, "Tracking mesh CA secret");
        }
        CaRequest { mesh: mesh.to_string() }
    }

    /// Record that the proxy's own identity certificate is needed.
    pub fn request_identity_cert(&self) -> IdentityCertRequest {
        if !self.identity_used.swap(true, Ordering::AcqRel) {
            debug!(mesh = %self.own_mesh, "Tracking identity secret");
        }
        IdentityCertRequest { mesh: self.own_mesh.clone() }
    }

    /// Meshes whose CA bundles were requested, sorted.
    pub fn used_cas(&self) -> Vec<String> {
        let mut meshes: Vec<String> = self.used_cas.iter().map(|mesh| mesh.key().clone()).collect();
        meshes.sort();
        meshes
    }

    pub fn used_identity(&self) -> bool {
        self.identity_used.load(Ordering::Acquire)
    }

    /// Identity for this session, issued by `issue` when needed.
    ///
    /// The cached identity is reused while it was issued for the same
    /// `services`, is short of 80% of its validity, and still chains to
    /// `roots`. Otherwise a new one is issued. A failed `issue` leaves the
    /// cache as it was so a later call can try again.
    pub async fn identity_material<F, Fut>(
        &self,
        services: &[String],
        roots: Option<&CaPool>,
        issue: F,
    ) -> Result<KeyPair>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<KeyPair>>,
    {
        let mut cached = self.identity.lock().await;
        if let Some(identity) = cached.as_ref() {
            match identity.stale_reason(services, roots, Utc::now()) {
                None => return Ok(identity.key_pair.clone()),
                Some(reason) => {
                    info!(mesh = %self.own_mesh, reason, "Reissuing identity certificate")
                }
            }
        }

        let identity = IssuedIdentity::new(issue().await?, services)?;
        let key_pair = identity.key_pair.clone();
        *cached = Some(identity);
        Ok(key_pair)
    }

    /// The cached identity, if one has been issued.
    pub async fn cached_identity(&self) -> Option<KeyPair> {
        self.identity.lock().await.as_ref().map(|identity| identity.key_pair.clone())
    }
}
