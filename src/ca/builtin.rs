//! Built-in CA backend.
//!
//! Generates a self-signed ECDSA P-256 root per (mesh, backend) on first use
//! and signs workload identity certificates with it. Rotation appends a new
//! root that becomes the signer; earlier roots keep being returned so peers
//! holding certificates from them stay trusted.

use super::manager::{CaManager, BUILTIN_CA_TYPE};
use crate::domain::CertificateAuthorityBackend;
use crate::errors::{MeshTrustError, Result};
use crate::utils::KeyPair;
use crate::xds::tls::service_spiffe_id;
use async_trait::async_trait;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    Ia5String, IsCa, KeyUsagePurpose, SanType, PKCS_ECDSA_P256_SHA256,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Backdate applied to every certificate to absorb clock skew between peers.
const CLOCK_SKEW_ALLOWANCE: time::Duration = time::Duration::minutes(5);

/// `conf` of a built-in backend declaration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuiltinCaConfig {
    /// Validity of each generated root in days
    pub ca_validity_days: u32,
    /// Validity of issued identity certificates in hours
    pub cert_validity_hours: u32,
}

impl Default for BuiltinCaConfig {
    fn default() -> Self {
        Self { ca_validity_days: 3650, cert_validity_hours: 24 }
    }
}

impl BuiltinCaConfig {
    pub fn from_backend(mesh: &str, backend: &CertificateAuthorityBackend) -> Result<Self> {
        let config: Self = if backend.conf.is_null() {
            Self::default()
        } else {
            serde_json::from_value(backend.conf.clone()).map_err(|e| {
                MeshTrustError::config_with_source(
                    format!("invalid conf of builtin backend '{}' in mesh '{}'", backend.name, mesh),
                    Box::new(e),
                )
            })?
        };

        if config.ca_validity_days == 0 || config.cert_validity_hours == 0 {
            return Err(MeshTrustError::config(format!(
                "builtin backend '{}' in mesh '{}' needs non-zero validity periods",
                backend.name, mesh
            )));
        }
        Ok(config)
    }
}

struct RootCa {
    cert: rcgen::Certificate,
    key: rcgen::KeyPair,
    cert_pem: String,
}

type BackendKey = (String, String);

/// CA manager that owns its roots in memory.
#[derive(Default)]
pub struct BuiltinCaManager {
    roots: RwLock<HashMap<BackendKey, Vec<Arc<RootCa>>>>,
}

impl std::fmt::Debug for BuiltinCaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinCaManager").finish_non_exhaustive()
    }
}

impl BuiltinCaManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new root for the backend and make it the signer.
    ///
    /// Returns the number of roots now trusted.
    pub async fn rotate(&self, mesh: &str, backend: &CertificateAuthorityBackend) -> Result<usize> {
        let config = BuiltinCaConfig::from_backend(mesh, backend)?;
        let mut roots = self.roots.write().await;
        let entry = roots.entry(key(mesh, backend)).or_default();
        let root = generate_root(mesh, backend, entry.len() + 1, &config)?;
        entry.push(Arc::new(root));

        info!(mesh = %mesh, backend = %backend.name, roots = entry.len(), "Rotated builtin CA root");
        Ok(entry.len())
    }

    /// Drop every root except the current signer, ending a rotation.
    pub async fn retire_old_roots(&self, mesh: &str, backend: &CertificateAuthorityBackend) {
        if let Some(entry) = self.roots.write().await.get_mut(&key(mesh, backend)) {
            if entry.len() > 1 {
                let retired = entry.len() - 1;
                entry.drain(..retired);
                info!(mesh = %mesh, backend = %backend.name, retired, "Retired builtin CA roots");
            }
        }
    }

    async fn signer(&self, mesh: &str, backend: &CertificateAuthorityBackend) -> Result<Arc<RootCa>> {
        self.ensure(mesh, backend).await?;
        self.roots
            .read()
            .await
            .get(&key(mesh, backend))
            .and_then(|entry| entry.last().cloned())
            .ok_or_else(|| MeshTrustError::ca_backend(BUILTIN_CA_TYPE, mesh, "no CA root available"))
    }
}

#[async_trait]
impl CaManager for BuiltinCaManager {
    fn backend_type(&self) -> &str {
        BUILTIN_CA_TYPE
    }

    fn validate_backend(&self, mesh: &str, backend: &CertificateAuthorityBackend) -> Result<()> {
        BuiltinCaConfig::from_backend(mesh, backend).map(|_| ())
    }

    async fn ensure(&self, mesh: &str, backend: &CertificateAuthorityBackend) -> Result<()> {
        let key = key(mesh, backend);
        if self.roots.read().await.get(&key).is_some_and(|entry| !entry.is_empty()) {
            return Ok(());
        }

        let config = BuiltinCaConfig::from_backend(mesh, backend)?;
        let mut roots = self.roots.write().await;
        let entry = roots.entry(key).or_default();
        if entry.is_empty() {
            entry.push(Arc::new(generate_root(mesh, backend, 1, &config)?));
            info!(mesh = %mesh, backend = %backend.name, "Created builtin CA root");
        }
        Ok(())
    }

    async fn get_root_certs(
        &self,
        mesh: &str,
        backend: &CertificateAuthorityBackend,
    ) -> Result<Vec<Vec<u8>>> {
        self.ensure(mesh, backend).await?;
        let roots = self.roots.read().await;
        Ok(roots
            .get(&key(mesh, backend))
            .map(|entry| entry.iter().map(|root| root.cert_pem.clone().into_bytes()).collect())
            .unwrap_or_default())
    }

    async fn generate_identity_cert(
        &self,
        mesh: &str,
        backend: &CertificateAuthorityBackend,
        services: &[String],
    ) -> Result<KeyPair> {
        let config = BuiltinCaConfig::from_backend(mesh, backend)?;
        let signer = self.signer(mesh, backend).await?;
        let validity = time::Duration::hours(i64::from(config.cert_validity_hours));

        let key_pair = sign_identity_cert(&signer.cert, &signer.key, mesh, services, validity)
            .map_err(|e| MeshTrustError::ca_backend(BUILTIN_CA_TYPE, mesh, e.to_string()))?;

        debug!(mesh = %mesh, backend = %backend.name, services = ?services, "Issued identity certificate");
        Ok(key_pair)
    }
}

fn key(mesh: &str, backend: &CertificateAuthorityBackend) -> BackendKey {
    (mesh.to_string(), backend.name.clone())
}

fn generate_root(
    mesh: &str,
    backend: &CertificateAuthorityBackend,
    generation: usize,
    config: &BuiltinCaConfig,
) -> Result<RootCa> {
    let build = || -> std::result::Result<RootCa, rcgen::Error> {
        let mut params = CertificateParams::default();
        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, mesh);
        name.push(DnType::OrganizationName, "mesh-trust");
        name.push(DnType::OrganizationalUnitName, format!("{}-{}", backend.name, generation));
        params.distinguished_name = name;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        params
            .subject_alt_names
            .push(SanType::URI(Ia5String::try_from(format!("spiffe://{}", mesh))?));

        let now = time::OffsetDateTime::now_utc();
        params.not_before = now - CLOCK_SKEW_ALLOWANCE;
        params.not_after = now + time::Duration::days(i64::from(config.ca_validity_days));

        let key = rcgen::KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)?;
        let cert = params.self_signed(&key)?;
        let cert_pem = cert.pem();
        Ok(RootCa { cert, key, cert_pem })
    };

    build().map_err(|e| MeshTrustError::ca_backend(BUILTIN_CA_TYPE, mesh, e.to_string()))
}

/// Sign an identity certificate for `services` of `mesh` with the given issuer.
pub(crate) fn sign_identity_cert(
    issuer: &rcgen::Certificate,
    issuer_key: &rcgen::KeyPair,
    mesh: &str,
    services: &[String],
    validity: time::Duration,
) -> std::result::Result<KeyPair, rcgen::Error> {
    let mut params = CertificateParams::default();
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, services.first().map(String::as_str).unwrap_or(mesh));
    params.distinguished_name = name;
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
    params.extended_key_usages =
        vec![ExtendedKeyUsagePurpose::ServerAuth, ExtendedKeyUsagePurpose::ClientAuth];
    params.use_authority_key_identifier_extension = true;
    for service in services {
        params
            .subject_alt_names
            .push(SanType::URI(Ia5String::try_from(service_spiffe_id(mesh, service))?));
    }

    let now = time::OffsetDateTime::now_utc();
    params.not_before = now - CLOCK_SKEW_ALLOWANCE;
    params.not_after = now + validity;

    let key = rcgen::KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)?;
    let cert = params.signed_by(&key, issuer, issuer_key)?;
    Ok(KeyPair::new(cert.pem(), key.serialize_pem()))
}
