//! Inputs shared by xDS generators for one proxy

use std::sync::Arc;

use rcgen::{CertificateParams, DnType, PKCS_ECDSA_P256_SHA256};
use tracing::info;

use crate::config::ControlPlaneConfig;
use crate::domain::MeshResource;
use crate::errors::{Result, TlsError};
use crate::utils::KeyPair;

/// Validity of a generated admin proxy certificate.
const ADMIN_PROXY_CERT_VALIDITY: time::Duration = time::Duration::days(3650);

/// Control plane wide material.
#[derive(Debug, Clone)]
pub struct ControlPlaneContext {
    /// Self-signed key pair served on proxy-facing listeners of meshes without mTLS
    pub admin_proxy_key_pair: KeyPair,
}

impl ControlPlaneContext {
    /// Load the admin proxy key pair named by `config`, or generate a
    /// self-signed one when no paths are configured.
    pub fn from_config(config: &ControlPlaneConfig) -> Result<Self> {
        let admin_proxy_key_pair =
            match (&config.admin_proxy_cert_path, &config.admin_proxy_key_path) {
                (Some(cert_path), Some(key_path)) => {
                    let pair = KeyPair::load(cert_path, key_path)?;
                    info!(cert_path = %cert_path.display(), "Loaded admin proxy certificate");
                    pair
                }
                (None, None) => {
                    let pair = generate_admin_proxy_key_pair()?;
                    info!("Generated self-signed admin proxy certificate");
                    pair
                }
                (None, Some(_)) => return Err(TlsError::MissingCertificatePath.into()),
                (Some(_), None) => return Err(TlsError::MissingPrivateKeyPath.into()),
            };
        Ok(Self { admin_proxy_key_pair })
    }
}

fn generate_admin_proxy_key_pair() -> std::result::Result<KeyPair, TlsError> {
    let mut params = CertificateParams::new(vec!["localhost".to_string()])?;
    params.distinguished_name.push(DnType::CommonName, "mesh-trust admin proxy");
    let now = time::OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::minutes(5);
    params.not_after = now + ADMIN_PROXY_CERT_VALIDITY;

    let key = rcgen::KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)?;
    let cert = params.self_signed(&key)?;
    Ok(KeyPair::new(cert.pem(), key.serialize_pem()))
}

/// The mesh the proxy belongs to, if it was found.
#[derive(Debug, Clone, Default)]
pub struct MeshContext {
    pub resource: Option<MeshResource>,
}

impl MeshContext {
    pub fn new(resource: MeshResource) -> Self {
        Self { resource: Some(resource) }
    }

    pub fn name(&self) -> Option<&str> {
        self.resource.as_ref().map(|mesh| mesh.name.as_str())
    }

    /// The mesh, only when its mTLS is enabled.
    pub fn mtls_mesh(&self) -> Option<&MeshResource> {
        self.resource.as_ref().filter(|mesh| mesh.mtls_enabled())
    }
}

#[derive(Debug, Clone)]
pub struct XdsContext {
    pub control_plane: Arc<ControlPlaneContext>,
    pub mesh: MeshContext,
}

impl XdsContext {
    pub fn new(control_plane: Arc<ControlPlaneContext>, mesh: MeshContext) -> Self {
        Self { control_plane, mesh }
    }
}
