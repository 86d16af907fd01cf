//! Provided CA backend.
//!
//! The operator supplies the root certificate and its signing key as PEM files
//! named in the backend `conf`. Every certificate in the cert file is trusted;
//! the first one signs identity certificates.

use super::builtin::sign_identity_cert;
use super::manager::{CaManager, PROVIDED_CA_TYPE};
use crate::domain::CertificateAuthorityBackend;
use crate::errors::{MeshTrustError, Result, TlsError};
use crate::utils::certificates::parse_pem_certificates;
use crate::utils::KeyPair;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// `conf` of a provided backend declaration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvidedCaConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    #[serde(default = "default_cert_validity_hours")]
    pub cert_validity_hours: u32,
}

fn default_cert_validity_hours() -> u32 {
    24
}

impl ProvidedCaConfig {
    pub fn from_backend(mesh: &str, backend: &CertificateAuthorityBackend) -> Result<Self> {
        let config: Self = serde_json::from_value(backend.conf.clone()).map_err(|e| {
            MeshTrustError::config_with_source(
                format!("invalid conf of provided backend '{}' in mesh '{}'", backend.name, mesh),
                Box::new(e),
            )
        })?;
        if config.cert_validity_hours == 0 {
            return Err(MeshTrustError::config(format!(
                "provided backend '{}' in mesh '{}' needs a non-zero cert_validity_hours",
                backend.name, mesh
            )));
        }
        Ok(config)
    }
}

/// CA manager reading operator-supplied root material from disk.
///
/// Files are read on every call, so replacing them on disk rotates the CA
/// without restarting the control plane.
#[derive(Debug, Default)]
pub struct ProvidedCaManager;

impl ProvidedCaManager {
    pub fn new() -> Self {
        Self
    }
}

async fn read_file(path: &Path) -> std::result::Result<Vec<u8>, std::io::Error> {
    tokio::fs::read(path).await
}

#[async_trait]
impl CaManager for ProvidedCaManager {
    fn backend_type(&self) -> &str {
        PROVIDED_CA_TYPE
    }

    fn validate_backend(&self, mesh: &str, backend: &CertificateAuthorityBackend) -> Result<()> {
        let config = ProvidedCaConfig::from_backend(mesh, backend)?;
        KeyPair::load(&config.cert_file, &config.key_file)?;
        Ok(())
    }

    async fn ensure(&self, mesh: &str, backend: &CertificateAuthorityBackend) -> Result<()> {
        // Nothing to create; the material must already exist.
        self.get_root_certs(mesh, backend).await.map(|_| ())
    }

    async fn get_root_certs(
        &self,
        mesh: &str,
        backend: &CertificateAuthorityBackend,
    ) -> Result<Vec<Vec<u8>>> {
        let config = ProvidedCaConfig::from_backend(mesh, backend)?;
        let pem = read_file(&config.cert_file).await.map_err(|e| TlsError::CertificateReadError {
            path: config.cert_file.clone(),
            source: e,
        })?;

        let origin = config.cert_file.display().to_string();
        let certs = parse_pem_certificates(&pem, &origin)?;
        if certs.is_empty() {
            return Err(TlsError::EmptyCertificateChain { origin }.into());
        }

        Ok(certificate_blocks(&String::from_utf8_lossy(&pem)))
    }

    async fn generate_identity_cert(
        &self,
        mesh: &str,
        backend: &CertificateAuthorityBackend,
        services: &[String],
    ) -> Result<KeyPair> {
        let config = ProvidedCaConfig::from_backend(mesh, backend)?;
        let cert_pem = read_file(&config.cert_file).await.map_err(|e| {
            TlsError::CertificateReadError { path: config.cert_file.clone(), source: e }
        })?;
        let key_pem = read_file(&config.key_file).await.map_err(|e| {
            TlsError::PrivateKeyReadError { path: config.key_file.clone(), source: e }
        })?;

        let origin = config.cert_file.display().to_string();
        let signer = parse_pem_certificates(&cert_pem, &origin)?
            .into_iter()
            .next()
            .ok_or(TlsError::EmptyCertificateChain { origin })?;

        let ca_error = |message: String| MeshTrustError::ca_backend(PROVIDED_CA_TYPE, mesh, message);
        let key_pem = String::from_utf8(key_pem).map_err(|e| ca_error(e.to_string()))?;
        let issuer_key = rcgen::KeyPair::from_pem(&key_pem).map_err(|e| ca_error(e.to_string()))?;
        let issuer_params = rcgen::CertificateParams::from_ca_cert_der(&signer)
            .map_err(|e| ca_error(e.to_string()))?;
        // Re-signing the parsed root yields an issuer carrying its DN and key id.
        let issuer = issuer_params.self_signed(&issuer_key).map_err(|e| ca_error(e.to_string()))?;

        let validity = time::Duration::hours(i64::from(config.cert_validity_hours));
        let key_pair = sign_identity_cert(&issuer, &issuer_key, mesh, services, validity)
            .map_err(|e| ca_error(e.to_string()))?;

        debug!(mesh = %mesh, backend = %backend.name, services = ?services, "Issued identity certificate");
        Ok(key_pair)
    }
}

const PEM_CERT_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_CERT_END: &str = "-----END CERTIFICATE-----";

/// The certificate blocks of a PEM file, as written.
fn certificate_blocks(pem: &str) -> Vec<Vec<u8>> {
    let mut blocks = Vec::new();
    let mut rest = pem;
    while let Some(start) = rest.find(PEM_CERT_BEGIN) {
        let Some(end) = rest[start..].find(PEM_CERT_END) else {
            break;
        };
        let end = start + end + PEM_CERT_END.len();
        let mut block = rest[start..end].to_string();
        block.push('\n');
        blocks.push(block.into_bytes());
        rest = &rest[end..];
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa};
    use tempfile::TempDir;

    struct ProvidedFiles {
        _dir: TempDir,
        backend: CertificateAuthorityBackend,
        root_pem: String,
    }

    fn provided_files() -> ProvidedFiles {
        let dir = TempDir::new().unwrap();
        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, "operator root");
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();

        let cert_file = dir.path().join("ca.crt");
        let key_file = dir.path().join("ca.key");
        std::fs::write(&cert_file, cert.pem()).unwrap();
        std::fs::write(&key_file, key.serialize_pem()).unwrap();

        let backend = CertificateAuthorityBackend::new("ca-provided", PROVIDED_CA_TYPE).with_conf(
            serde_json::json!({"cert_file": cert_file, "key_file": key_file}),
        );
        ProvidedFiles { _dir: dir, backend, root_pem: cert.pem() }
    }

    #[tokio::test]
    async fn test_roots_come_from_file() {
        let files = provided_files();
        let manager = ProvidedCaManager::new();

        manager.validate_backend("default", &files.backend).unwrap();
        let roots = manager.get_root_certs("default", &files.backend).await.unwrap();
        assert_eq!(roots.len(), 1);

        let expected = parse_pem_certificates(files.root_pem.as_bytes(), "expected").unwrap();
        let actual = parse_pem_certificates(&roots[0], "actual").unwrap();
        assert_eq!(expected, actual);
    }

    #[tokio::test]
    async fn test_identity_cert_signed_by_provided_root() {
        let files = provided_files();
        let manager = ProvidedCaManager::new();

        let pair = manager
            .generate_identity_cert("default", &files.backend, &["backend".to_string()])
            .await
            .unwrap();
        let info = pair.validate("identity").unwrap();
        assert_eq!(info.uri_sans, vec!["spiffe://default/backend".to_string()]);
        assert!(info.issuer.contains("operator root"));
    }

    #[test]
    fn test_certificate_blocks_keep_every_root() {
        let first = format!("{}\nAAAA\n{}\n", PEM_CERT_BEGIN, PEM_CERT_END);
        let second = format!("{}\nBBBB\n{}\n", PEM_CERT_BEGIN, PEM_CERT_END);
        let file = format!("# operator roots\n{}comment\n{}", first, second);

        let blocks = certificate_blocks(&file);
        assert_eq!(blocks, vec![first.into_bytes(), second.into_bytes()]);
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let manager = ProvidedCaManager::new();
        let backend = CertificateAuthorityBackend::new("ca-provided", PROVIDED_CA_TYPE)
            .with_conf(serde_json::json!({"cert_file": "/nonexistent/ca.crt", "key_file": "/nonexistent/ca.key"}));

        assert!(manager.get_root_certs("default", &backend).await.is_err());
        assert!(manager.validate_backend("default", &backend).is_err());
    }

    #[test]
    fn test_conf_requires_files() {
        let backend = CertificateAuthorityBackend::new("ca-provided", PROVIDED_CA_TYPE);
        assert!(ProvidedCaConfig::from_backend("default", &backend).is_err());
    }
}
