use std::{fmt, fs, path::Path};

use anyhow::anyhow;
use chrono::{DateTime, TimeZone, Utc};
use rustls::pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer, TrustAnchor, UnixTime};
use webpki::{EndEntityCert, KeyUsage};
use x509_parser::{
    certificate::X509Certificate, extensions::GeneralName, prelude::FromDer, time::ASN1Time,
};

use crate::errors::TlsError;

/// Metadata extracted from a leaf certificate for logging and validation.
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub uri_sans: Vec<String>,
}

/// PEM encoded certificate chain and private key.
///
/// Used both for workload identity certificates issued by a CA backend and for
/// the control plane's own admin identity.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("cert_pem_len", &self.cert_pem.len())
            .field("key_pem", &"[redacted]")
            .finish()
    }
}

impl KeyPair {
    pub fn new(cert_pem: impl Into<Vec<u8>>, key_pem: impl Into<Vec<u8>>) -> Self {
        Self { cert_pem: cert_pem.into(), key_pem: key_pem.into() }
    }

    /// Load and validate a key pair from disk.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, TlsError> {
        let cert_pem = fs::read(cert_path).map_err(|e| TlsError::CertificateReadError {
            path: cert_path.to_path_buf(),
            source: e,
        })?;
        let key_pem = fs::read(key_path).map_err(|e| TlsError::PrivateKeyReadError {
            path: key_path.to_path_buf(),
            source: e,
        })?;

        let key_pair = Self { cert_pem, key_pem };
        key_pair.validate(&cert_path.display().to_string())?;
        Ok(key_pair)
    }

    /// Parse the chain, check the leaf's validity window and that the private key
    /// belongs to the leaf.
    pub fn validate(&self, origin: &str) -> Result<CertificateInfo, TlsError> {
        let chain = self.certificate_chain(origin)?;
        let leaf = &chain[0];
        let info = certificate_info(leaf, origin)?;
        validate_certificate_dates(&info, origin)?;

        let key_pem = std::str::from_utf8(&self.key_pem).map_err(|e| {
            TlsError::InvalidPrivateKey { origin: origin.to_string(), source: Some(anyhow!(e)) }
        })?;
        let key = rcgen::KeyPair::from_pem(key_pem).map_err(|e| TlsError::InvalidPrivateKey {
            origin: origin.to_string(),
            source: Some(anyhow!(e)),
        })?;

        let (_, parsed) = X509Certificate::from_der(leaf.as_ref()).map_err(|e| {
            TlsError::CertificateMetadata { origin: origin.to_string(), source: anyhow!(e) }
        })?;
        if parsed.public_key().subject_public_key.data.as_ref() != key.public_key_raw() {
            return Err(TlsError::CertificateKeyMismatch);
        }

        Ok(info)
    }

    /// Certificates of the chain in DER form, leaf first.
    pub fn certificate_chain(&self, origin: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
        let chain = parse_pem_certificates(&self.cert_pem, origin)?;
        if chain.is_empty() {
            return Err(TlsError::EmptyCertificateChain { origin: origin.to_string() });
        }
        Ok(chain)
    }

    pub fn private_key(&self, origin: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
        PrivateKeyDer::from_pem_slice(&self.key_pem).map_err(|err| TlsError::InvalidPrivateKey {
            origin: origin.to_string(),
            source: Some(anyhow!(err)),
        })
    }

    pub fn cert_pem_str(&self) -> String {
        String::from_utf8_lossy(&self.cert_pem).into_owned()
    }

    pub fn key_pem_str(&self) -> String {
        String::from_utf8_lossy(&self.key_pem).into_owned()
    }
}

/// Trust roots of a mesh, ready for chain verification.
#[derive(Debug, Clone)]
pub struct CaPool {
    roots: Vec<CertificateDer<'static>>,
    anchors: Vec<TrustAnchor<'static>>,
}

impl CaPool {
    /// Build a pool from a root certificate set.
    ///
    /// An empty set means "no CA configured" and yields `None`, never a pool
    /// that rejects everything.
    pub fn from_root_certs(root_certs: &[Vec<u8>]) -> Result<Option<Self>, TlsError> {
        if root_certs.iter().all(|pem| pem.iter().all(u8::is_ascii_whitespace)) {
            return Ok(None);
        }

        let mut roots = Vec::new();
        for (index, pem) in root_certs.iter().enumerate() {
            let parsed = parse_pem_certificates(pem, &format!("root certificate #{}", index))?;
            if parsed.is_empty() {
                return Err(TlsError::EmptyCertificateChain {
                    origin: format!("root certificate #{}", index),
                });
            }
            roots.extend(parsed);
        }

        let anchors = roots
            .iter()
            .enumerate()
            .map(|(index, der)| {
                webpki::anchor_from_trusted_cert(der)
                    .map(|anchor| anchor.to_owned())
                    .map_err(|source| TlsError::InvalidTrustAnchor { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Self { roots, anchors }))
    }

    pub fn roots(&self) -> &[CertificateDer<'static>] {
        &self.roots
    }

    pub fn trust_anchors(&self) -> &[TrustAnchor<'static>] {
        &self.anchors
    }

    /// Check that `end_entity` chains to one of the roots.
    ///
    /// Only signatures and validity are checked. webpki always checks an EKU,
    /// so either side of mutual TLS is accepted.
    pub fn verify_chain(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<(), webpki::Error> {
        let leaf = EndEntityCert::try_from(end_entity)?;
        let verify = |usage: KeyUsage| {
            leaf.verify_for_usage(
                webpki::ALL_VERIFICATION_ALGS,
                &self.anchors,
                intermediates,
                now,
                usage,
                None,
                None,
            )
            .map(|_| ())
        };
        verify(KeyUsage::server_auth()).or_else(|_| verify(KeyUsage::client_auth()))
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// Parse every certificate in a PEM blob.
pub fn parse_pem_certificates(
    pem: &[u8],
    origin: &str,
) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    CertificateDer::pem_slice_iter(pem)
        .map(|result| {
            result.map_err(|err| TlsError::InvalidCertificatePem {
                origin: origin.to_string(),
                source: anyhow!(err),
            })
        })
        .collect()
}

/// Extract subject, issuer, validity and URI SANs from a DER certificate.
pub fn certificate_info(cert: &CertificateDer<'_>, origin: &str) -> Result<CertificateInfo, TlsError> {
    let (_, parsed) = X509Certificate::from_der(cert.as_ref()).map_err(|e| {
        TlsError::CertificateMetadata { origin: origin.to_string(), source: anyhow!(e) }
    })?;

    let validity = parsed.validity();

    Ok(CertificateInfo {
        subject: parsed.subject().to_string(),
        issuer: parsed.issuer().to_string(),
        not_before: asn1_to_chrono(validity.not_before, origin)?,
        not_after: asn1_to_chrono(validity.not_after, origin)?,
        uri_sans: uri_sans_of(&parsed),
    })
}

/// URI subject alternative names of a DER certificate.
pub fn uri_sans(cert: &CertificateDer<'_>) -> Result<Vec<String>, TlsError> {
    let (_, parsed) = X509Certificate::from_der(cert.as_ref()).map_err(|e| {
        TlsError::CertificateMetadata { origin: "peer certificate".to_string(), source: anyhow!(e) }
    })?;
    Ok(uri_sans_of(&parsed))
}

fn uri_sans_of(cert: &X509Certificate<'_>) -> Vec<String> {
    match cert.subject_alternative_name() {
        Ok(Some(san)) => san
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::URI(uri) => Some((*uri).to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn asn1_to_chrono(time: ASN1Time, origin: &str) -> Result<DateTime<Utc>, TlsError> {
    Utc.timestamp_opt(time.timestamp(), 0).single().ok_or_else(|| TlsError::CertificateMetadata {
        origin: origin.to_string(),
        source: anyhow!("failed to convert certificate time"),
    })
}

fn validate_certificate_dates(info: &CertificateInfo, origin: &str) -> Result<(), TlsError> {
    let now = Utc::now();
    if info.not_before > now {
        return Err(TlsError::CertificateNotYetValid {
            origin: origin.to_string(),
            not_before: info.not_before,
        });
    }
    if info.not_after <= now {
        return Err(TlsError::CertificateExpired {
            origin: origin.to_string(),
            not_after: info.not_after,
        });
    }
    Ok(())
}
