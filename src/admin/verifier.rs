//! Peer certificate verification for the admin channel
//!
//! Proxy admin endpoints serve their mesh identity certificate, which carries a
//! SPIFFE URI instead of a hostname. Verification therefore checks the chain
//! against the mesh CA and then the URI, never the connection address.

use std::sync::{Arc, Mutex};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tracing::{debug, warn};
use webpki::EndEntityCert;

use crate::utils::certificates::uri_sans;
use crate::utils::CaPool;

/// Why a peer certificate was rejected.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("peer certificate is malformed: {reason}")]
    BadEncoding { reason: String },

    #[error("peer certificate chain does not verify against the mesh CA: {reason}")]
    Chain { reason: String },

    #[error("peer certificate does not carry identity {expected}")]
    IdentityMismatch { expected: String },
}

impl From<VerificationError> for rustls::Error {
    fn from(err: VerificationError) -> Self {
        match err {
            VerificationError::BadEncoding { .. } => {
                rustls::Error::InvalidCertificate(rustls::CertificateError::BadEncoding)
            }
            VerificationError::Chain { .. } => {
                rustls::Error::InvalidCertificate(rustls::CertificateError::UnknownIssuer)
            }
            VerificationError::IdentityMismatch { .. } => {
                rustls::Error::InvalidCertificate(rustls::CertificateError::NotValidForName)
            }
        }
    }
}

/// Verify a presented chain against an optional CA pool and expected identity.
///
/// Without a pool every certificate is accepted. With one, the chain must
/// verify (signature and validity only) and the leaf must carry `expected_uri`
/// as a URI SAN.
pub fn verify_peer_certificate(
    end_entity: &CertificateDer<'_>,
    intermediates: &[CertificateDer<'_>],
    pool: Option<&CaPool>,
    expected_uri: &str,
    now: UnixTime,
) -> Result<(), VerificationError> {
    let Some(pool) = pool else {
        return Ok(());
    };

    if let Err(e) = EndEntityCert::try_from(end_entity) {
        return Err(VerificationError::BadEncoding { reason: format!("{:?}", e) });
    }
    pool.verify_chain(end_entity, intermediates, now)
        .map_err(|e| VerificationError::Chain { reason: format!("{:?}", e) })?;

    let sans = uri_sans(end_entity)
        .map_err(|e| VerificationError::BadEncoding { reason: e.to_string() })?;
    if !sans.iter().any(|san| san == expected_uri) {
        return Err(VerificationError::IdentityMismatch { expected: expected_uri.to_string() });
    }

    Ok(())
}

/// Slot where the verifier leaves its last rejection for the caller.
pub type VerificationSlot = Arc<Mutex<Option<VerificationError>>>;

/// rustls verifier that checks a proxy's mesh identity instead of its hostname.
pub struct PeerIdentityVerifier {
    pool: Option<CaPool>,
    expected_identity: String,
    provider: Arc<CryptoProvider>,
    last_error: VerificationSlot,
}

impl std::fmt::Debug for PeerIdentityVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerIdentityVerifier")
            .field("expected_identity", &self.expected_identity)
            .field("trust_anchors_count", &self.pool.as_ref().map(CaPool::len).unwrap_or(0))
            .finish()
    }
}

impl PeerIdentityVerifier {
    pub fn new(
        pool: Option<CaPool>,
        expected_identity: impl Into<String>,
        provider: Arc<CryptoProvider>,
    ) -> Self {
        let expected_identity = expected_identity.into();
        if pool.is_none() {
            warn!(
                expected_identity = %expected_identity,
                "Mesh has no CA configured, admin peer certificates will not be verified"
            );
        }
        Self { pool, expected_identity, provider, last_error: Arc::new(Mutex::new(None)) }
    }

    pub fn expected_identity(&self) -> &str {
        &self.expected_identity
    }

    /// Shared handle to the most recent rejection.
    pub fn error_slot(&self) -> VerificationSlot {
        self.last_error.clone()
    }

    fn record(&self, err: &VerificationError) {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = Some(err.clone());
        }
    }
}

impl ServerCertVerifier for PeerIdentityVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match verify_peer_certificate(
            end_entity,
            intermediates,
            self.pool.as_ref(),
            &self.expected_identity,
            now,
        ) {
            Ok(()) => {
                debug!(expected_identity = %self.expected_identity, "Admin peer certificate accepted");
                Ok(ServerCertVerified::assertion())
            }
            Err(err) => {
                warn!(expected_identity = %self.expected_identity, error = %err, "Admin peer certificate rejected");
                self.record(&err);
                Err(err.into())
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
