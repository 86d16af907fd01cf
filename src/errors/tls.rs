use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// TLS-specific error variants surfaced while loading and building certificate material.
#[derive(Debug, Error)]
pub enum TlsError {
    /// A key pair was requested but the certificate path was not provided.
    #[error("certificate path is not configured")]
    MissingCertificatePath,

    /// A key pair was requested but the private key path was not provided.
    #[error("private key path is not configured")]
    MissingPrivateKeyPath,

    /// The certificate file could not be read.
    #[error("Failed to read certificate at {path}: {source}")]
    CertificateReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The private key file could not be read.
    #[error("Failed to read private key at {path}: {source}")]
    PrivateKeyReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No certificates were found in the supplied PEM.
    #[error("{origin} does not contain any certificates")]
    EmptyCertificateChain { origin: String },

    /// The certificate PEM contents were invalid or unreadable.
    #[error("{origin} is not a valid certificate PEM: {source}")]
    InvalidCertificatePem {
        origin: String,
        #[source]
        source: anyhow::Error,
    },

    /// The private key PEM contents were invalid or unsupported.
    #[error("{origin} does not contain a supported private key")]
    InvalidPrivateKey {
        origin: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// The supplied certificate and key do not match.
    #[error("Certificate and private key do not match")]
    CertificateKeyMismatch,

    /// The certificate is not yet valid.
    #[error("Certificate from {origin} is not valid before {not_before}")]
    CertificateNotYetValid { origin: String, not_before: DateTime<Utc> },

    /// The certificate is expired.
    #[error("Certificate from {origin} expired at {not_after}")]
    CertificateExpired { origin: String, not_after: DateTime<Utc> },

    /// Generic metadata extraction failure.
    #[error("Failed to extract certificate metadata from {origin}: {source}")]
    CertificateMetadata {
        origin: String,
        #[source]
        source: anyhow::Error,
    },

    /// A root certificate could not be used as a trust anchor.
    #[error("Root certificate #{index} cannot be used as a trust anchor: {source}")]
    InvalidTrustAnchor {
        index: usize,
        #[source]
        source: webpki::Error,
    },

    /// rustls rejected the assembled client configuration.
    #[error("Failed to build TLS client configuration: {0}")]
    ClientConfig(#[from] rustls::Error),

    /// Certificate generation or signing failed.
    #[error("Failed to generate certificate: {0}")]
    Generation(#[from] rcgen::Error),
}
