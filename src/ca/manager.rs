//! CA manager trait definition.
//!
//! A CA manager is the implementation behind one CA backend type. Meshes name
//! the type in their backend declarations and the registry routes calls here.

use crate::domain::CertificateAuthorityBackend;
use crate::errors::Result;
use crate::utils::KeyPair;
use async_trait::async_trait;

/// Backend type of the self-managed CA.
pub const BUILTIN_CA_TYPE: &str = "builtin";

/// Backend type of the CA whose root and key are supplied by the operator.
pub const PROVIDED_CA_TYPE: &str = "provided";

/// Root and identity material for one CA backend type.
///
/// Implementations must be thread-safe; the registry shares them across every
/// session and admin call.
///
/// # Root sets
///
/// [`CaManager::get_root_certs`] returns every root a peer should currently
/// trust, one PEM entry per root. During rotation that is more than one.
#[async_trait]
pub trait CaManager: Send + Sync + std::fmt::Debug {
    /// The backend type this manager serves.
    fn backend_type(&self) -> &str;

    /// Check a backend declaration without touching any CA state.
    fn validate_backend(&self, mesh: &str, backend: &CertificateAuthorityBackend) -> Result<()>;

    /// Create root material for the backend if it does not exist yet.
    async fn ensure(&self, mesh: &str, backend: &CertificateAuthorityBackend) -> Result<()>;

    /// Roots currently trusted for the backend, as PEM.
    async fn get_root_certs(
        &self,
        mesh: &str,
        backend: &CertificateAuthorityBackend,
    ) -> Result<Vec<Vec<u8>>>;

    /// Issue an identity certificate carrying `spiffe://<mesh>/<service>` for
    /// each service.
    async fn generate_identity_cert(
        &self,
        mesh: &str,
        backend: &CertificateAuthorityBackend,
        services: &[String],
    ) -> Result<KeyPair>;
}
