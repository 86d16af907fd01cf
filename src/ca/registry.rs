//! CA manager registry
//!
//! Maps backend type names to their managers. Built once at startup, then
//! shared behind an `Arc` and only read.

use super::manager::CaManager;
use crate::domain::{CertificateAuthorityBackend, MeshResource};
use crate::errors::{MeshTrustError, Result};
use crate::utils::{CallContext, KeyPair};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Builder collecting CA managers before the registry is frozen.
#[derive(Default)]
pub struct CaManagersBuilder {
    managers: HashMap<String, Arc<dyn CaManager>>,
}

impl CaManagersBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a manager under a backend type, replacing any earlier one.
    pub fn register(mut self, backend_type: impl Into<String>, manager: Arc<dyn CaManager>) -> Self {
        let backend_type = backend_type.into();
        info!(backend_type = %backend_type, "Registering CA manager");
        self.managers.insert(backend_type, manager);
        self
    }

    pub fn build(self) -> CaManagers {
        CaManagers { managers: self.managers }
    }
}

/// Immutable registry of CA managers keyed by backend type.
pub struct CaManagers {
    managers: HashMap<String, Arc<dyn CaManager>>,
}

impl std::fmt::Debug for CaManagers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaManagers").field("backend_types", &self.registered_types()).finish()
    }
}

impl CaManagers {
    pub fn builder() -> CaManagersBuilder {
        CaManagersBuilder::new()
    }

    /// Look up the manager for a backend type.
    pub fn get(&self, backend_type: &str) -> Result<Arc<dyn CaManager>> {
        self.managers
            .get(backend_type)
            .cloned()
            .ok_or_else(|| MeshTrustError::ca_manager_not_found(backend_type))
    }

    pub fn has_manager(&self, backend_type: &str) -> bool {
        self.managers.contains_key(backend_type)
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.managers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Validate every backend a mesh declares.
    pub fn validate_mesh(&self, mesh: &MeshResource) -> Result<()> {
        let Some(mtls) = mesh.mtls.as_ref() else {
            return Ok(());
        };
        if !mtls.enabled_backend.is_empty() && mesh.enabled_ca_backend().is_none() {
            return Err(MeshTrustError::config(format!(
                "enabled backend '{}' of mesh '{}' is not declared",
                mtls.enabled_backend, mesh.name
            )));
        }
        for backend in &mtls.backends {
            self.get(&backend.backend_type)?.validate_backend(&mesh.name, backend)?;
        }
        Ok(())
    }

    pub async fn ensure(
        &self,
        ctx: &CallContext,
        mesh: &str,
        backend: &CertificateAuthorityBackend,
    ) -> Result<()> {
        let manager = self.get(&backend.backend_type)?;
        ctx.run("ensure_ca", manager.ensure(mesh, backend)).await
    }

    pub async fn get_root_certs(
        &self,
        ctx: &CallContext,
        mesh: &str,
        backend: &CertificateAuthorityBackend,
    ) -> Result<Vec<Vec<u8>>> {
        let manager = self.get(&backend.backend_type)?;
        let roots = ctx.run("get_root_certs", manager.get_root_certs(mesh, backend)).await?;
        debug!(mesh = %mesh, backend = %backend.name, roots = roots.len(), "Resolved CA roots");
        Ok(roots)
    }

    pub async fn generate_identity_cert(
        &self,
        ctx: &CallContext,
        mesh: &str,
        backend: &CertificateAuthorityBackend,
        services: &[String],
    ) -> Result<KeyPair> {
        let manager = self.get(&backend.backend_type)?;
        ctx.run("generate_identity_cert", manager.generate_identity_cert(mesh, backend, services))
            .await
    }

    /// Roots of the mesh's enabled backend, or `None` when mTLS is off.
    pub async fn enabled_root_certs(
        &self,
        ctx: &CallContext,
        mesh: &MeshResource,
    ) -> Result<Option<Vec<Vec<u8>>>> {
        match mesh.enabled_ca_backend() {
            Some(backend) => self.get_root_certs(ctx, &mesh.name, backend).await.map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct StaticManager {
        roots: Vec<Vec<u8>>,
    }

    #[async_trait]
    impl CaManager for StaticManager {
        fn backend_type(&self) -> &str {
            "static"
        }

        fn validate_backend(&self, _mesh: &str, backend: &CertificateAuthorityBackend) -> Result<()> {
            if backend.conf.is_null() {
                Ok(())
            } else {
                Err(MeshTrustError::config("static backend takes no conf"))
            }
        }

        async fn ensure(&self, _mesh: &str, _backend: &CertificateAuthorityBackend) -> Result<()> {
            Ok(())
        }

        async fn get_root_certs(
            &self,
            _mesh: &str,
            _backend: &CertificateAuthorityBackend,
        ) -> Result<Vec<Vec<u8>>> {
            Ok(self.roots.clone())
        }

        async fn generate_identity_cert(
            &self,
            mesh: &str,
            _backend: &CertificateAuthorityBackend,
            _services: &[String],
        ) -> Result<KeyPair> {
            Err(MeshTrustError::ca_backend("static", mesh, "cannot sign"))
        }
    }

    fn registry() -> CaManagers {
        CaManagers::builder()
            .register("static", Arc::new(StaticManager { roots: vec![b"root-1".to_vec()] }))
            .build()
    }

    #[test]
    fn test_unknown_type_is_configuration_error() {
        let err = registry().get("vault").unwrap_err();
        assert!(matches!(err, MeshTrustError::CaManagerNotFound { ref backend_type } if backend_type == "vault"));
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_enabled_root_certs() {
        let registry = registry();
        let ctx = CallContext::background();

        let plain = MeshResource::new("default");
        assert!(registry.enabled_root_certs(&ctx, &plain).await.unwrap().is_none());

        let mesh = MeshResource::new("default")
            .with_enabled_backend(CertificateAuthorityBackend::new("ca-1", "static"));
        let roots = registry.enabled_root_certs(&ctx, &mesh).await.unwrap();
        assert_eq!(roots, Some(vec![b"root-1".to_vec()]));
    }

    #[tokio::test]
    async fn test_enabled_root_certs_unknown_backend_type() {
        let mesh = MeshResource::new("default")
            .with_enabled_backend(CertificateAuthorityBackend::new("ca-1", "vault"));

        let err = registry().enabled_root_certs(&CallContext::background(), &mesh).await.unwrap_err();
        assert!(matches!(err, MeshTrustError::CaManagerNotFound { .. }));
    }

    #[test]
    fn test_validate_mesh() {
        let registry = registry();
        let ok = MeshResource::new("default")
            .with_enabled_backend(CertificateAuthorityBackend::new("ca-1", "static"));
        assert!(registry.validate_mesh(&ok).is_ok());

        let bad_conf = MeshResource::new("default").with_enabled_backend(
            CertificateAuthorityBackend::new("ca-1", "static")
                .with_conf(serde_json::json!({"unexpected": true})),
        );
        assert!(registry.validate_mesh(&bad_conf).is_err());
    }

    #[test]
    fn test_debug_lists_types() {
        let debug = format!("{:?}", registry());
        assert!(debug.contains("static"));
    }
}
