//! Mesh resource and its certificate authority configuration

use serde::{Deserialize, Serialize};

/// Resource type name of a mesh
pub const MESH_TYPE: &str = "Mesh";

/// A mesh: a trust domain whose workloads share CA roots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshResource {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtls: Option<MeshMtls>,
}

/// Mutual TLS section of a mesh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshMtls {
    /// Name of the enabled backend; empty means mTLS is off
    #[serde(default)]
    pub enabled_backend: String,
    #[serde(default)]
    pub backends: Vec<CertificateAuthorityBackend>,
}

/// Declaration of one CA backend of a mesh.
///
/// `backend_type` selects the CA manager in the registry; `conf` is opaque to
/// everything but that manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateAuthorityBackend {
    pub name: String,
    #[serde(rename = "type")]
    pub backend_type: String,
    #[serde(default)]
    pub conf: serde_json::Value,
}

impl CertificateAuthorityBackend {
    pub fn new(name: impl Into<String>, backend_type: impl Into<String>) -> Self {
        Self { name: name.into(), backend_type: backend_type.into(), conf: serde_json::Value::Null }
    }

    pub fn with_conf(mut self, conf: serde_json::Value) -> Self {
        self.conf = conf;
        self
    }
}

impl MeshResource {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), mtls: None }
    }

    /// Declare `backend` and make it the enabled one.
    pub fn with_enabled_backend(mut self, backend: CertificateAuthorityBackend) -> Self {
        let mtls = self.mtls.get_or_insert_with(MeshMtls::default);
        mtls.enabled_backend = backend.name.clone();
        mtls.backends.retain(|existing| existing.name != backend.name);
        mtls.backends.push(backend);
        self
    }

    /// The backend currently enabled, if mTLS is on and the name resolves.
    pub fn enabled_ca_backend(&self) -> Option<&CertificateAuthorityBackend> {
        let mtls = self.mtls.as_ref()?;
        if mtls.enabled_backend.is_empty() {
            return None;
        }
        mtls.backends.iter().find(|backend| backend.name == mtls.enabled_backend)
    }

    pub fn mtls_enabled(&self) -> bool {
        self.enabled_ca_backend().is_some()
    }

    pub fn ca_backend_by_name(&self, name: &str) -> Option<&CertificateAuthorityBackend> {
        self.mtls.as_ref()?.backends.iter().find(|backend| backend.name == name)
    }
}
