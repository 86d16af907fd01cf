//! Secret resource builder for SDS (Secret Discovery Service)
//!
//! Turns the requests recorded by a session's [`SecretsTracker`] into Envoy
//! `Secret` resources: one validation context per tracked mesh CA and the
//! proxy's identity certificate.

use std::sync::Arc;

use envoy_types::pb::envoy::config::core::v3::{data_source::Specifier, DataSource};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    secret, CertificateValidationContext, Secret, TlsCertificate,
};
use envoy_types::pb::google::protobuf::Any;
use prost::Message;
use tracing::{debug, Instrument};

use crate::ca::CaManagers;
use crate::errors::{MeshTrustError, Result};
use crate::storage::ResourceManager;
use crate::utils::{CaPool, CallContext, KeyPair};
use crate::xds::resources::BuiltResource;
use crate::xds::secrets::SecretsTracker;
use crate::xds::tls::CP_VALIDATION_CTX;

/// Type URL for Envoy Secret resources
pub const SECRET_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret";

/// Builds the SDS resources a session asked for.
pub struct SecretsGenerator {
    ca_managers: Arc<CaManagers>,
    resource_manager: Arc<dyn ResourceManager>,
    control_plane_ca: Option<String>,
}

impl std::fmt::Debug for SecretsGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsGenerator")
            .field("ca_managers", &self.ca_managers)
            .field("control_plane_ca", &self.control_plane_ca.is_some())
            .finish()
    }
}

impl SecretsGenerator {
    pub fn new(ca_managers: Arc<CaManagers>, resource_manager: Arc<dyn ResourceManager>) -> Self {
        Self { ca_managers, resource_manager, control_plane_ca: None }
    }

    /// Also serve `cp_validation_ctx`, trusting the given control plane CA PEM.
    pub fn with_control_plane_ca(mut self, ca_pem: impl Into<String>) -> Self {
        self.control_plane_ca = Some(ca_pem.into());
        self
    }

    /// Generate every secret recorded by `tracker`.
    ///
    /// `services` are the services the proxy's identity certificate is issued
    /// for. The session's identity is reused until it nears expiry, its
    /// services change, or the mesh stops trusting its issuer.
    pub async fn generate(
        &self,
        ctx: &CallContext,
        tracker: &SecretsTracker,
        services: &[String],
    ) -> Result<Vec<BuiltResource>> {
        let span = crate::xds_span!("generate_secrets", tracker.own_mesh());
        async {
            let mut resources = Vec::new();

            if let Some(ca_pem) = &self.control_plane_ca {
                resources.push(to_resource(validation_context_secret(
                    CP_VALIDATION_CTX,
                    ca_pem.clone(),
                )));
            }

            for mesh_name in tracker.used_cas() {
                let mesh = self.resource_manager.get_mesh(ctx, &mesh_name).await?;
                let Some(roots) = self.ca_managers.enabled_root_certs(ctx, &mesh).await? else {
                    debug!(mesh = %mesh_name, "Mesh CA requested but mTLS is disabled, skipping");
                    continue;
                };
                let request = tracker.request_ca(&mesh_name);
                resources.push(to_resource(validation_context_secret(
                    &request.name(),
                    concat_roots(&roots),
                )));
            }

            if tracker.used_identity() {
                let mesh = self.resource_manager.get_mesh(ctx, tracker.own_mesh()).await?;
                let backend = mesh.enabled_ca_backend().ok_or_else(|| {
                    MeshTrustError::config(format!(
                        "identity requested but mesh '{}' has no enabled CA backend",
                        mesh.name
                    ))
                })?;

                let roots =
                    self.ca_managers.get_root_certs(ctx, &mesh.name, backend).await?;
                let pool = CaPool::from_root_certs(&roots)?;
                let identity = tracker
                    .identity_material(services, pool.as_ref(), || {
                        self.ca_managers.generate_identity_cert(ctx, &mesh.name, backend, services)
                    })
                    .await?;
                let request = tracker.request_identity_cert();
                resources.push(to_resource(tls_certificate_secret(&request.name(), &identity)));
            }

            debug!(secret_count = resources.len(), "Built secret resources");
            Ok(resources)
        }
        .instrument(span)
        .await
    }
}

fn concat_roots(roots: &[Vec<u8>]) -> String {
    let mut bundle = String::new();
    for root in roots {
        let pem = String::from_utf8_lossy(root);
        bundle.push_str(pem.trim_end());
        bundle.push('\n');
    }
    bundle
}

fn validation_context_secret(name: &str, trusted_ca: String) -> Secret {
    Secret {
        name: name.to_string(),
        r#type: Some(secret::Type::ValidationContext(CertificateValidationContext {
            trusted_ca: Some(DataSource {
                specifier: Some(Specifier::InlineString(trusted_ca)),
                ..Default::default()
            }),
            ..Default::default()
        })),
    }
}

fn tls_certificate_secret(name: &str, key_pair: &KeyPair) -> Secret {
    Secret {
        name: name.to_string(),
        r#type: Some(secret::Type::TlsCertificate(TlsCertificate {
            certificate_chain: Some(DataSource {
                specifier: Some(Specifier::InlineString(key_pair.cert_pem_str())),
                ..Default::default()
            }),
            private_key: Some(DataSource {
                specifier: Some(Specifier::InlineString(key_pair.key_pem_str())),
                ..Default::default()
            }),
            ..Default::default()
        })),
    }
}

fn to_resource(secret: Secret) -> BuiltResource {
    BuiltResource {
        name: secret.name.clone(),
        resource: Any { type_url: SECRET_TYPE_URL.to_string(), value: secret.encode_to_vec() },
    }
}
