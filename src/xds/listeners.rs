//! Filter chain configurers for proxy-facing listeners

use std::sync::Arc;

use envoy_types::pb::envoy::config::listener::v3::FilterChain;
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::common_tls_context;
use envoy_types::pb::google::protobuf::BoolValue;
use tracing::debug;

use crate::errors::Result;
use crate::xds::context::XdsContext;
use crate::xds::secrets::SecretsTracker;
use crate::xds::tls::{
    create_downstream_tls_context, downstream_transport_socket, sds_secret_config,
    static_downstream_tls_context, CP_VALIDATION_CTX,
};

/// Mutates one filter chain of a listener being generated.
pub trait FilterChainConfigurer: Send + Sync {
    fn configure(&self, filter_chain: &mut FilterChain) -> Result<()>;
}

/// Secures a proxy-facing listener that the control plane connects to.
///
/// The proxy serves its mesh identity when the mesh has mTLS enabled and the
/// control plane's admin key pair otherwise. Either way the client must
/// present a certificate trusted by `cp_validation_ctx`.
#[derive(Debug, Clone)]
pub struct ServerSideMtlsWithCpConfigurer {
    pub secrets_tracker: Arc<SecretsTracker>,
    pub ctx: XdsContext,
}

impl ServerSideMtlsWithCpConfigurer {
    pub fn new(secrets_tracker: Arc<SecretsTracker>, ctx: XdsContext) -> Self {
        Self { secrets_tracker, ctx }
    }
}

impl FilterChainConfigurer for ServerSideMtlsWithCpConfigurer {
    fn configure(&self, filter_chain: &mut FilterChain) -> Result<()> {
        let _span = crate::xds_span!(
            "configure_filter_chain",
            self.ctx.mesh.name().unwrap_or_default()
        )
        .entered();

        let mesh_context = match self.ctx.mesh.mtls_mesh() {
            Some(mesh) => {
                let ca = self.secrets_tracker.request_ca(&mesh.name);
                let identity = self.secrets_tracker.request_identity_cert();
                Some(create_downstream_tls_context(&ca, &identity)?)
            }
            None => None,
        };

        let mut tls_context = match mesh_context {
            Some(context) => context,
            None => {
                debug!("Mesh mTLS disabled, serving admin proxy key pair");
                static_downstream_tls_context(&self.ctx.control_plane.admin_proxy_key_pair)
            }
        };

        tls_context.require_client_certificate = Some(BoolValue { value: true });
        let common = tls_context.common_tls_context.get_or_insert_with(Default::default);
        common.validation_context_type =
            Some(common_tls_context::ValidationContextType::ValidationContextSdsSecretConfig(
                sds_secret_config(CP_VALIDATION_CTX),
            ));

        filter_chain.transport_socket = Some(downstream_transport_socket(&tls_context));
        Ok(())
    }
}
