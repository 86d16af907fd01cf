//! Envoy xDS configuration for mesh mTLS
//!
//! - TLS context builders for downstream and upstream transport sockets
//! - Per-session secret tracking and SDS secret generation
//! - Filter chain configurers for proxy-facing listeners

pub mod context;
pub mod listeners;
pub mod resources;
pub mod secret;
pub mod secrets;
pub mod tls;

pub use context::{ControlPlaneContext, MeshContext, XdsContext};
pub use listeners::{FilterChainConfigurer, ServerSideMtlsWithCpConfigurer};
pub use resources::BuiltResource;
pub use secret::{SecretsGenerator, SECRET_TYPE_URL};
pub use secrets::{CaRequest, IdentityCertRequest, SecretsTracker};
pub use tls::{
    create_downstream_tls_context, create_upstream_tls_context, downstream_tls_context_of,
    downstream_transport_socket, sds_secret_config, static_downstream_tls_context,
    upstream_transport_socket, CP_VALIDATION_CTX,
};
