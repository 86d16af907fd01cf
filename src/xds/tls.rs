//! TLS context construction for proxy-facing listeners and mesh clusters
//!
//! Pure builders for Envoy `DownstreamTlsContext` / `UpstreamTlsContext`.
//! Mesh certificates are never inlined: contexts reference SDS secrets served
//! over ADS, named after the mesh they belong to.

use envoy_types::pb::envoy::config::core::v3::transport_socket::ConfigType as TransportSocketConfigType;
use envoy_types::pb::envoy::config::core::v3::{
    config_source::ConfigSourceSpecifier, data_source::Specifier, AggregatedConfigSource,
    ApiVersion, ConfigSource, DataSource, TransportSocket,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    common_tls_context::{self, CombinedCertificateValidationContext},
    CertificateValidationContext, CommonTlsContext, DownstreamTlsContext, SdsSecretConfig,
    TlsCertificate, UpstreamTlsContext,
};
use envoy_types::pb::envoy::r#type::matcher::v3::{string_matcher::MatchPattern, StringMatcher};
use envoy_types::pb::google::protobuf::{Any, BoolValue};
use prost::Message;

use crate::errors::{MeshTrustError, Result};
use crate::utils::KeyPair;
use crate::xds::secrets::{CaRequest, IdentityCertRequest};

/// SDS name of the validation context trusting the control plane's CA
pub const CP_VALIDATION_CTX: &str = "cp_validation_ctx";

/// Prefix of the SDS name of a mesh's CA bundle
pub const MESH_CA_SECRET_PREFIX: &str = "mesh_ca:secret:";

/// Prefix of the SDS name of a proxy's identity certificate
pub const IDENTITY_CERT_SECRET_PREFIX: &str = "identity_cert:secret:";

/// Name of Envoy's TLS transport socket
pub const TRANSPORT_SOCKET_TLS: &str = "envoy.transport_sockets.tls";

pub const DOWNSTREAM_TLS_CONTEXT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.DownstreamTlsContext";

pub const UPSTREAM_TLS_CONTEXT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.UpstreamTlsContext";

/// Identity URI of a service in a mesh.
pub fn service_spiffe_id(mesh: &str, service: &str) -> String {
    format!("spiffe://{}/{}", mesh, service)
}

/// Prefix shared by the identity URIs of every service in a mesh.
pub fn mesh_spiffe_id_prefix(mesh: &str) -> String {
    format!("spiffe://{}/", mesh)
}

/// Reference a secret delivered over the aggregated discovery stream.
pub fn sds_secret_config(name: &str) -> SdsSecretConfig {
    SdsSecretConfig {
        name: name.to_string(),
        sds_config: Some(ConfigSource {
            config_source_specifier: Some(ConfigSourceSpecifier::Ads(
                AggregatedConfigSource::default(),
            )),
            resource_api_version: ApiVersion::V3 as i32,
            ..Default::default()
        }),
    }
}

/// Server side mTLS for a listener of a mesh with mTLS enabled.
///
/// Trusts the mesh CA, presents the proxy identity and only admits clients
/// whose identity URI belongs to the mesh.
pub fn create_downstream_tls_context(
    ca: &CaRequest,
    identity: &IdentityCertRequest,
) -> Result<DownstreamTlsContext> {
    if ca.mesh_name().is_empty() {
        return Err(MeshTrustError::config("downstream TLS context requires a mesh name"));
    }

    let common = CommonTlsContext {
        tls_certificate_sds_secret_configs: vec![sds_secret_config(&identity.name())],
        validation_context_type: Some(
            common_tls_context::ValidationContextType::CombinedValidationContext(
                CombinedCertificateValidationContext {
                    default_validation_context: Some(san_validation_context(
                        MatchPattern::Prefix(mesh_spiffe_id_prefix(ca.mesh_name())),
                    )),
                    validation_context_sds_secret_config: Some(sds_secret_config(&ca.name())),
                    ..Default::default()
                },
            ),
        ),
        ..Default::default()
    };

    Ok(DownstreamTlsContext {
        common_tls_context: Some(common),
        require_client_certificate: Some(BoolValue { value: true }),
        ..Default::default()
    })
}

/// Server side TLS presenting a fixed key pair inline, used when a mesh has no
/// CA to issue an identity from.
pub fn static_downstream_tls_context(key_pair: &KeyPair) -> DownstreamTlsContext {
    let common = CommonTlsContext {
        tls_certificates: vec![TlsCertificate {
            certificate_chain: Some(inline_string(key_pair.cert_pem_str())),
            private_key: Some(inline_string(key_pair.key_pem_str())),
            ..Default::default()
        }],
        ..Default::default()
    };

    DownstreamTlsContext { common_tls_context: Some(common), ..Default::default() }
}

/// Client side mTLS towards another service of the mesh.
///
/// The upstream must present exactly the identity URI of `upstream_service`.
pub fn create_upstream_tls_context(
    identity: &IdentityCertRequest,
    ca: &CaRequest,
    upstream_service: &str,
    sni: &str,
) -> Result<UpstreamTlsContext> {
    if upstream_service.is_empty() {
        return Err(MeshTrustError::config("upstream TLS context requires a service name"));
    }

    let common = CommonTlsContext {
        tls_certificate_sds_secret_configs: vec![sds_secret_config(&identity.name())],
        validation_context_type: Some(
            common_tls_context::ValidationContextType::CombinedValidationContext(
                CombinedCertificateValidationContext {
                    default_validation_context: Some(san_validation_context(MatchPattern::Exact(
                        service_spiffe_id(ca.mesh_name(), upstream_service),
                    ))),
                    validation_context_sds_secret_config: Some(sds_secret_config(&ca.name())),
                    ..Default::default()
                },
            ),
        ),
        ..Default::default()
    };

    Ok(UpstreamTlsContext {
        common_tls_context: Some(common),
        sni: sni.to_string(),
        ..Default::default()
    })
}

/// Wrap a downstream context into the TLS transport socket.
pub fn downstream_transport_socket(context: &DownstreamTlsContext) -> TransportSocket {
    TransportSocket {
        name: TRANSPORT_SOCKET_TLS.to_string(),
        config_type: Some(TransportSocketConfigType::TypedConfig(Any {
            type_url: DOWNSTREAM_TLS_CONTEXT_TYPE_URL.to_string(),
            value: context.encode_to_vec(),
        })),
    }
}

/// Wrap an upstream context into the TLS transport socket.
pub fn upstream_transport_socket(context: &UpstreamTlsContext) -> TransportSocket {
    TransportSocket {
        name: TRANSPORT_SOCKET_TLS.to_string(),
        config_type: Some(TransportSocketConfigType::TypedConfig(Any {
            type_url: UPSTREAM_TLS_CONTEXT_TYPE_URL.to_string(),
            value: context.encode_to_vec(),
        })),
    }
}

/// Decode the downstream context carried by a TLS transport socket.
pub fn downstream_tls_context_of(socket: &TransportSocket) -> Result<DownstreamTlsContext> {
    match &socket.config_type {
        Some(TransportSocketConfigType::TypedConfig(any))
            if any.type_url == DOWNSTREAM_TLS_CONTEXT_TYPE_URL =>
        {
            DownstreamTlsContext::decode(&*any.value).map_err(|source| MeshTrustError::Encode {
                source,
                context: format!("decode transport socket '{}'", socket.name),
            })
        }
        _ => Err(MeshTrustError::config(format!(
            "transport socket '{}' does not carry a DownstreamTlsContext",
            socket.name
        ))),
    }
}

#[allow(deprecated)]
fn san_validation_context(pattern: MatchPattern) -> CertificateValidationContext {
    CertificateValidationContext {
        match_subject_alt_names: vec![StringMatcher {
            match_pattern: Some(pattern),
            ignore_case: false,
        }],
        ..Default::default()
    }
}

fn inline_string(value: String) -> DataSource {
    DataSource { specifier: Some(Specifier::InlineString(value)), ..Default::default() }
}
