use std::sync::Arc;

use envoy_types::pb::envoy::config::core::v3::data_source::Specifier;
use envoy_types::pb::envoy::config::listener::v3::FilterChain;
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    common_tls_context, secret, Secret,
};
use mesh_trust::admin::verify_peer_certificate;
use mesh_trust::ca::{BuiltinCaManager, CaManagers, ProvidedCaManager};
use mesh_trust::domain::{CertificateAuthorityBackend, MeshResource};
use mesh_trust::storage::MemoryResourceManager;
use mesh_trust::utils::certificates::parse_pem_certificates;
use mesh_trust::utils::{CaPool, CallContext, KeyPair};
use mesh_trust::xds::{
    downstream_tls_context_of, BuiltResource, ControlPlaneContext, FilterChainConfigurer,
    MeshContext, SecretsGenerator, SecretsTracker, ServerSideMtlsWithCpConfigurer, XdsContext,
    CP_VALIDATION_CTX,
};
use prost::Message;
use rustls::pki_types::UnixTime;
use serde_json::json;

use super::support::TestCertificateAuthority;

fn decode(resource: &BuiltResource) -> Secret {
    Secret::decode(&*resource.resource.value).unwrap()
}

fn trusted_ca(resource: &BuiltResource) -> String {
    match decode(resource).r#type {
        Some(secret::Type::ValidationContext(context)) => {
            match context.trusted_ca.and_then(|source| source.specifier) {
                Some(Specifier::InlineString(pem)) => pem,
                other => panic!("unexpected trusted CA source {:?}", other),
            }
        }
        other => panic!("expected validation context, got {:?}", other),
    }
}

fn identity(resource: &BuiltResource) -> KeyPair {
    match decode(resource).r#type {
        Some(secret::Type::TlsCertificate(cert)) => {
            let inline = |source: Option<envoy_types::pb::envoy::config::core::v3::DataSource>| {
                match source.and_then(|s| s.specifier) {
                    Some(Specifier::InlineString(pem)) => pem,
                    other => panic!("unexpected data source {:?}", other),
                }
            };
            KeyPair::new(inline(cert.certificate_chain), inline(cert.private_key))
        }
        other => panic!("expected TLS certificate, got {:?}", other),
    }
}

fn assert_identity_verifies(identity: &KeyPair, roots_pem: &str, expected_uri: &str) {
    let pool = CaPool::from_root_certs(&[roots_pem.as_bytes().to_vec()]).unwrap().unwrap();
    let leaf = parse_pem_certificates(&identity.cert_pem, "identity").unwrap().remove(0);
    verify_peer_certificate(&leaf, &[], Some(&pool), expected_uri, UnixTime::now()).unwrap();
}

#[tokio::test]
async fn provided_ca_secrets_verify_against_bundle() {
    let ca = TestCertificateAuthority::new("provided-root").unwrap();
    let files = ca.write_files().unwrap();

    let store = Arc::new(MemoryResourceManager::new());
    store
        .upsert_mesh(MeshResource::new("payments").with_enabled_backend(
            CertificateAuthorityBackend::new("ca-provided", "provided").with_conf(json!({
                "cert_file": files.cert_path,
                "key_file": files.key_path,
            })),
        ))
        .await;
    let ca_managers = Arc::new(
        CaManagers::builder().register("provided", Arc::new(ProvidedCaManager::new())).build(),
    );
    let generator = SecretsGenerator::new(ca_managers, store);

    let tracker = SecretsTracker::new("payments");
    tracker.request_ca("payments");
    tracker.request_identity_cert();

    let services = vec!["ledger".to_string()];
    let resources =
        generator.generate(&CallContext::background(), &tracker, &services).await.unwrap();

    assert_eq!(resources.len(), 2);
    let bundle = trusted_ca(&resources[0]);
    assert_eq!(
        parse_pem_certificates(bundle.as_bytes(), "bundle").unwrap(),
        vec![ca.root_der()]
    );
    assert_identity_verifies(&identity(&resources[1]), &bundle, "spiffe://payments/ledger");
}

#[tokio::test]
async fn builtin_rotation_publishes_both_roots() {
    let builtin = Arc::new(BuiltinCaManager::new());
    let ca_managers =
        Arc::new(CaManagers::builder().register("builtin", builtin.clone()).build());
    let backend = CertificateAuthorityBackend::new("ca-1", "builtin");

    let store = Arc::new(MemoryResourceManager::new());
    store.upsert_mesh(MeshResource::new("default").with_enabled_backend(backend.clone())).await;
    let generator = SecretsGenerator::new(ca_managers, store);
    let ctx = CallContext::background();
    let services = vec!["web".to_string()];

    let before = SecretsTracker::new("default");
    before.request_ca("default");
    before.request_identity_cert();
    let first = generator.generate(&ctx, &before, &services).await.unwrap();
    assert_eq!(trusted_ca(&first[0]).matches("BEGIN CERTIFICATE").count(), 1);

    assert_eq!(builtin.rotate("default", &backend).await.unwrap(), 2);

    let after = SecretsTracker::new("default");
    after.request_ca("default");
    after.request_identity_cert();
    let second = generator.generate(&ctx, &after, &services).await.unwrap();
    let bundle = trusted_ca(&second[0]);

    assert_eq!(bundle.matches("BEGIN CERTIFICATE").count(), 2);
    // Identities from either root verify against the rotated bundle.
    assert_identity_verifies(&identity(&first[1]), &bundle, "spiffe://default/web");
    assert_identity_verifies(&identity(&second[1]), &bundle, "spiffe://default/web");
}

#[tokio::test]
async fn configured_listener_references_generated_secrets() {
    let control_plane_ca = TestCertificateAuthority::new("control-plane").unwrap();
    let admin_pair = control_plane_ca.issue_server("admin-proxy").unwrap();

    let mesh = MeshResource::new("default")
        .with_enabled_backend(CertificateAuthorityBackend::new("ca-1", "builtin"));
    let store = Arc::new(MemoryResourceManager::new());
    store.upsert_mesh(mesh.clone()).await;
    let generator = SecretsGenerator::new(Arc::new(mesh_trust::ca::default_ca_managers()), store)
        .with_control_plane_ca(control_plane_ca.root_pem());

    let tracker = Arc::new(SecretsTracker::new("default"));
    let ctx = XdsContext::new(
        Arc::new(ControlPlaneContext { admin_proxy_key_pair: admin_pair }),
        MeshContext::new(mesh),
    );
    let mut chain = FilterChain::default();
    ServerSideMtlsWithCpConfigurer::new(tracker.clone(), ctx).configure(&mut chain).unwrap();

    let resources = generator
        .generate(&CallContext::background(), &tracker, &["web".to_string()])
        .await
        .unwrap();
    let names: Vec<&str> = resources.iter().map(|r| r.name.as_str()).collect();

    let tls = downstream_tls_context_of(chain.transport_socket.as_ref().unwrap()).unwrap();
    let common = tls.common_tls_context.unwrap();
    assert!(names.contains(&common.tls_certificate_sds_secret_configs[0].name.as_str()));
    match common.validation_context_type {
        Some(common_tls_context::ValidationContextType::ValidationContextSdsSecretConfig(sds)) => {
            assert!(names.contains(&sds.name.as_str()));
            assert_eq!(sds.name, CP_VALIDATION_CTX);
        }
        other => panic!("unexpected validation context {:?}", other),
    }
    assert!(names.contains(&"mesh_ca:secret:default"));
}
