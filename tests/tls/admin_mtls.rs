use std::sync::Arc;

use mesh_trust::admin::{AdminClient, EnvoyAdminClient};
use mesh_trust::ca::{default_ca_managers, CaManagers};
use mesh_trust::config::AdminClientConfig;
use mesh_trust::domain::{
    CertificateAuthorityBackend, DataplaneResource, MeshResource, ZoneIngressResource,
};
use mesh_trust::errors::MeshTrustError;
use mesh_trust::storage::MemoryResourceManager;
use mesh_trust::utils::{CallContext, KeyPair};

use super::support::{spawn_tls_admin, TestCertificateAuthority, TestCertificateFiles};

struct Fixture {
    ca_managers: Arc<CaManagers>,
    store: Arc<MemoryResourceManager>,
    control_plane_ca: TestCertificateAuthority,
    client_key_pair: KeyPair,
}

impl Fixture {
    async fn new() -> Self {
        let store = Arc::new(MemoryResourceManager::new());
        store
            .upsert_mesh(
                MeshResource::new("default")
                    .with_enabled_backend(CertificateAuthorityBackend::new("ca-1", "builtin")),
            )
            .await;
        store.upsert_mesh(MeshResource::new("plain")).await;

        let control_plane_ca = TestCertificateAuthority::new("control-plane").unwrap();
        let client_key_pair = control_plane_ca.issue_client("control-plane").unwrap();

        Self {
            ca_managers: Arc::new(default_ca_managers()),
            store,
            control_plane_ca,
            client_key_pair,
        }
    }

    /// Client that speaks TLS to loopback admin endpoints too.
    fn client(&self) -> AdminClient {
        let config = AdminClientConfig { plaintext_loopback: false, ..Default::default() };
        AdminClient::new(self.ca_managers.clone(), self.store.clone(), config)
            .with_client_key_pair(self.client_key_pair.clone())
    }

    async fn mesh_identity(&self, service: &str) -> KeyPair {
        let mesh = MeshResource::new("default")
            .with_enabled_backend(CertificateAuthorityBackend::new("ca-1", "builtin"));
        let backend = mesh.enabled_ca_backend().unwrap();
        self.ca_managers
            .generate_identity_cert(
                &CallContext::background(),
                "default",
                backend,
                &[service.to_string()],
            )
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn matching_identity_is_accepted() {
    let fixture = Fixture::new().await;
    let identity = fixture.mesh_identity("web").await;
    let addr = spawn_tls_admin(&identity, &fixture.control_plane_ca, "server.live: 1").await.unwrap();

    let proxy = DataplaneResource::new("default", "web-1", "127.0.0.1")
        .with_service("web")
        .with_admin_port(addr.port() as u32);

    let stats = fixture.client().stats(&CallContext::background(), &proxy).await.unwrap();
    assert_eq!(stats, b"server.live: 1".to_vec());
}

#[tokio::test]
async fn same_ca_different_identity_is_rejected() {
    let fixture = Fixture::new().await;
    let identity = fixture.mesh_identity("backend").await;
    let addr = spawn_tls_admin(&identity, &fixture.control_plane_ca, "ok").await.unwrap();

    let proxy = DataplaneResource::new("default", "web-1", "127.0.0.1")
        .with_service("web")
        .with_admin_port(addr.port() as u32);

    let err = fixture.client().clusters(&CallContext::background(), &proxy).await.unwrap_err();
    match err {
        MeshTrustError::UntrustedPeer { expected_identity, .. } => {
            assert_eq!(expected_identity, "spiffe://default/web")
        }
        other => panic!("expected untrusted peer, got {:?}", other),
    }
}

#[tokio::test]
async fn certificate_from_foreign_ca_is_rejected() {
    let fixture = Fixture::new().await;
    let foreign = TestCertificateAuthority::new("foreign").unwrap();
    let identity = foreign.issue_server("web").unwrap();
    let addr = spawn_tls_admin(&identity, &fixture.control_plane_ca, "ok").await.unwrap();

    let proxy = DataplaneResource::new("default", "web-1", "127.0.0.1")
        .with_service("web")
        .with_admin_port(addr.port() as u32);

    let err = fixture.client().stats(&CallContext::background(), &proxy).await.unwrap_err();
    assert!(matches!(err, MeshTrustError::UntrustedPeer { .. }), "got {:?}", err);
}

#[tokio::test]
async fn mesh_without_mtls_accepts_self_signed_admin_cert() {
    let fixture = Fixture::new().await;
    let admin_ca = TestCertificateAuthority::new("admin-proxy").unwrap();
    let identity = admin_ca.issue_server("admin-proxy").unwrap();
    let addr = spawn_tls_admin(&identity, &fixture.control_plane_ca, "cluster::default").await.unwrap();

    let proxy = DataplaneResource::new("plain", "web-1", "127.0.0.1")
        .with_service("web")
        .with_admin_port(addr.port() as u32);

    let clusters = fixture.client().clusters(&CallContext::background(), &proxy).await.unwrap();
    assert_eq!(clusters, b"cluster::default".to_vec());
}

#[tokio::test]
async fn zone_ingress_skips_mesh_verification() {
    let fixture = Fixture::new().await;
    let admin_ca = TestCertificateAuthority::new("admin-proxy").unwrap();
    let identity = admin_ca.issue_server("ingress").unwrap();
    let addr = spawn_tls_admin(&identity, &fixture.control_plane_ca, "ingress").await.unwrap();

    let ingress = ZoneIngressResource {
        name: "ingress-1".into(),
        address: "127.0.0.1".into(),
        admin_port: Some(addr.port() as u32),
    };

    let stats = fixture.client().stats(&CallContext::background(), &ingress).await.unwrap();
    assert_eq!(stats, b"ingress".to_vec());
}

#[tokio::test]
async fn client_certificate_loaded_from_config_files() {
    let fixture = Fixture::new().await;
    let files = TestCertificateFiles::write(&fixture.client_key_pair).unwrap();
    let identity = fixture.mesh_identity("web").await;
    let addr = spawn_tls_admin(&identity, &fixture.control_plane_ca, "loaded").await.unwrap();

    let config = AdminClientConfig {
        client_cert_path: Some(files.cert_path.clone()),
        client_key_path: Some(files.key_path.clone()),
        plaintext_loopback: false,
        ..Default::default()
    };
    let client =
        AdminClient::from_config(fixture.ca_managers.clone(), fixture.store.clone(), config)
            .unwrap();

    let proxy = DataplaneResource::new("default", "web-1", "127.0.0.1")
        .with_service("web")
        .with_admin_port(addr.port() as u32);

    let stats = client.stats(&CallContext::background(), &proxy).await.unwrap();
    assert_eq!(stats, b"loaded".to_vec());
}

#[tokio::test]
async fn unknown_backend_type_fails_before_connecting() {
    let fixture = Fixture::new().await;
    fixture
        .store
        .upsert_mesh(
            MeshResource::new("vaulted")
                .with_enabled_backend(CertificateAuthorityBackend::new("ca-1", "vault")),
        )
        .await;

    let proxy = DataplaneResource::new("vaulted", "web-1", "10.255.255.1").with_service("web");
    let err = fixture.client().stats(&CallContext::background(), &proxy).await.unwrap_err();

    assert_eq!(err.to_string(), "cannot find CA Manager for type vault");
    assert!(err.is_configuration());
}

#[tokio::test]
async fn missing_client_certificate_is_configuration_error() {
    let fixture = Fixture::new().await;
    let client = AdminClient::new(
        fixture.ca_managers.clone(),
        fixture.store.clone(),
        AdminClientConfig::default(),
    );

    let proxy = DataplaneResource::new("default", "web-1", "10.255.255.1").with_service("web");
    let err = client.stats(&CallContext::background(), &proxy).await.unwrap_err();
    assert!(err.is_configuration());
}
