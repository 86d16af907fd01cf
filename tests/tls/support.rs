use std::{fs, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use mesh_trust::utils::KeyPair;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyUsagePurpose, PKCS_ECDSA_P256_SHA256,
};
use rustls::pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tempfile::TempDir;
use time::{Duration, OffsetDateTime};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// Throwaway CA issuing control plane client certificates and admin server
/// certificates for tests.
pub struct TestCertificateAuthority {
    cert: Certificate,
    key: rcgen::KeyPair,
}

impl TestCertificateAuthority {
    pub fn new(common_name: &str) -> anyhow::Result<Self> {
        let key = rcgen::KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
            .context("generate CA key")?;
        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.distinguished_name.push(DnType::OrganizationName, "Mesh Trust Test");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::days(1);
        params.not_after = now + Duration::days(30);

        let cert = params.self_signed(&key).context("self-sign CA")?;
        Ok(Self { cert, key })
    }

    pub fn root_pem(&self) -> String {
        self.cert.pem()
    }

    pub fn root_der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }

    /// Root certificate and signing key, as a provided CA backend reads them.
    pub fn write_files(&self) -> anyhow::Result<TestCertificateFiles> {
        TestCertificateFiles::write(&KeyPair::new(self.cert.pem(), self.key.serialize_pem()))
    }

    /// Leaf certificate for the control plane side of the admin channel.
    pub fn issue_client(&self, common_name: &str) -> anyhow::Result<KeyPair> {
        self.issue(common_name, ExtendedKeyUsagePurpose::ClientAuth)
    }

    /// Leaf certificate for an admin endpoint outside any mesh CA.
    pub fn issue_server(&self, common_name: &str) -> anyhow::Result<KeyPair> {
        self.issue(common_name, ExtendedKeyUsagePurpose::ServerAuth)
    }

    fn issue(&self, common_name: &str, usage: ExtendedKeyUsagePurpose) -> anyhow::Result<KeyPair> {
        let key = rcgen::KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
            .context("generate leaf key")?;
        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.extended_key_usages = vec![usage];
        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::hours(1);
        params.not_after = now + Duration::days(1);

        let cert = params.signed_by(&key, &self.cert, &self.key).context("sign leaf")?;
        Ok(KeyPair::new(cert.pem(), key.serialize_pem()))
    }
}

/// PEM files on disk for loaders that take paths.
pub struct TestCertificateFiles {
    _temp_dir: TempDir,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl TestCertificateFiles {
    pub fn write(key_pair: &KeyPair) -> anyhow::Result<Self> {
        let temp_dir = TempDir::new().context("create temp dir")?;
        let cert_path = temp_dir.path().join("cert.pem");
        let key_path = temp_dir.path().join("key.pem");
        fs::write(&cert_path, &key_pair.cert_pem).context("write certificate")?;
        fs::write(&key_path, &key_pair.key_pem).context("write private key")?;
        Ok(Self { _temp_dir: temp_dir, cert_path, key_path })
    }
}

/// Serve `body` over TLS with `identity`, requiring a client certificate
/// issued by `client_ca`.
pub async fn spawn_tls_admin(
    identity: &KeyPair,
    client_ca: &TestCertificateAuthority,
    body: &'static str,
) -> anyhow::Result<SocketAddr> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let chain = CertificateDer::pem_slice_iter(&identity.cert_pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("parse server chain: {:?}", e))?;
    let key = PrivateKeyDer::from_pem_slice(&identity.key_pem)
        .map_err(|e| anyhow::anyhow!("parse server key: {:?}", e))?;

    let mut roots = RootCertStore::empty();
    roots.add(client_ca.root_der()).context("add client CA")?;
    let client_verifier =
        WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .context("build client verifier")?;

    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .context("protocol versions")?
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(chain, key)
        .context("server certificate")?;
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.context("bind admin listener")?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Ok(mut tls) = acceptor.accept(stream).await else {
                    return;
                };
                read_request_head(&mut tls).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = tls.write_all(response.as_bytes()).await;
                let _ = tls.shutdown().await;
            });
        }
    });

    Ok(addr)
}

/// Plain TCP endpoint that reads one request and hangs up without answering.
pub async fn spawn_closing_admin() -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await.context("bind closing listener")?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            read_request_head(&mut stream).await;
            drop(stream);
        }
    });

    Ok(addr)
}

async fn read_request_head<S: AsyncRead + Unpin>(stream: &mut S) {
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                received.extend_from_slice(&buf[..n]);
                if received.windows(4).any(|window| window == b"\r\n\r\n") {
                    return;
                }
            }
        }
    }
}

/// Plain HTTP admin that answers 500 but sends only part of the promised body.
///
/// With `hold_open` the connection then stalls; otherwise it is closed.
pub async fn spawn_truncated_admin(hold_open: bool) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await.context("bind truncated listener")?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            read_request_head(&mut stream).await;
            let head = b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 100\r\n\r\npartial";
            if stream.write_all(head).await.is_err() {
                continue;
            }
            if hold_open {
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                    drop(stream);
                });
            }
        }
    });

    Ok(addr)
}
