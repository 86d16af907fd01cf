//! Verified HTTP client for Envoy admin endpoints
//!
//! Admin endpoints are protected in one of two ways. When the proxy's mesh has
//! mTLS disabled the proxy serves the control plane's self-signed admin
//! certificate and the peer is not verified. When mTLS is enabled the proxy
//! serves its mesh identity, which is checked against the mesh CA and the
//! proxy's SPIFFE URI. The control plane always presents its own client
//! certificate.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use rustls::crypto::CryptoProvider;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tracing::{debug, info, Instrument};
use url::{Host, Url};

use super::sanitize::sanitize_config_dump;
use super::verifier::{PeerIdentityVerifier, VerificationSlot};
use super::EnvoyAdminClient;
use crate::ca::CaManagers;
use crate::config::AdminClientConfig;
use crate::domain::{
    DataplaneResource, ResourceWithAddress, DATAPLANE_TYPE, NO_MESH, ZONE_EGRESS_TYPE,
    ZONE_INGRESS_TYPE,
};
use crate::errors::{MeshTrustError, Result, TlsError};
use crate::storage::ResourceManager;
use crate::utils::{CaPool, CallContext, KeyPair};
use crate::xds::tls::service_spiffe_id;

pub const QUIT_PATH: &str = "quitquitquit";
pub const STATS_PATH: &str = "stats";
pub const CLUSTERS_PATH: &str = "clusters";
pub const CONFIG_DUMP_PATH: &str = "config_dump";

const CLIENT_CERT_ORIGIN: &str = "admin client certificate";

/// Scheme used to reach an admin endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminScheme {
    /// Plain HTTP, only for admin endpoints on a loopback address
    Http,
    /// Mutual TLS with peer identity verification
    Https,
}

impl AdminScheme {
    /// Loopback IP hosts are reached over plain HTTP. Hostnames, including
    /// `localhost`, always use HTTPS.
    pub fn for_address(address: &str) -> Self {
        let loopback = Url::parse(&format!("http://{}", address))
            .ok()
            .and_then(|url| match url.host() {
                Some(Host::Ipv4(ip)) => Some(ip.is_loopback()),
                Some(Host::Ipv6(ip)) => Some(ip.is_loopback()),
                _ => None,
            })
            .unwrap_or(false);

        if loopback {
            Self::Http
        } else {
            Self::Https
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// How a shutdown request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitOutcome {
    /// The proxy answered with a success status
    Acknowledged,
    /// The proxy closed the connection without answering, it is already shutting down
    PeerClosed,
}

/// HTTP client bound to one (mesh, service) identity.
#[derive(Debug, Clone)]
pub struct AdminChannel {
    pub client: reqwest::Client,
    pub expected_identity: String,
    verification: Option<VerificationSlot>,
}

impl AdminChannel {
    fn plain(client: reqwest::Client) -> Self {
        Self { client, expected_identity: String::new(), verification: None }
    }

    /// Verifier rejection recorded while the request was in flight.
    fn take_rejection(&self) -> Option<String> {
        let slot = self.verification.as_ref()?;
        let mut guard = slot.lock().ok()?;
        guard.take().map(|err| err.to_string())
    }

    /// Translate a failed request into the crate error.
    fn request_error(&self, operation: &str, err: reqwest::Error, timeout_ms: u64) -> MeshTrustError {
        if let Some(reason) = self.take_rejection() {
            return MeshTrustError::UntrustedPeer {
                expected_identity: self.expected_identity.clone(),
                reason,
            };
        }
        if err.is_timeout() {
            return MeshTrustError::timeout(operation, timeout_ms);
        }
        MeshTrustError::transport(format!("unable to send {}", operation), err)
    }
}

/// A request ready to be sent to one proxy.
struct AdminRequest {
    channel: AdminChannel,
    url: Url,
    address: String,
}

/// [`EnvoyAdminClient`] backed by `reqwest` and `rustls`.
pub struct AdminClient {
    ca_managers: Arc<CaManagers>,
    resource_manager: Arc<dyn ResourceManager>,
    client_key_pair: Option<KeyPair>,
    config: AdminClientConfig,
    provider: Arc<CryptoProvider>,
}

impl std::fmt::Debug for AdminClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminClient")
            .field("ca_managers", &self.ca_managers)
            .field("client_key_pair", &self.client_key_pair)
            .field("config", &self.config)
            .finish()
    }
}

impl AdminClient {
    /// Client without a client certificate. Only loopback admin endpoints can
    /// be reached until one is set.
    pub fn new(
        ca_managers: Arc<CaManagers>,
        resource_manager: Arc<dyn ResourceManager>,
        config: AdminClientConfig,
    ) -> Self {
        Self {
            ca_managers,
            resource_manager,
            client_key_pair: None,
            config,
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }

    /// Client presenting the certificate configured in `config`.
    pub fn from_config(
        ca_managers: Arc<CaManagers>,
        resource_manager: Arc<dyn ResourceManager>,
        config: AdminClientConfig,
    ) -> Result<Self> {
        let key_pair = match (&config.client_cert_path, &config.client_key_path) {
            (Some(cert), Some(key)) => {
                let key_pair = KeyPair::load(cert, key)?;
                let info = key_pair.validate(CLIENT_CERT_ORIGIN)?;
                info!(subject = %info.subject, not_after = %info.not_after, "Loaded admin client certificate");
                Some(key_pair)
            }
            (None, None) => None,
            (Some(_), None) => return Err(TlsError::MissingPrivateKeyPath.into()),
            (None, Some(_)) => return Err(TlsError::MissingCertificatePath.into()),
        };

        let client = Self::new(ca_managers, resource_manager, config);
        Ok(match key_pair {
            Some(key_pair) => client.with_client_key_pair(key_pair),
            None => client,
        })
    }

    pub fn with_client_key_pair(mut self, key_pair: KeyPair) -> Self {
        self.client_key_pair = Some(key_pair);
        self
    }

    pub fn config(&self) -> &AdminClientConfig {
        &self.config
    }

    /// Trust roots of the mesh's enabled CA backend.
    ///
    /// `None` means the admin endpoint is protected by the self-signed admin
    /// certificate and the peer is not verified.
    pub async fn ca_pool_of_mesh(&self, ctx: &CallContext, mesh: &str) -> Result<Option<CaPool>> {
        if mesh == NO_MESH {
            return Ok(None);
        }
        let mesh = self.resource_manager.get_mesh(ctx, mesh).await?;
        match self.ca_managers.enabled_root_certs(ctx, &mesh).await? {
            Some(roots) => Ok(CaPool::from_root_certs(&roots)?),
            None => Ok(None),
        }
    }

    /// Build an mTLS client for the proxy identified by `(mesh, identifying_service)`.
    pub async fn build_http_client(
        &self,
        ctx: &CallContext,
        mesh: &str,
        identifying_service: &str,
    ) -> Result<AdminChannel> {
        let key_pair = self.client_key_pair.as_ref().ok_or_else(|| {
            MeshTrustError::config("admin client certificate is not configured")
        })?;

        let pool = self.ca_pool_of_mesh(ctx, mesh).await?;
        let expected_identity = service_spiffe_id(mesh, identifying_service);
        let verifier = PeerIdentityVerifier::new(pool, expected_identity.clone(), self.provider.clone());
        let verification = verifier.error_slot();

        let tls = rustls::ClientConfig::builder_with_provider(self.provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(TlsError::from)?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_client_auth_cert(
                key_pair.certificate_chain(CLIENT_CERT_ORIGIN)?,
                key_pair.private_key(CLIENT_CERT_ORIGIN)?,
            )
            .map_err(TlsError::from)?;

        let client = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .connect_timeout(self.config.connect_timeout())
            .timeout(self.config.request_timeout())
            .build()
            .map_err(|e| MeshTrustError::transport("build admin client", e))?;

        debug!(mesh = %mesh, expected_identity = %expected_identity, "Built admin mTLS client");
        Ok(AdminChannel { client, expected_identity, verification: Some(verification) })
    }

    fn loopback_client(&self) -> Result<AdminChannel> {
        let client = reqwest::Client::builder()
            .connect_timeout(self.config.dial_timeout())
            .timeout(self.config.request_timeout())
            .build()
            .map_err(|e| MeshTrustError::transport("build admin client", e))?;
        Ok(AdminChannel::plain(client))
    }

    async fn prepare(
        &self,
        ctx: &CallContext,
        proxy: &dyn ResourceWithAddress,
        path: &str,
    ) -> Result<AdminRequest> {
        let (mesh, service) = admin_identity(proxy)?;
        let address = proxy.admin_address(self.config.default_admin_port);
        let scheme = if self.config.plaintext_loopback {
            AdminScheme::for_address(&address)
        } else {
            AdminScheme::Https
        };

        let channel = match scheme {
            AdminScheme::Http => {
                debug!(address = %address, "Admin endpoint on loopback, using plain HTTP");
                self.loopback_client()?
            }
            AdminScheme::Https => self.build_http_client(ctx, mesh, service).await?,
        };

        let url = Url::parse(&format!("{}://{}/", scheme.as_str(), address))
            .and_then(|base| base.join(path))
            .map_err(|e| {
                MeshTrustError::config_with_source(
                    format!("invalid admin address '{}'", address),
                    Box::new(e),
                )
            })?;

        Ok(AdminRequest { channel, url, address })
    }

    async fn send(
        &self,
        ctx: &CallContext,
        request: &AdminRequest,
        method: Method,
        operation: &str,
    ) -> Result<std::result::Result<reqwest::Response, reqwest::Error>> {
        let pending = request.channel.client.request(method, request.url.clone()).send();
        ctx.run(operation, async { Ok(pending.await) }).await
    }

    /// GET a fixed admin path and return the raw body of a 200 response.
    async fn execute_request(
        &self,
        ctx: &CallContext,
        proxy: &dyn ResourceWithAddress,
        path: &str,
    ) -> Result<Vec<u8>> {
        let request = self.prepare(ctx, proxy, path).await?;
        let span = crate::admin_span!(path, request.address, mesh = %proxy.mesh());
        let operation = format!("GET {}", path);

        async {
            let response = self
                .send(ctx, &request, Method::GET, &operation)
                .await?
                .map_err(|e| {
                    request.channel.request_error(&operation, e, self.config.request_timeout_ms)
                })?;

            if response.status() != reqwest::StatusCode::OK {
                return Err(error_response(ctx, &operation, response).await);
            }

            let body = ctx
                .run(&operation, async {
                    response
                        .bytes()
                        .await
                        .map_err(|e| MeshTrustError::transport(format!("read {}", path), e))
                })
                .await?;
            debug!(bytes = body.len(), "Admin request completed");
            Ok(body.to_vec())
        }
        .instrument(span)
        .await
    }

    /// Ask the proxy to shut down and report how the request ended.
    pub async fn post_quit_outcome(
        &self,
        ctx: &CallContext,
        dataplane: &DataplaneResource,
    ) -> Result<QuitOutcome> {
        let request = self.prepare(ctx, dataplane, QUIT_PATH).await?;
        let span = crate::admin_span!(QUIT_PATH, request.address, mesh = %dataplane.mesh);
        let operation = format!("POST {}", QUIT_PATH);

        async {
            let response = match self.send(ctx, &request, Method::POST, &operation).await? {
                Ok(response) => response,
                Err(err) if is_peer_closed(&err) => {
                    debug!("Proxy closed the connection during shutdown");
                    return Ok(QuitOutcome::PeerClosed);
                }
                Err(err) => {
                    return Err(request.channel.request_error(
                        &operation,
                        err,
                        self.config.request_timeout_ms,
                    ))
                }
            };

            if !response.status().is_success() {
                return Err(error_response(ctx, &operation, response).await);
            }
            Ok(QuitOutcome::Acknowledged)
        }
        .instrument(span)
        .await
    }
}

/// Error for a non-success admin response, carrying its body.
async fn error_response(
    ctx: &CallContext,
    operation: &str,
    response: reqwest::Response,
) -> MeshTrustError {
    let status = response.status().as_u16();
    let body = ctx
        .run(operation, async {
            response.text().await.map_err(|e| MeshTrustError::transport(operation, e))
        })
        .await;
    match body {
        Ok(body) => MeshTrustError::AdminResponse { status, body },
        Err(err) => err,
    }
}

#[async_trait]
impl EnvoyAdminClient for AdminClient {
    async fn post_quit(&self, ctx: &CallContext, dataplane: &DataplaneResource) -> Result<()> {
        self.post_quit_outcome(ctx, dataplane).await.map(|_| ())
    }

    async fn stats(&self, ctx: &CallContext, proxy: &dyn ResourceWithAddress) -> Result<Vec<u8>> {
        self.execute_request(ctx, proxy, STATS_PATH).await
    }

    async fn clusters(&self, ctx: &CallContext, proxy: &dyn ResourceWithAddress) -> Result<Vec<u8>> {
        self.execute_request(ctx, proxy, CLUSTERS_PATH).await
    }

    async fn config_dump(
        &self,
        ctx: &CallContext,
        proxy: &dyn ResourceWithAddress,
    ) -> Result<Vec<u8>> {
        let raw = self.execute_request(ctx, proxy, CONFIG_DUMP_PATH).await?;
        render_config_dump(&raw)
    }
}

/// Mesh and service a proxy's admin certificate must prove.
fn admin_identity(proxy: &dyn ResourceWithAddress) -> Result<(&str, &str)> {
    match proxy.resource_type() {
        DATAPLANE_TYPE => Ok((proxy.mesh(), proxy.identifying_service())),
        ZONE_INGRESS_TYPE | ZONE_EGRESS_TYPE => Ok((NO_MESH, "")),
        other => Err(MeshTrustError::UnsupportedProxyType { resource_type: other.to_string() }),
    }
}

/// Parse, sanitize and re-indent a raw config dump.
pub fn render_config_dump(raw: &[u8]) -> Result<Vec<u8>> {
    let mut dump: serde_json::Value = serde_json::from_slice(raw)
        .map_err(|e| MeshTrustError::serialization(e, "Failed to parse config dump"))?;

    let redacted = sanitize_config_dump(&mut dump);
    debug!(redacted, "Sanitized config dump");

    let mut out = Vec::with_capacity(raw.len());
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b" "));
    dump.serialize(&mut serializer)
        .map_err(|e| MeshTrustError::serialization(e, "Failed to render config dump"))?;
    Ok(out)
}

/// The peer closed the connection after the request went out, without a response.
fn is_peer_closed(err: &reqwest::Error) -> bool {
    if err.is_connect() || err.is_timeout() {
        return false;
    }

    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(hyper_err) = cause.downcast_ref::<hyper::Error>() {
            if hyper_err.is_incomplete_message() || hyper_err.is_closed() {
                return true;
            }
        }
        if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
            if matches!(
                io_err.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ) {
                return true;
            }
        }
        source = cause.source();
    }
    false
}
