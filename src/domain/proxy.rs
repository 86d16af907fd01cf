//! Proxy resources that expose an Envoy admin endpoint

use serde::{Deserialize, Serialize};

pub const DATAPLANE_TYPE: &str = "Dataplane";
pub const ZONE_INGRESS_TYPE: &str = "ZoneIngress";
pub const ZONE_EGRESS_TYPE: &str = "ZoneEgress";

/// Mesh name used by zone-scoped resources
pub const NO_MESH: &str = "";

/// A proxy the control plane can reach on its admin port.
pub trait ResourceWithAddress: Send + Sync {
    fn resource_type(&self) -> &str;

    fn mesh(&self) -> &str;

    fn name(&self) -> &str;

    /// Service the proxy's certificate is expected to prove, empty when the
    /// proxy has none.
    fn identifying_service(&self) -> &str {
        ""
    }

    /// `host:port` of the admin endpoint.
    fn admin_address(&self, default_admin_port: u32) -> String;
}

/// A sidecar proxy attached to a workload inside a mesh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataplaneResource {
    pub mesh: String,
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub admin_port: Option<u32>,
    /// Services of the inbounds; the first one identifies the proxy
    #[serde(default)]
    pub inbound_services: Vec<String>,
}

impl DataplaneResource {
    pub fn new(mesh: impl Into<String>, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            mesh: mesh.into(),
            name: name.into(),
            address: address.into(),
            admin_port: None,
            inbound_services: Vec::new(),
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.inbound_services.push(service.into());
        self
    }

    pub fn with_admin_port(mut self, port: u32) -> Self {
        self.admin_port = Some(port);
        self
    }
}

impl ResourceWithAddress for DataplaneResource {
    fn resource_type(&self) -> &str {
        DATAPLANE_TYPE
    }

    fn mesh(&self) -> &str {
        &self.mesh
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn identifying_service(&self) -> &str {
        self.inbound_services.first().map(String::as_str).unwrap_or_default()
    }

    fn admin_address(&self, default_admin_port: u32) -> String {
        join_host_port(&self.address, self.admin_port.unwrap_or(default_admin_port))
    }
}

/// Zone ingress proxy, not bound to any mesh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneIngressResource {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub admin_port: Option<u32>,
}

impl ResourceWithAddress for ZoneIngressResource {
    fn resource_type(&self) -> &str {
        ZONE_INGRESS_TYPE
    }

    fn mesh(&self) -> &str {
        NO_MESH
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn admin_address(&self, default_admin_port: u32) -> String {
        join_host_port(&self.address, self.admin_port.unwrap_or(default_admin_port))
    }
}

/// Zone egress proxy, not bound to any mesh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneEgressResource {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub admin_port: Option<u32>,
}

impl ResourceWithAddress for ZoneEgressResource {
    fn resource_type(&self) -> &str {
        ZONE_EGRESS_TYPE
    }

    fn mesh(&self) -> &str {
        NO_MESH
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn admin_address(&self, default_admin_port: u32) -> String {
        join_host_port(&self.address, self.admin_port.unwrap_or(default_admin_port))
    }
}

/// Join host and port, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: u32) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
