//! Domain layer
//!
//! Resource types the trust core reads: meshes with their CA backends, and the
//! proxies whose admin endpoints the control plane talks to.

pub mod mesh;
pub mod proxy;

pub use mesh::{CertificateAuthorityBackend, MeshMtls, MeshResource, MESH_TYPE};
pub use proxy::{
    join_host_port, DataplaneResource, ResourceWithAddress, ZoneEgressResource,
    ZoneIngressResource, DATAPLANE_TYPE, NO_MESH, ZONE_EGRESS_TYPE, ZONE_INGRESS_TYPE,
};
