//! # Resource Access
//!
//! The trust core only reads meshes. Persistence belongs to the embedding
//! control plane; [`ResourceManager`] is the seam, and [`MemoryResourceManager`]
//! backs tests and single-process embedders.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::domain::{MeshResource, MESH_TYPE};
use crate::errors::{MeshTrustError, Result};
use crate::utils::CallContext;

/// Read access to mesh resources.
#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// Fetch a mesh by name. A missing mesh is [`MeshTrustError::NotFound`].
    async fn get_mesh(&self, ctx: &CallContext, name: &str) -> Result<MeshResource>;
}

/// In-memory mesh store.
#[derive(Debug, Default)]
pub struct MemoryResourceManager {
    meshes: RwLock<HashMap<String, MeshResource>>,
}

impl MemoryResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_mesh(&self, mesh: MeshResource) {
        debug!(mesh = %mesh.name, mtls_enabled = mesh.mtls_enabled(), "Storing mesh");
        self.meshes.write().await.insert(mesh.name.clone(), mesh);
    }

    pub async fn delete_mesh(&self, name: &str) -> Option<MeshResource> {
        self.meshes.write().await.remove(name)
    }
}

#[async_trait]
impl ResourceManager for MemoryResourceManager {
    #[instrument(skip(self, ctx), name = "store_get_mesh")]
    async fn get_mesh(&self, ctx: &CallContext, name: &str) -> Result<MeshResource> {
        ctx.run("get_mesh", async {
            self.meshes
                .read()
                .await
                .get(name)
                .cloned()
                .ok_or_else(|| MeshTrustError::not_found(MESH_TYPE, name))
        })
        .await
    }
}
