//! # Certificate Authorities
//!
//! Pluggable CA backends producing mesh roots and workload identity
//! certificates, and the registry that routes a mesh's backend declaration to
//! the matching manager.

pub mod builtin;
pub mod manager;
pub mod provided;
pub mod registry;

pub use builtin::{BuiltinCaConfig, BuiltinCaManager};
pub use manager::{CaManager, BUILTIN_CA_TYPE, PROVIDED_CA_TYPE};
pub use provided::{ProvidedCaConfig, ProvidedCaManager};
pub use registry::{CaManagers, CaManagersBuilder};

use std::sync::Arc;

/// Registry with the built-in and provided managers registered.
pub fn default_ca_managers() -> CaManagers {
    CaManagers::builder()
        .register(BUILTIN_CA_TYPE, Arc::new(BuiltinCaManager::new()))
        .register(PROVIDED_CA_TYPE, Arc::new(ProvidedCaManager::new()))
        .build()
}
