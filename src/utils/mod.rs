//! Utility types shared by the CA, xDS and admin layers

pub mod certificates;
pub mod context;

pub use certificates::{CaPool, CertificateInfo, KeyPair};
pub use context::CallContext;
