//! # Error Types
//!
//! Error types for the mesh trust core using `thiserror`.

use super::tls::TlsError;

/// Custom result type for mesh trust operations
pub type Result<T> = std::result::Result<T, MeshTrustError>;

/// Main error type for the mesh trust core
#[derive(thiserror::Error, Debug)]
pub enum MeshTrustError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// No CA manager registered for the backend type named by a mesh
    #[error("cannot find CA Manager for type {backend_type}")]
    CaManagerNotFound { backend_type: String },

    /// Resource not found errors
    #[error("Resource not found: {resource_type} with ID '{id}'")]
    NotFound { resource_type: String, id: String },

    /// Admin channel requested for a proxy kind that has no admin identity
    #[error("unsupported proxy type: {resource_type}")]
    UnsupportedProxyType { resource_type: String },

    /// A CA backend failed to produce or sign material
    #[error("CA backend '{backend_type}' failed for mesh '{mesh}': {message}")]
    CaBackend { backend_type: String, mesh: String, message: String },

    /// The remote proxy presented a certificate that does not prove the expected identity
    #[error("untrusted peer, expected identity {expected_identity}: {reason}")]
    UntrustedPeer { expected_identity: String, reason: String },

    /// The proxy admin endpoint answered with a non-success status
    #[error("envoy response [{status}] [{body}]")]
    AdminResponse { status: u16, body: String },

    /// Network transport errors
    #[error("Transport error during {operation}: {source}")]
    Transport {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Timeout errors
    #[error("Operation timed out: {operation} after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// The caller cancelled the operation
    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// Protobuf decoding errors
    #[error("Protobuf error: {context}")]
    Encode {
        #[source]
        source: prost::DecodeError,
        context: String,
    },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Certificate and key material errors
    #[error(transparent)]
    Tls(#[from] TlsError),
}

impl MeshTrustError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a missing CA manager error
    pub fn ca_manager_not_found<S: Into<String>>(backend_type: S) -> Self {
        Self::CaManagerNotFound { backend_type: backend_type.into() }
    }

    /// Create a not found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.into() }
    }

    /// Create a CA backend error
    pub fn ca_backend<T, M, S>(backend_type: T, mesh: M, message: S) -> Self
    where
        T: Into<String>,
        M: Into<String>,
        S: Into<String>,
    {
        Self::CaBackend {
            backend_type: backend_type.into(),
            mesh: mesh.into(),
            message: message.into(),
        }
    }

    /// Create a transport error naming the failed operation
    pub fn transport<S, E>(operation: S, source: E) -> Self
    where
        S: Into<String>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Transport { operation: operation.into(), source: source.into() }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, duration_ms: u64) -> Self {
        Self::Timeout { operation: operation.into(), duration_ms }
    }

    /// Create a cancellation error
    pub fn cancelled<S: Into<String>>(operation: S) -> Self {
        Self::Cancelled { operation: operation.into() }
    }

    /// Create a serialization error with context
    pub fn serialization<S: Into<String>>(source: serde_json::Error, context: S) -> Self {
        Self::Serialization { source, context: context.into() }
    }

    /// Check if this error should be retried by the caller.
    ///
    /// Nothing inside the crate retries; this only classifies.
    pub fn is_retryable(&self) -> bool {
        match self {
            MeshTrustError::Transport { .. } => true,
            MeshTrustError::Timeout { .. } => true,
            MeshTrustError::Io { .. } => true,
            MeshTrustError::AdminResponse { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Check if this error stems from mesh or process configuration rather than
    /// from a remote peer.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            MeshTrustError::Config { .. }
                | MeshTrustError::CaManagerNotFound { .. }
                | MeshTrustError::UnsupportedProxyType { .. }
                | MeshTrustError::Tls(_)
        )
    }
}

impl From<std::io::Error> for MeshTrustError {
    fn from(error: std::io::Error) -> Self {
        Self::Io { source: error, context: "I/O operation failed".to_string() }
    }
}

impl From<serde_json::Error> for MeshTrustError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

impl From<validator::ValidationErrors> for MeshTrustError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages = Vec::new();
        collect_validation_messages("", &errors, &mut messages);
        messages.sort();

        Self::config(format!("Validation failed: {}", messages.join("; ")))
    }
}

/// Flatten nested validation errors into `path: message` strings.
fn collect_validation_messages(
    prefix: &str,
    errors: &validator::ValidationErrors,
    out: &mut Vec<String>,
) {
    use validator::ValidationErrorsKind;

    for (field, kind) in errors.errors() {
        let path =
            if prefix.is_empty() { field.to_string() } else { format!("{}.{}", prefix, field) };
        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string()))
                    .collect();
                out.push(format!("{}: {}", path, error_messages.join(", ")));
            }
            ValidationErrorsKind::Struct(nested) => {
                collect_validation_messages(&path, nested, out);
            }
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect_validation_messages(&format!("{}[{}]", path, index), nested, out);
                }
            }
        }
    }
}
