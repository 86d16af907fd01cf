//! # Structured Logging
//!
//! Span macros and startup logging helpers built on the tracing ecosystem.

/// Create a tracing span for a call to a proxy admin endpoint.
///
/// ```rust,ignore
/// let span = admin_span!("config_dump", "10.0.0.5:9901", mesh = "default");
/// ```
#[macro_export]
macro_rules! admin_span {
    ($operation:expr, $address:expr) => {
        tracing::info_span!(
            "admin_operation",
            operation = %$operation,
            address = %$address,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $address:expr, $($field:tt)*) => {
        tracing::info_span!(
            "admin_operation",
            operation = %$operation,
            address = %$address,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for xDS operations
#[macro_export]
macro_rules! xds_span {
    ($operation:expr, $mesh:expr) => {
        tracing::debug_span!(
            "xds_operation",
            operation = %$operation,
            mesh = %$mesh,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $mesh:expr, $($field:tt)*) => {
        tracing::debug_span!(
            "xds_operation",
            operation = %$operation,
            mesh = %$mesh,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Log configuration at startup
pub fn log_config_info(config: &crate::config::AppConfig) {
    tracing::info!(
        default_admin_port = config.admin.default_admin_port,
        admin_client_identity = config.admin.client_cert_path.is_some(),
        admin_proxy_identity = config.control_plane.admin_proxy_cert_path.is_some(),
        request_timeout_ms = config.admin.request_timeout_ms,
        json_logging = config.observability.json_logging,
        "Mesh trust configuration"
    );
}
