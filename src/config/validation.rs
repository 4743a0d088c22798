//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, limits > 0, pool sizes > 0)
//! - Check that auxiliary addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::GatewayConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `server.idle_timeout_secs`.
    pub field: &'static str,
    /// Human-readable description.
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check every semantic constraint and collect all violations.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let server = &config.server;

    if server.bind_host.trim().is_empty() {
        errors.push(ValidationError::new("server.bind_host", "must not be empty"));
    }
    if server.idle_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "server.idle_timeout_secs",
            "must be greater than zero",
        ));
    }
    if server.max_message_bytes == 0 {
        errors.push(ValidationError::new(
            "server.max_message_bytes",
            "must be greater than zero",
        ));
    }
    if server.max_connections == 0 {
        errors.push(ValidationError::new(
            "server.max_connections",
            "must be greater than zero",
        ));
    }
    if server.acceptor_threads == 0 {
        errors.push(ValidationError::new(
            "server.acceptor_threads",
            "must be greater than zero",
        ));
    }
    if server.worker_threads == Some(0) {
        errors.push(ValidationError::new(
            "server.worker_threads",
            "must be greater than zero when set",
        ));
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
