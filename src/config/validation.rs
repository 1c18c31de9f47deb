//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (body limit > 0, bind address parses)
//! - Check that TLS settings come in pairs
//! - Reject template delimiters the engine cannot use
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - File existence is checked when the listener starts, not here

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::AppConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid bind address '{0}'")]
    InvalidBindAddress(String),

    #[error("max_memory must be greater than zero")]
    ZeroMaxMemory,

    #[error("num_cpu must be greater than zero")]
    ZeroWorkers,

    #[error("cert_file and key_file must be set together")]
    IncompleteTls,

    #[error("template delimiters must be non-empty and distinct (got '{left}' and '{right}')")]
    InvalidDelimiters { left: String, right: String },
}

/// Check a configuration, collecting every error found.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.max_memory == 0 {
        errors.push(ValidationError::ZeroMaxMemory);
    }

    if config.num_cpu == 0 {
        errors.push(ValidationError::ZeroWorkers);
    }

    if config.cert_file.is_some() != config.key_file.is_some() {
        errors.push(ValidationError::IncompleteTls);
    }

    let (left, right) = (config.left_braces.trim(), config.right_braces.trim());
    if left.is_empty() || right.is_empty() || left == right {
        errors.push(ValidationError::InvalidDelimiters {
            left: config.left_braces.clone(),
            right: config.right_braces.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
