//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, header buffer floor)
//! - Reject schemes the transport cannot speak
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>

use thiserror::Error;

use crate::config::schema::GuardConfig;

/// Smallest read buffer hyper accepts for HTTP/1.
pub const MIN_HEADER_BYTES: usize = 8192;

const SUPPORTED_SCHEMES: &[&str] = &["http", "https"];
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("timeouts.{field} must be greater than zero")]
    ZeroTimeout { field: &'static str },

    #[error("http.max_header_bytes must be at least 8192, got {0}")]
    HeaderBufferTooSmall(usize),

    #[error("policy.allowed_schemes contains unsupported scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("policy.allowed_schemes is empty; no request could ever be made")]
    NoSchemes,

    #[error("observability.log_level {0:?} is not a known level")]
    UnknownLogLevel(String),
}

pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.timeouts.idle_ms == 0 {
        errors.push(ValidationError::ZeroTimeout { field: "idle_ms" });
    }
    if config.timeouts.connect_ms == 0 {
        errors.push(ValidationError::ZeroTimeout { field: "connect_ms" });
    }

    if config.http.max_header_bytes < MIN_HEADER_BYTES {
        errors.push(ValidationError::HeaderBufferTooSmall(config.http.max_header_bytes));
    }

    if config.policy.allowed_schemes.is_empty() {
        errors.push(ValidationError::NoSchemes);
    }
    for scheme in &config.policy.allowed_schemes {
        if !SUPPORTED_SCHEMES.contains(&scheme.to_lowercase().as_str()) {
            errors.push(ValidationError::UnsupportedScheme(scheme.clone()));
        }
    }

    if !LOG_LEVELS.contains(&config.observability.log_level.to_lowercase().as_str()) {
        errors.push(ValidationError::UnknownLogLevel(config.observability.log_level.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
