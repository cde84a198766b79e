use std::net::SocketAddr;

use eyre::Result;

use crate::config::models::{GatewayConfig, parse_duration};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid duration for '{field}': {value}")]
    InvalidDuration { field: String, value: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the whole configuration, reporting every problem at once.
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        for (field, value) in [
            ("roleguard_poll_interval", &config.roleguard_poll_interval),
            ("breaker.cooldown", &config.breaker.cooldown),
            ("proxy.timeout", &config.proxy.timeout),
        ] {
            if let Err(e) = Self::validate_duration(field, value) {
                errors.push(e);
            }
        }

        if config.breaker.failure_threshold == 0 {
            errors.push(ValidationError::InvalidField {
                field: "breaker.failure_threshold".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if config.proxy.max_body == 0 {
            errors.push(ValidationError::InvalidField {
                field: "proxy.max_body".to_string(),
                message: "Must be at least 1 byte".to_string(),
            });
        }

        if config.routes_path.as_os_str().is_empty() {
            errors.push(ValidationError::InvalidField {
                field: "routes_path".to_string(),
                message: "Must not be empty".to_string(),
            });
        }

        if let Some(secret) = &config.auth.jwt_secret {
            if secret.is_empty() {
                errors.push(ValidationError::InvalidField {
                    field: "auth.jwt_secret".to_string(),
                    message: "Must not be empty when set".to_string(),
                });
            }
        }

        if config.agent.corpus.trim().is_empty() || config.agent.corpus.contains('/') {
            errors.push(ValidationError::InvalidField {
                field: "agent.corpus".to_string(),
                message: "Must be a single non-empty path segment".to_string(),
            });
        }

        for prefix in &config.guardian.sensitive_prefixes {
            if !prefix.starts_with('/') {
                errors.push(ValidationError::InvalidField {
                    field: format!("guardian.sensitive_prefixes: {prefix}"),
                    message: "Prefixes must start with '/'".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8010')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_duration(field: &str, value: &str) -> ValidationResult<()> {
        match parse_duration(value) {
            Ok(duration) if !duration.is_zero() => Ok(()),
            _ => Err(ValidationError::InvalidDuration {
                field: field.to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
