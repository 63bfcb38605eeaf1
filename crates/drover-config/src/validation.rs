//! Configuration validation module.
//!
//! Validates every configuration value up front so that a bad retry table or
//! ledger path fails at startup rather than in the middle of a multi-day job.

use crate::{AppConfig, LedgerBackend, RetryConfig};
use std::fmt;
use url::Url;

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    /// A retry configuration must allow at least one attempt.
    ZeroAttempts { key: String },
    /// A wait value is negative or not finite.
    InvalidWait { key: String, field: String, value: f64 },
    /// Backoff factor must be at least 1.0.
    InvalidBackoffFactor { key: String, value: f64 },
    /// Worker concurrency must be positive.
    ZeroConcurrency,
    /// Ledger location is empty.
    MissingLedgerPath,
    /// URL format is invalid.
    InvalidUrl { url_type: String, message: String },
    /// Timeout value must be positive.
    NonPositiveTimeout { name: String, value: u64 },
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroAttempts { key } => {
                write!(f, "Retry config '{}' must allow at least one attempt", key)
            }
            Self::InvalidWait { key, field, value } => {
                write!(
                    f,
                    "Retry config '{}': {} must be a finite, non-negative number of seconds, got {}",
                    key, field, value
                )
            }
            Self::InvalidBackoffFactor { key, value } => {
                write!(
                    f,
                    "Retry config '{}': backoff_factor must be >= 1.0, got {}",
                    key, value
                )
            }
            Self::ZeroConcurrency => write!(f, "Orchestrator concurrency must be at least 1"),
            Self::MissingLedgerPath => write!(f, "Ledger location must not be empty"),
            Self::InvalidUrl { url_type, message } => {
                write!(f, "Invalid {} URL: {}", url_type, message)
            }
            Self::NonPositiveTimeout { name, value } => {
                write!(f, "Timeout '{}' must be positive, got {}", name, value)
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates the entire application configuration.
    ///
    /// Returns Ok(()) if valid, or Err with all validation errors found.
    pub fn validate(config: &AppConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut errors = Vec::new();

        for (key, retry) in &config.retry {
            Self::validate_retry(key, retry, &mut errors);
        }
        Self::validate_ledger(config, &mut errors);
        Self::validate_capabilities(config, &mut errors);

        if config.orchestrator.concurrency == 0 {
            errors.push(ConfigValidationError::ZeroConcurrency);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validates one retry configuration.
    pub fn validate_retry(key: &str, config: &RetryConfig, errors: &mut Vec<ConfigValidationError>) {
        if config.max_retries == 0 {
            errors.push(ConfigValidationError::ZeroAttempts { key: key.to_string() });
        }

        let mut waits = vec![
            ("base_wait_secs".to_string(), config.base_wait_secs),
            ("max_wait_secs".to_string(), config.max_wait_secs),
            ("success_wait_secs".to_string(), config.success_wait_secs),
        ];
        waits.extend(
            config
                .initial_wait_times
                .iter()
                .map(|(kind, secs)| (format!("initial_wait_times.{kind}"), *secs)),
        );

        for (field, value) in waits {
            if !value.is_finite() || value < 0.0 {
                errors.push(ConfigValidationError::InvalidWait {
                    key: key.to_string(),
                    field,
                    value,
                });
            }
        }

        if !config.backoff_factor.is_finite() || config.backoff_factor < 1.0 {
            errors.push(ConfigValidationError::InvalidBackoffFactor {
                key: key.to_string(),
                value: config.backoff_factor,
            });
        }
    }

    fn validate_ledger(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        match config.ledger.backend {
            LedgerBackend::Json => {
                if config.ledger.path.as_os_str().is_empty() {
                    errors.push(ConfigValidationError::MissingLedgerPath);
                }
            }
            LedgerBackend::Sqlite => {
                if config.ledger.sqlite_url.trim().is_empty() {
                    errors.push(ConfigValidationError::MissingLedgerPath);
                } else if !config.ledger.sqlite_url.starts_with("sqlite:") {
                    errors.push(ConfigValidationError::InvalidUrl {
                        url_type: "ledger".to_string(),
                        message: "must start with 'sqlite:'".to_string(),
                    });
                }
            }
        }
    }

    fn validate_capabilities(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let xtwitter = &config.capabilities.xtwitter;

        match Url::parse(&xtwitter.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(ConfigValidationError::InvalidUrl {
                url_type: "xtwitter".to_string(),
                message: format!("unsupported scheme '{}'", url.scheme()),
            }),
            Err(e) => errors.push(ConfigValidationError::InvalidUrl {
                url_type: "xtwitter".to_string(),
                message: e.to_string(),
            }),
        }

        if xtwitter.request_timeout_secs == 0 {
            errors.push(ConfigValidationError::NonPositiveTimeout {
                name: "capabilities.xtwitter.request_timeout_secs".to_string(),
                value: 0,
            });
        }

        if !xtwitter.pacing_secs.is_finite() || xtwitter.pacing_secs < 0.0 {
            errors.push(ConfigValidationError::InvalidWait {
                key: "capabilities.xtwitter".to_string(),
                field: "pacing_secs".to_string(),
                value: xtwitter.pacing_secs,
            });
        }
    }
}

/// Formats validation errors for display.
pub fn format_validation_errors(errors: &[ConfigValidationError]) -> String {
    let mut output = String::from("Configuration validation failed:\n");
    for (i, error) in errors.iter().enumerate() {
        output.push_str(&format!("  {}. {}\n", i + 1, error));
    }
    output
}
