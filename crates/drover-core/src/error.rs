//! Fault taxonomy and unified error types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Closed set of failure kinds raised while retrieving data.
///
/// The kind alone decides whether an attempt may be retried and which wait
/// strategy applies. Kinds serialize as their snake_case name; when parsed
/// from configuration they also accept the HTTP status code the upstream
/// uses to signal them (e.g. `"429"` for [`FaultKind::RateLimit`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FaultKind {
    /// Missing or invalid parameters. Never retried.
    Configuration,
    /// Connection failure or transport timeout.
    Network,
    /// The upstream asked us to back off.
    RateLimit,
    /// The upstream has no capacity to serve the request right now.
    CapacityUnavailable,
    /// Upstream gateway error.
    Gateway,
    /// Credentials were rejected. Never retried.
    Authentication,
    /// Local persistence of retrieved data failed. Never retried.
    DataProcessing,
}

impl FaultKind {
    /// Every fault kind, in declaration order.
    pub const ALL: [FaultKind; 7] = [
        FaultKind::Configuration,
        FaultKind::Network,
        FaultKind::RateLimit,
        FaultKind::CapacityUnavailable,
        FaultKind::Gateway,
        FaultKind::Authentication,
        FaultKind::DataProcessing,
    ];

    /// Returns the canonical snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::CapacityUnavailable => "capacity_unavailable",
            Self::Gateway => "gateway",
            Self::Authentication => "authentication",
            Self::DataProcessing => "data_processing",
        }
    }

    /// Returns the HTTP status code the upstream uses for this kind, if any.
    #[must_use]
    pub const fn status_code(self) -> Option<u16> {
        match self {
            Self::RateLimit => Some(429),
            Self::CapacityUnavailable => Some(417),
            Self::Gateway => Some(504),
            Self::Authentication => Some(401),
            Self::Configuration | Self::Network | Self::DataProcessing => None,
        }
    }

    /// Maps an upstream HTTP status code to a fault kind.
    #[must_use]
    pub const fn from_status_code(code: u16) -> Option<Self> {
        match code {
            429 => Some(Self::RateLimit),
            417 => Some(Self::CapacityUnavailable),
            502..=504 => Some(Self::Gateway),
            401 | 403 => Some(Self::Authentication),
            _ => None,
        }
    }

    /// Returns true for kinds that no amount of waiting can fix.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::Configuration | Self::Authentication | Self::DataProcessing
        )
    }

    /// The retryable set used when a configuration does not name one.
    #[must_use]
    pub fn default_retryable() -> BTreeSet<FaultKind> {
        [
            Self::Network,
            Self::RateLimit,
            Self::CapacityUnavailable,
            Self::Gateway,
        ]
        .into_iter()
        .collect()
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultKind {
    type Err = DroverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(code) = trimmed.parse::<u16>() {
            return Self::from_status_code(code).ok_or_else(|| {
                DroverError::Configuration(format!("No fault kind for status code {code}"))
            });
        }

        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| DroverError::Configuration(format!("Unknown fault kind: {trimmed}")))
    }
}

impl TryFrom<String> for FaultKind {
    type Error = DroverError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FaultKind> for String {
    fn from(kind: FaultKind) -> Self {
        kind.as_str().to_string()
    }
}

/// A classified failure raised by a retrieval capability or its transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Taxonomy tag driving retry decisions.
    pub kind: FaultKind,
    /// Human readable description.
    pub message: String,
    /// Upstream HTTP status code, when the fault came from a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Context frames added while the fault propagated, innermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

impl Fault {
    /// Creates a fault of the given kind.
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: kind.status_code(),
            context: Vec::new(),
        }
    }

    /// Missing or invalid parameters.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Configuration, message)
    }

    /// Connection or transport failure.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Network, message)
    }

    /// Upstream rate limit.
    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(FaultKind::RateLimit, message)
    }

    /// No upstream capacity.
    pub fn capacity_unavailable(message: impl Into<String>) -> Self {
        Self::new(FaultKind::CapacityUnavailable, message)
    }

    /// Upstream gateway error.
    pub fn gateway(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Gateway, message)
    }

    /// Rejected credentials.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Authentication, message)
    }

    /// Local persistence failure.
    pub fn data_processing(message: impl Into<String>) -> Self {
        Self::new(FaultKind::DataProcessing, message)
    }

    /// Overrides the status code.
    #[must_use]
    pub fn with_status(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    /// Appends a context frame.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} fault", self.kind)?;
        if let Some(code) = self.status_code {
            write!(f, " ({code})")?;
        }
        write!(f, ": {}", self.message)?;
        for frame in self.context.iter().rev() {
            write!(f, " [{frame}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for Fault {}

/// Unified error type for the Drover workspace.
#[derive(Error, Debug)]
pub enum DroverError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Retrieval fault
    #[error(transparent)]
    Fault(#[from] Fault),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Work was abandoned because shutdown was requested.
    #[error("Interrupted by shutdown")]
    Interrupted,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DroverError {
    /// Returns the fault kind carried by this error, if it is a fault.
    #[must_use]
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            Self::Fault(fault) => Some(fault.kind),
            _ => None,
        }
    }
}
