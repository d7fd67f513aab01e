//! Error types for a3s-egress

use crate::policy::SecurityMode;
use std::fmt;
use thiserror::Error;

/// Failure class of a transport-level error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The request did not complete within the transport timeout
    Timeout,
    /// DNS resolution or TCP/TLS connection failed
    Connect,
    /// The response body could not be read
    Body,
    /// Any other request-level failure
    Request,
}

impl TransportErrorKind {
    /// Stable marker written into `network_egress` audit events
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Body => "body",
            Self::Request => "request",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in the egress subsystem
#[derive(Debug, Error)]
pub enum EgressError {
    /// Invalid or self-contradictory security configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A network attempt was denied by policy
    ///
    /// The message names only the host and mode, never the request payload.
    #[error("blocked: {host} not permitted under mode {mode}")]
    SecurityViolation {
        host: String,
        mode: SecurityMode,
    },

    /// The audit sink could not persist an event
    #[error("Audit write failed for '{target}': {reason}")]
    AuditWrite {
        target: String,
        reason: String,
    },

    /// Underlying network failure for an allowed request
    #[error("Transport error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    /// Filesystem failure outside of the audit write path
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EgressError {
    /// Whether the error must abort the enclosing operation
    ///
    /// Violations and transport failures are expected outcomes reported to
    /// the caller. Configuration and audit failures are not recoverable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::AuditWrite { .. })
    }

    /// Whether this is a policy denial
    pub fn is_violation(&self) -> bool {
        matches!(self, Self::SecurityViolation { .. })
    }

    pub(crate) fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }
}

impl From<serde_yaml::Error> for EgressError {
    fn from(e: serde_yaml::Error) -> Self {
        EgressError::Config(format!("Invalid YAML: {}", e))
    }
}

/// Result type alias for egress operations
pub type Result<T> = std::result::Result<T, EgressError>;
