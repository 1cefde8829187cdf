//! Error types for the VPCOM bridge

use std::time::Duration;
use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Bridge error types
///
/// Variants carry text rather than source errors so one failure can be
/// handed to every outstanding wait.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Initial connect failed
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Established connection dropped while a call was waiting
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Call issued after the connection failed and before a reconnect
    #[error("Bridge disconnected, call run() to reconnect")]
    BridgeDisconnected,

    /// No matching response within the configured bound
    #[error("Timed out after {timeout:?} waiting for {expected}")]
    ResponseTimeout { expected: String, timeout: Duration },

    /// Inbound bytes could not be decoded
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// A wait for this response name is already outstanding
    #[error("Duplicate wait for {0}")]
    DuplicateWait(String),

    /// Peer answered with an error payload
    #[error("Peer error: {0}")]
    PeerError(String),

    /// Outbound value could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Background runtime unavailable
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl BridgeError {
    /// Stable snake_case name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::ConnectionRefused(_) => "connection_refused",
            BridgeError::ConnectionLost(_) => "connection_lost",
            BridgeError::BridgeDisconnected => "bridge_disconnected",
            BridgeError::ResponseTimeout { .. } => "response_timeout",
            BridgeError::MalformedFrame(_) => "malformed_frame",
            BridgeError::DuplicateWait(_) => "duplicate_wait",
            BridgeError::PeerError(_) => "peer_error",
            BridgeError::Serialization(_) => "serialization",
            BridgeError::Config(_) => "config",
            BridgeError::Runtime(_) => "runtime",
        }
    }

    /// Whether this error means the link is gone
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            BridgeError::ConnectionLost(_) | BridgeError::BridgeDisconnected
        )
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = BridgeError::ResponseTimeout {
            expected: "Mech_response".into(),
            timeout: Duration::from_secs(2),
        };
        assert_eq!(err.to_string(), "Timed out after 2s waiting for Mech_response");
        assert_eq!(err.kind(), "response_timeout");
        assert!(!err.is_disconnect());
    }

    #[test]
    fn test_disconnect_kinds() {
        assert!(BridgeError::ConnectionLost("eof".into()).is_disconnect());
        assert!(BridgeError::BridgeDisconnected.is_disconnect());
        assert!(!BridgeError::MalformedFrame("x".into()).is_disconnect());
    }
}
