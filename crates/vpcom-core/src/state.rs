//! Connection lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of the link to the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Never connected, or stopped
    #[default]
    Disconnected,
    /// Socket is being opened
    Connecting,
    /// Link is up
    Connected,
    /// Link dropped; calls fail until reconnected
    Failed,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}
