//! Connection state and the snapshot pushed to observers

use crate::capture::{LocalMedia, RemoteMedia};
use std::fmt;

/// Authoritative call state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing started yet
    Idle,
    /// Waiting on capture permission / device open
    RequestingPermissions,
    /// Transport created, negotiation and ICE in progress
    Connecting,
    Connected,
    /// ICE restart attempt `n` (1-based) is in progress
    Reconnecting(u8),
    /// Terminal failure with a human-readable reason
    Failed(String),
    /// Torn down
    Closed,
}

impl ConnectionState {
    /// Whether media is expected to flow or be about to flow
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Reconnecting(_)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => f.write_str("idle"),
            ConnectionState::RequestingPermissions => f.write_str("requesting-permissions"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Reconnecting(n) => write!(f, "reconnecting({})", n),
            ConnectionState::Failed(reason) => write!(f, "failed({})", reason),
            ConnectionState::Closed => f.write_str("closed"),
        }
    }
}

/// Everything a UI needs to render the call, captured at one instant
#[derive(Debug, Clone)]
pub struct ConnectionStateSnapshot {
    pub status: ConnectionState,
    pub error: Option<String>,
    pub local_media: Option<LocalMedia>,
    pub remote_media: Option<RemoteMedia>,
    pub reconnect_attempt: u8,
    pub max_reconnect_attempts: u8,
}

impl ConnectionStateSnapshot {
    /// One-line status for the call screen
    pub fn status_line(&self) -> String {
        match &self.status {
            ConnectionState::Idle => "Ready".to_string(),
            ConnectionState::RequestingPermissions => {
                "Waiting for camera and microphone…".to_string()
            }
            ConnectionState::Connecting => "Connecting…".to_string(),
            ConnectionState::Connected => "Connected".to_string(),
            ConnectionState::Reconnecting(n) => {
                format!("Reconnecting ({}/{})", n, self.max_reconnect_attempts)
            }
            ConnectionState::Failed(reason) => format!("Call failed: {}", reason),
            ConnectionState::Closed => "Call ended".to_string(),
        }
    }
}
