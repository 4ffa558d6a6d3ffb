//! Two-party WebRTC call sessions
//!
//! This crate manages the peer connection side of a one-to-one audio/video
//! call: it acquires local camera and microphone capture, negotiates a direct
//! transport with the other participant through an external signaling relay,
//! and keeps the call alive across transient network loss with bounded ICE
//! restarts.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │  CallSession (one async mutex around all state)       │
//! │  ├─ CaptureManager ── CaptureFacility (devices)       │
//! │  ├─ PeerTransport (webrtc RTCPeerConnection)          │
//! │  │   └─ TransportEvent channel → event pump           │
//! │  ├─ ReconnectBudget + ReconnectionPolicy              │
//! │  └─ observers: state snapshots, outbound signaling    │
//! │     ↕                                                 │
//! │  signaling relay (offer / answer / candidates, JSON)  │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use rendezvous_call::SessionConfig;
//!
//! let config = SessionConfig::mobile_network_preset().with_max_reconnect_attempts(4);
//! assert!(config.validate().is_ok());
//! assert_eq!(config.reconnection.max_attempts, 4);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use rendezvous_call::{CallSession, SessionConfig, SyntheticCaptureFacility};
//! use std::sync::Arc;
//!
//! # async fn example() -> rendezvous_call::Result<()> {
//! let session = CallSession::new(
//!     SessionConfig::default(),
//!     Arc::new(SyntheticCaptureFacility::new()),
//! )?;
//! session
//!     .set_state_change_callback(|snapshot| println!("{}", snapshot.status_line()))
//!     .await;
//! session.set_signaling_callback(|message| {
//!     // relay `message.to_json()` to the other participant
//!     let _ = message;
//! })
//! .await;
//!
//! session.request_capture_default().await?;
//! session.initialize_peer_session().await?;
//! let offer = session.create_offer().await?;
//! # let _ = offer;
//! # session.cleanup().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod capture;
pub mod config;
pub mod error;
pub mod peer;
pub mod signaling;

// Re-exports for public API
pub use capture::{
    CaptureConstraints, CaptureFacility, FacingMode, LocalMedia, LocalTrack, RemoteMedia,
    RemoteTrack, SyntheticCaptureFacility, TrackKind,
};
pub use config::{IceServerConfig, SessionConfig};
pub use error::{
    CaptureError, Error, InitError, NegotiationError, Result, SwitchError, TransportError,
};
pub use peer::{CallSession, ConnectionState, ConnectionStateSnapshot, ReconnectionPolicy};
pub use signaling::{IceCandidate, SessionDescription, SignalingMessage};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
