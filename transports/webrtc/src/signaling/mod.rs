//! Signaling payloads produced and consumed by a call session
//!
//! The session does not carry signaling itself: outbound messages are handed
//! to a caller-supplied callback and inbound ones are fed back through
//! [`CallSession::handle_signaling_message`](crate::CallSession::handle_signaling_message).

pub mod protocol;

pub use protocol::{IceCandidate, SdpType, SessionDescription, SignalingMessage};
