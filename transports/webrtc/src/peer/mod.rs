//! Peer connection management
//!
//! Handles the transport boundary, the connection state machine and
//! ICE-restart recovery.

pub mod connection;
pub mod lifecycle;
pub mod session;
pub mod state;
pub mod transport;

pub use connection::{RtcPeerTransport, RtcTransportFactory};
pub use lifecycle::{ReconnectBudget, ReconnectionPolicy};
pub use session::{CallSession, SignalingCallback, StateChangeCallback};
pub use state::{ConnectionState, ConnectionStateSnapshot};
pub use transport::{ConnectivityState, PeerTransport, TransportEvent, TransportFactory};
