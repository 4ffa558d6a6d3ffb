//! Transport boundary
//!
//! A [`PeerTransport`] is one negotiated peer connection. It never touches
//! session state: everything it observes is sent as a [`TransportEvent`] on
//! the channel handed to the [`TransportFactory`], and the session's event
//! pump applies those events in order.

use crate::capture::{LocalTrack, RemoteTrack, TrackKind};
use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::signaling::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// ICE connectivity as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Something the transport observed
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A local candidate was gathered and should be relayed
    IceCandidate(IceCandidate),
    /// Local gathering finished
    IceGatheringComplete,
    Connectivity(ConnectivityState),
    /// The remote peer started sending a track
    RemoteTrack(Arc<RemoteTrack>),
}

/// One peer connection
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Attach a local track on a new sender
    async fn add_track(&self, track: &Arc<LocalTrack>) -> Result<(), TransportError>;

    /// Swap the track on the existing `kind` sender without renegotiating
    async fn replace_track(
        &self,
        kind: TrackKind,
        track: &Arc<LocalTrack>,
    ) -> Result<(), TransportError>;

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), TransportError>;

    async fn set_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), TransportError>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError>;

    /// Close the connection; closing twice is not an error
    async fn close(&self) -> Result<(), TransportError>;
}

/// Creates transports wired to an event channel
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        config: &SessionConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>, TransportError>;
}
