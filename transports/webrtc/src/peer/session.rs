//! Call session
//!
//! [`CallSession`] ties local capture to one peer transport at a time and
//! owns the connection state machine. All mutable state sits behind a single
//! async mutex that both caller operations and transport events take, so
//! every transition happens in a well-defined order and observers see
//! snapshots in that same order.
//!
//! Transport callbacks never touch the state directly. They post
//! [`TransportEvent`]s on a channel drained by one pump task per transport
//! generation. Replacing or closing the transport bumps the generation, which
//! silences the old pump and any reconnect attempt still sleeping.
//!
//! Only the side that sent the first offer on a transport issues ICE
//! restarts. The answering side keeps its attempt counter and timeouts but
//! waits for the remote restart offer, so two sessions losing connectivity
//! together never send crossing offers.

use crate::capture::{
    CaptureConstraints, CaptureFacility, CaptureManager, LocalMedia, RemoteMedia, TrackKind,
};
use crate::config::SessionConfig;
use crate::error::{CaptureError, InitError, NegotiationError, SwitchError, TransportError};
use crate::peer::connection::RtcTransportFactory;
use crate::peer::lifecycle::ReconnectBudget;
use crate::peer::state::{ConnectionState, ConnectionStateSnapshot};
use crate::peer::transport::{
    ConnectivityState, PeerTransport, TransportEvent, TransportFactory,
};
use crate::signaling::{IceCandidate, SdpType, SessionDescription, SignalingMessage};
use crate::Result;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, instrument, warn};

/// Observer for state snapshots
///
/// Invoked while the session lock is held: it must not block, and must not
/// await session operations (spawn instead).
pub type StateChangeCallback = Arc<dyn Fn(ConnectionStateSnapshot) + Send + Sync>;

/// Sink for outbound signaling (local candidates and ICE-restart offers)
///
/// Same locking rules as [`StateChangeCallback`].
pub type SignalingCallback = Arc<dyn Fn(SignalingMessage) + Send + Sync>;

struct SessionInner {
    state: ConnectionState,
    error: Option<String>,
    capture: CaptureManager,
    remote: Option<RemoteMedia>,
    transport: Option<Arc<dyn PeerTransport>>,
    role: Option<NegotiationRole>,
    budget: ReconnectBudget,
    generation: u64,
    restart_token: u64,
    on_state_change: Option<StateChangeCallback>,
    on_signaling: Option<SignalingCallback>,
}

impl SessionInner {
    fn snapshot(&self) -> ConnectionStateSnapshot {
        ConnectionStateSnapshot {
            status: self.state.clone(),
            error: self.error.clone(),
            local_media: self.capture.local_media().cloned(),
            remote_media: self.remote.clone(),
            reconnect_attempt: self.budget.attempts(),
            max_reconnect_attempts: self.budget.max_attempts(),
        }
    }

    fn notify(&self) {
        if let Some(callback) = &self.on_state_change {
            callback(self.snapshot());
        }
    }

    fn transition(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "State transition");
        }
        self.error = match &state {
            ConnectionState::Failed(reason) => Some(reason.clone()),
            ConnectionState::Reconnecting(_) => self.error.take(),
            _ => None,
        };
        self.state = state;
        self.notify();
    }

    fn emit_signaling(&self, message: SignalingMessage) {
        match &self.on_signaling {
            Some(callback) => callback(message),
            None => debug!("No signaling callback registered, dropping outbound message"),
        }
    }

    /// Drop the current transport and silence everything tied to it
    fn detach_transport(&mut self) -> Option<Arc<dyn PeerTransport>> {
        self.generation += 1;
        self.role = None;
        if let Some(remote) = self.remote.take() {
            remote.stop_all();
        }
        self.transport.take()
    }

    /// Publish a terminal failure; the transport is closed in the background
    fn fail(&mut self, reason: String) {
        warn!(reason = %reason, "Call failed");
        if let Some(transport) = self.detach_transport() {
            tokio::spawn(async move {
                if let Err(e) = transport.close().await {
                    debug!("Error closing failed transport: {}", e);
                }
            });
        }
        self.transition(ConnectionState::Failed(reason));
    }

    fn require_transport(&self) -> std::result::Result<Arc<dyn PeerTransport>, NegotiationError> {
        self.transport
            .clone()
            .ok_or(NegotiationError::TransportNotInitialized)
    }

    async fn local_description(
        &mut self,
        sdp_kind: LocalDescriptionKind,
    ) -> std::result::Result<SessionDescription, NegotiationError> {
        let transport = self.require_transport()?;
        let result: std::result::Result<SessionDescription, TransportError> = async {
            let description = match sdp_kind {
                LocalDescriptionKind::Offer => transport.create_offer(false).await?,
                LocalDescriptionKind::Answer => transport.create_answer().await?,
            };
            transport.set_local_description(&description).await?;
            Ok(description)
        }
        .await;

        if result.is_ok() && matches!(sdp_kind, LocalDescriptionKind::Offer) {
            self.role.get_or_insert(NegotiationRole::Offerer);
        }
        result.map_err(|e| {
            let err = NegotiationError::DescriptionRejected(e.to_string());
            self.fail(err.to_string());
            err
        })
    }

    /// Apply a remote description; rejection fails the call
    ///
    /// A remote offer that collides with our own pending restart offer while
    /// `Reconnecting` counts as a lost attempt instead.
    async fn remote_description(
        &mut self,
        shared: &Arc<Shared>,
        description: &SessionDescription,
    ) -> std::result::Result<(), NegotiationError> {
        let transport = self.require_transport()?;
        if let Err(e) = transport.set_remote_description(description).await {
            let err = NegotiationError::DescriptionRejected(e.to_string());
            if description.sdp_type == SdpType::Offer
                && matches!(self.state, ConnectionState::Reconnecting(_))
            {
                warn!("Remote restart offer collided with ours: {}", e);
                let generation = self.generation;
                on_connectivity_lost(shared, self, generation);
            } else {
                self.fail(err.to_string());
            }
            return Err(err);
        }
        if description.sdp_type == SdpType::Offer {
            self.role.get_or_insert(NegotiationRole::Answerer);
        }
        debug!(sdp_type = ?description.sdp_type, "Remote description applied");
        Ok(())
    }

    async fn remote_candidate(
        &self,
        candidate: &IceCandidate,
    ) -> std::result::Result<(), NegotiationError> {
        let transport = self.require_transport()?;
        transport.add_ice_candidate(candidate).await.map_err(|e| {
            warn!("Ignoring remote ICE candidate: {}", e);
            NegotiationError::CandidateRejected(e.to_string())
        })
    }
}

/// Which side sent the first offer on the current transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NegotiationRole {
    Offerer,
    Answerer,
}

#[derive(Debug, Clone, Copy)]
enum LocalDescriptionKind {
    Offer,
    Answer,
}

struct Shared {
    session_id: String,
    config: SessionConfig,
    factory: Arc<dyn TransportFactory>,
    inner: Mutex<SessionInner>,
}

/// A two-party audio/video call
///
/// Clones are handles to the same session. The lifecycle is explicit:
/// construct, capture, initialize, negotiate, then [`cleanup`](Self::cleanup).
#[derive(Clone)]
pub struct CallSession {
    shared: Arc<Shared>,
}

impl CallSession {
    /// Create a session on the `webrtc` stack
    pub fn new(config: SessionConfig, facility: Arc<dyn CaptureFacility>) -> Result<Self> {
        Self::with_transport_factory(config, facility, Arc::new(RtcTransportFactory))
    }

    /// Create a session with a custom transport implementation
    pub fn with_transport_factory(
        config: SessionConfig,
        facility: Arc<dyn CaptureFacility>,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<Self> {
        config.validate()?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let budget = ReconnectBudget::new(config.reconnection.max_attempts);
        info!(session_id = %session_id, "Call session created");

        Ok(Self {
            shared: Arc::new(Shared {
                session_id,
                config,
                factory,
                inner: Mutex::new(SessionInner {
                    state: ConnectionState::Idle,
                    error: None,
                    capture: CaptureManager::new(facility),
                    remote: None,
                    transport: None,
                    role: None,
                    budget,
                    generation: 0,
                    restart_token: 0,
                    on_state_change: None,
                    on_signaling: None,
                }),
            }),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub async fn state(&self) -> ConnectionState {
        self.shared.inner.lock().await.state.clone()
    }

    pub async fn snapshot(&self) -> ConnectionStateSnapshot {
        self.shared.inner.lock().await.snapshot()
    }

    /// Register the observer that receives every state snapshot
    pub async fn set_state_change_callback<F>(&self, callback: F)
    where
        F: Fn(ConnectionStateSnapshot) + Send + Sync + 'static,
    {
        self.shared.inner.lock().await.on_state_change = Some(Arc::new(callback));
    }

    /// Register the sink for local candidates and ICE-restart offers
    pub async fn set_signaling_callback<F>(&self, callback: F)
    where
        F: Fn(SignalingMessage) + Send + Sync + 'static,
    {
        self.shared.inner.lock().await.on_signaling = Some(Arc::new(callback));
    }

    // ---- Capture ----

    /// Acquire local capture
    ///
    /// Starting from `Idle` or `Failed` this begins a new attempt and
    /// publishes `RequestingPermissions`. A `Closed` session stays `Closed`
    /// until [`initialize_peer_session`](Self::initialize_peer_session).
    /// Refused with [`CaptureError::CallInProgress`] while a transport holds
    /// the current tracks. Any device failure publishes `Failed` and is
    /// returned.
    #[instrument(skip(self), fields(session_id = %self.shared.session_id))]
    pub async fn request_capture(
        &self,
        constraints: CaptureConstraints,
    ) -> std::result::Result<LocalMedia, CaptureError> {
        let mut inner = self.shared.inner.lock().await;

        if inner.transport.is_some() {
            warn!(state = %inner.state, "Capture requested while a transport is attached");
            return Err(CaptureError::CallInProgress);
        }

        if matches!(inner.state, ConnectionState::Idle | ConnectionState::Failed(_)) {
            inner.transition(ConnectionState::RequestingPermissions);
        }

        match inner.capture.acquire(&constraints).await {
            Ok(media) => Ok(media),
            Err(e) if inner.state == ConnectionState::Closed => {
                warn!("Capture failed on a closed session: {}", e);
                Err(e)
            }
            Err(e) => {
                inner.fail(e.to_string());
                Err(e)
            }
        }
    }

    /// [`request_capture`](Self::request_capture) with the configured defaults
    pub async fn request_capture_default(&self) -> std::result::Result<LocalMedia, CaptureError> {
        self.request_capture(self.shared.config.default_constraints.clone())
            .await
    }

    /// Voice call: audio only with the default audio processing
    pub async fn request_audio_only(&self) -> std::result::Result<LocalMedia, CaptureError> {
        self.request_capture(CaptureConstraints::audio_only()).await
    }

    /// Mute or unmute; no-op without an audio track
    pub async fn toggle_audio(&self, enabled: bool) {
        let inner = self.shared.inner.lock().await;
        if !inner.capture.set_enabled(TrackKind::Audio, enabled) {
            debug!("toggle_audio ignored, no audio track");
        }
    }

    /// Camera on or off; no-op without a video track
    pub async fn toggle_video(&self, enabled: bool) {
        let inner = self.shared.inner.lock().await;
        if !inner.capture.set_enabled(TrackKind::Video, enabled) {
            debug!("toggle_video ignored, no video track");
        }
    }

    /// Switch between front and rear camera without renegotiating
    #[instrument(skip(self), fields(session_id = %self.shared.session_id))]
    pub async fn switch_camera(&self) -> std::result::Result<(), SwitchError> {
        let mut inner = self.shared.inner.lock().await;
        let transport = inner.transport.clone();
        inner.capture.switch_camera(transport.as_deref()).await?;
        Ok(())
    }

    // ---- Negotiation ----

    /// Create a fresh transport carrying the current local tracks
    ///
    /// Any previous transport is closed first. Publishes `Connecting`.
    #[instrument(skip(self), fields(session_id = %self.shared.session_id))]
    pub async fn initialize_peer_session(&self) -> std::result::Result<(), InitError> {
        let mut inner = self.shared.inner.lock().await;

        if let Some(previous) = inner.detach_transport() {
            debug!("Closing previous transport");
            if let Err(e) = previous.close().await {
                warn!("Error closing previous transport: {}", e);
            }
        }
        inner.budget.reset();
        let generation = inner.generation;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = match self.shared.factory.create(&self.shared.config, events_tx).await {
            Ok(transport) => transport,
            Err(e) => {
                let err = InitError::TransportCreation(e.to_string());
                inner.fail(err.to_string());
                return Err(err);
            }
        };

        let tracks: Vec<_> = inner
            .capture
            .local_media()
            .map(|media| media.tracks().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        if tracks.is_empty() {
            warn!("Initializing transport without local tracks");
        }
        for track in &tracks {
            if let Err(e) = transport.add_track(track).await {
                let err = InitError::TrackAttach(format!("{} track: {}", track.kind(), e));
                if let Err(close_err) = transport.close().await {
                    debug!("Error closing transport: {}", close_err);
                }
                inner.fail(err.to_string());
                return Err(err);
            }
        }

        inner.transport = Some(transport);
        tokio::spawn(run_event_pump(
            Arc::downgrade(&self.shared),
            generation,
            events_rx,
        ));

        info!(generation, tracks = tracks.len(), "Peer session initialized");
        inner.transition(ConnectionState::Connecting);
        Ok(())
    }

    /// Create an offer and commit it as the local description
    #[instrument(skip(self), fields(session_id = %self.shared.session_id))]
    pub async fn create_offer(&self) -> std::result::Result<SessionDescription, NegotiationError> {
        let mut inner = self.shared.inner.lock().await;
        inner.local_description(LocalDescriptionKind::Offer).await
    }

    /// Create an answer to the applied remote offer and commit it locally
    #[instrument(skip(self), fields(session_id = %self.shared.session_id))]
    pub async fn create_answer(&self) -> std::result::Result<SessionDescription, NegotiationError> {
        let mut inner = self.shared.inner.lock().await;
        inner.local_description(LocalDescriptionKind::Answer).await
    }

    #[instrument(skip(self, description), fields(session_id = %self.shared.session_id))]
    pub async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> std::result::Result<(), NegotiationError> {
        let mut inner = self.shared.inner.lock().await;
        inner.remote_description(&self.shared, &description).await
    }

    /// Apply a trickled remote candidate
    ///
    /// A rejected candidate is logged and returned but leaves the call as is.
    pub async fn add_remote_candidate(
        &self,
        candidate: IceCandidate,
    ) -> std::result::Result<(), NegotiationError> {
        let inner = self.shared.inner.lock().await;
        inner.remote_candidate(&candidate).await
    }

    /// Apply one inbound relay message
    ///
    /// Returns the answer to relay back when `message` is an offer.
    #[instrument(skip(self, message), fields(session_id = %self.shared.session_id))]
    pub async fn handle_signaling_message(
        &self,
        message: SignalingMessage,
    ) -> std::result::Result<Option<SignalingMessage>, NegotiationError> {
        let mut inner = self.shared.inner.lock().await;
        match message {
            SignalingMessage::Offer(offer) => {
                inner.remote_description(&self.shared, &offer).await?;
                let answer = inner.local_description(LocalDescriptionKind::Answer).await?;
                Ok(Some(SignalingMessage::Answer(answer)))
            }
            SignalingMessage::Answer(answer) => {
                inner.remote_description(&self.shared, &answer).await?;
                Ok(None)
            }
            SignalingMessage::IceCandidate(candidate) => {
                inner.remote_candidate(&candidate).await?;
                Ok(None)
            }
        }
    }

    // ---- Teardown ----

    /// Release everything and publish `Closed`; safe to call at any time
    #[instrument(skip(self), fields(session_id = %self.shared.session_id))]
    pub async fn cleanup(&self) {
        let mut inner = self.shared.inner.lock().await;

        inner.capture.release();
        if let Some(transport) = inner.detach_transport() {
            if let Err(e) = transport.close().await {
                warn!("Error closing transport during cleanup: {}", e);
            }
        }
        inner.budget.reset();

        info!("Call session cleaned up");
        inner.transition(ConnectionState::Closed);
    }
}

async fn run_event_pump(
    shared: Weak<Shared>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let mut inner = shared.inner.lock().await;
        if inner.generation != generation {
            debug!(generation, "Transport superseded, stopping event pump");
            break;
        }
        handle_event(&shared, &mut inner, generation, event);
    }
}

fn handle_event(
    shared: &Arc<Shared>,
    inner: &mut SessionInner,
    generation: u64,
    event: TransportEvent,
) {
    match event {
        TransportEvent::IceCandidate(candidate) => {
            inner.emit_signaling(SignalingMessage::IceCandidate(candidate));
        }
        TransportEvent::IceGatheringComplete => {
            debug!("Local ICE gathering complete");
        }
        TransportEvent::RemoteTrack(track) => {
            info!(track_id = %track.id(), kind = %track.kind(), "Remote track received");
            inner.remote.get_or_insert_with(RemoteMedia::default).push(track);
            if matches!(
                inner.state,
                ConnectionState::Connecting | ConnectionState::Reconnecting(_)
            ) {
                inner.budget.reset();
                inner.transition(ConnectionState::Connected);
            } else {
                inner.notify();
            }
        }
        TransportEvent::Connectivity(connectivity) => {
            handle_connectivity(shared, inner, generation, connectivity);
        }
    }
}

fn handle_connectivity(
    shared: &Arc<Shared>,
    inner: &mut SessionInner,
    generation: u64,
    connectivity: ConnectivityState,
) {
    debug!(?connectivity, state = %inner.state, "Connectivity changed");
    match connectivity {
        ConnectivityState::New | ConnectivityState::Checking => {}
        ConnectivityState::Connected | ConnectivityState::Completed => {
            if matches!(
                inner.state,
                ConnectionState::Connecting | ConnectionState::Reconnecting(_)
            ) {
                if inner.budget.attempts() > 0 {
                    info!(attempts = inner.budget.attempts(), "Reconnected");
                }
                inner.budget.reset();
                inner.transition(ConnectionState::Connected);
            }
        }
        ConnectivityState::Disconnected | ConnectivityState::Failed => match inner.state {
            ConnectionState::Connecting if connectivity == ConnectivityState::Failed => {
                inner.fail("ICE negotiation failed".to_string());
            }
            ConnectionState::Connected | ConnectionState::Reconnecting(_) => {
                on_connectivity_lost(shared, inner, generation);
            }
            _ => {}
        },
        ConnectivityState::Closed => {
            if inner.state.is_live() {
                info!("Transport closed by the stack");
                inner.detach_transport();
                inner.transition(ConnectionState::Closed);
            }
        }
    }
}

/// Count one loss against the budget and schedule the next restart
///
/// Scheduling a new attempt invalidates any earlier attempt still waiting.
fn on_connectivity_lost(shared: &Arc<Shared>, inner: &mut SessionInner, generation: u64) {
    inner.restart_token += 1;
    match inner.budget.next_attempt() {
        Some(attempt) => {
            warn!(
                attempt,
                max_attempts = inner.budget.max_attempts(),
                "Connectivity lost, scheduling ICE restart"
            );
            inner.transition(ConnectionState::Reconnecting(attempt));
            tokio::spawn(run_reconnect_attempt(
                Arc::downgrade(shared),
                generation,
                inner.restart_token,
                attempt,
            ));
        }
        None => {
            let reason = format!(
                "Connection lost after {} reconnect attempts",
                inner.budget.max_attempts()
            );
            inner.fail(reason);
        }
    }
}

async fn run_reconnect_attempt(shared: Weak<Shared>, generation: u64, token: u64, attempt: u8) {
    let Some(policy) = shared.upgrade().map(|s| s.config.reconnection.clone()) else {
        return;
    };

    tokio::time::sleep(policy.calculate_backoff(attempt)).await;

    {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let mut inner = shared.inner.lock().await;
        if !attempt_current(&inner, generation, token, attempt) {
            debug!(attempt, "Reconnect attempt abandoned");
            return;
        }
        let Some(transport) = inner.transport.clone() else {
            return;
        };

        if inner.role == Some(NegotiationRole::Answerer) {
            debug!(attempt, "Waiting for the remote ICE restart offer");
        } else {
            let restart: std::result::Result<SessionDescription, TransportError> = async {
                let offer = transport.create_offer(true).await?;
                transport.set_local_description(&offer).await?;
                Ok(offer)
            }
            .await;

            match restart {
                Ok(offer) => {
                    info!(attempt, "ICE restart offer issued");
                    inner.emit_signaling(SignalingMessage::Offer(offer));
                }
                Err(e) => {
                    warn!(attempt, "ICE restart could not be issued: {}", e);
                    on_connectivity_lost(&shared, &mut inner, generation);
                    return;
                }
            }
        }
    }

    tokio::time::sleep(policy.attempt_timeout()).await;

    let Some(shared) = shared.upgrade() else {
        return;
    };
    let mut inner = shared.inner.lock().await;
    if attempt_current(&inner, generation, token, attempt) {
        warn!(attempt, "ICE restart timed out");
        on_connectivity_lost(&shared, &mut inner, generation);
    }
}

fn attempt_current(inner: &SessionInner, generation: u64, token: u64, attempt: u8) -> bool {
    inner.generation == generation
        && inner.restart_token == token
        && inner.state == ConnectionState::Reconnecting(attempt)
}
