//! Call session test harness
//!
//! Provides infrastructure for integration testing of call sessions with:
//! - A scriptable in-memory transport (`FakeTransport`) and its factory
//! - Transport event injection (connectivity changes, remote tracks, candidates)
//! - A state recorder that captures every published snapshot
//!
//! Basic usage pattern:
//!
//! 1. Build a session with `session_with(...)`
//! 2. Attach a `StateRecorder`
//! 3. Drive the session and inject events through `FakeFactory::emit`
//! 4. Assert on `recorder.statuses()` or `recorder.wait_for(...)`

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rendezvous_call::capture::TrackKind;
use rendezvous_call::peer::{ConnectivityState, PeerTransport, TransportEvent, TransportFactory};
use rendezvous_call::signaling::SdpType;
use rendezvous_call::{
    CallSession, ConnectionState, ConnectionStateSnapshot, IceCandidate, LocalTrack,
    ReconnectionPolicy, RemoteTrack, SessionConfig, SessionDescription, SignalingMessage,
    SyntheticCaptureFacility, TransportError,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Reconnection policy with no backoff and the given attempt timeout
pub fn fast_policy(attempt_timeout_ms: u64) -> ReconnectionPolicy {
    ReconnectionPolicy {
        max_attempts: 3,
        backoff_initial_ms: 0,
        backoff_max_ms: 0,
        backoff_multiplier: 1.0,
        jitter_enabled: false,
        attempt_timeout_ms,
    }
}

pub fn fast_config() -> SessionConfig {
    SessionConfig::default().with_reconnection(fast_policy(200))
}

/// Everything a `FakeTransport` was asked to do
#[derive(Debug, Default, Clone)]
pub struct FakeRecord {
    /// (kind, track id) per `add_track`
    pub attached: Vec<(TrackKind, String)>,
    /// (kind, track id) per successful `replace_track`
    pub replaced: Vec<(TrackKind, String)>,
    /// `ice_restart` flag of every created offer
    pub offers: Vec<bool>,
    pub local_descriptions: Vec<SessionDescription>,
    pub remote_description: Option<SessionDescription>,
    /// Local offer committed and not yet answered
    pub have_local_offer: bool,
    pub candidates: Vec<IceCandidate>,
    pub closed: bool,
}

/// In-memory transport that accepts any SDP except one containing "bogus"
///
/// Like a real peer connection it refuses a remote offer while its own offer
/// is pending.
#[derive(Default)]
pub struct FakeTransport {
    record: Mutex<FakeRecord>,
    sequence: AtomicUsize,
    pub fail_replace: AtomicBool,
    pub fail_offers: AtomicBool,
    pub fail_add_track: AtomicBool,
}

impl FakeTransport {
    pub fn record(&self) -> FakeRecord {
        self.record.lock().clone()
    }

    pub fn restart_offers(&self) -> usize {
        self.record.lock().offers.iter().filter(|restart| **restart).count()
    }

    pub fn is_closed(&self) -> bool {
        self.record.lock().closed
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.record.lock().closed {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn fake_sdp(&self) -> String {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst);
        format!(
            "v=0\r\no=- {n} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
             a=ice-ufrag:ufrag{n}\r\na=ice-pwd:pwd{n}\r\n"
        )
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn add_track(&self, track: &Arc<LocalTrack>) -> Result<(), TransportError> {
        self.ensure_open()?;
        if self.fail_add_track.load(Ordering::SeqCst) {
            return Err(TransportError::WebRtc("sender unavailable".to_string()));
        }
        self.record
            .lock()
            .attached
            .push((track.kind(), track.id().to_string()));
        Ok(())
    }

    async fn replace_track(
        &self,
        kind: TrackKind,
        track: &Arc<LocalTrack>,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        if self.fail_replace.load(Ordering::SeqCst) {
            return Err(TransportError::WebRtc("replace refused".to_string()));
        }
        let mut record = self.record.lock();
        if !record.attached.iter().any(|(k, _)| *k == kind) {
            return Err(TransportError::InvalidState(format!("no {} sender", kind)));
        }
        record.replaced.push((kind, track.id().to_string()));
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, TransportError> {
        self.ensure_open()?;
        if self.fail_offers.load(Ordering::SeqCst) {
            return Err(TransportError::WebRtc("offer refused".to_string()));
        }
        self.record.lock().offers.push(ice_restart);
        Ok(SessionDescription::offer(self.fake_sdp()))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        self.ensure_open()?;
        match &self.record.lock().remote_description {
            Some(remote) if remote.sdp_type == SdpType::Offer => {}
            _ => return Err(TransportError::InvalidState("no remote offer".to_string())),
        }
        Ok(SessionDescription::answer(self.fake_sdp()))
    }

    async fn set_local_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut record = self.record.lock();
        record.have_local_offer = description.sdp_type == SdpType::Offer;
        record.local_descriptions.push(description.clone());
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        if description.sdp.contains("bogus") {
            return Err(TransportError::Rejected("unparseable SDP".to_string()));
        }
        let mut record = self.record.lock();
        if description.sdp_type == SdpType::Offer && record.have_local_offer {
            return Err(TransportError::InvalidState(
                "remote offer while in have-local-offer".to_string(),
            ));
        }
        record.have_local_offer = false;
        record.remote_description = Some(description.clone());
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut record = self.record.lock();
        if record.remote_description.is_none() {
            return Err(TransportError::InvalidState(
                "remote description not set".to_string(),
            ));
        }
        record.candidates.push(candidate.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.record.lock().closed = true;
        Ok(())
    }
}

/// Factory handing out `FakeTransport`s and keeping their event senders
#[derive(Default)]
pub struct FakeFactory {
    created: Mutex<Vec<(Arc<FakeTransport>, mpsc::UnboundedSender<TransportEvent>)>>,
    pub fail_create: AtomicBool,
    /// Applied to every transport created from now on
    pub fail_add_track: AtomicBool,
}

impl FakeFactory {
    pub fn count(&self) -> usize {
        self.created.lock().len()
    }

    pub fn transport(&self, index: usize) -> Arc<FakeTransport> {
        Arc::clone(&self.created.lock()[index].0)
    }

    pub fn latest(&self) -> Arc<FakeTransport> {
        let created = self.created.lock();
        Arc::clone(&created.last().expect("no transport created").0)
    }

    /// Inject an event as if transport `index` observed it
    pub fn emit_to(&self, index: usize, event: TransportEvent) -> bool {
        self.created.lock()[index].1.send(event).is_ok()
    }

    /// Inject an event on the most recent transport
    pub fn emit(&self, event: TransportEvent) -> bool {
        let created = self.created.lock();
        let (_, sender) = created.last().expect("no transport created");
        sender.send(event).is_ok()
    }

    pub fn emit_connectivity(&self, state: ConnectivityState) -> bool {
        self.emit(TransportEvent::Connectivity(state))
    }

    pub fn emit_remote_track(&self, kind: TrackKind) -> bool {
        let id = format!("remote-{}-{}", kind, self.count());
        self.emit(TransportEvent::RemoteTrack(Arc::new(RemoteTrack::new(
            id,
            "remote-stream",
            kind,
        ))))
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn create(
        &self,
        _config: &SessionConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(TransportError::WebRtc("no network interfaces".to_string()));
        }
        let transport = Arc::new(FakeTransport::default());
        transport
            .fail_add_track
            .store(self.fail_add_track.load(Ordering::SeqCst), Ordering::SeqCst);
        self.created.lock().push((Arc::clone(&transport), events));
        Ok(transport)
    }
}

/// Session wired to a fake transport factory
pub struct TestCall {
    pub session: CallSession,
    pub factory: Arc<FakeFactory>,
    pub facility: Arc<SyntheticCaptureFacility>,
    pub recorder: StateRecorder,
    pub signaling: SignalingRecorder,
}

pub async fn session_with(config: SessionConfig, facility: SyntheticCaptureFacility) -> TestCall {
    init_tracing();
    let factory = Arc::new(FakeFactory::default());
    let facility = Arc::new(facility);
    let session = CallSession::with_transport_factory(
        config,
        Arc::clone(&facility) as Arc<dyn rendezvous_call::CaptureFacility>,
        Arc::clone(&factory) as Arc<dyn TransportFactory>,
    )
    .unwrap();
    let recorder = StateRecorder::attach(&session).await;
    let signaling = SignalingRecorder::attach(&session).await;
    TestCall {
        session,
        factory,
        facility,
        recorder,
        signaling,
    }
}

pub async fn default_call() -> TestCall {
    session_with(fast_config(), SyntheticCaptureFacility::new()).await
}

impl TestCall {
    /// Capture, initialize and reach `Connected` through an ICE event
    pub async fn connect(&self) {
        self.session.request_capture_default().await.unwrap();
        self.session.initialize_peer_session().await.unwrap();
        let offer = self.session.create_offer().await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        self.session
            .set_remote_description(SessionDescription::answer("v=0\r\n"))
            .await
            .unwrap();
        self.factory.emit_connectivity(ConnectivityState::Connected);
        self.recorder
            .wait_for(|s| s.status == ConnectionState::Connected)
            .await;
    }
}

/// Records every snapshot the session publishes
#[derive(Clone, Default)]
pub struct StateRecorder {
    snapshots: Arc<Mutex<Vec<ConnectionStateSnapshot>>>,
}

impl StateRecorder {
    pub async fn attach(session: &CallSession) -> Self {
        let recorder = Self::default();
        let snapshots = Arc::clone(&recorder.snapshots);
        session
            .set_state_change_callback(move |snapshot| snapshots.lock().push(snapshot))
            .await;
        recorder
    }

    pub fn snapshots(&self) -> Vec<ConnectionStateSnapshot> {
        self.snapshots.lock().clone()
    }

    pub fn statuses(&self) -> Vec<ConnectionState> {
        self.snapshots.lock().iter().map(|s| s.status.clone()).collect()
    }

    /// Statuses with consecutive duplicates collapsed
    pub fn transitions(&self) -> Vec<ConnectionState> {
        let mut statuses = self.statuses();
        statuses.dedup();
        statuses
    }

    pub fn last(&self) -> Option<ConnectionStateSnapshot> {
        self.snapshots.lock().last().cloned()
    }

    /// Number of snapshots recorded so far, for [`wait_for_since`](Self::wait_for_since)
    pub fn mark(&self) -> usize {
        self.snapshots.lock().len()
    }

    /// Wait until some recorded snapshot satisfies `predicate`
    ///
    /// `predicate` runs under the recorder lock and must not call back into it.
    pub async fn wait_for<F>(&self, predicate: F) -> ConnectionStateSnapshot
    where
        F: Fn(&ConnectionStateSnapshot) -> bool,
    {
        self.wait_for_since(0, predicate).await
    }

    /// Like [`wait_for`](Self::wait_for), ignoring the first `mark` snapshots
    pub async fn wait_for_since<F>(&self, mark: usize, predicate: F) -> ConnectionStateSnapshot
    where
        F: Fn(&ConnectionStateSnapshot) -> bool,
    {
        let found = tokio::time::timeout(WAIT, async {
            loop {
                if let Some(s) = self.snapshots.lock().iter().skip(mark).find(|s| predicate(*s)) {
                    return s.clone();
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        match found {
            Ok(snapshot) => snapshot,
            Err(_) => panic!("timed out; recorded statuses: {:?}", self.statuses()),
        }
    }
}

/// Records outbound signaling messages
#[derive(Clone, Default)]
pub struct SignalingRecorder {
    messages: Arc<Mutex<Vec<SignalingMessage>>>,
}

impl SignalingRecorder {
    pub async fn attach(session: &CallSession) -> Self {
        let recorder = Self::default();
        let messages = Arc::clone(&recorder.messages);
        session
            .set_signaling_callback(move |message| messages.lock().push(message))
            .await;
        recorder
    }

    pub fn messages(&self) -> Vec<SignalingMessage> {
        self.messages.lock().clone()
    }

    pub fn restart_offers(&self) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|m| matches!(m, SignalingMessage::Offer(_)))
            .count()
    }

    pub async fn wait_for_count(&self, count: usize) {
        let reached = tokio::time::timeout(WAIT, async {
            while self.messages.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(reached.is_ok(), "timed out waiting for {} signaling messages", count);
    }
}

/// Give the event pump and spawned tasks a moment to run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
