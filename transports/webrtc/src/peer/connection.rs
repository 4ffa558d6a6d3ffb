//! `webrtc`-backed peer transport

use crate::capture::{LocalTrack, RemoteTrack, TrackKind};
use crate::config::{IceServerConfig, SessionConfig};
use crate::error::TransportError;
use crate::peer::transport::{ConnectivityState, PeerTransport, TransportEvent, TransportFactory};
use crate::signaling::{IceCandidate, SdpType, SessionDescription};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

/// Creates [`RtcPeerTransport`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct RtcTransportFactory;

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        config: &SessionConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        let transport = RtcPeerTransport::new(config, events).await?;
        Ok(Arc::new(transport))
    }
}

/// A peer connection on the `webrtc` stack
///
/// Callbacks registered on the connection only forward events; senders are
/// kept per kind so a camera switch can replace the video track in place.
pub struct RtcPeerTransport {
    connection_id: String,
    peer_connection: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<TrackKind, Arc<RTCRtpSender>>>,
    closed: AtomicBool,
}

impl RtcPeerTransport {
    #[instrument(skip_all)]
    pub async fn new(
        config: &SessionConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self, TransportError> {
        let connection_id = uuid::Uuid::new_v4().to_string();

        // Opus for audio, VP8/VP9/H.264 for video
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| TransportError::WebRtc(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                TransportError::WebRtc(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: config.ice_servers.iter().map(to_rtc_ice_server).collect(),
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            TransportError::WebRtc(format!("Failed to create peer connection: {}", e))
        })?);

        Self::register_handlers(&peer_connection, &connection_id, events);

        info!(connection_id = %connection_id, "Peer transport created");

        Ok(Self {
            connection_id,
            peer_connection,
            senders: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// The wrapped connection, for stats and advanced use
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }

    fn register_handlers(
        peer_connection: &RTCPeerConnection,
        connection_id: &str,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) {
        let candidate_events = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let event = match candidate {
                None => Some(TransportEvent::IceGatheringComplete),
                Some(candidate) => match candidate.to_json() {
                    Ok(init) => Some(TransportEvent::IceCandidate(from_rtc_candidate(init))),
                    Err(e) => {
                        warn!("Failed to serialize local ICE candidate: {}", e);
                        None
                    }
                },
            };
            if let Some(event) = event {
                // Receiver gone means the session dropped this transport
                let _ = candidate_events.send(event);
            }
            Box::pin(async {})
        }));

        let ice_events = events.clone();
        let id = connection_id.to_string();
        peer_connection.on_ice_connection_state_change(Box::new(
            move |s: RTCIceConnectionState| {
                debug!(connection_id = %id, "ICE connection state: {}", s);
                if let Some(state) = from_rtc_ice_state(s) {
                    let _ = ice_events.send(TransportEvent::Connectivity(state));
                }
                Box::pin(async {})
            },
        ));

        let id = connection_id.to_string();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                debug!(connection_id = %id, "Peer connection state: {}", s);
                Box::pin(async {})
            },
        ));

        let track_events = events;
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                match RemoteTrack::from_rtc(track) {
                    Some(remote) => {
                        let _ = track_events.send(TransportEvent::RemoteTrack(Arc::new(remote)));
                    }
                    None => warn!("Ignoring remote track of unsupported kind"),
                }
                Box::pin(async {})
            },
        ));
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for RtcPeerTransport {
    async fn add_track(&self, track: &Arc<LocalTrack>) -> Result<(), TransportError> {
        self.ensure_open()?;
        if self.senders.lock().contains_key(&track.kind()) {
            return Err(TransportError::InvalidState(format!(
                "a {} sender already exists",
                track.kind()
            )));
        }

        let sender = self
            .peer_connection
            .add_track(track.rtc_track())
            .await
            .map_err(|e| {
                TransportError::WebRtc(format!("Failed to add {} track: {}", track.kind(), e))
            })?;

        self.senders.lock().insert(track.kind(), sender);
        debug!(
            connection_id = %self.connection_id,
            "Attached {} track {}",
            track.kind(),
            track.id()
        );
        Ok(())
    }

    async fn replace_track(
        &self,
        kind: TrackKind,
        track: &Arc<LocalTrack>,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let sender = self
            .senders
            .lock()
            .get(&kind)
            .cloned()
            .ok_or_else(|| TransportError::InvalidState(format!("no {} sender", kind)))?;

        sender
            .replace_track(Some(track.rtc_track()))
            .await
            .map_err(|e| {
                TransportError::WebRtc(format!("Failed to replace {} track: {}", kind, e))
            })?;

        debug!(connection_id = %self.connection_id, "Replaced {} track with {}", kind, track.id());
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, TransportError> {
        self.ensure_open()?;
        let options = ice_restart.then(|| RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        });

        let offer = self
            .peer_connection
            .create_offer(options)
            .await
            .map_err(|e| TransportError::Rejected(format!("Failed to create offer: {}", e)))?;

        from_rtc_description(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        self.ensure_open()?;
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| TransportError::Rejected(format!("Failed to create answer: {}", e)))?;

        from_rtc_description(&answer)
    }

    async fn set_local_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let desc = to_rtc_description(description)?;
        self.peer_connection
            .set_local_description(desc)
            .await
            .map_err(|e| {
                TransportError::Rejected(format!("Failed to set local description: {}", e))
            })
    }

    async fn set_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let desc = to_rtc_description(description)?;
        self.peer_connection
            .set_remote_description(desc)
            .await
            .map_err(|e| {
                TransportError::Rejected(format!("Failed to set remote description: {}", e))
            })
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.peer_connection
            .add_ice_candidate(to_rtc_candidate(candidate))
            .await
            .map_err(|e| TransportError::Rejected(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(connection_id = %self.connection_id, "Closing peer transport");
        self.senders.lock().clear();
        self.peer_connection
            .close()
            .await
            .map_err(|e| TransportError::WebRtc(format!("Failed to close connection: {}", e)))
    }
}

fn to_rtc_ice_server(server: &IceServerConfig) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

fn from_rtc_ice_state(state: RTCIceConnectionState) -> Option<ConnectivityState> {
    match state {
        RTCIceConnectionState::New => Some(ConnectivityState::New),
        RTCIceConnectionState::Checking => Some(ConnectivityState::Checking),
        RTCIceConnectionState::Connected => Some(ConnectivityState::Connected),
        RTCIceConnectionState::Completed => Some(ConnectivityState::Completed),
        RTCIceConnectionState::Disconnected => Some(ConnectivityState::Disconnected),
        RTCIceConnectionState::Failed => Some(ConnectivityState::Failed),
        RTCIceConnectionState::Closed => Some(ConnectivityState::Closed),
        _ => None,
    }
}

fn to_rtc_description(desc: &SessionDescription) -> Result<RTCSessionDescription, TransportError> {
    let sdp = desc.sdp.clone();
    let parsed = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(sdp),
        SdpType::Answer => RTCSessionDescription::answer(sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(sdp),
        SdpType::Rollback => {
            return Err(TransportError::Rejected(
                "rollback descriptions are not supported".to_string(),
            ))
        }
    };
    parsed.map_err(|e| TransportError::Rejected(format!("Malformed SDP: {}", e)))
}

fn from_rtc_description(
    desc: &RTCSessionDescription,
) -> Result<SessionDescription, TransportError> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        other => {
            return Err(TransportError::WebRtc(format!(
                "unexpected description type {}",
                other
            )))
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: desc.sdp.clone(),
    })
}

fn to_rtc_candidate(candidate: &IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate.clone(),
        sdp_mid: candidate.sdp_mid.clone(),
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment.clone(),
    }
}

fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}
