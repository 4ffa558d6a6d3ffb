//! Local and remote media tracks
//!
//! A [`LocalTrack`] wraps the `webrtc` sample track that feeds a sender.
//! Its enabled flag gates outgoing samples without detaching the track,
//! which is how mute and camera-off work. Stopping is final.

use crate::capture::FacingMode;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }

    pub(crate) fn from_codec_type(codec_type: RTPCodecType) -> Option<Self> {
        match codec_type {
            RTPCodecType::Audio => Some(TrackKind::Audio),
            RTPCodecType::Video => Some(TrackKind::Video),
            _ => None,
        }
    }

    fn codec_capability(self) -> RTCRtpCodecCapability {
        match self {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90000, // Standard 90kHz clock for video
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings a device actually delivered
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSettings {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<u32>,
    pub echo_cancellation: Option<bool>,
    pub noise_suppression: Option<bool>,
    pub auto_gain_control: Option<bool>,
}

/// A live local capture track
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    label: String,
    facing_mode: Option<FacingMode>,
    settings: TrackSettings,
    enabled: AtomicBool,
    live: AtomicBool,
    rtc_track: Arc<TrackLocalStaticSample>,
}

impl LocalTrack {
    /// Create a live, enabled track for a capture device
    pub fn new(
        kind: TrackKind,
        label: impl Into<String>,
        stream_id: impl Into<String>,
        facing_mode: Option<FacingMode>,
        settings: TrackSettings,
    ) -> Self {
        let id = format!("{}-{}", kind, uuid::Uuid::new_v4());
        let rtc_track = Arc::new(TrackLocalStaticSample::new(
            kind.codec_capability(),
            id.clone(),
            stream_id.into(),
        ));

        Self {
            id,
            kind,
            label: label.into(),
            facing_mode,
            settings,
            enabled: AtomicBool::new(true),
            live: AtomicBool::new(true),
            rtc_track,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Device label, e.g. "Front Camera"
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn facing_mode(&self) -> Option<FacingMode> {
        self.facing_mode
    }

    pub fn settings(&self) -> &TrackSettings {
        &self.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Mute/unmute (audio) or camera on/off (video); the track stays attached
    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            debug!("Track {} enabled: {} -> {}", self.id, previous, enabled);
        }
    }

    /// Whether the track has not been stopped
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Release the device; idempotent
    pub fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            debug!("Stopped {} track {}", self.kind, self.id);
        }
    }

    /// The `webrtc` track handed to the transport sender
    pub fn rtc_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.rtc_track) as Arc<dyn TrackLocal + Send + Sync>
    }

    /// Push one encoded media sample towards the remote peer
    ///
    /// Returns `Ok(false)` without sending while the track is disabled or
    /// stopped.
    pub async fn write_sample(&self, sample: &Sample) -> Result<bool> {
        if !self.is_live() || !self.is_enabled() {
            return Ok(false);
        }

        self.rtc_track
            .write_sample(sample)
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to write RTP sample: {}", e)))?;

        Ok(true)
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("facing_mode", &self.facing_mode)
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .finish()
    }
}

/// Handle to the local capture tracks (at most one per kind)
///
/// Clones share the same tracks.
#[derive(Debug, Clone, Default)]
pub struct LocalMedia {
    audio: Option<Arc<LocalTrack>>,
    video: Option<Arc<LocalTrack>>,
}

impl LocalMedia {
    pub fn new(audio: Option<Arc<LocalTrack>>, video: Option<Arc<LocalTrack>>) -> Self {
        Self { audio, video }
    }

    pub fn audio_track(&self) -> Option<&Arc<LocalTrack>> {
        self.audio.as_ref()
    }

    pub fn video_track(&self) -> Option<&Arc<LocalTrack>> {
        self.video.as_ref()
    }

    pub fn track(&self, kind: TrackKind) -> Option<&Arc<LocalTrack>> {
        match kind {
            TrackKind::Audio => self.audio.as_ref(),
            TrackKind::Video => self.video.as_ref(),
        }
    }

    pub(crate) fn set_video_track(&mut self, track: Arc<LocalTrack>) {
        self.video = Some(track);
    }

    /// All held tracks, audio first
    pub fn tracks(&self) -> impl Iterator<Item = &Arc<LocalTrack>> {
        self.audio.iter().chain(self.video.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }

    pub(crate) fn stop_all(&self) {
        for track in self.tracks() {
            track.stop();
        }
    }
}

/// An inbound track delivered by the transport
pub struct RemoteTrack {
    id: String,
    stream_id: String,
    kind: TrackKind,
    ended: AtomicBool,
    rtc_track: Option<Arc<TrackRemote>>,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, stream_id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            stream_id: stream_id.into(),
            kind,
            ended: AtomicBool::new(false),
            rtc_track: None,
        }
    }

    /// Wrap a `webrtc` remote track; `None` for kinds other than audio/video
    pub(crate) fn from_rtc(track: Arc<TrackRemote>) -> Option<Self> {
        let kind = TrackKind::from_codec_type(track.kind())?;
        Some(Self {
            id: track.id(),
            stream_id: track.stream_id(),
            kind,
            ended: AtomicBool::new(false),
            rtc_track: Some(track),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    pub(crate) fn stop(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }

    /// Underlying `webrtc` track for reading RTP, when backed by one
    pub fn rtc_track(&self) -> Option<&Arc<TrackRemote>> {
        self.rtc_track.as_ref()
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// Read-only view of the tracks received from the remote peer
#[derive(Debug, Clone, Default)]
pub struct RemoteMedia {
    tracks: Vec<Arc<RemoteTrack>>,
}

impl RemoteMedia {
    pub fn tracks(&self) -> &[Arc<RemoteTrack>] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &Arc<RemoteTrack>> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &Arc<RemoteTrack>> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub(crate) fn push(&mut self, track: Arc<RemoteTrack>) {
        self.tracks.push(track);
    }

    pub(crate) fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}
