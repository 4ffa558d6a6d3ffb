//! Capture manager
//!
//! Owns the local tracks for the lifetime of a call attempt. The manager is
//! not synchronized itself; the session keeps it behind its state lock so
//! that capture bookkeeping and transport senders change together.

use crate::capture::{
    CaptureConstraints, CaptureFacility, FacingMode, LocalMedia, LocalTrack, TrackKind,
    VideoConstraints,
};
use crate::error::{CaptureError, SwitchError};
use crate::peer::PeerTransport;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct CaptureManager {
    facility: Arc<dyn CaptureFacility>,
    media: Option<LocalMedia>,
    constraints: Option<CaptureConstraints>,
}

impl CaptureManager {
    pub fn new(facility: Arc<dyn CaptureFacility>) -> Self {
        Self {
            facility,
            media: None,
            constraints: None,
        }
    }

    pub fn local_media(&self) -> Option<&LocalMedia> {
        self.media.as_ref()
    }

    /// Open capture for `constraints`, replacing any media already held
    ///
    /// Either every requested kind is returned live and enabled, or every
    /// track opened along the way is stopped and an error is returned.
    pub async fn acquire(
        &mut self,
        constraints: &CaptureConstraints,
    ) -> Result<LocalMedia, CaptureError> {
        self.release();

        let tracks = self.facility.open(constraints).await?;

        let mut audio: Option<Arc<LocalTrack>> = None;
        let mut video: Option<Arc<LocalTrack>> = None;
        for track in tracks {
            let track = Arc::new(track);
            let slot = match track.kind() {
                TrackKind::Audio if constraints.wants_audio() => &mut audio,
                TrackKind::Video if constraints.wants_video() => &mut video,
                _ => {
                    warn!("Discarding unrequested {} track {}", track.kind(), track.id());
                    track.stop();
                    continue;
                }
            };
            if slot.is_some() {
                warn!("Discarding extra {} track {}", track.kind(), track.id());
                track.stop();
                continue;
            }
            *slot = Some(track);
        }

        let media = LocalMedia::new(audio, video);

        let missing = [TrackKind::Audio, TrackKind::Video]
            .into_iter()
            .find(|kind| {
                let wanted = match kind {
                    TrackKind::Audio => constraints.wants_audio(),
                    TrackKind::Video => constraints.wants_video(),
                };
                wanted && media.track(*kind).map_or(true, |t| !t.is_live())
            });
        if let Some(kind) = missing {
            media.stop_all();
            return Err(CaptureError::DeviceNotFound(format!(
                "capture returned no live {} track",
                kind
            )));
        }

        for track in media.tracks() {
            track.set_enabled(true);
        }

        info!(
            audio = media.audio_track().is_some(),
            video = media.video_track().is_some(),
            "Local capture acquired"
        );

        self.media = Some(media.clone());
        self.constraints = Some(constraints.clone());
        Ok(media)
    }

    /// Stop and forget every held track
    pub fn release(&mut self) {
        if let Some(media) = self.media.take() {
            media.stop_all();
            debug!("Local capture released");
        }
    }

    /// Flip the enabled flag of the `kind` track; returns false if none is held
    pub fn set_enabled(&self, kind: TrackKind, enabled: bool) -> bool {
        match self.media.as_ref().and_then(|m| m.track(kind)) {
            Some(track) => {
                track.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    /// Swap the camera for the one facing the other way
    ///
    /// When `transport` is given the new track is installed on its video
    /// sender before the old track is stopped. Any failure stops the new
    /// track and leaves the old one in place.
    pub async fn switch_camera(
        &mut self,
        transport: Option<&dyn PeerTransport>,
    ) -> Result<Arc<LocalTrack>, SwitchError> {
        let current = self
            .media
            .as_ref()
            .and_then(|m| m.video_track())
            .filter(|t| t.is_live())
            .cloned()
            .ok_or(SwitchError::NoActiveVideoTrack)?;

        if self.facility.video_input_count().await? < 2 {
            return Err(SwitchError::NotSupportedOnPlatform);
        }

        let target = current
            .facing_mode()
            .map(FacingMode::opposite)
            .unwrap_or(FacingMode::Environment);
        let base = self
            .constraints
            .as_ref()
            .and_then(|c| c.video.clone())
            .unwrap_or_else(VideoConstraints::default);
        let request = CaptureConstraints::video_from(base, target);

        let mut opened = self.facility.open(&request).await?;
        let index = opened.iter().position(|t| t.kind() == TrackKind::Video);
        let replacement = match index {
            Some(i) => Arc::new(opened.swap_remove(i)),
            None => {
                for stray in &opened {
                    stray.stop();
                }
                return Err(CaptureError::DeviceNotFound(format!(
                    "no camera facing {:?} was opened",
                    target
                ))
                .into());
            }
        };
        for stray in &opened {
            stray.stop();
        }

        replacement.set_enabled(current.is_enabled());

        if let Some(transport) = transport {
            if let Err(e) = transport.replace_track(TrackKind::Video, &replacement).await {
                warn!("Camera switch aborted, sender kept old track: {}", e);
                replacement.stop();
                return Err(SwitchError::TrackReplace(e.to_string()));
            }
        }

        current.stop();
        if let Some(media) = self.media.as_mut() {
            media.set_video_track(Arc::clone(&replacement));
        }
        if let Some(video) = self.constraints.as_mut().and_then(|c| c.video.as_mut()) {
            video.facing_mode = target;
        }

        info!(
            old_track = %current.id(),
            new_track = %replacement.id(),
            facing = ?target,
            "Camera switched"
        );
        Ok(replacement)
    }
}
