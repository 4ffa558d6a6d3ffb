//! Platform capture boundary
//!
//! [`CaptureFacility`] is the black box that turns constraints into live
//! tracks. [`SyntheticCaptureFacility`] is an in-process implementation with
//! configurable devices, used for headless peers, the loopback binary and
//! tests.

use crate::capture::{
    CaptureConstraints, FacingMode, LocalTrack, TrackKind, TrackSettings, VideoConstraints,
};
use crate::error::CaptureError;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

/// Opens capture devices under a set of constraints
#[async_trait]
pub trait CaptureFacility: Send + Sync {
    /// Open one track per requested kind
    ///
    /// Implementations may suspend while the platform prompts for permission.
    async fn open(&self, constraints: &CaptureConstraints) -> Result<Vec<LocalTrack>, CaptureError>;

    /// Number of distinct video inputs (cameras)
    async fn video_input_count(&self) -> Result<usize, CaptureError>;
}

/// Permission answer the synthetic platform gives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
}

#[derive(Debug, Clone)]
struct SyntheticDevices {
    cameras: Vec<FacingMode>,
    has_microphone: bool,
    permission: PermissionState,
    busy: Vec<TrackKind>,
    secure_context: bool,
    max_width: u32,
    max_height: u32,
    max_frame_rate: u32,
}

/// Configurable in-process capture platform
///
/// Defaults to a phone-like device: front and rear camera, a microphone,
/// permission granted, 1080p/30fps ceiling.
pub struct SyntheticCaptureFacility {
    devices: Mutex<SyntheticDevices>,
    opened: Mutex<Vec<OpenedTrack>>,
}

/// Record of a track handed out by the synthetic facility
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedTrack {
    pub id: String,
    pub kind: TrackKind,
    pub facing_mode: Option<FacingMode>,
}

impl Default for SyntheticCaptureFacility {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticCaptureFacility {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(SyntheticDevices {
                cameras: vec![FacingMode::User, FacingMode::Environment],
                has_microphone: true,
                permission: PermissionState::Granted,
                busy: Vec::new(),
                secure_context: true,
                max_width: 1920,
                max_height: 1080,
                max_frame_rate: 30,
            }),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Replace the set of cameras
    pub fn with_cameras(self, cameras: Vec<FacingMode>) -> Self {
        self.devices.lock().cameras = cameras;
        self
    }

    pub fn with_microphone(self, present: bool) -> Self {
        self.devices.lock().has_microphone = present;
        self
    }

    pub fn with_permission(self, permission: PermissionState) -> Self {
        self.devices.lock().permission = permission;
        self
    }

    /// Simulate an insecure context where capture APIs are unavailable
    pub fn with_secure_context(self, secure: bool) -> Self {
        self.devices.lock().secure_context = secure;
        self
    }

    pub fn with_max_resolution(self, width: u32, height: u32) -> Self {
        {
            let mut devices = self.devices.lock();
            devices.max_width = width;
            devices.max_height = height;
        }
        self
    }

    /// Change the permission answer at runtime
    pub fn set_permission(&self, permission: PermissionState) {
        self.devices.lock().permission = permission;
    }

    /// Mark devices of `kind` as held by another application
    pub fn set_busy(&self, kind: TrackKind, busy: bool) {
        let mut devices = self.devices.lock();
        devices.busy.retain(|k| *k != kind);
        if busy {
            devices.busy.push(kind);
        }
    }

    /// Every track handed out so far, in order
    pub fn opened_tracks(&self) -> Vec<OpenedTrack> {
        self.opened.lock().clone()
    }

    fn pick_camera(
        devices: &SyntheticDevices,
        video: &VideoConstraints,
    ) -> Result<FacingMode, CaptureError> {
        if devices.cameras.is_empty() {
            return Err(CaptureError::DeviceNotFound("no camera available".to_string()));
        }
        if devices.cameras.contains(&video.facing_mode) {
            return Ok(video.facing_mode);
        }
        if video.require_facing {
            return Err(CaptureError::ConstraintsNotSatisfiable(format!(
                "no camera facing {:?}",
                video.facing_mode
            )));
        }
        Ok(devices.cameras[0])
    }
}

#[async_trait]
impl CaptureFacility for SyntheticCaptureFacility {
    async fn open(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Vec<LocalTrack>, CaptureError> {
        let devices = self.devices.lock().clone();

        if !devices.secure_context {
            return Err(CaptureError::PlatformUnsupported(
                "capture requires a secure context".to_string(),
            ));
        }
        constraints
            .check()
            .map_err(CaptureError::ConstraintsNotSatisfiable)?;
        if devices.permission == PermissionState::Denied {
            return Err(CaptureError::PermissionDenied(
                "user denied camera/microphone access".to_string(),
            ));
        }
        if constraints.wants_audio() && !devices.has_microphone {
            return Err(CaptureError::DeviceNotFound("no microphone available".to_string()));
        }
        let camera = match &constraints.video {
            Some(video) => Some(Self::pick_camera(&devices, video)?),
            None => None,
        };
        for kind in &devices.busy {
            let requested = match kind {
                TrackKind::Audio => constraints.wants_audio(),
                TrackKind::Video => constraints.wants_video(),
            };
            if requested {
                return Err(CaptureError::DeviceBusy(format!(
                    "{} input is in use by another application",
                    kind
                )));
            }
        }

        let stream_id = format!("stream-{}", uuid::Uuid::new_v4());
        let mut tracks = Vec::new();

        if let Some(audio) = &constraints.audio {
            tracks.push(LocalTrack::new(
                TrackKind::Audio,
                "Synthetic Microphone",
                stream_id.clone(),
                None,
                TrackSettings {
                    echo_cancellation: Some(audio.echo_cancellation),
                    noise_suppression: Some(audio.noise_suppression),
                    auto_gain_control: Some(audio.auto_gain_control),
                    ..Default::default()
                },
            ));
        }

        if let (Some(video), Some(facing)) = (&constraints.video, camera) {
            let label = match facing {
                FacingMode::User => "Synthetic Front Camera",
                FacingMode::Environment => "Synthetic Rear Camera",
            };
            tracks.push(LocalTrack::new(
                TrackKind::Video,
                label,
                stream_id.clone(),
                Some(facing),
                TrackSettings {
                    width: Some(video.width.min(devices.max_width)),
                    height: Some(video.height.min(devices.max_height)),
                    frame_rate: Some(video.frame_rate.min(devices.max_frame_rate)),
                    ..Default::default()
                },
            ));
        }

        {
            let mut opened = self.opened.lock();
            for track in &tracks {
                opened.push(OpenedTrack {
                    id: track.id().to_string(),
                    kind: track.kind(),
                    facing_mode: track.facing_mode(),
                });
            }
        }

        debug!("Synthetic facility opened {} track(s) on {}", tracks.len(), stream_id);
        Ok(tracks)
    }

    async fn video_input_count(&self) -> Result<usize, CaptureError> {
        let devices = self.devices.lock();
        if !devices.secure_context {
            return Err(CaptureError::PlatformUnsupported(
                "capture requires a secure context".to_string(),
            ));
        }
        Ok(devices.cameras.len())
    }
}
