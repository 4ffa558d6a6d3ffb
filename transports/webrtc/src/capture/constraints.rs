//! Capture constraints

use serde::{Deserialize, Serialize};

/// Camera facing direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Front camera, facing the user
    User,
    /// Rear camera, facing away from the user
    Environment,
}

impl FacingMode {
    pub fn opposite(self) -> Self {
        match self {
            FacingMode::User => FacingMode::Environment,
            FacingMode::Environment => FacingMode::User,
        }
    }
}

/// Requested video capture profile
///
/// Resolution and frame rate are hints; a device may deliver less. Facing
/// mode is a preference unless `require_facing` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub facing_mode: FacingMode,
    #[serde(default)]
    pub require_facing: bool,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: 30,
            facing_mode: FacingMode::User,
            require_facing: false,
        }
    }
}

/// Requested audio processing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Requested capture profile; `None` disables that kind
///
/// The default is 720p/30fps from the front camera plus echo-cancelled audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    pub video: Option<VideoConstraints>,
    pub audio: Option<AudioConstraints>,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            video: Some(VideoConstraints::default()),
            audio: Some(AudioConstraints::default()),
        }
    }
}

impl CaptureConstraints {
    /// Voice-only profile
    pub fn audio_only() -> Self {
        Self {
            video: None,
            audio: Some(AudioConstraints::default()),
        }
    }

    /// Video-only profile from the given camera, used for camera switching
    pub(crate) fn video_from(mut video: VideoConstraints, facing_mode: FacingMode) -> Self {
        video.facing_mode = facing_mode;
        video.require_facing = true;
        Self {
            video: Some(video),
            audio: None,
        }
    }

    pub fn wants_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn wants_video(&self) -> bool {
        self.video.is_some()
    }

    /// Neither audio nor video requested
    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }

    /// Check the constraints are internally consistent
    pub fn check(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("at least one of audio or video must be requested".to_string());
        }
        if let Some(video) = &self.video {
            if video.width == 0 || video.height == 0 {
                return Err(format!(
                    "video resolution {}x{} is not capturable",
                    video.width, video.height
                ));
            }
            if video.frame_rate == 0 {
                return Err("video frame rate must be positive".to_string());
            }
        }
        Ok(())
    }
}
