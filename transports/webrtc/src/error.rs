//! Error types for the call session

/// Result type alias using the crate-level [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Failures while acquiring local capture devices
///
/// Device variants are terminal for the current capture attempt: the session
/// publishes `Failed` with the error's display text and nothing is retried.
/// `CallInProgress` is a precondition failure and changes nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// The user or the platform refused access to camera/microphone
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No device of a requested kind exists
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The device exists but another application holds it
    #[error("Device busy: {0}")]
    DeviceBusy(String),

    /// The requested constraints cannot be met by any device
    #[error("Constraints not satisfiable: {0}")]
    ConstraintsNotSatisfiable(String),

    /// Capture is unavailable in this environment (e.g. insecure context)
    #[error("Platform unsupported: {0}")]
    PlatformUnsupported(String),

    /// A transport is carrying the current tracks; re-capture is refused
    #[error("Capture is attached to an active call")]
    CallInProgress,
}

impl CaptureError {
    /// Actionable message for the user, one per failure kind
    pub fn user_message(&self) -> &'static str {
        match self {
            CaptureError::PermissionDenied(_) => {
                "Enable camera and microphone permission in settings to start the call."
            }
            CaptureError::DeviceNotFound(_) => {
                "No camera or microphone was found on this device."
            }
            CaptureError::DeviceBusy(_) => {
                "Your camera or microphone is in use by another app. Close it and try again."
            }
            CaptureError::ConstraintsNotSatisfiable(_) => {
                "Your camera does not support the requested video settings."
            }
            CaptureError::PlatformUnsupported(_) => {
                "Calls are not supported in this environment."
            }
            CaptureError::CallInProgress => {
                "End the current call before changing camera or microphone settings."
            }
        }
    }
}

/// Failures of [`switch_camera`](crate::CallSession::switch_camera)
///
/// On every variant the previously active video track is left untouched.
#[derive(Debug, thiserror::Error)]
pub enum SwitchError {
    /// Fewer than two video inputs are available
    #[error("Camera switching is not supported on this platform")]
    NotSupportedOnPlatform,

    /// There is no video track to switch away from
    #[error("No active video track")]
    NoActiveVideoTrack,

    /// Opening the replacement camera failed
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// The transport refused to swap the outgoing track
    #[error("Track replacement failed: {0}")]
    TrackReplace(String),
}

/// Offer/answer and candidate exchange failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    /// A negotiation call was made before `initialize_peer_session`
    #[error("Transport not initialized")]
    TransportNotInitialized,

    /// The transport rejected a local or remote session description
    #[error("Session description rejected: {0}")]
    DescriptionRejected(String),

    /// A remote candidate could not be applied (non-fatal)
    #[error("ICE candidate rejected: {0}")]
    CandidateRejected(String),
}

impl NegotiationError {
    /// Whether this error leaves the session usable
    pub fn is_fatal(&self) -> bool {
        matches!(self, NegotiationError::DescriptionRejected(_))
    }
}

/// Failures of `initialize_peer_session`
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    /// The transport object could not be created
    #[error("Failed to create transport: {0}")]
    TransportCreation(String),

    /// A local track could not be attached to the new transport
    #[error("Failed to attach local track: {0}")]
    TrackAttach(String),
}

/// Errors reported by a [`PeerTransport`](crate::peer::PeerTransport)
/// implementation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The operation is not valid in the transport's current negotiation state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A description or candidate payload was malformed or incompatible
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The underlying transport has been closed
    #[error("Transport closed")]
    Closed,

    /// Any other failure inside the WebRTC stack
    #[error("WebRTC error: {0}")]
    WebRtc(String),
}

/// Crate-level error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Capture failure
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// Camera switch failure
    #[error(transparent)]
    Switch(#[from] SwitchError),

    /// Negotiation failure
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    /// Session initialization failure
    #[error(transparent)]
    Init(#[from] InitError),

    /// Transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl Error {
    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Check if the caller may simply log this error and carry on with the call
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Negotiation(NegotiationError::CandidateRejected(_))
                | Error::Switch(_)
                | Error::MediaTrackError(_)
        )
    }
}
