//! Local capture: constraints, tracks, the platform boundary and the manager
//! that owns the tracks during a call.

pub mod constraints;
pub mod facility;
pub mod manager;
pub mod track;

pub use constraints::{AudioConstraints, CaptureConstraints, FacingMode, VideoConstraints};
pub use facility::{CaptureFacility, OpenedTrack, PermissionState, SyntheticCaptureFacility};
pub use manager::CaptureManager;
pub use track::{LocalMedia, LocalTrack, RemoteMedia, RemoteTrack, TrackKind, TrackSettings};
