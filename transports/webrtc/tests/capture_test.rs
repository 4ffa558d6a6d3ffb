//! Integration tests for capture control during a call
//!
//! Covers mute / camera toggles, voice-only calls and the camera switch
//! against the in-memory transport.

mod harness;

use harness::{default_call, fast_config, session_with};
use rendezvous_call::capture::TrackKind;
use rendezvous_call::{
    CaptureError, ConnectionState, FacingMode, SwitchError, SyntheticCaptureFacility,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[tokio::test]
async fn test_toggles_keep_track_identity() {
    let call = default_call().await;
    call.connect().await;
    let before = call.recorder.statuses();

    let media = call.session.snapshot().await.local_media.unwrap();
    let audio = Arc::clone(media.audio_track().unwrap());
    let video = Arc::clone(media.video_track().unwrap());

    call.session.toggle_audio(false).await;
    call.session.toggle_video(false).await;
    assert!(!audio.is_enabled());
    assert!(!video.is_enabled());
    assert!(audio.is_live() && video.is_live());

    call.session.toggle_audio(true).await;
    call.session.toggle_video(true).await;
    assert!(audio.is_enabled() && video.is_enabled());

    let after = call.session.snapshot().await.local_media.unwrap();
    assert!(Arc::ptr_eq(after.audio_track().unwrap(), &audio));
    assert!(Arc::ptr_eq(after.video_track().unwrap(), &video));
    assert_eq!(call.recorder.statuses(), before);
    assert!(call.factory.latest().record().replaced.is_empty());
}

#[tokio::test]
async fn test_audio_only_call() {
    let call = default_call().await;
    let media = call.session.request_audio_only().await.unwrap();
    assert!(media.video_track().is_none());
    assert!(media.audio_track().unwrap().is_enabled());

    // No camera to turn off or switch
    call.session.toggle_video(false).await;
    assert!(matches!(
        call.session.switch_camera().await,
        Err(SwitchError::NoActiveVideoTrack)
    ));

    call.session.initialize_peer_session().await.unwrap();
    let attached = call.factory.latest().record().attached;
    assert_eq!(attached.len(), 1);
    assert_eq!(attached[0].0, TrackKind::Audio);
}

#[tokio::test]
async fn test_audio_only_without_camera() {
    let call = session_with(
        fast_config(),
        SyntheticCaptureFacility::new().with_cameras(vec![]),
    )
    .await;

    let err = call.session.request_capture_default().await.unwrap_err();
    assert!(matches!(err, CaptureError::DeviceNotFound(_)));

    call.session.request_audio_only().await.unwrap();
    assert_eq!(call.session.state().await, ConnectionState::RequestingPermissions);
}

#[tokio::test]
async fn test_busy_device_reports_distinct_message() {
    let facility = SyntheticCaptureFacility::new();
    facility.set_busy(TrackKind::Audio, true);
    let call = session_with(fast_config(), facility).await;

    let err = call.session.request_capture_default().await.unwrap_err();
    assert!(matches!(err, CaptureError::DeviceBusy(_)));
    assert!(err.user_message().contains("in use"));
    assert_ne!(
        err.user_message(),
        CaptureError::PermissionDenied(String::new()).user_message()
    );
}

#[tokio::test]
async fn test_switch_camera_replaces_sender_track() {
    let call = default_call().await;
    call.connect().await;

    let old = Arc::clone(
        call.session
            .snapshot()
            .await
            .local_media
            .unwrap()
            .video_track()
            .unwrap(),
    );
    assert_eq!(old.facing_mode(), Some(FacingMode::User));

    call.session.switch_camera().await.unwrap();

    let media = call.session.snapshot().await.local_media.unwrap();
    let new = media.video_track().unwrap();
    assert!(!old.is_live());
    assert!(new.is_live());
    assert_eq!(new.facing_mode(), Some(FacingMode::Environment));
    assert_eq!(
        call.factory.latest().record().replaced,
        vec![(TrackKind::Video, new.id().to_string())]
    );
    // No renegotiation
    assert_eq!(call.factory.latest().record().offers, vec![false]);
    assert_eq!(call.session.state().await, ConnectionState::Connected);

    call.session.switch_camera().await.unwrap();
    let back = call.session.snapshot().await.local_media.unwrap();
    assert_eq!(
        back.video_track().unwrap().facing_mode(),
        Some(FacingMode::User)
    );
}

#[tokio::test]
async fn test_switch_camera_is_atomic_on_replace_failure() {
    let call = default_call().await;
    call.connect().await;
    let old = Arc::clone(
        call.session
            .snapshot()
            .await
            .local_media
            .unwrap()
            .video_track()
            .unwrap(),
    );

    call.factory.latest().fail_replace.store(true, Ordering::SeqCst);
    let err = call.session.switch_camera().await.unwrap_err();
    assert!(matches!(err, SwitchError::TrackReplace(_)));

    let held = call.session.snapshot().await.local_media.unwrap();
    assert!(Arc::ptr_eq(held.video_track().unwrap(), &old));
    assert!(old.is_live());
    assert_eq!(call.session.state().await, ConnectionState::Connected);

    // The rear camera was opened and then released
    let opened = call.facility.opened_tracks();
    let rear = opened.last().unwrap();
    assert_eq!(rear.facing_mode, Some(FacingMode::Environment));
    assert_ne!(rear.id, old.id());
}

#[tokio::test]
async fn test_switch_camera_needs_two_cameras() {
    let call = session_with(
        fast_config(),
        SyntheticCaptureFacility::new().with_cameras(vec![FacingMode::User]),
    )
    .await;
    call.connect().await;

    assert!(matches!(
        call.session.switch_camera().await,
        Err(SwitchError::NotSupportedOnPlatform)
    ));
    let media = call.session.snapshot().await.local_media.unwrap();
    assert!(media.video_track().unwrap().is_live());
    assert!(call.factory.latest().record().replaced.is_empty());
}

#[tokio::test]
async fn test_switch_camera_before_transport() {
    let call = default_call().await;
    call.session.request_capture_default().await.unwrap();

    call.session.switch_camera().await.unwrap();
    let media = call.session.snapshot().await.local_media.unwrap();
    assert_eq!(
        media.video_track().unwrap().facing_mode(),
        Some(FacingMode::Environment)
    );

    // The switched camera is what gets attached
    call.session.initialize_peer_session().await.unwrap();
    let attached = call.factory.latest().record().attached;
    assert!(attached
        .iter()
        .any(|(kind, id)| *kind == TrackKind::Video && id == media.video_track().unwrap().id()));
}

#[tokio::test]
async fn test_recapture_stops_previous_tracks() {
    let call = default_call().await;
    let first = call.session.request_capture_default().await.unwrap();
    let second = call.session.request_capture_default().await.unwrap();

    assert!(first.tracks().all(|t| !t.is_live()));
    assert!(second.tracks().all(|t| t.is_live()));
    // Already past Idle, so no second RequestingPermissions
    assert_eq!(
        call.recorder.statuses(),
        vec![ConnectionState::RequestingPermissions]
    );
}

#[tokio::test]
async fn test_recapture_during_call_is_refused() {
    let call = default_call().await;
    call.connect().await;
    let before = call.recorder.statuses();
    let media = call.session.snapshot().await.local_media.unwrap();

    let err = call.session.request_capture_default().await.unwrap_err();
    assert_eq!(err, CaptureError::CallInProgress);

    // The tracks on the senders stay live and held
    assert!(media.tracks().all(|t| t.is_live()));
    let held = call.session.snapshot().await.local_media.unwrap();
    let video = held.video_track().unwrap();
    assert!(Arc::ptr_eq(video, media.video_track().unwrap()));
    let attached = call.factory.latest().record().attached;
    assert!(attached
        .iter()
        .any(|(kind, id)| *kind == TrackKind::Video && id == video.id()));
    assert_eq!(call.recorder.statuses(), before);
    assert_eq!(call.session.state().await, ConnectionState::Connected);
}
