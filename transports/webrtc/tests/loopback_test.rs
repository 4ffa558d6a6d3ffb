//! End-to-end call over the real `webrtc` stack
//!
//! Two sessions in one process, signaling relayed over channels. Ignored by
//! default: it binds UDP sockets and contacts the configured STUN/TURN
//! servers. Run with `cargo test --test loopback_test -- --ignored`.

mod harness;

use harness::{init_tracing, StateRecorder};
use rendezvous_call::{
    CallSession, ConnectionState, SessionConfig, SignalingMessage, SyntheticCaptureFacility,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

async fn relay(
    mut inbound: mpsc::UnboundedReceiver<SignalingMessage>,
    to: CallSession,
    reply: mpsc::UnboundedSender<SignalingMessage>,
) {
    let mut pending = Vec::new();
    let mut has_remote = false;
    while let Some(message) = inbound.recv().await {
        match message {
            SignalingMessage::IceCandidate(candidate) if !has_remote => pending.push(candidate),
            SignalingMessage::IceCandidate(candidate) => {
                if let Err(e) = to.add_remote_candidate(candidate).await {
                    debug!("Remote candidate dropped: {}", e);
                }
            }
            description => {
                if let Ok(answer) = to.handle_signaling_message(description).await {
                    has_remote = true;
                    for candidate in pending.drain(..) {
                        if let Err(e) = to.add_remote_candidate(candidate).await {
                            debug!("Buffered candidate dropped: {}", e);
                        }
                    }
                    if let Some(answer) = answer {
                        let _ = reply.send(answer);
                    }
                }
            }
        }
    }
}

#[tokio::test]
#[ignore = "binds UDP sockets and contacts public ICE servers"]
async fn test_loopback_call_connects() {
    init_tracing();

    let session = || {
        CallSession::new(
            SessionConfig::default(),
            Arc::new(SyntheticCaptureFacility::new()),
        )
        .unwrap()
    };
    let caller = session();
    let callee = session();
    let caller_states = StateRecorder::attach(&caller).await;
    let callee_states = StateRecorder::attach(&callee).await;

    let (to_callee, callee_inbox) = mpsc::unbounded_channel();
    let (to_caller, caller_inbox) = mpsc::unbounded_channel();
    {
        let to_callee = to_callee.clone();
        caller
            .set_signaling_callback(move |m| {
                let _ = to_callee.send(m);
            })
            .await;
    }
    {
        let to_caller = to_caller.clone();
        callee
            .set_signaling_callback(move |m| {
                let _ = to_caller.send(m);
            })
            .await;
    }
    tokio::spawn(relay(callee_inbox, callee.clone(), to_caller));
    tokio::spawn(relay(caller_inbox, caller.clone(), to_callee.clone()));

    for session in [&caller, &callee] {
        session.request_capture_default().await.unwrap();
        session.initialize_peer_session().await.unwrap();
    }
    let offer = caller.create_offer().await.unwrap();
    assert!(offer.sdp.contains("m=audio"));
    assert!(offer.sdp.contains("m=video"));
    to_callee.send(SignalingMessage::Offer(offer)).unwrap();

    caller_states
        .wait_for(|s| s.status == ConnectionState::Connected)
        .await;
    callee_states
        .wait_for(|s| s.status == ConnectionState::Connected)
        .await;

    caller.cleanup().await;
    callee.cleanup().await;
    assert_eq!(caller.state().await, ConnectionState::Closed);
    assert_eq!(callee.state().await, ConnectionState::Closed);
}
