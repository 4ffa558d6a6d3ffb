//! Loopback call between two in-process sessions
//!
//! Both participants use synthetic capture; signaling is relayed over
//! in-memory channels as JSON, exactly as a real relay would carry it.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin call_loopback --features cli
//!
//! # Voice call on the mobile preset, switching camera is skipped
//! cargo run --bin call_loopback --features cli -- --audio-only --preset mobile-network
//!
//! # Stay connected for 10s and flip the caller's camera halfway
//! RUST_LOG=rendezvous_call=debug cargo run --bin call_loopback --features cli -- \
//!   --hold-secs 10 --switch-camera
//! ```

use anyhow::{bail, Context};
use bytes::Bytes;
use clap::Parser;
use rendezvous_call::{
    CallSession, ConnectionState, IceCandidate, LocalTrack, SessionConfig, SignalingMessage,
    SyntheticCaptureFacility, TrackKind,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use webrtc::media::Sample;

/// Run a two-party call against itself
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Seconds to wait for both sides to reach `connected`
    #[arg(long, default_value_t = 30, env = "CALL_LOOPBACK_TIMEOUT")]
    timeout_secs: u64,

    /// Seconds to keep the call up once connected
    #[arg(long, default_value_t = 3, env = "CALL_LOOPBACK_HOLD")]
    hold_secs: u64,

    /// Capture audio only
    #[arg(long, default_value_t = false)]
    audio_only: bool,

    /// Flip the caller's camera while the call is up
    #[arg(long, default_value_t = false)]
    switch_camera: bool,

    /// Configuration preset
    #[arg(long, env = "CALL_LOOPBACK_PRESET")]
    preset: Option<ConfigPreset>,

    /// Override the ICE-restart budget
    #[arg(long, env = "CALL_LOOPBACK_MAX_RECONNECT_ATTEMPTS")]
    max_reconnect_attempts: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum ConfigPreset {
    /// Short backoff and attempt timeout
    LowLatency,
    /// 480p capture and a patient reconnection policy
    MobileNetwork,
}

fn build_config(args: &Args) -> anyhow::Result<SessionConfig> {
    let mut config = match args.preset {
        Some(ConfigPreset::LowLatency) => SessionConfig::low_latency_preset(),
        Some(ConfigPreset::MobileNetwork) => SessionConfig::mobile_network_preset(),
        None => SessionConfig::default(),
    };
    if let Some(max) = args.max_reconnect_attempts {
        config = config.with_max_reconnect_attempts(max);
    }
    config.validate().context("invalid session configuration")?;
    Ok(config)
}

/// One participant plus the watch channel its observer feeds
struct Participant {
    name: &'static str,
    session: CallSession,
    status: watch::Receiver<ConnectionState>,
}

async fn participant(
    name: &'static str,
    config: SessionConfig,
    outbound: mpsc::UnboundedSender<String>,
) -> anyhow::Result<Participant> {
    let session = CallSession::new(config, Arc::new(SyntheticCaptureFacility::new()))?;

    let (status_tx, status_rx) = watch::channel(ConnectionState::Idle);
    session
        .set_state_change_callback(move |snapshot| {
            info!(participant = name, "{}", snapshot.status_line());
            let _ = status_tx.send(snapshot.status);
        })
        .await;

    session
        .set_signaling_callback(move |message| match message.to_json() {
            Ok(json) => {
                let _ = outbound.send(json);
            }
            Err(e) => warn!(participant = name, "Dropping unserializable message: {}", e),
        })
        .await;

    Ok(Participant {
        name,
        session,
        status: status_rx,
    })
}

/// Deliver relay messages to `to` in order
///
/// Candidates that arrive before a remote description are held back and
/// applied once one is set. Answers produced by `to` go out on `reply`.
fn spawn_relay(
    to: CallSession,
    name: &'static str,
    mut inbound: mpsc::UnboundedReceiver<String>,
    reply: mpsc::UnboundedSender<String>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending: Vec<IceCandidate> = Vec::new();
        let mut has_remote = false;

        while let Some(json) = inbound.recv().await {
            let message = match SignalingMessage::from_json(&json) {
                Ok(message) => message,
                Err(e) => {
                    warn!(participant = name, "Malformed relay message: {}", e);
                    continue;
                }
            };

            match message {
                SignalingMessage::IceCandidate(candidate) if !has_remote => {
                    pending.push(candidate)
                }
                SignalingMessage::IceCandidate(candidate) => {
                    if let Err(e) = to.add_remote_candidate(candidate).await {
                        debug!(participant = name, "Remote candidate dropped: {}", e);
                    }
                }
                description => match to.handle_signaling_message(description).await {
                    Ok(answer) => {
                        has_remote = true;
                        for candidate in pending.drain(..) {
                            if let Err(e) = to.add_remote_candidate(candidate).await {
                                debug!(participant = name, "Buffered candidate dropped: {}", e);
                            }
                        }
                        if let Some(answer) = answer {
                            match answer.to_json() {
                                Ok(json) => {
                                    let _ = reply.send(json);
                                }
                                Err(e) => warn!(participant = name, "Cannot relay answer: {}", e),
                            }
                        }
                    }
                    Err(e) => warn!(participant = name, "Negotiation failed: {}", e),
                },
            }
        }
        debug!(participant = name, "Relay closed");
    })
}

/// Feed placeholder payloads into a local track until it is stopped
fn spawn_sample_pump(track: Arc<LocalTrack>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let (payload, frame) = match track.kind() {
            TrackKind::Audio => (
                Bytes::from_static(&[0xf8, 0xff, 0xfe]),
                Duration::from_millis(20),
            ),
            TrackKind::Video => (Bytes::from(vec![0u8; 1200]), Duration::from_millis(33)),
        };
        let mut ticker = tokio::time::interval(frame);

        while track.is_live() {
            ticker.tick().await;
            let sample = Sample {
                data: payload.clone(),
                duration: frame,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                debug!(track_id = %track.id(), "Sample dropped: {}", e);
            }
        }
    })
}

async fn start_media(p: &Participant) {
    if let Some(media) = p.session.snapshot().await.local_media {
        for track in media.tracks() {
            spawn_sample_pump(Arc::clone(track));
        }
    }
}

async fn wait_connected(p: &mut Participant, timeout: Duration) -> anyhow::Result<()> {
    let name = p.name;
    let reached = tokio::time::timeout(
        timeout,
        p.status.wait_for(|s| {
            matches!(s, ConnectionState::Connected | ConnectionState::Failed(_))
        }),
    )
    .await
    .with_context(|| format!("{} did not connect within {:?}", name, timeout))?
    .with_context(|| format!("{} session dropped", name))?
    .clone();

    if let ConnectionState::Failed(reason) = reached {
        bail!("{} failed: {}", name, reason);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    info!(version = rendezvous_call::version(), "call_loopback starting");

    let config = build_config(&args)?;

    let (to_callee_tx, to_callee_rx) = mpsc::unbounded_channel();
    let (to_caller_tx, to_caller_rx) = mpsc::unbounded_channel();

    let mut caller = participant("caller", config.clone(), to_callee_tx.clone()).await?;
    let mut callee = participant("callee", config, to_caller_tx.clone()).await?;

    spawn_relay(callee.session.clone(), "callee", to_callee_rx, to_caller_tx);
    spawn_relay(caller.session.clone(), "caller", to_caller_rx, to_callee_tx.clone());

    for p in [&caller, &callee] {
        if args.audio_only {
            p.session.request_audio_only().await?;
        } else {
            p.session.request_capture_default().await?;
        }
        p.session.initialize_peer_session().await?;
    }

    let offer = caller.session.create_offer().await?;
    to_callee_tx
        .send(SignalingMessage::Offer(offer).to_json()?)
        .context("relay closed")?;

    start_media(&caller).await;
    start_media(&callee).await;

    let timeout = Duration::from_secs(args.timeout_secs);
    wait_connected(&mut caller, timeout).await?;
    wait_connected(&mut callee, timeout).await?;

    let snapshot = callee.session.snapshot().await;
    let remote_tracks = snapshot.remote_media.map(|m| m.tracks().len()).unwrap_or(0);
    info!(remote_tracks, "Both participants connected");

    let hold = Duration::from_secs(args.hold_secs);
    if args.switch_camera && !args.audio_only {
        tokio::time::sleep(hold / 2).await;
        caller.session.switch_camera().await?;
        let switched = caller
            .session
            .snapshot()
            .await
            .local_media
            .and_then(|media| media.video_track().cloned());
        if let Some(video) = switched {
            spawn_sample_pump(video);
        }
        tokio::time::sleep(hold / 2).await;
    } else {
        tokio::time::sleep(hold).await;
    }

    caller.session.toggle_audio(false).await;
    caller.session.cleanup().await;
    callee.session.cleanup().await;

    info!("call_loopback finished");
    Ok(())
}

fn init_tracing() {
    // RUST_LOG support, defaulting to info
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
