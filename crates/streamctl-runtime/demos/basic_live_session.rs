//! Wire a `Runtime` end to end against the in-memory store/bus and the mock
//! tuner/transcoder adapters, start one LIVE session, and watch it reach
//! `Ready` before stopping it.
//!
//! Run with: cargo run -p streamctl-runtime --example basic_live_session

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use streamctl_adapters::{
    Fs, InMemoryEventBus, MockBehavior, MockFs, MockTranscoderFactory, MockTunerFactory,
    StartSessionEvent, StopSessionEvent,
};
use streamctl_metrics::NullRecorder;
use streamctl_orchestrator::{OrchestratorConfig, OrchestratorDeps};
use streamctl_runtime::{init_tracing, new_correlation_id, Runtime};
use streamctl_store::{InMemoryStateStore, StateStore};
use streamctl_types::{ReasonCode, SessionId, SessionState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let hls_root = PathBuf::from("/hls");
    let store = Arc::new(InMemoryStateStore::new());
    let fs = Arc::new(MockFs::new());

    let deps = OrchestratorDeps {
        store: store.clone(),
        bus: Arc::new(InMemoryEventBus::new(64)),
        fs: fs.clone(),
        tuner_factory: Arc::new(MockTunerFactory::always_succeeds()),
        transcoder_factory: Arc::new(MockTranscoderFactory::new(MockBehavior::RunsUntilStopped)),
        recorder: Arc::new(NullRecorder),
    };
    let config = OrchestratorConfig { hls_root: hls_root.clone(), tuner_slots: vec![0, 1], ..Default::default() };
    let runtime = Runtime::new(deps, config);

    let reset = runtime.recover_and_spawn()?;
    println!("startup recovery reset {} stale session(s)", reset.len());

    let session_id = SessionId::parse("demo-bbc1")?;

    // A real deployment's ffmpeg/packager would write these; the mock
    // transcoder never touches disk on its own, so the demo seeds the
    // playlist the orchestrator is waiting on.
    let session_dir = hls_root.join("sessions").join(session_id.as_str());
    fs.write(&session_dir.join("index.m3u8"), b"#EXTM3U\nseg0.ts\n").await?;
    fs.write(&session_dir.join("seg0.ts"), b"mock-segment-bytes").await?;

    runtime
        .submit_start(StartSessionEvent {
            session_id: session_id.clone(),
            service_ref: "bbc1".to_string(),
            profile_id: "auto".to_string(),
            start_ms: 0,
            correlation_id: new_correlation_id(),
        })
        .await;

    for _ in 0..50 {
        if let Some(record) = store.get_session(&session_id)? {
            if record.state == SessionState::Ready {
                println!("session reached Ready on tuner slot {:?}", record.context.tuner_slot());
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    runtime
        .submit_stop(StopSessionEvent {
            session_id: session_id.clone(),
            reason: ReasonCode::ClientStop,
            correlation_id: new_correlation_id(),
        })
        .await;

    for _ in 0..50 {
        if let Some(record) = store.get_session(&session_id)? {
            if record.state.is_terminal() {
                println!("session finalized as {:?} ({:?})", record.state, record.reason);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    runtime.shutdown(Duration::from_secs(2)).await;
    Ok(())
}
