//! End-to-end scenarios driven through the `Runtime` facade
//! against the mock adapters and the in-memory store. S4 (heartbeat stall)
//! and S5 (atomic publish) exercise `BuildMonitor` directly and are covered
//! by `streamctl-build-monitor`'s own test suite, not duplicated here since
//! this crate never wires the build monitor into the per-session start path
//! (see `DESIGN.md`).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use streamctl_adapters::{
    InMemoryEventBus, MockBehavior, MockFs, MockTranscoderFactory, MockTunerFactory,
    StartSessionEvent, StopSessionEvent,
};
use streamctl_metrics::{InMemoryRecorder, RecordedMetric, StartResult};
use streamctl_orchestrator::{OrchestratorConfig, OrchestratorDeps};
use streamctl_runtime::{new_correlation_id, Runtime};
use streamctl_store::{InMemoryStateStore, StateStore};
use streamctl_types::{Mode, ProfileSpec, ReasonCode, SessionId, SessionRecord, SessionState};

fn session_dir(hls_root: &str, id: &str) -> PathBuf {
    PathBuf::from(hls_root).join("sessions").join(id)
}

async fn seed_ready_playlist(fs: &MockFs, hls_root: &str, id: &str) {
    let dir = session_dir(hls_root, id);
    fs.write(&dir.join("index.m3u8"), b"#EXTM3U\nseg0.ts\n").await.unwrap();
    fs.write(&dir.join("seg0.ts"), b"mock-segment-bytes").await.unwrap();
}

fn runtime(
    tuner_slots: Vec<u32>,
    recorder: Arc<InMemoryRecorder>,
) -> (Runtime<InMemoryStateStore, InMemoryEventBus, MockFs>, Arc<MockFs>, Arc<InMemoryStateStore>) {
    let store = Arc::new(InMemoryStateStore::new());
    let fs = Arc::new(MockFs::new());
    let deps = OrchestratorDeps {
        store: store.clone(),
        bus: Arc::new(InMemoryEventBus::new(64)),
        fs: fs.clone(),
        tuner_factory: Arc::new(MockTunerFactory::always_succeeds()),
        transcoder_factory: Arc::new(MockTranscoderFactory::new(MockBehavior::RunsUntilStopped)),
        recorder,
    };
    let config = OrchestratorConfig { hls_root: "/hls".into(), tuner_slots, ..Default::default() };
    (Runtime::new(deps, config), fs, store)
}

async fn wait_until<F: Fn() -> bool>(predicate: F, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return;
        }
        assert!(tokio::time::Instant::now() < deadline, "condition never became true");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn start_event(id: &str, service_ref: &str) -> StartSessionEvent {
    StartSessionEvent {
        session_id: SessionId::parse(id).unwrap(),
        service_ref: service_ref.to_string(),
        profile_id: "auto".to_string(),
        start_ms: 0,
        correlation_id: new_correlation_id(),
    }
}

// S1: happy path live session, start through to a running,
// playlist-ready pipeline, then a clean stop.
#[tokio::test]
async fn s1_happy_live_session_reaches_ready_then_stops_cleanly() {
    let recorder = Arc::new(InMemoryRecorder::new());
    let (rt, fs, store) = runtime(vec![0, 1], recorder.clone());
    rt.recover_and_spawn().unwrap();

    seed_ready_playlist(&fs, "/hls", "live1").await;
    rt.submit_start(start_event("live1", "bbc1")).await;

    wait_until(
        || {
            store
                .get_session(&SessionId::parse("live1").unwrap())
                .unwrap()
                .map(|r| r.state == SessionState::Ready)
                .unwrap_or(false)
        },
        Duration::from_secs(2),
    )
    .await;

    let record = store.get_session(&SessionId::parse("live1").unwrap()).unwrap().unwrap();
    assert_eq!(record.mode(), Mode::Live);
    assert_eq!(
        recorder.count_matching(|m| matches!(m, RecordedMetric::SessionStart { result: StartResult::Success, .. })),
        1
    );

    rt.submit_stop(StopSessionEvent {
        session_id: SessionId::parse("live1").unwrap(),
        reason: ReasonCode::ClientStop,
        correlation_id: new_correlation_id(),
    })
    .await;

    wait_until(
        || {
            store
                .get_session(&SessionId::parse("live1").unwrap())
                .unwrap()
                .map(|r| r.state.is_terminal())
                .unwrap_or(false)
        },
        Duration::from_secs(2),
    )
    .await;

    let record = store.get_session(&SessionId::parse("live1").unwrap()).unwrap().unwrap();
    assert_eq!(record.state, SessionState::Stopped);
    assert_eq!(record.reason, ReasonCode::ClientStop);

    rt.shutdown(Duration::from_secs(2)).await;
}

// S2: tuner contention. One slot, two distinct channels started
// concurrently; the second has nothing to acquire and fails busy.
#[tokio::test]
async fn s2_tuner_contention_second_session_fails_with_lease_busy() {
    let recorder = Arc::new(InMemoryRecorder::new());
    let (rt, fs, store) = runtime(vec![0], recorder.clone());
    rt.recover_and_spawn().unwrap();

    seed_ready_playlist(&fs, "/hls", "a").await;
    rt.submit_start(start_event("a", "bbc1")).await;

    wait_until(
        || {
            store
                .get_session(&SessionId::parse("a").unwrap())
                .unwrap()
                .map(|r| r.state == SessionState::Ready)
                .unwrap_or(false)
        },
        Duration::from_secs(2),
    )
    .await;

    // Second channel, no free tuner slot left.
    rt.submit_start(start_event("b", "itv1")).await;

    wait_until(
        || {
            store
                .get_session(&SessionId::parse("b").unwrap())
                .unwrap()
                .map(|r| r.state == SessionState::Failed)
                .unwrap_or(false)
        },
        Duration::from_secs(2),
    )
    .await;

    let failed = store.get_session(&SessionId::parse("b").unwrap()).unwrap().unwrap();
    assert_eq!(failed.reason, ReasonCode::LeaseBusy);
    assert_eq!(
        recorder.count_matching(|m| matches!(
            m,
            RecordedMetric::SessionStart { result: StartResult::Busy, reason: ReasonCode::LeaseBusy, .. }
        )),
        1
    );

    rt.shutdown(Duration::from_secs(2)).await;
}

// S3: dedup replay. Two distinct session ids racing the same
// service_ref; the loser gets zero side effects (finalize never writes its
// record past `New`), the winner proceeds normally.
#[tokio::test]
async fn s3_dedup_replay_loser_gets_no_side_effects() {
    let recorder = Arc::new(InMemoryRecorder::new());
    let (rt, fs, store) = runtime(vec![0, 1, 2], recorder.clone());
    rt.recover_and_spawn().unwrap();

    seed_ready_playlist(&fs, "/hls", "winner").await;
    seed_ready_playlist(&fs, "/hls", "loser").await;

    // Pre-acquire the dedup lease as if "winner" already holds it, so
    // "loser"'s attempt deterministically loses the race rather than
    // depending on task scheduling order.
    let dedup_key = streamctl_types::LeaseKey::service("bbc1");
    store.try_acquire_lease(&dedup_key, "winner", chrono::Duration::seconds(30)).unwrap();

    rt.submit_start(start_event("loser", "bbc1")).await;

    wait_until(
        || {
            recorder.count_matching(|m| {
                matches!(m, RecordedMetric::SessionStart { result: StartResult::Busy, reason: ReasonCode::LeaseBusy, .. })
            }) > 0
        },
        Duration::from_secs(2),
    )
    .await;

    // Zero side effects: the loser's record, created at intake, is left
    // exactly in `New` — finalize's dedup-busy branch never touched it.
    let loser = store.get_session(&SessionId::parse("loser").unwrap()).unwrap().unwrap();
    assert_eq!(loser.state, SessionState::New);

    store.release_lease(&dedup_key, "winner").unwrap();
    rt.submit_start(start_event("winner", "bbc1")).await;

    wait_until(
        || {
            store
                .get_session(&SessionId::parse("winner").unwrap())
                .unwrap()
                .map(|r| r.state == SessionState::Ready)
                .unwrap_or(false)
        },
        Duration::from_secs(2),
    )
    .await;

    rt.shutdown(Duration::from_secs(2)).await;
}

// S6: recovery sweep. A crash leaves non-terminal sessions and
// stale leases behind; startup recovery flushes every lease and resets
// every non-terminal record to `New`, marking it recovered.
#[tokio::test]
async fn s6_recovery_resets_non_terminal_sessions_and_flushes_leases() {
    let recorder = Arc::new(InMemoryRecorder::new());
    let (rt, _fs, store) = runtime(vec![0], recorder);

    let mut record = SessionRecord::new(SessionId::parse("crashed").unwrap(), "bbc1", ProfileSpec::Default, Mode::Live);
    record.state = SessionState::Priming;
    record.context.set_tuner_slot(0);
    store.put_session(record).unwrap();
    store.try_acquire_lease(&streamctl_types::LeaseKey::tuner(0), "crashed", chrono::Duration::seconds(30)).unwrap();

    let reset = rt.recover_and_spawn().unwrap();
    assert_eq!(reset, vec![SessionId::parse("crashed").unwrap()]);

    let recovered = store.get_session(&SessionId::parse("crashed").unwrap()).unwrap().unwrap();
    assert_eq!(recovered.state, SessionState::New);
    assert!(recovered.context.is_recovered());

    // The stale tuner lease was flushed, so a fresh start can reacquire slot 0.
    let (lease, acquired) =
        store.try_acquire_lease(&streamctl_types::LeaseKey::tuner(0), "someone-else", chrono::Duration::seconds(30)).unwrap();
    assert!(acquired);
    assert_eq!(lease.owner, "someone-else");

    rt.shutdown(Duration::from_secs(2)).await;
}
