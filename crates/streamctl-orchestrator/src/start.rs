//! The start handler: the happy path plus every branch off
//! it, run as one task per inbound `StartSessionEvent`.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration as StdDuration;

use chrono::Utc;
use streamctl_adapters::{EventBus, Fs, StartSessionEvent, Transcoder, TranscoderFactory, Tuner, TunerFactory};
use streamctl_metrics::{ReadyOutcome, Recorder, StartResult};
use streamctl_store::StateStore;
use streamctl_types::{
    Cause, Event, LeaseKey, Mode, ProfileSpec, ReasonCode, ReasonError, RepairStage, SessionId,
    SessionRecord, SessionState,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::finalize::FinalOutcome;
use crate::playlist;
use crate::profile_decision::decide_profile;
use crate::Orchestrator;

/// Derives (mode, source, source_type) from a `service_ref` per this crate's
/// convention: a `recording:` prefix marks a RECORDING-mode session whose
/// source is the remainder of the string (a cache key); anything else is a
/// LIVE session whose source is the `service_ref` itself. Not specified in
/// the wire contract, which only carries `service_ref` — documented as an
/// implementation decision in this crate's design notes.
const RECORDING_PREFIX: &str = "recording:";

fn derive_mode_and_source(service_ref: &str) -> (Mode, String, &'static str) {
    match service_ref.strip_prefix(RECORDING_PREFIX) {
        Some(cache_key) => (Mode::Recording, cache_key.to_string(), "recording"),
        None => (Mode::Live, service_ref.to_string(), "live"),
    }
}

fn initial_profile(profile_id: &str) -> ProfileSpec {
    match profile_id {
        "" | "auto" => ProfileSpec::Default,
        "default" => ProfileSpec::Default,
        "high" => ProfileSpec::High,
        other => ProfileSpec::Custom(other.to_string()),
    }
}

impl<S, B, F> Orchestrator<S, B, F>
where
    S: StateStore + 'static,
    B: EventBus + 'static,
    F: Fs + 'static,
{
    #[instrument(skip(self, event), fields(session_id = %event.session_id, correlation_id = %event.correlation_id))]
    pub(crate) async fn handle_start_event(self: Arc<Self>, event: StartSessionEvent) {
        let StartSessionEvent { session_id, service_ref, profile_id, start_ms, correlation_id } = event;
        let (mode, source, source_type) = derive_mode_and_source(&service_ref);

        let existing = match self.store.get_session(&session_id) {
            Ok(existing) => existing,
            Err(err) => {
                warn!(error = %err, "failed to read session before start");
                return;
            }
        };

        let mut record = match existing {
            Some(record) => record,
            None => {
                let mut record = SessionRecord::new(session_id.clone(), service_ref.clone(), initial_profile(&profile_id), mode);
                record.correlation_id = correlation_id.clone();
                record.context.set_source(source.clone());
                record.context.set_source_type(source_type);
                if let Err(err) = self.store.put_session(record.clone()) {
                    warn!(error = %err, "failed to persist new session");
                    return;
                }
                record
            }
        };

        if record.state != SessionState::New {
            info!(state = ?record.state, "start event for a session already in flight, ignoring");
            return;
        }

        let cancel = CancellationToken::new();
        self.registry.register(session_id.clone(), cancel.clone());
        let failure_signal: Arc<StdMutex<Option<ReasonError>>> = Arc::new(StdMutex::new(None));

        self.run_start(&mut record, mode, start_ms, cancel.clone(), failure_signal.clone()).await;

        self.registry.remove(&session_id);
    }

    /// Drives one session from `New` through to a terminal state. Every
    /// early return in here has already gone through `finalize`.
    async fn run_start(
        self: &Arc<Self>,
        record: &mut SessionRecord,
        mode: Mode,
        start_ms: i64,
        cancel: CancellationToken,
        failure_signal: Arc<StdMutex<Option<ReasonError>>>,
    ) {
        let session_id = record.id.clone();
        let owner = session_id.as_str().to_string();

        // Step 2: LIVE sessions dedup on the service ref so a
        // second start for the same channel loses the race cleanly.
        if mode.is_live() {
            let dedup_key = LeaseKey::service(&record.service_ref);
            match self.store.try_acquire_lease(&dedup_key, &owner, self.config.dedup_lease_ttl()) {
                Ok((_, true)) => {}
                Ok((_, false)) => {
                    self.recorder.session_start(StartResult::Busy, ReasonCode::LeaseBusy, &record.profile, mode);
                    self.finalize(record, FinalOutcome::DedupBusy, mode).await;
                    return;
                }
                Err(err) => {
                    warn!(error = %err, "dedup lease acquisition failed");
                    self.finalize(record, FinalOutcome::Error(ReasonError::new(ReasonCode::Unknown, err.to_string())), mode).await;
                    return;
                }
            }
        }

        // Step 3: RECORDING sessions skip tuner leasing and tuning entirely.
        let tuner_slot = if mode.is_live() {
            match self.acquire_tuner_slot(&owner).await {
                Some(slot) => Some(slot),
                None => {
                    if mode.is_live() {
                        let _ = self.store.release_lease(&LeaseKey::service(&record.service_ref), &owner);
                    }
                    self.recorder.tuner_busy(mode);
                    self.recorder.session_start(StartResult::Busy, ReasonCode::LeaseBusy, &record.profile, mode);
                    self.finalize(record, FinalOutcome::Error(ReasonError::new(ReasonCode::LeaseBusy, "no tuner slot available")), mode).await;
                    return;
                }
            }
        } else {
            None
        };

        // Step 4/5: transition to Starting, stamp context, spawn heartbeat.
        if let Some(slot) = tuner_slot {
            record.context.set_tuner_slot(slot);
        }
        if !self.apply_and_persist(record, Event::Start, mode).await {
            self.release_all_leases(record, mode).await;
            return;
        }

        let heartbeat = tuner_slot.map(|slot| {
            self.spawn_heartbeat(session_id.clone(), owner.clone(), slot, cancel.clone(), failure_signal.clone())
        });

        // Step 6: tune (LIVE only).
        if mode.is_live() {
            let tune_result = tokio::select! {
                _ = cancel.cancelled() => Err(Cause::Cancelled),
                result = tokio::time::timeout(self.config.tune_timeout(), self.tune(&session_id)) => {
                    match result {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(reason)) => Err(Cause::Specific(reason.code, reason.detail)),
                        Err(_) => Err(Cause::DeadlineExceeded),
                    }
                }
            };

            if let Err(cause) = tune_result {
                if let Some(handle) = heartbeat {
                    handle.abort();
                }
                let reason = streamctl_types::classify_reason(cause, true);
                self.recorder.session_start(StartResult::Fail, reason.code, &record.profile, mode);
                self.finalize(record, FinalOutcome::Error(reason), mode).await;
                return;
            }
        }

        if !self.apply_and_persist(record, Event::TuneOk, mode).await {
            if let Some(handle) = heartbeat {
                handle.abort();
            }
            self.release_all_leases(record, mode).await;
            return;
        }

        // Step 7: dedup lease's job is done once we're committed to Priming.
        if mode.is_live() {
            let _ = self.store.release_lease(&LeaseKey::service(&record.service_ref), &owner);
        }

        // Step 7b: pick the transcode profile from probed stream info,
        // unless intake already supplied a concrete (non-auto) choice.
        // RECORDING sessions never hold a tuner to probe, so they keep whatever profile
        // intake supplied.
        if mode.is_live() && matches!(record.profile, ProfileSpec::Default) {
            let info = self.tuner_factory.new_tuner(tuner_slot.unwrap_or(0)).probe().await;
            let (profile, rationale) = decide_profile(&info);
            if profile != record.profile {
                info!(rationale, "profile decision overrides default");
                record.profile = profile;
                let _ = self.store.update_session(&session_id, &mut |r| {
                    r.profile = record.profile.clone();
                    Ok(())
                });
            }
        }

        // Steps 8-11: launch the transcoder, drive it to playlist-readiness
        // or a terminal outcome, with up to two repair retries.
        let outcome = self.drive_pipeline(record, mode, start_ms, &cancel, &failure_signal).await;

        if let Some(handle) = heartbeat {
            handle.abort();
        }

        match outcome {
            DriveOutcome::Ready(transcoder) => {
                self.recorder.session_start(StartResult::Success, ReasonCode::None, &record.profile, mode);
                self.wait_for_end(record, mode, transcoder, &cancel, &failure_signal).await;
            }
            DriveOutcome::Terminal(final_outcome) => {
                self.finalize(record, final_outcome, mode).await;
            }
        }
    }

    async fn acquire_tuner_slot(&self, owner: &str) -> Option<u32> {
        for &slot in &self.config.tuner_slots {
            let key = LeaseKey::tuner(slot);
            match self.store.try_acquire_lease(&key, owner, self.config.lease_ttl()) {
                Ok((_, true)) => return Some(slot),
                Ok((_, false)) => continue,
                Err(err) => {
                    warn!(error = %err, slot, "tuner lease probe failed");
                    continue;
                }
            }
        }
        None
    }

    async fn tune(&self, session_id: &SessionId) -> Result<(), ReasonError> {
        let record = self.store.get_session(session_id).ok().flatten();
        let slot = record.as_ref().and_then(|r| r.context.tuner_slot()).unwrap_or(0);
        let service_ref = record.map(|r| r.service_ref).unwrap_or_default();
        let tuner = self.tuner_factory.new_tuner(slot);
        tuner.tune(&service_ref).await.map_err(|err| {
            let code = err.reason_hint().unwrap_or(ReasonCode::Unknown);
            ReasonError::new(code, err.to_string())
        })
    }

    /// Heartbeat loop ("renews the tuner-slot lease on a fixed
    /// interval; on renewal failure, force-sets Failed(LeaseExpired) and
    /// cancels the session"). Bypasses the FSM on purpose: lease loss must
    /// win regardless of what state the session is mid-transition through.
    fn spawn_heartbeat(
        self: &Arc<Self>,
        session_id: SessionId,
        owner: String,
        slot: u32,
        cancel: CancellationToken,
        failure_signal: Arc<StdMutex<Option<ReasonError>>>,
    ) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let key = LeaseKey::tuner(slot);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(this.config.heartbeat_every()) => {}
                }
                match this.store.renew_lease(&key, &owner, this.config.lease_ttl()) {
                    Ok((_, true)) => continue,
                    Ok((_, false)) | Err(_) => {
                        warn!(session_id = %session_id, slot, "tuner lease lost, force-failing session");
                        let reason = ReasonError::new(ReasonCode::LeaseExpired, "tuner lease renewal failed");
                        let now = Utc::now();
                        let _ = this.store.update_session(&session_id, &mut |r| {
                            r.state = streamctl_types::SessionState::Failed;
                            r.set_terminal(ReasonCode::LeaseExpired, "tuner lease renewal failed");
                            r.touch_access(now);
                            Ok(())
                        });
                        *failure_signal.lock().expect("failure signal mutex poisoned") = Some(reason);
                        let mode = streamctl_types::Mode::Live;
                        this.recorder.lease_lost(mode);
                        cancel.cancel();
                        break;
                    }
                }
            }
        })
    }

    async fn apply_and_persist(&self, record: &mut SessionRecord, event: Event, mode: Mode) -> bool {
        let from = record.state;
        let now = Utc::now();
        let id = record.id.clone();
        let event_copy = event;
        match self.store.update_session(&id, &mut |r| {
            r.apply(event_copy, now);
            Ok(())
        }) {
            Ok(persisted) => {
                let applied = persisted.state != from;
                *record = persisted;
                if applied {
                    self.recorder.fsm_transition(from, record.state, mode);
                }
                applied
            }
            Err(err) => {
                warn!(error = %err, "failed to persist fsm transition");
                false
            }
        }
    }

    async fn release_all_leases(&self, record: &SessionRecord, mode: Mode) {
        let owner = record.id.as_str();
        if mode.is_live() {
            let _ = self.store.release_lease(&LeaseKey::service(&record.service_ref), owner);
            if let Some(slot) = record.context.tuner_slot() {
                let _ = self.store.release_lease(&LeaseKey::tuner(slot), owner);
            }
        }
    }

    /// Runs the transcode-launch / playlist-readiness / repair-retry ladder.
    async fn drive_pipeline(
        self: &Arc<Self>,
        record: &mut SessionRecord,
        mode: Mode,
        start_ms: i64,
        cancel: &CancellationToken,
        failure_signal: &Arc<StdMutex<Option<ReasonError>>>,
    ) -> DriveOutcome {
        let mut attempt_profile = record.profile.clone();
        let mut repair_stage: Option<RepairStage> = None;
        let session_dir = self.config.session_dir(record.id.as_str());

        loop {
            let mut transcoder = self.transcoder_factory.new_transcoder();
            let started = tokio::select! {
                _ = cancel.cancelled() => Err(ReasonError::client_stop()),
                result = transcoder.start(&record.id, record.context.source().unwrap_or(record.service_ref.as_str()), &attempt_profile, start_ms) => {
                    result.map_err(|err| {
                        let code = err.reason_hint().unwrap_or(ReasonCode::FfmpegStartFailed);
                        ReasonError::new(code, err.to_string())
                    })
                }
            };

            if let Some(reason) = started.err() {
                if let Some(pre) = failure_signal.lock().expect("failure signal mutex poisoned").take() {
                    return DriveOutcome::Terminal(FinalOutcome::Error(pre));
                }
                return DriveOutcome::Terminal(FinalOutcome::Error(reason));
            }

            let during_repair = repair_stage.is_some();
            let timeout = self.config.playlist_ready_timeout(during_repair, mode == Mode::Recording);
            let started_at = std::time::Instant::now();

            let ready = tokio::select! {
                _ = cancel.cancelled() => None,
                ready = playlist::poll_until_ready(self.fs.as_ref(), &session_dir, mode, timeout) => ready,
            };

            if cancel.is_cancelled() {
                let _ = transcoder.stop().await;
                if let Some(pre) = failure_signal.lock().expect("failure signal mutex poisoned").take() {
                    return DriveOutcome::Terminal(FinalOutcome::Error(pre));
                }
                return DriveOutcome::Terminal(FinalOutcome::Cancelled);
            }

            if ready.is_some() {
                self.recorder.ready_outcome(ReadyOutcome::Ready, mode);
                self.recorder.ready_duration(ReadyOutcome::Ready, mode, started_at.elapsed().as_secs_f64());
                if !self.apply_and_persist(record, Event::PlaylistReady, mode).await {
                    let _ = transcoder.stop().await;
                    return DriveOutcome::Terminal(FinalOutcome::Error(ReasonError::new(ReasonCode::InvariantViolation, "playlist ready but fsm rejected transition")));
                }
                self.recorder.ttfp(&attempt_profile, mode, started_at.elapsed().as_secs_f64());
                return DriveOutcome::Ready(transcoder);
            }

            // Timed out: classify corruption vs packager failure from the
            // transcoder's recent log output and whatever segments did
            // land on disk.
            let log_lines = transcoder.last_log_lines(50).await;
            let _ = transcoder.stop().await;
            let any_segment = playlist::any_segment_written(self.fs.as_ref(), &session_dir, mode).await;
            let is_corrupt = streamctl_adapters::contains_corruption_signature(&log_lines) || !any_segment;

            if !is_corrupt {
                self.recorder.ready_outcome(ReadyOutcome::PackagerFailed, mode);
                return DriveOutcome::Terminal(FinalOutcome::Error(ReasonError::new(ReasonCode::PackagerFailed, "playlist never became ready")));
            }

            // Repair retry ladder: LIVE only, at most
            // two attempts total (CopyVideoAacAudio then CrfTranscode).
            let next_stage = if mode.is_live() {
                match repair_stage {
                    None => Some(RepairStage::CopyVideoAacAudio),
                    Some(stage) => stage.next(),
                }
            } else {
                None
            };

            match next_stage {
                Some(stage) => {
                    self.recorder.ready_outcome(ReadyOutcome::RepairRetry, mode);
                    repair_stage = Some(stage);
                    attempt_profile = ProfileSpec::Repair(stage);
                    record.profile = attempt_profile.clone();
                    let _ = self.store.update_session(&record.id, &mut |r| {
                        r.profile = attempt_profile.clone();
                        Ok(())
                    });
                    continue;
                }
                None => {
                    self.recorder.ready_outcome(ReadyOutcome::UpstreamCorrupt, mode);
                    return DriveOutcome::Terminal(FinalOutcome::Error(ReasonError::new(ReasonCode::UpstreamCorrupt, "corruption signature after repair retries exhausted")));
                }
            }
        }
    }

    /// Once `Ready`, waits for the transcoder to exit or the session to be
    /// cancelled, then runs the appropriate finalize path.
    async fn wait_for_end(
        self: &Arc<Self>,
        record: &mut SessionRecord,
        mode: Mode,
        mut transcoder: Box<dyn Transcoder>,
        cancel: &CancellationToken,
        failure_signal: &Arc<StdMutex<Option<ReasonError>>>,
    ) {
        let wait_result = tokio::select! {
            _ = cancel.cancelled() => None,
            result = transcoder.wait() => Some(result),
        };

        if let Some(pre) = failure_signal.lock().expect("failure signal mutex poisoned").take() {
            self.finalize(record, FinalOutcome::Error(pre), mode).await;
            return;
        }

        match wait_result {
            None => {
                let _ = transcoder.stop().await;
                self.finalize(record, FinalOutcome::Cancelled, mode).await;
            }
            Some(Ok(exit)) => {
                if mode.is_live() {
                    // unprompted process exit while Ready is
                    // classified `ProcessEnded`, not treated as success.
                    self.finalize(record, FinalOutcome::Error(ReasonError::new(ReasonCode::ProcessEnded, format!("transcoder exited with {:?}", exit.exit_code))), mode).await;
                } else {
                    if !self.apply_and_persist(record, Event::ProcessOk, mode).await {
                        self.finalize(record, FinalOutcome::Error(ReasonError::new(ReasonCode::InvariantViolation, "process completed but fsm rejected Draining")), mode).await;
                        return;
                    }
                    self.finalize(record, FinalOutcome::VodCompleted, mode).await;
                }
            }
            Some(Err(err)) => {
                let code = err.reason_hint().unwrap_or(ReasonCode::ProcessEnded);
                self.finalize(record, FinalOutcome::Error(ReasonError::new(code, err.to_string())), mode).await;
            }
        }
    }
}

enum DriveOutcome {
    Ready(Box<dyn Transcoder>),
    Terminal(FinalOutcome),
}
