//! Orchestrator worker - the invitation control loop
//!
//! One worker task per orchestrator. It idles until `start`, then drives the
//! run until it stops, and goes back to waiting for the next `start`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::domain::{ProfileRecord, ProfileStatus, RunSession, SearchFilters, SessionState};
use crate::limiter::{Admission, Limiter, LimitsConfig};
use crate::queue::TargetQueue;
use crate::scheduler::HumanizedScheduler;
use crate::search::SearchProvider;
use crate::sender::{InvitationSender, SendError, SendOutcome};
use crate::state::{StateError, StateManager, recover};

use super::handle::OrchestratorHandle;
use super::messages::{Control, OrchestratorError};
use super::status::{RunCounts, RunState, RunStatus, StopReason};

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub limits: LimitsConfig,
    /// Upper bound on a single send
    pub send_timeout: Duration,
}

/// How a suspension point ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Elapsed,
    Stop,
    Pause,
    Resume,
}

/// What the run does after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop(StopReason),
}

/// The worker owning the limiter, scheduler and queue of a run
pub struct Orchestrator {
    config: OrchestratorConfig,
    state: StateManager,
    limiter: Limiter,
    scheduler: HumanizedScheduler,
    queue: TargetQueue,
    sender: Arc<dyn InvitationSender>,
    clock: Arc<dyn Clock>,
    control_rx: mpsc::Receiver<Control>,
    status_tx: watch::Sender<RunStatus>,
    session: Option<RunSession>,
    operator_paused: bool,
    paused_on: Option<String>,
    next_eligible_at: Option<i64>,
}

impl Orchestrator {
    /// Spawn the worker task and return its control handle
    ///
    /// The worker exits once every handle is dropped.
    pub fn spawn(
        config: OrchestratorConfig,
        state: StateManager,
        scheduler: HumanizedScheduler,
        provider: Arc<dyn SearchProvider>,
        sender: Arc<dyn InvitationSender>,
        clock: Arc<dyn Clock>,
    ) -> OrchestratorHandle {
        debug!(?config, "Orchestrator::spawn: called");
        let (control_tx, control_rx) = mpsc::channel(32);
        let (status_tx, status_rx) = watch::channel(RunStatus::default());

        let worker = Self {
            limiter: Limiter::new(config.limits.clone(), state.clone()),
            queue: TargetQueue::new(state.clone(), provider, SearchFilters::default()),
            config,
            state,
            scheduler,
            sender,
            clock,
            control_rx,
            status_tx,
            session: None,
            operator_paused: false,
            paused_on: None,
            next_eligible_at: None,
        };
        tokio::spawn(worker.run());

        OrchestratorHandle::new(control_tx, status_rx)
    }

    async fn run(mut self) {
        debug!("Orchestrator::run: called");
        while let Some(control) = self.control_rx.recv().await {
            match control {
                Control::Start { filters, reply } => match self.begin(filters).await {
                    Ok(session_id) => {
                        let _ = reply.send(Ok(session_id));
                        self.drive().await;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to start run");
                        let _ = reply.send(Err(e));
                    }
                },
                other => {
                    debug!(?other, "Orchestrator::run: no active run, ignoring control");
                }
            }
        }
        debug!("Orchestrator::run: all handles dropped, worker exiting");
    }

    /// Open (or resume) a run session and prime the queue
    async fn begin(&mut self, filters: SearchFilters) -> Result<String, OrchestratorError> {
        let now = self.clock.now_ms();
        debug!(%filters, now, "Orchestrator::begin: called");

        let stats = recover(&self.state, now).await.map_err(OrchestratorError::Recovery)?;

        let session = match stats.resumable {
            Some(mut session) => {
                info!(session_id = %session.id, visited = session.profiles_visited, "Resuming interrupted run session");
                session.filters = filters.to_json();
                session.set_state(SessionState::Running, now);
                session.ended_at = None;
                self.state.update_session(session.clone()).await?;
                session
            }
            None => {
                let session = RunSession::new(filters.to_json(), now);
                self.state.create_session(session.clone()).await?;
                info!(session_id = %session.id, %filters, "Run session started");
                session
            }
        };

        self.limiter.bind_session(session.id.clone());
        self.queue.reset_search(filters);
        self.queue.restore().await?;
        self.operator_paused = false;
        self.paused_on = None;
        self.next_eligible_at = None;

        let session_id = session.id.clone();
        self.session = Some(session);
        self.publish(RunState::Running).await;
        Ok(session_id)
    }

    /// Run the state machine until the run stops
    async fn drive(&mut self) {
        debug!("Orchestrator::drive: called");
        loop {
            if self.operator_paused {
                match self.hold_for_operator().await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Stop(reason)) => return self.finish(reason, None).await,
                    Err(e) => return self.finish(StopReason::Error, Some(e)).await,
                }
            }

            match self.step().await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop(reason)) => return self.finish(reason, None).await,
                Err(e) => return self.finish(StopReason::Error, Some(e)).await,
            }
        }
    }

    /// One pass of the running state: pick, admit, wait, send, record
    async fn step(&mut self) -> Result<Flow, OrchestratorError> {
        // Controls queued during the previous send come before the next target
        match self.poll_control() {
            Some(Wake::Stop) => return Ok(Flow::Stop(StopReason::Operator)),
            Some(Wake::Pause) => return Ok(Flow::Continue),
            Some(Wake::Resume | Wake::Elapsed) | None => {}
        }

        if let Some(max) = self.config.limits.max_profiles_per_session
            && self.counts().profiles_visited >= max
        {
            info!(max, "Visit cap reached");
            return Ok(Flow::Stop(StopReason::VisitLimit));
        }

        let now = self.clock.now_ms();
        let Some(target) = self.queue.next(now).await? else {
            info!("No more targets");
            return Ok(Flow::Stop(StopReason::Exhausted));
        };
        debug!(profile_id = %target.profile_id, "Orchestrator::step: target selected");

        if let Admission::Paused {
            window,
            next_eligible_at,
        } = self.limiter.check(now).await?
        {
            self.queue.requeue_front(&target);
            return self.hold_for_limit(window, next_eligible_at).await;
        }

        let delay = self.scheduler.next_delay();
        debug!(profile_id = %target.profile_id, delay_ms = delay.as_millis() as u64, "Orchestrator::step: waiting before send");
        match self.wait(Some(delay)).await {
            Wake::Elapsed | Wake::Resume => {}
            Wake::Stop => {
                self.queue.requeue_front(&target);
                return Ok(Flow::Stop(StopReason::Operator));
            }
            Wake::Pause => {
                self.queue.requeue_front(&target);
                return Ok(Flow::Continue);
            }
        }

        // Another process may have used the last slot during the delay
        if !self.limiter.can_send(self.clock.now_ms()).await? {
            debug!(profile_id = %target.profile_id, "Orchestrator::step: window filled during delay");
            self.queue.requeue_front(&target);
            return Ok(Flow::Continue);
        }

        self.send(target).await?;
        Ok(Flow::Continue)
    }

    /// Send to one target and record the outcome
    async fn send(&mut self, target: ProfileRecord) -> Result<(), OrchestratorError> {
        let profile_id = target.profile_id.clone();
        debug!(%profile_id, "Orchestrator::send: called");
        if let Some(session) = self.session.as_mut() {
            session.profiles_visited += 1;
        }

        let timeout = self.config.send_timeout;
        let outcome = match tokio::time::timeout(timeout, self.sender.send(&target)).await {
            Ok(result) => result,
            Err(_) => Err(SendError::Timeout(timeout)),
        };
        let now = self.clock.now_ms();

        let result = match outcome {
            Ok(SendOutcome::Sent) => self.record_sent(&profile_id, now).await,
            Ok(SendOutcome::Declined { reason }) => {
                info!(%profile_id, %reason, "Invitation declined, skipping profile");
                self.state.mark_profile(&profile_id, ProfileStatus::Skipped, now).await?;
                self.state.set_profile_error(&profile_id, &reason).await?;
                Ok(())
            }
            Err(e) => {
                warn!(%profile_id, error = %e, "Send failed");
                if let Some(session) = self.session.as_mut() {
                    session.failures += 1;
                }
                let record = self.state.record_failure(&profile_id, &e.to_string(), now).await?;
                if record.status == ProfileStatus::Queued {
                    self.queue.requeue_back(&record);
                } else {
                    info!(%profile_id, attempts = record.attempt_count, "Retry ceiling reached, profile failed");
                }
                Ok(())
            }
        };

        self.save_session(now).await?;
        self.publish(RunState::Running).await;
        result
    }

    async fn record_sent(&mut self, profile_id: &str, now: i64) -> Result<(), OrchestratorError> {
        match self.limiter.record_invitation(profile_id, now).await {
            Ok(_) => {
                info!(%profile_id, "Invitation sent and recorded");
                Ok(())
            }
            Err(StateError::LimitExceeded { window, .. }) => {
                // Sent for real: never contact this profile again
                error!(%profile_id, %window, "Window full after a successful send");
                self.state.mark_profile(profile_id, ProfileStatus::Invited, now).await?;
                Err(OrchestratorError::LimitAfterSend {
                    profile_id: profile_id.to_string(),
                    window,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Paused on an exhausted window until it frees up
    async fn hold_for_limit(
        &mut self,
        mut window: String,
        mut next_eligible_at: Option<i64>,
    ) -> Result<Flow, OrchestratorError> {
        info!(%window, ?next_eligible_at, "Window exhausted, pausing");

        loop {
            let Some(eligible_at) = next_eligible_at else {
                info!(%window, "Window does not free up within this session");
                return Ok(Flow::Stop(StopReason::SessionLimit));
            };

            self.paused_on = Some(window.clone());
            self.next_eligible_at = Some(eligible_at);
            let now = self.clock.now_ms();
            self.save_session_state(SessionState::Paused, now).await?;
            self.publish(RunState::Paused).await;

            let until = Duration::from_millis(eligible_at.saturating_sub(now).max(0) as u64);
            let pause = self.scheduler.pause_for(Some(until));
            debug!(pause_ms = pause.as_millis() as u64, "Orchestrator::hold_for_limit: sleeping");
            if self.wait(Some(pause)).await == Wake::Stop {
                return Ok(Flow::Stop(StopReason::Operator));
            }

            match self.limiter.check(self.clock.now_ms()).await? {
                Admission::Admit => break,
                Admission::Paused {
                    window: still,
                    next_eligible_at: next,
                } => {
                    window = still;
                    next_eligible_at = next;
                }
            }
        }

        info!("Window capacity available, resuming");
        self.paused_on = None;
        self.next_eligible_at = None;
        if !self.operator_paused {
            self.save_session_state(SessionState::Running, self.clock.now_ms()).await?;
            self.publish(RunState::Running).await;
        }
        Ok(Flow::Continue)
    }

    /// Paused by the operator until resume or stop
    async fn hold_for_operator(&mut self) -> Result<Flow, OrchestratorError> {
        info!("Run paused by operator");
        self.save_session_state(SessionState::Paused, self.clock.now_ms()).await?;
        self.publish(RunState::Paused).await;

        loop {
            match self.wait(None).await {
                Wake::Stop => return Ok(Flow::Stop(StopReason::Operator)),
                Wake::Resume => break,
                Wake::Pause | Wake::Elapsed => {}
            }
        }

        info!("Run resumed by operator");
        self.save_session_state(SessionState::Running, self.clock.now_ms()).await?;
        self.publish(RunState::Running).await;
        Ok(Flow::Continue)
    }

    /// Sleep for `duration` (forever when `None`) unless a control arrives
    ///
    /// Pending controls win over an elapsed timer. Pause and resume update
    /// `operator_paused`; redundant ones are ignored.
    async fn wait(&mut self, duration: Option<Duration>) -> Wake {
        let sleep = tokio::time::sleep(duration.unwrap_or(Duration::MAX));
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;

                control = self.control_rx.recv() => match control {
                    None => {
                        debug!("Orchestrator::wait: channel closed");
                        return Wake::Stop;
                    }
                    Some(control) => {
                        if let Some(wake) = self.apply(control) {
                            return wake;
                        }
                    }
                },

                _ = &mut sleep, if duration.is_some() => return Wake::Elapsed,
            }
        }
    }

    /// Drain controls that arrived while the worker was busy, without waiting
    fn poll_control(&mut self) -> Option<Wake> {
        loop {
            match self.control_rx.try_recv() {
                Ok(control) => {
                    if let Some(wake) = self.apply(control) {
                        return Some(wake);
                    }
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => return Some(Wake::Stop),
            }
        }
    }

    /// Act on one control received during a run; `None` when it changes nothing
    fn apply(&mut self, control: Control) -> Option<Wake> {
        match control {
            Control::Stop => {
                debug!("Orchestrator::apply: stop");
                Some(Wake::Stop)
            }
            Control::Start { reply, .. } => {
                debug!("Orchestrator::apply: start while active");
                let _ = reply.send(Err(OrchestratorError::AlreadyRunning));
                None
            }
            Control::Pause if !self.operator_paused => {
                debug!("Orchestrator::apply: pause");
                self.operator_paused = true;
                Some(Wake::Pause)
            }
            Control::Resume if self.operator_paused => {
                debug!("Orchestrator::apply: resume");
                self.operator_paused = false;
                Some(Wake::Resume)
            }
            other => {
                debug!(?other, "Orchestrator::apply: redundant control ignored");
                None
            }
        }
    }

    /// Close the session and publish the final status
    async fn finish(&mut self, reason: StopReason, err: Option<OrchestratorError>) {
        let now = self.clock.now_ms();
        match &err {
            Some(e) => error!(%reason, error = %e, "Run stopped"),
            None => info!(%reason, "Run stopped"),
        }

        if let Some(session) = self.session.as_mut() {
            session.close(reason.as_str(), now);
            if let Some(e) = &err {
                session.set_error(e.to_string());
            }
        }
        if let Err(e) = self.save_session(now).await {
            warn!(error = %e, "Failed to persist final session state");
        }

        self.operator_paused = false;
        self.paused_on = None;
        self.next_eligible_at = None;
        self.publish(RunState::Stopped).await;
    }

    async fn save_session_state(&mut self, state: SessionState, now: i64) -> Result<(), OrchestratorError> {
        if let Some(session) = self.session.as_mut() {
            session.set_state(state, now);
        }
        self.save_session(now).await
    }

    async fn save_session(&mut self, now: i64) -> Result<(), OrchestratorError> {
        if let Some(session) = self.session.as_mut() {
            session.updated_at = now;
            self.state.update_session(session.clone()).await?;
        }
        Ok(())
    }

    fn counts(&self) -> RunCounts {
        self.session.as_ref().map(RunCounts::from).unwrap_or_default()
    }

    /// Publish a fresh status snapshot
    ///
    /// Read failures leave the previous numbers in place.
    async fn publish(&mut self, state: RunState) {
        let now = self.clock.now_ms();

        // Sent count is derived by the store
        if let Some(session) = self.session.as_mut() {
            match self.state.get_session(&session.id).await {
                Ok(Some(stored)) => session.invitations_sent = stored.invitations_sent,
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Failed to refresh session counters"),
            }
        }

        let windows = self.limiter.window_status(now).await;
        let profiles = self.state.status_counts().await;
        let counts = self.counts();
        let session_id = self.session.as_ref().map(|s| s.id.clone());
        let last_error = self.session.as_ref().and_then(|s| s.last_error.clone());
        let stop_reason = match state {
            RunState::Stopped => self
                .session
                .as_ref()
                .and_then(|s| s.stop_reason.as_deref())
                .and_then(|r| r.parse::<StopReason>().ok()),
            _ => None,
        };
        let filters = self.queue.filters().clone();
        let operator_paused = self.operator_paused;
        let paused_on = self.paused_on.clone();
        let next_eligible_at = match state {
            RunState::Paused => self.next_eligible_at,
            RunState::Running => Some(now),
            RunState::Idle | RunState::Stopped => None,
        };

        self.status_tx.send_modify(|status| {
            status.state = state;
            status.session_id = session_id;
            status.operator_paused = operator_paused;
            status.filters = filters;
            status.counts = counts;
            match windows {
                Ok(windows) => status.windows = windows,
                Err(e) => warn!(error = %e, "Failed to read window status"),
            }
            match profiles {
                Ok(profiles) => status.profiles = profiles,
                Err(e) => warn!(error = %e, "Failed to read profile counts"),
            }
            status.paused_on = paused_on;
            status.next_eligible_at = next_eligible_at;
            status.last_error = last_error;
            status.stop_reason = stop_reason;
            status.updated_at = now;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::{Candidate, ProfileId, SentEvent};
    use crate::limiter::WindowConfig;
    use crate::scheduler::PacingConfig;
    use crate::search::{MemorySearchProvider, SearchError};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const HOUR: Duration = Duration::from_secs(3_600);
    const START: i64 = 1_700_000_000_000;

    #[derive(Clone)]
    enum Script {
        Decline(&'static str),
        Fail,
    }

    /// Sender with a per-profile script; unscripted profiles succeed
    #[derive(Default)]
    struct ScriptedSender {
        scripts: HashMap<String, Script>,
        calls: AtomicUsize,
        sent: Mutex<Vec<String>>,
    }

    impl ScriptedSender {
        fn with(mut self, id: &str, script: Script) -> Self {
            self.scripts.insert(id.to_string(), script);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl InvitationSender for ScriptedSender {
        async fn send(&self, profile: &ProfileRecord) -> Result<SendOutcome, SendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.scripts.get(&profile.profile_id) {
                Some(Script::Decline(reason)) => Ok(SendOutcome::Declined {
                    reason: reason.to_string(),
                }),
                Some(Script::Fail) => Err(SendError::Transient("page did not load".to_string())),
                None => {
                    self.sent.lock().unwrap().push(profile.profile_id.clone());
                    Ok(SendOutcome::Sent)
                }
            }
        }
    }

    /// Sender whose send also lands an event from "another process"
    struct RacingSender {
        state: StateManager,
        clock: ManualClock,
    }

    #[async_trait]
    impl InvitationSender for RacingSender {
        async fn send(&self, _profile: &ProfileRecord) -> Result<SendOutcome, SendError> {
            let event = SentEvent::new(None, None, self.clock.now_ms());
            self.state
                .record_sent(Vec::new(), event)
                .await
                .map_err(|e| SendError::Transient(e.to_string()))?;
            Ok(SendOutcome::Sent)
        }
    }

    /// Sender that blocks inside `send` until released
    #[derive(Default)]
    struct GatedSender {
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl InvitationSender for GatedSender {
        async fn send(&self, _profile: &ProfileRecord) -> Result<SendOutcome, SendError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(SendOutcome::Sent)
        }
    }

    struct BrokenSearch;

    #[async_trait]
    impl SearchProvider for BrokenSearch {
        async fn fetch_page(&self, _filters: &SearchFilters, _page: u32) -> Result<Vec<Candidate>, SearchError> {
            Err(SearchError::Provider("results page unavailable".to_string()))
        }
    }

    fn candidates(ids: &[&str]) -> Arc<MemorySearchProvider> {
        let list = ids
            .iter()
            .map(|id| Candidate::new(ProfileId::new(id).unwrap()))
            .collect();
        Arc::new(MemorySearchProvider::new(list, 10))
    }

    fn fast_pacing() -> PacingConfig {
        PacingConfig {
            min_delay_ms: 0,
            max_delay_ms: 1,
            pause_poll_ms: 10,
            jitter_ratio: 0.0,
            max_jitter_ms: 0,
        }
    }

    fn daily(cap: u32) -> LimitsConfig {
        LimitsConfig {
            windows: vec![WindowConfig::rolling("daily", cap, 24 * HOUR)],
            ..Default::default()
        }
    }

    struct Harness {
        state: StateManager,
        clock: ManualClock,
        handle: OrchestratorHandle,
    }

    fn harness_with(
        limits: LimitsConfig,
        pacing: PacingConfig,
        provider: Arc<dyn SearchProvider>,
        sender: Arc<dyn InvitationSender>,
        state: StateManager,
        clock: ManualClock,
    ) -> Harness {
        let config = OrchestratorConfig {
            limits,
            send_timeout: Duration::from_secs(5),
        };
        let handle = Orchestrator::spawn(
            config,
            state.clone(),
            HumanizedScheduler::with_seed(pacing, 11),
            provider,
            sender,
            Arc::new(clock.clone()),
        );
        Harness { state, clock, handle }
    }

    fn harness(
        limits: LimitsConfig,
        pacing: PacingConfig,
        provider: Arc<dyn SearchProvider>,
        sender: Arc<dyn InvitationSender>,
    ) -> Harness {
        let state = StateManager::spawn_in_memory(limits.retry_ceiling).unwrap();
        harness_with(limits, pacing, provider, sender, state, ManualClock::new(START))
    }

    async fn wait_until(handle: &OrchestratorHandle, predicate: impl FnMut(&RunStatus) -> bool) -> RunStatus {
        tokio::time::timeout(Duration::from_secs(5), handle.wait_for(predicate))
            .await
            .expect("status wait timed out")
            .unwrap()
    }

    async fn wait_stopped(handle: &OrchestratorHandle) -> RunStatus {
        wait_until(handle, |s| s.state == RunState::Stopped).await
    }

    #[tokio::test]
    async fn test_pauses_at_cap_and_resumes_when_window_rolls() {
        let sender = Arc::new(ScriptedSender::default());
        let h = harness(daily(3), fast_pacing(), candidates(&["a", "b", "c", "d", "e"]), sender.clone());

        let session_id = h.handle.start(SearchFilters::default()).await.unwrap();

        let paused = wait_until(&h.handle, |s| s.state == RunState::Paused).await;
        assert_eq!(paused.session_id.as_deref(), Some(session_id.as_str()));
        assert_eq!(paused.paused_on.as_deref(), Some("daily"));
        assert_eq!(paused.next_eligible_at, Some(START + 24 * 3_600_000));
        assert!(!paused.operator_paused);
        assert_eq!(paused.profiles.invited, 3);
        assert_eq!(paused.profiles.queued, 2);
        assert_eq!(sender.sent(), vec!["a", "b", "c"]);

        h.clock.advance(25 * HOUR);

        let stopped = wait_stopped(&h.handle).await;
        assert_eq!(stopped.stop_reason, Some(StopReason::Exhausted));
        assert_eq!(stopped.profiles.invited, 5);
        assert_eq!(stopped.counts.invitations_sent, 5);
        assert_eq!(stopped.counts.profiles_visited, 5);
        assert_eq!(sender.sent(), vec!["a", "b", "c", "d", "e"]);

        let session = h.state.get_session(&session_id).await.unwrap().unwrap();
        assert_eq!(session.state, SessionState::Stopped);
        assert_eq!(session.stop_reason.as_deref(), Some("exhausted"));
        assert_eq!(session.invitations_sent, 5);
    }

    #[tokio::test]
    async fn test_transient_failures_retry_until_ceiling() {
        let sender = Arc::new(ScriptedSender::default().with("flaky", Script::Fail));
        let h = harness(daily(20), fast_pacing(), candidates(&["flaky", "steady"]), sender.clone());

        h.handle.start(SearchFilters::default()).await.unwrap();
        let stopped = wait_stopped(&h.handle).await;

        assert_eq!(stopped.stop_reason, Some(StopReason::Exhausted));
        assert_eq!(stopped.counts.failures, 2);
        assert_eq!(sender.calls(), 3);

        let flaky = h.state.get_profile_required("flaky").await.unwrap();
        assert_eq!(flaky.status, ProfileStatus::Failed);
        assert_eq!(flaky.attempt_count, 2);
        assert!(flaky.last_error.unwrap().contains("page did not load"));

        let steady = h.state.get_profile_required("steady").await.unwrap();
        assert_eq!(steady.status, ProfileStatus::Invited);
    }

    #[tokio::test]
    async fn test_declined_profile_is_skipped() {
        let sender = Arc::new(ScriptedSender::default().with("pending", Script::Decline("invitation already pending")));
        let h = harness(daily(20), fast_pacing(), candidates(&["pending", "fresh"]), sender.clone());

        h.handle.start(SearchFilters::default()).await.unwrap();
        let stopped = wait_stopped(&h.handle).await;

        assert_eq!(stopped.profiles.skipped, 1);
        assert_eq!(stopped.profiles.invited, 1);
        assert_eq!(stopped.counts.invitations_sent, 1);
        assert_eq!(stopped.counts.failures, 0);

        let pending = h.state.get_profile_required("pending").await.unwrap();
        assert_eq!(pending.status, ProfileStatus::Skipped);
        assert_eq!(pending.last_error.as_deref(), Some("invitation already pending"));
    }

    #[tokio::test]
    async fn test_stop_during_delay_sends_nothing() {
        let pacing = PacingConfig {
            min_delay_ms: 10_000,
            max_delay_ms: 10_000,
            ..fast_pacing()
        };
        let sender = Arc::new(ScriptedSender::default());
        let h = harness(daily(20), pacing, candidates(&["jane"]), sender.clone());

        h.handle.start(SearchFilters::default()).await.unwrap();
        h.handle.stop().await.unwrap();
        let stopped = wait_stopped(&h.handle).await;

        assert_eq!(stopped.stop_reason, Some(StopReason::Operator));
        assert_eq!(sender.calls(), 0);
        assert!(h.state.is_contactable("jane").await.unwrap());
    }

    #[tokio::test]
    async fn test_start_while_running_is_rejected() {
        let pacing = PacingConfig {
            min_delay_ms: 10_000,
            max_delay_ms: 10_000,
            ..fast_pacing()
        };
        let sender = Arc::new(ScriptedSender::default());
        let h = harness(daily(20), pacing, candidates(&["jane"]), sender);

        h.handle.start(SearchFilters::default()).await.unwrap();
        let err = h.handle.start(SearchFilters::default()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::AlreadyRunning));

        h.handle.stop().await.unwrap();
        wait_stopped(&h.handle).await;
    }

    #[tokio::test]
    async fn test_operator_pause_and_resume() {
        let pacing = PacingConfig {
            min_delay_ms: 200,
            max_delay_ms: 200,
            ..fast_pacing()
        };
        let sender = Arc::new(ScriptedSender::default());
        let h = harness(daily(20), pacing, candidates(&["jane"]), sender.clone());

        h.handle.start(SearchFilters::default()).await.unwrap();
        h.handle.pause().await.unwrap();

        let paused = wait_until(&h.handle, |s| s.state == RunState::Paused).await;
        assert!(paused.operator_paused);
        assert_eq!(paused.paused_on, None);
        assert_eq!(sender.calls(), 0);

        h.handle.resume().await.unwrap();
        let stopped = wait_stopped(&h.handle).await;
        assert_eq!(stopped.stop_reason, Some(StopReason::Exhausted));
        assert_eq!(sender.sent(), vec!["jane"]);
    }

    #[tokio::test]
    async fn test_visit_limit_stops_run() {
        let limits = LimitsConfig {
            max_profiles_per_session: Some(2),
            ..daily(20)
        };
        let sender = Arc::new(ScriptedSender::default());
        let h = harness(limits, fast_pacing(), candidates(&["a", "b", "c", "d"]), sender.clone());

        h.handle.start(SearchFilters::default()).await.unwrap();
        let stopped = wait_stopped(&h.handle).await;

        assert_eq!(stopped.stop_reason, Some(StopReason::VisitLimit));
        assert_eq!(stopped.counts.profiles_visited, 2);
        assert_eq!(sender.calls(), 2);
        assert_eq!(stopped.profiles.queued, 2);
    }

    #[tokio::test]
    async fn test_session_window_ends_run() {
        let limits = LimitsConfig {
            windows: vec![
                WindowConfig::rolling("daily", 20, 24 * HOUR),
                WindowConfig::session("per-run", 1),
            ],
            ..Default::default()
        };
        let sender = Arc::new(ScriptedSender::default());
        let h = harness(limits, fast_pacing(), candidates(&["a", "b", "c"]), sender.clone());

        h.handle.start(SearchFilters::default()).await.unwrap();
        let stopped = wait_stopped(&h.handle).await;

        assert_eq!(stopped.stop_reason, Some(StopReason::SessionLimit));
        assert_eq!(sender.sent(), vec!["a"]);
        assert_eq!(stopped.profiles.invited, 1);
    }

    #[tokio::test]
    async fn test_search_error_stops_with_error() {
        let sender = Arc::new(ScriptedSender::default());
        let h = harness(daily(20), fast_pacing(), Arc::new(BrokenSearch), sender.clone());

        h.handle.start(SearchFilters::default()).await.unwrap();
        let stopped = wait_stopped(&h.handle).await;

        assert_eq!(stopped.stop_reason, Some(StopReason::Error));
        assert!(stopped.last_error.unwrap().contains("results page unavailable"));
        assert_eq!(sender.calls(), 0);
    }

    #[tokio::test]
    async fn test_window_filled_by_other_process_stops_run() {
        let state = StateManager::spawn_in_memory(2).unwrap();
        let clock = ManualClock::new(START);
        let sender = Arc::new(RacingSender {
            state: state.clone(),
            clock: clock.clone(),
        });
        let h = harness_with(daily(1), fast_pacing(), candidates(&["jane", "john"]), sender, state, clock);

        h.handle.start(SearchFilters::default()).await.unwrap();
        let stopped = wait_stopped(&h.handle).await;

        assert_eq!(stopped.stop_reason, Some(StopReason::Error));
        assert!(stopped.last_error.unwrap().contains("already full"));

        // Never contacted twice, even though the send was not counted
        let jane = h.state.get_profile_required("jane").await.unwrap();
        assert_eq!(jane.status, ProfileStatus::Invited);
        assert!(h.state.is_contactable("john").await.unwrap());
    }

    #[tokio::test]
    async fn test_resumes_interrupted_session() {
        let state = StateManager::spawn_in_memory(2).unwrap();
        let mut crashed = RunSession::new(SearchFilters::default().to_json(), START - 1_000);
        crashed.profiles_visited = 4;
        let crashed_id = state.create_session(crashed).await.unwrap();

        let sender = Arc::new(ScriptedSender::default());
        let h = harness_with(
            daily(20),
            fast_pacing(),
            candidates(&["jane"]),
            sender,
            state,
            ManualClock::new(START),
        );

        let session_id = h.handle.start(SearchFilters::default()).await.unwrap();
        assert_eq!(session_id, crashed_id);

        let stopped = wait_stopped(&h.handle).await;
        assert_eq!(stopped.counts.profiles_visited, 5);
        assert_eq!(stopped.counts.invitations_sent, 1);

        let sessions = h.state.list_sessions(None).await.unwrap();
        assert_eq!(sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_restart_after_stop_opens_new_session() {
        let sender = Arc::new(ScriptedSender::default());
        let h = harness(daily(20), fast_pacing(), candidates(&["jane"]), sender.clone());

        let first = h.handle.start(SearchFilters::default()).await.unwrap();
        wait_stopped(&h.handle).await;

        let second = h.handle.start(SearchFilters::default()).await.unwrap();
        assert_ne!(first, second);
        let stopped = wait_until(&h.handle, |s| {
            s.state == RunState::Stopped && s.session_id.as_deref() == Some(second.as_str())
        })
        .await;

        // Already invited in the first run
        assert_eq!(stopped.counts.invitations_sent, 0);
        assert_eq!(sender.calls(), 1);
    }

    #[tokio::test]
    async fn test_stop_during_send_is_reported_as_operator_stop() {
        let sender = Arc::new(GatedSender::default());
        let h = harness(daily(20), fast_pacing(), candidates(&["jane"]), sender.clone());

        h.handle.start(SearchFilters::default()).await.unwrap();
        sender.entered.notified().await;
        h.handle.stop().await.unwrap();
        sender.release.notify_one();

        let stopped = wait_stopped(&h.handle).await;
        // The queue is empty after jane, but the stop came first
        assert_eq!(stopped.stop_reason, Some(StopReason::Operator));
        assert_eq!(stopped.counts.invitations_sent, 1);
        let jane = h.state.get_profile_required("jane").await.unwrap();
        assert_eq!(jane.status, ProfileStatus::Invited);
    }

    #[tokio::test]
    async fn test_new_run_ignores_queued_profiles_outside_its_filters() {
        let state = StateManager::spawn_in_memory(2).unwrap();
        let ceo = Candidate::new(ProfileId::new("old-ceo").unwrap()).with_attribute("role", "CEO");
        state.upsert_profile(ceo, START - 1_000).await.unwrap();
        state.mark_profile("old-ceo", ProfileStatus::Queued, START - 1_000).await.unwrap();

        let cto = Candidate::new(ProfileId::new("new-cto").unwrap()).with_attribute("role", "CTO");
        let provider = Arc::new(MemorySearchProvider::new(vec![cto], 10));
        let sender = Arc::new(ScriptedSender::default());
        let h = harness_with(
            daily(20),
            fast_pacing(),
            provider,
            sender.clone(),
            state,
            ManualClock::new(START),
        );

        let filters = SearchFilters {
            role: Some("CTO".to_string()),
            ..Default::default()
        };
        h.handle.start(filters).await.unwrap();
        let stopped = wait_stopped(&h.handle).await;

        assert_eq!(stopped.stop_reason, Some(StopReason::Exhausted));
        assert_eq!(sender.sent(), vec!["new-cto"]);
        assert!(h.state.is_contactable("old-ceo").await.unwrap());
    }
}
