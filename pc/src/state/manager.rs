//! StateManager - actor that owns the pacestore Store
//!
//! Processes commands via channels for thread-safe access to persistent state.

use std::path::Path;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info};

use crate::domain::{
    Candidate, ProfileRecord, ProfileStatus, RunSession, SentEvent, SessionState, StatusCounts, Store, WindowGuard,
    WindowScope,
};

use super::messages::{StateCommand, StateError, StateResponse};

/// Event broadcast when state changes that watchers should react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateEvent {
    /// A profile changed status
    ProfileUpdated { id: String, status: ProfileStatus },
    /// An invitation was recorded against the action windows
    InvitationRecorded { profile_id: String, session_id: Option<String> },
    /// A run session was created or updated
    SessionUpdated { id: String, state: SessionState },
}

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
    /// Broadcast sender for state change notifications
    event_tx: broadcast::Sender<StateEvent>,
    retry_ceiling: u32,
}

impl StateManager {
    /// Spawn a new StateManager actor over the store in `store_dir`
    pub fn spawn(store_dir: impl AsRef<Path>, retry_ceiling: u32) -> eyre::Result<Self> {
        debug!(store_dir = %store_dir.as_ref().display(), retry_ceiling, "spawn: called");
        let store = Store::open(store_dir.as_ref())?;
        Ok(Self::with_store(store, retry_ceiling))
    }

    /// Spawn over an in-memory store (tests, dry runs)
    pub fn spawn_in_memory(retry_ceiling: u32) -> eyre::Result<Self> {
        debug!(retry_ceiling, "spawn_in_memory: called");
        let store = Store::open_in_memory()?;
        Ok(Self::with_store(store, retry_ceiling))
    }

    /// Spawn the actor task over an already opened store
    pub fn with_store(store: Store, retry_ceiling: u32) -> Self {
        let (tx, rx) = mpsc::channel(256);

        // Broadcast channel for state change notifications
        let (event_tx, _) = broadcast::channel(64);

        tokio::spawn(actor_loop(store, retry_ceiling, rx));

        info!(retry_ceiling, "StateManager spawned");

        Self {
            tx,
            event_tx,
            retry_ceiling,
        }
    }

    /// Failed attempts after which a profile is no longer contactable
    pub fn retry_ceiling(&self) -> u32 {
        self.retry_ceiling
    }

    /// Subscribe to state change events
    pub fn subscribe_events(&self) -> broadcast::Receiver<StateEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: StateEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand,
    ) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    // === Profile operations ===

    /// Insert a candidate as `discovered` or merge its attributes into the existing record
    pub async fn upsert_profile(&self, candidate: Candidate, now: i64) -> StateResponse<ProfileRecord> {
        debug!(profile_id = %candidate.profile_id, "upsert_profile: called");
        self.request(|reply| StateCommand::UpsertProfile { candidate, now, reply })
            .await
    }

    /// Get a profile by ID
    pub async fn get_profile(&self, id: &str) -> StateResponse<Option<ProfileRecord>> {
        debug!(%id, "get_profile: called");
        self.request(|reply| StateCommand::GetProfile {
            id: id.to_string(),
            reply,
        })
        .await
    }

    /// Get a profile by ID, returning error if not found
    pub async fn get_profile_required(&self, id: &str) -> StateResponse<ProfileRecord> {
        debug!(%id, "get_profile_required: called");
        self.get_profile(id)
            .await?
            .ok_or_else(|| StateError::NotFound(format!("Profile {}", id)))
    }

    /// Move a profile to `status`
    pub async fn mark_profile(&self, id: &str, status: ProfileStatus, now: i64) -> StateResponse<ProfileRecord> {
        debug!(%id, %status, "mark_profile: called");
        let record = self
            .request(|reply| StateCommand::MarkProfile {
                id: id.to_string(),
                status,
                now,
                reply,
            })
            .await?;
        self.emit(StateEvent::ProfileUpdated {
            id: record.profile_id.clone(),
            status: record.status,
        });
        Ok(record)
    }

    /// Count a failed send attempt against the retry ceiling
    pub async fn record_failure(&self, id: &str, reason: &str, now: i64) -> StateResponse<ProfileRecord> {
        debug!(%id, %reason, "record_failure: called");
        let record = self
            .request(|reply| StateCommand::RecordFailure {
                id: id.to_string(),
                reason: reason.to_string(),
                now,
                reply,
            })
            .await?;
        self.emit(StateEvent::ProfileUpdated {
            id: record.profile_id.clone(),
            status: record.status,
        });
        Ok(record)
    }

    /// Store a reason on a profile without changing its status
    pub async fn set_profile_error(&self, id: &str, reason: &str) -> StateResponse<()> {
        debug!(%id, %reason, "set_profile_error: called");
        self.request(|reply| StateCommand::SetProfileError {
            id: id.to_string(),
            reason: reason.to_string(),
            reply,
        })
        .await
    }

    /// True if the profile may still be invited
    pub async fn is_contactable(&self, id: &str) -> StateResponse<bool> {
        debug!(%id, "is_contactable: called");
        self.request(|reply| StateCommand::IsContactable {
            id: id.to_string(),
            reply,
        })
        .await
    }

    /// List profiles, most recently touched first
    pub async fn list_profiles(
        &self,
        status_filter: Option<ProfileStatus>,
        limit: Option<usize>,
    ) -> StateResponse<Vec<ProfileRecord>> {
        debug!(?status_filter, ?limit, "list_profiles: called");
        self.request(|reply| StateCommand::ListProfiles {
            status_filter,
            limit,
            reply,
        })
        .await
    }

    /// Contactable profiles in discovery order
    pub async fn contactable_profiles(&self) -> StateResponse<Vec<ProfileRecord>> {
        debug!("contactable_profiles: called");
        self.request(|reply| StateCommand::ContactableProfiles { reply }).await
    }

    /// Number of profiles per status
    pub async fn status_counts(&self) -> StateResponse<StatusCounts> {
        debug!("status_counts: called");
        self.request(|reply| StateCommand::StatusCounts { reply }).await
    }

    // === Sent-event operations ===

    /// Append a sent event if every guard has capacity
    pub async fn record_sent(&self, guards: Vec<WindowGuard>, event: SentEvent) -> StateResponse<SentEvent> {
        debug!(guards = guards.len(), sent_at = event.sent_at, "record_sent: called");
        self.request(|reply| StateCommand::RecordSent { guards, event, reply })
            .await
    }

    /// Record a successful invitation and mark the profile `invited` in one transaction
    pub async fn record_invitation(
        &self,
        guards: Vec<WindowGuard>,
        profile_id: &str,
        session_id: Option<&str>,
        now: i64,
    ) -> StateResponse<ProfileRecord> {
        debug!(%profile_id, ?session_id, "record_invitation: called");
        let session_id = session_id.map(str::to_string);
        let record = self
            .request(|reply| StateCommand::RecordInvitation {
                guards,
                profile_id: profile_id.to_string(),
                session_id: session_id.clone(),
                now,
                reply,
            })
            .await?;
        self.emit(StateEvent::InvitationRecorded {
            profile_id: record.profile_id.clone(),
            session_id,
        });
        self.emit(StateEvent::ProfileUpdated {
            id: record.profile_id.clone(),
            status: record.status,
        });
        Ok(record)
    }

    /// Number of sent events in a window scope
    pub async fn count_sent(&self, scope: WindowScope) -> StateResponse<u32> {
        debug!(?scope, "count_sent: called");
        self.request(|reply| StateCommand::CountSent { scope, reply }).await
    }

    /// Send times in a window scope, oldest first
    pub async fn sent_times(&self, scope: WindowScope) -> StateResponse<Vec<i64>> {
        debug!(?scope, "sent_times: called");
        self.request(|reply| StateCommand::SentTimes { scope, reply }).await
    }

    /// Most recent sent events, newest first
    pub async fn recent_sent(&self, limit: usize) -> StateResponse<Vec<SentEvent>> {
        debug!(limit, "recent_sent: called");
        self.request(|reply| StateCommand::RecentSent { limit, reply }).await
    }

    // === Run session operations ===

    /// Persist a new run session
    pub async fn create_session(&self, session: RunSession) -> StateResponse<String> {
        debug!(session_id = %session.id, "create_session: called");
        let state = session.state;
        let id = self
            .request(|reply| StateCommand::CreateSession { session, reply })
            .await?;
        self.emit(StateEvent::SessionUpdated { id: id.clone(), state });
        Ok(id)
    }

    /// Persist changes to a run session
    pub async fn update_session(&self, session: RunSession) -> StateResponse<()> {
        debug!(session_id = %session.id, state = %session.state, "update_session: called");
        let id = session.id.clone();
        let state = session.state;
        self.request(|reply| StateCommand::UpdateSession { session, reply })
            .await?;
        self.emit(StateEvent::SessionUpdated { id, state });
        Ok(())
    }

    /// Get a run session by ID
    pub async fn get_session(&self, id: &str) -> StateResponse<Option<RunSession>> {
        debug!(%id, "get_session: called");
        self.request(|reply| StateCommand::GetSession {
            id: id.to_string(),
            reply,
        })
        .await
    }

    /// Run sessions, newest first
    pub async fn list_sessions(&self, limit: Option<usize>) -> StateResponse<Vec<RunSession>> {
        debug!(?limit, "list_sessions: called");
        self.request(|reply| StateCommand::ListSessions { limit, reply }).await
    }

    /// Sessions never closed (running or paused), newest first
    pub async fn open_sessions(&self) -> StateResponse<Vec<RunSession>> {
        debug!("open_sessions: called");
        self.request(|reply| StateCommand::OpenSessions { reply }).await
    }

    /// Shutdown the actor
    pub async fn shutdown(&self) -> StateResponse<()> {
        debug!("shutdown: called");
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

/// The actor loop that processes commands
async fn actor_loop(mut store: Store, retry_ceiling: u32, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("actor_loop: called");
    debug!("StateManager actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            // Profile operations
            StateCommand::UpsertProfile { candidate, now, reply } => {
                debug!(profile_id = %candidate.profile_id, "actor_loop: UpsertProfile command");
                let result = store
                    .upsert_profile(candidate.id(), candidate.url.as_deref(), &candidate.attributes, now)
                    .map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::GetProfile { id, reply } => {
                debug!(%id, "actor_loop: GetProfile command");
                let _ = reply.send(store.get_profile(&id).map_err(StateError::from));
            }

            StateCommand::MarkProfile { id, status, now, reply } => {
                debug!(%id, %status, "actor_loop: MarkProfile command");
                let _ = reply.send(store.mark_profile(&id, status, now).map_err(StateError::from));
            }

            StateCommand::RecordFailure { id, reason, now, reply } => {
                debug!(%id, "actor_loop: RecordFailure command");
                let result = store
                    .record_failure(&id, &reason, retry_ceiling, now)
                    .map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::SetProfileError { id, reason, reply } => {
                debug!(%id, "actor_loop: SetProfileError command");
                let _ = reply.send(store.set_profile_error(&id, &reason).map_err(StateError::from));
            }

            StateCommand::IsContactable { id, reply } => {
                debug!(%id, "actor_loop: IsContactable command");
                let _ = reply.send(store.is_contactable(&id, retry_ceiling).map_err(StateError::from));
            }

            StateCommand::ListProfiles {
                status_filter,
                limit,
                reply,
            } => {
                debug!(?status_filter, ?limit, "actor_loop: ListProfiles command");
                let _ = reply.send(store.list_profiles(status_filter, limit).map_err(StateError::from));
            }

            StateCommand::ContactableProfiles { reply } => {
                debug!("actor_loop: ContactableProfiles command");
                let _ = reply.send(store.contactable_profiles(retry_ceiling).map_err(StateError::from));
            }

            StateCommand::StatusCounts { reply } => {
                debug!("actor_loop: StatusCounts command");
                let _ = reply.send(store.status_counts().map_err(StateError::from));
            }

            // Sent-event operations
            StateCommand::RecordSent { guards, event, reply } => {
                debug!(guards = guards.len(), "actor_loop: RecordSent command");
                let _ = reply.send(store.record_sent(&guards, event).map_err(StateError::from));
            }

            StateCommand::RecordInvitation {
                guards,
                profile_id,
                session_id,
                now,
                reply,
            } => {
                debug!(%profile_id, ?session_id, "actor_loop: RecordInvitation command");
                let result = store
                    .record_invitation(&guards, &profile_id, session_id.as_deref(), now)
                    .map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::CountSent { scope, reply } => {
                debug!(?scope, "actor_loop: CountSent command");
                let _ = reply.send(store.count_sent(&scope).map_err(StateError::from));
            }

            StateCommand::SentTimes { scope, reply } => {
                debug!(?scope, "actor_loop: SentTimes command");
                let _ = reply.send(store.sent_times(&scope).map_err(StateError::from));
            }

            StateCommand::RecentSent { limit, reply } => {
                debug!(limit, "actor_loop: RecentSent command");
                let _ = reply.send(store.recent_sent(limit).map_err(StateError::from));
            }

            // Run session operations
            StateCommand::CreateSession { session, reply } => {
                debug!(session_id = %session.id, "actor_loop: CreateSession command");
                let result = store
                    .create_session(&session)
                    .map(|_| session.id)
                    .map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::UpdateSession { session, reply } => {
                debug!(session_id = %session.id, "actor_loop: UpdateSession command");
                let _ = reply.send(store.update_session(&session).map_err(StateError::from));
            }

            StateCommand::GetSession { id, reply } => {
                debug!(%id, "actor_loop: GetSession command");
                let _ = reply.send(store.get_session(&id).map_err(StateError::from));
            }

            StateCommand::ListSessions { limit, reply } => {
                debug!(?limit, "actor_loop: ListSessions command");
                let _ = reply.send(store.list_sessions(limit).map_err(StateError::from));
            }

            StateCommand::OpenSessions { reply } => {
                debug!("actor_loop: OpenSessions command");
                let _ = reply.send(store.open_sessions().map_err(StateError::from));
            }

            StateCommand::Shutdown => {
                debug!("actor_loop: Shutdown command");
                info!("StateManager shutting down");
                break;
            }
        }
    }

    debug!("StateManager actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProfileId;
    use tempfile::tempdir;

    fn candidate(id: &str) -> Candidate {
        Candidate::new(ProfileId::new(id).unwrap()).with_attribute("role", "CTO")
    }

    #[tokio::test]
    async fn test_state_manager_profile_crud() {
        let temp = tempdir().unwrap();
        let manager = StateManager::spawn(temp.path(), 2).unwrap();

        // Upsert
        let record = manager.upsert_profile(candidate("jane"), 10).await.unwrap();
        assert_eq!(record.status, ProfileStatus::Discovered);
        assert_eq!(record.attribute("role"), Some("CTO"));

        // Mark
        let record = manager.mark_profile("jane", ProfileStatus::Queued, 20).await.unwrap();
        assert_eq!(record.status, ProfileStatus::Queued);
        assert!(manager.is_contactable("jane").await.unwrap());

        // List
        let queued = manager.list_profiles(Some(ProfileStatus::Queued), None).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(manager.status_counts().await.unwrap().queued, 1);

        // Shutdown
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_state_manager_get_nonexistent() {
        let manager = StateManager::spawn_in_memory(2).unwrap();

        assert!(manager.get_profile("ghost").await.unwrap().is_none());
        let err = manager.get_profile_required("ghost").await.unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
        let err = manager.mark_profile("ghost", ProfileStatus::Invited, 1).await.unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_record_failure_uses_retry_ceiling() {
        let manager = StateManager::spawn_in_memory(2).unwrap();
        manager.upsert_profile(candidate("jane"), 1).await.unwrap();

        let first = manager.record_failure("jane", "timeout", 2).await.unwrap();
        assert_eq!(first.status, ProfileStatus::Queued);
        assert_eq!(first.attempt_count, 1);

        let second = manager.record_failure("jane", "timeout", 3).await.unwrap();
        assert_eq!(second.status, ProfileStatus::Failed);
        assert_eq!(second.attempt_count, 2);
        assert!(!manager.is_contactable("jane").await.unwrap());
    }

    #[tokio::test]
    async fn test_record_invitation_broadcasts() {
        let manager = StateManager::spawn_in_memory(2).unwrap();
        let mut events = manager.subscribe_events();
        manager.upsert_profile(candidate("jane"), 1).await.unwrap();

        let guards = vec![WindowGuard::rolling("daily", 1, 5, 86_400_000)];
        manager.record_invitation(guards.clone(), "jane", None, 5).await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            StateEvent::InvitationRecorded {
                profile_id: "jane".to_string(),
                session_id: None
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            StateEvent::ProfileUpdated {
                id: "jane".to_string(),
                status: ProfileStatus::Invited
            }
        );

        // Cap of one is now used up
        manager.upsert_profile(candidate("john"), 6).await.unwrap();
        let err = manager.record_invitation(guards, "john", None, 6).await.unwrap_err();
        assert!(matches!(err, StateError::LimitExceeded { .. }));
        assert_eq!(manager.count_sent(WindowScope::After(0)).await.unwrap(), 1);
        assert!(manager.is_contactable("john").await.unwrap());
    }

    #[tokio::test]
    async fn test_session_crud() {
        let manager = StateManager::spawn_in_memory(2).unwrap();
        let session = RunSession::new(serde_json::json!({"role": "CTO"}), 1);
        let id = manager.create_session(session.clone()).await.unwrap();
        assert_eq!(id, session.id);

        let mut loaded = manager.get_session(&id).await.unwrap().unwrap();
        loaded.set_state(SessionState::Paused, 2);
        manager.update_session(loaded).await.unwrap();

        let open = manager.open_sessions().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].state, SessionState::Paused);
        assert_eq!(manager.list_sessions(Some(10)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_channel_error_after_shutdown() {
        let manager = StateManager::spawn_in_memory(2).unwrap();
        manager.shutdown().await.unwrap();
        // Give the actor a moment to exit
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let err = manager.status_counts().await.unwrap_err();
        assert!(matches!(err, StateError::ChannelError));
    }
}
