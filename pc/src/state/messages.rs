//! State manager messages
//!
//! Commands and responses for the actor pattern.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{
    Candidate, ProfileRecord, ProfileStatus, RunSession, SentEvent, StatusCounts, StoreError, WindowGuard, WindowScope,
};

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid status transition for {profile_id}: {from} -> {to}")]
    InvalidTransition {
        profile_id: String,
        from: ProfileStatus,
        to: ProfileStatus,
    },

    #[error("Window '{window}' exhausted ({count}/{cap})")]
    LimitExceeded { window: String, count: u32, cap: u32 },

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Channel error")]
    ChannelError,
}

impl From<StoreError> for StateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => StateError::NotFound(format!("Profile {}", id)),
            StoreError::SessionNotFound(id) => StateError::NotFound(format!("Session {}", id)),
            StoreError::InvalidTransition { profile_id, from, to } => {
                StateError::InvalidTransition { profile_id, from, to }
            }
            StoreError::LimitExceeded { window, count, cap } => StateError::LimitExceeded { window, count, cap },
            other => StateError::StoreError(other.to_string()),
        }
    }
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    // Profile operations
    UpsertProfile {
        candidate: Candidate,
        now: i64,
        reply: oneshot::Sender<StateResponse<ProfileRecord>>,
    },
    GetProfile {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<ProfileRecord>>>,
    },
    MarkProfile {
        id: String,
        status: ProfileStatus,
        now: i64,
        reply: oneshot::Sender<StateResponse<ProfileRecord>>,
    },
    RecordFailure {
        id: String,
        reason: String,
        now: i64,
        reply: oneshot::Sender<StateResponse<ProfileRecord>>,
    },
    SetProfileError {
        id: String,
        reason: String,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    IsContactable {
        id: String,
        reply: oneshot::Sender<StateResponse<bool>>,
    },
    ListProfiles {
        status_filter: Option<ProfileStatus>,
        limit: Option<usize>,
        reply: oneshot::Sender<StateResponse<Vec<ProfileRecord>>>,
    },
    ContactableProfiles {
        reply: oneshot::Sender<StateResponse<Vec<ProfileRecord>>>,
    },
    StatusCounts {
        reply: oneshot::Sender<StateResponse<StatusCounts>>,
    },

    // Sent-event operations
    RecordSent {
        guards: Vec<WindowGuard>,
        event: SentEvent,
        reply: oneshot::Sender<StateResponse<SentEvent>>,
    },
    RecordInvitation {
        guards: Vec<WindowGuard>,
        profile_id: String,
        session_id: Option<String>,
        now: i64,
        reply: oneshot::Sender<StateResponse<ProfileRecord>>,
    },
    CountSent {
        scope: WindowScope,
        reply: oneshot::Sender<StateResponse<u32>>,
    },
    SentTimes {
        scope: WindowScope,
        reply: oneshot::Sender<StateResponse<Vec<i64>>>,
    },
    RecentSent {
        limit: usize,
        reply: oneshot::Sender<StateResponse<Vec<SentEvent>>>,
    },

    // Run session operations
    CreateSession {
        session: RunSession,
        reply: oneshot::Sender<StateResponse<String>>,
    },
    UpdateSession {
        session: RunSession,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    GetSession {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<RunSession>>>,
    },
    ListSessions {
        limit: Option<usize>,
        reply: oneshot::Sender<StateResponse<Vec<RunSession>>>,
    },
    OpenSessions {
        reply: oneshot::Sender<StateResponse<Vec<RunSession>>>,
    },

    // Shutdown
    Shutdown,
}
