//! Run state and status snapshots

use serde::Serialize;
use tracing::debug;

use crate::domain::{RunSession, SearchFilters, SessionState, StatusCounts};
use crate::limiter::{Limiter, LimitsConfig, WindowStatus};
use crate::state::{StateManager, StateResponse};

/// Orchestrator state: idle → running → (paused ⇄ running) → stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Paused,
    Stopped,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }

    /// Running or paused
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<SessionState> for RunState {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::Running => Self::Running,
            SessionState::Paused => Self::Paused,
            SessionState::Stopped => Self::Stopped,
        }
    }
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `stop()` from the operator
    Operator,
    /// The search ran out of candidates
    Exhausted,
    /// A session window is used up
    SessionLimit,
    /// `max-profiles-per-session` reached
    VisitLimit,
    /// Store, limiter or search failure
    Error,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operator => "operator",
            Self::Exhausted => "exhausted",
            Self::SessionLimit => "session_limit",
            Self::VisitLimit => "visit_limit",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StopReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "operator" => Ok(Self::Operator),
            "exhausted" => Ok(Self::Exhausted),
            "session_limit" => Ok(Self::SessionLimit),
            "visit_limit" => Ok(Self::VisitLimit),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown stop reason: {}", other)),
        }
    }
}

/// Counters of the current (or last) run session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub profiles_visited: u64,
    pub invitations_sent: u64,
    pub failures: u64,
}

impl From<&RunSession> for RunCounts {
    fn from(session: &RunSession) -> Self {
        Self {
            profiles_visited: session.profiles_visited,
            invitations_sent: session.invitations_sent,
            failures: session.failures,
        }
    }
}

/// Snapshot published on every state change
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStatus {
    pub state: RunState,
    pub session_id: Option<String>,
    /// Paused by the operator rather than by a window
    pub operator_paused: bool,
    pub filters: SearchFilters,
    pub counts: RunCounts,
    /// Profiles per status across the whole store
    pub profiles: StatusCounts,
    pub windows: Vec<WindowStatus>,
    /// Window that paused the run
    pub paused_on: Option<String>,
    pub next_eligible_at: Option<i64>,
    pub last_error: Option<String>,
    pub stop_reason: Option<StopReason>,
    pub updated_at: i64,
}

impl RunStatus {
    /// Status of the most recent session as recorded in the store
    ///
    /// Used when no orchestrator is running in this process.
    pub async fn from_store(state: &StateManager, limits: &LimitsConfig, now: i64) -> StateResponse<Self> {
        debug!(now, "RunStatus::from_store: called");
        let session = state.list_sessions(Some(1)).await?.into_iter().next();

        let mut limiter = Limiter::new(limits.clone(), state.clone());
        if let Some(session) = session.as_ref().filter(|s| s.is_open()) {
            limiter.bind_session(session.id.clone());
        }

        let windows = limiter.window_status(now).await?;
        let next_eligible_at = limiter.next_eligible(now).await?;
        let profiles = state.status_counts().await?;

        let mut status = RunStatus {
            profiles,
            windows,
            next_eligible_at,
            updated_at: now,
            ..Default::default()
        };
        if let Some(session) = session {
            status.state = session.state.into();
            status.filters = serde_json::from_value(session.filters.clone()).unwrap_or_default();
            status.counts = RunCounts::from(&session);
            status.stop_reason = session.stop_reason.as_deref().and_then(|r| r.parse().ok());
            status.last_error = session.last_error.clone();
            status.session_id = Some(session.id);
        }
        Ok(status)
    }
}
