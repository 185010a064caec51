//! Run session records

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

/// Persisted run session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Running,
    Paused,
    Stopped,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }

    /// Open sessions were never closed; after a crash they are resumable
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "stopped" => Ok(Self::Stopped),
            other => Err(format!("unknown session state '{}'", other)),
        }
    }
}

/// One continuous automation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSession {
    /// Unique identifier (UUIDv7, sorts by creation time)
    pub id: String,

    pub state: SessionState,

    /// Search filters the run was started with
    pub filters: Value,

    pub started_at: i64,
    pub updated_at: i64,
    pub ended_at: Option<i64>,

    pub profiles_visited: u64,
    pub invitations_sent: u64,
    pub failures: u64,

    /// Why the session was closed (operator, exhausted, session_limit, ...)
    pub stop_reason: Option<String>,

    /// Last error observed during the run
    pub last_error: Option<String>,
}

impl RunSession {
    /// Create a new running session
    pub fn new(filters: Value, now: i64) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            state: SessionState::Running,
            filters,
            started_at: now,
            updated_at: now,
            ended_at: None,
            profiles_visited: 0,
            invitations_sent: 0,
            failures: 0,
            stop_reason: None,
            last_error: None,
        }
    }

    pub fn set_state(&mut self, state: SessionState, now: i64) {
        self.state = state;
        self.updated_at = now;
    }

    /// Close the session with a reason
    pub fn close(&mut self, reason: impl Into<String>, now: i64) {
        self.state = SessionState::Stopped;
        self.stop_reason = Some(reason.into());
        self.ended_at = Some(now);
        self.updated_at = now;
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }
}
