//! Sent-event log types
//!
//! Each sent invitation appends one event. Action windows are counts over this
//! log, so they survive restarts without a separate counter.

use serde::{Deserialize, Serialize};

/// A recorded invitation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentEvent {
    /// Row id assigned by the store (0 before insert)
    pub id: i64,

    /// Profile the invitation went to, if known
    pub profile_id: Option<String>,

    /// Run session that sent it
    pub session_id: Option<String>,

    /// Send time (Unix milliseconds)
    pub sent_at: i64,
}

impl SentEvent {
    pub fn new(profile_id: Option<String>, session_id: Option<String>, sent_at: i64) -> Self {
        Self {
            id: 0,
            profile_id,
            session_id,
            sent_at,
        }
    }
}

/// Which events a window counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowScope {
    /// Events with `sent_at` strictly after the given instant
    After(i64),
    /// Events tagged with the given run session
    Session(String),
}

/// A cap checked inside the insert transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowGuard {
    pub name: String,
    pub cap: u32,
    pub scope: WindowScope,
}

impl WindowGuard {
    /// Rolling window ending at `now`
    pub fn rolling(name: impl Into<String>, cap: u32, now: i64, period_ms: i64) -> Self {
        Self {
            name: name.into(),
            cap,
            scope: WindowScope::After(now.saturating_sub(period_ms)),
        }
    }

    /// Window scoped to one run session
    pub fn session(name: impl Into<String>, cap: u32, session_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cap,
            scope: WindowScope::Session(session_id.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_guard_lower_bound() {
        let guard = WindowGuard::rolling("daily", 20, 100_000, 60_000);
        assert_eq!(guard.scope, WindowScope::After(40_000));
        assert_eq!(guard.cap, 20);
    }

    #[test]
    fn test_rolling_guard_saturates() {
        let guard = WindowGuard::rolling("huge", 1, i64::MIN + 5, 10);
        assert_eq!(guard.scope, WindowScope::After(i64::MIN));
    }
}
