//! Limiter implementation

use tracing::{debug, info};

use crate::domain::{ProfileRecord, SentEvent, WindowGuard, WindowScope};
use crate::state::{StateManager, StateResponse};

use super::config::{LimitsConfig, WindowKind};
use super::window::{ActionWindow, WindowStatus};

/// Result of asking the limiter for a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Every window has capacity
    Admit,

    /// At least one window is exhausted
    Paused {
        /// First exhausted window
        window: String,
        /// When every exhausted window has a slot again (`None` = not within this session)
        next_eligible_at: Option<i64>,
    },
}

impl Admission {
    pub fn is_admit(&self) -> bool {
        matches!(self, Admission::Admit)
    }
}

/// The Limiter owns the admit/deny decision over all configured windows.
///
/// Window counts are rebuilt from the store's sent-event log on every call,
/// so several handles (or processes) over the same store agree on them.
pub struct Limiter {
    config: LimitsConfig,
    state: StateManager,
    session_id: Option<String>,
}

impl Limiter {
    /// Create a limiter with the given configuration
    pub fn new(config: LimitsConfig, state: StateManager) -> Self {
        debug!(?config, "Limiter::new: called");
        Self {
            config,
            state,
            session_id: None,
        }
    }

    /// Attribute future sends to a run session (drives session windows)
    pub fn bind_session(&mut self, session_id: impl Into<String>) {
        let session_id = session_id.into();
        debug!(%session_id, "Limiter::bind_session: called");
        self.session_id = Some(session_id);
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn config(&self) -> &LimitsConfig {
        &self.config
    }

    /// Current windows, rebuilt from the sent-event log
    pub async fn windows(&self, now: i64) -> StateResponse<Vec<ActionWindow>> {
        let has_kind = |kind| self.config.windows.iter().any(|w| w.kind == kind);

        let rolling_history = if has_kind(WindowKind::Rolling) {
            let after = now.saturating_sub(self.config.longest_period_ms());
            self.state.sent_times(WindowScope::After(after)).await?
        } else {
            Vec::new()
        };

        let session_history = match &self.session_id {
            Some(id) if has_kind(WindowKind::Session) => self.state.sent_times(WindowScope::Session(id.clone())).await?,
            _ => Vec::new(),
        };

        Ok(self
            .config
            .windows
            .iter()
            .map(|config| {
                let history = match config.kind {
                    WindowKind::Rolling => &rolling_history,
                    WindowKind::Session => &session_history,
                };
                ActionWindow::with_history(config.clone(), history.iter().copied(), now)
            })
            .collect())
    }

    /// Check every window as of `now`
    pub async fn check(&self, now: i64) -> StateResponse<Admission> {
        debug!(now, "Limiter::check: called");
        let windows = self.windows(now).await?;
        Ok(admission(&windows, now))
    }

    /// True iff every window is below its cap
    pub async fn can_send(&self, now: i64) -> StateResponse<bool> {
        Ok(self.check(now).await?.is_admit())
    }

    /// When the next send may happen (`now` if admitted right away)
    pub async fn next_eligible(&self, now: i64) -> StateResponse<Option<i64>> {
        Ok(match self.check(now).await? {
            Admission::Admit => Some(now),
            Admission::Paused { next_eligible_at, .. } => next_eligible_at,
        })
    }

    /// Count a send against every window; rejected when any window is at its cap
    pub async fn record_sent(&self, now: i64) -> StateResponse<SentEvent> {
        debug!(now, session_id = ?self.session_id, "Limiter::record_sent: called");
        let event = SentEvent::new(None, self.session_id.clone(), now);
        self.state.record_sent(self.guards(now), event).await
    }

    /// Count an invitation and mark the profile `invited` atomically
    pub async fn record_invitation(&self, profile_id: &str, now: i64) -> StateResponse<ProfileRecord> {
        debug!(%profile_id, now, "Limiter::record_invitation: called");
        let record = self
            .state
            .record_invitation(self.guards(now), profile_id, self.session_id.as_deref(), now)
            .await?;
        info!(%profile_id, "Invitation counted against windows");
        Ok(record)
    }

    /// Per-window counts for the status surface
    pub async fn window_status(&self, now: i64) -> StateResponse<Vec<WindowStatus>> {
        let windows = self.windows(now).await?;
        Ok(windows.iter().map(|w| w.status(now)).collect())
    }

    fn guards(&self, now: i64) -> Vec<WindowGuard> {
        self.config
            .windows
            .iter()
            .filter_map(|config| ActionWindow::new(config.clone()).guard(now, self.session_id.as_deref()))
            .collect()
    }
}

/// Admission decision over a set of windows
pub fn admission(windows: &[ActionWindow], now: i64) -> Admission {
    let exhausted: Vec<&ActionWindow> = windows.iter().filter(|w| !w.has_capacity()).collect();
    let Some(first) = exhausted.first() else {
        return Admission::Admit;
    };

    // Every exhausted window has to free up; any session window means never
    let next_eligible_at = exhausted
        .iter()
        .map(|w| w.next_free_at(now))
        .collect::<Option<Vec<i64>>>()
        .and_then(|times| times.into_iter().max());

    debug!(window = %first.name(), count = first.count(), cap = first.cap(), ?next_eligible_at, "admission: window exhausted");
    Admission::Paused {
        window: first.name().to_string(),
        next_eligible_at,
    }
}
