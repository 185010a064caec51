//! Sliding action windows

use std::collections::VecDeque;

use serde::Serialize;

use crate::domain::WindowGuard;

use super::config::{WindowConfig, WindowKind};

/// In-memory view of one window: its config plus the send times it counts
#[derive(Debug, Clone)]
pub struct ActionWindow {
    config: WindowConfig,
    /// Send times inside the window, oldest first
    sent_times: VecDeque<i64>,
}

/// Per-window numbers for the status surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowStatus {
    pub name: String,
    pub count: u32,
    pub cap: u32,
    /// When a slot frees up (`None` when never, i.e. an exhausted session window)
    pub next_free_at: Option<i64>,
}

impl ActionWindow {
    pub fn new(config: WindowConfig) -> Self {
        Self {
            config,
            sent_times: VecDeque::new(),
        }
    }

    /// Build from the store's send times (any order), pruned to `now`
    pub fn with_history(config: WindowConfig, sent_times: impl IntoIterator<Item = i64>, now: i64) -> Self {
        let mut times: Vec<i64> = sent_times.into_iter().collect();
        times.sort_unstable();
        let mut window = Self {
            config,
            sent_times: times.into(),
        };
        window.prune(now);
        window
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn cap(&self) -> u32 {
        self.config.cap
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Drop send times that left a rolling window; session windows keep everything
    pub fn prune(&mut self, now: i64) {
        if self.config.kind != WindowKind::Rolling {
            return;
        }
        let window_start = now.saturating_sub(self.config.period_ms());
        while self.sent_times.front().map(|t| *t <= window_start).unwrap_or(false) {
            self.sent_times.pop_front();
        }
    }

    pub fn count(&self) -> u32 {
        u32::try_from(self.sent_times.len()).unwrap_or(u32::MAX)
    }

    pub fn has_capacity(&self) -> bool {
        self.count() < self.config.cap
    }

    /// Add a send; the caller checks capacity first
    pub fn push(&mut self, sent_at: i64) {
        self.sent_times.push_back(sent_at);
    }

    /// Earliest time at which this window has a free slot
    ///
    /// `now` when it already has capacity. For a full rolling window, the
    /// moment enough old sends have aged out; `None` for a full session window.
    pub fn next_free_at(&self, now: i64) -> Option<i64> {
        if self.has_capacity() {
            return Some(now);
        }
        match self.config.kind {
            WindowKind::Session => None,
            WindowKind::Rolling => {
                // The send at this index must leave before count drops below cap
                let excess = self.sent_times.len() + 1 - self.config.cap as usize;
                self.sent_times
                    .get(excess - 1)
                    .map(|t| t.saturating_add(self.config.period_ms()))
            }
        }
    }

    /// Store-side guard enforcing this window's cap
    ///
    /// Returns `None` for a session window when no session is bound.
    pub fn guard(&self, now: i64, session_id: Option<&str>) -> Option<WindowGuard> {
        match self.config.kind {
            WindowKind::Rolling => Some(WindowGuard::rolling(
                self.config.name.clone(),
                self.config.cap,
                now,
                self.config.period_ms(),
            )),
            WindowKind::Session => {
                session_id.map(|id| WindowGuard::session(self.config.name.clone(), self.config.cap, id))
            }
        }
    }

    pub fn status(&self, now: i64) -> WindowStatus {
        WindowStatus {
            name: self.config.name.clone(),
            count: self.count(),
            cap: self.config.cap,
            next_free_at: self.next_free_at(now),
        }
    }
}
