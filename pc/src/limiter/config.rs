//! Action window configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ConfigError;

/// How a window counts sent invitations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowKind {
    /// Events newer than `now - period`
    #[default]
    Rolling,

    /// Events of the current run session
    Session,
}

/// A single action window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window name shown in status ("daily", "weekly", ...)
    pub name: String,

    /// Maximum invitations inside the window
    pub cap: u32,

    /// Window length; required for rolling windows
    #[serde(rename = "period-secs", default)]
    pub period_secs: Option<u64>,

    #[serde(default)]
    pub kind: WindowKind,
}

impl WindowConfig {
    pub fn rolling(name: impl Into<String>, cap: u32, period: Duration) -> Self {
        Self {
            name: name.into(),
            cap,
            period_secs: Some(period.as_secs()),
            kind: WindowKind::Rolling,
        }
    }

    pub fn session(name: impl Into<String>, cap: u32) -> Self {
        Self {
            name: name.into(),
            cap,
            period_secs: None,
            kind: WindowKind::Session,
        }
    }

    /// Rolling period in milliseconds (0 for session windows)
    pub fn period_ms(&self) -> i64 {
        match self.kind {
            WindowKind::Rolling => self.period_secs.unwrap_or(0).saturating_mul(1000) as i64,
            WindowKind::Session => 0,
        }
    }
}

/// Action windows, retry ceiling and visit cap
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Windows checked before every send
    pub windows: Vec<WindowConfig>,

    /// Failed attempts after which a profile is marked failed
    #[serde(rename = "retry-ceiling")]
    pub retry_ceiling: u32,

    /// Profiles visited per run before stopping (None = unlimited)
    #[serde(rename = "max-profiles-per-session")]
    pub max_profiles_per_session: Option<u64>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            windows: vec![
                WindowConfig::rolling("daily", 20, Duration::from_secs(86_400)),
                WindowConfig::rolling("weekly", 100, Duration::from_secs(604_800)),
            ],
            retry_ceiling: 2,
            max_profiles_per_session: None,
        }
    }
}

impl LimitsConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.windows.is_empty() {
            return Err(ConfigError::NoWindows);
        }
        let mut seen = std::collections::HashSet::new();
        for window in &self.windows {
            if window.cap == 0 {
                return Err(ConfigError::ZeroCap(window.name.clone()));
            }
            if window.kind == WindowKind::Rolling && window.period_ms() <= 0 {
                return Err(ConfigError::MissingPeriod(window.name.clone()));
            }
            if !seen.insert(window.name.as_str()) {
                return Err(ConfigError::DuplicateWindow(window.name.clone()));
            }
        }
        if self.retry_ceiling == 0 {
            return Err(ConfigError::ZeroRetryCeiling);
        }
        Ok(())
    }

    /// Longest rolling period, used to bound history queries
    pub fn longest_period_ms(&self) -> i64 {
        self.windows.iter().map(WindowConfig::period_ms).max().unwrap_or(0)
    }
}
