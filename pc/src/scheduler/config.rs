//! Pacing configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ConfigError;

/// Humanized timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Lower bound of the delay between sends
    #[serde(rename = "min-delay-ms")]
    pub min_delay_ms: u64,

    /// Upper bound of the delay between sends
    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,

    /// Longest single sleep while paused before re-checking the limiter
    #[serde(rename = "pause-poll-ms")]
    pub pause_poll_ms: u64,

    /// Jitter added to pauses, as a fraction of the base pause
    #[serde(rename = "jitter-ratio")]
    pub jitter_ratio: f64,

    /// Upper bound on the jitter added to a pause
    #[serde(rename = "max-jitter-ms")]
    pub max_jitter_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 10_000,
            max_delay_ms: 30_000,
            pause_poll_ms: 300_000,
            jitter_ratio: 0.1,
            max_jitter_ms: 60_000,
        }
    }
}

impl PacingConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.min_delay_ms > self.max_delay_ms {
            return Err(ConfigError::DelayRange {
                min: self.min_delay_ms,
                max: self.max_delay_ms,
            });
        }
        if !self.jitter_ratio.is_finite() || self.jitter_ratio < 0.0 {
            return Err(ConfigError::JitterRatio(self.jitter_ratio));
        }
        if self.pause_poll_ms == 0 {
            return Err(ConfigError::ZeroPausePoll);
        }
        Ok(())
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pacing() {
        let config = PacingConfig::default();
        assert_eq!(config.min_delay_ms, 10_000);
        assert_eq!(config.max_delay_ms, 30_000);
        assert_eq!(config.pause_poll(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_negative_jitter() {
        let config = PacingConfig {
            jitter_ratio: -0.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::JitterRatio(_))));
    }

    #[test]
    fn test_rejects_zero_pause_poll() {
        let config = PacingConfig {
            pause_poll_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroPausePoll)));
    }
}
