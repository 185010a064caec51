//! Humanized scheduler implementation

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tracing::debug;

use super::config::PacingConfig;

/// Produces randomized, bounded delays between actions
pub struct HumanizedScheduler {
    config: PacingConfig,
    rng: Box<dyn RngCore + Send>,
}

impl std::fmt::Debug for HumanizedScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HumanizedScheduler").field("config", &self.config).finish()
    }
}

impl HumanizedScheduler {
    /// Scheduler seeded from the OS
    pub fn new(config: PacingConfig) -> Self {
        debug!(?config, "HumanizedScheduler::new: called");
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Deterministic scheduler for tests and replays
    pub fn with_seed(config: PacingConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    /// Scheduler over an injected random source
    pub fn with_rng(config: PacingConfig, rng: impl RngCore + Send + 'static) -> Self {
        Self {
            config,
            rng: Box::new(rng),
        }
    }

    pub fn config(&self) -> &PacingConfig {
        &self.config
    }

    /// Delay before the next send, uniform in `[min-delay, max-delay]`
    pub fn next_delay(&mut self) -> Duration {
        let min = self.config.min_delay_ms;
        let max = self.config.max_delay_ms.max(min);
        let ms = self.rng.random_range(min..=max);
        debug!(ms, "HumanizedScheduler::next_delay: picked");
        Duration::from_millis(ms)
    }

    /// `base` plus a random jitter of at most `min(base * jitter-ratio, max-jitter)`
    pub fn jittered_pause(&mut self, base: Duration) -> Duration {
        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let jitter_cap = ((base_ms as f64) * self.config.jitter_ratio) as u64;
        let jitter_cap = jitter_cap.min(self.config.max_jitter_ms);
        let jitter = if jitter_cap == 0 {
            0
        } else {
            self.rng.random_range(0..=jitter_cap)
        };
        debug!(base_ms, jitter, "HumanizedScheduler::jittered_pause: picked");
        base.saturating_add(Duration::from_millis(jitter))
    }

    /// Sleep length while paused: until the next eligible time, capped at the poll interval
    ///
    /// `until_eligible` is `None` when no window will free up on its own.
    pub fn pause_for(&mut self, until_eligible: Option<Duration>) -> Duration {
        let poll = self.config.pause_poll();
        let base = until_eligible.map(|d| d.min(poll)).unwrap_or(poll);
        self.jittered_pause(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pacing(min: u64, max: u64) -> PacingConfig {
        PacingConfig {
            min_delay_ms: min,
            max_delay_ms: max,
            ..Default::default()
        }
    }

    #[test]
    fn test_next_delay_bounds() {
        let mut scheduler = HumanizedScheduler::with_seed(pacing(1_000, 5_000), 42);
        let min = Duration::from_millis(1_000);
        let max = Duration::from_millis(5_000);
        for _ in 0..10_000 {
            let delay = scheduler.next_delay();
            assert!(delay >= min && delay <= max, "delay out of range: {:?}", delay);
            assert!(!delay.is_zero());
        }
    }

    #[test]
    fn test_next_delay_spreads() {
        let mut scheduler = HumanizedScheduler::with_seed(pacing(0, 10_000), 7);
        let samples: Vec<Duration> = (0..1_000).map(|_| scheduler.next_delay()).collect();
        let low = samples.iter().filter(|d| d.as_millis() < 5_000).count();
        // Roughly half below the midpoint
        assert!((350..650).contains(&low), "low half count {}", low);
    }

    #[test]
    fn test_fixed_delay() {
        let mut scheduler = HumanizedScheduler::with_seed(pacing(2_500, 2_500), 1);
        assert_eq!(scheduler.next_delay(), Duration::from_millis(2_500));
    }

    #[test]
    fn test_seeded_schedulers_agree() {
        let mut a = HumanizedScheduler::with_seed(pacing(0, 100_000), 99);
        let mut b = HumanizedScheduler::with_seed(pacing(0, 100_000), 99);
        for _ in 0..20 {
            assert_eq!(a.next_delay(), b.next_delay());
        }
    }

    #[test]
    fn test_jittered_pause_bounds() {
        let config = PacingConfig {
            jitter_ratio: 0.5,
            max_jitter_ms: 1_000,
            ..Default::default()
        };
        let mut scheduler = HumanizedScheduler::with_seed(config, 3);

        // Ratio-bound: up to 500ms on a 1s base
        for _ in 0..1_000 {
            let pause = scheduler.jittered_pause(Duration::from_secs(1));
            assert!(pause >= Duration::from_secs(1) && pause <= Duration::from_millis(1_500));
        }

        // Cap-bound: at most 1s of jitter on a 10s base
        for _ in 0..1_000 {
            let pause = scheduler.jittered_pause(Duration::from_secs(10));
            assert!(pause >= Duration::from_secs(10) && pause <= Duration::from_secs(11));
        }

        assert_eq!(scheduler.jittered_pause(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_pause_for_caps_at_poll_interval() {
        let config = PacingConfig {
            pause_poll_ms: 60_000,
            jitter_ratio: 0.0,
            ..Default::default()
        };
        let mut scheduler = HumanizedScheduler::with_seed(config, 5);
        assert_eq!(scheduler.pause_for(Some(Duration::from_secs(5))), Duration::from_secs(5));
        assert_eq!(scheduler.pause_for(Some(Duration::from_secs(3_600))), Duration::from_secs(60));
        assert_eq!(scheduler.pause_for(None), Duration::from_secs(60));
    }
}
