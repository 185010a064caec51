//! Humanized scheduler
//!
//! All randomized timing lives here: the delay before each send and the
//! jittered sleeps while the run is paused.

mod config;
mod core;

pub use config::PacingConfig;
pub use core::HumanizedScheduler;
