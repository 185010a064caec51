//! Action limiter
//!
//! Tracks invitations sent within rolling and per-session windows against
//! their caps and makes the admit/deny decision for the orchestrator.

mod config;
mod core;
mod window;

pub use config::{LimitsConfig, WindowConfig, WindowKind};
pub use core::{Admission, Limiter, admission};
pub use window::{ActionWindow, WindowStatus};
