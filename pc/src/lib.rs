//! InvitePacer - paced, deduplicated connection invitations
//!
//! Works through a stream of candidate profiles and sends each one at most
//! one invitation, while keeping every configured action window under its
//! cap and spacing sends with randomized delays.
//!
//! # Modules
//!
//! - [`state`] - Profile store actor over `pacestore`
//! - [`limiter`] - Rolling and per-session action windows
//! - [`scheduler`] - Humanized delays and pause lengths
//! - [`queue`] - Deduplicated target queue fed by a search provider
//! - [`orchestrator`] - The run state machine
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod clock;
pub mod config;
pub mod domain;
pub mod limiter;
pub mod orchestrator;
pub mod queue;
pub mod scheduler;
pub mod search;
pub mod sender;
pub mod state;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use domain::{Candidate, ProfileId, ProfileRecord, ProfileStatus, RunSession, SearchFilters};
pub use limiter::{Admission, Limiter, LimitsConfig, WindowConfig, WindowKind};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, OrchestratorError, OrchestratorHandle, RunState, RunStatus, StopReason,
};
pub use queue::TargetQueue;
pub use scheduler::{HumanizedScheduler, PacingConfig};
pub use search::{JsonlSearchProvider, MemorySearchProvider, SearchProvider};
pub use sender::{CommandSender, DryRunSender, InvitationSender, SendOutcome};
pub use state::StateManager;
