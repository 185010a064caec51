//! Invitation orchestrator
//!
//! Ties the target queue, limiter, scheduler and sender into one run:
//! idle → running → (paused ⇄ running) → stopped. The worker owns all run
//! state; operators talk to it through an `OrchestratorHandle` and observe it
//! through published `RunStatus` snapshots.

mod engine;
mod handle;
mod messages;
mod status;

pub use engine::{Orchestrator, OrchestratorConfig};
pub use handle::OrchestratorHandle;
pub use messages::{Control, OrchestratorError};
pub use status::{RunCounts, RunState, RunStatus, StopReason};
