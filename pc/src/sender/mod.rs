//! Invitation senders
//!
//! The browser side of an invitation sits behind `InvitationSender`. The
//! orchestrator bounds every call with the configured timeout.

mod command;
mod dry_run;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::domain::ProfileRecord;

pub use command::CommandSender;
pub use dry_run::DryRunSender;

/// Result of a send that reached the site
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Invitation sent
    Sent,
    /// The site refused (no connect button, already pending, ...)
    Declined { reason: String },
}

/// Send failures worth retrying
#[derive(Debug, Error)]
pub enum SendError {
    #[error("Transient send failure: {0}")]
    Transient(String),

    #[error("Send timed out after {0:?}")]
    Timeout(Duration),
}

/// Performs the actual invitation for one profile
#[async_trait]
pub trait InvitationSender: Send + Sync {
    async fn send(&self, profile: &ProfileRecord) -> Result<SendOutcome, SendError>;
}
