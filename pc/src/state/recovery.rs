//! Crash recovery
//!
//! Finds run sessions left open by a crash and prepares the store for the
//! next run.

use eyre::WrapErr;
use tracing::{debug, info, warn};

use crate::domain::RunSession;

use super::StateManager;

/// Stop reason written on stale sessions that are not resumed
pub const INTERRUPTED: &str = "interrupted";

/// Recovery statistics
#[derive(Debug, Default)]
pub struct RecoveryStats {
    /// Open session picked up by the next run
    pub resumable: Option<RunSession>,
    /// Older open sessions closed as interrupted
    pub sessions_interrupted: usize,
    /// Profiles still eligible for an invitation
    pub contactable_profiles: usize,
}

impl std::fmt::Display for RecoveryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "resumable: {}, interrupted: {}, contactable: {}",
            self.resumable.as_ref().map(|s| s.id.as_str()).unwrap_or("none"),
            self.sessions_interrupted,
            self.contactable_profiles
        )
    }
}

/// Scan for incomplete runs without changing anything
pub async fn scan_for_recovery(state: &StateManager) -> eyre::Result<RecoveryStats> {
    let open = state
        .open_sessions()
        .await
        .wrap_err("Failed to list open sessions")?;
    let contactable = state
        .contactable_profiles()
        .await
        .wrap_err("Failed to list contactable profiles")?;

    for session in &open {
        debug!(session_id = %session.id, state = %session.state, "Found open session");
    }

    let mut open = open.into_iter();
    Ok(RecoveryStats {
        resumable: open.next(),
        sessions_interrupted: open.count(),
        contactable_profiles: contactable.len(),
    })
}

/// Full recovery: keep the newest open session for resumption, close the rest
pub async fn recover(state: &StateManager, now: i64) -> eyre::Result<RecoveryStats> {
    info!("Starting crash recovery process");

    let open = state
        .open_sessions()
        .await
        .wrap_err("Failed to list open sessions")?;

    // Newest first
    let mut open = open.into_iter();
    let resumable = open.next();
    let mut sessions_interrupted = 0;

    for mut stale in open {
        warn!(session_id = %stale.id, state = %stale.state, "Closing stale run session");
        stale.close(INTERRUPTED, now);
        state
            .update_session(stale)
            .await
            .wrap_err("Failed to close stale session")?;
        sessions_interrupted += 1;
    }

    let contactable_profiles = state
        .contactable_profiles()
        .await
        .wrap_err("Failed to list contactable profiles")?
        .len();

    let stats = RecoveryStats {
        resumable,
        sessions_interrupted,
        contactable_profiles,
    };
    info!("Crash recovery complete: {}", stats);
    Ok(stats)
}
