//! Sender that pretends every invitation went out

use async_trait::async_trait;
use std::sync::Mutex;
use tracing::info;

use crate::domain::ProfileRecord;

use super::{InvitationSender, SendError, SendOutcome};

/// Reports every send as successful without side effects
#[derive(Debug, Default)]
pub struct DryRunSender {
    sent: Mutex<Vec<String>>,
}

impl DryRunSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Profile IDs "sent" so far, in order
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl InvitationSender for DryRunSender {
    async fn send(&self, profile: &ProfileRecord) -> Result<SendOutcome, SendError> {
        info!(profile_id = %profile.profile_id, "Dry run: invitation not actually sent");
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(profile.profile_id.clone());
        }
        Ok(SendOutcome::Sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dry_run_always_sends() {
        let sender = DryRunSender::new();
        for id in ["a", "b"] {
            let outcome = sender.send(&ProfileRecord::new(id, 1)).await.unwrap();
            assert_eq!(outcome, SendOutcome::Sent);
        }
        assert_eq!(sender.sent(), vec!["a", "b"]);
    }
}
