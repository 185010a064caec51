//! Sender backed by an external command
//!
//! The command drives the browser session. Exit code 0 means sent, the
//! configured declined code means the site refused, anything else is a
//! transient failure.

use async_trait::async_trait;
use std::process::Stdio;
use tracing::{debug, info, warn};

use crate::config::SenderConfig;
use crate::domain::ProfileRecord;

use super::{InvitationSender, SendError, SendOutcome};

const PROFILE_ID_PLACEHOLDER: &str = "{profile_id}";
const URL_PLACEHOLDER: &str = "{url}";

/// Runs one command per invitation
#[derive(Debug, Clone)]
pub struct CommandSender {
    program: String,
    args: Vec<String>,
    declined_exit_code: i32,
}

impl CommandSender {
    /// Build from the sender config; `None` when no command is configured
    pub fn from_config(config: &SenderConfig) -> Option<Self> {
        let mut parts = config.command.iter().filter(|arg| !arg.trim().is_empty()).cloned();
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
            declined_exit_code: config.declined_exit_code,
        })
    }

    pub fn new(program: impl Into<String>, args: Vec<String>, declined_exit_code: i32) -> Self {
        Self {
            program: program.into(),
            args,
            declined_exit_code,
        }
    }

    /// Arguments with `{profile_id}` and `{url}` substituted
    pub fn render_args(&self, profile: &ProfileRecord) -> Vec<String> {
        let url = profile.url.as_deref().unwrap_or("");
        self.args
            .iter()
            .map(|arg| {
                arg.replace(PROFILE_ID_PLACEHOLDER, &profile.profile_id)
                    .replace(URL_PLACEHOLDER, url)
            })
            .collect()
    }
}

/// Last non-empty line of the command's output, used as the reason
fn last_line(stdout: &[u8], stderr: &[u8]) -> Option<String> {
    [stdout, stderr].iter().find_map(|bytes| {
        String::from_utf8_lossy(bytes)
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    })
}

#[async_trait]
impl InvitationSender for CommandSender {
    async fn send(&self, profile: &ProfileRecord) -> Result<SendOutcome, SendError> {
        let args = self.render_args(profile);
        debug!(profile_id = %profile.profile_id, program = %self.program, ?args, "CommandSender::send: called");

        // Killed if the orchestrator's timeout drops this future
        let output = tokio::process::Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SendError::Transient(format!("failed to run {}: {}", self.program, e)))?;

        let exit_code = output.status.code().unwrap_or(-1);
        let reason = last_line(&output.stdout, &output.stderr);
        debug!(exit_code, ?reason, "CommandSender::send: command completed");

        match exit_code {
            0 => {
                info!(profile_id = %profile.profile_id, "Invitation sent");
                Ok(SendOutcome::Sent)
            }
            code if code == self.declined_exit_code => {
                let reason = reason.unwrap_or_else(|| format!("declined (exit {})", code));
                info!(profile_id = %profile.profile_id, %reason, "Invitation declined");
                Ok(SendOutcome::Declined { reason })
            }
            code => {
                let reason = reason.unwrap_or_else(|| format!("exit {}", code));
                warn!(profile_id = %profile.profile_id, exit_code = code, %reason, "Send command failed");
                Err(SendError::Transient(format!("exit {}: {}", code, reason)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ProfileRecord {
        let mut record = ProfileRecord::new("jane-doe", 1);
        record.url = Some("https://www.example.com/in/jane-doe/".to_string());
        record
    }

    fn sh(script: &str) -> CommandSender {
        CommandSender::new("sh", vec!["-c".to_string(), script.to_string()], 3)
    }

    #[test]
    fn test_from_config() {
        let config = SenderConfig {
            command: vec!["invite.sh".to_string(), "{profile_id}".to_string(), "--url={url}".to_string()],
            ..Default::default()
        };
        let sender = CommandSender::from_config(&config).unwrap();
        assert_eq!(
            sender.render_args(&profile()),
            vec!["jane-doe", "--url=https://www.example.com/in/jane-doe/"]
        );

        assert!(CommandSender::from_config(&SenderConfig::default()).is_none());
    }

    #[tokio::test]
    async fn test_exit_zero_is_sent() {
        let outcome = sh("exit 0").send(&profile()).await.unwrap();
        assert_eq!(outcome, SendOutcome::Sent);
    }

    #[tokio::test]
    async fn test_declined_exit_code() {
        let outcome = sh("echo 'no connect button'; exit 3").send(&profile()).await.unwrap();
        assert_eq!(
            outcome,
            SendOutcome::Declined {
                reason: "no connect button".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_other_exit_is_transient() {
        let err = sh("echo 'page did not load' >&2; exit 1").send(&profile()).await.unwrap_err();
        assert!(matches!(err, SendError::Transient(ref msg) if msg.contains("page did not load")));
    }

    #[tokio::test]
    async fn test_placeholders_reach_command() {
        let sender = CommandSender::new(
            "sh",
            vec!["-c".to_string(), "test \"$0\" = jane-doe || exit 1".to_string(), "{profile_id}".to_string()],
            3,
        );
        assert_eq!(sender.send(&profile()).await.unwrap(), SendOutcome::Sent);
    }

    #[tokio::test]
    async fn test_missing_program_is_transient() {
        let sender = CommandSender::new("/nonexistent/invite", vec![], 3);
        assert!(matches!(sender.send(&profile()).await, Err(SendError::Transient(_))));
    }
}
