//! Integration tests for InvitePacer
//!
//! End-to-end runs through the library API and the `pacer` binary.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use invitepacer::domain::ProfileStatus;
use invitepacer::{
    DryRunSender, HumanizedScheduler, JsonlSearchProvider, LimitsConfig, ManualClock, Orchestrator,
    OrchestratorConfig, OrchestratorHandle, PacingConfig, RunState, RunStatus, SearchFilters, StateManager,
    StopReason, WindowConfig,
};

const CANDIDATES: &str = r#"{"url": "https://www.example.com/in/jane-doe/", "name": "Jane Doe", "title": "CTO", "location": "Paris, France"}
{"id": "john-roe", "title": "VP Engineering", "location": "Lyon, France", "connection_degree": "2nd"}
not json at all
{"url": "https://www.example.com/in/jane-doe/", "title": "CTO", "location": "Paris, France"}
{"id": "max-moe", "title": "Sales Director", "location": "Berlin, Germany", "connection_degree": "3rd"}
"#;

fn write_candidates(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("candidates.jsonl");
    fs::write(&path, CANDIDATES).expect("Failed to write candidates");
    path
}

fn fast_pacing() -> PacingConfig {
    PacingConfig {
        min_delay_ms: 0,
        max_delay_ms: 2,
        pause_poll_ms: 10,
        jitter_ratio: 0.0,
        max_jitter_ms: 0,
    }
}

fn spawn_run(
    state: &StateManager,
    provider_path: &Path,
    sender: Arc<DryRunSender>,
    clock: &ManualClock,
) -> OrchestratorHandle {
    let limits = LimitsConfig {
        windows: vec![WindowConfig::rolling("daily", 20, Duration::from_secs(86_400))],
        ..Default::default()
    };
    Orchestrator::spawn(
        OrchestratorConfig {
            limits,
            send_timeout: Duration::from_secs(5),
        },
        state.clone(),
        HumanizedScheduler::with_seed(fast_pacing(), 1),
        Arc::new(JsonlSearchProvider::new(provider_path, 2, None)),
        sender,
        Arc::new(clock.clone()),
    )
}

async fn run_to_stop(handle: &OrchestratorHandle, filters: SearchFilters) -> RunStatus {
    handle.start(filters).await.expect("Failed to start run");
    tokio::time::timeout(Duration::from_secs(5), handle.wait_for(|s| s.state == RunState::Stopped))
        .await
        .expect("Run did not stop in time")
        .expect("Status channel closed")
}

// =============================================================================
// Library Tests
// =============================================================================

#[tokio::test]
async fn test_filtered_run_invites_each_profile_once() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let candidates = write_candidates(temp_dir.path());
    let store_dir = temp_dir.path().join("store");
    let clock = ManualClock::new(1_700_000_000_000);

    let filters = SearchFilters {
        location: Some("france".to_string()),
        connection_degree: Some("2nd".to_string()),
        ..Default::default()
    };

    {
        let state = StateManager::spawn(&store_dir, 2).expect("Failed to open store");
        let sender = Arc::new(DryRunSender::new());
        let handle = spawn_run(&state, &candidates, sender.clone(), &clock);

        let status = run_to_stop(&handle, filters.clone()).await;
        assert_eq!(status.stop_reason, Some(StopReason::Exhausted));
        // Duplicate line collapsed, Berlin filtered out
        assert_eq!(sender.sent(), vec!["jane-doe", "john-roe"]);
        assert_eq!(status.counts.invitations_sent, 2);
        assert_eq!(status.windows[0].count, 2);

        state.shutdown().await.expect("Failed to shut down store");
    }

    // A fresh process over the same store never re-invites
    let state = StateManager::spawn(&store_dir, 2).expect("Failed to reopen store");
    assert!(!state.is_contactable("jane-doe").await.unwrap());
    let jane = state.get_profile_required("jane-doe").await.unwrap();
    assert_eq!(jane.status, ProfileStatus::Invited);
    assert_eq!(jane.attribute("title"), Some("CTO"));

    let sender = Arc::new(DryRunSender::new());
    let handle = spawn_run(&state, &candidates, sender.clone(), &clock);
    let status = run_to_stop(&handle, filters).await;
    assert_eq!(status.stop_reason, Some(StopReason::Exhausted));
    assert!(sender.sent().is_empty());
    assert_eq!(status.windows[0].count, 2);

    let sessions = state.list_sessions(None).await.unwrap();
    assert_eq!(sessions.len(), 2);
    assert!(sessions.iter().all(|s| !s.is_open()));
}

// =============================================================================
// Binary Tests
// =============================================================================

struct Sandbox {
    dir: TempDir,
    config: std::path::PathBuf,
}

impl Sandbox {
    fn new(with_candidates: bool) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = dir.path().join("store");
        let mut yaml = format!(
            "storage:\n  store-dir: {}\npacing:\n  min-delay-ms: 0\n  max-delay-ms: 5\n",
            store.display()
        );
        if with_candidates {
            let candidates = write_candidates(dir.path());
            yaml.push_str(&format!("search:\n  candidates-file: {}\n", candidates.display()));
        }
        let config = dir.path().join("pacer.yml");
        fs::write(&config, yaml).expect("Failed to write config");
        Self { dir, config }
    }

    fn pacer(&self) -> Command {
        let mut cmd = Command::cargo_bin("pacer").expect("pacer binary not built");
        cmd.current_dir(self.dir.path())
            .env("HOME", self.dir.path())
            .env("XDG_DATA_HOME", self.dir.path().join("data"))
            .env("XDG_CONFIG_HOME", self.dir.path().join("config"))
            .env("NO_COLOR", "1")
            .arg("--config")
            .arg(&self.config);
        cmd
    }
}

#[test]
fn test_cli_status_on_empty_store() {
    let sandbox = Sandbox::new(false);
    sandbox
        .pacer()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("State: idle"))
        .stdout(predicate::str::contains("daily"));
}

#[test]
fn test_cli_dry_run_then_inspect() {
    let sandbox = Sandbox::new(true);

    sandbox
        .pacer()
        .args(["run", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Run stopped (exhausted)"));

    sandbox
        .pacer()
        .args(["status", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"state\": \"stopped\""))
        .stdout(predicate::str::contains("\"stop_reason\": \"exhausted\""));

    // Default filter is 2nd degree: the 3rd-degree candidate is never queued
    sandbox
        .pacer()
        .args(["profiles", "--status", "invited"])
        .assert()
        .success()
        .stdout(predicate::str::contains("jane-doe"))
        .stdout(predicate::str::contains("john-roe"))
        .stdout(predicate::str::contains("max-moe").not());

    sandbox
        .pacer()
        .args(["sessions", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"stop_reason\": \"exhausted\""));
}

#[test]
fn test_cli_skip() {
    let sandbox = Sandbox::new(true);
    sandbox
        .pacer()
        .args(["run", "--dry-run", "--location", "Berlin", "--connection-degree", "3rd"])
        .assert()
        .success();

    sandbox
        .pacer()
        .args(["skip", "nobody-here"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Profile not found"));

    // Already invited: terminal statuses never change
    sandbox.pacer().args(["skip", "max-moe"]).assert().failure();

    sandbox
        .pacer()
        .args(["profiles", "--status", "invited", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("max-moe"));
}

#[test]
fn test_cli_run_requires_candidates() {
    let sandbox = Sandbox::new(false);
    sandbox
        .pacer()
        .args(["run", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No candidates file"));
}
