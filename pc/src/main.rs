//! InvitePacer - paced connection invitations
//!
//! CLI entry point for running the invitation loop and inspecting the store.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use tracing::{debug, info};

use invitepacer::cli::{Cli, Command, FilterArgs, OutputFormat, get_log_path};
use invitepacer::clock::format_ms;
use invitepacer::config::Config;
use invitepacer::domain::{ProfileStatus, SearchFilters, now_ms};
use invitepacer::orchestrator::{Orchestrator, OrchestratorConfig, RunState, RunStatus};
use invitepacer::scheduler::HumanizedScheduler;
use invitepacer::search::JsonlSearchProvider;
use invitepacer::sender::{CommandSender, DryRunSender, InvitationSender};
use invitepacer::state::StateManager;
use invitepacer::SystemClock;
use pacestore::RunLock;

fn parse_level(level: &str) -> tracing::Level {
    match level.to_uppercase().as_str() {
        "TRACE" => tracing::Level::TRACE,
        "DEBUG" => tracing::Level::DEBUG,
        "INFO" => tracing::Level::INFO,
        "WARN" | "WARNING" => tracing::Level::WARN,
        "ERROR" => tracing::Level::ERROR,
        _ => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", level);
            tracing::Level::INFO
        }
    }
}

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > default (INFO)
    let level = cli_log_level
        .or(config_log_level)
        .map(parse_level)
        .unwrap_or(tracing::Level::INFO);

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(store_dir = %config.storage.store_dir, "InvitePacer loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run {
            filters,
            candidates,
            dry_run,
        } => cmd_run(config, filters, candidates, dry_run).await,
        Command::Status { format } => cmd_status(&config, format).await,
        Command::Profiles { status, limit, format } => cmd_profiles(&config, status, limit, format).await,
        Command::Sessions { limit, format } => cmd_sessions(&config, limit, format).await,
        Command::Skip { id, reason } => cmd_skip(&config, &id, reason.as_deref()).await,
    }
}

/// Open the store for a read-mostly command
fn open_state(config: &Config) -> Result<StateManager> {
    let store_dir = config.storage.store_path();
    debug!(?store_dir, "open_state: called");
    config.limits.validate().context("Invalid limits configuration")?;
    StateManager::spawn(&store_dir, config.limits.retry_ceiling)
}

/// Run the invitation loop in the foreground
async fn cmd_run(mut config: Config, filters: FilterArgs, candidates: Option<PathBuf>, dry_run: bool) -> Result<()> {
    debug!(?filters, ?candidates, dry_run, "cmd_run: called");
    if dry_run {
        config.sender.dry_run = true;
    }
    config.validate().context("Invalid configuration")?;

    let candidates_file = candidates
        .or_else(|| config.search.candidates_file.as_ref().map(PathBuf::from))
        .ok_or_else(|| eyre!("No candidates file: pass --candidates or set search.candidates-file"))?;
    if !candidates_file.exists() {
        return Err(eyre!("Candidates file not found: {}", candidates_file.display()));
    }

    let store_dir = config.storage.store_path();
    let _lock = RunLock::acquire(&store_dir).context("Failed to lock the store")?;
    let state = StateManager::spawn(&store_dir, config.limits.retry_ceiling)?;

    let provider = Arc::new(JsonlSearchProvider::new(
        &candidates_file,
        config.search.page_size,
        config.search.max_pages,
    ));
    let sender: Arc<dyn InvitationSender> = if config.sender.dry_run {
        Arc::new(DryRunSender::new())
    } else {
        Arc::new(CommandSender::from_config(&config.sender).ok_or_else(|| eyre!("sender.command is empty"))?)
    };

    let orchestrator_config = OrchestratorConfig {
        limits: config.limits.clone(),
        send_timeout: config.sender.timeout(),
    };
    let handle = Orchestrator::spawn(
        orchestrator_config,
        state.clone(),
        HumanizedScheduler::new(config.pacing.clone()),
        provider,
        sender,
        Arc::new(SystemClock),
    );

    let filters = config.filters.merged_with(&SearchFilters::from(filters));
    let session_id = handle.start(filters.clone()).await.context("Failed to start run")?;
    println!("{} Run {} started ({})", "▶".green(), session_id.cyan(), filters);
    if config.sender.dry_run {
        println!("  {}", "dry run: no invitations are actually sent".yellow());
    }

    let mut rx = handle.subscribe();
    let mut last = rx.borrow_and_update().clone();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("{} Stopping after the current step...", "■".yellow());
                handle.stop().await?;
                break;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = rx.borrow_and_update().clone();
                print_progress(&last, &status);
                let stopped = status.state == RunState::Stopped;
                last = status;
                if stopped {
                    break;
                }
            }
        }
    }

    let status = handle.wait_for(|s| s.state == RunState::Stopped).await?;
    print_summary(&status);
    state.shutdown().await?;
    Ok(())
}

fn print_progress(last: &RunStatus, status: &RunStatus) {
    if status.counts.invitations_sent > last.counts.invitations_sent {
        println!(
            "  {} invitations sent: {} (visited {})",
            "✓".green(),
            status.counts.invitations_sent,
            status.counts.profiles_visited
        );
    }
    if status.counts.failures > last.counts.failures {
        println!("  {} send failures: {}", "✗".red(), status.counts.failures);
    }
    if status.state != last.state || status.paused_on != last.paused_on {
        match status.state {
            RunState::Paused if status.operator_paused => println!("  {} paused", "‖".yellow()),
            RunState::Paused => println!(
                "  {} window '{}' full, next send at {}",
                "‖".yellow(),
                status.paused_on.as_deref().unwrap_or("?"),
                status.next_eligible_at.map(format_ms).unwrap_or_else(|| "never".to_string())
            ),
            RunState::Running if last.state == RunState::Paused => println!("  {} resumed", "▶".green()),
            _ => {}
        }
    }
}

fn print_summary(status: &RunStatus) {
    let reason = status
        .stop_reason
        .map(|r| r.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!(
        "{} Run stopped ({}): visited {}, sent {}, failures {}",
        "■".cyan(),
        reason,
        status.counts.profiles_visited,
        status.counts.invitations_sent,
        status.counts.failures
    );
    if let Some(error) = &status.last_error {
        println!("  {} {}", "error:".red(), error);
    }
}

/// Show the last run session and window usage
async fn cmd_status(config: &Config, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_status: called");
    let state = open_state(config)?;
    let status = RunStatus::from_store(&state, &config.limits, now_ms()).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Text => {
            println!("InvitePacer Status");
            println!("------------------");
            let state_label = match status.state {
                RunState::Running => status.state.as_str().green(),
                RunState::Paused => status.state.as_str().yellow(),
                RunState::Idle | RunState::Stopped => status.state.as_str().normal(),
            };
            println!("State: {}", state_label);
            if let Some(session_id) = &status.session_id {
                println!("Session: {}", session_id.cyan());
                println!("Filters: {}", status.filters);
                println!(
                    "Visited: {}  Sent: {}  Failures: {}",
                    status.counts.profiles_visited, status.counts.invitations_sent, status.counts.failures
                );
            }
            if let Some(reason) = status.stop_reason {
                println!("Stop reason: {}", reason);
            }
            if let Some(error) = &status.last_error {
                println!("Last error: {}", error.red());
            }

            println!();
            println!("Windows:");
            for window in &status.windows {
                let next = match window.next_free_at {
                    Some(_) if window.count < window.cap => "now".to_string(),
                    Some(at) => format_ms(at),
                    None => "end of session".to_string(),
                };
                println!("  {:<12} {:>4}/{:<4} next slot: {}", window.name, window.count, window.cap, next);
            }
            match status.next_eligible_at {
                Some(at) => println!("Next send eligible at: {}", format_ms(at)),
                None => println!("Next send eligible at: {}", "not within this session".yellow()),
            }

            let p = &status.profiles;
            println!();
            println!(
                "Profiles: {} total ({} discovered, {} queued, {} invited, {} skipped, {} failed)",
                p.total(),
                p.discovered,
                p.queued,
                p.invited,
                p.skipped,
                p.failed
            );
        }
    }

    state.shutdown().await?;
    Ok(())
}

/// List profiles, optionally filtered by status
async fn cmd_profiles(config: &Config, status: Option<ProfileStatus>, limit: usize, format: OutputFormat) -> Result<()> {
    debug!(?status, limit, ?format, "cmd_profiles: called");
    let state = open_state(config)?;
    let profiles = state.list_profiles(status, Some(limit)).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&profiles)?),
        OutputFormat::Text => {
            if profiles.is_empty() {
                println!("No profiles found");
            }
            for profile in &profiles {
                let status_label = match profile.status {
                    ProfileStatus::Invited => profile.status.as_str().green(),
                    ProfileStatus::Failed => profile.status.as_str().red(),
                    ProfileStatus::Skipped => profile.status.as_str().dimmed(),
                    ProfileStatus::Discovered | ProfileStatus::Queued => profile.status.as_str().normal(),
                };
                print!("{:<40} {:<10} attempts: {}", profile.profile_id, status_label, profile.attempt_count);
                if let Some(error) = &profile.last_error {
                    print!("  {}", error.dimmed());
                }
                println!();
            }
        }
    }

    state.shutdown().await?;
    Ok(())
}

/// List run sessions, newest first
async fn cmd_sessions(config: &Config, limit: usize, format: OutputFormat) -> Result<()> {
    debug!(limit, ?format, "cmd_sessions: called");
    let state = open_state(config)?;
    let sessions = state.list_sessions(Some(limit)).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&sessions)?),
        OutputFormat::Text => {
            if sessions.is_empty() {
                println!("No run sessions found");
            }
            for session in &sessions {
                println!(
                    "{}  {:<8} started {}  visited {}  sent {}  failures {}  {}",
                    session.id.cyan(),
                    session.state.as_str(),
                    format_ms(session.started_at),
                    session.profiles_visited,
                    session.invitations_sent,
                    session.failures,
                    session.stop_reason.as_deref().unwrap_or("")
                );
            }
        }
    }

    state.shutdown().await?;
    Ok(())
}

/// Mark a profile skipped by hand
async fn cmd_skip(config: &Config, id: &str, reason: Option<&str>) -> Result<()> {
    debug!(%id, ?reason, "cmd_skip: called");
    let state = open_state(config)?;

    if state.get_profile(id).await?.is_none() {
        return Err(eyre!("Profile not found: {}", id));
    }
    state
        .mark_profile(id, ProfileStatus::Skipped, now_ms())
        .await
        .context(format!("Failed to skip profile {}", id))?;
    if let Some(reason) = reason {
        state.set_profile_error(id, reason).await?;
    }
    println!("{} Skipped profile: {}", "✓".green(), id.cyan());

    state.shutdown().await?;
    Ok(())
}
