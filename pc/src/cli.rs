//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::domain::{ProfileStatus, SearchFilters};

/// InvitePacer - paced connection invitations
#[derive(Parser)]
#[command(
    name = "pacer",
    about = "Paced, deduplicated connection invitations",
    version = env!("CARGO_PKG_VERSION"),
    after_help = after_help(),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the invitation loop until stopped, exhausted or out of budget
    Run {
        #[command(flatten)]
        filters: FilterArgs,

        /// JSONL candidates file (overrides search.candidates-file)
        #[arg(long, value_name = "FILE")]
        candidates: Option<PathBuf>,

        /// Pretend every send succeeds; nothing is executed
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the last run session, window usage and profile counts
    Status {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List known profiles
    Profiles {
        /// Filter by status (discovered, queued, invited, skipped, failed)
        #[arg(short, long)]
        status: Option<ProfileStatus>,

        /// Maximum number of profiles to show
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List run sessions, newest first
    Sessions {
        /// Maximum number of sessions to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Mark a profile skipped so it is never contacted
    Skip {
        /// Profile ID (the slug from the profile URL)
        id: String,

        /// Reason recorded on the profile
        #[arg(short, long)]
        reason: Option<String>,
    },
}

/// Search filter flags, overlaid on the configured defaults
#[derive(Debug, Clone, Default, clap::Args)]
pub struct FilterArgs {
    /// Industry / sector
    #[arg(long)]
    pub sector: Option<String>,

    /// Job title or function
    #[arg(long)]
    pub role: Option<String>,

    /// Geographic location
    #[arg(long)]
    pub location: Option<String>,

    /// Connection degree (2nd, 3rd)
    #[arg(long = "connection-degree")]
    pub connection_degree: Option<String>,
}

impl From<FilterArgs> for SearchFilters {
    fn from(args: FilterArgs) -> Self {
        SearchFilters {
            sector: args.sector,
            role: args.role,
            location: args.location,
            connection_degree: args.connection_degree,
        }
    }
}

/// Output format for status/listing commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use text or json", s)),
        }
    }
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("invitepacer")
        .join("logs")
        .join("pacer.log")
}

fn after_help() -> String {
    format!("Logs are written to: {}", get_log_path().display())
}
