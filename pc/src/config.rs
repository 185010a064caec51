//! Invitation pacer configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::SearchFilters;
pub use crate::limiter::{LimitsConfig, WindowConfig, WindowKind};
pub use crate::scheduler::PacingConfig;

const LOCAL_CONFIG: &str = ".pacer.yml";
const APP_DIR: &str = "invitepacer";
const USER_CONFIG: &str = "pacer.yml";

/// Configuration problems caught by `Config::validate`
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("limits.windows must contain at least one window")]
    NoWindows,

    #[error("window '{0}' has a zero cap")]
    ZeroCap(String),

    #[error("rolling window '{0}' needs a non-zero period-secs")]
    MissingPeriod(String),

    #[error("window name '{0}' is used more than once")]
    DuplicateWindow(String),

    #[error("limits.retry-ceiling must be at least 1")]
    ZeroRetryCeiling,

    #[error("pacing.min-delay-ms ({min}) is greater than pacing.max-delay-ms ({max})")]
    DelayRange { min: u64, max: u64 },

    #[error("pacing.jitter-ratio must be a finite, non-negative number (got {0})")]
    JitterRatio(f64),

    #[error("pacing.pause-poll-ms must be at least 1")]
    ZeroPausePoll,

    #[error("sender.command is empty and sender.dry-run is off")]
    NoSender,

    #[error("sender.declined-exit-code must not be 0")]
    DeclinedIsSuccess,

    #[error("sender.timeout-ms must be at least 1")]
    ZeroSendTimeout,

    #[error("search.page-size must be at least 1")]
    ZeroPageSize,
}

/// Main pacer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Action windows and retry policy
    pub limits: LimitsConfig,

    /// Humanized timing
    pub pacing: PacingConfig,

    /// Invitation sender
    pub sender: SenderConfig,

    /// Candidate source
    pub search: SearchConfig,

    /// Default search filters, overridden per run from the CLI
    pub filters: DefaultFilters,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.limits.validate()?;
        self.pacing.validate()?;
        self.sender.validate()?;
        if self.search.page_size == 0 {
            return Err(ConfigError::ZeroPageSize);
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .pacer.yml
        let local_config = PathBuf::from(LOCAL_CONFIG);
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/invitepacer/pacer.yml
        if let Some(user_config) = Self::user_config_path()
            && user_config.exists()
        {
            match Self::load_from_file(&user_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is initialized
    ///
    /// Errors are swallowed: a broken config file is reported later by `load`.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates: Vec<PathBuf> = match config_path {
            Some(path) => vec![path.clone()],
            None => std::iter::once(PathBuf::from(LOCAL_CONFIG))
                .chain(Self::user_config_path())
                .collect(),
        };

        candidates
            .into_iter()
            .find(|path| path.exists())
            .and_then(|path| fs::read_to_string(path).ok())
            .and_then(|content| serde_yaml::from_str::<Self>(&content).ok())
            .and_then(|config| config.log_level)
    }

    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(USER_CONFIG))
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding pacer.db and the run lock
    #[serde(rename = "store-dir")]
    pub store_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // XDG data directory (~/.local/share/invitepacer on Linux)
        let store_dir = dirs::data_local_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from(".pacestore"))
            .to_string_lossy()
            .into_owned();

        Self { store_dir }
    }
}

impl StorageConfig {
    /// Store directory with a leading `~/` expanded
    pub fn store_path(&self) -> PathBuf {
        match self.store_dir.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .map(|home| home.join(rest))
                .unwrap_or_else(|| PathBuf::from(&self.store_dir)),
            None => PathBuf::from(&self.store_dir),
        }
    }
}

/// Invitation sender configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Command line run per invitation; `{profile_id}` and `{url}` are substituted
    pub command: Vec<String>,

    /// Exit code meaning "the site declined this invitation"
    #[serde(rename = "declined-exit-code")]
    pub declined_exit_code: i32,

    /// Upper bound on a single send
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Report every send as successful without running anything
    #[serde(rename = "dry-run")]
    pub dry_run: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            declined_exit_code: 3,
            timeout_ms: 60_000,
            dry_run: false,
        }
    }
}

impl SenderConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !self.dry_run && self.command.iter().all(|arg| arg.trim().is_empty()) {
            return Err(ConfigError::NoSender);
        }
        if self.declined_exit_code == 0 {
            return Err(ConfigError::DeclinedIsSuccess);
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroSendTimeout);
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Candidate source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// JSONL file of candidates exported by the scraper
    #[serde(rename = "candidates-file")]
    pub candidates_file: Option<String>,

    /// Candidates per search page
    #[serde(rename = "page-size")]
    pub page_size: usize,

    /// Pages fetched per run (None = until the provider runs dry)
    #[serde(rename = "max-pages")]
    pub max_pages: Option<u32>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            candidates_file: None,
            page_size: 25,
            max_pages: None,
        }
    }
}

/// Default search filters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefaultFilters(pub SearchFilters);

impl Default for DefaultFilters {
    fn default() -> Self {
        Self(SearchFilters {
            connection_degree: Some("2nd".to_string()),
            ..Default::default()
        })
    }
}

impl std::ops::Deref for DefaultFilters {
    type Target = SearchFilters;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
