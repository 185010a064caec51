//! Profile records
//!
//! A profile is created `discovered` the first time a search surfaces it and
//! moves through `queued` to one of the terminal statuses.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Profile lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProfileStatus {
    /// Seen in a search, not yet queued
    #[default]
    Discovered,
    /// Waiting in the target queue
    Queued,
    /// Invitation sent
    Invited,
    /// Sender declined the profile (already connected, no connect button, ...)
    Skipped,
    /// Retry ceiling reached
    Failed,
}

impl ProfileStatus {
    pub const ALL: [ProfileStatus; 5] = [
        ProfileStatus::Discovered,
        ProfileStatus::Queued,
        ProfileStatus::Invited,
        ProfileStatus::Skipped,
        ProfileStatus::Failed,
    ];

    /// Terminal statuses never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Invited | Self::Skipped | Self::Failed)
    }

    /// Whether a record in this status may move to `next`
    ///
    /// Terminal records only accept a re-mark to the same status.
    pub fn can_transition_to(&self, next: ProfileStatus) -> bool {
        !self.is_terminal() || *self == next
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Queued => "queued",
            Self::Invited => "invited",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ProfileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProfileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discovered" => Ok(Self::Discovered),
            "queued" => Ok(Self::Queued),
            "invited" => Ok(Self::Invited),
            "skipped" => Ok(Self::Skipped),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown profile status '{}'", other)),
        }
    }
}

/// Persisted profile record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    /// Stable identifier (URL slug or scraper-provided key)
    pub profile_id: String,

    /// Profile URL, when the scraper provides one
    pub url: Option<String>,

    /// Filter dimensions and scraped fields (sector, role, location, degree, name, ...)
    pub attributes: BTreeMap<String, String>,

    /// Current status
    pub status: ProfileStatus,

    /// Number of failed send attempts
    pub attempt_count: u32,

    /// Reason of the last failed or declined attempt
    pub last_error: Option<String>,

    /// First time the profile was seen (Unix milliseconds)
    pub discovered_at: i64,

    /// Last status transition (Unix milliseconds)
    pub last_action_at: i64,
}

impl ProfileRecord {
    /// Fresh `discovered` record
    pub fn new(profile_id: impl Into<String>, now: i64) -> Self {
        Self {
            profile_id: profile_id.into(),
            url: None,
            attributes: BTreeMap::new(),
            status: ProfileStatus::Discovered,
            attempt_count: 0,
            last_error: None,
            discovered_at: now,
            last_action_at: now,
        }
    }

    /// Contactable means not terminal and still under the retry ceiling
    pub fn is_contactable(&self, retry_ceiling: u32) -> bool {
        matches!(self.status, ProfileStatus::Discovered | ProfileStatus::Queued) && self.attempt_count < retry_ceiling
    }

    /// Convenience accessor for an attribute value
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Number of profiles per status
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub discovered: u64,
    pub queued: u64,
    pub invited: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: ProfileStatus, count: u64) {
        match status {
            ProfileStatus::Discovered => self.discovered += count,
            ProfileStatus::Queued => self.queued += count,
            ProfileStatus::Invited => self.invited += count,
            ProfileStatus::Skipped => self.skipped += count,
            ProfileStatus::Failed => self.failed += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.discovered + self.queued + self.invited + self.skipped + self.failed
    }
}
