//! Candidate search
//!
//! The pacer never drives the site itself: candidates come from a
//! `SearchProvider`, typically a file exported by an external scraper.

mod jsonl;
mod provider;

use std::path::PathBuf;
use thiserror::Error;

pub use jsonl::{JsonlSearchProvider, parse_candidates};
pub use provider::{MemorySearchProvider, SearchProvider, matches_attributes, matches_filters};

/// Errors from search providers
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Failed to read candidates from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Search provider error: {0}")]
    Provider(String),
}
