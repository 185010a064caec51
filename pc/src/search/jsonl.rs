//! Candidates exported by an external scraper as JSON lines
//!
//! One object per line. `id` is optional when `url` points at a `/in/{slug}/`
//! profile; every other scalar field becomes a candidate attribute:
//!
//! ```text
//! {"url": "https://www.example.com/in/jane-doe/", "name": "Jane Doe", "title": "CTO", "location": "Paris"}
//! {"id": "john", "title": "VP Engineering", "company": "Acme"}
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::domain::{Candidate, ProfileId, SearchFilters};

use super::SearchError;
use super::provider::{SearchProvider, matches_filters};

#[derive(Debug, Deserialize)]
struct CandidateLine {
    #[serde(default)]
    id: Option<String>,

    #[serde(default)]
    url: Option<String>,

    #[serde(flatten)]
    fields: BTreeMap<String, Value>,
}

impl CandidateLine {
    fn into_candidate(self) -> Option<Candidate> {
        let profile_id = self
            .id
            .as_deref()
            .and_then(ProfileId::new)
            .or_else(|| self.url.as_deref().and_then(ProfileId::from_url))?;

        let mut candidate = Candidate::new(profile_id);
        if let Some(url) = self.url.as_deref().filter(|u| !u.trim().is_empty()) {
            candidate = candidate.with_url(url);
        }
        for (key, value) in self.fields {
            let value = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            candidate = candidate.with_attribute(key.replace('_', "-"), value.trim());
        }
        Some(candidate)
    }
}

/// Parse JSONL content; malformed lines and lines without an id are skipped
pub fn parse_candidates(content: &str) -> Vec<Candidate> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(index, line)| match serde_json::from_str::<CandidateLine>(line) {
            Ok(parsed) => {
                let candidate = parsed.into_candidate();
                if candidate.is_none() {
                    warn!(line = index + 1, "Candidate line has neither an id nor a profile url");
                }
                candidate
            }
            Err(e) => {
                warn!(line = index + 1, error = %e, "Skipping malformed candidate line");
                None
            }
        })
        .collect()
}

/// Reads candidates from a JSONL file, re-read on every page
pub struct JsonlSearchProvider {
    path: PathBuf,
    page_size: usize,
    max_pages: Option<u32>,
}

impl JsonlSearchProvider {
    pub fn new(path: impl AsRef<Path>, page_size: usize, max_pages: Option<u32>) -> Self {
        debug!(path = %path.as_ref().display(), page_size, ?max_pages, "JsonlSearchProvider::new: called");
        Self {
            path: path.as_ref().to_path_buf(),
            page_size: page_size.max(1),
            max_pages,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SearchProvider for JsonlSearchProvider {
    async fn fetch_page(&self, filters: &SearchFilters, page: u32) -> Result<Vec<Candidate>, SearchError> {
        debug!(page, %filters, "JsonlSearchProvider::fetch_page: called");
        if self.max_pages.is_some_and(|max| page >= max) {
            debug!(page, "JsonlSearchProvider::fetch_page: page limit reached");
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SearchError::Io {
                path: self.path.clone(),
                source,
            })?;

        let page: Vec<Candidate> = parse_candidates(&content)
            .into_iter()
            .filter(|c| matches_filters(c, filters))
            .skip(page as usize * self.page_size)
            .take(self.page_size)
            .collect();
        debug!(count = page.len(), "JsonlSearchProvider::fetch_page: page loaded");
        Ok(page)
    }
}
