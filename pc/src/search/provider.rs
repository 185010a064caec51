//! SearchProvider trait definition

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use crate::domain::{Candidate, SearchFilters};

use super::SearchError;

/// Source of candidate profiles for a set of filters
///
/// Pages are numbered from 0. An empty page ends the sequence.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn fetch_page(&self, filters: &SearchFilters, page: u32) -> Result<Vec<Candidate>, SearchError>;
}

/// Attribute keys consulted for each filter dimension, in order
fn attribute_keys(dimension: &str) -> &'static [&'static str] {
    match dimension {
        SearchFilters::SECTOR => &["sector", "industry"],
        SearchFilters::ROLE => &["role", "title", "job-title"],
        SearchFilters::LOCATION => &["location"],
        SearchFilters::CONNECTION_DEGREE => &["connection-degree", "degree"],
        _ => &[],
    }
}

/// Case-insensitive substring match of every set filter dimension
///
/// A candidate that carries no attribute for a dimension is not excluded by
/// it; scraped exports rarely record every dimension.
pub fn matches_filters(candidate: &Candidate, filters: &SearchFilters) -> bool {
    matches_attributes(&candidate.attributes, filters)
}

/// `matches_filters` over a bare attribute map, as stored on a profile record
pub fn matches_attributes(attributes: &BTreeMap<String, String>, filters: &SearchFilters) -> bool {
    filters.dimensions().into_iter().all(|(dimension, wanted)| {
        let wanted = wanted.to_lowercase();
        let mut values = attribute_keys(dimension)
            .iter()
            .filter_map(|key| attributes.get(*key))
            .filter(|value| !value.trim().is_empty())
            .peekable();
        if values.peek().is_none() {
            return true;
        }
        values.any(|value| value.to_lowercase().contains(&wanted))
    })
}

/// Provider over a fixed list of candidates
pub struct MemorySearchProvider {
    candidates: Vec<Candidate>,
    page_size: usize,
    fetches: AtomicUsize,
}

impl MemorySearchProvider {
    pub fn new(candidates: Vec<Candidate>, page_size: usize) -> Self {
        debug!(count = candidates.len(), page_size, "MemorySearchProvider::new: called");
        Self {
            candidates,
            page_size: page_size.max(1),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Number of `fetch_page` calls so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchProvider for MemorySearchProvider {
    async fn fetch_page(&self, filters: &SearchFilters, page: u32) -> Result<Vec<Candidate>, SearchError> {
        debug!(page, %filters, "MemorySearchProvider::fetch_page: called");
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .candidates
            .iter()
            .filter(|c| matches_filters(c, filters))
            .skip(page as usize * self.page_size)
            .take(self.page_size)
            .cloned()
            .collect())
    }
}
