//! Target queue implementation

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::{Candidate, ProfileRecord, ProfileStatus, SearchFilters};
use crate::search::{SearchProvider, matches_attributes};
use crate::state::StateManager;

use super::QueueError;

/// What `enqueue` did with a candidate
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// Accepted at the back of the queue
    Queued(ProfileRecord),
    /// Already waiting in the queue
    Duplicate,
    /// Not contactable (already invited, skipped, failed or out of retries)
    Dropped(ProfileStatus),
}

/// Queue of profile IDs in discovery order; records are re-read from the store on `next`
pub struct TargetQueue {
    state: StateManager,
    provider: Arc<dyn SearchProvider>,
    filters: SearchFilters,
    entries: VecDeque<String>,
    members: HashSet<String>,
    next_page: u32,
    exhausted: bool,
}

impl TargetQueue {
    pub fn new(state: StateManager, provider: Arc<dyn SearchProvider>, filters: SearchFilters) -> Self {
        debug!(%filters, "TargetQueue::new: called");
        Self {
            state,
            provider,
            filters,
            entries: VecDeque::new(),
            members: HashSet::new(),
            next_page: 0,
            exhausted: false,
        }
    }

    pub fn filters(&self) -> &SearchFilters {
        &self.filters
    }

    /// Start a fresh search with new filters; queued entries are kept
    pub fn reset_search(&mut self, filters: SearchFilters) {
        debug!(%filters, "TargetQueue::reset_search: called");
        self.filters = filters;
        self.entries.clear();
        self.members.clear();
        self.next_page = 0;
        self.exhausted = false;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True once the provider returned an empty page
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn contains(&self, profile_id: &str) -> bool {
        self.members.contains(profile_id)
    }

    /// Record a candidate and queue it if it can still be contacted
    pub async fn enqueue(&mut self, candidate: Candidate, now: i64) -> Result<EnqueueOutcome, QueueError> {
        debug!(profile_id = %candidate.profile_id, "TargetQueue::enqueue: called");
        // Attributes are merged even for duplicates
        let record = self.state.upsert_profile(candidate, now).await?;

        if self.members.contains(&record.profile_id) {
            debug!(profile_id = %record.profile_id, "TargetQueue::enqueue: duplicate");
            return Ok(EnqueueOutcome::Duplicate);
        }

        if !record.is_contactable(self.state.retry_ceiling()) {
            debug!(profile_id = %record.profile_id, status = %record.status, "TargetQueue::enqueue: not contactable");
            return Ok(EnqueueOutcome::Dropped(record.status));
        }

        let record = if record.status == ProfileStatus::Queued {
            record
        } else {
            self.state
                .mark_profile(&record.profile_id, ProfileStatus::Queued, now)
                .await?
        };

        self.members.insert(record.profile_id.clone());
        self.entries.push_back(record.profile_id.clone());
        Ok(EnqueueOutcome::Queued(record))
    }

    /// Next contactable target, or `None` once the provider is exhausted
    pub async fn next(&mut self, now: i64) -> Result<Option<ProfileRecord>, QueueError> {
        debug!(queued = self.entries.len(), "TargetQueue::next: called");
        loop {
            if let Some(profile_id) = self.entries.pop_front() {
                self.members.remove(&profile_id);
                match self.state.get_profile(&profile_id).await? {
                    Some(record) if record.is_contactable(self.state.retry_ceiling()) => {
                        debug!(%profile_id, "TargetQueue::next: target found");
                        return Ok(Some(record));
                    }
                    other => {
                        debug!(%profile_id, status = ?other.map(|r| r.status), "TargetQueue::next: skipping stale entry");
                        continue;
                    }
                }
            }

            if self.exhausted {
                debug!("TargetQueue::next: provider exhausted");
                return Ok(None);
            }
            self.fetch_next_page(now).await?;
        }
    }

    async fn fetch_next_page(&mut self, now: i64) -> Result<(), QueueError> {
        let page = self.next_page;
        debug!(page, "TargetQueue::fetch_next_page: called");
        let candidates = self.provider.fetch_page(&self.filters, page).await?;
        self.next_page += 1;

        if candidates.is_empty() {
            info!(page, "Search exhausted");
            self.exhausted = true;
            return Ok(());
        }

        let mut queued = 0;
        for candidate in candidates {
            if matches!(self.enqueue(candidate, now).await?, EnqueueOutcome::Queued(_)) {
                queued += 1;
            }
        }
        info!(page, queued, "Search page loaded");
        Ok(())
    }

    /// Return a deferred target to the head of the queue
    pub fn requeue_front(&mut self, record: &ProfileRecord) {
        debug!(profile_id = %record.profile_id, "TargetQueue::requeue_front: called");
        if self.members.insert(record.profile_id.clone()) {
            self.entries.push_front(record.profile_id.clone());
        }
    }

    /// Put a retryable target at the tail of the queue
    pub fn requeue_back(&mut self, record: &ProfileRecord) {
        debug!(profile_id = %record.profile_id, "TargetQueue::requeue_back: called");
        if self.members.insert(record.profile_id.clone()) {
            self.entries.push_back(record.profile_id.clone());
        }
    }

    /// Rebuild from the store's contactable profiles that match the active filters
    /// (discovery order); returns how many were added
    pub async fn restore(&mut self) -> Result<usize, QueueError> {
        debug!(filters = %self.filters, "TargetQueue::restore: called");
        let mut added = 0;
        for record in self.state.contactable_profiles().await? {
            if !matches_attributes(&record.attributes, &self.filters) {
                debug!(profile_id = %record.profile_id, "Restored profile outside active filters");
                continue;
            }
            if self.members.insert(record.profile_id.clone()) {
                self.entries.push_back(record.profile_id);
                added += 1;
            }
        }
        info!(added, "Target queue restored from store");
        Ok(added)
    }
}
