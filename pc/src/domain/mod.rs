//! Domain types for the invitation pacer
//!
//! Profile, sent-event and session records live in `pacestore`; this module
//! adds the search-side types (candidates, filters, profile IDs).

mod candidate;
mod filters;
mod id;

pub use candidate::Candidate;
pub use filters::SearchFilters;
pub use id::{ProfileId, canonical_url, extract_profile_id};

// Re-export pacestore types for convenience
pub use pacestore::{
    ProfileRecord, ProfileStatus, RunSession, SentEvent, SessionState, StatusCounts, Store, StoreError, WindowGuard,
    WindowScope, now_ms,
};
