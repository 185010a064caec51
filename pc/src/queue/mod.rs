//! Target queue
//!
//! Deduplicated, ordered stream of profiles to invite, fed page by page from
//! a search provider and rebuildable from the store after a restart.

mod core;

use thiserror::Error;

use crate::search::SearchError;
use crate::state::StateError;

pub use core::{EnqueueOutcome, TargetQueue};

/// Errors from queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Search(#[from] SearchError),
}
