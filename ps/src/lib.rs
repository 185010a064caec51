//! PaceStore - durable state for the invitation pacer
//!
//! Persists every profile ever seen, the append-only log of sent invitations
//! that backs the action windows, and the run sessions. Every mutation is a
//! single SQLite transaction committed before the call returns.
//!
//! # Layout
//!
//! ```text
//! {store_dir}/
//! ├── pacer.db     # profiles, sent_events, run_sessions, schema_meta
//! └── run.lock     # exclusive lock held by the active run
//! ```
//!
//! # Example
//!
//! ```ignore
//! use pacestore::{ProfileStatus, Store};
//!
//! let mut store = Store::open(".pacer")?;
//! store.upsert_profile("jane-doe", None, &attributes, now_ms())?;
//! store.mark_profile("jane-doe", ProfileStatus::Queued, now_ms())?;
//! ```

mod error;
mod lock;
mod profile;
mod sent;
mod session;
mod store;

pub use error::{StoreError, StoreResult};
pub use lock::RunLock;
pub use profile::{ProfileRecord, ProfileStatus, StatusCounts};
pub use sent::{SentEvent, WindowGuard, WindowScope};
pub use session::{RunSession, SessionState};
pub use store::{DB_FILE, Store};

/// Current Unix time in milliseconds
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
