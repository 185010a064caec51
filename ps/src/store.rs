//! SQLite-backed store
//!
//! One connection, one transaction per mutation. Caps are re-checked inside
//! `IMMEDIATE` transactions so two processes sharing a database cannot both
//! take the last slot of a window.

use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::profile::{ProfileRecord, ProfileStatus, StatusCounts};
use crate::sent::{SentEvent, WindowGuard, WindowScope};
use crate::session::{RunSession, SessionState};

/// Database file name inside the store directory
pub const DB_FILE: &str = "pacer.db";

const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS profiles (
    profile_id TEXT PRIMARY KEY,
    url TEXT,
    attributes TEXT NOT NULL,
    status TEXT NOT NULL,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    discovered_at INTEGER NOT NULL,
    last_action_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_profiles_status ON profiles(status);

CREATE TABLE IF NOT EXISTS sent_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    profile_id TEXT,
    session_id TEXT,
    sent_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sent_events_sent_at ON sent_events(sent_at);
CREATE INDEX IF NOT EXISTS idx_sent_events_session ON sent_events(session_id);

CREATE TABLE IF NOT EXISTS run_sessions (
    id TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    filters TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    ended_at INTEGER,
    profiles_visited INTEGER NOT NULL DEFAULT 0,
    failures INTEGER NOT NULL DEFAULT 0,
    stop_reason TEXT,
    last_error TEXT
);
";

const PROFILE_COLUMNS: &str =
    "profile_id, url, attributes, status, attempt_count, last_error, discovered_at, last_action_at";

const SESSION_COLUMNS: &str = "s.id, s.state, s.filters, s.started_at, s.updated_at, s.ended_at, s.profiles_visited, \
     s.failures, s.stop_reason, s.last_error, \
     (SELECT COUNT(*) FROM sent_events e WHERE e.session_id = s.id)";

/// Raw profile row before status/attribute decoding
struct ProfileRow {
    profile_id: String,
    url: Option<String>,
    attributes: String,
    status: String,
    attempt_count: i64,
    last_error: Option<String>,
    discovered_at: i64,
    last_action_at: i64,
}

impl ProfileRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            profile_id: row.get(0)?,
            url: row.get(1)?,
            attributes: row.get(2)?,
            status: row.get(3)?,
            attempt_count: row.get(4)?,
            last_error: row.get(5)?,
            discovered_at: row.get(6)?,
            last_action_at: row.get(7)?,
        })
    }

    fn into_record(self) -> StoreResult<ProfileRecord> {
        let status = self
            .status
            .parse::<ProfileStatus>()
            .map_err(|e| StoreError::Corrupt(format!("profile {}: {}", self.profile_id, e)))?;
        let attributes: BTreeMap<String, String> = serde_json::from_str(&self.attributes)?;
        Ok(ProfileRecord {
            profile_id: self.profile_id,
            url: self.url,
            attributes,
            status,
            attempt_count: u32::try_from(self.attempt_count).unwrap_or(u32::MAX),
            last_error: self.last_error,
            discovered_at: self.discovered_at,
            last_action_at: self.last_action_at,
        })
    }
}

/// Raw session row before decoding
struct SessionRow {
    id: String,
    state: String,
    filters: String,
    started_at: i64,
    updated_at: i64,
    ended_at: Option<i64>,
    profiles_visited: i64,
    failures: i64,
    stop_reason: Option<String>,
    last_error: Option<String>,
    invitations_sent: i64,
}

impl SessionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            state: row.get(1)?,
            filters: row.get(2)?,
            started_at: row.get(3)?,
            updated_at: row.get(4)?,
            ended_at: row.get(5)?,
            profiles_visited: row.get(6)?,
            failures: row.get(7)?,
            stop_reason: row.get(8)?,
            last_error: row.get(9)?,
            invitations_sent: row.get(10)?,
        })
    }

    fn into_session(self) -> StoreResult<RunSession> {
        let state = self
            .state
            .parse::<SessionState>()
            .map_err(|e| StoreError::Corrupt(format!("session {}: {}", self.id, e)))?;
        let filters: Value = serde_json::from_str(&self.filters)?;
        Ok(RunSession {
            id: self.id,
            state,
            filters,
            started_at: self.started_at,
            updated_at: self.updated_at,
            ended_at: self.ended_at,
            profiles_visited: self.profiles_visited.max(0) as u64,
            invitations_sent: self.invitations_sent.max(0) as u64,
            failures: self.failures.max(0) as u64,
            stop_reason: self.stop_reason,
            last_error: self.last_error,
        })
    }
}

/// The pacer's durable state
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    /// Open or create a store in the given directory
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(DB_FILE);
        debug!(?path, "Store::open: called");

        let conn = Connection::open(&path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        debug!(%mode, "Store::open: journal mode set");

        let store = Self { conn, path: Some(path) };
        store.bootstrap()?;
        info!(path = ?store.path, "Store opened");
        Ok(store)
    }

    /// In-memory store for tests and dry runs
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("Store::open_in_memory: called");
        let store = Self {
            conn: Connection::open_in_memory()?,
            path: None,
        };
        store.bootstrap()?;
        Ok(store)
    }

    /// Path of the database file (None for in-memory stores)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn bootstrap(&self) -> StoreResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        let version: Option<String> = self
            .conn
            .query_row("SELECT value FROM schema_meta WHERE key = 'version'", [], |row| row.get(0))
            .optional()?;
        match version {
            None => {
                self.conn.execute(
                    "INSERT INTO schema_meta (key, value) VALUES ('version', ?1)",
                    params![SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(v) if v == SCHEMA_VERSION.to_string() => {}
            Some(v) => {
                return Err(StoreError::Corrupt(format!(
                    "unsupported schema version {} (expected {})",
                    v, SCHEMA_VERSION
                )));
            }
        }
        Ok(())
    }

    // === Profiles ===

    /// Insert a profile as `discovered`, or merge attributes into the existing record
    ///
    /// Existing status, attempt count and timestamps are left untouched.
    pub fn upsert_profile(
        &mut self,
        profile_id: &str,
        url: Option<&str>,
        attributes: &BTreeMap<String, String>,
        now: i64,
    ) -> StoreResult<ProfileRecord> {
        debug!(%profile_id, "Store::upsert_profile: called");
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let record = match get_profile_tx(&tx, profile_id)? {
            Some(mut existing) => {
                debug!(%profile_id, status = %existing.status, "Store::upsert_profile: merging into existing record");
                for (key, value) in attributes {
                    if !value.is_empty() {
                        existing.attributes.insert(key.clone(), value.clone());
                    }
                }
                if let Some(url) = url {
                    existing.url = Some(url.to_string());
                }
                tx.execute(
                    "UPDATE profiles SET url = ?1, attributes = ?2 WHERE profile_id = ?3",
                    params![existing.url, serde_json::to_string(&existing.attributes)?, profile_id],
                )?;
                existing
            }
            None => {
                debug!(%profile_id, "Store::upsert_profile: inserting new record");
                let record = ProfileRecord {
                    profile_id: profile_id.to_string(),
                    url: url.map(str::to_string),
                    attributes: attributes.clone(),
                    status: ProfileStatus::Discovered,
                    attempt_count: 0,
                    last_error: None,
                    discovered_at: now,
                    last_action_at: now,
                };
                tx.execute(
                    "INSERT INTO profiles (profile_id, url, attributes, status, attempt_count, last_error, discovered_at, last_action_at)
                     VALUES (?1, ?2, ?3, ?4, 0, NULL, ?5, ?5)",
                    params![
                        record.profile_id,
                        record.url,
                        serde_json::to_string(&record.attributes)?,
                        record.status.as_str(),
                        now
                    ],
                )?;
                record
            }
        };

        tx.commit()?;
        Ok(record)
    }

    /// Get a profile by ID
    pub fn get_profile(&self, profile_id: &str) -> StoreResult<Option<ProfileRecord>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM profiles WHERE profile_id = ?1", PROFILE_COLUMNS),
                params![profile_id],
                ProfileRow::read,
            )
            .optional()?;
        row.map(ProfileRow::into_record).transpose()
    }

    /// Move a profile to a new status
    pub fn mark_profile(&mut self, profile_id: &str, status: ProfileStatus, now: i64) -> StoreResult<ProfileRecord> {
        debug!(%profile_id, %status, "Store::mark_profile: called");
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let record = mark_profile_tx(&tx, profile_id, status, now)?;
        tx.commit()?;
        Ok(record)
    }

    /// Record a failed send attempt
    ///
    /// The status becomes `failed` once `attempt_count` reaches `retry_ceiling`,
    /// otherwise the profile returns to `queued`.
    pub fn record_failure(
        &mut self,
        profile_id: &str,
        reason: &str,
        retry_ceiling: u32,
        now: i64,
    ) -> StoreResult<ProfileRecord> {
        debug!(%profile_id, %reason, retry_ceiling, "Store::record_failure: called");
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut record = get_profile_tx(&tx, profile_id)?.ok_or_else(|| StoreError::NotFound(profile_id.to_string()))?;

        if record.status.is_terminal() {
            debug!(%profile_id, status = %record.status, "Store::record_failure: terminal record");
            return Err(StoreError::InvalidTransition {
                profile_id: profile_id.to_string(),
                from: record.status,
                to: ProfileStatus::Failed,
            });
        }

        record.attempt_count = record.attempt_count.saturating_add(1);
        record.status = if record.attempt_count >= retry_ceiling {
            ProfileStatus::Failed
        } else {
            ProfileStatus::Queued
        };
        record.last_error = Some(reason.to_string());
        record.last_action_at = now;

        tx.execute(
            "UPDATE profiles SET status = ?1, attempt_count = ?2, last_error = ?3, last_action_at = ?4 WHERE profile_id = ?5",
            params![
                record.status.as_str(),
                i64::from(record.attempt_count),
                record.last_error,
                now,
                profile_id
            ],
        )?;
        tx.commit()?;
        debug!(%profile_id, status = %record.status, attempts = record.attempt_count, "Store::record_failure: recorded");
        Ok(record)
    }

    /// Attach a note (e.g. a decline reason) without changing status
    pub fn set_profile_error(&mut self, profile_id: &str, reason: &str) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE profiles SET last_error = ?1 WHERE profile_id = ?2",
            params![reason, profile_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(profile_id.to_string()));
        }
        Ok(())
    }

    /// Whether the profile may still be contacted
    pub fn is_contactable(&self, profile_id: &str, retry_ceiling: u32) -> StoreResult<bool> {
        Ok(self
            .get_profile(profile_id)?
            .map(|r| r.is_contactable(retry_ceiling))
            .unwrap_or(false))
    }

    /// List profiles, most recently touched first
    pub fn list_profiles(&self, status: Option<ProfileStatus>, limit: Option<usize>) -> StoreResult<Vec<ProfileRecord>> {
        debug!(?status, ?limit, "Store::list_profiles: called");
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM profiles WHERE (?1 IS NULL OR status = ?1) ORDER BY last_action_at DESC, rowid DESC LIMIT ?2",
            PROFILE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![status.map(|s| s.as_str()), limit], ProfileRow::read)?;
        rows.map(|row| row.map_err(StoreError::from).and_then(ProfileRow::into_record))
            .collect()
    }

    /// Contactable profiles in discovery order
    pub fn contactable_profiles(&self, retry_ceiling: u32) -> StoreResult<Vec<ProfileRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM profiles WHERE status IN ('discovered', 'queued') AND attempt_count < ?1
             ORDER BY discovered_at ASC, rowid ASC",
            PROFILE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![i64::from(retry_ceiling)], ProfileRow::read)?;
        rows.map(|row| row.map_err(StoreError::from).and_then(ProfileRow::into_record))
            .collect()
    }

    /// Number of profiles per status
    pub fn status_counts(&self) -> StoreResult<StatusCounts> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM profiles GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, count) = row?;
            let status = status.parse::<ProfileStatus>().map_err(StoreError::Corrupt)?;
            counts.add(status, count.max(0) as u64);
        }
        Ok(counts)
    }

    // === Sent events ===

    /// Append a sent event if every guard still has capacity
    pub fn record_sent(&mut self, guards: &[WindowGuard], event: SentEvent) -> StoreResult<SentEvent> {
        debug!(?event, guards = guards.len(), "Store::record_sent: called");
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        check_guards_tx(&tx, guards)?;
        let event = insert_event_tx(&tx, event)?;
        tx.commit()?;
        Ok(event)
    }

    /// Record a successful invitation: cap check, sent event and `invited` status in one transaction
    pub fn record_invitation(
        &mut self,
        guards: &[WindowGuard],
        profile_id: &str,
        session_id: Option<&str>,
        now: i64,
    ) -> StoreResult<ProfileRecord> {
        debug!(%profile_id, ?session_id, "Store::record_invitation: called");
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = get_profile_tx(&tx, profile_id)?.ok_or_else(|| StoreError::NotFound(profile_id.to_string()))?;
        if current.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                profile_id: profile_id.to_string(),
                from: current.status,
                to: ProfileStatus::Invited,
            });
        }

        check_guards_tx(&tx, guards)?;
        insert_event_tx(
            &tx,
            SentEvent::new(Some(profile_id.to_string()), session_id.map(str::to_string), now),
        )?;
        let record = mark_profile_tx(&tx, profile_id, ProfileStatus::Invited, now)?;
        tx.commit()?;
        info!(%profile_id, "Invitation recorded");
        Ok(record)
    }

    /// Number of sent events in a window scope
    pub fn count_sent(&self, scope: &WindowScope) -> StoreResult<u32> {
        count_sent_conn(&self.conn, scope)
    }

    /// Send times of the events in a window scope, oldest first
    pub fn sent_times(&self, scope: &WindowScope) -> StoreResult<Vec<i64>> {
        let (sql, key): (&str, rusqlite::types::Value) = match scope {
            WindowScope::After(after) => (
                "SELECT sent_at FROM sent_events WHERE sent_at > ?1 ORDER BY sent_at ASC, id ASC",
                (*after).into(),
            ),
            WindowScope::Session(session_id) => (
                "SELECT sent_at FROM sent_events WHERE session_id = ?1 ORDER BY sent_at ASC, id ASC",
                session_id.clone().into(),
            ),
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![key], |row| row.get::<_, i64>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Most recent sent events
    pub fn recent_sent(&self, limit: usize) -> StoreResult<Vec<SentEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, profile_id, session_id, sent_at FROM sent_events ORDER BY sent_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(SentEvent {
                id: row.get(0)?,
                profile_id: row.get(1)?,
                session_id: row.get(2)?,
                sent_at: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // === Run sessions ===

    pub fn create_session(&mut self, session: &RunSession) -> StoreResult<()> {
        debug!(session_id = %session.id, "Store::create_session: called");
        self.conn.execute(
            "INSERT INTO run_sessions (id, state, filters, started_at, updated_at, ended_at, profiles_visited, failures, stop_reason, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                session.id,
                session.state.as_str(),
                serde_json::to_string(&session.filters)?,
                session.started_at,
                session.updated_at,
                session.ended_at,
                session.profiles_visited as i64,
                session.failures as i64,
                session.stop_reason,
                session.last_error
            ],
        )?;
        Ok(())
    }

    /// Persist a session; `invitations_sent` is derived from the sent-event log and not written
    pub fn update_session(&mut self, session: &RunSession) -> StoreResult<()> {
        debug!(session_id = %session.id, state = %session.state, "Store::update_session: called");
        let changed = self.conn.execute(
            "UPDATE run_sessions SET state = ?2, filters = ?3, updated_at = ?4, ended_at = ?5, profiles_visited = ?6,
             failures = ?7, stop_reason = ?8, last_error = ?9 WHERE id = ?1",
            params![
                session.id,
                session.state.as_str(),
                serde_json::to_string(&session.filters)?,
                session.updated_at,
                session.ended_at,
                session.profiles_visited as i64,
                session.failures as i64,
                session.stop_reason,
                session.last_error
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::SessionNotFound(session.id.clone()));
        }
        Ok(())
    }

    pub fn get_session(&self, id: &str) -> StoreResult<Option<RunSession>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM run_sessions s WHERE s.id = ?1", SESSION_COLUMNS),
                params![id],
                SessionRow::read,
            )
            .optional()?;
        row.map(SessionRow::into_session).transpose()
    }

    /// Sessions, newest first
    pub fn list_sessions(&self, limit: Option<usize>) -> StoreResult<Vec<RunSession>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM run_sessions s ORDER BY s.started_at DESC, s.id DESC LIMIT ?1",
            SESSION_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit], SessionRow::read)?;
        rows.map(|row| row.map_err(StoreError::from).and_then(SessionRow::into_session))
            .collect()
    }

    /// Sessions that were never closed, newest first
    pub fn open_sessions(&self) -> StoreResult<Vec<RunSession>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM run_sessions s WHERE s.state != 'stopped' ORDER BY s.started_at DESC, s.id DESC",
            SESSION_COLUMNS
        ))?;
        let rows = stmt.query_map([], SessionRow::read)?;
        rows.map(|row| row.map_err(StoreError::from).and_then(SessionRow::into_session))
            .collect()
    }
}

fn get_profile_tx(tx: &Transaction<'_>, profile_id: &str) -> StoreResult<Option<ProfileRecord>> {
    let row = tx
        .query_row(
            &format!("SELECT {} FROM profiles WHERE profile_id = ?1", PROFILE_COLUMNS),
            params![profile_id],
            ProfileRow::read,
        )
        .optional()?;
    row.map(ProfileRow::into_record).transpose()
}

fn mark_profile_tx(
    tx: &Transaction<'_>,
    profile_id: &str,
    status: ProfileStatus,
    now: i64,
) -> StoreResult<ProfileRecord> {
    let mut record = get_profile_tx(tx, profile_id)?.ok_or_else(|| StoreError::NotFound(profile_id.to_string()))?;

    if !record.status.can_transition_to(status) {
        debug!(%profile_id, from = %record.status, to = %status, "mark_profile_tx: rejected transition");
        return Err(StoreError::InvalidTransition {
            profile_id: profile_id.to_string(),
            from: record.status,
            to: status,
        });
    }

    if record.status == status && status.is_terminal() {
        debug!(%profile_id, %status, "mark_profile_tx: terminal re-mark, no change");
        return Ok(record);
    }

    record.status = status;
    record.last_action_at = now;
    tx.execute(
        "UPDATE profiles SET status = ?1, last_action_at = ?2 WHERE profile_id = ?3",
        params![status.as_str(), now, profile_id],
    )?;
    Ok(record)
}

fn count_sent_conn(conn: &Connection, scope: &WindowScope) -> StoreResult<u32> {
    let count: i64 = match scope {
        WindowScope::After(after) => conn.query_row(
            "SELECT COUNT(*) FROM sent_events WHERE sent_at > ?1",
            params![after],
            |row| row.get(0),
        )?,
        WindowScope::Session(session_id) => conn.query_row(
            "SELECT COUNT(*) FROM sent_events WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?,
    };
    Ok(u32::try_from(count).unwrap_or(u32::MAX))
}

fn check_guards_tx(tx: &Transaction<'_>, guards: &[WindowGuard]) -> StoreResult<()> {
    for guard in guards {
        let count = count_sent_conn(tx, &guard.scope)?;
        if count >= guard.cap {
            debug!(window = %guard.name, count, cap = guard.cap, "check_guards_tx: window exhausted");
            return Err(StoreError::LimitExceeded {
                window: guard.name.clone(),
                count,
                cap: guard.cap,
            });
        }
    }
    Ok(())
}

fn insert_event_tx(tx: &Transaction<'_>, mut event: SentEvent) -> StoreResult<SentEvent> {
    tx.execute(
        "INSERT INTO sent_events (profile_id, session_id, sent_at) VALUES (?1, ?2, ?3)",
        params![event.profile_id, event.session_id, event.sent_at],
    )?;
    event.id = tx.last_insert_rowid();
    Ok(event)
}
