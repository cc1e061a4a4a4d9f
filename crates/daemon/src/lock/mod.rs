// Advisory page edit locks (SQLite).
//
// Locks are TTL-driven only:
// - acquire creates a lease with `expires_at = now + lease`, or renews it
//   when the same (actor, session) already holds it
// - a lease past `expires_at` is treated as absent by every read path
// - expired rows are deleted by `sweep`, which the daemon runs on a timer
//
// Nothing in the content write path consults these locks.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;
use wikidoc_common::types::{ContentLock, LockAcquisition, LockStatus};

use crate::store::{format_timestamp, parse_timestamp};

pub const DEFAULT_LEASE_SECS: u64 = 300;

// The conflict branch only fires for an expired lease or the incumbent's
// own (actor, session), so a single statement decides ownership.
const ACQUIRE_SQL: &str = "INSERT INTO content_locks \
     (page_id, locked_by, session_id, locked_at, expires_at) \
     VALUES (?1, ?2, ?3, ?4, ?5) \
     ON CONFLICT(page_id) DO UPDATE SET \
       locked_by = excluded.locked_by, \
       session_id = excluded.session_id, \
       locked_at = excluded.locked_at, \
       expires_at = excluded.expires_at \
     WHERE content_locks.expires_at <= excluded.locked_at \
        OR (content_locks.locked_by = excluded.locked_by \
            AND content_locks.session_id = excluded.session_id)";

/// Lock store backed by the `content_locks` table.
pub struct LockStore<'a> {
    conn: &'a Connection,
    lease: Duration,
}

impl<'a> LockStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self::with_lease_secs(conn, DEFAULT_LEASE_SECS)
    }

    pub fn with_lease_secs(conn: &'a Connection, lease_secs: u64) -> Self {
        let lease_secs = i64::try_from(lease_secs.max(1)).unwrap_or(i64::MAX / 1_000);
        Self { conn, lease: Duration::seconds(lease_secs) }
    }

    /// Claim or renew the lock on `page_id`.
    ///
    /// Never fails because someone else holds the lock: the result then has
    /// `owned == false` and carries the incumbent's lease.
    pub fn acquire(
        &self,
        page_id: &str,
        actor: &str,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<LockAcquisition> {
        let expires_at = now + self.lease;
        let changed = self
            .conn
            .execute(
                ACQUIRE_SQL,
                params![
                    page_id,
                    actor,
                    session_id,
                    format_timestamp(now),
                    format_timestamp(expires_at),
                ],
            )
            .context("failed to upsert content lock")?;

        let lock = load_lock(self.conn, page_id)?
            .with_context(|| format!("lock row for page `{page_id}` vanished during acquire"))?;
        let owned = changed > 0 && lock.is_held_by(actor, session_id);

        if owned {
            debug!(page_id, actor, session_id, expires_at = %lock.expires_at, "lock acquired");
        } else {
            debug!(page_id, actor, holder = %lock.locked_by, "lock held by another session");
        }

        Ok(LockAcquisition { acquired: owned, owned, lock })
    }

    /// Drop the lock if `(actor, session_id)` holds it.
    ///
    /// A release from anyone else is ignored so a stale client can never
    /// evict another session's active edit. Returns whether a row was removed.
    pub fn release(&self, page_id: &str, actor: &str, session_id: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM content_locks \
                 WHERE page_id = ?1 AND locked_by = ?2 AND session_id = ?3",
                params![page_id, actor, session_id],
            )
            .context("failed to delete content lock")?;

        if removed == 0 {
            debug!(page_id, actor, session_id, "release ignored: lock not held by caller");
        }
        Ok(removed > 0)
    }

    /// Live lock for `page_id`, treating an expired row as unlocked.
    pub fn status(&self, page_id: &str, now: DateTime<Utc>) -> Result<LockStatus> {
        Ok(match load_lock(self.conn, page_id)? {
            Some(lock) if !lock.is_expired_at(now) => LockStatus::Locked { lock },
            _ => LockStatus::Unlocked,
        })
    }

    /// Delete every expired lock. Idempotent.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM content_locks WHERE expires_at <= ?1",
                params![format_timestamp(now)],
            )
            .context("failed to delete expired content locks")
    }
}

fn load_lock(conn: &Connection, page_id: &str) -> Result<Option<ContentLock>> {
    conn.query_row(
        "SELECT page_id, locked_by, session_id, locked_at, expires_at \
         FROM content_locks WHERE page_id = ?1",
        params![page_id],
        |row| {
            let locked_at: String = row.get(3)?;
            let expires_at: String = row.get(4)?;
            Ok(ContentLock {
                page_id: row.get(0)?,
                locked_by: row.get(1)?,
                session_id: row.get(2)?,
                locked_at: parse_timestamp(3, &locked_at)?,
                expires_at: parse_timestamp(4, &expires_at)?,
            })
        },
    )
    .optional()
    .context("failed to load content lock")
}
