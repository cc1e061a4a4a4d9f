// Event publishing: in-process broadcast or a durable SQLite outbox.
//
// Outbox rows flow through a state machine:
//   pending → sent → acked    (happy path)
//   pending → sent → pending  (consumer nack, retried with backoff)
//   sent → sent               (claim lease lapsed without ack or nack; redelivered)
//   pending → sent → dead     (after MAX_ATTEMPTS failures)
//
// A claim holds the row for CLAIM_TIMEOUT through `next_retry_at`. A lapsed
// claim counts as a failed attempt.
//
// Publishing happens after the originating write committed. A publisher
// error never undoes that write.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use tokio::sync::broadcast;
use wikidoc_common::event::PageEvent;

use crate::store::meta_db::MetaDb;
use crate::store::{decode_json, encode_json, format_timestamp, parse_optional_timestamp, parse_timestamp};

// ── Constants ───────────────────────────────────────────────────────

const BASE_DELAY_MS: u64 = 250;
const MAX_DELAY_MS: u64 = 30_000;
const MAX_ATTEMPTS: u32 = 8;
pub const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_BROADCAST_CAPACITY: usize = 1024;

// ── Publishers ──────────────────────────────────────────────────────

/// Sink for page events.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &PageEvent) -> Result<()>;
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: &PageEvent) -> Result<()> {
        Ok(())
    }
}

/// In-process fan-out to every live subscriber.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<PageEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_CAPACITY)
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: &PageEvent) -> Result<()> {
        // No subscribers is fine; the send error only reports that.
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

/// Appends every event to the `event_outbox` table, stamped with the
/// event's own commit time.
#[derive(Debug, Clone)]
pub struct OutboxPublisher {
    db: Arc<Mutex<MetaDb>>,
}

impl OutboxPublisher {
    pub fn new(db: Arc<Mutex<MetaDb>>) -> Self {
        Self { db }
    }
}

impl EventPublisher for OutboxPublisher {
    fn publish(&self, event: &PageEvent) -> Result<()> {
        let db = self.db.lock().map_err(|_| anyhow!("meta.db lock poisoned"))?;
        OutboxQueue::new(db.connection()).enqueue(event, event.at())?;
        Ok(())
    }
}

// ── Outbox types ────────────────────────────────────────────────────

/// Outbox row lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxState {
    Pending,
    Sent,
    Acked,
    Dead,
}

impl OutboxState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Acked => "acked",
            Self::Dead => "dead",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "acked" => Some(Self::Acked),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

/// A queued event awaiting delivery to a consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboxEvent {
    pub id: i64,
    pub page_id: String,
    pub event_type: String,
    pub event: PageEvent,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub state: OutboxState,
    pub created_at: DateTime<Utc>,
}

// ── Backoff ─────────────────────────────────────────────────────────

/// Exponential backoff delay for a given attempt number (0-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.min(7);
    let delay_ms = BASE_DELAY_MS.saturating_mul(1u64 << exp).min(MAX_DELAY_MS);
    Duration::from_millis(delay_ms)
}

// ── Queue operations ────────────────────────────────────────────────

/// Outbox queue backed by the `event_outbox` table.
pub struct OutboxQueue<'a> {
    conn: &'a Connection,
    claim_timeout: chrono::Duration,
}

impl<'a> OutboxQueue<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self::with_claim_timeout(conn, DEFAULT_CLAIM_TIMEOUT)
    }

    pub fn with_claim_timeout(conn: &'a Connection, claim_timeout: Duration) -> Self {
        let claim_timeout = chrono::Duration::from_std(claim_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        Self { conn, claim_timeout }
    }

    /// Enqueue an event. Returns the row id.
    pub fn enqueue(&self, event: &PageEvent, now: DateTime<Utc>) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO event_outbox (page_id, event_type, payload, state, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event.page_id(),
                    event.name(),
                    encode_json(event)?,
                    OutboxState::Pending.as_str(),
                    format_timestamp(now),
                ],
            )
            .context("failed to insert outbox event")?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Transition an event to `sent`, leased to the claimer until
    /// `now + claim_timeout`.
    pub fn mark_sent(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE event_outbox SET state = ?1, next_retry_at = ?2 WHERE id = ?3 AND state = ?4",
                params![
                    OutboxState::Sent.as_str(),
                    format_timestamp(now + self.claim_timeout),
                    id,
                    OutboxState::Pending.as_str(),
                ],
            )
            .context("failed to mark outbox event as sent")?;
        Ok(rows > 0)
    }

    /// Take over a `sent` event whose claim lapsed. The lapsed claim counts
    /// as an attempt; at `MAX_ATTEMPTS` the event goes `dead` instead.
    /// Returns the new retry count when the event was re-leased.
    fn reclaim_lapsed(&self, id: i64, retry_count: u32, now: DateTime<Utc>) -> Result<Option<u32>> {
        let attempts = retry_count + 1;
        if attempts >= MAX_ATTEMPTS {
            self.conn
                .execute(
                    "UPDATE event_outbox SET state = ?1, retry_count = ?2 \
                     WHERE id = ?3 AND state = ?4 AND next_retry_at <= ?5",
                    params![
                        OutboxState::Dead.as_str(),
                        attempts,
                        id,
                        OutboxState::Sent.as_str(),
                        format_timestamp(now),
                    ],
                )
                .context("failed to mark abandoned outbox event as dead")?;
            return Ok(None);
        }

        let rows = self
            .conn
            .execute(
                "UPDATE event_outbox SET retry_count = ?1, next_retry_at = ?2 \
                 WHERE id = ?3 AND state = ?4 AND next_retry_at <= ?5",
                params![
                    attempts,
                    format_timestamp(now + self.claim_timeout),
                    id,
                    OutboxState::Sent.as_str(),
                    format_timestamp(now),
                ],
            )
            .context("failed to re-lease outbox event")?;
        Ok((rows > 0).then_some(attempts))
    }

    /// Transition an event to `acked` (final success state).
    pub fn mark_acked(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE event_outbox SET state = ?1 WHERE id = ?2 AND state = ?3",
                params![OutboxState::Acked.as_str(), id, OutboxState::Sent.as_str()],
            )
            .context("failed to mark outbox event as acked")?;
        Ok(rows > 0)
    }

    /// Record a delivery failure: schedule a retry with backoff, or mark
    /// the event `dead` once it has failed `MAX_ATTEMPTS` times.
    pub fn mark_failed(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let (current_retry_count, current_state): (u32, String) = self
            .conn
            .query_row(
                "SELECT retry_count, state FROM event_outbox WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .context("failed to read outbox event for failure handling")?;

        if current_state != OutboxState::Sent.as_str() {
            return Ok(false);
        }

        let new_retry_count = current_retry_count + 1;
        if new_retry_count >= MAX_ATTEMPTS {
            self.conn
                .execute(
                    "UPDATE event_outbox SET state = ?1, retry_count = ?2 WHERE id = ?3",
                    params![OutboxState::Dead.as_str(), new_retry_count, id],
                )
                .context("failed to mark outbox event as dead")?;
        } else {
            let delay = backoff_delay(current_retry_count);
            let next_retry = now + chrono::Duration::from_std(delay).unwrap_or_default();
            self.conn
                .execute(
                    "UPDATE event_outbox SET state = ?1, retry_count = ?2, next_retry_at = ?3 \
                     WHERE id = ?4",
                    params![
                        OutboxState::Pending.as_str(),
                        new_retry_count,
                        format_timestamp(next_retry),
                        id,
                    ],
                )
                .context("failed to schedule outbox event retry")?;
        }

        Ok(true)
    }

    /// Deliverable events, oldest first: pending ones whose retry time has
    /// come, and sent ones whose claim lapsed.
    pub fn ready_to_send(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxEvent>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, page_id, event_type, payload, retry_count, next_retry_at, state, created_at \
                 FROM event_outbox \
                 WHERE (state = ?1 AND (next_retry_at IS NULL OR next_retry_at <= ?3)) \
                    OR (state = ?2 AND next_retry_at <= ?3) \
                 ORDER BY id ASC LIMIT ?4",
            )
            .context("failed to prepare ready_to_send query")?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(
                params![
                    OutboxState::Pending.as_str(),
                    OutboxState::Sent.as_str(),
                    format_timestamp(now),
                    limit,
                ],
                row_to_event,
            )
            .context("failed to query ready outbox events")?;

        rows.collect::<std::result::Result<Vec<_>, _>>().context("failed to collect outbox events")
    }

    /// Hand out ready events, leasing each as `sent` so it is not handed
    /// out again until acked, nacked, or its claim lapses.
    pub fn claim_ready(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxEvent>> {
        let mut claimed = Vec::new();
        for mut event in self.ready_to_send(now, limit)? {
            let leased = match event.state {
                OutboxState::Pending => self.mark_sent(event.id, now)?,
                OutboxState::Sent => match self.reclaim_lapsed(event.id, event.retry_count, now)? {
                    Some(attempts) => {
                        event.retry_count = attempts;
                        true
                    }
                    None => false,
                },
                OutboxState::Acked | OutboxState::Dead => false,
            };
            if leased {
                event.state = OutboxState::Sent;
                event.next_retry_at = Some(now + self.claim_timeout);
                claimed.push(event);
            }
        }
        Ok(claimed)
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxEvent> {
    let payload: String = row.get(3)?;
    let state: String = row.get(6)?;
    let created_at: String = row.get(7)?;

    Ok(OutboxEvent {
        id: row.get(0)?,
        page_id: row.get(1)?,
        event_type: row.get(2)?,
        event: decode_json(3, &payload)?,
        retry_count: row.get(4)?,
        next_retry_at: parse_optional_timestamp(5, row.get(5)?)?,
        state: OutboxState::parse(&state).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Text,
                format!("unknown outbox state `{state}`").into(),
            )
        })?,
        created_at: parse_timestamp(7, &created_at)?,
    })
}
