//! Verification-notification outbox.
//!
//! Opening the door and telling the backend about it are not transactional:
//! the door opens first and the notification is advisory. When the
//! notification fails it is parked here and re-sent later, until it is
//! delivered or has used up its attempts.
//!
//! # Storage layout
//!
//! A single SQLite table `verification_outbox`:
//!
//! | column       | type    | description                                      |
//! |--------------|---------|--------------------------------------------------|
//! | id           | TEXT    | UUID v4 primary key                              |
//! | delivery_id  | TEXT    | Delivery whose door was opened                   |
//! | otp          | TEXT    | The (already spent) code the backend expects     |
//! | status       | TEXT    | One of `"pending"`, `"delivered"`, `"abandoned"` |
//! | attempts     | INTEGER | Delivery attempts made so far                    |
//! | last_error   | TEXT    | Most recent failure reason                       |
//! | created_at   | TEXT    | RFC-3339 creation timestamp (UTC)                |
//! | updated_at   | TEXT    | RFC-3339 last-update timestamp (UTC)             |
//!
//! # Example
//!
//! ```rust
//! use karna_memory::outbox::{Outbox, OutboxStatus};
//! use std::time::Duration;
//!
//! let outbox = Outbox::open_in_memory().unwrap();
//! let id = outbox.enqueue("D1", "4321", "owner lookup returned HTTP 503").unwrap();
//!
//! assert_eq!(outbox.pending().unwrap().len(), 1);
//!
//! // A later retry succeeds.
//! outbox.mark_delivered(&id).unwrap();
//! assert_eq!(outbox.get(&id).unwrap().status, OutboxStatus::Delivered);
//! assert!(outbox.pending().unwrap().is_empty());
//!
//! // Settled rows are swept once they are old enough.
//! assert_eq!(outbox.prune_settled(Duration::ZERO).unwrap(), 1);
//! ```
//!
//! Delivered and abandoned rows stay readable through [`Outbox::get`] until
//! [`Outbox::prune_settled`] removes them.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// Errors that can arise from outbox operations.
#[derive(Error, Debug)]
pub enum OutboxError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Outbox entry not found: {0}")]
    NotFound(String),
    #[error("Outbox entry {0} is no longer pending")]
    AlreadySettled(String),
}

/// Lifecycle of one queued notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Delivered,
    /// Gave up after the maximum number of attempts.
    Abandoned,
}

impl OutboxStatus {
    fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Delivered => "delivered",
            OutboxStatus::Abandoned => "abandoned",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OutboxStatus::Pending),
            "delivered" => Some(OutboxStatus::Delivered),
            "abandoned" => Some(OutboxStatus::Abandoned),
            _ => None,
        }
    }
}

/// A queued verification notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: String,
    pub delivery_id: String,
    #[serde(skip_serializing, default)]
    pub otp: String,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// SQLite-backed queue of undelivered verification notifications.
pub struct Outbox {
    conn: Connection,
}

impl Outbox {
    /// Open (or create) a persistent outbox at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OutboxError> {
        let conn = Connection::open(path)?;
        let outbox = Self { conn };
        outbox.init_schema()?;
        Ok(outbox)
    }

    /// Open an in-memory outbox; its contents are lost on exit.
    pub fn open_in_memory() -> Result<Self, OutboxError> {
        let conn = Connection::open_in_memory()?;
        let outbox = Self { conn };
        outbox.init_schema()?;
        Ok(outbox)
    }

    fn init_schema(&self) -> Result<(), OutboxError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS verification_outbox (
                id          TEXT NOT NULL PRIMARY KEY,
                delivery_id TEXT NOT NULL,
                otp         TEXT NOT NULL,
                status      TEXT NOT NULL DEFAULT 'pending',
                attempts    INTEGER NOT NULL DEFAULT 0,
                last_error  TEXT,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Queue a notification whose first delivery attempt failed with
    /// `reason`. That attempt counts, so the entry starts at one attempt.
    pub fn enqueue(&self, delivery_id: &str, otp: &str, reason: &str) -> Result<String, OutboxError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO verification_outbox
                 (id, delivery_id, otp, status, attempts, last_error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7)",
            params![id, delivery_id, otp, OutboxStatus::Pending.as_str(), reason, now, now],
        )?;
        Ok(id)
    }

    /// Mark a pending entry as acknowledged by the backend.
    pub fn mark_delivered(&self, id: &str) -> Result<(), OutboxError> {
        self.require_pending(id)?;
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE verification_outbox SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![OutboxStatus::Delivered.as_str(), now, id],
        )?;
        Ok(())
    }

    /// Record another failed attempt. Once `max_attempts` is reached the
    /// entry is abandoned. Returns the entry's new status.
    pub fn record_failure(&self, id: &str, reason: &str, max_attempts: u32) -> Result<OutboxStatus, OutboxError> {
        let entry = self.require_pending(id)?;
        let attempts = entry.attempts + 1;
        let status = if attempts >= max_attempts {
            warn!(
                delivery_id = %entry.delivery_id,
                attempts,
                "verification notification abandoned"
            );
            OutboxStatus::Abandoned
        } else {
            OutboxStatus::Pending
        };
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE verification_outbox
             SET status = ?1, attempts = ?2, last_error = ?3, updated_at = ?4
             WHERE id = ?5",
            params![status.as_str(), attempts, reason, now, id],
        )?;
        Ok(status)
    }

    /// Fetch a single entry by id.
    pub fn get(&self, id: &str) -> Result<OutboxEntry, OutboxError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, delivery_id, otp, status, attempts, last_error, created_at, updated_at
             FROM verification_outbox WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], row_to_entry)?;
        rows.next()
            .ok_or_else(|| OutboxError::NotFound(id.to_string()))?
            .map_err(OutboxError::Sqlite)
    }

    /// All pending entries, oldest first.
    pub fn pending(&self) -> Result<Vec<OutboxEntry>, OutboxError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, delivery_id, otp, status, attempts, last_error, created_at, updated_at
             FROM verification_outbox WHERE status = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![OutboxStatus::Pending.as_str()], row_to_entry)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(OutboxError::Sqlite)
    }

    /// Delete delivered and abandoned entries last updated at least
    /// `older_than` ago. Returns how many were removed.
    pub fn prune_settled(&self, older_than: Duration) -> Result<usize, OutboxError> {
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(0);
        };

        let mut stmt = self.conn.prepare(
            "SELECT id, updated_at FROM verification_outbox WHERE status != ?1",
        )?;
        let settled = stmt
            .query_map(params![OutboxStatus::Pending.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut removed = 0;
        for (id, updated_at) in settled {
            match DateTime::parse_from_rfc3339(&updated_at) {
                Ok(at) if at.with_timezone(&Utc) <= cutoff => {
                    removed += self
                        .conn
                        .execute("DELETE FROM verification_outbox WHERE id = ?1", params![id])?;
                }
                Ok(_) => {}
                Err(e) => warn!(id = %id, error = %e, "outbox entry has an unreadable timestamp; kept"),
            }
        }
        Ok(removed)
    }

    fn require_pending(&self, id: &str) -> Result<OutboxEntry, OutboxError> {
        let entry = self.get(id)?;
        if entry.status != OutboxStatus::Pending {
            return Err(OutboxError::AlreadySettled(id.to_string()));
        }
        Ok(entry)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxEntry> {
    let status_str: String = row.get(3)?;
    let status = OutboxStatus::from_str(&status_str).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(3, status_str, rusqlite::types::Type::Text)
    })?;
    Ok(OutboxEntry {
        id: row.get(0)?,
        delivery_id: row.get(1)?,
        otp: row.get(2)?,
        status,
        attempts: row.get(4)?,
        last_error: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_outbox() -> Outbox {
        Outbox::open_in_memory().unwrap()
    }

    #[test]
    fn enqueue_creates_pending_entry_with_one_attempt() {
        let outbox = make_outbox();
        let id = outbox.enqueue("D1", "4321", "connection refused").unwrap();
        let entry = outbox.get(&id).unwrap();
        assert_eq!(entry.delivery_id, "D1");
        assert_eq!(entry.otp, "4321");
        assert_eq!(entry.status, OutboxStatus::Pending);
        assert_eq!(entry.attempts, 1);
        assert_eq!(entry.last_error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn failures_abandon_after_max_attempts() {
        let outbox = make_outbox();
        let id = outbox.enqueue("D1", "4321", "503").unwrap();
        assert_eq!(outbox.record_failure(&id, "503", 3).unwrap(), OutboxStatus::Pending);
        assert_eq!(outbox.record_failure(&id, "timeout", 3).unwrap(), OutboxStatus::Abandoned);

        let entry = outbox.get(&id).unwrap();
        assert_eq!(entry.attempts, 3);
        assert_eq!(entry.last_error.as_deref(), Some("timeout"));
        assert!(outbox.pending().unwrap().is_empty());
    }

    #[test]
    fn settled_entries_reject_further_updates() {
        let outbox = make_outbox();
        let id = outbox.enqueue("D1", "4321", "503").unwrap();
        outbox.mark_delivered(&id).unwrap();
        assert!(matches!(
            outbox.mark_delivered(&id),
            Err(OutboxError::AlreadySettled(_))
        ));
        assert!(matches!(
            outbox.record_failure(&id, "late", 5),
            Err(OutboxError::AlreadySettled(_))
        ));
    }

    #[test]
    fn pending_lists_only_pending_oldest_first() {
        let outbox = make_outbox();
        let first = outbox.enqueue("D1", "1111", "x").unwrap();
        let second = outbox.enqueue("D2", "2222", "x").unwrap();
        let third = outbox.enqueue("D3", "3333", "x").unwrap();
        outbox.mark_delivered(&second).unwrap();

        let ids: Vec<String> = outbox.pending().unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![first, third]);
    }

    #[test]
    fn prune_removes_only_settled_entries_past_retention() {
        let outbox = make_outbox();
        let delivered = outbox.enqueue("D1", "1111", "x").unwrap();
        let abandoned = outbox.enqueue("D2", "2222", "x").unwrap();
        let pending = outbox.enqueue("D3", "3333", "x").unwrap();
        outbox.mark_delivered(&delivered).unwrap();
        outbox.record_failure(&abandoned, "503", 2).unwrap();

        // Nothing settled is a day old yet.
        assert_eq!(outbox.prune_settled(Duration::from_secs(86_400)).unwrap(), 0);
        assert_eq!(outbox.get(&delivered).unwrap().status, OutboxStatus::Delivered);

        assert_eq!(outbox.prune_settled(Duration::ZERO).unwrap(), 2);
        assert!(matches!(outbox.get(&delivered), Err(OutboxError::NotFound(_))));
        assert!(matches!(outbox.get(&abandoned), Err(OutboxError::NotFound(_))));
        assert_eq!(outbox.get(&pending).unwrap().status, OutboxStatus::Pending);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let outbox = make_outbox();
        assert!(matches!(outbox.get("nope"), Err(OutboxError::NotFound(_))));
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.sqlite");
        let id = {
            let outbox = Outbox::open(&path).unwrap();
            outbox.enqueue("D7", "7777", "offline").unwrap()
        };
        let reopened = Outbox::open(&path).unwrap();
        assert_eq!(reopened.get(&id).unwrap().delivery_id, "D7");
    }

    #[test]
    fn serialized_entry_omits_otp() {
        let outbox = make_outbox();
        let id = outbox.enqueue("D1", "987654", "x").unwrap();
        let json = serde_json::to_string(&outbox.get(&id).unwrap()).unwrap();
        assert!(!json.contains("987654"));
        assert!(json.contains("pending"));
    }
}
