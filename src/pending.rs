// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Pending Delivery Queue
//!
//! Durable store-and-forward log for messages whose recipient had no live
//! connection. Rows are returned in insertion order and stay in the queue
//! until the recipient acknowledges them or they expire.
//! Supports both in-memory (for testing) and SQLite (for production).

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::freshness::unix_now;

/// What produced a queued message. Re-tags the push on replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Contact,
    Message,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Contact => "Contact",
            MessageKind::Message => "Message",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Contact" => Some(MessageKind::Contact),
            "Message" => Some(MessageKind::Message),
            _ => None,
        }
    }
}

/// A message awaiting delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub id: String,
    pub recipient_id: String,
    pub kind: MessageKind,
    /// Opaque payload, forwarded untouched.
    pub payload: Vec<u8>,
    /// Sender's detached signature over `payload`.
    pub payload_signature: Vec<u8>,
    /// When the row was queued (Unix seconds).
    pub created_at_secs: i64,
}

impl PendingMessage {
    pub fn new(
        recipient_id: String,
        kind: MessageKind,
        payload: Vec<u8>,
        payload_signature: Vec<u8>,
    ) -> Self {
        PendingMessage {
            id: uuid::Uuid::new_v4().to_string(),
            recipient_id,
            kind,
            payload,
            payload_signature,
            created_at_secs: unix_now(),
        }
    }

    /// Checks if the message is older than `ttl`. A TTL of zero expires
    /// everything.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        let age = unix_now().saturating_sub(self.created_at_secs).max(0) as u64;
        age >= ttl.as_secs()
    }
}

/// Trait for pending queue backends.
pub trait PendingQueue: Send + Sync {
    /// Appends a message to its recipient's queue.
    fn enqueue(&self, message: PendingMessage) -> Result<(), StoreError>;

    /// Returns every queued message for a recipient, oldest first, without
    /// removing them.
    fn drain(&self, recipient_id: &str) -> Result<Vec<PendingMessage>, StoreError>;

    /// Removes one message. Returns false if no such row exists for this
    /// recipient.
    fn acknowledge(&self, recipient_id: &str, message_id: &str) -> Result<bool, StoreError>;

    /// Removes all expired messages. Returns the number removed.
    fn cleanup_expired(&self, ttl: Duration) -> usize;

    /// Total number of queued messages.
    fn message_count(&self) -> usize;

    /// Number of recipients with queued messages.
    fn recipient_count(&self) -> usize;
}

// ============================================================================
// In-Memory Queue
// ============================================================================

pub struct MemoryPendingQueue {
    queues: RwLock<HashMap<String, VecDeque<PendingMessage>>>,
}

impl MemoryPendingQueue {
    pub fn new() -> Self {
        MemoryPendingQueue {
            queues: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryPendingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingQueue for MemoryPendingQueue {
    fn enqueue(&self, message: PendingMessage) -> Result<(), StoreError> {
        let mut queues = self.queues.write().unwrap();
        queues
            .entry(message.recipient_id.clone())
            .or_default()
            .push_back(message);
        Ok(())
    }

    fn drain(&self, recipient_id: &str) -> Result<Vec<PendingMessage>, StoreError> {
        let queues = self.queues.read().unwrap();
        Ok(queues
            .get(recipient_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn acknowledge(&self, recipient_id: &str, message_id: &str) -> Result<bool, StoreError> {
        let mut queues = self.queues.write().unwrap();
        let Some(queue) = queues.get_mut(recipient_id) else {
            return Ok(false);
        };
        let before = queue.len();
        queue.retain(|m| m.id != message_id);
        let removed = queue.len() < before;
        if queue.is_empty() {
            queues.remove(recipient_id);
        }
        Ok(removed)
    }

    fn cleanup_expired(&self, ttl: Duration) -> usize {
        let mut queues = self.queues.write().unwrap();
        let mut removed = 0;
        queues.retain(|_, queue| {
            let before = queue.len();
            queue.retain(|m| !m.is_expired(ttl));
            removed += before - queue.len();
            !queue.is_empty()
        });
        removed
    }

    fn message_count(&self) -> usize {
        self.queues.read().unwrap().values().map(|q| q.len()).sum()
    }

    fn recipient_count(&self) -> usize {
        self.queues.read().unwrap().len()
    }
}

// ============================================================================
// SQLite Queue
// ============================================================================

/// SQLite-backed pending queue. An autoincrement sequence column preserves
/// insertion order independent of clock resolution.
pub struct SqlitePendingQueue {
    conn: Mutex<Connection>,
}

impl SqlitePendingQueue {
    /// Opens or creates a SQLite database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA cache_size=10000;",
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS pending_messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                recipient_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload BLOB NOT NULL,
                payload_signature BLOB NOT NULL,
                created_at_secs INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_pending_recipient
             ON pending_messages(recipient_id, seq)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_pending_created
             ON pending_messages(created_at_secs)",
            [],
        )?;

        Ok(SqlitePendingQueue {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory SQLite database (for testing).
    #[cfg(test)]
    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::open(":memory:")
    }
}

impl PendingQueue for SqlitePendingQueue {
    fn enqueue(&self, message: PendingMessage) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO pending_messages
                (id, recipient_id, kind, payload, payload_signature, created_at_secs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id,
                message.recipient_id,
                message.kind.as_str(),
                message.payload,
                message.payload_signature,
                message.created_at_secs
            ],
        )?;
        Ok(())
    }

    fn drain(&self, recipient_id: &str) -> Result<Vec<PendingMessage>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, recipient_id, kind, payload, payload_signature, created_at_secs
             FROM pending_messages WHERE recipient_id = ?1
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![recipient_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Vec<u8>>(3)?,
                row.get::<_, Vec<u8>>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (id, recipient_id, kind, payload, payload_signature, created_at_secs) = row?;
            let kind = MessageKind::parse(&kind)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown kind {}", kind)))?;
            messages.push(PendingMessage {
                id,
                recipient_id,
                kind,
                payload,
                payload_signature,
                created_at_secs,
            });
        }
        Ok(messages)
    }

    fn acknowledge(&self, recipient_id: &str, message_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let changes = conn.execute(
            "DELETE FROM pending_messages WHERE id = ?1 AND recipient_id = ?2",
            params![message_id, recipient_id],
        )?;
        Ok(changes > 0)
    }

    fn cleanup_expired(&self, ttl: Duration) -> usize {
        let conn = self.conn.lock().unwrap();
        let cutoff = unix_now().saturating_sub(ttl.as_secs() as i64);
        conn.execute(
            "DELETE FROM pending_messages WHERE created_at_secs <= ?1",
            params![cutoff],
        )
        .unwrap_or(0)
    }

    fn message_count(&self) -> usize {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM pending_messages", [], |row| {
            row.get::<_, i64>(0)
        })
        .unwrap_or(0) as usize
    }

    fn recipient_count(&self) -> usize {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(DISTINCT recipient_id) FROM pending_messages",
            [],
            |row| row.get::<_, i64>(0),
        )
        .unwrap_or(0) as usize
    }
}

// ============================================================================
// Storage Factory
// ============================================================================

/// Storage backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackend {
    /// In-memory storage (lost on restart).
    Memory,
    /// SQLite persistent storage.
    #[default]
    Sqlite,
}
