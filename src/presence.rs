// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Presence Registry
//!
//! Tracks which realtime connections belong to which account. The mapping is
//! two-sided:
//!
//! - `presence:acct:<account_id>` → set of connection ids
//! - `presence:conn:<connection_id>` → account id
//!
//! Hub instances are horizontally scaled, so the production backend is a
//! shared Redis; every paired write goes through a `MULTI` pipeline so a
//! reader never sees only one side populated. The in-memory backend keeps
//! both maps behind one lock for single-instance deployments and tests.
//!
//! There is no lock across `evict_all` + `register`. Two simultaneous
//! handshakes for one account on different instances may interleave; the
//! later registration wins eventually.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::warn;

use crate::error::PresenceError;

const ACCOUNT_KEY_PREFIX: &str = "presence:acct:";
const CONNECTION_KEY_PREFIX: &str = "presence:conn:";

/// Key holding the connection set of an account.
pub fn account_key(account_id: &str) -> String {
    format!("{}{}", ACCOUNT_KEY_PREFIX, account_id)
}

/// Key holding the owning account of a connection.
pub fn connection_key(connection_id: &str) -> String {
    format!("{}{}", CONNECTION_KEY_PREFIX, connection_id)
}

/// Backend for the two-sided presence mapping.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Inserts both sides of the mapping atomically.
    async fn register(&self, account_id: &str, connection_id: &str) -> Result<(), PresenceError>;

    /// Removes every connection of the account from both sides and returns
    /// the ids that were evicted.
    async fn evict_all(&self, account_id: &str) -> Result<Vec<String>, PresenceError>;

    /// Removes a single connection. Returns false if it was not registered.
    async fn remove(&self, connection_id: &str) -> Result<bool, PresenceError>;

    async fn connections_for(&self, account_id: &str) -> Result<Vec<String>, PresenceError>;

    async fn account_for(&self, connection_id: &str) -> Result<Option<String>, PresenceError>;
}

// ============================================================================
// In-Memory Backend
// ============================================================================

#[derive(Default)]
struct PresenceMaps {
    accounts: HashMap<String, HashSet<String>>,
    connections: HashMap<String, String>,
}

impl PresenceMaps {
    fn unlink(&mut self, connection_id: &str) -> bool {
        let Some(account_id) = self.connections.remove(connection_id) else {
            return false;
        };
        if let Some(set) = self.accounts.get_mut(&account_id) {
            set.remove(connection_id);
            if set.is_empty() {
                self.accounts.remove(&account_id);
            }
        }
        true
    }
}

/// Process-local presence store.
#[derive(Default)]
pub struct MemoryPresenceStore {
    maps: RwLock<PresenceMaps>,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.maps.read().unwrap().connections.len()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn register(&self, account_id: &str, connection_id: &str) -> Result<(), PresenceError> {
        let mut maps = self.maps.write().unwrap();
        maps.accounts
            .entry(account_id.to_string())
            .or_default()
            .insert(connection_id.to_string());
        maps.connections
            .insert(connection_id.to_string(), account_id.to_string());
        Ok(())
    }

    async fn evict_all(&self, account_id: &str) -> Result<Vec<String>, PresenceError> {
        let mut maps = self.maps.write().unwrap();
        let evicted: Vec<String> = maps
            .accounts
            .remove(account_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for connection_id in &evicted {
            maps.connections.remove(connection_id);
        }
        Ok(evicted)
    }

    async fn remove(&self, connection_id: &str) -> Result<bool, PresenceError> {
        Ok(self.maps.write().unwrap().unlink(connection_id))
    }

    async fn connections_for(&self, account_id: &str) -> Result<Vec<String>, PresenceError> {
        let maps = self.maps.read().unwrap();
        Ok(maps
            .accounts
            .get(account_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn account_for(&self, connection_id: &str) -> Result<Option<String>, PresenceError> {
        Ok(self.maps.read().unwrap().connections.get(connection_id).cloned())
    }
}

// ============================================================================
// Redis Backend
// ============================================================================

/// Shared presence store on Redis. Holds one multiplexed connection for the
/// lifetime of the hub; clones of it share the underlying socket.
pub struct RedisPresenceStore {
    conn: MultiplexedConnection,
}

impl RedisPresenceStore {
    pub async fn connect(redis_url: &str) -> Result<Self, PresenceError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(RedisPresenceStore { conn })
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn register(&self, account_id: &str, connection_id: &str) -> Result<(), PresenceError> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("SADD")
            .arg(account_key(account_id))
            .arg(connection_id)
            .ignore()
            .cmd("SET")
            .arg(connection_key(connection_id))
            .arg(account_id)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn evict_all(&self, account_id: &str) -> Result<Vec<String>, PresenceError> {
        let mut conn = self.conn.clone();
        let key = account_key(account_id);
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(&key)
            .query_async(&mut conn)
            .await?;
        if members.is_empty() {
            return Ok(members);
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for connection_id in &members {
            pipe.cmd("SREM").arg(&key).arg(connection_id).ignore();
            pipe.cmd("DEL").arg(connection_key(connection_id)).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(members)
    }

    async fn remove(&self, connection_id: &str) -> Result<bool, PresenceError> {
        let mut conn = self.conn.clone();
        let owner: Option<String> = redis::cmd("GET")
            .arg(connection_key(connection_id))
            .query_async(&mut conn)
            .await?;
        let Some(account_id) = owner else {
            return Ok(false);
        };

        redis::pipe()
            .atomic()
            .cmd("SREM")
            .arg(account_key(&account_id))
            .arg(connection_id)
            .ignore()
            .cmd("DEL")
            .arg(connection_key(connection_id))
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(true)
    }

    async fn connections_for(&self, account_id: &str) -> Result<Vec<String>, PresenceError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(account_key(account_id))
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    async fn account_for(&self, connection_id: &str) -> Result<Option<String>, PresenceError> {
        let mut conn = self.conn.clone();
        let owner: Option<String> = redis::cmd("GET")
            .arg(connection_key(connection_id))
            .query_async(&mut conn)
            .await?;
        Ok(owner)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Presence backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresenceBackend {
    /// Single-instance, process-local.
    #[default]
    Memory,
    /// Shared Redis.
    Redis,
}

/// Caller-facing presence registry.
///
/// Store errors never propagate: writes report `false`, lookups report
/// empty/absent, and the failure is logged.
#[derive(Clone)]
pub struct PresenceRegistry {
    store: Arc<dyn PresenceStore>,
}

impl PresenceRegistry {
    pub fn new(store: Arc<dyn PresenceStore>) -> Self {
        PresenceRegistry { store }
    }

    /// Registry over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryPresenceStore::new()))
    }

    pub async fn register(&self, account_id: &str, connection_id: &str) -> bool {
        match self.store.register(account_id, connection_id).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Presence register failed: {}", e);
                false
            }
        }
    }

    /// Evicts all connections of an account. `None` means the store failed.
    pub async fn evict_all(&self, account_id: &str) -> Option<Vec<String>> {
        match self.store.evict_all(account_id).await {
            Ok(evicted) => Some(evicted),
            Err(e) => {
                warn!("Presence eviction failed: {}", e);
                None
            }
        }
    }

    /// Removes a connection. Removing an unknown connection is a successful
    /// no-op; only a store failure returns false.
    pub async fn remove(&self, connection_id: &str) -> bool {
        match self.store.remove(connection_id).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Presence remove failed: {}", e);
                false
            }
        }
    }

    pub async fn connections_for(&self, account_id: &str) -> Vec<String> {
        self.store
            .connections_for(account_id)
            .await
            .unwrap_or_else(|e| {
                warn!("Presence lookup failed: {}", e);
                Vec::new()
            })
    }

    pub async fn account_for(&self, connection_id: &str) -> Option<String> {
        self.store
            .account_for(connection_id)
            .await
            .unwrap_or_else(|e| {
                warn!("Presence reverse lookup failed: {}", e);
                None
            })
    }
}
