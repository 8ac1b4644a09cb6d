// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Account Directory
//!
//! Maps account ids to their signing public key. Also holds an opaque profile
//! blob and a version counter that increments on every accepted mutation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub account_id: String,
    pub public_key: Vec<u8>,
    /// Opaque, client-encrypted profile data.
    pub profile: Vec<u8>,
    pub version: i64,
}

impl Identity {
    pub fn new(account_id: String, public_key: Vec<u8>) -> Self {
        Identity {
            account_id,
            public_key,
            profile: Vec::new(),
            version: 1,
        }
    }
}

/// Trait for account directory backends.
pub trait AccountDirectory: Send + Sync {
    /// Returns the public key of an account, if it exists.
    fn lookup_public_key(&self, account_id: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn get(&self, account_id: &str) -> Result<Option<Identity>, StoreError>;

    /// Inserts a new account. Returns false if the id is already taken.
    fn create(&self, identity: Identity) -> Result<bool, StoreError>;

    /// Replaces the profile and bumps the version.
    ///
    /// When `expected_version` is given, the write only happens if it matches
    /// the stored version. Returns the new version.
    fn update_profile(
        &self,
        account_id: &str,
        profile: &[u8],
        expected_version: Option<i64>,
    ) -> Result<i64, StoreError>;

    fn account_count(&self) -> usize;
}

// ============================================================================
// In-Memory Directory
// ============================================================================

#[derive(Default)]
pub struct MemoryAccountDirectory {
    accounts: RwLock<HashMap<String, Identity>>,
}

impl MemoryAccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountDirectory for MemoryAccountDirectory {
    fn lookup_public_key(&self, account_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let accounts = self.accounts.read().unwrap();
        Ok(accounts.get(account_id).map(|a| a.public_key.clone()))
    }

    fn get(&self, account_id: &str) -> Result<Option<Identity>, StoreError> {
        Ok(self.accounts.read().unwrap().get(account_id).cloned())
    }

    fn create(&self, identity: Identity) -> Result<bool, StoreError> {
        let mut accounts = self.accounts.write().unwrap();
        if accounts.contains_key(&identity.account_id) {
            return Ok(false);
        }
        accounts.insert(identity.account_id.clone(), identity);
        Ok(true)
    }

    fn update_profile(
        &self,
        account_id: &str,
        profile: &[u8],
        expected_version: Option<i64>,
    ) -> Result<i64, StoreError> {
        let mut accounts = self.accounts.write().unwrap();
        let identity = accounts.get_mut(account_id).ok_or(StoreError::NotFound)?;
        if let Some(expected) = expected_version {
            if expected != identity.version {
                return Err(StoreError::VersionConflict {
                    expected,
                    actual: identity.version,
                });
            }
        }
        identity.profile = profile.to_vec();
        identity.version += 1;
        Ok(identity.version)
    }

    fn account_count(&self) -> usize {
        self.accounts.read().unwrap().len()
    }
}

// ============================================================================
// SQLite Directory
// ============================================================================

pub struct SqliteAccountDirectory {
    conn: Mutex<Connection>,
}

impl SqliteAccountDirectory {
    /// Opens or creates the directory database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;",
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS accounts (
                account_id TEXT PRIMARY KEY,
                public_key BLOB NOT NULL,
                profile BLOB NOT NULL,
                version INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(SqliteAccountDirectory {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::open(":memory:")
    }
}

impl AccountDirectory for SqliteAccountDirectory {
    fn lookup_public_key(&self, account_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let key = conn
            .query_row(
                "SELECT public_key FROM accounts WHERE account_id = ?1",
                params![account_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(key)
    }

    fn get(&self, account_id: &str) -> Result<Option<Identity>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let identity = conn
            .query_row(
                "SELECT account_id, public_key, profile, version
                 FROM accounts WHERE account_id = ?1",
                params![account_id],
                |row| {
                    Ok(Identity {
                        account_id: row.get(0)?,
                        public_key: row.get(1)?,
                        profile: row.get(2)?,
                        version: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(identity)
    }

    fn create(&self, identity: Identity) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO accounts (account_id, public_key, profile, version)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                identity.account_id,
                identity.public_key,
                identity.profile,
                identity.version
            ],
        )?;
        Ok(inserted == 1)
    }

    fn update_profile(
        &self,
        account_id: &str,
        profile: &[u8],
        expected_version: Option<i64>,
    ) -> Result<i64, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let current: i64 = tx
            .query_row(
                "SELECT version FROM accounts WHERE account_id = ?1",
                params![account_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;

        if let Some(expected) = expected_version {
            if expected != current {
                return Err(StoreError::VersionConflict {
                    expected,
                    actual: current,
                });
            }
        }

        let next = current + 1;
        tx.execute(
            "UPDATE accounts SET profile = ?1, version = ?2 WHERE account_id = ?3",
            params![profile, next, account_id],
        )?;
        tx.commit()?;
        Ok(next)
    }

    fn account_count(&self) -> usize {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM accounts", [], |row| {
            row.get::<_, i64>(0)
        })
        .unwrap_or(0) as usize
    }
}
