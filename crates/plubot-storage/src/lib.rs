use rusqlite::{Connection, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod entries;
mod schema;

const SCHEMA_VERSION: u32 = 2;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Other error: {0}")]
    Other(String),
}

/// Local durable key/value storage.
///
/// Values are opaque strings; callers decide the encoding. Every write
/// stamps the entry with the current time in milliseconds.
pub trait KeyValueStore {
    fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn get(&self, key: &str) -> Result<Option<StoredEntry>, StorageError>;
    /// Returns whether an entry was removed.
    fn remove(&self, key: &str) -> Result<bool, StorageError>;
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub key: String,
    pub value: String,
    pub updated_at: i64,
    pub byte_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStats {
    pub entry_count: i64,
    pub total_bytes: i64,
}

pub struct Storage {
    conn: Connection,
}

impl Storage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        // A CLI inspecting the same file while the editor writes should wait, not fail.
        let _ = conn.busy_timeout(Duration::from_millis(2_500));
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        let storage = Self { conn };
        storage.init()?;
        Ok(storage)
    }

    pub fn new_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let storage = Self { conn };
        storage.init()?;
        Ok(storage)
    }

    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        let (entry_count, total_bytes): (i64, i64) = self.conn.query_row(
            "SELECT count(*), coalesce(sum(byte_size), 0) FROM kv_entry",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(StorageStats {
            entry_count,
            total_bytes,
        })
    }

    fn init(&self) -> Result<(), StorageError> {
        schema::create_tables(&self.conn)?;
        schema::create_indexes(&self.conn)?;
        schema::apply_schema_migrations(self)
    }

    fn schema_version(&self) -> Result<u32, StorageError> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        Ok(version.max(0) as u32)
    }

    fn set_schema_version(&self, version: u32) -> Result<(), StorageError> {
        self.conn
            .pragma_update(None, "user_version", version.to_string())?;
        Ok(())
    }
}

impl KeyValueStore for Storage {
    fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        entries::put_entry(&self.conn, key, value, chrono::Utc::now().timestamp_millis())
    }

    fn get(&self, key: &str) -> Result<Option<StoredEntry>, StorageError> {
        entries::get_entry(&self.conn, key)
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        entries::remove_entry(&self.conn, key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        entries::keys_with_prefix(&self.conn, prefix)
    }
}

#[cfg(test)]
mod tests;
