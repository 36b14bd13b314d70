// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! SQLite slot storage for the persisted result cache

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::persist::CacheStore;
use crate::{Result, SnapsortError};

/// Slot holding the serialized result cache
pub const CACHE_SLOT: &str = "image_analysis_cache";

/// Database manager for SnapSort (thread-safe wrapper)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    slot: String,
}

/// Size and age of a stored slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotInfo {
    pub name: String,
    pub bytes: i64,
    pub updated_at: DateTime<Utc>,
}

impl Database {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            slot: CACHE_SLOT.to_string(),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Use a different slot name for cache load/save
    pub fn with_slot(mut self, slot: impl Into<String>) -> Self {
        self.slot = slot.into();
        self
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| SnapsortError::Config("Database lock poisoned".to_string()))
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS slots (
                name TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_at TEXT NOT NULL
            );
        "#)?;
        Ok(())
    }

    pub fn read_slot(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.lock_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM slots WHERE name = ?1",
                params![name],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn write_slot(&self, name: &str, value: &[u8]) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"INSERT INTO slots (name, value, updated_at) VALUES (?1, ?2, ?3)
               ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"#,
            params![name, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn delete_slot(&self, name: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        let removed = conn.execute("DELETE FROM slots WHERE name = ?1", params![name])?;
        Ok(removed > 0)
    }

    pub fn slot_info(&self, name: &str) -> Result<Option<SlotInfo>> {
        let conn = self.lock_conn()?;
        let info = conn
            .query_row(
                "SELECT name, length(value), updated_at FROM slots WHERE name = ?1",
                params![name],
                |row| {
                    let updated: String = row.get(2)?;
                    Ok(SlotInfo {
                        name: row.get(0)?,
                        bytes: row.get(1)?,
                        updated_at: DateTime::parse_from_rfc3339(&updated)
                            .map(|dt| dt.with_timezone(&Utc))
                            .unwrap_or_else(|_| Utc::now()),
                    })
                },
            )
            .optional()?;
        Ok(info)
    }

    /// Name of the slot used for the result cache
    pub fn slot(&self) -> &str {
        &self.slot
    }

    /// Vacuum database
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("VACUUM", [])?;
        Ok(())
    }
}

impl CacheStore for Database {
    fn load(&self) -> Result<Option<Vec<u8>>> {
        self.read_slot(&self.slot)
    }

    fn save(&self, blob: &[u8]) -> Result<()> {
        self.write_slot(&self.slot, blob)
    }
}
