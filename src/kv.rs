//! Co-resident JSON key/value store
//!
//! Stores JSON values in a `kv_store` table in the same database as the
//! filesystem. The two schemas are orthogonal: the filesystem never
//! touches `kv_store` and this module never touches the inode tables.

use crate::error::{FsError, Result};
use crate::store::Store;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

pub struct KvStore {
    store: Store,
}

impl KvStore {
    /// Open the KV table on an existing store, creating it on first use.
    pub async fn with_store(store: Store) -> Result<Self> {
        store
            .with_conn(|conn| {
                conn.execute_batch(
                    "CREATE TABLE IF NOT EXISTS kv_store (
                        key TEXT PRIMARY KEY,
                        value TEXT NOT NULL,
                        updated_at INTEGER NOT NULL
                    )",
                )?;
                Ok(())
            })
            .await?;
        Ok(KvStore { store })
    }

    pub async fn put(&self, key: &str, value: &Value) -> Result<()> {
        let serialized = serde_json::to_string(value)?;
        self.store
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO kv_store (key, value, updated_at)
                     VALUES (?1, ?2, ?3)",
                    params![key, serialized, crate::inode::unix_now()],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        let raw = self
            .store
            .with_conn(move |conn| {
                let raw = conn
                    .query_row(
                        "SELECT value FROM kv_store WHERE key = ?1",
                        params![key],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(raw)
            })
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.store
            .with_conn(move |conn| {
                let affected =
                    conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
                if affected == 0 {
                    return Err(FsError::NotFound(key.to_string()));
                }
                Ok(())
            })
            .await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.store
            .with_conn(move |conn| {
                let mut stmt = conn.prepare("SELECT 1 FROM kv_store WHERE key = ?1")?;
                Ok(stmt.exists(params![key])?)
            })
            .await
    }

    /// Keys beginning with `prefix`, in key order.
    pub async fn scan(&self, prefix: &str) -> Result<Vec<String>> {
        self.store
            .with_conn(move |conn| {
                let mut stmt = conn
                    .prepare("SELECT key FROM kv_store WHERE key LIKE ?1 || '%' ORDER BY key")?;
                let keys = stmt
                    .query_map(params![prefix], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?;
                Ok(keys)
            })
            .await
    }
}
