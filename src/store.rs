//! Backing store adapter
//!
//! Wraps a SQLite connection behind an async mutex. All rusqlite work is
//! synchronous and runs while the lock is held, which also serialises the
//! filesystem operations of one instance. Mutations go through
//! [`Store::with_tx`] so that every public filesystem call executes inside
//! exactly one transaction.

use crate::error::Result;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::{path::Path, sync::Arc};
use tokio::sync::Mutex;

/// Handle on the embedded database shared by all layers of one instance.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) a database file.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::init_connection(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a private in-memory database.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Run `f` inside an immediate transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err`;
    /// callers never observe partial state.
    pub async fn with_tx<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Run `f` against the connection outside a transaction.
    ///
    /// Used for read-only calls; a single statement observes a consistent
    /// snapshot.
    pub async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().await;
        f(&conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tx_rolls_back_on_error() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .with_tx(|tx| {
                tx.execute("CREATE TABLE t (x INTEGER)", [])?;
                Ok(())
            })
            .await
            .unwrap();

        let res: Result<()> = store
            .with_tx(|tx| {
                tx.execute("INSERT INTO t (x) VALUES (1)", [])?;
                Err(crate::FsError::InvalidArgument("boom".into()))
            })
            .await;
        assert!(res.is_err());

        let count: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
