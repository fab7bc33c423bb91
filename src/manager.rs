//! Instance/handle manager
//!
//! Filesystem instances are shared process-wide by id (the database
//! path): every `open` with the same id returns the same instance and
//! therefore the same open-file table. Closing drops the shared handle;
//! the backing store needs no flush.

use crate::error::Result;
use crate::fs::{AgentFs, FsOptions};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

static INSTANCES: Lazy<Mutex<HashMap<String, Arc<AgentFs>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Open the shared instance named by `id`, creating it on first use.
pub async fn open(id: &str) -> Result<Arc<AgentFs>> {
    open_with(id, FsOptions::default()).await
}

pub async fn open_with(id: &str, options: FsOptions) -> Result<Arc<AgentFs>> {
    if let Some(existing) = INSTANCES.lock().get(id) {
        return Ok(existing.clone());
    }
    let fs = Arc::new(AgentFs::new_with(id, options).await?);
    // Two opens may race past the fast path; the first insert wins and
    // the loser's connection is dropped.
    let mut instances = INSTANCES.lock();
    Ok(instances.entry(id.to_string()).or_insert(fs).clone())
}

/// Drop the shared handle (and with it the open-file table). Returns
/// whether an instance was registered under `id`. Existing `Arc`s keep
/// working until they are dropped.
pub fn close(id: &str) -> bool {
    INSTANCES.lock().remove(id).is_some()
}
