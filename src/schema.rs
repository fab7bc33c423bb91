//! Database schema and migrations
//!
//! All tables use the inode/dentry design for Unix-like filesystem
//! semantics. The superblock is a singleton row whose `version` column
//! gates migrations and whose `block_size` is fixed for the life of the
//! instance.

use crate::error::{FsError, Result};
use log::{debug, info};
use rusqlite::{params, OptionalExtension, Transaction};

/// File type constants for the mode field
pub mod mode {
    pub const S_IFMT: u32 = 0o170000; // File type mask
    pub const S_IFREG: u32 = 0o100000; // Regular file
    pub const S_IFDIR: u32 = 0o040000; // Directory

    // Default permissions
    pub const DEFAULT_FILE_MODE: u32 = S_IFREG | 0o644; // Regular file, rw-r--r--
    pub const DEFAULT_DIR_MODE: u32 = S_IFDIR | 0o755; // Directory, rwxr-xr-x
}

/// Root inode number (always 1)
pub const ROOT_INO: u64 = 1;

/// Current schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Default block size in bytes, used when an instance is first created
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS superblock (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    block_size INTEGER NOT NULL,
    next_inode INTEGER NOT NULL,
    root_inode INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS inodes (
    ino INTEGER PRIMARY KEY,
    kind INTEGER NOT NULL,
    mode INTEGER NOT NULL,
    nlink INTEGER NOT NULL,
    size INTEGER NOT NULL,
    atime INTEGER NOT NULL,
    mtime INTEGER NOT NULL,
    ctime INTEGER NOT NULL,
    uid INTEGER NOT NULL,
    gid INTEGER NOT NULL,
    CHECK (nlink >= 0)
);

CREATE TABLE IF NOT EXISTS dirents (
    parent_ino INTEGER NOT NULL,
    name TEXT NOT NULL,
    child_ino INTEGER NOT NULL,
    PRIMARY KEY (parent_ino, name)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_dirents_child ON dirents(child_ino);

CREATE TABLE IF NOT EXISTS blocks (
    ino INTEGER NOT NULL,
    block_index INTEGER NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (ino, block_index)
) WITHOUT ROWID;
";

/// The superblock record, cached by the instance after `migrate`.
#[derive(Debug, Clone, Copy)]
pub struct Superblock {
    pub version: u32,
    pub block_size: u32,
    pub root_inode: u64,
}

/// Create or open the filesystem schema inside one transaction.
///
/// Idempotent across reopens. `requested_block_size` only takes effect on
/// first creation; a reopen requesting a different size than the superblock
/// records fails with `InvalidArgument`.
pub fn migrate(tx: &Transaction<'_>, requested_block_size: Option<u32>) -> Result<Superblock> {
    tx.execute_batch(SCHEMA)?;

    let existing: Option<(u32, u32, i64)> = tx
        .query_row(
            "SELECT version, block_size, root_inode FROM superblock WHERE id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let sb = match existing {
        Some((version, block_size, root_inode)) => {
            let root_inode = root_inode as u64;
            if let Some(requested) = requested_block_size {
                if requested != block_size {
                    return Err(FsError::InvalidArgument(format!(
                        "block size is fixed at instance creation ({} requested, {} on disk)",
                        requested, block_size
                    )));
                }
            }
            if version < SCHEMA_VERSION {
                // Future migration steps key off superblock.version here.
                tx.execute(
                    "UPDATE superblock SET version = ?1 WHERE id = 1",
                    params![SCHEMA_VERSION],
                )?;
            }
            Superblock {
                version: SCHEMA_VERSION,
                block_size,
                root_inode,
            }
        }
        None => {
            let block_size = requested_block_size.unwrap_or(DEFAULT_BLOCK_SIZE);
            if block_size == 0 {
                return Err(FsError::InvalidArgument("block size must be nonzero".into()));
            }
            tx.execute(
                "INSERT INTO superblock (id, version, block_size, next_inode, root_inode)
                 VALUES (1, ?1, ?2, ?3, ?4)",
                params![SCHEMA_VERSION, block_size, (ROOT_INO + 1) as i64, ROOT_INO as i64],
            )?;
            let now = crate::inode::unix_now();
            tx.execute(
                "INSERT INTO inodes (ino, kind, mode, nlink, size, atime, mtime, ctime, uid, gid)
                 VALUES (?1, ?2, ?3, 2, 0, ?4, ?4, ?4, 0, 0)",
                params![
                    ROOT_INO as i64,
                    crate::inode::InodeKind::Directory as i64,
                    mode::DEFAULT_DIR_MODE,
                    now
                ],
            )?;
            info!("created filesystem instance (block_size={})", block_size);
            Superblock {
                version: SCHEMA_VERSION,
                block_size,
                root_inode: ROOT_INO,
            }
        }
    };

    sweep_orphans(tx)?;
    Ok(sb)
}

/// Reclaim inodes that lost their last name while the process holding
/// their descriptors died. Open-file references live only in memory, so
/// on a fresh open anything with `nlink = 0` is unreachable garbage.
fn sweep_orphans(tx: &Transaction<'_>) -> Result<()> {
    tx.execute(
        "DELETE FROM blocks WHERE ino IN (SELECT ino FROM inodes WHERE nlink = 0)",
        [],
    )?;
    let reclaimed = tx.execute("DELETE FROM inodes WHERE nlink = 0", [])?;
    if reclaimed > 0 {
        debug!("orphan sweep: reclaimed {} inodes", reclaimed);
    }
    Ok(())
}
