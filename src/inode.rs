//! Inode layer
//!
//! Allocates inode numbers from the superblock, stores metadata, and
//! enforces the lifecycle rule: an inode and all its blocks are removed
//! atomically once `nlink = 0` and no open descriptor references it.

use crate::error::{FsError, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::time::{SystemTime, UNIX_EPOCH};

/// What an inode is; symlinks and device files are not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    Regular = 0,
    Directory = 1,
}

impl InodeKind {
    pub fn is_dir(self) -> bool {
        self == InodeKind::Directory
    }

    fn from_i64(v: i64) -> Result<Self> {
        match v {
            0 => Ok(InodeKind::Regular),
            1 => Ok(InodeKind::Directory),
            other => Err(FsError::InvalidArgument(format!(
                "unknown inode kind {} in store",
                other
            ))),
        }
    }
}

/// One row of the `inodes` table.
#[derive(Debug, Clone, Copy)]
pub struct Inode {
    pub ino: u64,
    pub kind: InodeKind,
    pub mode: u32,
    pub nlink: u32,
    pub size: u64,
    /// Seconds since the epoch.
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub uid: u32,
    pub gid: u32,
}

/// Which timestamps a mutation touches.
#[derive(Debug, Clone, Copy)]
pub enum Touch {
    /// Metadata change: ctime.
    Meta,
    /// Content change: mtime and ctime.
    Content,
    /// Read access: atime, best-effort.
    Access,
}

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Allocate the next inode number and insert a fresh inode row.
///
/// Directories start at `nlink = 1` for their implicit self entry; the
/// dirent that names them brings the count to 2. Regular files start at 0
/// and pick up their first link from the caller.
pub fn allocate(tx: &Transaction<'_>, kind: InodeKind, mode: u32) -> Result<Inode> {
    let ino: i64 = tx.query_row("SELECT next_inode FROM superblock WHERE id = 1", [], |row| {
        row.get(0)
    })?;
    tx.execute(
        "UPDATE superblock SET next_inode = next_inode + 1 WHERE id = 1",
        [],
    )?;

    let now = unix_now();
    let nlink: u32 = if kind.is_dir() { 1 } else { 0 };
    tx.execute(
        "INSERT INTO inodes (ino, kind, mode, nlink, size, atime, mtime, ctime, uid, gid)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5, ?5, 0, 0)",
        params![ino, kind as i64, mode, nlink, now],
    )?;

    Ok(Inode {
        ino: ino as u64,
        kind,
        mode,
        nlink,
        size: 0,
        atime: now,
        mtime: now,
        ctime: now,
        uid: 0,
        gid: 0,
    })
}

/// Takes a plain connection so lookups can run outside a write
/// transaction; a `Transaction` derefs to `Connection` and works too.
pub fn try_load(conn: &Connection, ino: u64) -> Result<Option<Inode>> {
    let row = conn
        .query_row(
            "SELECT ino, kind, mode, nlink, size, atime, mtime, ctime, uid, gid
             FROM inodes WHERE ino = ?1",
            params![ino as i64],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, u32>(8)?,
                    row.get::<_, u32>(9)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((ino, kind, mode, nlink, size, atime, mtime, ctime, uid, gid)) => Ok(Some(Inode {
            ino: ino as u64,
            kind: InodeKind::from_i64(kind)?,
            mode,
            nlink,
            size: size as u64,
            atime,
            mtime,
            ctime,
            uid,
            gid,
        })),
        None => Ok(None),
    }
}

pub fn load(conn: &Connection, ino: u64) -> Result<Inode> {
    try_load(conn, ino)?.ok_or_else(|| FsError::NotFound(format!("inode {}", ino)))
}

/// Write back the mutable attributes of an inode row.
pub fn store(tx: &Transaction<'_>, inode: &Inode) -> Result<()> {
    tx.execute(
        "UPDATE inodes
         SET mode = ?2, nlink = ?3, size = ?4, atime = ?5, mtime = ?6, ctime = ?7,
             uid = ?8, gid = ?9
         WHERE ino = ?1",
        params![
            inode.ino as i64,
            inode.mode,
            inode.nlink,
            inode.size as i64,
            inode.atime,
            inode.mtime,
            inode.ctime,
            inode.uid,
            inode.gid
        ],
    )?;
    Ok(())
}

/// Adjust the link count. A link-count change is a metadata change, so
/// ctime moves with it.
pub fn bump_nlink(tx: &Transaction<'_>, ino: u64, delta: i32) -> Result<()> {
    tx.execute(
        "UPDATE inodes SET nlink = nlink + ?2, ctime = ?3 WHERE ino = ?1",
        params![ino as i64, delta, unix_now()],
    )?;
    Ok(())
}

pub fn touch(tx: &Transaction<'_>, ino: u64, which: Touch) -> Result<()> {
    let now = unix_now();
    match which {
        Touch::Meta => tx.execute(
            "UPDATE inodes SET ctime = ?2 WHERE ino = ?1",
            params![ino as i64, now],
        )?,
        Touch::Content => tx.execute(
            "UPDATE inodes SET mtime = ?2, ctime = ?2 WHERE ino = ?1",
            params![ino as i64, now],
        )?,
        Touch::Access => tx.execute(
            "UPDATE inodes SET atime = ?2 WHERE ino = ?1",
            params![ino as i64, now],
        )?,
    };
    Ok(())
}

/// Delete the inode and its blocks if nothing references it any more.
///
/// `open_refs` is the live descriptor count from the open-file table;
/// callers look it up before entering the transaction. Returns whether
/// the inode was removed.
pub fn maybe_delete(tx: &Transaction<'_>, ino: u64, open_refs: u32) -> Result<bool> {
    let Some(inode) = try_load(tx, ino)? else {
        return Ok(false);
    };
    if inode.nlink > 0 || open_refs > 0 {
        return Ok(false);
    }
    tx.execute("DELETE FROM blocks WHERE ino = ?1", params![ino as i64])?;
    tx.execute("DELETE FROM inodes WHERE ino = ?1", params![ino as i64])?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;
    use crate::store::Store;

    async fn fresh() -> Store {
        let store = Store::open_in_memory().await.unwrap();
        store
            .with_tx(|tx| schema::migrate(tx, None))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn allocation_is_monotonic() {
        let store = fresh().await;
        let (a, b) = store
            .with_tx(|tx| {
                let a = allocate(tx, InodeKind::Regular, schema::mode::DEFAULT_FILE_MODE)?;
                let b = allocate(tx, InodeKind::Directory, schema::mode::DEFAULT_DIR_MODE)?;
                Ok((a, b))
            })
            .await
            .unwrap();
        assert!(a.ino > schema::ROOT_INO);
        assert_eq!(b.ino, a.ino + 1);
        assert_eq!(a.nlink, 0);
        assert_eq!(b.nlink, 1);
    }

    #[tokio::test]
    async fn maybe_delete_respects_open_refs() {
        let store = fresh().await;
        let ino = store
            .with_tx(|tx| {
                let inode = allocate(tx, InodeKind::Regular, schema::mode::DEFAULT_FILE_MODE)?;
                Ok(inode.ino)
            })
            .await
            .unwrap();

        // nlink is already 0, but a live descriptor pins the inode.
        let kept = store
            .with_tx(|tx| maybe_delete(tx, ino, 1))
            .await
            .unwrap();
        assert!(!kept);
        assert!(store
            .with_tx(|tx| try_load(tx, ino))
            .await
            .unwrap()
            .is_some());

        let removed = store
            .with_tx(|tx| maybe_delete(tx, ino, 0))
            .await
            .unwrap();
        assert!(removed);
        assert!(store
            .with_tx(|tx| try_load(tx, ino))
            .await
            .unwrap()
            .is_none());
    }
}
