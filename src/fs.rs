//! Public filesystem interface
//!
//! [`AgentFs`] exposes two tiers over one backing database: high-level
//! path operations (`write_file`, `read_file`, `mkdir`, `rename`, ...)
//! and a lower POSIX-like descriptor surface (`open`, `read`, `write`,
//! `pread`, `pwrite`, `ftruncate`, `fstat`, `close`).
//!
//! Every call runs inside exactly one backing-store transaction (reads
//! use a snapshot), so callers never observe partial state. Descriptor
//! state is mutated only while the connection lock is held, which
//! serialises operations on one descriptor.

use crate::block;
use crate::dir::{self, DirEntry};
use crate::error::{FsError, Result};
use crate::fd::{FdTable, OpenFlags};
use crate::inode::{self, InodeKind};
use crate::path;
use crate::schema::{self, mode, Superblock};
use crate::store::Store;
use log::warn;
use parking_lot::Mutex;
use std::path::Path;

/// File metadata as returned by `stat`/`fstat`.
///
/// Inode numbers are stable within an instance; hard links share them.
#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub ino: u64,
    pub kind: InodeKind,
    pub mode: u32,
    pub nlink: u32,
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub uid: u32,
    pub gid: u32,
}

impl FileStat {
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

impl From<inode::Inode> for FileStat {
    fn from(i: inode::Inode) -> Self {
        FileStat {
            ino: i.ino,
            kind: i.kind,
            mode: i.mode,
            nlink: i.nlink,
            size: i.size,
            atime: i.atime,
            mtime: i.mtime,
            ctime: i.ctime,
            uid: i.uid,
            gid: i.gid,
        }
    }
}

/// Instance configuration.
#[derive(Debug, Clone)]
pub struct FsOptions {
    /// Block size for a newly created instance. Ignored as `None` on
    /// reopen; a conflicting `Some` fails with `InvalidArgument`.
    pub block_size: Option<u32>,
    /// Directory against which relative paths resolve.
    pub cwd: String,
}

impl Default for FsOptions {
    fn default() -> Self {
        FsOptions {
            block_size: None,
            cwd: "/".to_string(),
        }
    }
}

/// A filesystem instance on one backing database.
pub struct AgentFs {
    store: Store,
    sb: Superblock,
    fds: Mutex<FdTable>,
    cwd: String,
}

impl AgentFs {
    /// Open (or create) a filesystem on a database file.
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let store = Store::open(db_path).await?;
        Self::with_store(store, FsOptions::default()).await
    }

    pub async fn new_with<P: AsRef<Path>>(db_path: P, options: FsOptions) -> Result<Self> {
        let store = Store::open(db_path).await?;
        Self::with_store(store, options).await
    }

    /// Open a private in-memory filesystem, mainly for tests.
    pub async fn new_in_memory() -> Result<Self> {
        let store = Store::open_in_memory().await?;
        Self::with_store(store, FsOptions::default()).await
    }

    /// Open a filesystem on an already-opened store, running migrations
    /// once.
    pub async fn with_store(store: Store, options: FsOptions) -> Result<Self> {
        let sb = store
            .with_tx(|tx| schema::migrate(tx, options.block_size))
            .await?;
        Ok(AgentFs {
            store,
            sb,
            fds: Mutex::new(FdTable::new()),
            cwd: options.cwd,
        })
    }

    /// Block size fixed at instance creation.
    pub fn block_size(&self) -> u32 {
        self.sb.block_size
    }

    // --- High-level surface ---------------------------------------------

    pub async fn stat(&self, path: &str) -> Result<FileStat> {
        let cwd = self.cwd.clone();
        self.store
            .with_conn(move |conn| Ok(path::resolve(conn, &cwd, path)?.into()))
            .await
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// List a directory; `.` and `..` are synthesised.
    pub async fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let cwd = self.cwd.clone();
        self.store
            .with_conn(move |conn| {
                let dir_inode = path::resolve(conn, &cwd, path)?;
                if !dir_inode.kind.is_dir() {
                    return Err(FsError::NotDirectory(path.to_string()));
                }
                dir::read_dir(conn, &dir_inode)
            })
            .await
    }

    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let cwd = self.cwd.clone();
        let bs = self.sb.block_size;
        self.store
            .with_conn(move |conn| {
                let file = path::resolve(conn, &cwd, path)?;
                if file.kind.is_dir() {
                    return Err(FsError::IsDirectory(path.to_string()));
                }
                block::read_at(conn, bs, file.ino, file.size, 0, file.size as usize)
            })
            .await
    }

    /// `read_file` with utf-8 decoding, for text content.
    pub async fn read_to_string(&self, path: &str) -> Result<String> {
        let bytes = self.read_file(path).await?;
        String::from_utf8(bytes)
            .map_err(|_| FsError::InvalidArgument(format!("{:?} is not valid utf-8", path)))
    }

    /// Create or replace a regular file with the given content
    /// (truncate-then-write).
    pub async fn write_file(&self, path: &str, data: impl AsRef<[u8]>) -> Result<()> {
        let cwd = self.cwd.clone();
        let bs = self.sb.block_size;
        let data = data.as_ref();
        self.store
            .with_tx(move |tx| {
                let resolved = path::resolve_parent(tx, &cwd, path)?;
                if resolved.must_be_dir {
                    return Err(FsError::IsDirectory(path.to_string()));
                }
                let mut file = match dir::lookup(tx, resolved.parent, &resolved.name)? {
                    Some(ino) => {
                        let existing = inode::load(tx, ino)?;
                        if existing.kind.is_dir() {
                            return Err(FsError::IsDirectory(path.to_string()));
                        }
                        existing
                    }
                    None => {
                        let created =
                            inode::allocate(tx, InodeKind::Regular, mode::DEFAULT_FILE_MODE)?;
                        dir::link_entry(tx, resolved.parent, &resolved.name, &created)?;
                        inode::load(tx, created.ino)?
                    }
                };
                block::truncate(tx, bs, &mut file, 0)?;
                block::write_at(tx, bs, &mut file, 0, data)
            })
            .await
    }

    /// Create a directory; the parent must already exist.
    pub async fn mkdir(&self, path: &str) -> Result<()> {
        let cwd = self.cwd.clone();
        self.store
            .with_tx(move |tx| {
                let resolved = path::resolve_parent(tx, &cwd, path)?;
                if dir::lookup(tx, resolved.parent, &resolved.name)?.is_some() {
                    return Err(FsError::Exists(path.to_string()));
                }
                let created = inode::allocate(tx, InodeKind::Directory, mode::DEFAULT_DIR_MODE)?;
                dir::link_entry(tx, resolved.parent, &resolved.name, &created)
            })
            .await
    }

    /// Create a directory and any missing ancestors; existing
    /// directories are not an error.
    pub async fn mkdir_all(&self, path: &str) -> Result<()> {
        let cwd = self.cwd.clone();
        self.store
            .with_tx(move |tx| {
                let components = path::components(&cwd, path)?;
                let mut current = inode::load(tx, schema::ROOT_INO)?;
                for name in &components {
                    match dir::lookup(tx, current.ino, name)? {
                        Some(ino) => {
                            current = inode::load(tx, ino)?;
                            if !current.kind.is_dir() {
                                return Err(FsError::NotDirectory(path.to_string()));
                            }
                        }
                        None => {
                            let created =
                                inode::allocate(tx, InodeKind::Directory, mode::DEFAULT_DIR_MODE)?;
                            dir::link_entry(tx, current.ino, name, &created)?;
                            current = inode::load(tx, created.ino)?;
                        }
                    }
                }
                Ok(())
            })
            .await
    }

    /// Remove an empty directory.
    pub async fn rmdir(&self, path: &str) -> Result<()> {
        let cwd = self.cwd.clone();
        self.store
            .with_tx(move |tx| {
                let resolved = path::resolve_parent(tx, &cwd, path)?;
                let child = dir::lookup(tx, resolved.parent, &resolved.name)?
                    .ok_or_else(|| FsError::NotFound(path.to_string()))?;
                let refs = self.fds.lock().open_refs(child);
                dir::unlink_entry(tx, resolved.parent, &resolved.name, true, refs)?;
                Ok(())
            })
            .await
    }

    /// Remove a file name. The inode survives while open descriptors
    /// reference it.
    pub async fn unlink(&self, path: &str) -> Result<()> {
        let cwd = self.cwd.clone();
        self.store
            .with_tx(move |tx| {
                let resolved = path::resolve_parent(tx, &cwd, path)?;
                let child = dir::lookup(tx, resolved.parent, &resolved.name)?
                    .ok_or_else(|| FsError::NotFound(path.to_string()))?;
                let refs = self.fds.lock().open_refs(child);
                dir::unlink_entry(tx, resolved.parent, &resolved.name, false, refs)?;
                Ok(())
            })
            .await
    }

    /// Move `from` to `to`, atomically replacing a compatible
    /// destination.
    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let cwd = self.cwd.clone();
        self.store
            .with_tx(move |tx| {
                let src = path::resolve_parent(tx, &cwd, from)?;
                let dst = path::resolve_parent(tx, &cwd, to)?;
                if src.must_be_dir || dst.must_be_dir {
                    // A trailing slash on either name requires the moved
                    // entry to be a directory.
                    let src_ino = dir::lookup(tx, src.parent, &src.name)?
                        .ok_or_else(|| FsError::NotFound(from.to_string()))?;
                    if !inode::load(tx, src_ino)?.kind.is_dir() {
                        let offender = if src.must_be_dir { from } else { to };
                        return Err(FsError::NotDirectory(offender.to_string()));
                    }
                }
                dir::rename(tx, src.parent, &src.name, dst.parent, &dst.name, &|ino| {
                    self.fds.lock().open_refs(ino)
                })
            })
            .await
    }

    /// Create a hard link: a second name for the same inode.
    pub async fn link(&self, old_path: &str, new_path: &str) -> Result<()> {
        let cwd = self.cwd.clone();
        self.store
            .with_tx(move |tx| {
                let target = path::resolve(tx, &cwd, old_path)?;
                if target.kind.is_dir() {
                    return Err(FsError::Permission(format!(
                        "hard link to directory {:?}",
                        old_path
                    )));
                }
                let resolved = path::resolve_parent(tx, &cwd, new_path)?;
                if resolved.must_be_dir {
                    return Err(FsError::NotDirectory(new_path.to_string()));
                }
                dir::link_entry(tx, resolved.parent, &resolved.name, &target)
            })
            .await
    }

    // --- POSIX-like surface ---------------------------------------------

    /// Open a descriptor. The returned fd is process-local; the lowest
    /// unused number is allocated.
    pub async fn open(&self, path: &str, flags: OpenFlags) -> Result<i32> {
        flags.validate()?;
        let cwd = self.cwd.clone();
        let bs = self.sb.block_size;
        let ino = self
            .store
            .with_tx(move |tx| {
                let resolved = path::resolve_parent(tx, &cwd, path)?;
                match dir::lookup(tx, resolved.parent, &resolved.name)? {
                    Some(ino) => {
                        if flags.contains(OpenFlags::CREAT | OpenFlags::EXCL) {
                            return Err(FsError::Exists(path.to_string()));
                        }
                        let mut existing = inode::load(tx, ino)?;
                        if existing.kind.is_dir() && flags.writable() {
                            return Err(FsError::IsDirectory(path.to_string()));
                        }
                        if flags.contains(OpenFlags::TRUNC) && flags.writable() {
                            block::truncate(tx, bs, &mut existing, 0)?;
                        }
                        Ok(ino)
                    }
                    None => {
                        if !flags.contains(OpenFlags::CREAT) {
                            return Err(FsError::NotFound(path.to_string()));
                        }
                        if resolved.must_be_dir {
                            return Err(FsError::IsDirectory(path.to_string()));
                        }
                        let created =
                            inode::allocate(tx, InodeKind::Regular, mode::DEFAULT_FILE_MODE)?;
                        dir::link_entry(tx, resolved.parent, &resolved.name, &created)?;
                        Ok(created.ino)
                    }
                }
            })
            .await?;
        // No suspension point between commit and registration, so the
        // descriptor cannot observe a rolled-back inode.
        Ok(self.fds.lock().insert(ino, flags, 0))
    }

    /// Close a descriptor. If the inode lost its last name and this was
    /// the last descriptor, the inode and its blocks are reclaimed; a
    /// failure to reclaim is logged and does not fail the close.
    pub async fn close(&self, fd: i32) -> Result<()> {
        let (entry, remaining) = self.fds.lock().remove(fd)?;
        if remaining == 0 {
            let reclaim = self
                .store
                .with_tx(move |tx| inode::maybe_delete(tx, entry.ino, 0))
                .await;
            if let Err(e) = reclaim {
                warn!("close({}): failed to reclaim inode {}: {}", fd, entry.ino, e);
            }
        }
        Ok(())
    }

    /// Read at the descriptor's cursor, advancing it.
    pub async fn read(&self, fd: i32, buf: &mut [u8]) -> Result<usize> {
        let bs = self.sb.block_size;
        self.store
            .with_conn(move |conn| {
                let mut fds = self.fds.lock();
                let entry = *fds.get(fd)?;
                if !entry.flags.readable() {
                    return Err(FsError::BadDescriptor(fd));
                }
                let file = inode::load(conn, entry.ino)?;
                if file.kind.is_dir() {
                    return Err(FsError::IsDirectory(format!("fd {}", fd)));
                }
                let data = block::read_at(conn, bs, file.ino, file.size, entry.cursor, buf.len())?;
                buf[..data.len()].copy_from_slice(&data);
                fds.get_mut(fd)?.cursor = entry.cursor + data.len() as u64;
                Ok(data.len())
            })
            .await
    }

    /// Write at the descriptor's cursor (or at end-of-file under
    /// `O_APPEND`), advancing the cursor past the written bytes.
    pub async fn write(&self, fd: i32, buf: &[u8]) -> Result<usize> {
        let bs = self.sb.block_size;
        self.store
            .with_tx(move |tx| {
                let mut fds = self.fds.lock();
                let entry = *fds.get(fd)?;
                if !entry.flags.writable() {
                    return Err(FsError::BadDescriptor(fd));
                }
                let mut file = inode::load(tx, entry.ino)?;
                let offset = if entry.flags.append() {
                    file.size
                } else {
                    entry.cursor
                };
                block::write_at(tx, bs, &mut file, offset, buf)?;
                fds.get_mut(fd)?.cursor = offset + buf.len() as u64;
                Ok(buf.len())
            })
            .await
    }

    /// Positional read; the cursor does not move.
    pub async fn pread(&self, fd: i32, buf: &mut [u8], offset: u64) -> Result<usize> {
        let bs = self.sb.block_size;
        self.store
            .with_conn(move |conn| {
                let entry = *self.fds.lock().get(fd)?;
                if !entry.flags.readable() {
                    return Err(FsError::BadDescriptor(fd));
                }
                let file = inode::load(conn, entry.ino)?;
                if file.kind.is_dir() {
                    return Err(FsError::IsDirectory(format!("fd {}", fd)));
                }
                let data = block::read_at(conn, bs, file.ino, file.size, offset, buf.len())?;
                buf[..data.len()].copy_from_slice(&data);
                Ok(data.len())
            })
            .await
    }

    /// Positional write; the cursor does not move.
    pub async fn pwrite(&self, fd: i32, buf: &[u8], offset: u64) -> Result<usize> {
        let bs = self.sb.block_size;
        self.store
            .with_tx(move |tx| {
                let entry = *self.fds.lock().get(fd)?;
                if !entry.flags.writable() {
                    return Err(FsError::BadDescriptor(fd));
                }
                let mut file = inode::load(tx, entry.ino)?;
                block::write_at(tx, bs, &mut file, offset, buf)?;
                Ok(buf.len())
            })
            .await
    }

    pub async fn ftruncate(&self, fd: i32, size: u64) -> Result<()> {
        let bs = self.sb.block_size;
        self.store
            .with_tx(move |tx| {
                let entry = *self.fds.lock().get(fd)?;
                if !entry.flags.writable() {
                    return Err(FsError::BadDescriptor(fd));
                }
                let mut file = inode::load(tx, entry.ino)?;
                block::truncate(tx, bs, &mut file, size)
            })
            .await
    }

    pub async fn fstat(&self, fd: i32) -> Result<FileStat> {
        self.store
            .with_conn(move |conn| {
                let entry = *self.fds.lock().get(fd)?;
                Ok(inode::load(conn, entry.ino)?.into())
            })
            .await
    }
}
