//! Directory layer
//!
//! Maps `(parent_ino, name)` to a child inode and keeps the link counts
//! coupled to the entries: every name adds one to the child's `nlink`,
//! and a child directory adds one to the parent for its `..`.

use crate::error::{FsError, Result};
use crate::inode::{self, Inode, InodeKind, Touch};
use crate::schema::ROOT_INO;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

/// A directory listing entry. `.` and `..` are synthesised by
/// [`read_dir`], not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub ino: u64,
    pub kind: InodeKind,
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\0') {
        return Err(FsError::InvalidArgument(format!(
            "invalid entry name {:?}",
            name
        )));
    }
    Ok(())
}

/// Find the child named `name` under `parent`.
pub fn lookup(conn: &Connection, parent: u64, name: &str) -> Result<Option<u64>> {
    let child = conn
        .query_row(
            "SELECT child_ino FROM dirents WHERE parent_ino = ?1 AND name = ?2",
            params![parent as i64, name],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(child.map(|c| c as u64))
}

/// The unique parent of a directory inode; `None` only for the root.
pub fn parent_of(conn: &Connection, ino: u64) -> Result<Option<u64>> {
    let parent = conn
        .query_row(
            "SELECT parent_ino FROM dirents WHERE child_ino = ?1 LIMIT 1",
            params![ino as i64],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(parent.map(|p| p as u64))
}

/// True when the directory holds no entries (`.`/`..` are not stored).
pub fn is_empty(conn: &Connection, ino: u64) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM dirents WHERE parent_ino = ?1",
        params![ino as i64],
        |row| row.get(0),
    )?;
    Ok(count == 0)
}

/// Give `child` a name under `parent`.
///
/// Fails with `Exists` when the name is taken. Bumps the child's link
/// count, and the parent's when the child is a directory (its `..`).
pub fn link_entry(tx: &Transaction<'_>, parent: u64, name: &str, child: &Inode) -> Result<()> {
    validate_name(name)?;
    if lookup(tx, parent, name)?.is_some() {
        return Err(FsError::Exists(name.to_string()));
    }
    tx.execute(
        "INSERT INTO dirents (parent_ino, name, child_ino) VALUES (?1, ?2, ?3)",
        params![parent as i64, name, child.ino as i64],
    )?;
    inode::bump_nlink(tx, child.ino, 1)?;
    if child.kind.is_dir() {
        inode::bump_nlink(tx, parent, 1)?;
    }
    inode::touch(tx, parent, Touch::Content)?;
    Ok(())
}

/// Remove the entry `name` from `parent` and drop the child's link.
///
/// `expect_dir` selects rmdir semantics: directories may only be removed
/// that way, and only when empty. Returns the child's inode number.
/// `open_refs` is the live descriptor count for the child.
pub fn unlink_entry(
    tx: &Transaction<'_>,
    parent: u64,
    name: &str,
    expect_dir: bool,
    open_refs: u32,
) -> Result<u64> {
    let child_ino =
        lookup(tx, parent, name)?.ok_or_else(|| FsError::NotFound(name.to_string()))?;
    let child = inode::load(tx, child_ino)?;

    if child.kind.is_dir() {
        if !expect_dir {
            return Err(FsError::IsDirectory(name.to_string()));
        }
        if !is_empty(tx, child_ino)? {
            return Err(FsError::NotEmpty(name.to_string()));
        }
    } else if expect_dir {
        return Err(FsError::NotDirectory(name.to_string()));
    }

    tx.execute(
        "DELETE FROM dirents WHERE parent_ino = ?1 AND name = ?2",
        params![parent as i64, name],
    )?;
    if child.kind.is_dir() {
        // The name and the self reference go together.
        inode::bump_nlink(tx, child_ino, -2)?;
        inode::bump_nlink(tx, parent, -1)?;
    } else {
        inode::bump_nlink(tx, child_ino, -1)?;
    }
    inode::touch(tx, parent, Touch::Content)?;
    inode::maybe_delete(tx, child_ino, open_refs)?;
    Ok(child_ino)
}

/// Move `(old_parent, old_name)` to `(new_parent, new_name)`.
///
/// An existing compatible destination is replaced atomically. Moving a
/// directory into its own descendant fails with `InvalidArgument`; when
/// both names already refer to the same inode the rename is a no-op.
/// `open_refs` reports live descriptors for a replaced destination.
pub fn rename(
    tx: &Transaction<'_>,
    old_parent: u64,
    old_name: &str,
    new_parent: u64,
    new_name: &str,
    open_refs: &dyn Fn(u64) -> u32,
) -> Result<()> {
    validate_name(new_name)?;
    let src_ino =
        lookup(tx, old_parent, old_name)?.ok_or_else(|| FsError::NotFound(old_name.to_string()))?;
    let src = inode::load(tx, src_ino)?;

    let dst_ino = lookup(tx, new_parent, new_name)?;
    if dst_ino == Some(src_ino) {
        return Ok(());
    }

    if src.kind.is_dir() {
        // A directory must not move under itself. Walk the destination's
        // ancestry up to the root.
        let mut cursor = new_parent;
        loop {
            if cursor == src_ino {
                return Err(FsError::InvalidArgument(format!(
                    "cannot move directory {:?} into its own descendant",
                    old_name
                )));
            }
            if cursor == ROOT_INO {
                break;
            }
            cursor = parent_of(tx, cursor)?.unwrap_or(ROOT_INO);
        }
    }

    if let Some(dst) = dst_ino {
        unlink_entry(tx, new_parent, new_name, src.kind.is_dir(), open_refs(dst))?;
    }

    tx.execute(
        "DELETE FROM dirents WHERE parent_ino = ?1 AND name = ?2",
        params![old_parent as i64, old_name],
    )?;
    tx.execute(
        "INSERT INTO dirents (parent_ino, name, child_ino) VALUES (?1, ?2, ?3)",
        params![new_parent as i64, new_name, src_ino as i64],
    )?;

    if src.kind.is_dir() && old_parent != new_parent {
        // The moved directory's `..` now points at the new parent.
        inode::bump_nlink(tx, old_parent, -1)?;
        inode::bump_nlink(tx, new_parent, 1)?;
    }

    inode::touch(tx, old_parent, Touch::Content)?;
    if new_parent != old_parent {
        inode::touch(tx, new_parent, Touch::Content)?;
    }
    inode::touch(tx, src_ino, Touch::Meta)?;
    Ok(())
}

/// List a directory in deterministic (name) order, with `.` and `..`
/// synthesised at the front.
pub fn read_dir(conn: &Connection, parent: &Inode) -> Result<Vec<DirEntry>> {
    let parent_parent = parent_of(conn, parent.ino)?.unwrap_or(ROOT_INO);
    let mut entries = vec![
        DirEntry {
            name: ".".to_string(),
            ino: parent.ino,
            kind: InodeKind::Directory,
        },
        DirEntry {
            name: "..".to_string(),
            ino: parent_parent,
            kind: InodeKind::Directory,
        },
    ];

    let mut stmt = conn.prepare(
        "SELECT d.name, d.child_ino, i.kind
         FROM dirents d JOIN inodes i ON i.ino = d.child_ino
         WHERE d.parent_ino = ?1
         ORDER BY d.name",
    )?;
    let rows = stmt.query_map(params![parent.ino as i64], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;
    for row in rows {
        let (name, ino, kind) = row?;
        entries.push(DirEntry {
            name,
            ino: ino as u64,
            kind: if kind == InodeKind::Directory as i64 {
                InodeKind::Directory
            } else {
                InodeKind::Regular
            },
        });
    }
    Ok(entries)
}
