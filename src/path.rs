//! Path resolver
//!
//! Walks absolute (or cwd-relative) paths component by component through
//! the directory layer. `.` is discarded, `..` pops but never climbs
//! above the root, and a trailing slash requires the final component to
//! resolve to a directory.

use crate::dir;
use crate::error::{FsError, Result};
use crate::inode::{self, Inode};
use crate::schema::ROOT_INO;
use rusqlite::Connection;

/// The parent directory and final name of a path, for operations that
/// create or remove an entry.
#[derive(Debug)]
pub struct ResolvedParent {
    pub parent: u64,
    pub name: String,
    /// The path carried a trailing slash, so the entry must be (or
    /// become) a directory.
    pub must_be_dir: bool,
}

/// Normalise a path into its component stack.
///
/// Relative paths are resolved against `cwd` (itself an absolute path).
/// Returns the components and whether a trailing slash constrains the
/// final component to a directory.
fn normalize(cwd: &str, path: &str) -> Result<(Vec<String>, bool)> {
    if path.is_empty() {
        return Err(FsError::InvalidArgument("empty path".into()));
    }
    if path.contains('\0') {
        return Err(FsError::InvalidArgument("path contains NUL".into()));
    }

    let absolute = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", cwd.trim_end_matches('/'), path)
    };
    let trailing_dir = absolute.len() > 1 && absolute.ends_with('/');

    let mut components: Vec<String> = Vec::new();
    for part in absolute.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            name => components.push(name.to_string()),
        }
    }
    Ok((components, trailing_dir))
}

/// The normalised component stack of a path, for callers that walk and
/// create as they go (`mkdir_all`).
pub(crate) fn components(cwd: &str, path: &str) -> Result<Vec<String>> {
    normalize(cwd, path).map(|(components, _)| components)
}

/// Resolve a path to its inode, failing with `NotFound` on a missing
/// component and `NotDirectory` when a non-final component is not a
/// directory.
pub fn resolve(conn: &Connection, cwd: &str, path: &str) -> Result<Inode> {
    let (components, must_be_dir) = normalize(cwd, path)?;

    let mut current = inode::load(conn, ROOT_INO)?;
    for name in &components {
        if !current.kind.is_dir() {
            return Err(FsError::NotDirectory(path.to_string()));
        }
        let child = dir::lookup(conn, current.ino, name)?
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        current = inode::load(conn, child)?;
    }

    if must_be_dir && !current.kind.is_dir() {
        return Err(FsError::NotDirectory(path.to_string()));
    }
    Ok(current)
}

/// Resolve everything but the final component.
///
/// The parent must exist and be a directory; the final entry itself may
/// or may not exist. Fails with `InvalidArgument` when the path
/// normalises to the root, which has no parent entry.
pub fn resolve_parent(conn: &Connection, cwd: &str, path: &str) -> Result<ResolvedParent> {
    let (mut components, must_be_dir) = normalize(cwd, path)?;
    let name = components
        .pop()
        .ok_or_else(|| FsError::InvalidArgument(format!("no final component in {:?}", path)))?;

    let mut current = inode::load(conn, ROOT_INO)?;
    for part in &components {
        if !current.kind.is_dir() {
            return Err(FsError::NotDirectory(path.to_string()));
        }
        let child = dir::lookup(conn, current.ino, part)?
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        current = inode::load(conn, child)?;
    }
    if !current.kind.is_dir() {
        return Err(FsError::NotDirectory(path.to_string()));
    }

    Ok(ResolvedParent {
        parent: current.ino,
        name,
        must_be_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(cwd: &str, path: &str) -> (Vec<String>, bool) {
        normalize(cwd, path).unwrap()
    }

    #[test]
    fn normalization() {
        assert_eq!(parts("/", "/a/b/c"), (svec(&["a", "b", "c"]), false));
        assert_eq!(parts("/", "/a//b/./c/"), (svec(&["a", "b", "c"]), true));
        assert_eq!(parts("/", "/a/b/../c"), (svec(&["a", "c"]), false));
        assert_eq!(parts("/", "/../.."), (svec(&[]), false));
        assert_eq!(parts("/", "/"), (svec(&[]), false));
        assert_eq!(parts("/work", "notes.txt"), (svec(&["work", "notes.txt"]), false));
        assert_eq!(parts("/work/", "../x"), (svec(&["x"]), false));
    }

    #[test]
    fn bad_paths_are_rejected() {
        assert!(matches!(
            normalize("/", ""),
            Err(FsError::InvalidArgument(_))
        ));
        assert!(matches!(
            normalize("/", "/a\0b"),
            Err(FsError::InvalidArgument(_))
        ));
    }

    fn svec(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }
}
