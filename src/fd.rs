//! Open-file table
//!
//! In-memory map from descriptor numbers to open files. Descriptors are
//! process-local; the table also counts live descriptors per inode
//! (`open_refs`), the gate that keeps unlinked-but-open inodes alive.

use crate::error::{FsError, Result};
use bitflags::bitflags;
use std::collections::HashMap;

bitflags! {
    /// Open flags with POSIX bit values. Read-only is the absence of
    /// both write bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const WRONLY = 0o1;
        const RDWR = 0o2;
        const CREAT = 0o100;
        const EXCL = 0o200;
        const TRUNC = 0o1000;
        const APPEND = 0o2000;
    }
}

impl OpenFlags {
    pub const RDONLY: OpenFlags = OpenFlags::empty();

    pub fn readable(self) -> bool {
        self.contains(OpenFlags::RDWR) || !self.contains(OpenFlags::WRONLY)
    }

    pub fn writable(self) -> bool {
        self.intersects(OpenFlags::WRONLY | OpenFlags::RDWR)
    }

    pub fn append(self) -> bool {
        self.contains(OpenFlags::APPEND)
    }

    /// The two access-mode bits are exclusive.
    pub fn validate(self) -> Result<()> {
        if self.contains(OpenFlags::WRONLY | OpenFlags::RDWR) {
            return Err(FsError::InvalidArgument(
                "O_WRONLY and O_RDWR are exclusive".into(),
            ));
        }
        Ok(())
    }
}

/// One open descriptor. Lives only in memory; pins the inode against
/// deletion but not against unlinking.
#[derive(Debug, Clone, Copy)]
pub struct OpenFile {
    pub fd: i32,
    pub ino: u64,
    pub flags: OpenFlags,
    pub cursor: u64,
}

/// Lowest descriptor handed out; 0-2 stay free for the conventional
/// stdio numbers of whatever shell shim sits in front of us.
const FIRST_FD: i32 = 3;

#[derive(Debug, Default)]
pub struct FdTable {
    entries: HashMap<i32, OpenFile>,
    open_refs: HashMap<u64, u32>,
}

impl FdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open file under the lowest unused descriptor.
    pub fn insert(&mut self, ino: u64, flags: OpenFlags, cursor: u64) -> i32 {
        let mut fd = FIRST_FD;
        while self.entries.contains_key(&fd) {
            fd += 1;
        }
        self.entries.insert(
            fd,
            OpenFile {
                fd,
                ino,
                flags,
                cursor,
            },
        );
        *self.open_refs.entry(ino).or_insert(0) += 1;
        fd
    }

    pub fn get(&self, fd: i32) -> Result<&OpenFile> {
        self.entries.get(&fd).ok_or(FsError::BadDescriptor(fd))
    }

    pub fn get_mut(&mut self, fd: i32) -> Result<&mut OpenFile> {
        self.entries.get_mut(&fd).ok_or(FsError::BadDescriptor(fd))
    }

    /// Drop a descriptor. Returns the entry and the number of live
    /// descriptors still referencing its inode.
    pub fn remove(&mut self, fd: i32) -> Result<(OpenFile, u32)> {
        let entry = self.entries.remove(&fd).ok_or(FsError::BadDescriptor(fd))?;
        let remaining = match self.open_refs.get_mut(&entry.ino) {
            Some(count) => {
                *count = count.saturating_sub(1);
                let remaining = *count;
                if remaining == 0 {
                    self.open_refs.remove(&entry.ino);
                }
                remaining
            }
            None => 0,
        };
        Ok((entry, remaining))
    }

    /// Live descriptor count for an inode.
    pub fn open_refs(&self, ino: u64) -> u32 {
        self.open_refs.get(&ino).copied().unwrap_or(0)
    }
}
