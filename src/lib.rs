//! # AgentFS - Persistent POSIX-semantic filesystem on SQLite
//!
//! AgentFS is a durable workspace for an AI agent: shell-like tools and
//! compiler-style syscalls operate on a Unix filesystem whose inodes,
//! directory entries and data blocks live in an embedded SQLite
//! database. State persists across sessions; hard links share inode
//! numbers, sparse files read back zeros in their holes, and unlinked
//! files stay readable through open descriptors until the last close.
//!
//! ## Surfaces
//!
//! - **High-level**: `write_file`, `read_file`, `mkdir`/`mkdir_all`,
//!   `read_dir`, `stat`, `exists`, `rename`, `link`, `unlink`, `rmdir`
//! - **POSIX-like**: `open`, `close`, `read`, `write`, `pread`,
//!   `pwrite`, `ftruncate`, `fstat`
//!
//! ## Example
//!
//! ```rust,ignore
//! use agentfs::{AgentFs, OpenFlags};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fs = AgentFs::new("workspace.db").await?;
//!
//!     fs.mkdir_all("/projects/demo").await?;
//!     fs.write_file("/projects/demo/notes.txt", "hello\n").await?;
//!     assert_eq!(fs.read_to_string("/projects/demo/notes.txt").await?, "hello\n");
//!
//!     let fd = fs.open("/projects/demo/log", OpenFlags::CREAT | OpenFlags::WRONLY).await?;
//!     fs.write(fd, b"line 1\n").await?;
//!     fs.close(fd).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod block;
pub mod dir;
pub mod error;
pub mod fd;
pub mod fs;
pub mod inode;
pub mod kv;
pub mod manager;
pub mod path;
pub mod schema;
pub mod store;

pub use dir::DirEntry;
pub use error::{FsError, Result};
pub use fd::OpenFlags;
pub use fs::{AgentFs, FileStat, FsOptions};
pub use inode::InodeKind;
pub use kv::KvStore;
pub use store::Store;
