//! Error types for AgentFS

use thiserror::Error;

/// Result type for AgentFS operations
pub type Result<T> = std::result::Result<T, FsError>;

/// Filesystem error kinds
///
/// Each variant corresponds to a POSIX errno where a POSIX consumer
/// exists; [`FsError::errno`] performs that mapping on unix targets.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("file exists: {0}")]
    Exists(String),

    #[error("not a directory: {0}")]
    NotDirectory(String),

    #[error("is a directory: {0}")]
    IsDirectory(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("bad file descriptor: {0}")]
    BadDescriptor(i32),

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("operation not permitted: {0}")]
    Permission(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FsError {
    /// Map to the platform errno value.
    ///
    /// Storage failures have no errno of their own and surface as `EIO`.
    #[cfg(unix)]
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::Exists(_) => libc::EEXIST,
            FsError::NotDirectory(_) => libc::ENOTDIR,
            FsError::IsDirectory(_) => libc::EISDIR,
            FsError::NotEmpty(_) => libc::ENOTEMPTY,
            FsError::InvalidArgument(_) => libc::EINVAL,
            FsError::BadDescriptor(_) => libc::EBADF,
            FsError::Unsupported(_) => libc::ENOSYS,
            FsError::Permission(_) => libc::EPERM,
            FsError::Storage(_) => libc::EIO,
            FsError::Serialization(_) => libc::EINVAL,
        }
    }

    /// True for the `NotFound` kind; used by callers that treat a missing
    /// path as an answer rather than a failure (`exists`, `mkdir_all`).
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn errno_mapping() {
        assert_eq!(FsError::NotFound("/a".into()).errno(), libc::ENOENT);
        assert_eq!(FsError::Exists("/a".into()).errno(), libc::EEXIST);
        assert_eq!(FsError::BadDescriptor(7).errno(), libc::EBADF);
        assert_eq!(FsError::Permission("link".into()).errno(), libc::EPERM);
    }

    #[test]
    fn not_found_predicate() {
        assert!(FsError::NotFound("/a".into()).is_not_found());
        assert!(!FsError::Exists("/a".into()).is_not_found());
    }
}
