//! Errors raised by individual directory and file tasks.
//!
//! None of these abort a run. Each is logged by the task that produced it,
//! counted in the run summary, and the task retires.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("failed to list source directory {}: {source}", .path.display())]
    ListSource { path: PathBuf, source: io::Error },

    #[error("failed to create destination directory {}: {source}", .path.display())]
    CreateDirectory { path: PathBuf, source: io::Error },

    #[error("destination {} is a {found}, expected a {expected}", .path.display())]
    TypeConflict {
        path: PathBuf,
        expected: EntryKind,
        found: EntryKind,
    },

    #[error("failed to read metadata of {}: {source}", .path.display())]
    Metadata { path: PathBuf, source: io::Error },

    #[error("failed to open source file {}: {source}", .path.display())]
    OpenSource { path: PathBuf, source: io::Error },

    #[error("failed to create destination file {}: {source}", .path.display())]
    CreateDestination { path: PathBuf, source: io::Error },

    #[error("failed to copy {} to {}: {source}", .from.display(), .to.display())]
    Stream {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    #[error("failed to set modification time on {}: {source}", .path.display())]
    SetModifiedTime { path: PathBuf, source: io::Error },

    #[error("source root {} maps to {}, already claimed by {}", .root.display(), .path.display(), .claimed_by.display())]
    DestinationClaimed {
        root: PathBuf,
        path: PathBuf,
        claimed_by: PathBuf,
    },

    #[error("admission gate closed")]
    GateClosed,

    #[error("task panicked: {message}")]
    TaskPanicked { message: String },
}

/// Coarse grouping used in log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    PathResolution,
    Metadata,
    Io,
}

impl CopyError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ListSource { .. }
            | Self::CreateDirectory { .. }
            | Self::TypeConflict { .. }
            | Self::DestinationClaimed { .. } => ErrorCategory::PathResolution,
            Self::Metadata { .. } => ErrorCategory::Metadata,
            Self::OpenSource { .. }
            | Self::CreateDestination { .. }
            | Self::Stream { .. }
            | Self::SetModifiedTime { .. }
            | Self::GateClosed
            | Self::TaskPanicked { .. } => ErrorCategory::Io,
        }
    }

    /// Underlying OS error code, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::ListSource { source, .. }
            | Self::CreateDirectory { source, .. }
            | Self::Metadata { source, .. }
            | Self::OpenSource { source, .. }
            | Self::CreateDestination { source, .. }
            | Self::Stream { source, .. }
            | Self::SetModifiedTime { source, .. } => source.raw_os_error(),
            Self::TypeConflict { .. }
            | Self::DestinationClaimed { .. }
            | Self::GateClosed
            | Self::TaskPanicked { .. } => None,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PathResolution => write!(f, "path"),
            Self::Metadata => write!(f, "metadata"),
            Self::Io => write!(f, "io"),
        }
    }
}

/// What a filesystem entry turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
    Other,
}

impl EntryKind {
    pub fn from_file_type(file_type: std::fs::FileType) -> Self {
        if file_type.is_dir() {
            Self::Directory
        } else if file_type.is_file() {
            Self::File
        } else if file_type.is_symlink() {
            Self::Symlink
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory => write!(f, "directory"),
            Self::File => write!(f, "file"),
            Self::Symlink => write!(f, "symlink"),
            Self::Other => write!(f, "special file"),
        }
    }
}
