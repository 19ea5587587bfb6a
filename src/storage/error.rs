//! Storage layer error types.

use std::fmt::Display;
use std::path::PathBuf;

use thiserror::Error;

use crate::storage::page::PageId;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Cache is full: cannot admit a new resource")]
    CacheFull,

    #[error("Page not found: {0}")]
    PageNotFound(PageId),

    #[error("Page still resident: {0} was truncated away but is still held")]
    PageStillResident(PageId),

    #[error("File already exists: {0:?}")]
    FileExists(PathBuf),

    #[error("File does not exist: {0:?}")]
    FileNotFound(PathBuf),

    #[error("File is not readable and writable: {0:?}")]
    FileNotReadWrite(PathBuf),

    #[error("Bad log file: {reason}")]
    BadLogFile { reason: String },

    #[error("Memory budget of {budget} bytes cannot hold a single page")]
    InvalidMemoryBudget { budget: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Abort path for failures that leave a file in an indeterminate state.
///
/// Mid-operation I/O errors are not handed back to callers: the storage layer
/// cannot tell what reached the disk, so the process stops here.
#[track_caller]
pub(crate) fn fatal(context: &str, err: impl Display) -> ! {
    log::error!("fatal storage error: {}: {}", context, err);
    panic!("fatal storage error: {}: {}", context, err);
}

/// Unwraps an I/O result or aborts through [`fatal`].
pub(crate) trait OrFatal<T> {
    fn or_fatal(self, context: &str) -> T;
}

impl<T, E: Display> OrFatal<T> for Result<T, E> {
    #[track_caller]
    fn or_fatal(self, context: &str) -> T {
        match self {
            Ok(value) => value,
            Err(e) => fatal(context, e),
        }
    }
}
