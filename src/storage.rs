//! Storage layer implementation for vibestore.
//!
//! Three pieces make up the storage substrate:
//!
//! - **RefCountedCache**: bounded, reference-counted cache with pluggable
//!   fetch and write-back through a [`CacheLoader`]
//! - **WriteAheadLog**: append-only, checksummed record log with crash-tail recovery
//! - **PageCache**: fixed-size (8KB) pages over one file, cached in a `RefCountedCache`
//!
//! The log and the page cache are independent; the transaction layer above
//! decides when to append to one and dirty the other.

pub mod cache;
pub mod config;
pub mod error;
pub mod page;
pub mod page_cache;
pub mod wal;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub use cache::{CacheLoader, RefCountedCache};
pub use config::StorageConfig;
pub use error::{StorageError, StorageResult};
pub use page::{Page, PageId, PageRef, PAGE_SIZE};
pub use page_cache::{PageCache, DB_SUFFIX};
pub use wal::{WriteAheadLog, LOG_SUFFIX};

/// Appends `suffix` to the final component of `path` (`data/db` -> `data/db.log`).
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
