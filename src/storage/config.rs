//! Storage configuration.

use std::path::PathBuf;

use crate::storage::page::PAGE_SIZE;

/// Where the page file and the log live, and how much memory the page cache may use.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding both files.
    pub data_dir: PathBuf,
    /// Base name shared by `<name>.db` and `<name>.log`.
    pub name: String,
    /// Bytes of page cache; divided by `PAGE_SIZE` to get the resident page limit.
    pub memory_budget: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            data_dir: PathBuf::from("./vibestore_data"),
            name: "vibestore".to_string(),
            memory_budget: 64 * PAGE_SIZE as u64,
        }
    }
}

impl StorageConfig {
    /// Base path of the page file, without its `.db` suffix.
    pub fn page_file_base(&self) -> PathBuf {
        self.data_dir.join(&self.name)
    }

    /// Base path of the log file, without its `.log` suffix.
    pub fn log_file_base(&self) -> PathBuf {
        self.data_dir.join(&self.name)
    }

    /// Resident page limit implied by the memory budget.
    pub fn max_pages(&self) -> u64 {
        self.memory_budget / PAGE_SIZE as u64
    }
}
