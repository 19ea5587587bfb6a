//! Write-ahead log.
//!
//! A single append-only file of checksummed records. The transaction layer
//! appends intent records with [`WriteAheadLog::log`] before touching pages and
//! replays them after a restart with [`WriteAheadLog::rewind`] and
//! [`WriteAheadLog::next`]. Opening an existing log strips a record torn by a
//! crash mid-append and rejects a log whose header checksum disagrees with its
//! records.

pub mod checksum;
pub mod logger;

pub use logger::{WriteAheadLog, LOG_HEADER_SIZE, LOG_SUFFIX};
