//! Append-only, checksummed log file.
//!
//! File layout:
//!
//! ```text
//! [XChecksum:4] ([Size:4][Checksum:4][Data:Size])* [BadTail]
//! ```
//!
//! `XChecksum` is the rolling checksum folded over every framed record in order.
//! A crash in the middle of an append leaves at most one torn record at the end
//! of the file; opening the log strips it. Any other disagreement between the
//! records and `XChecksum` means the file is corrupt and the log refuses to open.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder};
use log::{debug, info, warn};
use parking_lot::Mutex;

use super::checksum::{self, OF_DATA, OF_SIZE};
use crate::storage::error::{OrFatal, StorageError, StorageResult};
use crate::storage::with_suffix;

/// File suffix of log files.
pub const LOG_SUFFIX: &str = ".log";

/// Size of the `XChecksum` header.
pub const LOG_HEADER_SIZE: u64 = 4;

struct LogFile {
    file: File,
    /// Read cursor: offset of the next record `next()` will return.
    position: u64,
    /// Read bound of the current pass. Fixed until the next `rewind`, so a pass
    /// does not see records appended after it began.
    file_size: u64,
    /// End of the last appended record.
    append_end: u64,
    x_checksum: i32,
}

impl LogFile {
    /// Reads and validates the record at the cursor, returning it framed.
    ///
    /// `None` marks the end of the valid log: a record that runs past the known
    /// length, declares a negative size or fails its checksum.
    fn intern_next(&mut self) -> Option<Vec<u8>> {
        if self.position + OF_DATA as u64 > self.file_size {
            return None;
        }

        let mut size_bytes = [0u8; 4];
        self.file
            .seek(SeekFrom::Start(self.position + OF_SIZE as u64))
            .or_fatal("seek to log record");
        self.file
            .read_exact(&mut size_bytes)
            .or_fatal("read log record size");
        let size = BigEndian::read_i32(&size_bytes);
        if size < 0 {
            return None;
        }

        let total = OF_DATA as u64 + size as u64;
        if self.position + total > self.file_size {
            return None;
        }

        let mut record = vec![0u8; total as usize];
        self.file
            .seek(SeekFrom::Start(self.position))
            .or_fatal("seek to log record");
        self.file
            .read_exact(&mut record)
            .or_fatal("read log record");

        if !checksum::verify(&record) {
            return None;
        }

        self.position += total;
        Some(record)
    }

    fn rewind(&mut self) {
        self.position = LOG_HEADER_SIZE;
        self.file_size = self.append_end;
    }

    fn truncate(&mut self, len: u64) {
        self.file.set_len(len).or_fatal("truncate log file");
        self.file.sync_all().or_fatal("sync log file");
        self.file_size = len;
        self.append_end = len;
        if self.position > len {
            self.position = len;
        }
    }

    /// Walks every valid record, checks the fold against the header and cuts
    /// off whatever follows the last valid record.
    fn check_and_remove_tail(&mut self) -> StorageResult<()> {
        self.rewind();

        let mut x_check = 0i32;
        let mut records = 0usize;
        while let Some(record) = self.intern_next() {
            x_check = checksum::fold(x_check, &record);
            records += 1;
        }

        if x_check != self.x_checksum {
            return Err(StorageError::BadLogFile {
                reason: format!(
                    "header checksum {:#010x} does not match {:#010x} folded over {} records",
                    self.x_checksum, x_check, records
                ),
            });
        }

        let valid_end = self.position;
        let on_disk = self.file.metadata().or_fatal("stat log file").len();
        if on_disk > valid_end {
            warn!(
                "stripping {} bytes of bad tail after {} valid records",
                on_disk - valid_end,
                records
            );
        }
        self.truncate(valid_end);
        self.rewind();

        debug!("log recovered with {} valid records", records);
        Ok(())
    }
}

/// Write-ahead log backed by a single file.
///
/// One lock covers the file handle, the read cursor and the append path, so
/// `log`, `next`, `rewind` and `truncate` are each atomic with respect to one
/// another. The read cursor and the append position are independent.
/// A pass reads up to where the log ended at the last `rewind` (or open).
pub struct WriteAheadLog {
    path: PathBuf,
    inner: Mutex<LogFile>,
}

impl WriteAheadLog {
    /// Creates `<path>.log` with an empty log. Fails if the file already exists.
    pub fn create(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = with_suffix(path.as_ref(), LOG_SUFFIX);
        let mut file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::FileExists(path));
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(StorageError::FileNotReadWrite(path));
            }
            Err(e) => return Err(e.into()),
        };

        file.write_all(&0i32.to_be_bytes())?;
        file.sync_all()?;
        info!("created log file {:?}", path);

        Ok(Self {
            path,
            inner: Mutex::new(LogFile {
                file,
                position: LOG_HEADER_SIZE,
                file_size: LOG_HEADER_SIZE,
                append_end: LOG_HEADER_SIZE,
                x_checksum: 0,
            }),
        })
    }

    /// Opens `<path>.log` and recovers it, stripping a torn tail if there is one.
    ///
    /// Fails with [`StorageError::BadLogFile`] if the file is shorter than its
    /// header or if its records do not add up to the header checksum.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = with_suffix(path.as_ref(), LOG_SUFFIX);
        if !path.exists() {
            return Err(StorageError::FileNotFound(path));
        }
        let mut file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(StorageError::FileNotReadWrite(path));
            }
            Err(e) => return Err(e.into()),
        };

        let size = file.metadata()?.len();
        if size < LOG_HEADER_SIZE {
            return Err(StorageError::BadLogFile {
                reason: format!("file is {} bytes, shorter than its header", size),
            });
        }

        let mut header = [0u8; LOG_HEADER_SIZE as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;

        let mut log_file = LogFile {
            file,
            position: LOG_HEADER_SIZE,
            file_size: size,
            append_end: size,
            x_checksum: BigEndian::read_i32(&header),
        };
        log_file.check_and_remove_tail()?;
        info!("opened log file {:?} ({} bytes)", path, log_file.file_size);

        Ok(Self {
            path,
            inner: Mutex::new(log_file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `data` as a new record and makes it durable.
    ///
    /// The record always lands at the end of the file, whatever the read cursor.
    /// The header is rewritten last, after the record bytes are synced.
    pub fn log(&self, data: &[u8]) {
        let record = checksum::wrap(data);

        let mut inner = self.inner.lock();
        let end = inner.file.seek(SeekFrom::End(0)).or_fatal("seek to log end");
        inner.file.write_all(&record).or_fatal("append log record");
        inner.file.sync_data().or_fatal("sync log record");
        inner.append_end = end + record.len() as u64;

        inner.x_checksum = checksum::fold(inner.x_checksum, &record);
        let header = inner.x_checksum.to_be_bytes();
        inner.file.seek(SeekFrom::Start(0)).or_fatal("seek to log header");
        inner.file.write_all(&header).or_fatal("write log header");
        inner.file.sync_data().or_fatal("sync log header");
    }

    /// Returns the payload of the next record, or `None` at the end of the pass.
    ///
    /// Records appended after the pass began are not returned until `rewind`.
    pub fn next(&self) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        let mut record = inner.intern_next()?;
        record.drain(..OF_DATA);
        Some(record)
    }

    /// Starts a new pass: moves the read cursor back to the first record and
    /// extends the read bound to cover every record appended so far.
    pub fn rewind(&self) {
        self.inner.lock().rewind();
    }

    /// Truncates the file to `len` bytes.
    ///
    /// Used by recovery to drop records; `len` is expected to be a record boundary.
    pub fn truncate(&self, len: u64) {
        self.inner.lock().truncate(len);
    }

    /// Length in bytes of the valid log, header included.
    pub fn len(&self) -> u64 {
        self.inner.lock().append_end
    }

    /// Whether the log holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() <= LOG_HEADER_SIZE
    }

    /// Current header checksum.
    pub fn x_checksum(&self) -> i32 {
        self.inner.lock().x_checksum
    }

    /// Closes the log. The handle cannot be used afterwards.
    pub fn close(self) {
        let inner = self.inner.into_inner();
        inner.file.sync_all().or_fatal("sync log file on close");
        debug!("closed log file {:?}", self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::fs;
    use tempfile::tempdir;

    fn read_all(log: &WriteAheadLog) -> Vec<Vec<u8>> {
        log.rewind();
        let mut records = Vec::new();
        while let Some(record) = log.next() {
            records.push(record);
        }
        records
    }

    #[test]
    fn test_create_writes_empty_header() -> Result<()> {
        let dir = tempdir()?;
        let base = dir.path().join("wal");

        let log = WriteAheadLog::create(&base)?;
        assert_eq!(log.path(), dir.path().join("wal.log"));
        assert!(log.is_empty());
        assert_eq!(log.next(), None);
        log.close();

        assert_eq!(fs::read(dir.path().join("wal.log"))?, vec![0, 0, 0, 0]);
        Ok(())
    }

    #[test]
    fn test_create_fails_if_exists() -> Result<()> {
        let dir = tempdir()?;
        let base = dir.path().join("wal");
        WriteAheadLog::create(&base)?.close();

        let result = WriteAheadLog::create(&base);
        assert!(matches!(result, Err(StorageError::FileExists(_))));
        Ok(())
    }

    #[test]
    fn test_open_fails_if_missing() -> Result<()> {
        let dir = tempdir()?;
        let result = WriteAheadLog::open(dir.path().join("missing"));
        assert!(matches!(result, Err(StorageError::FileNotFound(_))));
        Ok(())
    }

    #[test]
    fn test_open_rejects_short_file() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("short.log"), [0u8, 0])?;

        let result = WriteAheadLog::open(dir.path().join("short"));
        assert!(matches!(result, Err(StorageError::BadLogFile { .. })));
        Ok(())
    }

    #[test]
    fn test_log_and_read_back() -> Result<()> {
        let dir = tempdir()?;
        let log = WriteAheadLog::create(dir.path().join("wal"))?;

        log.log(b"A");
        log.log(b"BB");
        log.log(b"CCC");

        assert_eq!(
            read_all(&log),
            vec![b"A".to_vec(), b"BB".to_vec(), b"CCC".to_vec()]
        );
        assert_eq!(log.len(), 4 + 9 + 10 + 11);
        Ok(())
    }

    #[test]
    fn test_header_is_fold_of_framed_records() -> Result<()> {
        let dir = tempdir()?;
        let log = WriteAheadLog::create(dir.path().join("wal"))?;

        log.log(b"first");
        log.log(b"second");

        let expected = checksum::fold(
            checksum::fold(0, &checksum::wrap(b"first")),
            &checksum::wrap(b"second"),
        );
        assert_eq!(log.x_checksum(), expected);
        log.close();

        let bytes = fs::read(dir.path().join("wal.log"))?;
        assert_eq!(BigEndian::read_i32(&bytes[..4]), expected);
        Ok(())
    }

    #[test]
    fn test_pass_does_not_see_later_appends() -> Result<()> {
        let dir = tempdir()?;
        let log = WriteAheadLog::create(dir.path().join("wal"))?;

        log.log(b"one");
        log.log(b"two");
        log.rewind();
        assert_eq!(log.next(), Some(b"one".to_vec()));

        log.log(b"late");

        // The pass in progress stops where the log ended when it began.
        assert_eq!(log.next(), Some(b"two".to_vec()));
        assert_eq!(log.next(), None);

        // A new pass picks up everything.
        assert_eq!(
            read_all(&log),
            vec![b"one".to_vec(), b"two".to_vec(), b"late".to_vec()]
        );
        Ok(())
    }

    #[test]
    fn test_append_mid_pass_lands_at_end() -> Result<()> {
        let dir = tempdir()?;
        let base = dir.path().join("wal");
        let log = WriteAheadLog::create(&base)?;

        log.log(b"one");
        log.rewind();
        assert_eq!(log.next(), Some(b"one".to_vec()));
        log.log(b"late");
        assert_eq!(log.next(), None);
        assert_eq!(log.len(), 4 + 11 + 12);
        log.close();

        let log = WriteAheadLog::open(&base)?;
        assert_eq!(read_all(&log), vec![b"one".to_vec(), b"late".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_empty_record_at_end_survives_reopen() -> Result<()> {
        let dir = tempdir()?;
        let base = dir.path().join("wal");
        {
            let log = WriteAheadLog::create(&base)?;
            log.log(b"x");
            log.log(b"");
            log.close();
        }

        let log = WriteAheadLog::open(&base)?;
        assert_eq!(read_all(&log), vec![b"x".to_vec(), Vec::new()]);
        Ok(())
    }

    #[test]
    fn test_open_strips_torn_tail() -> Result<()> {
        let dir = tempdir()?;
        let base = dir.path().join("wal");
        let file_path = dir.path().join("wal.log");
        {
            let log = WriteAheadLog::create(&base)?;
            log.log(b"kept");
            log.close();
        }
        let clean_len = fs::metadata(&file_path)?.len();

        // A record header promising more bytes than were written.
        let mut file = OpenOptions::new().append(true).open(&file_path)?;
        file.write_all(&[0, 0, 0, 100, 1, 2, 3, 4, 5, 6])?;
        drop(file);

        let log = WriteAheadLog::open(&base)?;
        assert_eq!(fs::metadata(&file_path)?.len(), clean_len);
        assert_eq!(read_all(&log), vec![b"kept".to_vec()]);

        // Appending after recovery produces a log that reopens cleanly.
        log.log(b"after");
        log.close();
        let log = WriteAheadLog::open(&base)?;
        assert_eq!(read_all(&log), vec![b"kept".to_vec(), b"after".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_open_strips_complete_record_with_bad_checksum() -> Result<()> {
        let dir = tempdir()?;
        let base = dir.path().join("wal");
        let file_path = dir.path().join("wal.log");
        {
            let log = WriteAheadLog::create(&base)?;
            log.log(b"kept");
            log.close();
        }
        let clean_len = fs::metadata(&file_path)?.len();

        // Whole record written but the header was never updated to cover it,
        // and its checksum field is garbage.
        let mut torn = checksum::wrap(b"lost");
        torn[OF_DATA - 1] ^= 0x01;
        let mut file = OpenOptions::new().append(true).open(&file_path)?;
        file.write_all(&torn)?;
        drop(file);

        let log = WriteAheadLog::open(&base)?;
        assert_eq!(fs::metadata(&file_path)?.len(), clean_len);
        assert_eq!(read_all(&log), vec![b"kept".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_open_rejects_header_mismatch() -> Result<()> {
        let dir = tempdir()?;
        let base = dir.path().join("wal");
        let file_path = dir.path().join("wal.log");
        {
            let log = WriteAheadLog::create(&base)?;
            log.log(b"payload");
            log.close();
        }

        let mut bytes = fs::read(&file_path)?;
        bytes[3] ^= 0x10;
        fs::write(&file_path, &bytes)?;

        let result = WriteAheadLog::open(&base);
        assert!(matches!(result, Err(StorageError::BadLogFile { .. })));
        Ok(())
    }

    #[test]
    fn test_truncate_shortens_file() -> Result<()> {
        let dir = tempdir()?;
        let log = WriteAheadLog::create(dir.path().join("wal"))?;

        log.log(b"A");
        log.log(b"BB");
        log.truncate(4 + 9);

        assert_eq!(log.len(), 13);
        assert_eq!(read_all(&log), vec![b"A".to_vec()]);
        Ok(())
    }
}
