//! Page cache over a single page file.
//!
//! The page file is a plain concatenation of `PAGE_SIZE` pages with no header;
//! page `n` starts at `(n - 1) * PAGE_SIZE`. Resident pages are held in a
//! [`RefCountedCache`] keyed by page number, with [`PageFile`] as its loader:
//! misses read the page from disk and the last `release` writes a dirty page back.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::storage::cache::{CacheLoader, RefCountedCache};
use crate::storage::error::{OrFatal, StorageError, StorageResult};
use crate::storage::page::{Page, PageId, PageRef, PAGE_SIZE};
use crate::storage::with_suffix;

/// File suffix of page files.
pub const DB_SUFFIX: &str = ".db";

/// Positioned page I/O on the backing file.
pub struct PageFile {
    path: PathBuf,
    file: Mutex<File>,
}

impl PageFile {
    fn len(&self) -> u64 {
        self.file.lock().metadata().or_fatal("stat page file").len()
    }

    fn read_page(&self, id: PageId) -> StorageResult<Box<[u8; PAGE_SIZE]>> {
        if !id.is_valid() {
            return Err(StorageError::PageNotFound(id));
        }

        let mut file = self.file.lock();
        let file_size = file.metadata().or_fatal("stat page file").len();
        if id.offset() + PAGE_SIZE as u64 > file_size {
            return Err(StorageError::PageNotFound(id));
        }

        let mut buf = Box::new([0u8; PAGE_SIZE]);
        file.seek(SeekFrom::Start(id.offset()))
            .or_fatal("seek to page");
        file.read_exact(buf.as_mut_slice()).or_fatal("read page");
        Ok(buf)
    }

    /// Writes the page's bytes to its slot and syncs them, clearing the dirty flag.
    fn write_page(&self, page: &Page) {
        // Holding the data lock keeps writers out until the flag is cleared.
        let data = page.data();
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(page.id().offset()))
                .or_fatal("seek to page");
            file.write_all(data.as_slice()).or_fatal("write page");
            file.sync_data().or_fatal("sync page");
        }
        page.set_dirty(false);
    }

    fn set_page_count(&self, pages: u32) {
        let file = self.file.lock();
        file.set_len(pages as u64 * PAGE_SIZE as u64)
            .or_fatal("resize page file");
    }
}

impl CacheLoader for PageFile {
    type Resource = PageRef;

    fn fetch(&self, key: u64) -> StorageResult<PageRef> {
        let id = PageId(key as u32);
        let data = self.read_page(id)?;
        Ok(Arc::new(Page::new(id, data, false)))
    }

    fn evict(&self, _key: u64, page: &PageRef) {
        if page.is_dirty() {
            self.write_page(page);
        }
    }
}

/// Fixed-size page store over one `.db` file.
pub struct PageCache {
    cache: RefCountedCache<PageFile>,
    /// Number of pages in the file. Held while allocating so page numbers
    /// are handed out in order.
    page_numbers: Mutex<u32>,
}

impl PageCache {
    /// Creates `<path>.db`. Fails if the file already exists.
    pub fn create(path: impl AsRef<Path>, memory_budget: u64) -> StorageResult<Self> {
        let max_pages = Self::capacity_for(memory_budget)?;
        let path = with_suffix(path.as_ref(), DB_SUFFIX);

        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::FileExists(path));
            }
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(StorageError::FileNotReadWrite(path));
            }
            Err(e) => return Err(e.into()),
        };

        info!("created page file {:?} with room for {} pages", path, max_pages);
        Self::with_file(path, file, max_pages)
    }

    /// Opens an existing `<path>.db`. Fails if the file does not exist.
    pub fn open(path: impl AsRef<Path>, memory_budget: u64) -> StorageResult<Self> {
        let max_pages = Self::capacity_for(memory_budget)?;
        let path = with_suffix(path.as_ref(), DB_SUFFIX);
        if !path.exists() {
            return Err(StorageError::FileNotFound(path));
        }

        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(StorageError::FileNotReadWrite(path));
            }
            Err(e) => return Err(e.into()),
        };

        let cache = Self::with_file(path, file, max_pages)?;
        info!(
            "opened page file {:?} with {} pages",
            cache.path(),
            cache.page_count()
        );
        Ok(cache)
    }

    fn capacity_for(memory_budget: u64) -> StorageResult<usize> {
        match memory_budget / PAGE_SIZE as u64 {
            0 => Err(StorageError::InvalidMemoryBudget {
                budget: memory_budget,
            }),
            pages => Ok(pages as usize),
        }
    }

    fn with_file(path: PathBuf, file: File, max_pages: usize) -> StorageResult<Self> {
        let pages = file.metadata()?.len() / PAGE_SIZE as u64;
        let loader = PageFile {
            path,
            file: Mutex::new(file),
        };

        Ok(Self {
            cache: RefCountedCache::new(loader, max_pages),
            page_numbers: Mutex::new(pages as u32),
        })
    }

    pub fn path(&self) -> &Path {
        &self.cache.loader().path
    }

    /// Maximum number of resident pages.
    pub fn max_pages(&self) -> usize {
        self.cache.max_resource()
    }

    /// Appends a page seeded with `init_data` and returns it resident and dirty.
    ///
    /// The caller holds one reference to the new page and must `release` it.
    /// `init_data` is zero-padded or cut to `PAGE_SIZE`.
    pub fn new_page(&self, init_data: &[u8]) -> StorageResult<PageRef> {
        let mut page_numbers = self.page_numbers.lock();
        let id = PageId(*page_numbers + 1);

        let mut allocated = false;
        let page = self.cache.get_with(id.key(), |_| {
            self.cache.loader().set_page_count(id.0);
            allocated = true;
            Ok(Arc::new(Page::with_init_data(id, init_data)))
        })?;
        if !allocated {
            // A page cut off by `truncate_by_pgno` is still held under this number.
            self.cache.release(id.key());
            warn!("cannot allocate {}: a truncated page is still resident", id);
            return Err(StorageError::PageStillResident(id));
        }
        *page_numbers = id.0;

        debug!("allocated {}", id);
        Ok(page)
    }

    /// Returns the page, reading it from disk if it is not resident.
    pub fn get_page(&self, id: PageId) -> StorageResult<PageRef> {
        if !id.is_valid() {
            return Err(StorageError::PageNotFound(id));
        }
        self.cache.get(id.key())
    }

    /// Drops a reference taken by `get_page` or `new_page`.
    pub fn release(&self, page: &Page) {
        self.cache.release(page.id().key());
    }

    /// Writes the page to disk now, without giving up the reference.
    pub fn flush_page(&self, page: &Page) {
        self.cache.loader().write_page(page);
    }

    /// Cuts the file down to exactly `max_pgno` pages.
    pub fn truncate_by_pgno(&self, max_pgno: u32) {
        let mut page_numbers = self.page_numbers.lock();
        self.cache.loader().set_page_count(max_pgno);
        *page_numbers = max_pgno;
        debug!("truncated {:?} to {} pages", self.path(), max_pgno);
    }

    /// Number of pages in the file.
    pub fn page_count(&self) -> u32 {
        *self.page_numbers.lock()
    }

    /// Number of pages currently resident.
    pub fn resident_count(&self) -> usize {
        self.cache.resident_count()
    }

    /// Outstanding references to a resident page.
    pub fn references(&self, id: PageId) -> Option<usize> {
        self.cache.references(id.key())
    }

    /// Length of the page file in bytes.
    pub fn file_len(&self) -> u64 {
        self.cache.loader().len()
    }

    /// Writes back every resident dirty page and closes the file.
    pub fn close(self) {
        self.cache.close();
        let loader = self.cache.loader();
        loader.file.lock().sync_all().or_fatal("sync page file on close");
        debug!("closed page file {:?}", loader.path);
    }
}
