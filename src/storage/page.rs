use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Size in bytes of every page in a page file.
pub const PAGE_SIZE: usize = 8192;

/// 1-based page number. Page `n` lives at byte offset `(n - 1) * PAGE_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub u32);

impl PageId {
    /// Whether this id can name a page; page numbers start at 1.
    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }

    /// Byte offset of the page in its file.
    pub fn offset(&self) -> u64 {
        (self.0 as u64 - 1) * PAGE_SIZE as u64
    }

    pub(crate) fn key(&self) -> u64 {
        self.0 as u64
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {}", self.0)
    }
}

/// A resident page: its number, its bytes and whether they changed since load.
pub struct Page {
    id: PageId,
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
    dirty: AtomicBool,
}

/// Shared handle to a resident page, as handed out by the page cache.
pub type PageRef = Arc<Page>;

impl Page {
    pub(crate) fn new(id: PageId, data: Box<[u8; PAGE_SIZE]>, dirty: bool) -> Self {
        Self {
            id,
            data: RwLock::new(data),
            dirty: AtomicBool::new(dirty),
        }
    }

    /// Builds a page from `init`, zero-padded or cut to `PAGE_SIZE`.
    pub(crate) fn with_init_data(id: PageId, init: &[u8]) -> Self {
        let mut data = Box::new([0u8; PAGE_SIZE]);
        let len = init.len().min(PAGE_SIZE);
        data[..len].copy_from_slice(&init[..len]);
        Self::new(id, data, true)
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    /// Locks the page for writing and marks it dirty.
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        let guard = self.data.write();
        self.dirty.store(true, Ordering::SeqCst);
        guard
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::SeqCst);
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_offsets() {
        assert_eq!(PageId(1).offset(), 0);
        assert_eq!(PageId(2).offset(), PAGE_SIZE as u64);
        assert_eq!(PageId(10).offset(), 9 * PAGE_SIZE as u64);
        assert!(!PageId(0).is_valid());
    }

    #[test]
    fn test_init_data_is_padded_and_cut() {
        let page = Page::with_init_data(PageId(1), b"abc");
        assert!(page.is_dirty());
        assert_eq!(&page.data()[..4], b"abc\0");

        let long = vec![7u8; PAGE_SIZE + 100];
        let page = Page::with_init_data(PageId(2), &long);
        assert!(page.data().iter().all(|&b| b == 7));
    }

    #[test]
    fn test_write_marks_dirty() {
        let page = Page::new(PageId(3), Box::new([0u8; PAGE_SIZE]), false);
        assert!(!page.is_dirty());

        let _ = page.data()[0];
        assert!(!page.is_dirty());

        page.data_mut()[0] = 1;
        assert!(page.is_dirty());
        assert_eq!(page.data()[0], 1);
    }
}
