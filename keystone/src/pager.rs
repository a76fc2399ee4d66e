use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;

use crate::errors::{Result, StorageError};
use crate::freelist::Freelist;
use crate::{Page, PageId, PAGE_SIZE};

/// The page-store capability the rest of the engine depends on: fixed-size
/// page I/O plus allocation. The KV store and catalog only ever see this
/// trait, never a concrete file.
pub trait PageStore: Send + Sync {
    /// Returns a page with a fresh or recycled id. The page has zeroed
    /// data and is not yet written.
    fn allocate_page(&self) -> Result<Page>;

    /// Writes the page's `PAGE_SIZE` bytes at offset `id * PAGE_SIZE` and
    /// waits for the durable write.
    fn write_page(&self, page: &Page) -> Result<()>;

    /// Reads the page at `id`, failing with `PageNotFound` when the offset
    /// lies beyond end-of-file.
    fn read_page(&self, id: PageId) -> Result<Page>;

    /// Returns the page id to the freelist. The page content is not zeroed.
    fn free_page(&self, id: PageId);

    fn last_allocated_id(&self) -> PageId;

    /// Syncs outstanding writes and refuses further I/O.
    fn close(&self) -> Result<()>;
}

struct PagerInner {
    file: File,
    next_id: PageId,
    closed: bool,
}

/// File-backed `PageStore`. All operations serialize on one internal
/// mutex so reads and writes never interleave partial data.
pub struct Pager {
    inner: Mutex<PagerInner>,
    freelist: Freelist,
}

impl Pager {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        crate::keystone_debug_log!("[Pager::open] Opening database file at: {path_ref:?}");
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path_ref)?;

        let file_size = file.metadata()?.len();
        // Page 0 belongs to the catalog; data pages start at 1.
        let next_id = ((file_size / PAGE_SIZE as u64) as PageId).max(1);
        crate::keystone_debug_log!(
            "[Pager::open] File size: {file_size}, initial next_id: {next_id}"
        );

        Ok(Pager {
            inner: Mutex::new(PagerInner {
                file,
                next_id,
                closed: false,
            }),
            freelist: Freelist::new(),
        })
    }

    pub fn freelist(&self) -> &Freelist {
        &self.freelist
    }

    fn closed_error() -> StorageError {
        StorageError::Io(io::Error::new(io::ErrorKind::Other, "pager is closed"))
    }
}

impl PageStore for Pager {
    fn allocate_page(&self) -> Result<Page> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Self::closed_error());
        }
        let id = match self.freelist.get_free_page() {
            Some(id) => id,
            None => {
                let id = inner.next_id;
                inner.next_id += 1;
                id
            }
        };
        crate::keystone_debug_log!("[Pager::allocate_page] Allocated page_id: {id}");
        Ok(Page::new(id))
    }

    fn write_page(&self, page: &Page) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Self::closed_error());
        }
        crate::keystone_debug_log!("[Pager::write_page] Writing page_id: {}", page.id);
        let offset = page.id as u64 * PAGE_SIZE as u64;
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&page.data)?;
        inner.file.sync_data()?;
        if page.id >= inner.next_id {
            inner.next_id = page.id + 1;
        }
        Ok(())
    }

    fn read_page(&self, id: PageId) -> Result<Page> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Self::closed_error());
        }
        let offset = id as u64 * PAGE_SIZE as u64;
        let file_size = inner.file.metadata()?.len();
        if id < 0 || offset >= file_size {
            return Err(StorageError::PageNotFound(id));
        }

        inner.file.seek(SeekFrom::Start(offset))?;
        let mut page = Page::new(id);
        let mut filled = 0;
        // A trailing page may be shorter than PAGE_SIZE; the rest of the
        // buffer stays zeroed.
        while filled < PAGE_SIZE {
            let n = inner.file.read(&mut page.data[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(page)
    }

    fn free_page(&self, id: PageId) {
        self.freelist.add(id);
    }

    fn last_allocated_id(&self) -> PageId {
        self.inner.lock().next_id - 1
    }

    fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.closed {
            inner.file.sync_all()?;
            inner.closed = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_returns_same_bytes() {
        let dir = tempdir().unwrap();
        let pager = Pager::open(dir.path().join("pages.db")).unwrap();

        let page = Page::from_bytes(2, b"hello pages");
        pager.write_page(&page).unwrap();

        let read = pager.read_page(2).unwrap();
        assert_eq!(&read.data[..], &page.data[..]);
    }

    #[test]
    fn read_past_end_of_file_is_page_not_found() {
        let dir = tempdir().unwrap();
        let pager = Pager::open(dir.path().join("pages.db")).unwrap();

        let err = pager.read_page(9).unwrap_err();
        assert!(matches!(err, StorageError::PageNotFound(9)));
    }

    #[test]
    fn allocation_starts_past_the_catalog_page() {
        let dir = tempdir().unwrap();
        let pager = Pager::open(dir.path().join("pages.db")).unwrap();

        let page = pager.allocate_page().unwrap();
        assert_eq!(page.id, 1);
        assert!(page.data.iter().all(|b| *b == 0));
        assert_eq!(pager.allocate_page().unwrap().id, 2);
    }

    #[test]
    fn freed_pages_are_recycled_lifo() {
        let dir = tempdir().unwrap();
        let pager = Pager::open(dir.path().join("pages.db")).unwrap();

        let a = pager.allocate_page().unwrap().id;
        let b = pager.allocate_page().unwrap().id;
        pager.free_page(a);
        pager.free_page(b);

        assert_eq!(pager.allocate_page().unwrap().id, b);
        assert_eq!(pager.allocate_page().unwrap().id, a);
        assert_eq!(pager.last_allocated_id(), b);
    }

    #[test]
    fn reopen_resumes_the_allocation_counter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.db");

        let pager = Pager::open(&path).unwrap();
        pager.write_page(&Page::from_bytes(3, b"tail")).unwrap();
        pager.close().unwrap();

        let reopened = Pager::open(&path).unwrap();
        assert_eq!(reopened.allocate_page().unwrap().id, 4);
    }

    #[test]
    fn io_after_close_fails() {
        let dir = tempdir().unwrap();
        let pager = Pager::open(dir.path().join("pages.db")).unwrap();
        pager.close().unwrap();

        assert!(pager.allocate_page().is_err());
        assert!(pager.write_page(&Page::new(1)).is_err());
        assert!(pager.read_page(0).is_err());
    }
}
