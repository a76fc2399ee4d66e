use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;

use crate::errors::{Result, StorageError};
use crate::{PageId, CATALOG_PAGE_ID};

/// A LIFO stack of page ids that have been released and may be reused.
///
/// Identifiers never appear twice and the catalog page (id 0) is never
/// accepted.
#[derive(Debug)]
pub struct Freelist {
    pages: Mutex<Vec<PageId>>,
}

impl Freelist {
    pub fn new() -> Self {
        Freelist {
            pages: Mutex::new(Vec::new()),
        }
    }

    /// Pushes a page id onto the freelist. Id 0 and ids already present
    /// are ignored.
    pub fn add(&self, id: PageId) {
        if id == CATALOG_PAGE_ID {
            return;
        }
        let mut pages = self.pages.lock();
        if !pages.contains(&id) {
            pages.push(id);
        }
    }

    /// Pops the most recently freed page id, if any.
    pub fn get_free_page(&self) -> Option<PageId> {
        self.pages.lock().pop()
    }

    pub fn len(&self) -> usize {
        self.pages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.lock().is_empty()
    }

    /// Serializes the stack as a headerless little-endian `i32` sequence;
    /// the length is implicit in the byte count.
    pub fn serialize(&self) -> Vec<u8> {
        let pages = self.pages.lock();
        let mut buf = BytesMut::with_capacity(pages.len() * 4);
        for id in pages.iter() {
            buf.put_i32_le(*id);
        }
        buf.to_vec()
    }

    pub fn deserialize(data: &[u8]) -> Result<Freelist> {
        if data.len() % 4 != 0 {
            return Err(StorageError::Corrupted(format!(
                "freelist byte length {} is not a multiple of 4",
                data.len()
            )));
        }
        let mut cursor = data;
        let mut pages = Vec::with_capacity(data.len() / 4);
        while cursor.has_remaining() {
            pages.push(cursor.get_i32_le());
        }
        Ok(Freelist {
            pages: Mutex::new(pages),
        })
    }
}

impl Default for Freelist {
    fn default() -> Self {
        Freelist::new()
    }
}
