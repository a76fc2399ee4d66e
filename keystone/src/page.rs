use crate::{PageId, PAGE_SIZE};

/// A fixed-size block of the database file, stored at offset
/// `id * PAGE_SIZE`. Pages are the unit of allocation and I/O.
#[derive(Debug, Clone)]
pub struct Page {
    pub id: PageId,
    pub data: [u8; PAGE_SIZE],
}

impl Page {
    pub fn new(id: PageId) -> Self {
        Page {
            id,
            data: [0; PAGE_SIZE],
        }
    }

    /// Builds a page from arbitrary bytes, padding with zeroes or
    /// truncating so the payload is exactly `PAGE_SIZE` long.
    pub fn from_bytes(id: PageId, bytes: &[u8]) -> Self {
        let mut page = Page::new(id);
        let len = bytes.len().min(PAGE_SIZE);
        page.data[..len].copy_from_slice(&bytes[..len]);
        page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bytes_pads_short_payloads() {
        let page = Page::from_bytes(3, &[1, 2, 3]);
        assert_eq!(page.id, 3);
        assert_eq!(&page.data[..3], &[1, 2, 3]);
        assert!(page.data[3..].iter().all(|b| *b == 0));
    }

    #[test]
    fn from_bytes_truncates_long_payloads() {
        let oversized = vec![7u8; PAGE_SIZE + 100];
        let page = Page::from_bytes(1, &oversized);
        assert_eq!(page.data.len(), PAGE_SIZE);
        assert!(page.data.iter().all(|b| *b == 7));
    }
}
