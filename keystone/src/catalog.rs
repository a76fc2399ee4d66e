//! The table catalog: persistent metadata of every table, kept on page 0.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;

use crate::errors::{Result, StorageError};
use crate::pager::PageStore;
use crate::{Page, PageId, CATALOG_PAGE_ID, PAGE_SIZE};

/// Persistent metadata for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMetadata {
    pub name: String,
    /// Page id of the table's B-Tree root.
    pub root_id: PageId,
    /// Minimum branching factor of the table's B-Tree.
    pub degree: i32,
    pub created_at: DateTime<Utc>,
    pub row_count: i32,
}

/// Mapping of table name to metadata, persisted as a length-prefixed
/// vector on page 0. Guarded by a read-write lock; `save` writes the whole
/// page atomically.
pub struct Catalog {
    tables: RwLock<HashMap<String, TableMetadata>>,
    disk: Arc<dyn PageStore>,
}

impl Catalog {
    pub fn new(disk: Arc<dyn PageStore>) -> Self {
        Catalog {
            tables: RwLock::new(HashMap::new()),
            disk,
        }
    }

    /// Registers a new table. Duplicate names are an error.
    pub fn create_table(&self, name: &str, degree: i32, root_id: PageId) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.contains_key(name) {
            return Err(StorageError::TableExists(name.to_string()));
        }
        tables.insert(
            name.to_string(),
            TableMetadata {
                name: name.to_string(),
                root_id,
                degree,
                created_at: Utc::now(),
                row_count: 0,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<TableMetadata> {
        self.tables.read().get(name).cloned()
    }

    /// Names of all registered tables, in no particular order.
    pub fn list(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    pub fn all(&self) -> HashMap<String, TableMetadata> {
        self.tables.read().clone()
    }

    /// Removes a table. Dropping an unknown name is an error.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        if self.tables.write().remove(name).is_none() {
            return Err(StorageError::TableMissing(name.to_string()));
        }
        Ok(())
    }

    pub fn increment_row_count(&self, name: &str) {
        if let Some(meta) = self.tables.write().get_mut(name) {
            meta.row_count += 1;
        }
    }

    /// Decrements the row count, flooring at zero.
    pub fn decrement_row_count(&self, name: &str) {
        if let Some(meta) = self.tables.write().get_mut(name) {
            if meta.row_count > 0 {
                meta.row_count -= 1;
            }
        }
    }

    /// Persists the whole catalog to page 0 in one page write.
    pub fn save(&self) -> Result<()> {
        let tables = self.tables.read();
        let mut buf = BytesMut::new();
        buf.put_i32_le(tables.len() as i32);
        for meta in tables.values() {
            let name_bytes = meta.name.as_bytes();
            buf.put_i32_le(name_bytes.len() as i32);
            buf.put_slice(name_bytes);
            buf.put_i32_le(meta.root_id);
            buf.put_i32_le(meta.degree);
            buf.put_i64_le(meta.created_at.timestamp_nanos_opt().unwrap_or(0));
            buf.put_i32_le(meta.row_count);
        }
        if buf.len() > PAGE_SIZE {
            return Err(StorageError::InvalidValue(format!(
                "catalog payload of {} bytes exceeds one page",
                buf.len()
            )));
        }
        self.disk.write_page(&Page::from_bytes(CATALOG_PAGE_ID, &buf))
    }

    /// Rebuilds the in-memory map from page 0. A missing or zeroed page is
    /// equivalent to an empty catalog.
    pub fn load(&self) -> Result<()> {
        let page = match self.disk.read_page(CATALOG_PAGE_ID) {
            Ok(page) => page,
            Err(StorageError::PageNotFound(_)) => {
                self.tables.write().clear();
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut buf = &page.data[..];
        let count = read_i32(&mut buf, "table count")?;
        let mut tables = HashMap::new();
        for _ in 0..count {
            let name_len = read_i32(&mut buf, "name length")?;
            if name_len < 0 || buf.remaining() < name_len as usize {
                return Err(StorageError::Corrupted(format!(
                    "catalog name of {name_len} bytes does not fit"
                )));
            }
            let raw = buf[..name_len as usize].to_vec();
            buf.advance(name_len as usize);
            let name = String::from_utf8(raw)
                .map_err(|e| StorageError::Corrupted(format!("table name not utf-8: {e}")))?;

            let root_id = read_i32(&mut buf, "root id")?;
            let degree = read_i32(&mut buf, "degree")?;
            let created_at_nanos = read_i64(&mut buf, "created_at")?;
            let row_count = read_i32(&mut buf, "row count")?;

            tables.insert(
                name.clone(),
                TableMetadata {
                    name,
                    root_id,
                    degree,
                    created_at: Utc.timestamp_nanos(created_at_nanos),
                    row_count: row_count.max(0),
                },
            );
        }

        *self.tables.write() = tables;
        Ok(())
    }
}

fn read_i32(buf: &mut &[u8], what: &str) -> Result<i32> {
    if buf.remaining() < 4 {
        return Err(StorageError::Corrupted(format!("truncated catalog {what}")));
    }
    Ok(buf.get_i32_le())
}

fn read_i64(buf: &mut &[u8], what: &str) -> Result<i64> {
    if buf.remaining() < 8 {
        return Err(StorageError::Corrupted(format!("truncated catalog {what}")));
    }
    Ok(buf.get_i64_le())
}
