//! The Write-Ahead Log.
//!
//! An append-only, line-framed record log: one JSON object per line.
//! Appends are durable before they return; replay reads from the start,
//! skips records that fail to parse and ignores a torn trailing line.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, StorageError};

/// The operation a WAL record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalOp {
    #[serde(rename = "PUT")]
    Put,
    #[serde(rename = "DELETE")]
    Delete,
}

/// One logged mutation. `value` is omitted for DELETE records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalRecord {
    #[serde(rename = "operation")]
    pub op: WalOp,
    pub table: String,
    pub key: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl WalRecord {
    pub fn put(table: &str, key: i32, value: &str) -> Self {
        WalRecord {
            op: WalOp::Put,
            table: table.to_string(),
            key,
            value: Some(value.to_string()),
        }
    }

    pub fn delete(table: &str, key: i32) -> Self {
        WalRecord {
            op: WalOp::Delete,
            table: table.to_string(),
            key,
            value: None,
        }
    }
}

struct WalInner {
    file: File,
    closed: bool,
}

/// The WAL manager. Appends serialize on an internal mutex.
pub struct WalManager {
    inner: Mutex<WalInner>,
}

impl WalManager {
    /// Opens (or creates) the log file in append mode.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        Ok(WalManager {
            inner: Mutex::new(WalInner {
                file,
                closed: false,
            }),
        })
    }

    /// Appends one record followed by a newline and waits for the durable
    /// write before returning.
    pub fn append(&self, record: &WalRecord) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(StorageError::LogClosed);
        }
        let mut line = serde_json::to_vec(record)
            .map_err(|e| StorageError::InvalidValue(e.to_string()))?;
        line.push(b'\n');
        inner.file.write_all(&line)?;
        inner.file.sync_data()?;
        Ok(())
    }

    /// Reads every well-formed record from offset 0, in append order.
    /// Unparseable lines are skipped with a warning; a final line with no
    /// terminator is a torn tail and is ignored.
    pub fn replay(&self) -> Result<Vec<WalRecord>> {
        let mut inner = self.inner.lock();
        inner.file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&inner.file);
        let mut records = Vec::new();
        let mut line = Vec::new();
        loop {
            line.clear();
            let n = reader.read_until(b'\n', &mut line)?;
            if n == 0 {
                break;
            }
            if line.last() != Some(&b'\n') {
                crate::keystone_debug_log!(
                    "[WalManager::replay] Ignoring torn trailing record of {n} bytes"
                );
                break;
            }
            match serde_json::from_slice::<WalRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    eprintln!("warning: skipping corrupted log record: {e}");
                }
            }
        }
        Ok(records)
    }

    /// Syncs the log and refuses further appends.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.closed {
            inner.file.sync_data()?;
            inner.closed = true;
        }
        Ok(())
    }
}
