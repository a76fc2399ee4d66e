//! The transaction coordinator.
//!
//! A transaction is an ordered batch of PUT/DELETE operations applied
//! atomically from the caller's viewpoint: the first failure during commit
//! reverses every already-applied operation, in reverse order. There is no
//! isolation between concurrent transactions and no table locking.

use std::sync::Arc;

use crate::errors::{Result, StorageError};
use crate::kvstore::KvStore;
use crate::wal::{WalOp, WalRecord};

/// The prior state of one key, captured just before commit touches it.
struct OperationBackup {
    table: String,
    key: i32,
    /// `None` when the key did not exist before the commit.
    old_value: Option<String>,
}

/// A batch of queued mutations against one store.
pub struct Transaction {
    store: Arc<KvStore>,
    operations: Vec<WalRecord>,
}

impl Transaction {
    pub(crate) fn new(store: Arc<KvStore>) -> Self {
        Transaction {
            store,
            operations: Vec::new(),
        }
    }

    /// Queues a PUT for the next commit.
    pub fn put_batch(&mut self, table: &str, key: i32, value: &str) {
        self.operations.push(WalRecord::put(table, key, value));
    }

    /// Queues a DELETE for the next commit.
    pub fn delete_batch(&mut self, table: &str, key: i32) {
        self.operations.push(WalRecord::delete(table, key));
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Applies the queued operations in order. On the first failure every
    /// applied operation is reversed and `CommitFailed` wraps the cause.
    pub fn commit(&mut self) -> Result<()> {
        let operations = std::mem::take(&mut self.operations);
        let mut journal: Vec<OperationBackup> = Vec::with_capacity(operations.len());

        for op in &operations {
            let old_value = self.store.get(&op.table, op.key).unwrap_or(None);
            journal.push(OperationBackup {
                table: op.table.clone(),
                key: op.key,
                old_value,
            });

            let applied = match op.op {
                WalOp::Put => {
                    self.store
                        .put(&op.table, op.key, op.value.as_deref().unwrap_or_default())
                }
                WalOp::Delete => self.store.delete(&op.table, op.key),
            };
            if let Err(cause) = applied {
                self.rollback_applied(&journal);
                return Err(StorageError::CommitFailed {
                    source: Box::new(cause),
                });
            }
        }
        Ok(())
    }

    /// Restores each journaled key in reverse order. Restore failures are
    /// best-effort and only logged.
    fn rollback_applied(&self, journal: &[OperationBackup]) {
        for backup in journal.iter().rev() {
            let restored = match &backup.old_value {
                Some(value) => self.store.put(&backup.table, backup.key, value),
                None => self.store.delete(&backup.table, backup.key),
            };
            if let Err(e) = restored {
                eprintln!(
                    "warning: rollback of {}/{} failed: {e}",
                    backup.table, backup.key
                );
            }
        }
    }

    /// Discards the queued operations without touching the store.
    pub fn rollback(&mut self) {
        self.operations.clear();
    }
}
