//! # CairnDB
//! A lightweight embedded key-value database: per-table B-Trees over a
//! paged file store with a write-ahead log, fronted by a minimal SQL
//! dialect. This crate is the SQL surface and shell; the storage engine
//! lives in `keystone`.

use std::sync::Arc;

use keystone::kvstore::KvStore;
use keystone::transaction::Transaction;
use keystone::StorageError;

pub mod config;
pub mod errors;
pub mod executor;
pub mod parser;
pub mod session;

pub use config::Config;
pub use errors::QueryError;

pub fn debug_logs_enabled() -> bool {
    std::env::var_os("CAIRN_DEBUG_LOG").is_some()
}

#[macro_export]
macro_rules! cairn_debug_log {
    ($($arg:tt)*) => {
        if $crate::debug_logs_enabled() {
            println!($($arg)*);
        }
    };
}

/// Handle to a local CairnDB instance: the store plus front-end policy
/// (tables are auto-created on first write with the configured degree).
pub struct Db {
    store: Arc<KvStore>,
    default_degree: usize,
}

impl Db {
    /// Opens the database described by `config`, recovers it from disk and
    /// the WAL, and starts the periodic flusher.
    pub fn open(config: &Config) -> Result<Db, QueryError> {
        let store = KvStore::open(&config.db_file, &config.log_file)?;
        store.load()?;
        store.start_periodic_flush(config.flush_every);
        Ok(Db {
            store,
            default_degree: config.degree,
        })
    }

    pub fn default_degree(&self) -> usize {
        self.default_degree
    }

    /// Inserts or updates a pair, creating the table on first use.
    pub fn put(&self, table: &str, key: i32, value: &str) -> Result<(), QueryError> {
        if !self.store.is_table_exists(table) {
            match self.store.create_table(table, self.default_degree) {
                // Another writer may have created it in the meantime.
                Ok(()) | Err(StorageError::TableExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.store.put(table, key, value)?)
    }

    pub fn get(&self, table: &str, key: i32) -> Result<Option<String>, QueryError> {
        Ok(self.store.get(table, key)?)
    }

    pub fn delete(&self, table: &str, key: i32) -> Result<(), QueryError> {
        Ok(self.store.delete(table, key)?)
    }

    pub fn update(&self, table: &str, key: i32, value: &str) -> Result<(), QueryError> {
        self.put(table, key, value)
    }

    /// Creates a table with the given degree; a no-op when it already
    /// exists.
    pub fn create_table(&self, table: &str, degree: usize) -> Result<(), QueryError> {
        if self.store.is_table_exists(table) {
            return Ok(());
        }
        Ok(self.store.create_table(table, degree)?)
    }

    pub fn drop_table(&self, table: &str) -> Result<(), QueryError> {
        Ok(self.store.drop_table(table)?)
    }

    pub fn flush(&self, table: &str) -> Result<(), QueryError> {
        Ok(self.store.flush(table)?)
    }

    pub fn load(&self) -> Result<(), QueryError> {
        Ok(self.store.load()?)
    }

    pub fn begin_transaction(&self) -> Transaction {
        self.store.begin_transaction()
    }

    pub fn close(&self) -> Result<(), QueryError> {
        Ok(self.store.close()?)
    }
}
