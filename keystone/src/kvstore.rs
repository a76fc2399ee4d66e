//! The key-value store: orchestrates per-table B-Trees, the write-ahead
//! log, the pager and the catalog.
//!
//! Durability ordering is fixed: a WAL record is made durable before the
//! in-memory tree mutates, and the tree pages are flushed after. A crash
//! at any point recovers to a prefix of the WAL ordering.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::btree::{self, BTree, Node};
use crate::catalog::{Catalog, TableMetadata};
use crate::errors::{Result, StorageError};
use crate::pager::{PageStore, Pager};
use crate::transaction::Transaction;
use crate::wal::{WalManager, WalOp, WalRecord};
use crate::{Page, PageId, PAGE_SIZE};

/// One store instance owns one database file, its WAL, its catalog and
/// every in-memory tree materialized from it.
pub struct KvStore {
    disk: Arc<dyn PageStore>,
    wal: WalManager,
    catalog: Catalog,
    /// Open tables. Lock order is this map, then a tree, then the disk,
    /// then the catalog — never the reverse.
    trees: RwLock<HashMap<String, Arc<Mutex<BTree>>>>,
    /// Pages each table occupied at its last flush, for reclamation.
    table_pages: Mutex<HashMap<String, HashSet<PageId>>>,
    stop_flusher: Arc<AtomicBool>,
    flusher: Mutex<Option<thread::JoinHandle<()>>>,
}

impl KvStore {
    /// Opens (or creates) the database and WAL files.
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(db_path: P, wal_path: Q) -> Result<Arc<KvStore>> {
        let disk: Arc<dyn PageStore> = Arc::new(Pager::open(db_path)?);
        let wal = WalManager::open(wal_path)?;
        let catalog = Catalog::new(Arc::clone(&disk));
        Ok(Arc::new(KvStore {
            disk,
            wal,
            catalog,
            trees: RwLock::new(HashMap::new()),
            table_pages: Mutex::new(HashMap::new()),
            stop_flusher: Arc::new(AtomicBool::new(false)),
            flusher: Mutex::new(None),
        }))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn is_table_exists(&self, table: &str) -> bool {
        self.catalog.get(table).is_some()
    }

    /// Registers a new table: allocates its root page, writes the empty
    /// root, and persists the catalog.
    pub fn create_table(&self, table: &str, degree: usize) -> Result<()> {
        if self.catalog.get(table).is_some() {
            return Err(StorageError::TableExists(table.to_string()));
        }
        let root_id = self.disk.allocate_page()?.id;
        let mut tree = BTree::new(degree);
        tree.root_mut().id = root_id;
        self.disk
            .write_page(&Page::from_bytes(root_id, &tree.serialize()))?;
        if let Err(e) = self.catalog.create_table(table, tree.degree() as i32, root_id) {
            self.disk.free_page(root_id);
            return Err(e);
        }
        self.catalog.save()?;
        self.trees
            .write()
            .insert(table.to_string(), Arc::new(Mutex::new(tree)));
        self.table_pages
            .lock()
            .insert(table.to_string(), HashSet::from([root_id]));
        crate::keystone_debug_log!("[KvStore::create_table] Created {table} at root {root_id}");
        Ok(())
    }

    /// Drops the table and returns every page it occupied to the freelist.
    pub fn drop_table(&self, table: &str) -> Result<()> {
        let tree = self.tree(table)?;
        {
            let tree = tree.lock();
            let mut ids = HashSet::new();
            collect_node_ids(tree.root(), &mut ids);
            for id in ids {
                if id != btree::UNASSIGNED_NODE_ID {
                    self.disk.free_page(id);
                }
            }
        }
        self.trees.write().remove(table);
        self.table_pages.lock().remove(table);
        self.catalog.drop_table(table)?;
        self.catalog.save()
    }

    /// Inserts or updates one pair: WAL first, then the in-memory tree,
    /// then the durable flush of the table and the catalog.
    pub fn put(&self, table: &str, key: i32, value: &str) -> Result<()> {
        let tree = self.tree(table)?;
        self.wal.append(&WalRecord::put(table, key, value))?;
        let mut tree = tree.lock();
        if tree.insert(key, value.to_string()) {
            self.catalog.increment_row_count(table);
        }
        self.flush_tree(table, &mut tree)
    }

    /// Removes one pair. Deleting an absent key still writes a WAL record;
    /// the tree no-ops and replay stays idempotent.
    pub fn delete(&self, table: &str, key: i32) -> Result<()> {
        let tree = self.tree(table)?;
        self.wal.append(&WalRecord::delete(table, key))?;
        let mut tree = tree.lock();
        if tree.delete(key) {
            self.catalog.decrement_row_count(table);
        }
        self.flush_tree(table, &mut tree)
    }

    /// Read-only lookup. An unknown table reads as absent, not as an
    /// error; only the SQL SELECT path turns absence into a failure.
    pub fn get(&self, table: &str, key: i32) -> Result<Option<String>> {
        let tree = match self.tree(table) {
            Ok(tree) => tree,
            Err(StorageError::TableMissing(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let tree = tree.lock();
        Ok(tree.search(key).map(str::to_string))
    }

    /// Serializes the table's tree to its pages and persists the catalog.
    pub fn flush(&self, table: &str) -> Result<()> {
        let tree = self.tree(table)?;
        let mut tree = tree.lock();
        self.flush_tree(table, &mut tree)
    }

    /// Loads the catalog, materializes every table's tree from disk, then
    /// replays the WAL over the in-memory trees. Records for unknown
    /// tables are skipped.
    pub fn load(&self) -> Result<()> {
        self.catalog.load()?;
        {
            let mut trees = self.trees.write();
            trees.clear();
            self.table_pages.lock().clear();
            for (name, meta) in self.catalog.all() {
                let tree = self.materialize(&meta)?;
                trees.insert(name, Arc::new(Mutex::new(tree)));
            }
        }

        for record in self.wal.replay()? {
            let tree = self.trees.read().get(&record.table).cloned();
            let Some(tree) = tree else {
                crate::keystone_debug_log!(
                    "[KvStore::load] Skipping WAL record for unknown table {}",
                    record.table
                );
                continue;
            };
            let mut tree = tree.lock();
            match record.op {
                WalOp::Put => {
                    let value = record.value.unwrap_or_default();
                    if tree.insert(record.key, value) {
                        self.catalog.increment_row_count(&record.table);
                    }
                }
                WalOp::Delete => {
                    if tree.delete(record.key) {
                        self.catalog.decrement_row_count(&record.table);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn begin_transaction(self: &Arc<Self>) -> Transaction {
        Transaction::new(Arc::clone(self))
    }

    /// Spawns the background flusher. Each tick it snapshots the open
    /// table set under a read lock and flushes the tables in arbitrary
    /// order. The worker exits when the store closes.
    pub fn start_periodic_flush(self: &Arc<Self>, interval: Duration) {
        let store = Arc::clone(self);
        let stop = Arc::clone(&self.stop_flusher);
        let handle = thread::spawn(move || {
            let tick = Duration::from_millis(50).min(interval);
            let mut elapsed = Duration::ZERO;
            while !stop.load(Ordering::SeqCst) {
                thread::sleep(tick);
                elapsed += tick;
                if elapsed < interval {
                    continue;
                }
                elapsed = Duration::ZERO;
                let tables: Vec<String> = store.trees.read().keys().cloned().collect();
                for table in tables {
                    if let Err(e) = store.flush(&table) {
                        eprintln!("warning: periodic flush of table {table} failed: {e}");
                    }
                }
            }
        });
        *self.flusher.lock() = Some(handle);
    }

    /// Stops the flusher, closes the WAL and the disk manager, and
    /// releases the in-memory trees.
    pub fn close(&self) -> Result<()> {
        self.stop_flusher.store(true, Ordering::SeqCst);
        if let Some(handle) = self.flusher.lock().take() {
            let _ = handle.join();
        }
        self.wal.close()?;
        self.disk.close()?;
        self.trees.write().clear();
        self.table_pages.lock().clear();
        Ok(())
    }

    /// Returns the in-memory tree for `table`, materializing it from its
    /// root page on first touch.
    fn tree(&self, table: &str) -> Result<Arc<Mutex<BTree>>> {
        if let Some(tree) = self.trees.read().get(table) {
            return Ok(Arc::clone(tree));
        }
        let meta = self
            .catalog
            .get(table)
            .ok_or_else(|| StorageError::TableMissing(table.to_string()))?;
        let tree = Arc::new(Mutex::new(self.materialize(&meta)?));
        let mut trees = self.trees.write();
        // Another thread may have materialized it in the meantime.
        let entry = trees
            .entry(meta.name.clone())
            .or_insert_with(|| Arc::clone(&tree));
        Ok(Arc::clone(entry))
    }

    fn materialize(&self, meta: &TableMetadata) -> Result<BTree> {
        let root_page = match self.disk.read_page(meta.root_id) {
            Ok(page) => page,
            Err(StorageError::PageNotFound(_)) => {
                // The root page never reached the disk; start empty and let
                // WAL replay fill the tree back in.
                let mut tree = BTree::new(meta.degree.max(2) as usize);
                tree.root_mut().id = meta.root_id;
                return Ok(tree);
            }
            Err(e) => return Err(e),
        };

        let disk = Arc::clone(&self.disk);
        let mut fetch = move |id: PageId| -> Result<Vec<u8>> {
            Ok(disk.read_page(id)?.data.to_vec())
        };
        let tree = BTree::deserialize(&root_page.data, &mut fetch)?;

        let mut ids = HashSet::new();
        collect_node_ids(tree.root(), &mut ids);
        ids.remove(&btree::UNASSIGNED_NODE_ID);
        self.table_pages.lock().insert(meta.name.clone(), ids);
        Ok(tree)
    }

    /// Writes every node of the tree to its page, recycling pages whose
    /// nodes vanished since the last flush, then persists the catalog.
    fn flush_tree(&self, table: &str, tree: &mut BTree) -> Result<()> {
        let meta = self
            .catalog
            .get(table)
            .ok_or_else(|| StorageError::TableMissing(table.to_string()))?;
        // The root always lives on the page the catalog points at.
        tree.root_mut().id = meta.root_id;
        assign_node_pages(tree.root_mut(), self.disk.as_ref())?;

        let mut live = HashSet::new();
        collect_node_ids(tree.root(), &mut live);
        write_nodes(tree.root(), self.disk.as_ref())?;

        let previous = self
            .table_pages
            .lock()
            .insert(table.to_string(), live.clone())
            .unwrap_or_default();
        for id in previous.difference(&live) {
            self.disk.free_page(*id);
        }
        self.catalog.save()
    }
}

fn assign_node_pages(node: &mut Node, disk: &dyn PageStore) -> Result<()> {
    for child in &mut node.children {
        if child.id == btree::UNASSIGNED_NODE_ID {
            child.id = disk.allocate_page()?.id;
        }
        assign_node_pages(child, disk)?;
    }
    Ok(())
}

fn write_nodes(node: &Node, disk: &dyn PageStore) -> Result<()> {
    let bytes = btree::serialize_node(node);
    if bytes.len() > PAGE_SIZE {
        return Err(StorageError::InvalidValue(format!(
            "node {} serializes to {} bytes, over the page size",
            node.id(),
            bytes.len()
        )));
    }
    disk.write_page(&Page::from_bytes(node.id(), &bytes))?;
    for child in node.children() {
        write_nodes(child, disk)?;
    }
    Ok(())
}

fn collect_node_ids(node: &Node, ids: &mut HashSet<PageId>) {
    ids.insert(node.id());
    for child in node.children() {
        collect_node_ids(child, ids);
    }
}
