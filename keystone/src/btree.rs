//! B-Tree index implementation.
//!
//! An in-memory balanced n-ary tree mapping `i32` keys to string values.
//! Nodes own their children directly; there are no parent pointers, path
//! state lives on the recursion stack. Each node serializes into one page,
//! children are referenced by page id only, and deserialization fetches
//! child pages through an injected function so the tree stays ignorant of
//! the storage medium.

use bytes::{Buf, BufMut, BytesMut};

use crate::errors::{Result, StorageError};
use crate::PageId;

pub type Key = i32;

/// Node id meaning "not yet assigned to a page". Page 0 always holds the
/// catalog, so 0 can never be a real node page.
pub const UNASSIGNED_NODE_ID: PageId = 0;

#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: PageId,
    pub(crate) keys: Vec<Key>,
    pub(crate) values: Vec<String>,
    pub(crate) children: Vec<Node>,
    pub(crate) is_leaf: bool,
    pub(crate) degree: usize,
}

impl Node {
    fn new_leaf(degree: usize) -> Self {
        Node {
            id: UNASSIGNED_NODE_ID,
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
            is_leaf: true,
            degree,
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }
}

/// A balanced n-ary tree of minimum degree `t >= 2`: every non-root node
/// carries between `t-1` and `2t-1` keys and all leaves share one depth.
#[derive(Debug)]
pub struct BTree {
    root: Node,
    degree: usize,
}

impl BTree {
    /// Creates an empty tree. A degree below 2 is rounded up to 2.
    pub fn new(degree: usize) -> Self {
        let degree = degree.max(2);
        BTree {
            root: Node::new_leaf(degree),
            degree,
        }
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub(crate) fn root_mut(&mut self) -> &mut Node {
        &mut self.root
    }

    /// Inserts a key-value pair, replacing the value in place when the key
    /// already exists. Returns `true` when the key was new.
    pub fn insert(&mut self, key: Key, value: String) -> bool {
        if self.root.keys.len() == 2 * self.degree - 1 {
            // Pre-emptive split on the way down: grow a new root whose only
            // child is the old root. The new root inherits the old root's
            // page id so a table's root page never moves; the demoted node
            // is assigned a fresh page at the next flush.
            let new_root = Node {
                id: self.root.id,
                keys: Vec::new(),
                values: Vec::new(),
                children: Vec::new(),
                is_leaf: false,
                degree: self.degree,
            };
            let old_root = std::mem::replace(&mut self.root, new_root);
            self.root.children.push(old_root);
            self.root.children[0].id = UNASSIGNED_NODE_ID;
            split_child(&mut self.root, 0, self.degree);
        }
        insert_non_full(&mut self.root, key, value, self.degree)
    }

    /// Standard read-only descent.
    pub fn search(&self, key: Key) -> Option<&str> {
        let mut node = &self.root;
        loop {
            match node.keys.binary_search(&key) {
                Ok(idx) => return Some(&node.values[idx]),
                Err(idx) => {
                    if node.is_leaf {
                        return None;
                    }
                    node = &node.children[idx];
                }
            }
        }
    }

    /// Removes the key if present; a no-op otherwise. Returns whether the
    /// key was present.
    pub fn delete(&mut self, key: Key) -> bool {
        let removed = remove_from(&mut self.root, key, self.degree);
        if self.root.keys.is_empty() && !self.root.is_leaf && !self.root.children.is_empty() {
            // A key-less root promotes its sole child, which takes over the
            // root's page id; the child's old page is recycled at flush.
            let mut child = self.root.children.remove(0);
            child.id = self.root.id;
            self.root = child;
        }
        removed
    }

    pub fn len(&self) -> usize {
        fn count(node: &Node) -> usize {
            node.keys.len() + node.children.iter().map(count).sum::<usize>()
        }
        count(&self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.root.keys.is_empty()
    }

    /// Serialized form of the root node.
    pub fn serialize(&self) -> Vec<u8> {
        serialize_node(&self.root)
    }

    /// Rebuilds a tree from its root page bytes, fetching every referenced
    /// child page through `fetch`.
    pub fn deserialize<F>(root_bytes: &[u8], fetch: &mut F) -> Result<BTree>
    where
        F: FnMut(PageId) -> Result<Vec<u8>>,
    {
        let root = deserialize_node(root_bytes, fetch)?;
        let degree = root.degree;
        Ok(BTree { root, degree })
    }
}

fn insert_non_full(node: &mut Node, key: Key, value: String, degree: usize) -> bool {
    match node.keys.binary_search(&key) {
        Ok(idx) => {
            node.values[idx] = value;
            false
        }
        Err(mut idx) => {
            if node.is_leaf {
                node.keys.insert(idx, key);
                node.values.insert(idx, value);
                true
            } else {
                if node.children[idx].keys.len() == 2 * degree - 1 {
                    split_child(node, idx, degree);
                    // The median moved up into this node; re-aim.
                    match node.keys[idx].cmp(&key) {
                        std::cmp::Ordering::Less => idx += 1,
                        std::cmp::Ordering::Equal => {
                            node.values[idx] = value;
                            return false;
                        }
                        std::cmp::Ordering::Greater => {}
                    }
                }
                insert_non_full(&mut node.children[idx], key, value, degree)
            }
        }
    }
}

/// Splits the full child at `child_index`, hoisting its median key into
/// the parent and its upper half into a new right sibling.
fn split_child(parent: &mut Node, child_index: usize, degree: usize) {
    let mid = degree - 1;
    let child = &mut parent.children[child_index];
    let median_key = child.keys.remove(mid);
    let median_value = child.values.remove(mid);
    let right_keys = child.keys.split_off(mid);
    let right_values = child.values.split_off(mid);
    let right_children = if child.is_leaf {
        Vec::new()
    } else {
        child.children.split_off(mid + 1)
    };
    let right = Node {
        id: UNASSIGNED_NODE_ID,
        keys: right_keys,
        values: right_values,
        children: right_children,
        is_leaf: child.is_leaf,
        degree,
    };
    parent.keys.insert(child_index, median_key);
    parent.values.insert(child_index, median_value);
    parent.children.insert(child_index + 1, right);
}

fn remove_from(node: &mut Node, key: Key, degree: usize) -> bool {
    match node.keys.binary_search(&key) {
        Ok(idx) => {
            if node.is_leaf {
                node.keys.remove(idx);
                node.values.remove(idx);
                true
            } else {
                remove_from_internal(node, idx, degree)
            }
        }
        Err(idx) => {
            if node.is_leaf {
                return false;
            }
            if node.children[idx].keys.len() < degree {
                // Pre-emptive rebalance: every node entered below has at
                // least `degree` keys. The fill may shuffle separators and
                // children, so resolve the descent index afresh.
                fill_child(node, idx, degree);
                return remove_from(node, key, degree);
            }
            remove_from(&mut node.children[idx], key, degree)
        }
    }
}

/// Removes `node.keys[idx]` from an internal node, replacing it with its
/// in-order predecessor or successor when a flanking child can spare a
/// key, merging otherwise.
fn remove_from_internal(node: &mut Node, idx: usize, degree: usize) -> bool {
    let key = node.keys[idx];
    if node.children[idx].keys.len() >= degree {
        let (pred_key, pred_value) = predecessor(&node.children[idx]);
        node.keys[idx] = pred_key;
        node.values[idx] = pred_value;
        remove_from(&mut node.children[idx], pred_key, degree);
    } else if node.children[idx + 1].keys.len() >= degree {
        let (succ_key, succ_value) = successor(&node.children[idx + 1]);
        node.keys[idx] = succ_key;
        node.values[idx] = succ_value;
        remove_from(&mut node.children[idx + 1], succ_key, degree);
    } else {
        merge_children(node, idx);
        remove_from(&mut node.children[idx], key, degree);
    }
    true
}

fn predecessor(node: &Node) -> (Key, String) {
    let mut current = node;
    while !current.is_leaf {
        current = &current.children[current.children.len() - 1];
    }
    let last = current.keys.len() - 1;
    (current.keys[last], current.values[last].clone())
}

fn successor(node: &Node) -> (Key, String) {
    let mut current = node;
    while !current.is_leaf {
        current = &current.children[0];
    }
    (current.keys[0], current.values[0].clone())
}

/// Brings the child at `idx` up to `degree` keys before descending into
/// it: borrow from the left sibling, else from the right, else merge
/// (with the left sibling when one exists, the right otherwise).
fn fill_child(node: &mut Node, idx: usize, degree: usize) {
    if idx > 0 && node.children[idx - 1].keys.len() >= degree {
        borrow_from_left(node, idx);
    } else if idx + 1 < node.children.len() && node.children[idx + 1].keys.len() >= degree {
        borrow_from_right(node, idx);
    } else if idx > 0 {
        merge_children(node, idx - 1);
    } else {
        merge_children(node, idx);
    }
}

fn borrow_from_left(node: &mut Node, idx: usize) {
    let (sibling_key, sibling_value, sibling_child) = {
        let sibling = &mut node.children[idx - 1];
        let last = sibling.keys.len() - 1;
        let key = sibling.keys.remove(last);
        let value = sibling.values.remove(last);
        let child = if sibling.is_leaf {
            None
        } else {
            Some(sibling.children.remove(sibling.children.len() - 1))
        };
        (key, value, child)
    };
    // Rotate: sibling's last key up into the separator slot, the old
    // separator down into the child's front.
    let sep_key = std::mem::replace(&mut node.keys[idx - 1], sibling_key);
    let sep_value = std::mem::replace(&mut node.values[idx - 1], sibling_value);
    let child = &mut node.children[idx];
    child.keys.insert(0, sep_key);
    child.values.insert(0, sep_value);
    if let Some(grandchild) = sibling_child {
        child.children.insert(0, grandchild);
    }
}

fn borrow_from_right(node: &mut Node, idx: usize) {
    let (sibling_key, sibling_value, sibling_child) = {
        let sibling = &mut node.children[idx + 1];
        let key = sibling.keys.remove(0);
        let value = sibling.values.remove(0);
        let child = if sibling.is_leaf {
            None
        } else {
            Some(sibling.children.remove(0))
        };
        (key, value, child)
    };
    let sep_key = std::mem::replace(&mut node.keys[idx], sibling_key);
    let sep_value = std::mem::replace(&mut node.values[idx], sibling_value);
    let child = &mut node.children[idx];
    child.keys.push(sep_key);
    child.values.push(sep_value);
    if let Some(grandchild) = sibling_child {
        child.children.push(grandchild);
    }
}

/// Folds `children[idx]`, the separator `keys[idx]` and `children[idx+1]`
/// into a single node at `idx`.
fn merge_children(node: &mut Node, idx: usize) {
    let sep_key = node.keys.remove(idx);
    let sep_value = node.values.remove(idx);
    let mut right = node.children.remove(idx + 1);
    let left = &mut node.children[idx];
    left.keys.push(sep_key);
    left.values.push(sep_value);
    left.keys.append(&mut right.keys);
    left.values.append(&mut right.values);
    if !left.is_leaf {
        left.children.append(&mut right.children);
    }
}

/// Serializes one node in the page wire format:
/// `id, is_leaf, degree, num_keys, keys, {value_len, value}*, num_children,
/// child_ids` — all integers little-endian.
pub fn serialize_node(node: &Node) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(64 + node.keys.len() * 8);
    buf.put_i32_le(node.id);
    buf.put_u8(node.is_leaf as u8);
    buf.put_i32_le(node.degree as i32);
    buf.put_i32_le(node.keys.len() as i32);
    for key in &node.keys {
        buf.put_i32_le(*key);
    }
    for value in &node.values {
        buf.put_i32_le(value.len() as i32);
        buf.put_slice(value.as_bytes());
    }
    buf.put_i32_le(node.children.len() as i32);
    for child in &node.children {
        buf.put_i32_le(child.id);
    }
    buf.to_vec()
}

/// Reconstructs one node and, recursively, its children via `fetch`.
pub fn deserialize_node<F>(data: &[u8], fetch: &mut F) -> Result<Node>
where
    F: FnMut(PageId) -> Result<Vec<u8>>,
{
    let mut buf = data;
    let id = read_i32(&mut buf, "node id")?;
    let is_leaf = read_u8(&mut buf, "leaf flag")? != 0;
    let degree = read_i32(&mut buf, "degree")?;
    if degree < 2 {
        return Err(StorageError::Corrupted(format!(
            "node {id} has degree {degree}"
        )));
    }
    let num_keys = read_len(&mut buf, "key count")?;

    let mut keys = Vec::with_capacity(num_keys);
    for _ in 0..num_keys {
        keys.push(read_i32(&mut buf, "key")?);
    }

    let mut values = Vec::with_capacity(num_keys);
    for _ in 0..num_keys {
        let len = read_len(&mut buf, "value length")?;
        if buf.remaining() < len {
            return Err(StorageError::Corrupted(format!(
                "node {id} value truncated at {len} bytes"
            )));
        }
        let raw = buf[..len].to_vec();
        buf.advance(len);
        let value = String::from_utf8(raw)
            .map_err(|e| StorageError::Corrupted(format!("node {id} value not utf-8: {e}")))?;
        values.push(value);
    }

    let num_children = read_len(&mut buf, "child count")?;
    let mut children = Vec::with_capacity(num_children);
    if !is_leaf {
        for _ in 0..num_children {
            let child_id = read_i32(&mut buf, "child id")?;
            let child_data = fetch(child_id)?;
            children.push(deserialize_node(&child_data, fetch)?);
        }
    }

    Ok(Node {
        id,
        keys,
        values,
        children,
        is_leaf,
        degree: degree as usize,
    })
}

fn read_i32(buf: &mut &[u8], what: &str) -> Result<i32> {
    if buf.remaining() < 4 {
        return Err(StorageError::Corrupted(format!("truncated {what}")));
    }
    Ok(buf.get_i32_le())
}

fn read_u8(buf: &mut &[u8], what: &str) -> Result<u8> {
    if !buf.has_remaining() {
        return Err(StorageError::Corrupted(format!("truncated {what}")));
    }
    Ok(buf.get_u8())
}

fn read_len(buf: &mut &[u8], what: &str) -> Result<usize> {
    let raw = read_i32(buf, what)?;
    if raw < 0 {
        return Err(StorageError::Corrupted(format!("negative {what}: {raw}")));
    }
    Ok(raw as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::{BTreeMap, HashMap};

    /// Verifies the structural invariants: strictly ascending keys inside
    /// each node and across subtrees, per-node occupancy bounds, and a
    /// single depth shared by every leaf.
    fn check_invariants(tree: &BTree) {
        let mut leaf_depth = None;
        check_node(
            &tree.root,
            tree.degree,
            true,
            0,
            &mut leaf_depth,
            None,
            None,
        );
    }

    fn check_node(
        node: &Node,
        degree: usize,
        is_root: bool,
        depth: usize,
        leaf_depth: &mut Option<usize>,
        lower: Option<Key>,
        upper: Option<Key>,
    ) {
        assert_eq!(node.keys.len(), node.values.len());
        if !is_root {
            assert!(
                node.keys.len() >= degree - 1,
                "underfull node: {} keys, degree {degree}",
                node.keys.len()
            );
        }
        assert!(
            node.keys.len() <= 2 * degree - 1,
            "overfull node: {} keys, degree {degree}",
            node.keys.len()
        );
        for pair in node.keys.windows(2) {
            assert!(pair[0] < pair[1], "keys not strictly ascending: {pair:?}");
        }
        for key in &node.keys {
            if let Some(lo) = lower {
                assert!(*key > lo);
            }
            if let Some(hi) = upper {
                assert!(*key < hi);
            }
        }
        if node.is_leaf {
            assert!(node.children.is_empty());
            match leaf_depth {
                Some(expected) => assert_eq!(depth, *expected, "leaves at different depths"),
                None => *leaf_depth = Some(depth),
            }
        } else {
            assert_eq!(node.children.len(), node.keys.len() + 1);
            for (i, child) in node.children.iter().enumerate() {
                let lo = if i == 0 { lower } else { Some(node.keys[i - 1]) };
                let hi = if i == node.keys.len() {
                    upper
                } else {
                    Some(node.keys[i])
                };
                check_node(child, degree, false, depth + 1, leaf_depth, lo, hi);
            }
        }
    }

    #[test]
    fn insert_and_search() {
        let mut tree = BTree::new(3);
        assert!(tree.insert(1, "rafael".to_string()));
        assert!(tree.insert(2, "joao".to_string()));

        assert_eq!(tree.search(1), Some("rafael"));
        assert_eq!(tree.search(2), Some("joao"));
        assert_eq!(tree.search(3), None);
    }

    #[test]
    fn insert_replaces_value_in_place() {
        let mut tree = BTree::new(2);
        assert!(tree.insert(1, "one".to_string()));
        assert!(!tree.insert(1, "uno".to_string()));
        assert_eq!(tree.search(1), Some("uno"));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn replace_reaches_keys_held_in_internal_nodes() {
        let mut tree = BTree::new(2);
        for k in 0..20 {
            tree.insert(k, format!("v{k}"));
        }
        check_invariants(&tree);
        assert!(!tree.root.is_leaf);

        // Overwrite every key, including the separators living in internal
        // nodes, and make sure nothing was duplicated.
        for k in 0..20 {
            assert!(!tree.insert(k, format!("new{k}")));
        }
        assert_eq!(tree.len(), 20);
        for k in 0..20 {
            assert_eq!(tree.search(k), Some(format!("new{k}").as_str()));
        }
        check_invariants(&tree);
    }

    #[test]
    fn empty_string_is_a_valid_value() {
        let mut tree = BTree::new(2);
        assert!(tree.insert(5, String::new()));
        assert_eq!(tree.search(5), Some(""));
    }

    #[test]
    fn degree_below_two_rounds_up() {
        let tree = BTree::new(0);
        assert_eq!(tree.degree(), 2);
    }

    #[test]
    fn sequential_inserts_stay_balanced() {
        let mut tree = BTree::new(2);
        for k in 0..100 {
            tree.insert(k, k.to_string());
            check_invariants(&tree);
        }
        for k in 0..100 {
            assert_eq!(tree.search(k), Some(k.to_string().as_str()));
        }
    }

    #[test]
    fn delete_even_keys_keeps_odd_keys() {
        let mut tree = BTree::new(3);
        for k in 0..100 {
            tree.insert(k, k.to_string());
        }
        for k in (0..100).step_by(2) {
            assert!(tree.delete(k));
            check_invariants(&tree);
        }
        for k in 0..100 {
            if k % 2 == 0 {
                assert_eq!(tree.search(k), None);
            } else {
                assert_eq!(tree.search(k), Some(k.to_string().as_str()));
            }
        }
    }

    #[test]
    fn delete_missing_key_is_a_noop() {
        let mut tree = BTree::new(2);
        tree.insert(1, "one".to_string());
        assert!(!tree.delete(999));
        assert_eq!(tree.search(1), Some("one"));
    }

    #[test]
    fn delete_everything_empties_the_tree() {
        let mut tree = BTree::new(2);
        for k in 0..50 {
            tree.insert(k, k.to_string());
        }
        // Reverse order exercises the left-merge path.
        for k in (0..50).rev() {
            assert!(tree.delete(k));
            check_invariants(&tree);
        }
        assert!(tree.is_empty());
        assert!(tree.root.is_leaf);
    }

    #[test]
    fn random_interleaving_matches_a_model() {
        let mut rng = rand::thread_rng();
        let mut tree = BTree::new(2);
        let mut model: BTreeMap<Key, String> = BTreeMap::new();

        for _ in 0..2000 {
            let key = rng.gen_range(0..300);
            if rng.gen_bool(0.6) {
                let value = format!("v{key}-{}", rng.gen_range(0..10));
                assert_eq!(
                    tree.insert(key, value.clone()),
                    model.insert(key, value).is_none()
                );
            } else {
                assert_eq!(tree.delete(key), model.remove(&key).is_some());
            }
        }
        check_invariants(&tree);
        for key in 0..300 {
            assert_eq!(tree.search(key), model.get(&key).map(String::as_str));
        }
    }

    /// Assigns sequential fake page ids so the tree can be serialized one
    /// node per "page" into a map.
    fn assign_test_ids(node: &mut Node, next: &mut PageId) {
        node.id = *next;
        *next += 1;
        for child in &mut node.children {
            assign_test_ids(child, next);
        }
    }

    fn store_nodes(node: &Node, pages: &mut HashMap<PageId, Vec<u8>>) {
        pages.insert(node.id, serialize_node(node));
        for child in &node.children {
            store_nodes(child, pages);
        }
    }

    #[test]
    fn multi_node_serialize_roundtrip() {
        let mut tree = BTree::new(2);
        for k in 0..50 {
            tree.insert(k, format!("value-{k}"));
        }
        let mut next = 1;
        assign_test_ids(&mut tree.root, &mut next);

        let mut pages = HashMap::new();
        store_nodes(&tree.root, &mut pages);

        let root_bytes = tree.serialize();
        let mut fetch = |id: PageId| -> Result<Vec<u8>> {
            pages
                .get(&id)
                .cloned()
                .ok_or(StorageError::PageNotFound(id))
        };
        let restored = BTree::deserialize(&root_bytes, &mut fetch).unwrap();

        assert_eq!(restored.degree(), 2);
        check_invariants(&restored);
        for k in 0..50 {
            assert_eq!(restored.search(k), Some(format!("value-{k}").as_str()));
        }
    }

    #[test]
    fn root_keeps_its_page_id_across_growth_and_shrink() {
        let mut tree = BTree::new(2);
        tree.root.id = 42;

        for k in 0..30 {
            tree.insert(k, k.to_string());
        }
        assert!(!tree.root.is_leaf);
        assert_eq!(tree.root.id, 42);
        // The demoted old root must not still claim the root's page.
        fn no_child_claims(node: &Node, root_id: PageId) {
            for child in &node.children {
                assert_ne!(child.id, root_id);
                no_child_claims(child, root_id);
            }
        }
        no_child_claims(&tree.root, 42);

        for k in 0..30 {
            tree.delete(k);
        }
        assert!(tree.is_empty());
        assert_eq!(tree.root.id, 42);
    }

    #[test]
    fn deserialize_rejects_truncated_bytes() {
        let mut tree = BTree::new(2);
        tree.insert(1, "one".to_string());
        let bytes = tree.serialize();

        let mut fetch = |id: PageId| -> Result<Vec<u8>> { Err(StorageError::PageNotFound(id)) };
        let err = BTree::deserialize(&bytes[..6], &mut fetch).unwrap_err();
        assert!(matches!(err, StorageError::Corrupted(_)));
    }

    #[test]
    fn deserialize_surfaces_fetch_failures() {
        let mut tree = BTree::new(2);
        for k in 0..20 {
            tree.insert(k, k.to_string());
        }
        let mut next = 1;
        assign_test_ids(&mut tree.root, &mut next);
        let root_bytes = tree.serialize();

        // No child pages available at all.
        let mut fetch = |id: PageId| -> Result<Vec<u8>> { Err(StorageError::PageNotFound(id)) };
        let err = BTree::deserialize(&root_bytes, &mut fetch).unwrap_err();
        assert!(matches!(err, StorageError::PageNotFound(_)));
    }
}
