//! B+ tree search, insertion, deletion, and scans.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicI32, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::debug;

use opal_buffer::{BufferPoolManager, PageGuard};
use opal_common::error::{DbError, Result};
use opal_common::page::{PageId, INDEX_ROOTS_PAGE_ID, INVALID_PAGE_ID, PAGE_SIZE};
use opal_common::types::TxnId;

use crate::record::RowId;

use super::iterator::TreeIterator;
use super::key::KeyCodec;
use super::node::{self, InternalNode, LeafNode};
use super::roots::IndexRoots;

/// Comparison operator for [`BPlusTree::scan_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A B+ tree index whose nodes are buffer-pool pages.
///
/// Keys are unique, fixed width, and compared by the tree's [`KeyCodec`].
/// The current root page id is mirrored into the index-roots directory
/// (page 0) on every root change. Operations are not reentrant: one
/// operation per tree handle at a time.
pub struct BPlusTree {
    index_id: u32,
    bpm: Arc<BufferPoolManager>,
    codec: KeyCodec,
    leaf_max_size: usize,
    internal_max_size: usize,
    root_page_id: AtomicI32,
}

impl BPlusTree {
    /// Opens the tree handle for `index_id`, reading the current root
    /// from the index-roots directory (absent entry = empty tree).
    ///
    /// `None` size overrides derive node capacities from `PAGE_SIZE`;
    /// tests pass small explicit fan-outs.
    pub fn new(
        index_id: u32,
        bpm: Arc<BufferPoolManager>,
        codec: KeyCodec,
        leaf_max_size: Option<usize>,
        internal_max_size: Option<usize>,
    ) -> Result<Self> {
        let leaf_max_size =
            leaf_max_size.unwrap_or_else(|| LeafNode::derived_max_size(PAGE_SIZE, codec.key_size()));
        let internal_max_size = internal_max_size
            .unwrap_or_else(|| InternalNode::derived_max_size(PAGE_SIZE, codec.key_size()));

        let root_page_id = {
            let guard = bpm.fetch_page(INDEX_ROOTS_PAGE_ID)?;
            let page = guard.read();
            IndexRoots::get(&page, index_id).unwrap_or(INVALID_PAGE_ID)
        };

        Ok(Self {
            index_id,
            bpm,
            codec,
            leaf_max_size,
            internal_max_size,
            root_page_id: AtomicI32::new(root_page_id),
        })
    }

    /// The index this tree belongs to.
    pub fn index_id(&self) -> u32 {
        self.index_id
    }

    /// The tree's key codec.
    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    /// Current root page id (`INVALID_PAGE_ID` when empty).
    pub fn root_page_id(&self) -> PageId {
        self.root_page_id.load(AtomicOrdering::Acquire)
    }

    fn set_root(&self, page_id: PageId) {
        self.root_page_id.store(page_id, AtomicOrdering::Release);
    }

    /// Returns true if the tree holds no entries.
    pub fn is_empty(&self) -> bool {
        self.root_page_id() == INVALID_PAGE_ID
    }

    /// Mirrors the in-memory root id into the index-roots directory.
    fn update_root_page_id(&self) -> Result<()> {
        let guard = self.bpm.fetch_page(INDEX_ROOTS_PAGE_ID)?;
        let mut page = guard.write();
        IndexRoots::set(&mut page, self.index_id, self.root_page_id())?;
        debug!(
            index_id = self.index_id,
            root = self.root_page_id(),
            "recorded root page"
        );
        Ok(())
    }

    /// Descends to the leaf that owns `key` (or the leftmost leaf),
    /// unpinning every internal node on the way down. The returned
    /// guard keeps the leaf pinned.
    fn find_leaf(&self, key: Option<&[u8]>, leftmost: bool) -> Result<PageGuard<'_>> {
        let mut page_id = self.root_page_id();
        loop {
            let guard = self.bpm.fetch_page(page_id)?;
            let child = {
                let page = guard.read();
                if node::is_leaf(&page) {
                    None
                } else if leftmost {
                    Some(InternalNode::value_at(&page, 0))
                } else {
                    let key = key.ok_or_else(|| {
                        DbError::Internal("keyed descent requires a key".into())
                    })?;
                    Some(InternalNode::lookup(&page, key, &self.codec))
                }
            };
            match child {
                None => return Ok(guard),
                Some(child) => page_id = child,
            }
        }
    }

    /// Point lookup.
    pub fn get_value(&self, key: &[u8]) -> Result<Option<RowId>> {
        if self.is_empty() {
            return Ok(None);
        }
        let guard = self.find_leaf(Some(key), false)?;
        let page = guard.read();
        Ok(LeafNode::lookup(&page, key, &self.codec))
    }

    /// Inserts `key -> rid`. Returns false (and changes nothing) if the
    /// key is already present.
    pub fn insert(&self, key: &[u8], rid: RowId, _txn: TxnId) -> Result<bool> {
        if key.len() != self.codec.key_size() {
            return Err(DbError::Internal(format!(
                "key width {} does not match index key width {}",
                key.len(),
                self.codec.key_size()
            )));
        }

        if self.is_empty() {
            self.start_new_tree(key, rid)?;
            return Ok(true);
        }

        let leaf_guard = self.find_leaf(Some(key), false)?;
        {
            let page = leaf_guard.read();
            if LeafNode::lookup(&page, key, &self.codec).is_some() {
                return Ok(false);
            }
        }

        let (new_size, max_size) = {
            let mut page = leaf_guard.write();
            let new_size = LeafNode::insert(&mut page, key, rid, &self.codec)?;
            (new_size, node::max_size(&page))
        };
        if new_size > max_size {
            self.split_leaf(&leaf_guard)?;
        }
        Ok(true)
    }

    /// Creates the root leaf for the first insertion.
    fn start_new_tree(&self, key: &[u8], rid: RowId) -> Result<()> {
        let guard = self.bpm.new_page()?;
        let page_id = guard.page_id();
        {
            let mut page = guard.write();
            LeafNode::init(
                &mut page,
                page_id,
                INVALID_PAGE_ID,
                self.codec.key_size(),
                self.leaf_max_size,
            );
            LeafNode::insert(&mut page, key, rid, &self.codec)?;
        }
        self.set_root(page_id);
        self.update_root_page_id()
    }

    /// Splits an over-full leaf, linking the new right sibling into the
    /// chain and pushing the separator into the parent.
    fn split_leaf(&self, leaf_guard: &PageGuard<'_>) -> Result<()> {
        let new_guard = self.bpm.new_page()?;
        let new_page_id = new_guard.page_id();

        let separator = {
            let mut leaf = leaf_guard.write();
            let mut new_page = new_guard.write();
            LeafNode::init(
                &mut new_page,
                new_page_id,
                node::parent_id(&leaf),
                self.codec.key_size(),
                self.leaf_max_size,
            );
            LeafNode::set_next_page_id(&mut new_page, LeafNode::next_page_id(&leaf));
            LeafNode::set_next_page_id(&mut leaf, new_page_id);
            LeafNode::move_half_to(&mut leaf, &mut new_page);
            LeafNode::key_at(&new_page, 0).to_vec()
        };
        debug!(
            index_id = self.index_id,
            left = leaf_guard.page_id(),
            right = new_page_id,
            "split leaf"
        );
        self.insert_into_parent(leaf_guard.page_id(), &separator, new_page_id)
    }

    /// Splits an over-full internal node and pushes the promoted key
    /// into the parent. Moved children are re-adopted first.
    fn split_internal(&self, internal_guard: &PageGuard<'_>) -> Result<()> {
        let new_guard = self.bpm.new_page()?;
        let new_page_id = new_guard.page_id();

        let (promoted, moved_children) = {
            let mut page = internal_guard.write();
            let mut new_page = new_guard.write();
            InternalNode::init(
                &mut new_page,
                new_page_id,
                node::parent_id(&page),
                self.codec.key_size(),
                self.internal_max_size,
            );
            let moved = InternalNode::move_half_to(&mut page, &mut new_page);
            (InternalNode::key_at(&new_page, 0).to_vec(), moved)
        };
        for child in moved_children {
            let guard = self.bpm.fetch_page(child)?;
            node::set_parent_id(&mut guard.write(), new_page_id);
        }
        debug!(
            index_id = self.index_id,
            left = internal_guard.page_id(),
            right = new_page_id,
            "split internal node"
        );
        self.insert_into_parent(internal_guard.page_id(), &promoted, new_page_id)
    }

    /// Registers `new` (the right half of a split of `old`) under `old`'s
    /// parent, growing a new root when `old` was the root.
    fn insert_into_parent(&self, old: PageId, separator: &[u8], new: PageId) -> Result<()> {
        let parent_id = {
            let guard = self.bpm.fetch_page(old)?;
            let page = guard.read();
            node::parent_id(&page)
        };

        if parent_id == INVALID_PAGE_ID {
            let root_guard = self.bpm.new_page()?;
            let root_page_id = root_guard.page_id();
            {
                let mut page = root_guard.write();
                InternalNode::init(
                    &mut page,
                    root_page_id,
                    INVALID_PAGE_ID,
                    self.codec.key_size(),
                    self.internal_max_size,
                );
                InternalNode::populate_new_root(&mut page, old, separator, new);
            }
            for child in [old, new] {
                let guard = self.bpm.fetch_page(child)?;
                node::set_parent_id(&mut guard.write(), root_page_id);
            }
            self.set_root(root_page_id);
            return self.update_root_page_id();
        }

        let parent_guard = self.bpm.fetch_page(parent_id)?;
        let (new_size, max_size) = {
            let mut page = parent_guard.write();
            let new_size = InternalNode::insert_node_after(&mut page, old, separator, new)?;
            (new_size, node::max_size(&page))
        };
        {
            let guard = self.bpm.fetch_page(new)?;
            node::set_parent_id(&mut guard.write(), parent_id);
        }
        if new_size > max_size {
            self.split_internal(&parent_guard)?;
        }
        Ok(())
    }

    /// Removes `key`. Returns false if it was not present.
    pub fn remove(&self, key: &[u8], _txn: TxnId) -> Result<bool> {
        if self.is_empty() {
            return Ok(false);
        }
        let leaf_guard = self.find_leaf(Some(key), false)?;
        let leaf_page_id = leaf_guard.page_id();

        let index = {
            let page = leaf_guard.read();
            let index = LeafNode::key_index(&page, key, &self.codec);
            if index >= node::size(&page)
                || self.codec.compare(LeafNode::key_at(&page, index), key) != Ordering::Equal
            {
                return Ok(false);
            }
            index
        };

        let (size_after, min_size, is_root, new_first_key) = {
            let mut page = leaf_guard.write();
            let size_after = LeafNode::remove_at(&mut page, index);
            let new_first_key = if size_after > 0 {
                Some(LeafNode::key_at(&page, 0).to_vec())
            } else {
                None
            };
            (
                size_after,
                node::min_size(&page),
                node::parent_id(&page) == INVALID_PAGE_ID,
                new_first_key,
            )
        };

        // Deleting slot 0 invalidates the separator some ancestor holds
        // for this subtree.
        if !is_root && index == 0 {
            if let Some(first_key) = &new_first_key {
                self.fix_ancestor_separators(leaf_page_id, first_key)?;
            }
        }

        drop(leaf_guard);
        if size_after < min_size {
            self.coalesce_or_redistribute(leaf_page_id)?;
        }
        Ok(true)
    }

    /// Walks the ancestor chain and rewrites the separator that first
    /// names this subtree at a nonzero child index.
    fn fix_ancestor_separators(&self, child: PageId, new_first_key: &[u8]) -> Result<()> {
        let mut child = child;
        loop {
            let parent_id = {
                let guard = self.bpm.fetch_page(child)?;
                let page = guard.read();
                node::parent_id(&page)
            };
            if parent_id == INVALID_PAGE_ID {
                return Ok(());
            }
            let guard = self.bpm.fetch_page(parent_id)?;
            let index = {
                let page = guard.read();
                InternalNode::value_index(&page, child)
            };
            match index {
                Some(0) => child = parent_id,
                Some(index) => {
                    InternalNode::set_key_at(&mut guard.write(), index, new_first_key);
                    return Ok(());
                }
                None => {
                    return Err(DbError::Internal(format!(
                        "page {} missing from its parent {}",
                        child, parent_id
                    )))
                }
            }
        }
    }

    /// Repairs an under-full node by stealing from or merging with a
    /// sibling; cascades upward when the parent under-flows in turn.
    fn coalesce_or_redistribute(&self, node_page_id: PageId) -> Result<()> {
        let parent_id = {
            let guard = self.bpm.fetch_page(node_page_id)?;
            let page = guard.read();
            node::parent_id(&page)
        };
        if parent_id == INVALID_PAGE_ID {
            return self.adjust_root(node_page_id);
        }

        let parent_guard = self.bpm.fetch_page(parent_id)?;
        let (node_index, sibling_index, sibling_page_id) = {
            let page = parent_guard.read();
            let node_index = InternalNode::value_index(&page, node_page_id).ok_or_else(|| {
                DbError::Internal(format!(
                    "page {} missing from its parent {}",
                    node_page_id, parent_id
                ))
            })?;
            // Left sibling by default; right sibling only at index 0.
            let sibling_index = if node_index == 0 { 1 } else { node_index - 1 };
            (
                node_index,
                sibling_index,
                InternalNode::value_at(&page, sibling_index),
            )
        };

        let node_guard = self.bpm.fetch_page(node_page_id)?;
        let sibling_guard = self.bpm.fetch_page(sibling_page_id)?;
        let (node_size, sibling_size, max_size, is_leaf_node) = {
            let page = node_guard.read();
            let sibling = sibling_guard.read();
            (
                node::size(&page),
                node::size(&sibling),
                node::max_size(&page),
                node::is_leaf(&page),
            )
        };

        if node_size + sibling_size > max_size {
            return self.redistribute(
                &parent_guard,
                &node_guard,
                &sibling_guard,
                node_index,
                sibling_index,
                is_leaf_node,
            );
        }

        // Coalesce, always merging the right node into the left.
        let deleted_page_id = if node_index != 0 {
            // Sibling is the left neighbor: node empties into it.
            let middle_key = {
                let page = parent_guard.read();
                InternalNode::key_at(&page, node_index).to_vec()
            };
            let adopted = {
                let mut src = node_guard.write();
                let mut dst = sibling_guard.write();
                if is_leaf_node {
                    LeafNode::move_all_to(&mut src, &mut dst);
                    Vec::new()
                } else {
                    InternalNode::move_all_to(&mut src, &mut dst, &middle_key)
                }
            };
            for child in adopted {
                let guard = self.bpm.fetch_page(child)?;
                node::set_parent_id(&mut guard.write(), sibling_page_id);
            }
            InternalNode::remove(&mut parent_guard.write(), node_index);
            node_page_id
        } else {
            // Sibling is the right neighbor: it empties into node.
            let middle_key = {
                let page = parent_guard.read();
                InternalNode::key_at(&page, sibling_index).to_vec()
            };
            let adopted = {
                let mut src = sibling_guard.write();
                let mut dst = node_guard.write();
                if is_leaf_node {
                    LeafNode::move_all_to(&mut src, &mut dst);
                    Vec::new()
                } else {
                    InternalNode::move_all_to(&mut src, &mut dst, &middle_key)
                }
            };
            for child in adopted {
                let guard = self.bpm.fetch_page(child)?;
                node::set_parent_id(&mut guard.write(), node_page_id);
            }
            InternalNode::remove(&mut parent_guard.write(), sibling_index);
            sibling_page_id
        };

        let (parent_size, parent_min) = {
            let page = parent_guard.read();
            (node::size(&page), node::min_size(&page))
        };

        drop(node_guard);
        drop(sibling_guard);
        drop(parent_guard);
        self.bpm.delete_page(deleted_page_id)?;
        debug!(
            index_id = self.index_id,
            merged = deleted_page_id,
            "coalesced node"
        );

        if parent_size < parent_min {
            self.coalesce_or_redistribute(parent_id)?;
        }
        Ok(())
    }

    /// Moves exactly one pair from the sibling into the under-full node
    /// and patches the parent separator.
    fn redistribute(
        &self,
        parent_guard: &PageGuard<'_>,
        node_guard: &PageGuard<'_>,
        sibling_guard: &PageGuard<'_>,
        node_index: usize,
        sibling_index: usize,
        is_leaf_node: bool,
    ) -> Result<()> {
        let node_page_id = node_guard.page_id();

        if node_index == 0 {
            // Sibling is the right neighbor: take its first pair.
            if is_leaf_node {
                {
                    let mut src = sibling_guard.write();
                    let mut dst = node_guard.write();
                    LeafNode::move_first_to_end_of(&mut src, &mut dst);
                }
                let separator = {
                    let page = sibling_guard.read();
                    LeafNode::key_at(&page, 0).to_vec()
                };
                InternalNode::set_key_at(&mut parent_guard.write(), sibling_index, &separator);
            } else {
                let middle_key = {
                    let page = parent_guard.read();
                    InternalNode::key_at(&page, sibling_index).to_vec()
                };
                let moved_child = {
                    let mut src = sibling_guard.write();
                    let mut dst = node_guard.write();
                    InternalNode::move_first_to_end_of(&mut src, &mut dst, &middle_key)
                };
                {
                    let guard = self.bpm.fetch_page(moved_child)?;
                    node::set_parent_id(&mut guard.write(), node_page_id);
                }
                let separator = {
                    let page = sibling_guard.read();
                    InternalNode::key_at(&page, 0).to_vec()
                };
                InternalNode::set_key_at(&mut parent_guard.write(), sibling_index, &separator);
            }
        } else {
            // Sibling is the left neighbor: take its last pair.
            if is_leaf_node {
                {
                    let mut src = sibling_guard.write();
                    let mut dst = node_guard.write();
                    LeafNode::move_last_to_front_of(&mut src, &mut dst);
                }
                let separator = {
                    let page = node_guard.read();
                    LeafNode::key_at(&page, 0).to_vec()
                };
                InternalNode::set_key_at(&mut parent_guard.write(), node_index, &separator);
            } else {
                let middle_key = {
                    let page = parent_guard.read();
                    InternalNode::key_at(&page, node_index).to_vec()
                };
                let (donated_key, moved_child) = {
                    let mut src = sibling_guard.write();
                    let mut dst = node_guard.write();
                    InternalNode::move_last_to_front_of(&mut src, &mut dst, &middle_key)
                };
                {
                    let guard = self.bpm.fetch_page(moved_child)?;
                    node::set_parent_id(&mut guard.write(), node_page_id);
                }
                InternalNode::set_key_at(&mut parent_guard.write(), node_index, &donated_key);
            }
        }
        Ok(())
    }

    /// Shrinks the root: an empty leaf root empties the tree; an
    /// internal root with a single child promotes that child.
    fn adjust_root(&self, root_page_id: PageId) -> Result<()> {
        let (is_leaf_node, size, only_child) = {
            let guard = self.bpm.fetch_page(root_page_id)?;
            let page = guard.read();
            let is_leaf_node = node::is_leaf(&page);
            let size = node::size(&page);
            let only_child = if !is_leaf_node && size == 1 {
                InternalNode::value_at(&page, 0)
            } else {
                INVALID_PAGE_ID
            };
            (is_leaf_node, size, only_child)
        };

        if is_leaf_node && size == 0 {
            self.set_root(INVALID_PAGE_ID);
            self.update_root_page_id()?;
            self.bpm.delete_page(root_page_id)?;
            debug!(index_id = self.index_id, "tree is now empty");
        } else if !is_leaf_node && size == 1 {
            {
                let guard = self.bpm.fetch_page(only_child)?;
                node::set_parent_id(&mut guard.write(), INVALID_PAGE_ID);
            }
            self.set_root(only_child);
            self.update_root_page_id()?;
            self.bpm.delete_page(root_page_id)?;
            debug!(
                index_id = self.index_id,
                new_root = only_child,
                "collapsed root"
            );
        }
        Ok(())
    }

    /// Iterator over all entries in key order.
    pub fn iter(&self) -> Result<TreeIterator> {
        if self.is_empty() {
            return Ok(TreeIterator::exhausted(self.bpm.clone()));
        }
        let guard = self.find_leaf(None, true)?;
        Ok(TreeIterator::new(self.bpm.clone(), guard.page_id(), 0))
    }

    /// Iterator positioned at the first entry with key `>= key`,
    /// whether or not `key` itself is present.
    pub fn iter_from(&self, key: &[u8]) -> Result<TreeIterator> {
        if self.is_empty() {
            return Ok(TreeIterator::exhausted(self.bpm.clone()));
        }
        let guard = self.find_leaf(Some(key), false)?;
        let slot = {
            let page = guard.read();
            LeafNode::key_index(&page, key, &self.codec)
        };
        Ok(TreeIterator::new(self.bpm.clone(), guard.page_id(), slot))
    }

    /// Returns all rids whose stored key satisfies `stored OP key`, in
    /// key order (which the executor re-sorts by rid).
    pub fn scan_key(&self, key: &[u8], op: ScanOp) -> Result<Vec<RowId>> {
        let mut rids = Vec::new();
        match op {
            ScanOp::Eq => {
                if let Some(rid) = self.get_value(key)? {
                    rids.push(rid);
                }
            }
            ScanOp::Ge | ScanOp::Gt => {
                let mut iter = self.iter_from(key)?;
                while let Some((stored, rid)) = iter.next_entry()? {
                    if op == ScanOp::Gt && self.codec.compare(&stored, key) == Ordering::Equal {
                        continue;
                    }
                    rids.push(rid);
                }
            }
            ScanOp::Lt | ScanOp::Le => {
                let mut iter = self.iter()?;
                while let Some((stored, rid)) = iter.next_entry()? {
                    match self.codec.compare(&stored, key) {
                        Ordering::Greater => break,
                        Ordering::Equal if op == ScanOp::Lt => break,
                        _ => rids.push(rid),
                    }
                }
            }
            ScanOp::Ne => {
                let mut iter = self.iter()?;
                while let Some((stored, rid)) = iter.next_entry()? {
                    if self.codec.compare(&stored, key) != Ordering::Equal {
                        rids.push(rid);
                    }
                }
            }
        }
        Ok(rids)
    }

    /// Number of levels from root to leaves (0 for an empty tree).
    pub fn height(&self) -> Result<u32> {
        if self.is_empty() {
            return Ok(0);
        }
        let mut height = 1;
        let mut page_id = self.root_page_id();
        loop {
            let guard = self.bpm.fetch_page(page_id)?;
            let page = guard.read();
            if node::is_leaf(&page) {
                return Ok(height);
            }
            page_id = InternalNode::value_at(&page, 0);
            height += 1;
        }
    }

    /// Frees every page of the tree via an explicit worklist and drops
    /// the tree's record from the index-roots directory.
    pub fn destroy(&self) -> Result<()> {
        let mut worklist = Vec::new();
        if !self.is_empty() {
            worklist.push(self.root_page_id());
        }
        while let Some(page_id) = worklist.pop() {
            {
                let guard = self.bpm.fetch_page(page_id)?;
                let page = guard.read();
                if !node::is_leaf(&page) {
                    for index in 0..node::size(&page) {
                        worklist.push(InternalNode::value_at(&page, index));
                    }
                }
            }
            self.bpm.delete_page(page_id)?;
        }
        self.set_root(INVALID_PAGE_ID);

        let guard = self.bpm.fetch_page(INDEX_ROOTS_PAGE_ID)?;
        IndexRoots::remove(&mut guard.write(), self.index_id);
        debug!(index_id = self.index_id, "destroyed tree");
        Ok(())
    }
}
