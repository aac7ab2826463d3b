//! B+ tree index manager over the buffer pool.
//!
//! Ordered point and range lookup with median splits on the way up, and
//! borrow-then-merge rebalancing on the way down. Leaves form a
//! doubly-linked list for range scans; duplicate keys are kept
//! cluster-stable by the RID tie-breaker. The root page id lives in the
//! index file's meta page, so an index survives reopen by file id alone.

mod node;
#[cfg(test)]
mod tests;

pub use node::{cmp_prefix, Entry, Node, MAX_KEYS, MIN_KEYS};

use buffer::BufferPool;
use common::{DbError, DbResult, FileId, Lsn, PageId, RecordId};
use node::{read_node, write_node};
use std::cmp::Ordering;
use storage::PageType;
use types::Value;

/// Key bounds for a range scan, each side optional and independently
/// inclusive. Bounds may be a prefix of the indexed columns.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeyRange {
    pub low: Option<Vec<Value>>,
    pub low_inclusive: bool,
    pub high: Option<Vec<Value>>,
    pub high_inclusive: bool,
}

impl KeyRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(key: Vec<Value>) -> Self {
        Self {
            low: Some(key.clone()),
            low_inclusive: true,
            high: Some(key),
            high_inclusive: true,
        }
    }
}

/// A lazily advancing ordered scan positioned inside the leaf chain.
#[derive(Clone, Debug)]
pub struct RangeScan {
    leaf: Option<PageId>,
    idx: usize,
    range: KeyRange,
}

/// One B+ tree index stored in its own page file.
#[derive(Clone, Debug)]
pub struct BTreeIndex {
    file: FileId,
    unique: bool,
}

impl BTreeIndex {
    /// Create an empty index: a single empty leaf as the root.
    pub fn create(pool: &mut BufferPool, file: FileId, unique: bool) -> DbResult<Self> {
        let index = Self { file, unique };
        let root = index.allocate_node(pool, PageType::BtreeLeaf)?;
        write_node(pool, file, root, &Node::new_leaf(), Lsn(0))?;
        pool.disk().set_root_page(file, root)?;
        Ok(index)
    }

    /// Open an existing index, creating the empty root if the file is new.
    pub fn open(pool: &mut BufferPool, file: FileId, unique: bool) -> DbResult<Self> {
        match pool.disk().root_page(file)? {
            Some(_) => Ok(Self { file, unique }),
            None => Self::create(pool, file, unique),
        }
    }

    pub fn file_id(&self) -> FileId {
        self.file
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    fn root(&self, pool: &mut BufferPool) -> DbResult<PageId> {
        pool.disk()
            .root_page(self.file)?
            .ok_or_else(|| DbError::Storage(format!("index file {} has no root", self.file.0)))
    }

    fn allocate_node(&self, pool: &mut BufferPool, ty: PageType) -> DbResult<PageId> {
        pool.with_new_page(self.file, ty, |pid, _| Ok((pid, false)))
    }

    /// All RIDs whose indexed columns equal `key` (at most one for a
    /// unique index), in RID order.
    pub fn search(&self, pool: &mut BufferPool, key: &[Value]) -> DbResult<Vec<RecordId>> {
        let mut scan = self.range(pool, KeyRange::eq(key.to_vec()))?;
        let mut out = Vec::new();
        while let Some((_, rid)) = self.range_next(pool, &mut scan)? {
            out.push(rid);
        }
        Ok(out)
    }

    /// Whether the exact `(key, rid)` pair is present.
    pub fn contains(&self, pool: &mut BufferPool, key: &[Value], rid: RecordId) -> DbResult<bool> {
        Ok(self.search(pool, key)?.contains(&rid))
    }

    /// Insert `(key, rid)`. Re-inserting an existing pair is a no-op, so
    /// recovery can replay index maintenance idempotently; a different RID
    /// under the same key violates a unique index.
    pub fn insert(
        &self,
        pool: &mut BufferPool,
        key: Vec<Value>,
        rid: RecordId,
        lsn: Lsn,
    ) -> DbResult<()> {
        let existing = self.search(pool, &key)?;
        if existing.contains(&rid) {
            return Ok(());
        }
        if self.unique && !existing.is_empty() {
            return Err(DbError::Constraint(format!(
                "duplicate key {key:?} in unique index"
            )));
        }

        let root = self.root(pool)?;
        if let Some((sep, right)) = self.insert_recursive(pool, root, (key, rid), lsn)? {
            let new_root = self.allocate_node(pool, PageType::BtreeInternal)?;
            write_node(
                pool,
                self.file,
                new_root,
                &Node::Internal { separators: vec![sep], children: vec![root, right] },
                lsn,
            )?;
            pool.disk().set_root_page(self.file, new_root)?;
        }
        Ok(())
    }

    /// Remove exactly the `(key, rid)` pair. Returns whether it existed.
    pub fn delete(
        &self,
        pool: &mut BufferPool,
        key: &[Value],
        rid: RecordId,
        lsn: Lsn,
    ) -> DbResult<bool> {
        let root = self.root(pool)?;
        let entry = (key.to_vec(), rid);
        let (found, _) = self.delete_recursive(pool, root, &entry, lsn)?;
        if found {
            self.contract_root(pool)?;
        }
        Ok(found)
    }

    /// Position an ordered scan at the lower bound.
    pub fn range(&self, pool: &mut BufferPool, range: KeyRange) -> DbResult<RangeScan> {
        let mut pid = self.root(pool)?;
        loop {
            match read_node(pool, self.file, pid)? {
                Node::Internal { separators, children } => {
                    let idx = match &range.low {
                        Some(low) => separators
                            .partition_point(|(k, _)| cmp_prefix(k, low) == Ordering::Less),
                        None => 0,
                    };
                    pid = children[idx];
                }
                Node::Leaf { entries, .. } => {
                    let idx = match &range.low {
                        Some(low) => entries.partition_point(|(k, _)| {
                            match cmp_prefix(k, low) {
                                Ordering::Less => true,
                                Ordering::Equal => !range.low_inclusive,
                                Ordering::Greater => false,
                            }
                        }),
                        None => 0,
                    };
                    return Ok(RangeScan { leaf: Some(pid), idx, range });
                }
            }
        }
    }

    /// Yield the next entry in key order, or `None` past the upper bound.
    pub fn range_next(
        &self,
        pool: &mut BufferPool,
        scan: &mut RangeScan,
    ) -> DbResult<Option<Entry>> {
        loop {
            let Some(pid) = scan.leaf else {
                return Ok(None);
            };
            let node = read_node(pool, self.file, pid)?;
            let Node::Leaf { entries, next, .. } = node else {
                return Err(DbError::Storage("range scan descended to non-leaf".into()));
            };

            if scan.idx >= entries.len() {
                scan.leaf = next;
                scan.idx = 0;
                continue;
            }

            let entry = entries[scan.idx].clone();
            scan.idx += 1;

            if let Some(low) = &scan.range.low {
                match cmp_prefix(&entry.0, low) {
                    Ordering::Less => continue,
                    Ordering::Equal if !scan.range.low_inclusive => continue,
                    _ => {}
                }
            }
            if let Some(high) = &scan.range.high {
                match cmp_prefix(&entry.0, high) {
                    Ordering::Greater => {
                        scan.leaf = None;
                        return Ok(None);
                    }
                    Ordering::Equal if !scan.range.high_inclusive => {
                        scan.leaf = None;
                        return Ok(None);
                    }
                    _ => {}
                }
            }
            return Ok(Some(entry));
        }
    }

    /// Every entry in key order.
    pub fn scan_all(&self, pool: &mut BufferPool) -> DbResult<Vec<Entry>> {
        let mut scan = self.range(pool, KeyRange::all())?;
        let mut out = Vec::new();
        while let Some(entry) = self.range_next(pool, &mut scan)? {
            out.push(entry);
        }
        Ok(out)
    }

    /// Levels from root to leaf inclusive; an empty tree has height 1.
    pub fn height(&self, pool: &mut BufferPool) -> DbResult<usize> {
        let mut pid = self.root(pool)?;
        let mut height = 1;
        loop {
            match read_node(pool, self.file, pid)? {
                Node::Internal { children, .. } => {
                    height += 1;
                    pid = children[0];
                }
                Node::Leaf { .. } => return Ok(height),
            }
        }
    }

    // ---- insert internals ----

    fn insert_recursive(
        &self,
        pool: &mut BufferPool,
        pid: PageId,
        entry: Entry,
        lsn: Lsn,
    ) -> DbResult<Option<(Entry, PageId)>> {
        match read_node(pool, self.file, pid)? {
            Node::Leaf { mut entries, prev, next } => {
                let idx = entries.partition_point(|e| *e <= entry);
                entries.insert(idx, entry);

                if entries.len() <= MAX_KEYS {
                    write_node(pool, self.file, pid, &Node::Leaf { entries, prev, next }, lsn)?;
                    return Ok(None);
                }

                // median split; the promoted key is the right leaf's minimum
                let mid = entries.len() / 2;
                let right_entries = entries.split_off(mid);
                let sep = right_entries[0].clone();
                let right_pid = self.allocate_node(pool, PageType::BtreeLeaf)?;

                let old_next = next;
                write_node(
                    pool,
                    self.file,
                    pid,
                    &Node::Leaf { entries, prev, next: Some(right_pid) },
                    lsn,
                )?;
                write_node(
                    pool,
                    self.file,
                    right_pid,
                    &Node::Leaf { entries: right_entries, prev: Some(pid), next: old_next },
                    lsn,
                )?;
                if let Some(after) = old_next {
                    self.set_prev(pool, after, Some(right_pid), lsn)?;
                }
                Ok(Some((sep, right_pid)))
            }
            Node::Internal { mut separators, mut children } => {
                let idx = separators.partition_point(|s| *s <= entry);
                let split = self.insert_recursive(pool, children[idx], entry, lsn)?;

                let Some((sep, new_child)) = split else {
                    return Ok(None);
                };
                separators.insert(idx, sep);
                children.insert(idx + 1, new_child);

                if separators.len() <= MAX_KEYS {
                    write_node(
                        pool,
                        self.file,
                        pid,
                        &Node::Internal { separators, children },
                        lsn,
                    )?;
                    return Ok(None);
                }

                // split around the middle separator, which moves up
                let mid = separators.len() / 2;
                let right_separators = separators.split_off(mid + 1);
                let promoted = separators.pop().expect("separator at the split point");
                let right_children = children.split_off(mid + 1);
                let right_pid = self.allocate_node(pool, PageType::BtreeInternal)?;

                write_node(
                    pool,
                    self.file,
                    pid,
                    &Node::Internal { separators, children },
                    lsn,
                )?;
                write_node(
                    pool,
                    self.file,
                    right_pid,
                    &Node::Internal { separators: right_separators, children: right_children },
                    lsn,
                )?;
                Ok(Some((promoted, right_pid)))
            }
        }
    }

    // ---- delete internals ----

    fn delete_recursive(
        &self,
        pool: &mut BufferPool,
        pid: PageId,
        entry: &Entry,
        lsn: Lsn,
    ) -> DbResult<(bool, bool)> {
        match read_node(pool, self.file, pid)? {
            Node::Leaf { mut entries, prev, next } => {
                let before = entries.len();
                entries.retain(|e| e != entry);
                let found = entries.len() < before;
                let underflow = entries.len() < MIN_KEYS;
                if found {
                    write_node(pool, self.file, pid, &Node::Leaf { entries, prev, next }, lsn)?;
                }
                Ok((found, underflow))
            }
            Node::Internal { separators, children } => {
                let idx = separators.partition_point(|s| s <= entry);
                let (found, child_underflow) =
                    self.delete_recursive(pool, children[idx], entry, lsn)?;
                if !found {
                    return Ok((false, false));
                }
                if child_underflow {
                    let underflow = self.rebalance_child(pool, pid, idx, lsn)?;
                    Ok((true, underflow))
                } else {
                    Ok((true, separators.len() < MIN_KEYS))
                }
            }
        }
    }

    /// Fix an underfull child: borrow from an adjacent sibling that can
    /// spare an entry, otherwise merge with one. Returns whether the
    /// parent itself is now underfull.
    fn rebalance_child(
        &self,
        pool: &mut BufferPool,
        parent_pid: PageId,
        idx: usize,
        lsn: Lsn,
    ) -> DbResult<bool> {
        let Node::Internal { mut separators, mut children } =
            read_node(pool, self.file, parent_pid)?
        else {
            return Err(DbError::Storage("rebalance parent is a leaf".into()));
        };
        let child_pid = children[idx];

        // borrow from the left sibling
        if idx > 0 {
            let left_pid = children[idx - 1];
            let left = read_node(pool, self.file, left_pid)?;
            if left.len() > MIN_KEYS {
                self.borrow_from_left(pool, left_pid, child_pid, &mut separators, idx, lsn)?;
                write_node(
                    pool,
                    self.file,
                    parent_pid,
                    &Node::Internal { separators, children },
                    lsn,
                )?;
                return Ok(false);
            }
        }

        // borrow from the right sibling
        if idx + 1 < children.len() {
            let right_pid = children[idx + 1];
            let right = read_node(pool, self.file, right_pid)?;
            if right.len() > MIN_KEYS {
                self.borrow_from_right(pool, child_pid, right_pid, &mut separators, idx, lsn)?;
                write_node(
                    pool,
                    self.file,
                    parent_pid,
                    &Node::Internal { separators, children },
                    lsn,
                )?;
                return Ok(false);
            }
        }

        // both siblings minimal: merge, preferring the left one
        if idx > 0 {
            let left_pid = children[idx - 1];
            let sep = separators.remove(idx - 1);
            children.remove(idx);
            self.merge_nodes(pool, left_pid, child_pid, sep, lsn)?;
        } else {
            let right_pid = children[idx + 1];
            let sep = separators.remove(idx);
            children.remove(idx + 1);
            self.merge_nodes(pool, child_pid, right_pid, sep, lsn)?;
        }

        let underflow = separators.len() < MIN_KEYS;
        write_node(
            pool,
            self.file,
            parent_pid,
            &Node::Internal { separators, children },
            lsn,
        )?;
        Ok(underflow)
    }

    fn borrow_from_left(
        &self,
        pool: &mut BufferPool,
        left_pid: PageId,
        child_pid: PageId,
        separators: &mut [Entry],
        idx: usize,
        lsn: Lsn,
    ) -> DbResult<()> {
        let left = read_node(pool, self.file, left_pid)?;
        let child = read_node(pool, self.file, child_pid)?;
        match (left, child) {
            (
                Node::Leaf { entries: mut le, prev: lp, next: ln },
                Node::Leaf { entries: mut ce, prev: cp, next: cn },
            ) => {
                let moved = le.pop().expect("left sibling above minimum");
                ce.insert(0, moved);
                separators[idx - 1] = ce[0].clone();
                write_node(pool, self.file, left_pid, &Node::Leaf { entries: le, prev: lp, next: ln }, lsn)?;
                write_node(pool, self.file, child_pid, &Node::Leaf { entries: ce, prev: cp, next: cn }, lsn)?;
            }
            (
                Node::Internal { separators: mut ls, children: mut lc },
                Node::Internal { separators: mut cs, children: mut cc },
            ) => {
                // rotate through the parent separator
                cs.insert(0, separators[idx - 1].clone());
                cc.insert(0, lc.pop().expect("left sibling above minimum"));
                separators[idx - 1] = ls.pop().expect("left sibling above minimum");
                write_node(pool, self.file, left_pid, &Node::Internal { separators: ls, children: lc }, lsn)?;
                write_node(pool, self.file, child_pid, &Node::Internal { separators: cs, children: cc }, lsn)?;
            }
            _ => {
                return Err(DbError::Storage("siblings at different levels".into()));
            }
        }
        Ok(())
    }

    fn borrow_from_right(
        &self,
        pool: &mut BufferPool,
        child_pid: PageId,
        right_pid: PageId,
        separators: &mut [Entry],
        idx: usize,
        lsn: Lsn,
    ) -> DbResult<()> {
        let child = read_node(pool, self.file, child_pid)?;
        let right = read_node(pool, self.file, right_pid)?;
        match (child, right) {
            (
                Node::Leaf { entries: mut ce, prev: cp, next: cn },
                Node::Leaf { entries: mut re, prev: rp, next: rn },
            ) => {
                let moved = re.remove(0);
                ce.push(moved);
                separators[idx] = re[0].clone();
                write_node(pool, self.file, child_pid, &Node::Leaf { entries: ce, prev: cp, next: cn }, lsn)?;
                write_node(pool, self.file, right_pid, &Node::Leaf { entries: re, prev: rp, next: rn }, lsn)?;
            }
            (
                Node::Internal { separators: mut cs, children: mut cc },
                Node::Internal { separators: mut rs, children: mut rc },
            ) => {
                cs.push(separators[idx].clone());
                cc.push(rc.remove(0));
                separators[idx] = rs.remove(0);
                write_node(pool, self.file, child_pid, &Node::Internal { separators: cs, children: cc }, lsn)?;
                write_node(pool, self.file, right_pid, &Node::Internal { separators: rs, children: rc }, lsn)?;
            }
            _ => {
                return Err(DbError::Storage("siblings at different levels".into()));
            }
        }
        Ok(())
    }

    /// Merge `right_pid` into `left_pid` and free the right page.
    fn merge_nodes(
        &self,
        pool: &mut BufferPool,
        left_pid: PageId,
        right_pid: PageId,
        separator: Entry,
        lsn: Lsn,
    ) -> DbResult<()> {
        let left = read_node(pool, self.file, left_pid)?;
        let right = read_node(pool, self.file, right_pid)?;
        match (left, right) {
            (
                Node::Leaf { entries: mut le, prev: lp, .. },
                Node::Leaf { entries: re, next: rn, .. },
            ) => {
                le.extend(re);
                write_node(pool, self.file, left_pid, &Node::Leaf { entries: le, prev: lp, next: rn }, lsn)?;
                if let Some(after) = rn {
                    self.set_prev(pool, after, Some(left_pid), lsn)?;
                }
            }
            (
                Node::Internal { separators: mut ls, children: mut lc },
                Node::Internal { separators: rs, children: rc },
            ) => {
                ls.push(separator);
                ls.extend(rs);
                lc.extend(rc);
                write_node(pool, self.file, left_pid, &Node::Internal { separators: ls, children: lc }, lsn)?;
            }
            _ => {
                return Err(DbError::Storage("merging nodes at different levels".into()));
            }
        }
        pool.free_page(self.file, right_pid)
    }

    /// Shrink the root while it is an internal node with a single child.
    fn contract_root(&self, pool: &mut BufferPool) -> DbResult<()> {
        loop {
            let root = self.root(pool)?;
            match read_node(pool, self.file, root)? {
                Node::Internal { separators, children } if separators.is_empty() => {
                    let only_child = children[0];
                    pool.disk().set_root_page(self.file, only_child)?;
                    pool.free_page(self.file, root)?;
                }
                _ => return Ok(()),
            }
        }
    }

    fn set_prev(
        &self,
        pool: &mut BufferPool,
        pid: PageId,
        prev: Option<PageId>,
        lsn: Lsn,
    ) -> DbResult<()> {
        match read_node(pool, self.file, pid)? {
            Node::Leaf { entries, next, .. } => {
                write_node(pool, self.file, pid, &Node::Leaf { entries, prev, next }, lsn)
            }
            Node::Internal { .. } => {
                Err(DbError::Storage("leaf sibling pointer into internal node".into()))
            }
        }
    }
}
