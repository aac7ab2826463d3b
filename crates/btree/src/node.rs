//! B+ tree node representation and its page codec.

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use buffer::BufferPool;
use common::{DbError, DbResult, FileId, Lsn, PageId, RecordId, PAGE_SIZE};
use serde::{Deserialize, Serialize};
use storage::{PageType, HEADER_BYTES};
use types::Value;

/// Maximum keys (or leaf entries) per node, sized for 4 KiB pages holding
/// composite `Value` keys. Nodes below half of this rebalance, root
/// excepted.
pub const MAX_KEYS: usize = 32;
pub const MIN_KEYS: usize = MAX_KEYS / 2;

/// An index entry: the key columns plus the RID tie-breaker that keeps
/// duplicate keys cluster-stable. Internal separators carry the same shape,
/// equal to the smallest entry of their right subtree.
pub type Entry = (Vec<Value>, RecordId);

fn bincode_config() -> impl Config {
    config::legacy()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Internal {
        /// `n` separators for `n + 1` children; `separators[i]` is the
        /// smallest entry reachable under `children[i + 1]`.
        separators: Vec<Entry>,
        children: Vec<PageId>,
    },
    Leaf {
        entries: Vec<Entry>,
        prev: Option<PageId>,
        next: Option<PageId>,
    },
}

impl Node {
    pub fn new_leaf() -> Self {
        Node::Leaf { entries: Vec::new(), prev: None, next: None }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    pub fn len(&self) -> usize {
        match self {
            Node::Internal { separators, .. } => separators.len(),
            Node::Leaf { entries, .. } => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn page_type(&self) -> PageType {
        if self.is_leaf() {
            PageType::BtreeLeaf
        } else {
            PageType::BtreeInternal
        }
    }
}

/// Decode the node stored on a page.
pub fn read_node(pool: &mut BufferPool, file: FileId, pid: PageId) -> DbResult<Node> {
    pool.with_page(file, pid, |page| {
        match page.page_type()? {
            PageType::BtreeInternal | PageType::BtreeLeaf => {}
            other => {
                return Err(DbError::Storage(format!(
                    "page {} is {other:?}, not a btree node",
                    pid.0
                )))
            }
        }
        let len = u32::from_le_bytes(
            page.data[HEADER_BYTES..HEADER_BYTES + 4]
                .try_into()
                .expect("4 bytes"),
        ) as usize;
        let start = HEADER_BYTES + 4;
        let (node, _) = decode_from_slice(&page.data[start..start + len], bincode_config())
            .map_err(|e| DbError::Storage(format!("bad btree node on page {}: {e}", pid.0)))?;
        Ok((node, false))
    })
}

/// Encode a node onto its page, stamping the type tag and LSN.
pub fn write_node(
    pool: &mut BufferPool,
    file: FileId,
    pid: PageId,
    node: &Node,
    lsn: Lsn,
) -> DbResult<()> {
    let bytes = encode_to_vec(node, bincode_config())
        .map_err(|e| DbError::Storage(format!("encode btree node: {e}")))?;
    if HEADER_BYTES + 4 + bytes.len() > PAGE_SIZE {
        return Err(DbError::Storage(format!(
            "btree node overflows its page ({} bytes); key too wide",
            bytes.len()
        )));
    }

    pool.with_page(file, pid, |page| {
        let mut header = page.header()?;
        header.page_type = node.page_type() as u8;
        header.lsn = header.lsn.max(lsn.0);
        page.write_header(&header)?;
        page.data[HEADER_BYTES..HEADER_BYTES + 4]
            .copy_from_slice(&(bytes.len() as u32).to_le_bytes());
        page.data[HEADER_BYTES + 4..HEADER_BYTES + 4 + bytes.len()].copy_from_slice(&bytes);
        Ok(((), true))
    })
}

/// Compare an entry's key against a (possibly shorter) bound, looking only
/// at the bound's prefix. Index scans on a key prefix rely on this.
pub fn cmp_prefix(key: &[Value], bound: &[Value]) -> std::cmp::Ordering {
    for (k, b) in key.iter().zip(bound.iter()) {
        let ord = k.cmp(b);
        if ord != std::cmp::Ordering::Equal {
            return ord;
        }
    }
    std::cmp::Ordering::Equal
}
