//! Crash recovery: the classic three passes over the log.
//!
//! 1. Analysis scans the whole log, rebuilding the in-flight transaction
//!    set, their undo chains, and the compensation records already
//!    written.
//! 2. Redo repeats history: every mutation (compensations included) is
//!    reapplied in log order; application is idempotent, so mutations
//!    already on disk are harmless to replay.
//! 3. Undo reverses the transactions still active at end-of-log, newest
//!    record first, journaling a compensation ahead of each reversal and
//!    finishing with ABORT.
//!
//! Afterwards everything is flushed and the log is cut at a fresh
//! checkpoint.

use crate::DbState;
use buffer::BufferPool;
use catalog::Catalog;
use common::{DbResult, Lsn, Row, TxnId};
use hashbrown::{HashMap, HashSet};
use heap::TableHeap;
use log::info;
use wal::{LogRecord, TransactionManager, Wal};

pub(crate) fn recover(state: &mut DbState) -> DbResult<()> {
    let records = Wal::replay(&state.wal_path)?;
    if records.is_empty() {
        return Ok(());
    }

    // ---- analysis ----
    let mut in_flight: HashMap<TxnId, Vec<(Lsn, LogRecord)>> = HashMap::new();
    let mut order: Vec<TxnId> = Vec::new();
    let mut compensated: HashSet<(TxnId, Lsn)> = HashSet::new();
    let mut max_txn = 0u64;

    for (lsn, record) in &records {
        if let Some(txn) = record.txn() {
            max_txn = max_txn.max(txn.0);
        }
        match record {
            LogRecord::Begin { txn } => {
                in_flight.insert(*txn, Vec::new());
                order.push(*txn);
            }
            LogRecord::Commit { txn } | LogRecord::Abort { txn } => {
                in_flight.remove(txn);
            }
            LogRecord::Compensate { txn, undone, .. } => {
                compensated.insert((*txn, *undone));
            }
            rec if rec.is_mutation() => {
                if let Some(chain) = rec.txn().and_then(|txn| in_flight.get_mut(&txn)) {
                    chain.push((*lsn, rec.clone()));
                }
            }
            _ => {}
        }
    }
    info!(
        "recovery: {} log records, {} transaction(s) in flight",
        records.len(),
        in_flight.len()
    );

    // ---- redo: repeat history in log order ----
    for (lsn, record) in &records {
        match record {
            rec if rec.is_mutation() => {
                apply_mutation(&state.catalog, &mut state.pool, rec, *lsn)?;
            }
            LogRecord::Compensate { action, .. } => {
                apply_mutation(&state.catalog, &mut state.pool, action, *lsn)?;
            }
            _ => {}
        }
    }

    // ---- undo in-flight transactions ----
    for txn in order.into_iter().rev() {
        let Some(chain) = in_flight.get(&txn) else {
            continue;
        };
        for (lsn, record) in chain.iter().rev() {
            if compensated.contains(&(txn, *lsn)) {
                continue;
            }
            let Some(inv) = inverse(record) else {
                continue;
            };
            let clsn = state.wal.append(&LogRecord::Compensate {
                txn,
                undone: *lsn,
                action: Box::new(inv.clone()),
            })?;
            apply_mutation(&state.catalog, &mut state.pool, &inv, clsn)?;
        }
        state.wal.append(&LogRecord::Abort { txn })?;
    }
    state.wal.sync()?;

    state.txns = TransactionManager::new(max_txn + 1);
    state.checkpoint()?;
    Ok(())
}

/// The mutation that reverses `record`. Non-mutations have no inverse.
pub(crate) fn inverse(record: &LogRecord) -> Option<LogRecord> {
    match record {
        LogRecord::Insert { txn, table, rid, after } => Some(LogRecord::Delete {
            txn: *txn,
            table: *table,
            rid: *rid,
            before: after.clone(),
        }),
        LogRecord::Update { txn, table, rid, before, after } => Some(LogRecord::Update {
            txn: *txn,
            table: *table,
            rid: *rid,
            before: after.clone(),
            after: before.clone(),
        }),
        LogRecord::Delete { txn, table, rid, before } => Some(LogRecord::Insert {
            txn: *txn,
            table: *table,
            rid: *rid,
            after: before.clone(),
        }),
        _ => None,
    }
}

/// Apply one mutation record to the heap and indexes. Idempotent: a
/// change that is already present is left alone, so redo can repeat
/// history blindly.
pub(crate) fn apply_mutation(
    catalog: &Catalog,
    pool: &mut BufferPool,
    record: &LogRecord,
    lsn: Lsn,
) -> DbResult<()> {
    match record {
        LogRecord::Insert { table, rid, after, .. } => {
            let meta = match catalog.table_by_id(*table) {
                Ok(meta) => meta.clone(),
                // table dropped after this record; nothing to apply
                Err(_) => return Ok(()),
            };
            let mut heap = TableHeap::new(meta.heap_file);
            if heap.get(pool, *rid)?.is_none() {
                heap.restore(pool, *rid, &Row::new(after.clone()), lsn)?;
            }
            for index in meta.indexes() {
                if let Some(key) = index.key_for(after) {
                    // opened non-unique: repeating history can transiently
                    // duplicate a key until a later record removes it
                    let tree = btree::BTreeIndex::open(pool, index.file, false)?;
                    tree.insert(pool, key, *rid, lsn)?;
                }
            }
        }
        LogRecord::Update { table, rid, before, after, .. } => {
            let meta = match catalog.table_by_id(*table) {
                Ok(meta) => meta.clone(),
                Err(_) => return Ok(()),
            };
            let mut heap = TableHeap::new(meta.heap_file);
            let row = Row::new(after.clone());
            if heap.get(pool, *rid)?.is_some() {
                heap.update(pool, *rid, &row, lsn)?;
            } else {
                heap.restore(pool, *rid, &row, lsn)?;
            }
            for index in meta.indexes() {
                let old_key = index.key_for(before);
                let new_key = index.key_for(after);
                if old_key == new_key {
                    continue;
                }
                let tree = btree::BTreeIndex::open(pool, index.file, false)?;
                if let Some(key) = old_key {
                    tree.delete(pool, &key, *rid, lsn)?;
                }
                if let Some(key) = new_key {
                    tree.insert(pool, key, *rid, lsn)?;
                }
            }
        }
        LogRecord::Delete { table, rid, before, .. } => {
            let meta = match catalog.table_by_id(*table) {
                Ok(meta) => meta.clone(),
                Err(_) => return Ok(()),
            };
            let mut heap = TableHeap::new(meta.heap_file);
            if heap.get(pool, *rid)?.is_some() {
                heap.delete(pool, *rid, lsn)?;
            }
            for index in meta.indexes() {
                if let Some(key) = index.key_for(before) {
                    let tree = btree::BTreeIndex::open(pool, index.file, false)?;
                    tree.delete(pool, &key, *rid, lsn)?;
                }
            }
        }
        _ => {}
    }
    Ok(())
}
