//! Transaction states and undo bookkeeping. One transaction is active per
//! session at a time; the session layer applies undo images since it owns
//! the heap and index managers.

use crate::{LogRecord, Wal};
use common::{DbError, DbResult, Lsn, TxnId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committed,
    Aborted,
}

/// An open transaction and the log records sufficient to reverse it.
#[derive(Debug)]
pub struct Transaction {
    pub id: TxnId,
    pub state: TxnState,
    undo: Vec<(Lsn, LogRecord)>,
}

impl Transaction {
    pub fn undo_chain(&self) -> &[(Lsn, LogRecord)] {
        &self.undo
    }
}

/// Session-scoped transaction bookkeeping over the shared WAL.
#[derive(Debug, Default)]
pub struct TransactionManager {
    next_txn_id: u64,
    current: Option<Transaction>,
}

impl TransactionManager {
    pub fn new(next_txn_id: u64) -> Self {
        Self { next_txn_id, current: None }
    }

    pub fn current(&self) -> Option<&Transaction> {
        self.current.as_ref()
    }

    pub fn in_transaction(&self) -> bool {
        self.current.is_some()
    }

    /// A poisoned transaction rejects further statements until ROLLBACK.
    pub fn check_usable(&self) -> DbResult<()> {
        match &self.current {
            Some(txn) if txn.state == TxnState::Aborted => Err(DbError::TxnAborted),
            _ => Ok(()),
        }
    }

    /// Start a transaction and journal its BEGIN record.
    pub fn begin(&mut self, wal: &mut Wal) -> DbResult<TxnId> {
        if self.current.is_some() {
            return Err(DbError::Semantic(
                "a transaction is already in progress".into(),
            ));
        }
        let id = TxnId(self.next_txn_id);
        self.next_txn_id += 1;
        wal.append(&LogRecord::Begin { txn: id })?;
        self.current = Some(Transaction { id, state: TxnState::Active, undo: Vec::new() });
        Ok(id)
    }

    /// Journal a mutation and push it onto the undo chain.
    pub fn log_mutation(&mut self, wal: &mut Wal, record: LogRecord) -> DbResult<Lsn> {
        let txn = self
            .current
            .as_mut()
            .ok_or_else(|| DbError::Wal("mutation outside a transaction".into()))?;
        if txn.state != TxnState::Active {
            return Err(DbError::TxnAborted);
        }
        let lsn = wal.append(&record)?;
        txn.undo.push((lsn, record));
        Ok(lsn)
    }

    /// Append COMMIT and fsync; only then is the transaction gone. Commit
    /// with no open transaction is a no-op, which also makes a repeated
    /// commit of an already-committed id harmless.
    pub fn commit(&mut self, wal: &mut Wal) -> DbResult<()> {
        let Some(txn) = self.current.take() else {
            return Ok(());
        };
        if txn.state == TxnState::Aborted {
            self.current = Some(txn);
            return Err(DbError::TxnAborted);
        }
        wal.append(&LogRecord::Commit { txn: txn.id })?;
        wal.sync()?;
        Ok(())
    }

    /// Hand the undo chain (newest first) to the caller and forget the
    /// transaction; the caller applies before-images, writes compensation
    /// records, and finishes with ABORT. Rolling back with no open
    /// transaction is a no-op.
    pub fn take_for_rollback(&mut self) -> Vec<(Lsn, LogRecord)> {
        match self.current.take() {
            Some(mut txn) => {
                txn.undo.reverse();
                txn.undo
            }
            None => Vec::new(),
        }
    }

    /// Length of the current undo chain; statements snapshot this so a
    /// failing statement can reverse only its own records.
    pub fn undo_len(&self) -> usize {
        self.current.as_ref().map(|t| t.undo.len()).unwrap_or(0)
    }

    /// Detach the undo records appended after `mark` (newest first),
    /// leaving the transaction open. Used to roll back one statement
    /// inside an explicit transaction.
    pub fn take_undo_tail(&mut self, mark: usize) -> Vec<(Lsn, LogRecord)> {
        match self.current.as_mut() {
            Some(txn) if txn.undo.len() > mark => {
                let mut tail = txn.undo.split_off(mark);
                tail.reverse();
                tail
            }
            _ => Vec::new(),
        }
    }

    /// Poison the open transaction after a failed statement.
    pub fn mark_aborted(&mut self) {
        if let Some(txn) = self.current.as_mut() {
            txn.state = TxnState::Aborted;
        }
    }

    pub fn next_txn_id(&self) -> u64 {
        self.next_txn_id
    }
}
