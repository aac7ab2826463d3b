//! Write-ahead log and transaction bookkeeping.
//!
//! Every mutation appends a record carrying before/after row images and is
//! assigned a monotonically increasing LSN before the touched page may be
//! marked dirty. Commit appends a COMMIT record and fsyncs the log before
//! the caller is told the commit succeeded. Rollback walks the
//! transaction's undo list backwards; recovery replays the log in the
//! classic analysis/redo/undo order (the recovery driver lives with the
//! session layer, which owns the heap and index managers).

#[cfg(test)]
mod tests;

mod txn;

pub use txn::{Transaction, TransactionManager, TxnState};

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{DbError, DbResult, Lsn, RecordId, TableId, TxnId};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs::{File, OpenOptions},
    io::{Read, Write},
    path::{Path, PathBuf},
};
use types::Value;

/// A journaled change. Row images are the undo/redo payload: `before`
/// reverses the change, `after` (or the insert image) replays it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LogRecord {
    Begin {
        txn: TxnId,
    },
    Insert {
        txn: TxnId,
        table: TableId,
        rid: RecordId,
        after: Vec<Value>,
    },
    Update {
        txn: TxnId,
        table: TableId,
        rid: RecordId,
        before: Vec<Value>,
        after: Vec<Value>,
    },
    Delete {
        txn: TxnId,
        table: TableId,
        rid: RecordId,
        before: Vec<Value>,
    },
    Commit {
        txn: TxnId,
    },
    Abort {
        txn: TxnId,
    },
    /// Written while undoing. Carries the inverse mutation so recovery
    /// can redo completed undo work and skip re-undoing it.
    Compensate {
        txn: TxnId,
        undone: Lsn,
        action: Box<LogRecord>,
    },
    /// Periodic cut point carrying the transactions in flight at the time.
    Checkpoint {
        active: Vec<TxnId>,
    },
}

impl LogRecord {
    pub fn txn(&self) -> Option<TxnId> {
        match self {
            LogRecord::Begin { txn }
            | LogRecord::Insert { txn, .. }
            | LogRecord::Update { txn, .. }
            | LogRecord::Delete { txn, .. }
            | LogRecord::Commit { txn }
            | LogRecord::Abort { txn }
            | LogRecord::Compensate { txn, .. } => Some(*txn),
            LogRecord::Checkpoint { .. } => None,
        }
    }

    /// True for records that change page content and so take part in redo.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            LogRecord::Insert { .. } | LogRecord::Update { .. } | LogRecord::Delete { .. }
        )
    }
}

fn bincode_config() -> impl Config {
    config::legacy()
}

/// Append-only log file. Records are length-prefixed (4-byte LE) frames of
/// `(lsn, record)`, so replay can iterate forward and stop cleanly at a
/// torn tail.
#[derive(Debug)]
pub struct Wal {
    path: PathBuf,
    file: File,
    next_lsn: u64,
}

impl Wal {
    /// Open or create the log, positioning the next LSN after the intact
    /// records. A torn tail left by a crash mid-append is cut off so new
    /// records are not appended behind it.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        let (records, intact_len) = Self::scan(&path)?;
        let next_lsn = records.last().map(|(lsn, _)| lsn.0 + 1).unwrap_or(1);

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| DbError::Wal(format!("failed to open WAL file: {e}")))?;
        if file
            .metadata()
            .map_err(|e| DbError::Wal(format!("failed to stat WAL: {e}")))?
            .len()
            > intact_len
        {
            warn!("cutting torn WAL tail at byte {intact_len}");
            file.set_len(intact_len)
                .map_err(|e| DbError::Wal(format!("failed to trim WAL tail: {e}")))?;
        }

        Ok(Self { path, file, next_lsn })
    }

    /// Append a record, returning its LSN. The bytes reach the OS
    /// immediately but are only durable after `sync`.
    pub fn append(&mut self, rec: &LogRecord) -> DbResult<Lsn> {
        let lsn = Lsn(self.next_lsn);
        self.next_lsn += 1;

        let bytes = encode_to_vec((lsn.0, rec), bincode_config())
            .map_err(|e| DbError::Wal(format!("failed to serialize record: {e}")))?;
        let len = bytes.len() as u32;
        self.file
            .write_all(&len.to_le_bytes())
            .and_then(|_| self.file.write_all(&bytes))
            .and_then(|_| self.file.flush())
            .map_err(|e| DbError::Wal(format!("failed to write record: {e}")))?;

        Ok(lsn)
    }

    /// Fsync the log. Must happen before a commit is acknowledged and
    /// before any page with a covered LSN is flushed.
    pub fn sync(&mut self) -> DbResult<()> {
        self.file
            .sync_all()
            .map_err(|e| DbError::Wal(format!("failed to sync WAL: {e}")))
    }

    pub fn last_lsn(&self) -> Lsn {
        Lsn(self.next_lsn - 1)
    }

    /// Read every intact record in order. A torn frame at the tail (from
    /// a crash mid-append) ends the iteration without an error.
    pub fn replay(path: impl AsRef<Path>) -> DbResult<Vec<(Lsn, LogRecord)>> {
        Ok(Self::scan(path)?.0)
    }

    /// Forward scan returning the intact records and the byte length of
    /// the intact prefix.
    fn scan(path: impl AsRef<Path>) -> DbResult<(Vec<(Lsn, LogRecord)>, u64)> {
        let mut file = match OpenOptions::new().read(true).open(path.as_ref()) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(DbError::Wal(format!("failed to open WAL for replay: {e}"))),
        };

        let mut records = Vec::new();
        let mut intact_len: u64 = 0;
        loop {
            let mut len_buf = [0u8; 4];
            match file.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(DbError::Wal(format!("failed to read length prefix: {e}"))),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            let mut buf = vec![0u8; len];
            if file.read_exact(&mut buf).is_err() {
                warn!("torn record at WAL tail; ignoring");
                break;
            }

            match decode_from_slice::<(u64, LogRecord), _>(&buf, bincode_config()) {
                Ok(((lsn, rec), _)) => {
                    records.push((Lsn(lsn), rec));
                    intact_len += 4 + len as u64;
                }
                Err(e) => {
                    warn!("undecodable record at WAL tail: {e}; ignoring");
                    break;
                }
            }
        }

        Ok((records, intact_len))
    }

    /// Drop all records. Valid only when a checkpoint has made every
    /// effect durable and no transaction is in flight.
    pub fn truncate(&mut self) -> DbResult<()> {
        self.file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| DbError::Wal(format!("failed to truncate WAL: {e}")))?;
        self.file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| DbError::Wal(format!("failed to reopen WAL after truncate: {e}")))?;
        Ok(())
    }
}
