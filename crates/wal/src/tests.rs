use super::*;
use common::{PageId, RecordId, TableId, TxnId};
use std::io::Write;
use tempfile::tempdir;
use types::Value::*;

fn rid(page: u64, slot: u16) -> RecordId {
    RecordId { page_id: PageId(page), slot }
}

#[test]
fn append_assigns_increasing_lsns() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("db.wal");
    let mut wal = Wal::open(&file).unwrap();

    let a = wal.append(&LogRecord::Begin { txn: TxnId(1) }).unwrap();
    let b = wal
        .append(&LogRecord::Insert {
            txn: TxnId(1),
            table: TableId(1),
            rid: rid(1, 0),
            after: vec![Int(1), Text("Will".into())],
        })
        .unwrap();
    assert!(b > a);
    assert_eq!(wal.last_lsn(), b);
}

#[test]
fn replay_returns_records_in_order() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("db.wal");
    let mut wal = Wal::open(&file).unwrap();

    let records = vec![
        LogRecord::Begin { txn: TxnId(1) },
        LogRecord::Insert {
            txn: TxnId(1),
            table: TableId(1),
            rid: rid(1, 0),
            after: vec![Int(42), Bool(true)],
        },
        LogRecord::Update {
            txn: TxnId(1),
            table: TableId(1),
            rid: rid(1, 0),
            before: vec![Int(42), Bool(true)],
            after: vec![Int(43), Null],
        },
        LogRecord::Delete {
            txn: TxnId(1),
            table: TableId(1),
            rid: rid(1, 0),
            before: vec![Int(43), Null],
        },
        LogRecord::Commit { txn: TxnId(1) },
        LogRecord::Checkpoint { active: vec![] },
    ];
    for rec in &records {
        wal.append(rec).unwrap();
    }
    wal.sync().unwrap();

    let replayed = Wal::replay(&file).unwrap();
    assert_eq!(replayed.len(), records.len());
    assert_eq!(
        replayed.iter().map(|(_, r)| r.clone()).collect::<Vec<_>>(),
        records
    );
    // LSNs come back strictly increasing
    assert!(replayed.windows(2).all(|w| w[0].0 < w[1].0));
}

#[test]
fn reopen_continues_the_lsn_sequence() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("db.wal");

    let last = {
        let mut wal = Wal::open(&file).unwrap();
        wal.append(&LogRecord::Begin { txn: TxnId(1) }).unwrap();
        wal.append(&LogRecord::Commit { txn: TxnId(1) }).unwrap()
    };

    let mut wal = Wal::open(&file).unwrap();
    let next = wal.append(&LogRecord::Begin { txn: TxnId(2) }).unwrap();
    assert_eq!(next.0, last.0 + 1);
}

#[test]
fn torn_tail_is_tolerated() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("db.wal");

    {
        let mut wal = Wal::open(&file).unwrap();
        wal.append(&LogRecord::Begin { txn: TxnId(1) }).unwrap();
        wal.append(&LogRecord::Commit { txn: TxnId(1) }).unwrap();
        wal.sync().unwrap();
    }

    // simulate a crash mid-append: a length prefix promising more bytes
    // than were written
    {
        let mut raw = std::fs::OpenOptions::new().append(true).open(&file).unwrap();
        raw.write_all(&1000u32.to_le_bytes()).unwrap();
        raw.write_all(&[1, 2, 3]).unwrap();
    }

    let replayed = Wal::replay(&file).unwrap();
    assert_eq!(replayed.len(), 2);

    // the reopened log keeps numbering after the intact prefix
    let mut wal = Wal::open(&file).unwrap();
    assert_eq!(wal.append(&LogRecord::Begin { txn: TxnId(2) }).unwrap().0, 3);
}

#[test]
fn replay_of_missing_file_is_empty() {
    let dir = tempdir().unwrap();
    assert_eq!(Wal::replay(dir.path().join("absent.wal")).unwrap().len(), 0);
}

#[test]
fn truncate_resets_the_log() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("db.wal");
    let mut wal = Wal::open(&file).unwrap();

    for i in 0..5 {
        wal.append(&LogRecord::Begin { txn: TxnId(i) }).unwrap();
    }
    wal.truncate().unwrap();
    assert_eq!(Wal::replay(&file).unwrap().len(), 0);

    wal.append(&LogRecord::Checkpoint { active: vec![] }).unwrap();
    assert_eq!(Wal::replay(&file).unwrap().len(), 1);
}

mod txn_manager {
    use super::*;

    fn setup() -> (Wal, TransactionManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let wal = Wal::open(dir.path().join("db.wal")).unwrap();
        (wal, TransactionManager::new(1), dir)
    }

    #[test]
    fn begin_logs_and_blocks_nesting() {
        let (mut wal, mut txns, _dir) = setup();
        let id = txns.begin(&mut wal).unwrap();
        assert_eq!(id, TxnId(1));
        assert!(txns.begin(&mut wal).is_err());
    }

    #[test]
    fn mutations_accumulate_on_the_undo_chain() {
        let (mut wal, mut txns, _dir) = setup();
        txns.begin(&mut wal).unwrap();

        txns.log_mutation(
            &mut wal,
            LogRecord::Insert {
                txn: TxnId(1),
                table: TableId(1),
                rid: rid(1, 0),
                after: vec![Int(1)],
            },
        )
        .unwrap();
        txns.log_mutation(
            &mut wal,
            LogRecord::Delete {
                txn: TxnId(1),
                table: TableId(1),
                rid: rid(1, 0),
                before: vec![Int(1)],
            },
        )
        .unwrap();

        assert_eq!(txns.current().unwrap().undo_chain().len(), 2);

        // rollback hands records back newest-first
        let undo = txns.take_for_rollback();
        assert!(matches!(undo[0].1, LogRecord::Delete { .. }));
        assert!(matches!(undo[1].1, LogRecord::Insert { .. }));
        assert!(!txns.in_transaction());
    }

    #[test]
    fn commit_is_a_no_op_without_a_transaction() {
        let (mut wal, mut txns, _dir) = setup();
        txns.commit(&mut wal).unwrap();
        txns.commit(&mut wal).unwrap();
    }

    #[test]
    fn rollback_without_a_transaction_is_a_no_op() {
        let (_wal, mut txns, _dir) = setup();
        assert!(txns.take_for_rollback().is_empty());
    }

    #[test]
    fn poisoned_transactions_reject_statements_until_rollback() {
        let (mut wal, mut txns, _dir) = setup();
        txns.begin(&mut wal).unwrap();
        txns.mark_aborted();

        assert!(matches!(txns.check_usable(), Err(DbError::TxnAborted)));
        let err = txns
            .log_mutation(
                &mut wal,
                LogRecord::Insert {
                    txn: TxnId(1),
                    table: TableId(1),
                    rid: rid(1, 0),
                    after: vec![Int(1)],
                },
            )
            .unwrap_err();
        assert!(matches!(err, DbError::TxnAborted));
        assert!(matches!(txns.commit(&mut wal), Err(DbError::TxnAborted)));

        txns.take_for_rollback();
        assert!(txns.check_usable().is_ok());
    }
}
