//! Crash recovery scenarios: the process "dies" by dropping the handle
//! without a checkpoint, and the next open replays the log.

use common::{Config, DbError};
use database::{Database, QueryResult};
use tempfile::TempDir;
use types::Value;

fn config(dir: &TempDir) -> Config {
    let _ = env_logger::builder().is_test(true).try_init();
    Config::builder()
        .data_dir(dir.path().to_path_buf())
        .buffer_pool_pages(64)
        .build()
}

fn rows(result: QueryResult) -> Vec<common::Row> {
    match result {
        QueryResult::Rows(batch) => batch.rows,
        other => panic!("expected rows, got {other:?}"),
    }
}

#[test]
fn committed_transactions_survive_a_crash_and_in_flight_ones_vanish() {
    let dir = TempDir::new().unwrap();

    {
        let mut db = Database::open(config(&dir)).unwrap();
        db.execute("CREATE DATABASE crashy").unwrap();
        db.execute("USE crashy").unwrap();
        db.execute("CREATE TABLE students (student_id INT PRIMARY KEY, name TEXT NOT NULL)")
            .unwrap();

        // T1 commits
        db.execute("BEGIN").unwrap();
        db.execute("INSERT INTO students VALUES (1, 'Committed')").unwrap();
        db.execute("COMMIT").unwrap();

        // T2 stays in flight when the process dies
        db.execute("BEGIN").unwrap();
        db.execute("INSERT INTO students VALUES (2, 'Doomed')").unwrap();
        db.execute("UPDATE students SET name = 'Mutated' WHERE student_id = 1").unwrap();
        drop(db); // no close(): simulated crash
    }

    let mut db = Database::open(config(&dir)).unwrap();
    db.execute("USE crashy").unwrap();

    let all = rows(db.execute("SELECT student_id, name FROM students ORDER BY student_id").unwrap());
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].values[0], Value::Int(1));
    // T2's update was rolled back along with its insert
    assert_eq!(all[0].values[1], Value::Text("Committed".into()));

    // the index agrees with the heap after recovery
    let by_index = rows(db.execute("SELECT name FROM students WHERE student_id = 1").unwrap());
    assert_eq!(by_index.len(), 1);
    assert!(rows(db.execute("SELECT * FROM students WHERE student_id = 2").unwrap()).is_empty());
}

#[test]
fn implicit_transactions_are_durable_at_statement_end() {
    let dir = TempDir::new().unwrap();

    {
        let mut db = Database::open(config(&dir)).unwrap();
        db.execute("CREATE DATABASE crashy").unwrap();
        db.execute("USE crashy").unwrap();
        db.execute("CREATE TABLE t (id INT PRIMARY KEY, v INT)").unwrap();
        for i in 0..20 {
            db.execute(&format!("INSERT INTO t VALUES ({i}, {i})")).unwrap();
        }
        db.execute("DELETE FROM t WHERE id = 7").unwrap();
        db.execute("UPDATE t SET v = 100 WHERE id = 3").unwrap();
        drop(db);
    }

    let mut db = Database::open(config(&dir)).unwrap();
    db.execute("USE crashy").unwrap();

    let all = rows(db.execute("SELECT id FROM t ORDER BY id").unwrap());
    assert_eq!(all.len(), 19);
    assert!(rows(db.execute("SELECT * FROM t WHERE id = 7").unwrap()).is_empty());
    let updated = rows(db.execute("SELECT v FROM t WHERE id = 3").unwrap());
    assert_eq!(updated[0].values[0], Value::Int(100));
}

#[test]
fn recovery_is_idempotent_across_repeated_crashes() {
    let dir = TempDir::new().unwrap();

    {
        let mut db = Database::open(config(&dir)).unwrap();
        db.execute("CREATE DATABASE crashy").unwrap();
        db.execute("USE crashy").unwrap();
        db.execute("CREATE TABLE t (id INT PRIMARY KEY)").unwrap();
        db.execute("INSERT INTO t VALUES (1), (2), (3)").unwrap();
        db.execute("BEGIN").unwrap();
        db.execute("DELETE FROM t WHERE id = 2").unwrap();
        drop(db);
    }

    // crash again immediately after recovery, before any new work
    {
        let mut db = Database::open(config(&dir)).unwrap();
        db.execute("USE crashy").unwrap();
        drop(db);
    }

    let mut db = Database::open(config(&dir)).unwrap();
    db.execute("USE crashy").unwrap();
    let all = rows(db.execute("SELECT id FROM t ORDER BY id").unwrap());
    assert_eq!(all.len(), 3);
}

#[test]
fn transaction_counter_moves_past_recovered_ids() {
    let dir = TempDir::new().unwrap();

    {
        let mut db = Database::open(config(&dir)).unwrap();
        db.execute("CREATE DATABASE crashy").unwrap();
        db.execute("USE crashy").unwrap();
        db.execute("CREATE TABLE t (id INT PRIMARY KEY)").unwrap();
        db.execute("INSERT INTO t VALUES (1)").unwrap();
        db.execute("BEGIN").unwrap();
        db.execute("INSERT INTO t VALUES (2)").unwrap();
        drop(db);
    }

    let mut db = Database::open(config(&dir)).unwrap();
    db.execute("USE crashy").unwrap();
    // new work starts cleanly after recovery
    db.execute("INSERT INTO t VALUES (3)").unwrap();
    let all = rows(db.execute("SELECT id FROM t ORDER BY id").unwrap());
    assert_eq!(all.len(), 2);

    // a statement after ROLLBACK-free recovery still errors correctly
    let err = db.execute("INSERT INTO t VALUES (1)").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DbError>(),
        Some(DbError::Constraint(_))
    ));
}
