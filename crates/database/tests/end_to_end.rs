//! End-to-end scenarios over the full SQL surface: point lookups through
//! the primary key index, split-heavy inserts, transactions, constraint
//! rejections, and join + aggregate queries.

use common::{Config, DbError};
use database::{Database, QueryResult};
use tempfile::TempDir;
use types::Value;

fn school() -> (Database, TempDir) {
    let dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(dir.path().to_path_buf())
        .buffer_pool_pages(128)
        .build();
    let mut db = Database::open(config).unwrap();
    db.execute("CREATE DATABASE school").unwrap();
    db.execute("USE school").unwrap();
    db.execute(
        "CREATE TABLE departments (dept_id INT PRIMARY KEY, dept_name TEXT NOT NULL)",
    )
    .unwrap();
    db.execute(
        "CREATE TABLE students (\
           student_id INT PRIMARY KEY, \
           name VARCHAR(64) NOT NULL, \
           gpa DECIMAL(3,2), \
           dept_id INT REFERENCES departments(dept_id))",
    )
    .unwrap();
    db.execute(
        "INSERT INTO departments VALUES (1, 'Computer Science'), (2, 'Mathematics'), (3, 'Philosophy')",
    )
    .unwrap();
    (db, dir)
}

fn rows(result: QueryResult) -> Vec<common::Row> {
    match result {
        QueryResult::Rows(batch) => batch.rows,
        other => panic!("expected rows, got {other:?}"),
    }
}

fn count(result: QueryResult) -> u64 {
    match result {
        QueryResult::Count { affected } => affected,
        other => panic!("expected count, got {other:?}"),
    }
}

#[test]
fn point_lookup_via_primary_key_index() {
    let (mut db, _dir) = school();
    for id in 1..=60 {
        db.execute(&format!(
            "INSERT INTO students VALUES ({id}, 'Student {id}', 3.00, 1)"
        ))
        .unwrap();
    }

    let plan = rows(db.execute("EXPLAIN SELECT * FROM students WHERE student_id = 60").unwrap());
    let text: String = plan
        .iter()
        .map(|r| r.values[0].to_string())
        .collect::<Vec<_>>()
        .join("\n");
    assert!(text.contains("IndexScan students using pk_students"), "{text}");

    let found = rows(db.execute("SELECT * FROM students WHERE student_id = 60").unwrap());
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].values[1], Value::Varchar("Student 60".into()));
}

#[test]
fn thousand_inserts_scan_back_in_key_order() {
    let (mut db, _dir) = school();
    for chunk in (0..1000).collect::<Vec<i64>>().chunks(50) {
        let values: Vec<String> = chunk
            .iter()
            .map(|id| format!("({id}, 'S{id}', 2.50, 1)"))
            .collect();
        db.execute(&format!("INSERT INTO students VALUES {}", values.join(", ")))
            .unwrap();
    }

    let all = rows(
        db.execute("SELECT student_id FROM students ORDER BY student_id").unwrap(),
    );
    assert_eq!(all.len(), 1000);
    let ids: Vec<i32> = all
        .iter()
        .map(|r| match r.values[0] {
            Value::Int(v) => v,
            ref other => panic!("unexpected value {other:?}"),
        })
        .collect();
    assert_eq!(ids, (0..1000).collect::<Vec<i32>>());
}

#[test]
fn transaction_rollback_leaves_no_trace() {
    let (mut db, _dir) = school();

    db.execute("BEGIN").unwrap();
    db.execute("INSERT INTO students VALUES (11, 'Temp', 1.00, 1)").unwrap();
    db.execute("UPDATE students SET name = 'Renamed' WHERE student_id = 11").unwrap();
    db.execute("ROLLBACK").unwrap();

    let found = rows(db.execute("SELECT * FROM students WHERE student_id = 11").unwrap());
    assert!(found.is_empty());
}

#[test]
fn committed_work_is_visible_after_commit() {
    let (mut db, _dir) = school();

    db.execute("BEGIN").unwrap();
    db.execute("INSERT INTO students VALUES (21, 'Kept', 3.10, 2)").unwrap();
    db.execute("COMMIT").unwrap();

    let found = rows(db.execute("SELECT name FROM students WHERE student_id = 21").unwrap());
    assert_eq!(found[0].values[0], Value::Varchar("Kept".into()));

    // COMMIT without a transaction is a harmless no-op
    db.execute("COMMIT").unwrap();
    db.execute("ROLLBACK").unwrap();
}

#[test]
fn duplicate_key_insert_is_rejected_without_side_effects() {
    let (mut db, _dir) = school();
    db.execute("INSERT INTO students VALUES (1, 'Original', 3.50, 1)").unwrap();

    let err = db
        .execute("INSERT INTO students VALUES (1, 'Duplicate', 0.00, 1)")
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DbError>(),
        Some(DbError::Constraint(_))
    ));

    let found = rows(db.execute("SELECT name, gpa FROM students WHERE student_id = 1").unwrap());
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].values[0], Value::Varchar("Original".into()));
    assert_eq!(found[0].values[1], Value::Decimal { digits: 350, scale: 2 });
}

#[test]
fn left_join_group_by_counts_include_empty_departments() {
    let (mut db, _dir) = school();
    db.execute(
        "INSERT INTO students VALUES \
         (1, 'Ada', 3.90, 1), (2, 'Grace', 3.70, 1), (3, 'Kurt', 3.40, 2)",
    )
    .unwrap();

    let result = rows(
        db.execute(
            "SELECT d.dept_name, COUNT(s.student_id) FROM departments d \
             LEFT JOIN students s ON d.dept_id = s.dept_id \
             GROUP BY d.dept_id, d.dept_name ORDER BY d.dept_name",
        )
        .unwrap(),
    );

    let counts: Vec<(String, Value)> = result
        .iter()
        .map(|r| (r.values[0].to_string(), r.values[1].clone()))
        .collect();
    assert_eq!(
        counts,
        vec![
            ("Computer Science".to_string(), Value::BigInt(2)),
            ("Mathematics".to_string(), Value::BigInt(1)),
            ("Philosophy".to_string(), Value::BigInt(0)),
        ]
    );
}

#[test]
fn update_and_delete_report_affected_counts() {
    let (mut db, _dir) = school();
    db.execute(
        "INSERT INTO students VALUES (1, 'A', 2.00, 1), (2, 'B', 2.00, 1), (3, 'C', 3.00, 2)",
    )
    .unwrap();

    let affected = count(db.execute("UPDATE students SET gpa = 2.50 WHERE gpa = 2.00").unwrap());
    assert_eq!(affected, 2);

    let affected = count(db.execute("DELETE FROM students WHERE dept_id = 1").unwrap());
    assert_eq!(affected, 2);

    let remaining = rows(db.execute("SELECT * FROM students").unwrap());
    assert_eq!(remaining.len(), 1);
}

#[test]
fn foreign_keys_hold_across_statements() {
    let (mut db, _dir) = school();
    db.execute("INSERT INTO students VALUES (1, 'Ada', 3.90, 1)").unwrap();

    // inserting against a missing department fails
    let err = db.execute("INSERT INTO students VALUES (2, 'Lost', 1.00, 99)").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DbError>(),
        Some(DbError::Constraint(_))
    ));

    // deleting a referenced department fails (RESTRICT)
    let err = db.execute("DELETE FROM departments WHERE dept_id = 1").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DbError>(),
        Some(DbError::Constraint(_))
    ));

    // once the referencing student is gone the delete goes through
    db.execute("DELETE FROM students WHERE student_id = 1").unwrap();
    let affected = count(db.execute("DELETE FROM departments WHERE dept_id = 1").unwrap());
    assert_eq!(affected, 1);
}

#[test]
fn scalar_and_in_subqueries() {
    let (mut db, _dir) = school();
    db.execute(
        "INSERT INTO students VALUES \
         (1, 'Ada', 3.90, 1), (2, 'Grace', 3.70, 1), (3, 'Kurt', 3.40, 2)",
    )
    .unwrap();

    let top = rows(
        db.execute("SELECT name FROM students WHERE gpa = (SELECT MAX(gpa) FROM students)")
            .unwrap(),
    );
    assert_eq!(top[0].values[0], Value::Varchar("Ada".into()));

    let cs = rows(
        db.execute(
            "SELECT name FROM students WHERE dept_id IN \
             (SELECT dept_id FROM departments WHERE dept_name LIKE 'Comp%') ORDER BY name",
        )
        .unwrap(),
    );
    assert_eq!(cs.len(), 2);
}
