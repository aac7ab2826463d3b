use super::*;
use pretty_assertions::assert_eq;

fn parse_one(sql: &str) -> Statement {
    let mut stmts = parse_sql(sql).unwrap();
    assert_eq!(stmts.len(), 1);
    stmts.remove(0)
}

#[test]
fn select_with_filter_order_and_limit() {
    let stmt = parse_one("SELECT id, name FROM students WHERE age > 20 ORDER BY name DESC LIMIT 5 OFFSET 2");
    let Statement::Select(select) = stmt else {
        panic!("expected select");
    };

    assert_eq!(select.items.len(), 2);
    assert_eq!(select.from, TableRef::named("students"));
    assert!(select.selection.is_some());
    assert_eq!(
        select.order_by,
        vec![OrderByExpr { column: "name".into(), direction: SortDirection::Desc }]
    );
    assert_eq!(select.limit, Some(5));
    assert_eq!(select.offset, Some(2));
}

#[test]
fn select_lowercases_identifiers() {
    let Statement::Select(select) = parse_one("SELECT Name FROM Students") else {
        panic!("expected select");
    };
    assert_eq!(select.from.name, "students");
    assert_eq!(
        select.items[0],
        SelectItem::Expr {
            expr: Expr::Column { table: None, name: "name".into() },
            alias: None
        }
    );
}

#[test]
fn left_join_with_alias_and_group_by() {
    let stmt = parse_one(
        "SELECT d.dept_name, COUNT(s.student_id) FROM departments d \
         LEFT JOIN students s ON d.dept_id = s.dept_id GROUP BY d.dept_id",
    );
    let Statement::Select(select) = stmt else {
        panic!("expected select");
    };

    assert_eq!(select.from.alias.as_deref(), Some("d"));
    assert_eq!(select.joins.len(), 1);
    assert_eq!(select.joins[0].join_type, JoinType::Left);
    assert_eq!(select.joins[0].table.effective_name(), "s");
    assert_eq!(select.group_by.len(), 1);
    assert!(matches!(
        &select.items[1],
        SelectItem::Expr { expr: Expr::Aggregate { func: expr::AggFunc::Count, arg: Some(_) }, .. }
    ));
}

#[test]
fn count_star_has_no_argument() {
    let Statement::Select(select) = parse_one("SELECT COUNT(*) FROM t") else {
        panic!("expected select");
    };
    assert_eq!(
        select.items[0],
        SelectItem::Expr {
            expr: Expr::Aggregate { func: expr::AggFunc::Count, arg: None },
            alias: None
        }
    );
}

#[test]
fn having_and_scalar_subquery() {
    let stmt = parse_one(
        "SELECT dept_id, COUNT(*) FROM students GROUP BY dept_id \
         HAVING COUNT(*) > (SELECT MIN(cap) FROM limits)",
    );
    let Statement::Select(select) = stmt else {
        panic!("expected select");
    };
    let having = select.having.expect("having clause");
    assert!(having.contains_aggregate());
}

#[test]
fn in_subquery_and_like() {
    let Statement::Select(select) = parse_one(
        "SELECT * FROM students WHERE dept_id IN (SELECT dept_id FROM departments) \
         AND name LIKE 'A%'",
    ) else {
        panic!("expected select");
    };
    let Some(Expr::Binary { left, right, .. }) = select.selection else {
        panic!("expected AND");
    };
    assert!(matches!(*left, Expr::InSubquery { negated: false, .. }));
    assert!(matches!(*right, Expr::Like { negated: false, .. }));
}

#[test]
fn insert_multi_row_with_columns() {
    let stmt = parse_one("INSERT INTO students (id, name) VALUES (1, 'Ada'), (2, 'Grace')");
    let Statement::Insert { table, columns, rows } = stmt else {
        panic!("expected insert");
    };
    assert_eq!(table, "students");
    assert_eq!(columns, Some(vec!["id".into(), "name".into()]));
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1][1], Expr::Literal(types::Value::Text("Grace".into())));
}

#[test]
fn create_table_collects_constraints() {
    let stmt = parse_one(
        "CREATE TABLE students (\
           student_id INT PRIMARY KEY, \
           name VARCHAR(64) NOT NULL, \
           gpa DECIMAL(3,2) DEFAULT 0.00 CHECK (gpa >= 0.00), \
           dept_id INT REFERENCES departments(dept_id), \
           enrolled DATE)",
    );
    let Statement::CreateTable { name, columns, constraints } = stmt else {
        panic!("expected create table");
    };
    assert_eq!(name, "students");
    assert_eq!(columns.len(), 5);
    assert!(columns[0].primary_key);
    assert!(!columns[0].nullable);
    assert!(!columns[1].nullable);
    assert_eq!(columns[1].ty, types::SqlType::Varchar { max_len: 64 });
    assert_eq!(columns[2].ty, types::SqlType::Decimal { precision: 3, scale: 2 });
    assert!(columns[2].default.is_some());
    assert!(columns[2].check.is_some());
    assert_eq!(
        columns[3].references,
        Some(ForeignKeyRef { table: "departments".into(), column: Some("dept_id".into()) })
    );
    assert_eq!(columns[4].ty, types::SqlType::Date);
    assert!(constraints.is_empty());
}

#[test]
fn create_unique_index_on_columns() {
    let stmt = parse_one("CREATE UNIQUE INDEX idx_students_email ON students (email)");
    assert_eq!(
        stmt,
        Statement::CreateIndex {
            name: "idx_students_email".into(),
            table: "students".into(),
            columns: vec!["email".into()],
            unique: true,
        }
    );
}

#[test]
fn transaction_statements() {
    assert_eq!(parse_one("BEGIN TRANSACTION"), Statement::Begin);
    assert_eq!(parse_one("COMMIT"), Statement::Commit);
    assert_eq!(parse_one("ROLLBACK"), Statement::Rollback);
}

#[test]
fn explain_wraps_the_inner_statement() {
    let stmt = parse_one("EXPLAIN SELECT * FROM students WHERE student_id = 60");
    let Statement::Explain { query } = stmt else {
        panic!("expected explain");
    };
    assert!(matches!(*query, Statement::Select(_)));
}

#[test]
fn show_statements() {
    assert_eq!(parse_one("SHOW TABLES"), Statement::ShowTables);
    assert_eq!(parse_one("SHOW VIEWS;"), Statement::ShowViews);
    assert_eq!(parse_one("show triggers"), Statement::ShowTriggers);
    assert_eq!(
        parse_one("SHOW COLUMNS FROM Students"),
        Statement::ShowColumns { table: "students".into() }
    );
    assert_eq!(
        parse_one("SHOW INDEX FROM students"),
        Statement::ShowIndexes { table: "students".into() }
    );
}

#[test]
fn cursor_lifecycle_statements() {
    let stmt = parse_one("DECLARE c1 CURSOR FOR SELECT * FROM students ORDER BY student_id");
    let Statement::DeclareCursor { name, query } = stmt else {
        panic!("expected declare");
    };
    assert_eq!(name, "c1");
    assert_eq!(query.order_by.len(), 1);

    assert_eq!(parse_one("OPEN c1"), Statement::OpenCursor { name: "c1".into() });
    assert_eq!(
        parse_one("FETCH 10 FROM c1"),
        Statement::FetchCursor { name: "c1".into(), count: 10 }
    );
    assert_eq!(
        parse_one("FETCH c1"),
        Statement::FetchCursor { name: "c1".into(), count: 1 }
    );
    assert_eq!(parse_one("CLOSE c1"), Statement::CloseCursor { name: "c1".into() });
}

#[test]
fn trigger_with_condition_and_message() {
    let stmt = parse_one(
        "CREATE TRIGGER trg_gpa_cap BEFORE UPDATE ON students FOR EACH ROW \
         WHEN (gpa > 4.00) SIGNAL SQLSTATE '45000' SET MESSAGE_TEXT = 'gpa out of range'",
    );
    let Statement::CreateTrigger { name, timing, event, table, condition, action } = stmt else {
        panic!("expected create trigger");
    };
    assert_eq!(name, "trg_gpa_cap");
    assert_eq!(timing, TriggerTiming::Before);
    assert_eq!(event, TriggerEvent::Update);
    assert_eq!(table, "students");
    assert!(condition.is_some());
    assert_eq!(
        action,
        TriggerAction::Signal {
            sqlstate: "45000".into(),
            message: Some("gpa out of range".into())
        }
    );

    assert_eq!(
        parse_one("DROP TRIGGER trg_gpa_cap"),
        Statement::DropTrigger { name: "trg_gpa_cap".into() }
    );
}

#[test]
fn use_database() {
    assert_eq!(
        parse_one("USE school"),
        Statement::UseDatabase { name: "school".into() }
    );
}

#[test]
fn decimal_literals_keep_their_scale() {
    let Statement::Select(select) = parse_one("SELECT * FROM t WHERE gpa >= 3.50") else {
        panic!("expected select");
    };
    let Some(Expr::Binary { right, .. }) = select.selection else {
        panic!("expected comparison");
    };
    assert_eq!(
        *right,
        Expr::Literal(types::Value::Decimal { digits: 350, scale: 2 })
    );
}

#[test]
fn unknown_statements_are_parse_errors() {
    let err = parse_sql("GRANT ALL ON x TO y").unwrap_err();
    assert!(matches!(err, DbError::Parser(_)));
}
