use super::*;
use parser::parse_select;
use tempfile::tempdir;
use types::SqlType;

fn students_schema() -> TableSchema {
    TableSchema::try_new(
        vec![
            Column::new("student_id", SqlType::Int).not_null(),
            Column::new("name", SqlType::Varchar { max_len: 64 }).not_null(),
            Column::new("dept_id", SqlType::Int),
        ],
        Some(vec![0]),
        vec![ForeignKey {
            columns: vec![2],
            ref_table: "departments".into(),
            ref_columns: vec!["dept_id".into()],
        }],
        vec![],
    )
    .unwrap()
}

fn departments_schema() -> TableSchema {
    TableSchema::try_new(
        vec![
            Column::new("dept_id", SqlType::Int).not_null(),
            Column::new("dept_name", SqlType::Text).not_null(),
        ],
        Some(vec![0]),
        vec![],
        vec![],
    )
    .unwrap()
}

#[test]
fn create_and_lookup_table() {
    let mut catalog = Catalog::new();
    let id = catalog.create_table("students", students_schema()).unwrap();
    assert_eq!(id, common::TableId(1));

    let table = catalog.table("students").unwrap();
    assert_eq!(table.schema.column_index("name"), Some(1));
    assert_eq!(table.schema.column_type(0), Some(&SqlType::Int));
    assert_eq!(table.schema.primary_key, Some(vec![0]));
    assert_eq!(catalog.table_by_id(id).unwrap().name, "students");
}

#[test]
fn rejects_duplicate_tables_and_columns() {
    let mut catalog = Catalog::new();
    catalog.create_table("students", students_schema()).unwrap();
    let err = catalog.create_table("students", students_schema()).unwrap_err();
    assert!(format!("{err}").contains("already exists"));

    let err = TableSchema::try_new(
        vec![
            Column::new("id", SqlType::Int),
            Column::new("id", SqlType::Int),
        ],
        None,
        vec![],
        vec![],
    )
    .unwrap_err();
    assert!(format!("{err}").contains("duplicate column"));
}

#[test]
fn heap_and_index_files_get_distinct_ids() {
    let mut catalog = Catalog::new();
    catalog.create_table("students", students_schema()).unwrap();
    catalog
        .create_index("students", "idx_students_name", &["name".into()], false)
        .unwrap();

    let table = catalog.table("students").unwrap();
    let index = table.index("idx_students_name").unwrap();
    assert_ne!(table.heap_file, index.file);
    assert_eq!(index.columns, vec![1u16]);
    assert!(!index.unique);
}

#[test]
fn index_names_are_global_and_droppable() {
    let mut catalog = Catalog::new();
    catalog.create_table("students", students_schema()).unwrap();
    catalog.create_table("departments", departments_schema()).unwrap();
    catalog
        .create_index("students", "idx_name", &["name".into()], true)
        .unwrap();

    let err = catalog
        .create_index("departments", "idx_name", &["dept_name".into()], false)
        .unwrap_err();
    assert!(format!("{err}").contains("already exists"));

    let (owner, _) = catalog.index_location("idx_name").unwrap();
    assert_eq!(owner.name, "students");

    catalog.drop_index("idx_name").unwrap();
    assert!(catalog.index_location("idx_name").is_none());
}

#[test]
fn primary_key_index_is_found_by_column_set() {
    let mut catalog = Catalog::new();
    catalog.create_table("students", students_schema()).unwrap();
    catalog
        .create_index("students", "pk_students", &["student_id".into()], true)
        .unwrap();

    let table = catalog.table("students").unwrap();
    let pk = table.primary_key_index().unwrap();
    assert_eq!(pk.name, "pk_students");
}

#[test]
fn referenced_tables_cannot_be_dropped() {
    let mut catalog = Catalog::new();
    catalog.create_table("departments", departments_schema()).unwrap();
    catalog.create_table("students", students_schema()).unwrap();

    let err = catalog.drop_table("departments").unwrap_err();
    assert!(matches!(err, DbError::Constraint(_)));

    catalog.drop_table("students").unwrap();
    catalog.drop_table("departments").unwrap();
}

#[test]
fn views_round_trip_their_query_ast() {
    let mut catalog = Catalog::new();
    catalog.create_table("students", students_schema()).unwrap();

    let query = parse_select("SELECT name FROM students WHERE dept_id = 1").unwrap();
    catalog.create_view("cs_students", query.clone(), false).unwrap();
    assert_eq!(catalog.view("cs_students").unwrap().query, query);

    let err = catalog.create_view("cs_students", query.clone(), false).unwrap_err();
    assert!(format!("{err}").contains("already exists"));

    let replacement = parse_select("SELECT name FROM students").unwrap();
    catalog.create_view("cs_students", replacement.clone(), true).unwrap();
    assert_eq!(catalog.view("cs_students").unwrap().query, replacement);

    catalog.drop_view("cs_students").unwrap();
    assert!(catalog.view("cs_students").is_err());
}

#[test]
fn triggers_filter_by_table_event_and_timing() {
    let mut catalog = Catalog::new();
    catalog.create_table("students", students_schema()).unwrap();

    catalog
        .create_trigger(TriggerMeta {
            name: "no_inserts".into(),
            table: "students".into(),
            timing: TriggerTiming::Before,
            event: TriggerEvent::Insert,
            condition: None,
            action: TriggerAction::Signal { sqlstate: "45000".into(), message: None },
        })
        .unwrap();

    assert_eq!(
        catalog
            .triggers_for("students", TriggerEvent::Insert, TriggerTiming::Before)
            .len(),
        1
    );
    assert!(catalog
        .triggers_for("students", TriggerEvent::Delete, TriggerTiming::Before)
        .is_empty());

    catalog.drop_trigger("no_inserts").unwrap();
    assert!(catalog.drop_trigger("no_inserts").is_err());
}

#[test]
fn dropping_a_table_drops_its_triggers() {
    let mut catalog = Catalog::new();
    catalog.create_table("students", students_schema()).unwrap();
    catalog
        .create_trigger(TriggerMeta {
            name: "guard".into(),
            table: "students".into(),
            timing: TriggerTiming::After,
            event: TriggerEvent::Update,
            condition: None,
            action: TriggerAction::Signal { sqlstate: "45000".into(), message: None },
        })
        .unwrap();

    catalog.drop_table("students").unwrap();
    assert_eq!(catalog.triggers().count(), 0);
}

#[test]
fn persistence_round_trip() {
    let mut catalog = Catalog::new();
    catalog.create_table("departments", departments_schema()).unwrap();
    catalog.create_table("students", students_schema()).unwrap();
    catalog
        .create_index("students", "pk_students", &["student_id".into()], true)
        .unwrap();
    catalog
        .create_view(
            "roster",
            parse_select("SELECT name FROM students").unwrap(),
            false,
        )
        .unwrap();

    let dir = tempdir().unwrap();
    let path = dir.path().join("catalog.json");
    catalog.save(&path).unwrap();

    let loaded = Catalog::load(&path).unwrap();
    let table = loaded.table("students").unwrap();
    assert!(table.has_index("pk_students"));
    assert_eq!(table.schema.column_index("dept_id"), Some(2));
    assert_eq!(loaded.view("roster").unwrap().name, "roster");

    // id counters survive, so new objects do not collide
    let mut loaded = loaded;
    let next = loaded.create_table("rooms", departments_schema()).unwrap();
    assert_eq!(next, common::TableId(3));
}
