//! Isolated execution environments over temporary storage.

use btree::BTreeIndex;
use buffer::BufferPool;
use catalog::{Catalog, Column, ForeignKey, TableSchema};
use common::{DbResult, Row, TableId};
use executor::{execute_dml, execute_query, ExecutionContext};
use parser::parse_sql;
use planner::{PhysicalPlan, Planner, PlanningContext};
use storage::DiskManager;
use tempfile::TempDir;
use types::{SqlType, Value};
use wal::{TransactionManager, Wal};

/// A scratch database environment: catalog, buffer pool, WAL, and
/// transaction manager over a temp directory that lives as long as the
/// value does.
pub struct TestEnv {
    pub catalog: Catalog,
    pub pool: BufferPool,
    pub wal: Wal,
    pub txns: TransactionManager,
    _dir: TempDir,
}

impl TestEnv {
    /// Empty environment with a 64-frame pool.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let disk = DiskManager::open(dir.path()).expect("disk manager");
        let wal = Wal::open(dir.path().join("db.wal")).expect("wal");
        Self {
            catalog: Catalog::new(),
            pool: BufferPool::new(disk, 64),
            wal,
            txns: TransactionManager::new(1),
            _dir: dir,
        }
    }

    /// Environment preloaded with the sample school schema:
    /// `departments(dept_id PK, dept_name)` and
    /// `students(student_id PK, name, gpa, dept_id FK)`, with unique
    /// indexes backing both primary keys.
    pub fn with_school_schema() -> Self {
        let mut env = Self::new();

        env.create_table(
            "departments",
            TableSchema::try_new(
                vec![
                    Column::new("dept_id", SqlType::Int).not_null(),
                    Column::new("dept_name", SqlType::Text).not_null(),
                ],
                Some(vec![0]),
                vec![],
                vec![],
            )
            .expect("schema"),
            &[("pk_departments", &["dept_id"], true)],
        );

        env.create_table(
            "students",
            TableSchema::try_new(
                vec![
                    Column::new("student_id", SqlType::Int).not_null(),
                    Column::new("name", SqlType::Varchar { max_len: 64 }).not_null(),
                    Column::new("gpa", SqlType::Decimal { precision: 3, scale: 2 }),
                    Column::new("dept_id", SqlType::Int),
                ],
                Some(vec![0]),
                vec![ForeignKey {
                    columns: vec![3],
                    ref_table: "departments".into(),
                    ref_columns: vec!["dept_id".into()],
                }],
                vec![],
            )
            .expect("schema"),
            &[("pk_students", &["student_id"], true)],
        );

        env
    }

    /// Register a table and create its index files.
    pub fn create_table(
        &mut self,
        name: &str,
        schema: TableSchema,
        indexes: &[(&str, &[&str], bool)],
    ) -> TableId {
        let table_id = self.catalog.create_table(name, schema).expect("create table");
        for (index_name, columns, unique) in indexes {
            let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
            self.catalog
                .create_index(name, index_name, &columns, *unique)
                .expect("create index");
            let file = self
                .catalog
                .table(name)
                .expect("table")
                .index(index_name)
                .expect("index")
                .file;
            BTreeIndex::create(&mut self.pool, file, *unique).expect("index file");
        }
        table_id
    }

    /// Borrow the parts as an `ExecutionContext`.
    pub fn ctx(&mut self) -> ExecutionContext<'_> {
        ExecutionContext::new(&self.catalog, &mut self.pool, &mut self.wal, &mut self.txns)
    }

    /// Plan one SQL statement against the current catalog.
    pub fn plan(&self, sql: &str) -> DbResult<PhysicalPlan> {
        let stmt = parse_sql(sql)?.remove(0);
        let mut ctx = PlanningContext::new(&self.catalog);
        Planner::plan(stmt, &mut ctx)
    }

    /// Plan and run a SELECT, collecting its rows.
    pub fn query(&mut self, sql: &str) -> DbResult<Vec<Row>> {
        let plan = self.plan(sql)?;
        let mut ctx = self.ctx();
        execute_query(plan, &mut ctx)
    }

    /// Plan and run a DML statement inside its own transaction.
    pub fn dml(&mut self, sql: &str) -> DbResult<u64> {
        let plan = self.plan(sql)?;
        self.txns.begin(&mut self.wal)?;
        let result = {
            let mut ctx =
                ExecutionContext::new(&self.catalog, &mut self.pool, &mut self.wal, &mut self.txns);
            execute_dml(plan, &mut ctx)
        };
        match result {
            Ok(count) => {
                self.txns.commit(&mut self.wal)?;
                Ok(count)
            }
            Err(e) => {
                // tests roll back bookkeeping only; undo application is
                // the session layer's job
                self.txns.take_for_rollback();
                Err(e)
            }
        }
    }

    /// Single-column values of a result set, for terse assertions.
    pub fn column(rows: &[Row], idx: usize) -> Vec<Value> {
        rows.iter().map(|r| r.values[idx].clone()).collect()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
