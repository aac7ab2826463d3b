//! Session surface: statement dispatch over one database directory at a
//! time, with DDL, implicit/explicit transactions with statement-level
//! rollback, cursors, introspection, and crash recovery on open.
//!
//! A database is a directory holding one page file per table heap and
//! per index, one catalog file, and one write-ahead log. `USE` switches
//! databases; the previous one is checkpointed and closed.

mod ddl;
mod recovery;

use anyhow::{Context, Result};
use buffer::BufferPool;
use catalog::Catalog;
use common::{Config, DbError, DbResult, Lsn, RecordBatch, Row, TxnId};
use executor::{execute_dml, execute_query, ExecutionContext};
use hashbrown::HashMap;
use heap::TableHeap;
use log::{debug, info};
use parser::{parse_sql, Select, Statement};
use planner::{explain, Planner, PlanningContext};
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use storage::DiskManager;
use wal::{LogRecord, TransactionManager, Wal};

/// Statements between automatic checkpoints.
const CHECKPOINT_EVERY: u64 = 64;

/// Outcome of one statement.
#[derive(Debug)]
pub enum QueryResult {
    /// Query returned rows.
    Rows(RecordBatch),
    /// DML affected N rows.
    Count { affected: u64 },
    /// DDL or control statement with no result.
    Empty,
}

impl QueryResult {
    /// Human-readable form for line-oriented clients: result sets render
    /// as a table, everything else as a one-line acknowledgement.
    pub fn render(&self) -> String {
        match self {
            QueryResult::Rows(batch) => {
                common::pretty::render_record_batch(batch, common::pretty::TableStyleKind::Ascii)
            }
            QueryResult::Count { affected } => format!("{affected} row(s) affected"),
            QueryResult::Empty => "ok".into(),
        }
    }
}

/// A suspended query driven by FETCH. Opened cursors hold their result
/// set; everything is released on CLOSE or transaction end.
struct Cursor {
    query: Select,
    schema: Vec<String>,
    rows: Option<VecDeque<Row>>,
}

/// One open database: its catalog, buffer pool, log, and transaction
/// state.
pub(crate) struct DbState {
    name: String,
    catalog_path: PathBuf,
    wal_path: PathBuf,
    pub(crate) catalog: Catalog,
    pub(crate) pool: BufferPool,
    pub(crate) wal: Wal,
    pub(crate) txns: TransactionManager,
    cursors: HashMap<String, Cursor>,
    commits_since_checkpoint: u64,
}

/// The engine's top-level handle: a single-session database server over
/// one data directory.
pub struct Database {
    config: Config,
    state: Option<DbState>,
}

impl Database {
    /// Open the engine over the configured data directory. No database is
    /// selected until `USE` (or [`Database::use_database`]).
    pub fn open(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("failed to create data directory {}", config.data_dir.display())
        })?;
        Ok(Self { config, state: None })
    }

    /// Parse and run SQL. With several statements, results of all but the
    /// last are discarded.
    pub fn execute(&mut self, sql: &str) -> Result<QueryResult> {
        let statements = parse_sql(sql)?;
        let mut last = QueryResult::Empty;
        for stmt in statements {
            last = self.execute_statement(stmt)?;
        }
        Ok(last)
    }

    /// Checkpoint and close the selected database.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut state) = self.state.take() {
            state.checkpoint()?;
            info!("closed database '{}'", state.name);
        }
        Ok(())
    }

    pub fn current_database(&self) -> Option<&str> {
        self.state.as_ref().map(|s| s.name.as_str())
    }

    pub fn create_database(&mut self, name: &str) -> DbResult<()> {
        let dir = self.config.data_dir.join(name);
        if dir.exists() {
            return Err(DbError::Semantic(format!("database '{name}' already exists")));
        }
        fs::create_dir_all(&dir)?;
        info!("created database '{name}'");
        Ok(())
    }

    /// Select a database, checkpointing and closing the previous one.
    /// Opening runs crash recovery over the database's log.
    pub fn use_database(&mut self, name: &str) -> DbResult<()> {
        let dir = self.config.data_dir.join(name);
        if !dir.exists() {
            return Err(DbError::NotFound(format!("database '{name}'")));
        }

        if let Some(mut previous) = self.state.take() {
            previous.checkpoint()?;
        }

        let catalog_path = dir.join("catalog.json");
        let wal_path = dir.join("db.wal");
        let catalog = Catalog::load(&catalog_path)?;
        let disk = DiskManager::open(&dir)?;
        let pool = BufferPool::new(disk, self.config.buffer_pool_pages);
        let wal = Wal::open(&wal_path)?;

        let mut state = DbState {
            name: name.to_string(),
            catalog_path,
            wal_path,
            catalog,
            pool,
            wal,
            txns: TransactionManager::new(1),
            cursors: HashMap::new(),
            commits_since_checkpoint: 0,
        };
        if self.config.wal_enabled {
            recovery::recover(&mut state)?;
        }
        self.state = Some(state);
        info!("using database '{name}'");
        Ok(())
    }

    fn state(&mut self) -> DbResult<&mut DbState> {
        self.state
            .as_mut()
            .ok_or_else(|| DbError::Semantic("no database selected; run USE first".into()))
    }

    fn execute_statement(&mut self, stmt: Statement) -> Result<QueryResult> {
        match stmt {
            Statement::CreateDatabase { name } => {
                self.create_database(&name)?;
                Ok(QueryResult::Empty)
            }
            Statement::UseDatabase { name } => {
                self.use_database(&name)?;
                Ok(QueryResult::Empty)
            }
            other => {
                let wal_enabled = self.config.wal_enabled;
                let state = self.state()?;
                Ok(state.execute_statement(other, wal_enabled)?)
            }
        }
    }
}

impl DbState {
    fn execute_statement(&mut self, stmt: Statement, journal: bool) -> DbResult<QueryResult> {
        match stmt {
            // DDL runs outside transactions and persists the catalog
            Statement::CreateTable { .. }
            | Statement::DropTable { .. }
            | Statement::CreateIndex { .. }
            | Statement::DropIndex { .. }
            | Statement::CreateView { .. }
            | Statement::AlterView { .. }
            | Statement::DropView { .. }
            | Statement::CreateTrigger { .. }
            | Statement::DropTrigger { .. } => {
                self.txns.check_usable()?;
                if self.txns.in_transaction() {
                    return Err(DbError::Semantic(
                        "DDL inside an explicit transaction is not supported".into(),
                    ));
                }
                let result = self.execute_ddl(stmt)?;
                self.catalog.save(&self.catalog_path)?;
                // DDL is durable immediately: new index roots and
                // backfilled nodes exist only in the pool until flushed,
                // and the WAL cannot rebuild them
                self.checkpoint()?;
                Ok(result)
            }

            Statement::Begin => {
                self.txns.check_usable()?;
                self.txns.begin(&mut self.wal)?;
                Ok(QueryResult::Empty)
            }
            Statement::Commit => {
                self.commit_txn()?;
                Ok(QueryResult::Empty)
            }
            Statement::Rollback => {
                self.rollback_txn()?;
                Ok(QueryResult::Empty)
            }

            Statement::Select(select) => {
                self.txns.check_usable()?;
                let batch = self.run_select(*select)?;
                Ok(QueryResult::Rows(batch))
            }

            Statement::Insert { .. } | Statement::Update { .. } | Statement::Delete { .. } => {
                self.txns.check_usable()?;
                let plan = {
                    let mut ctx = PlanningContext::new(&self.catalog);
                    Planner::plan(stmt, &mut ctx)?
                };
                let affected = self.run_dml(plan, journal)?;
                Ok(QueryResult::Count { affected })
            }

            Statement::Explain { query } => {
                let plan = {
                    let mut ctx = PlanningContext::new(&self.catalog);
                    Planner::plan(*query, &mut ctx)?
                };
                let rendered = explain(&plan, &self.catalog);
                let rows = rendered
                    .lines()
                    .map(|line| Row::new(vec![types::Value::Text(line.to_string())]))
                    .collect();
                Ok(QueryResult::Rows(RecordBatch {
                    columns: vec!["plan".into()],
                    rows,
                }))
            }

            Statement::DeclareCursor { name, query } => {
                self.txns.check_usable()?;
                let schema = {
                    let mut ctx = PlanningContext::new(&self.catalog);
                    Planner::plan_select((*query).clone(), &mut ctx)?.output_schema()
                };
                self.cursors.insert(
                    name,
                    Cursor { query: *query, schema, rows: None },
                );
                Ok(QueryResult::Empty)
            }
            Statement::OpenCursor { name } => {
                self.txns.check_usable()?;
                let query = self
                    .cursors
                    .get(&name)
                    .map(|c| c.query.clone())
                    .ok_or_else(|| DbError::NotFound(format!("cursor '{name}'")))?;
                let batch = self.run_select(query)?;
                let cursor = self.cursors.get_mut(&name).expect("checked above");
                cursor.rows = Some(batch.rows.into());
                Ok(QueryResult::Empty)
            }
            Statement::FetchCursor { name, count } => {
                self.txns.check_usable()?;
                let cursor = self
                    .cursors
                    .get_mut(&name)
                    .ok_or_else(|| DbError::NotFound(format!("cursor '{name}'")))?;
                let rows = cursor
                    .rows
                    .as_mut()
                    .ok_or_else(|| DbError::Semantic(format!("cursor '{name}' is not open")))?;
                let taken: Vec<Row> = (0..count).filter_map(|_| rows.pop_front()).collect();
                Ok(QueryResult::Rows(RecordBatch {
                    columns: cursor.schema.clone(),
                    rows: taken,
                }))
            }
            Statement::CloseCursor { name } => {
                self.cursors
                    .remove(&name)
                    .ok_or_else(|| DbError::NotFound(format!("cursor '{name}'")))?;
                Ok(QueryResult::Empty)
            }

            Statement::ShowTables
            | Statement::ShowColumns { .. }
            | Statement::ShowIndexes { .. }
            | Statement::ShowTriggers
            | Statement::ShowViews => Ok(QueryResult::Rows(self.run_show(stmt)?)),

            Statement::CreateDatabase { .. } | Statement::UseDatabase { .. } => {
                unreachable!("handled by the session")
            }
        }
    }

    fn run_select(&mut self, select: Select) -> DbResult<RecordBatch> {
        let plan = {
            let mut ctx = PlanningContext::new(&self.catalog);
            Planner::plan_select(select, &mut ctx)?
        };
        let columns = plan.output_schema();
        let mut ctx =
            ExecutionContext::new(&self.catalog, &mut self.pool, &mut self.wal, &mut self.txns);
        let rows = execute_query(plan, &mut ctx)?;
        debug_assert_eq!(self.pool.pinned_frames(), 0);
        Ok(RecordBatch { columns, rows })
    }

    /// Run one DML plan as a statement: implicitly wrapped in its own
    /// transaction outside BEGIN, or journaled onto the open one. A
    /// failed statement always reverses its own effects; inside an
    /// explicit transaction it additionally poisons the transaction.
    fn run_dml(&mut self, plan: planner::PhysicalPlan, journal: bool) -> DbResult<u64> {
        let implicit = !self.txns.in_transaction();
        if implicit {
            self.txns.begin(&mut self.wal)?;
        }
        let mark = self.txns.undo_len();

        let result = {
            let mut ctx =
                ExecutionContext::new(&self.catalog, &mut self.pool, &mut self.wal, &mut self.txns);
            ctx.journal = journal;
            execute_dml(plan, &mut ctx)
        };
        debug_assert_eq!(self.pool.pinned_frames(), 0);

        match result {
            Ok(affected) => {
                if implicit {
                    self.commit_txn()?;
                }
                Ok(affected)
            }
            Err(e) => {
                if implicit {
                    self.rollback_txn()?;
                } else {
                    let tail = self.txns.take_undo_tail(mark);
                    self.apply_undo_chain(&tail)?;
                    self.txns.mark_aborted();
                }
                Err(e)
            }
        }
    }

    /// COMMIT: append the record and fsync before acknowledging.
    fn commit_txn(&mut self) -> DbResult<()> {
        self.txns.commit(&mut self.wal)?;
        self.cursors.clear();
        self.commits_since_checkpoint += 1;
        if self.commits_since_checkpoint >= CHECKPOINT_EVERY {
            self.checkpoint()?;
        }
        Ok(())
    }

    /// ROLLBACK: walk the undo chain in reverse applying before-images,
    /// then journal ABORT. A no-op without an open transaction.
    fn rollback_txn(&mut self) -> DbResult<()> {
        let txn = self.txns.current().map(|t| t.id);
        let chain = self.txns.take_for_rollback();
        if let Some(txn) = txn {
            self.apply_undo_chain(&chain)?;
            self.wal.append(&LogRecord::Abort { txn })?;
        }
        self.cursors.clear();
        Ok(())
    }

    /// Apply undo records (newest first), journaling a compensation
    /// record ahead of each reversal.
    fn apply_undo_chain(&mut self, chain: &[(Lsn, LogRecord)]) -> DbResult<()> {
        for (lsn, record) in chain {
            let Some(inverse) = recovery::inverse(record) else {
                continue;
            };
            let txn = record.txn().unwrap_or(TxnId(0));
            let clsn = self.wal.append(&LogRecord::Compensate {
                txn,
                undone: *lsn,
                action: Box::new(inverse.clone()),
            })?;
            recovery::apply_mutation(&self.catalog, &mut self.pool, &inverse, clsn)?;
        }
        Ok(())
    }

    /// Make everything durable: sync the log, flush all dirty pages, cut
    /// a checkpoint record, and (with no transaction in flight) truncate
    /// the log.
    pub(crate) fn checkpoint(&mut self) -> DbResult<()> {
        let active: Vec<TxnId> = self.txns.current().map(|t| t.id).into_iter().collect();
        // the log must be durable before any page it covers
        self.wal.sync()?;
        self.pool.flush_all()?;
        self.wal.append(&LogRecord::Checkpoint { active: active.clone() })?;
        self.wal.sync()?;
        if active.is_empty() {
            self.wal.truncate()?;
        }
        self.commits_since_checkpoint = 0;
        debug!("checkpoint complete for '{}'", self.name);
        Ok(())
    }

    fn run_show(&mut self, stmt: Statement) -> DbResult<RecordBatch> {
        use types::Value::Text;

        let batch = match stmt {
            Statement::ShowTables => RecordBatch {
                columns: vec!["table".into()],
                rows: self
                    .catalog
                    .tables()
                    .map(|t| Row::new(vec![Text(t.name.clone())]))
                    .collect(),
            },
            Statement::ShowColumns { table } => {
                let meta = self.catalog.table(&table)?;
                RecordBatch {
                    columns: vec!["column".into(), "type".into(), "nullable".into()],
                    rows: meta
                        .schema
                        .columns
                        .iter()
                        .map(|c| {
                            Row::new(vec![
                                Text(c.name.clone()),
                                Text(c.ty.to_string()),
                                Text(if c.nullable { "YES" } else { "NO" }.into()),
                            ])
                        })
                        .collect(),
                }
            }
            Statement::ShowIndexes { table } => {
                let meta = self.catalog.table(&table)?;
                RecordBatch {
                    columns: vec!["index".into(), "columns".into(), "unique".into()],
                    rows: meta
                        .indexes()
                        .iter()
                        .map(|ix| {
                            let columns = ix
                                .columns
                                .iter()
                                .filter_map(|o| meta.schema.column(*o))
                                .map(|c| c.name.clone())
                                .collect::<Vec<_>>()
                                .join(", ");
                            Row::new(vec![
                                Text(ix.name.clone()),
                                Text(columns),
                                Text(if ix.unique { "YES" } else { "NO" }.into()),
                            ])
                        })
                        .collect(),
                }
            }
            Statement::ShowTriggers => RecordBatch {
                columns: vec!["trigger".into(), "table".into(), "timing".into(), "event".into()],
                rows: self
                    .catalog
                    .triggers()
                    .map(|t| {
                        Row::new(vec![
                            Text(t.name.clone()),
                            Text(t.table.clone()),
                            Text(format!("{:?}", t.timing).to_uppercase()),
                            Text(format!("{:?}", t.event).to_uppercase()),
                        ])
                    })
                    .collect(),
            },
            Statement::ShowViews => RecordBatch {
                columns: vec!["view".into()],
                rows: self
                    .catalog
                    .views()
                    .map(|v| Row::new(vec![Text(v.name.clone())]))
                    .collect(),
            },
            other => {
                return Err(DbError::Semantic(format!(
                    "not an introspection statement: {other:?}"
                )))
            }
        };
        Ok(batch)
    }

    /// Backfill a newly created index from the table's existing rows.
    fn backfill_index(&mut self, table: &str, index_name: &str) -> DbResult<()> {
        let meta = self.catalog.table(table)?.clone();
        let index = meta.index(index_name)?.clone();
        let tree = btree::BTreeIndex::open(&mut self.pool, index.file, index.unique)?;
        let heap = TableHeap::new(meta.heap_file);

        let mut cursor = heap::ScanCursor::default();
        while let Some((rid, row)) = heap.scan_next(&mut self.pool, &mut cursor)? {
            if let Some(key) = index.key_for(&row.values) {
                tree.insert(&mut self.pool, key, rid, Lsn(0))?;
            }
        }
        Ok(())
    }
}
