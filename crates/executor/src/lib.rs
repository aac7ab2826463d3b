//! Query executor: drives physical plans with a Volcano-style pull model.
//!
//! Every operator implements [`Executor`]: `open` acquires resources,
//! `next` pulls one row, `close` releases. DML operators enforce the
//! column and table constraints, keep every index in step with the heap
//! inside the same transaction boundary, and fire row triggers.

mod aggregate;
mod builder;
mod dml;
mod eval;
mod join;
mod limit;
mod project;
mod scan;
mod sort;

pub use builder::build_executor;
pub use eval::eval_resolved_expr;
pub use join::NestedLoopJoinExec;
pub use limit::LimitExec;
pub use sort::SortExec;

use btree::BTreeIndex;
use buffer::BufferPool;
use catalog::{Catalog, TableMeta};
use common::{DbError, DbResult, Lsn, Row, TableId};
use heap::TableHeap;
use planner::PhysicalPlan;
use types::Value;
use wal::{LogRecord, TransactionManager, Wal};

/// Volcano iterator contract. Operators must not retain references into a
/// row across `next` calls; rows are handed out by value.
pub trait Executor {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()>;
    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>>;
    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()>;
    fn schema(&self) -> &[String];
}

/// Shared state threaded through every operator: catalog for metadata,
/// buffer pool for pages, WAL and transaction manager for journaling.
pub struct ExecutionContext<'a> {
    pub catalog: &'a Catalog,
    pub pool: &'a mut BufferPool,
    pub wal: &'a mut Wal,
    pub txns: &'a mut TransactionManager,
    /// When false (journaling disabled by config), mutations skip the log.
    pub journal: bool,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(
        catalog: &'a Catalog,
        pool: &'a mut BufferPool,
        wal: &'a mut Wal,
        txns: &'a mut TransactionManager,
    ) -> Self {
        Self { catalog, pool, wal, txns, journal: true }
    }

    pub fn table_meta(&self, table_id: TableId) -> DbResult<&'a TableMeta> {
        self.catalog.table_by_id(table_id)
    }

    pub fn table_heap(&self, table_id: TableId) -> DbResult<TableHeap> {
        Ok(TableHeap::new(self.table_meta(table_id)?.heap_file))
    }

    pub fn open_index(&mut self, table_id: TableId, name: &str) -> DbResult<BTreeIndex> {
        let meta = self.table_meta(table_id)?;
        let index = meta.index(name)?;
        BTreeIndex::open(self.pool, index.file, index.unique)
    }

    /// Journal a mutation, returning the LSN to stamp pages with.
    pub fn log_mutation(&mut self, record: LogRecord) -> DbResult<Lsn> {
        if !self.journal {
            return Ok(Lsn(0));
        }
        self.txns.log_mutation(self.wal, record)
    }
}

/// Run a row-producing plan to completion and collect the results.
pub fn execute_query(plan: PhysicalPlan, ctx: &mut ExecutionContext) -> DbResult<Vec<Row>> {
    let mut executor = build_executor(plan)?;

    executor.open(ctx)?;
    let mut results = Vec::new();
    let outcome = loop {
        match executor.next(ctx) {
            Ok(Some(row)) => results.push(row),
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    // close on every path so pins and cursors are released
    executor.close(ctx)?;
    outcome?;

    Ok(results)
}

/// Run an INSERT/UPDATE/DELETE plan, returning the affected row count.
pub fn execute_dml(plan: PhysicalPlan, ctx: &mut ExecutionContext) -> DbResult<u64> {
    let mut executor = build_executor(plan)?;

    executor.open(ctx)?;
    let result = executor.next(ctx);
    executor.close(ctx)?;

    let row = result?.ok_or_else(|| DbError::Executor("DML produced no result".into()))?;
    match row.values.first() {
        Some(Value::BigInt(count)) => Ok(*count as u64),
        other => Err(DbError::Executor(format!(
            "DML result must be a row count, got {other:?}"
        ))),
    }
}
