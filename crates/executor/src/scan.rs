//! Scan operators: SeqScan over the heap and IndexScan through a B+ tree.

use crate::eval::eval_resolved_expr;
use crate::{ExecutionContext, Executor};
use btree::{BTreeIndex, KeyRange, RangeScan};
use common::{DbError, DbResult, Row, TableId};
use heap::{ScanCursor, TableHeap};
use planner::IndexRange;

/// Full-table scan in physical row order.
pub struct SeqScanExec {
    table_id: TableId,
    schema: Vec<String>,
    heap: Option<TableHeap>,
    cursor: ScanCursor,
}

impl SeqScanExec {
    pub fn new(table_id: TableId, schema: Vec<String>) -> Self {
        Self {
            table_id,
            schema,
            heap: None,
            cursor: ScanCursor::default(),
        }
    }
}

impl Executor for SeqScanExec {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.heap = Some(ctx.table_heap(self.table_id)?);
        self.cursor = ScanCursor::default();
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        let heap = self
            .heap
            .as_ref()
            .ok_or_else(|| DbError::Executor("scan used before open".into()))?;
        match heap.scan_next(ctx.pool, &mut self.cursor)? {
            Some((_, row)) => Ok(Some(row)),
            None => Ok(None),
        }
    }

    fn close(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        self.heap = None;
        Ok(())
    }

    fn schema(&self) -> &[String] {
        &self.schema
    }
}

/// Key-ordered scan: walks the index for RIDs, fetching each tuple from
/// the heap. The bounds come from the planner as literal expressions and
/// are evaluated once at open.
pub struct IndexScanExec {
    table_id: TableId,
    index_name: String,
    range: IndexRange,
    schema: Vec<String>,
    state: Option<(BTreeIndex, RangeScan, TableHeap)>,
}

impl IndexScanExec {
    pub fn new(
        table_id: TableId,
        index_name: String,
        range: IndexRange,
        schema: Vec<String>,
    ) -> Self {
        Self {
            table_id,
            index_name,
            range,
            schema,
            state: None,
        }
    }

    fn key_range(&self, ctx: &mut ExecutionContext) -> DbResult<KeyRange> {
        let anchor = Row::new(Vec::new());
        let mut eq = Vec::with_capacity(self.range.eq_prefix.len());
        for bound in &self.range.eq_prefix {
            eq.push(eval_resolved_expr(bound, &anchor, ctx)?);
        }

        let mut low = eq.clone();
        let mut low_inclusive = true;
        if let Some((bound, inclusive)) = &self.range.low {
            low.push(eval_resolved_expr(bound, &anchor, ctx)?);
            low_inclusive = *inclusive;
        }
        let mut high = eq.clone();
        let mut high_inclusive = true;
        if let Some((bound, inclusive)) = &self.range.high {
            high.push(eval_resolved_expr(bound, &anchor, ctx)?);
            high_inclusive = *inclusive;
        }

        Ok(KeyRange {
            low: (!low.is_empty()).then_some(low),
            low_inclusive,
            high: (!high.is_empty()).then_some(high),
            high_inclusive,
        })
    }
}

impl Executor for IndexScanExec {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        let range = self.key_range(ctx)?;
        let index = ctx.open_index(self.table_id, &self.index_name)?;
        let scan = index.range(ctx.pool, range)?;
        let heap = ctx.table_heap(self.table_id)?;
        self.state = Some((index, scan, heap));
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        let (index, scan, heap) = self
            .state
            .as_mut()
            .ok_or_else(|| DbError::Executor("index scan used before open".into()))?;

        match index.range_next(ctx.pool, scan)? {
            Some((key, rid)) => {
                let row = heap.get(ctx.pool, rid)?.ok_or_else(|| {
                    DbError::Storage(format!(
                        "index entry {key:?} points at missing tuple {rid:?}"
                    ))
                })?;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        self.state = None;
        Ok(())
    }

    fn schema(&self) -> &[String] {
        &self.schema
    }
}

