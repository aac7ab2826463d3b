//! DML operators. Each statement enforces the column and table
//! constraints, fires row triggers, journals before/after images, and
//! propagates every index change inside the same transaction boundary as
//! the heap change.

use crate::eval::{eval_predicate, eval_resolved_expr};
use crate::{ExecutionContext, Executor};
use catalog::TableMeta;
use common::{DbError, DbResult, Lsn, RecordId, Row, TableId, TxnId};
use heap::{ScanCursor, TableHeap};
use parser::{TriggerAction, TriggerEvent, TriggerTiming};
use planner::{bind_standalone, ResolvedExpr};
use types::Value;
use wal::LogRecord;

/// INSERT: evaluates value rows, validates, writes heap + indexes + WAL.
pub struct InsertExec {
    table_id: TableId,
    rows: Vec<Vec<ResolvedExpr>>,
    schema: Vec<String>,
    executed: bool,
}

impl InsertExec {
    pub fn new(table_id: TableId, rows: Vec<Vec<ResolvedExpr>>) -> Self {
        Self {
            table_id,
            rows,
            schema: vec!["count".into()],
            executed: false,
        }
    }
}

impl Executor for InsertExec {
    fn open(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        self.executed = false;
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        if self.executed {
            return Ok(None);
        }
        self.executed = true;

        let meta = ctx.table_meta(self.table_id)?.clone();
        let guards = StatementGuards::prepare(ctx, &meta, TriggerEvent::Insert)?;
        let mut heap = ctx.table_heap(self.table_id)?;
        let txn = current_txn(ctx)?;

        let anchor = Row::new(Vec::new());
        let mut count = 0i64;
        for exprs in &self.rows {
            let mut raw = Vec::with_capacity(exprs.len());
            for expr in exprs {
                raw.push(eval_resolved_expr(expr, &anchor, ctx)?);
            }
            let row = Row::new(coerce_row(&meta, raw)?);

            guards.run_checks(&row, ctx)?;
            guards.fire(TriggerTiming::Before, &row, ctx)?;
            ensure_unique(ctx, &meta, &row, None)?;
            ensure_foreign_keys_exist(ctx, &meta, &row)?;

            // placement decides the RID, so the record is journaled right
            // after the heap write and its LSN stamped back onto the page
            let rid = heap.insert(ctx.pool, &row, Lsn(0))?;
            let lsn = ctx.log_mutation(LogRecord::Insert {
                txn,
                table: self.table_id,
                rid,
                after: row.values.clone(),
            })?;
            heap.stamp_lsn(ctx.pool, rid.page_id, lsn)?;
            insert_index_entries(ctx, &meta, &row, rid, lsn)?;

            guards.fire(TriggerTiming::After, &row, ctx)?;
            count += 1;
        }

        Ok(Some(Row::new(vec![Value::BigInt(count)])))
    }

    fn close(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        Ok(())
    }

    fn schema(&self) -> &[String] {
        &self.schema
    }
}

/// UPDATE: rewrites matching rows in place (RIDs are stable even when a
/// tuple relocates behind a forwarding stub).
pub struct UpdateExec {
    table_id: TableId,
    assignments: Vec<(common::ColumnId, ResolvedExpr)>,
    predicate: Option<ResolvedExpr>,
    schema: Vec<String>,
    executed: bool,
}

impl UpdateExec {
    pub fn new(
        table_id: TableId,
        assignments: Vec<(common::ColumnId, ResolvedExpr)>,
        predicate: Option<ResolvedExpr>,
    ) -> Self {
        Self {
            table_id,
            assignments,
            predicate,
            schema: vec!["count".into()],
            executed: false,
        }
    }
}

impl Executor for UpdateExec {
    fn open(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        self.executed = false;
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        if self.executed {
            return Ok(None);
        }
        self.executed = true;

        let meta = ctx.table_meta(self.table_id)?.clone();
        let guards = StatementGuards::prepare(ctx, &meta, TriggerEvent::Update)?;
        let mut heap = ctx.table_heap(self.table_id)?;
        let txn = current_txn(ctx)?;

        let targets = collect_targets(ctx, &heap, self.predicate.as_ref())?;

        let mut count = 0i64;
        for old_row in targets {
            let rid = old_row.rid().expect("scan rows carry their RID");

            let mut new_values = old_row.values.clone();
            for (ordinal, expr) in &self.assignments {
                let value = eval_resolved_expr(expr, &old_row, ctx)?;
                let column = meta
                    .schema
                    .column(*ordinal)
                    .ok_or_else(|| DbError::Executor("assignment ordinal out of range".into()))?;
                new_values[*ordinal as usize] = coerce_value(value, column)?;
            }
            let new_row = Row::new(new_values).with_rid(rid);

            guards.run_checks(&new_row, ctx)?;
            guards.fire(TriggerTiming::Before, &new_row, ctx)?;
            ensure_unique(ctx, &meta, &new_row, Some(rid))?;
            ensure_foreign_keys_exist(ctx, &meta, &new_row)?;
            ensure_not_referenced_on_change(ctx, &meta, &old_row, Some(&new_row))?;

            let lsn = ctx.log_mutation(LogRecord::Update {
                txn,
                table: self.table_id,
                rid,
                before: old_row.values.clone(),
                after: new_row.values.clone(),
            })?;
            heap.update(ctx.pool, rid, &new_row, lsn)?;

            // only re-key the indexes whose key actually changed
            for index in meta.indexes() {
                let old_key = index.key_for(&old_row.values);
                let new_key = index.key_for(&new_row.values);
                if old_key == new_key {
                    continue;
                }
                let tree = ctx.open_index(self.table_id, &index.name)?;
                if let Some(key) = old_key {
                    tree.delete(ctx.pool, &key, rid, lsn)?;
                }
                if let Some(key) = new_key {
                    tree.insert(ctx.pool, key, rid, lsn)?;
                }
            }

            guards.fire(TriggerTiming::After, &new_row, ctx)?;
            count += 1;
        }

        Ok(Some(Row::new(vec![Value::BigInt(count)])))
    }

    fn close(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        Ok(())
    }

    fn schema(&self) -> &[String] {
        &self.schema
    }
}

/// DELETE: removes matching rows and their index entries.
pub struct DeleteExec {
    table_id: TableId,
    predicate: Option<ResolvedExpr>,
    schema: Vec<String>,
    executed: bool,
}

impl DeleteExec {
    pub fn new(table_id: TableId, predicate: Option<ResolvedExpr>) -> Self {
        Self {
            table_id,
            predicate,
            schema: vec!["count".into()],
            executed: false,
        }
    }
}

impl Executor for DeleteExec {
    fn open(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        self.executed = false;
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        if self.executed {
            return Ok(None);
        }
        self.executed = true;

        let meta = ctx.table_meta(self.table_id)?.clone();
        let guards = StatementGuards::prepare(ctx, &meta, TriggerEvent::Delete)?;
        let mut heap = ctx.table_heap(self.table_id)?;
        let txn = current_txn(ctx)?;

        let targets = collect_targets(ctx, &heap, self.predicate.as_ref())?;

        let mut count = 0i64;
        for old_row in targets {
            let rid = old_row.rid().expect("scan rows carry their RID");

            guards.fire(TriggerTiming::Before, &old_row, ctx)?;
            ensure_not_referenced_on_change(ctx, &meta, &old_row, None)?;

            let lsn = ctx.log_mutation(LogRecord::Delete {
                txn,
                table: self.table_id,
                rid,
                before: old_row.values.clone(),
            })?;
            heap.delete(ctx.pool, rid, lsn)?;
            delete_index_entries(ctx, &meta, &old_row, rid, lsn)?;

            guards.fire(TriggerTiming::After, &old_row, ctx)?;
            count += 1;
        }

        Ok(Some(Row::new(vec![Value::BigInt(count)])))
    }

    fn close(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        Ok(())
    }

    fn schema(&self) -> &[String] {
        &self.schema
    }
}

// ---- shared statement machinery ----

/// CHECK constraints and triggers bound once per statement.
struct StatementGuards {
    checks: Vec<(String, ResolvedExpr)>,
    before: Vec<BoundTrigger>,
    after: Vec<BoundTrigger>,
}

struct BoundTrigger {
    name: String,
    condition: Option<ResolvedExpr>,
    sqlstate: String,
    message: Option<String>,
}

impl StatementGuards {
    fn prepare(
        ctx: &ExecutionContext,
        meta: &TableMeta,
        event: TriggerEvent,
    ) -> DbResult<Self> {
        let columns = meta.schema.column_names();

        let mut checks = Vec::new();
        for column in &meta.schema.columns {
            if let Some(check) = &column.check {
                checks.push((
                    format!("check on column '{}'", column.name),
                    bind_standalone(check, &columns, ctx.catalog)?,
                ));
            }
        }
        for (i, check) in meta.schema.checks.iter().enumerate() {
            checks.push((
                format!("table check #{}", i + 1),
                bind_standalone(check, &columns, ctx.catalog)?,
            ));
        }

        let bind_triggers = |timing: TriggerTiming| -> DbResult<Vec<BoundTrigger>> {
            ctx.catalog
                .triggers_for(&meta.name, event, timing)
                .into_iter()
                .map(|t| {
                    let TriggerAction::Signal { sqlstate, message } = &t.action;
                    Ok(BoundTrigger {
                        name: t.name.clone(),
                        condition: t
                            .condition
                            .as_ref()
                            .map(|c| bind_standalone(c, &columns, ctx.catalog))
                            .transpose()?,
                        sqlstate: sqlstate.clone(),
                        message: message.clone(),
                    })
                })
                .collect()
        };

        Ok(Self {
            checks,
            before: bind_triggers(TriggerTiming::Before)?,
            after: bind_triggers(TriggerTiming::After)?,
        })
    }

    /// CHECK passes on TRUE and on NULL (unknown), per SQL.
    fn run_checks(&self, row: &Row, ctx: &mut ExecutionContext) -> DbResult<()> {
        for (desc, check) in &self.checks {
            match eval_resolved_expr(check, row, ctx)? {
                Value::Bool(false) => {
                    return Err(DbError::Constraint(format!("{desc} failed")));
                }
                Value::Bool(true) | Value::Null => {}
                other => {
                    return Err(DbError::Type(format!(
                        "{desc} must be boolean, got {other:?}"
                    )))
                }
            }
        }
        Ok(())
    }

    /// A SIGNAL trigger whose condition holds aborts the statement with a
    /// constraint violation carrying the declared SQLSTATE and message.
    fn fire(&self, timing: TriggerTiming, row: &Row, ctx: &mut ExecutionContext) -> DbResult<()> {
        let set = match timing {
            TriggerTiming::Before => &self.before,
            TriggerTiming::After => &self.after,
        };
        for trigger in set {
            let fires = match &trigger.condition {
                Some(condition) => eval_predicate(condition, row, ctx)?,
                None => true,
            };
            if fires {
                let message = trigger
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("trigger '{}' raised", trigger.name));
                return Err(DbError::Constraint(format!(
                    "[{}] {message}",
                    trigger.sqlstate
                )));
            }
        }
        Ok(())
    }
}

fn current_txn(ctx: &ExecutionContext) -> DbResult<TxnId> {
    if !ctx.journal {
        return Ok(TxnId(0));
    }
    ctx.txns
        .current()
        .map(|t| t.id)
        .ok_or_else(|| DbError::Wal("mutation outside a transaction".into()))
}

/// Coerce evaluated values onto the schema and enforce NOT NULL.
fn coerce_row(meta: &TableMeta, values: Vec<Value>) -> DbResult<Vec<Value>> {
    if values.len() != meta.schema.columns.len() {
        return Err(DbError::Semantic(format!(
            "row has {} values for {} columns",
            values.len(),
            meta.schema.columns.len()
        )));
    }
    values
        .into_iter()
        .zip(&meta.schema.columns)
        .map(|(value, column)| coerce_value(value, column))
        .collect()
}

fn coerce_value(value: Value, column: &catalog::Column) -> DbResult<Value> {
    if value.is_null() {
        if !column.nullable {
            return Err(DbError::Constraint(format!(
                "column '{}' is NOT NULL",
                column.name
            )));
        }
        return Ok(Value::Null);
    }
    value.coerce(&column.ty).ok_or_else(|| {
        DbError::Type(format!(
            "value {value} is not coercible to {} for column '{}'",
            column.ty, column.name
        ))
    })
}

/// Materialize the target rows of an UPDATE/DELETE before mutating, so
/// the scan never observes its own writes.
fn collect_targets(
    ctx: &mut ExecutionContext,
    heap: &TableHeap,
    predicate: Option<&ResolvedExpr>,
) -> DbResult<Vec<Row>> {
    let mut cursor = ScanCursor::default();
    let mut targets = Vec::new();
    while let Some((rid, row)) = heap.scan_next(ctx.pool, &mut cursor)? {
        let row = row.with_rid(rid);
        let keep = match predicate {
            Some(pred) => eval_predicate(pred, &row, ctx)?,
            None => true,
        };
        if keep {
            targets.push(row);
        }
    }
    Ok(targets)
}

fn insert_index_entries(
    ctx: &mut ExecutionContext,
    meta: &TableMeta,
    row: &Row,
    rid: RecordId,
    lsn: Lsn,
) -> DbResult<()> {
    for index in meta.indexes() {
        if let Some(key) = index.key_for(&row.values) {
            let tree = ctx.open_index(meta.id, &index.name)?;
            tree.insert(ctx.pool, key, rid, lsn)?;
        }
    }
    Ok(())
}

fn delete_index_entries(
    ctx: &mut ExecutionContext,
    meta: &TableMeta,
    row: &Row,
    rid: RecordId,
    lsn: Lsn,
) -> DbResult<()> {
    for index in meta.indexes() {
        if let Some(key) = index.key_for(&row.values) {
            let tree = ctx.open_index(meta.id, &index.name)?;
            tree.delete(ctx.pool, &key, rid, lsn)?;
        }
    }
    Ok(())
}

/// Consult every unique index before mutating; `exclude` skips the row's
/// own entry during UPDATE.
fn ensure_unique(
    ctx: &mut ExecutionContext,
    meta: &TableMeta,
    row: &Row,
    exclude: Option<RecordId>,
) -> DbResult<()> {
    for index in meta.indexes() {
        if !index.unique {
            continue;
        }
        let Some(key) = index.key_for(&row.values) else {
            continue;
        };
        let tree = ctx.open_index(meta.id, &index.name)?;
        let existing = tree.search(ctx.pool, &key)?;
        let clash = existing.iter().any(|rid| Some(*rid) != exclude);
        if clash {
            return Err(DbError::Constraint(format!(
                "duplicate key for unique index '{}'",
                index.name
            )));
        }
    }
    Ok(())
}

/// FOREIGN KEY, outbound: every non-null FK value must match a row in the
/// referenced table.
fn ensure_foreign_keys_exist(
    ctx: &mut ExecutionContext,
    meta: &TableMeta,
    row: &Row,
) -> DbResult<()> {
    for fk in &meta.schema.foreign_keys {
        let mut values = Vec::with_capacity(fk.columns.len());
        let mut any_null = false;
        for ordinal in &fk.columns {
            let v = row.values[*ordinal as usize].clone();
            any_null |= v.is_null();
            values.push(v);
        }
        if any_null {
            continue;
        }

        let ref_meta = ctx.catalog.table(&fk.ref_table)?.clone();
        let ref_ordinals = fk
            .ref_columns
            .iter()
            .map(|name| {
                ref_meta.schema.column_index(name).ok_or_else(|| {
                    DbError::Catalog(format!(
                        "foreign key references unknown column '{name}' on '{}'",
                        fk.ref_table
                    ))
                })
            })
            .collect::<DbResult<Vec<_>>>()?;

        let found = match unique_index_on(&ref_meta, &ref_ordinals) {
            Some(index_name) => {
                let tree = ctx.open_index(ref_meta.id, &index_name)?;
                !tree.search(ctx.pool, &values)?.is_empty()
            }
            None => rows_matching(ctx, &ref_meta, &ref_ordinals, &values)?,
        };
        if !found {
            return Err(DbError::Constraint(format!(
                "foreign key violation: no row in '{}' matches {values:?}",
                fk.ref_table
            )));
        }
    }
    Ok(())
}

/// FOREIGN KEY, inbound (RESTRICT): reject deleting or re-keying a row
/// that other tables still reference.
fn ensure_not_referenced_on_change(
    ctx: &mut ExecutionContext,
    meta: &TableMeta,
    old_row: &Row,
    new_row: Option<&Row>,
) -> DbResult<()> {
    let dependents: Vec<(TableMeta, Vec<common::ColumnId>, Vec<common::ColumnId>)> = ctx
        .catalog
        .tables()
        .flat_map(|t| {
            t.schema
                .foreign_keys
                .iter()
                .filter(|fk| fk.ref_table == meta.name)
                .map(|fk| {
                    let ref_ordinals = fk
                        .ref_columns
                        .iter()
                        .filter_map(|name| meta.schema.column_index(name))
                        .collect::<Vec<_>>();
                    (t.clone(), fk.columns.clone(), ref_ordinals)
                })
                .collect::<Vec<_>>()
        })
        .collect();

    for (dependent, fk_columns, ref_ordinals) in dependents {
        let old_key: Vec<Value> = ref_ordinals
            .iter()
            .map(|o| old_row.values[*o as usize].clone())
            .collect();
        if old_key.iter().any(Value::is_null) {
            continue;
        }
        if let Some(new_row) = new_row {
            let new_key: Vec<Value> = ref_ordinals
                .iter()
                .map(|o| new_row.values[*o as usize].clone())
                .collect();
            if new_key == old_key {
                continue;
            }
        }
        if rows_matching(ctx, &dependent, &fk_columns, &old_key)? {
            return Err(DbError::Constraint(format!(
                "row is referenced by table '{}' (RESTRICT)",
                dependent.name
            )));
        }
    }
    Ok(())
}

/// A unique index exactly covering the given columns, if one exists.
fn unique_index_on(meta: &TableMeta, ordinals: &[common::ColumnId]) -> Option<String> {
    meta.indexes()
        .iter()
        .find(|ix| ix.unique && ix.columns == ordinals)
        .map(|ix| ix.name.clone())
}

/// Whether any row of `meta` matches `values` at `ordinals`.
fn rows_matching(
    ctx: &mut ExecutionContext,
    meta: &TableMeta,
    ordinals: &[common::ColumnId],
    values: &[Value],
) -> DbResult<bool> {
    let heap = TableHeap::new(meta.heap_file);
    let mut cursor = ScanCursor::default();
    while let Some((_, row)) = heap.scan_next(ctx.pool, &mut cursor)? {
        let all_match = ordinals.iter().zip(values).all(|(ordinal, expected)| {
            row.values
                .get(*ordinal as usize)
                .and_then(|v| v.eq_compatible(expected))
                .unwrap_or(false)
        });
        if all_match {
            return Ok(true);
        }
    }
    Ok(false)
}
