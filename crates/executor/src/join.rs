//! Join operators: nested loops (all join types) and hash join (inner
//! equi-joins, right side builds).

use crate::eval::eval_predicate;
use crate::{ExecutionContext, Executor};
use common::{DbResult, Row};
use hashbrown::HashMap;
use parser::JoinType;
use planner::ResolvedExpr;
use types::Value;

/// Nested loop join. The right input is materialized at open; for the
/// outer variants, unmatched rows are padded with NULLs.
pub struct NestedLoopJoinExec {
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    join_type: JoinType,
    condition: ResolvedExpr,
    schema: Vec<String>,

    right_rows: Vec<Row>,
    right_matched: Vec<bool>,
    current_left: Option<Row>,
    current_left_matched: bool,
    right_cursor: usize,
    left_width: usize,
    /// Post-pass cursor emitting unmatched right rows (RIGHT/FULL joins).
    unmatched_cursor: usize,
    emitting_unmatched: bool,
}

impl NestedLoopJoinExec {
    pub fn new(
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
        join_type: JoinType,
        condition: ResolvedExpr,
        schema: Vec<String>,
    ) -> Self {
        Self {
            left,
            right,
            join_type,
            condition,
            schema,
            right_rows: Vec::new(),
            right_matched: Vec::new(),
            current_left: None,
            current_left_matched: false,
            right_cursor: 0,
            left_width: 0,
            unmatched_cursor: 0,
            emitting_unmatched: false,
        }
    }

    fn combine(&self, left: &Row, right: &Row) -> Row {
        let mut values = left.values.clone();
        values.extend(right.values.iter().cloned());
        Row::new(values)
    }

    fn left_nulls(&self) -> Row {
        Row::new(vec![Value::Null; self.left_width])
    }

    fn right_nulls(&self) -> Row {
        Row::new(vec![Value::Null; self.schema.len() - self.left_width])
    }
}

impl Executor for NestedLoopJoinExec {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.left.open(ctx)?;
        self.right.open(ctx)?;
        self.left_width = self.left.schema().len();

        self.right_rows.clear();
        while let Some(row) = self.right.next(ctx)? {
            self.right_rows.push(row);
        }
        self.right_matched = vec![false; self.right_rows.len()];

        self.current_left = self.left.next(ctx)?;
        self.current_left_matched = false;
        self.right_cursor = 0;
        self.unmatched_cursor = 0;
        self.emitting_unmatched = false;
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        loop {
            if self.emitting_unmatched {
                // RIGHT/FULL tail: right rows no left row ever matched
                while self.unmatched_cursor < self.right_rows.len() {
                    let idx = self.unmatched_cursor;
                    self.unmatched_cursor += 1;
                    if !self.right_matched[idx] {
                        return Ok(Some(
                            self.combine(&self.left_nulls(), &self.right_rows[idx].clone()),
                        ));
                    }
                }
                return Ok(None);
            }

            let Some(left_row) = self.current_left.clone() else {
                if matches!(self.join_type, JoinType::Right | JoinType::Full) {
                    self.emitting_unmatched = true;
                    continue;
                }
                return Ok(None);
            };

            while self.right_cursor < self.right_rows.len() {
                let idx = self.right_cursor;
                self.right_cursor += 1;

                let combined = self.combine(&left_row, &self.right_rows[idx]);
                if eval_predicate(&self.condition, &combined, ctx)? {
                    self.current_left_matched = true;
                    self.right_matched[idx] = true;
                    return Ok(Some(combined));
                }
            }

            // exhausted the right side for this left row
            let emit_left_padded = !self.current_left_matched
                && matches!(self.join_type, JoinType::Left | JoinType::Full);
            self.current_left = self.left.next(ctx)?;
            self.current_left_matched = false;
            self.right_cursor = 0;
            if emit_left_padded {
                return Ok(Some(self.combine(&left_row, &self.right_nulls())));
            }
        }
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.right_rows.clear();
        self.right_matched.clear();
        self.current_left = None;
        self.left.close(ctx)?;
        self.right.close(ctx)
    }

    fn schema(&self) -> &[String] {
        &self.schema
    }
}

/// Hash join for inner equi-joins. The right input builds the table (the
/// planner's default build side); the left input probes. Rows with a NULL
/// key never match.
///
/// Keys are stored in canonical form so joins across compatible
/// representations (INT against BIGINT, DECIMALs of different scale)
/// match exactly the rows the nested-loop path would.
pub struct HashJoinExec {
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    left_key: usize,
    right_key: usize,
    residual: Option<ResolvedExpr>,
    schema: Vec<String>,

    table: HashMap<Value, Vec<Row>>,
    current_left: Option<Row>,
    bucket_cursor: usize,
}

impl HashJoinExec {
    pub fn new(
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
        left_key: usize,
        right_key: usize,
        residual: Option<ResolvedExpr>,
        schema: Vec<String>,
    ) -> Self {
        Self {
            left,
            right,
            left_key,
            right_key,
            residual,
            schema,
            table: HashMap::new(),
            current_left: None,
            bucket_cursor: 0,
        }
    }

    fn combine(left: &Row, right: &Row) -> Row {
        let mut values = left.values.clone();
        values.extend(right.values.iter().cloned());
        Row::new(values)
    }
}

impl Executor for HashJoinExec {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.left.open(ctx)?;
        self.right.open(ctx)?;

        self.table.clear();
        while let Some(row) = self.right.next(ctx)? {
            let key = &row.values[self.right_key];
            if key.is_null() {
                continue;
            }
            let key = key.canonical();
            self.table.entry(key).or_default().push(row);
        }

        self.current_left = self.left.next(ctx)?;
        self.bucket_cursor = 0;
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        loop {
            let Some(left_row) = self.current_left.clone() else {
                return Ok(None);
            };

            let key = &left_row.values[self.left_key];
            if !key.is_null() {
                if let Some(bucket) = self.table.get(&key.canonical()) {
                    while self.bucket_cursor < bucket.len() {
                        let right_row = &bucket[self.bucket_cursor];
                        self.bucket_cursor += 1;

                        let combined = Self::combine(&left_row, right_row);
                        let keep = match &self.residual {
                            Some(pred) => eval_predicate(pred, &combined, ctx)?,
                            None => true,
                        };
                        if keep {
                            return Ok(Some(combined));
                        }
                    }
                }
            }

            self.current_left = self.left.next(ctx)?;
            self.bucket_cursor = 0;
        }
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.table.clear();
        self.current_left = None;
        self.left.close(ctx)?;
        self.right.close(ctx)
    }

    fn schema(&self) -> &[String] {
        &self.schema
    }
}
