//! Row and expression builders, plus an in-memory executor that stands in
//! for a scan in operator-level tests.

use common::{DbResult, Row};
use executor::{ExecutionContext, Executor};
use planner::ResolvedExpr;
use types::Value;

/// Produces a fixed row set; no storage involved.
pub struct MockExec {
    rows: Vec<Row>,
    schema: Vec<String>,
    cursor: usize,
}

impl MockExec {
    pub fn new(rows: Vec<Row>, schema: Vec<String>) -> Self {
        Self { rows, schema, cursor: 0 }
    }
}

impl Executor for MockExec {
    fn open(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self, _ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        if self.cursor >= self.rows.len() {
            return Ok(None);
        }
        let row = self.rows[self.cursor].clone();
        self.cursor += 1;
        Ok(Some(row))
    }

    fn close(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        Ok(())
    }

    fn schema(&self) -> &[String] {
        &self.schema
    }
}

/// Build a row of BIGINT values.
pub fn int_row(values: &[i64]) -> Row {
    Row::new(values.iter().map(|&v| Value::BigInt(v)).collect())
}

/// Build a row of TEXT values.
pub fn text_row(values: &[&str]) -> Row {
    Row::new(values.iter().map(|&v| Value::Text(v.to_string())).collect())
}

/// Literal expression shorthands.
pub fn lit_int(v: i64) -> ResolvedExpr {
    ResolvedExpr::Literal(Value::BigInt(v))
}

pub fn lit_text(v: &str) -> ResolvedExpr {
    ResolvedExpr::Literal(Value::Text(v.into()))
}

pub fn lit_bool(v: bool) -> ResolvedExpr {
    ResolvedExpr::Literal(Value::Bool(v))
}

pub fn col(ordinal: usize) -> ResolvedExpr {
    ResolvedExpr::Column(ordinal)
}

pub fn binary(left: ResolvedExpr, op: expr::BinaryOp, right: ResolvedExpr) -> ResolvedExpr {
    ResolvedExpr::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}
