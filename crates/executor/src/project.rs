//! Projection: evaluates output expressions over each input row.

use crate::eval::eval_resolved_expr;
use crate::{ExecutionContext, Executor};
use common::{DbResult, Row};
use planner::ResolvedExpr;

pub struct ProjectExec {
    input: Box<dyn Executor>,
    exprs: Vec<(String, ResolvedExpr)>,
    schema: Vec<String>,
}

impl ProjectExec {
    pub fn new(input: Box<dyn Executor>, exprs: Vec<(String, ResolvedExpr)>) -> Self {
        let schema = exprs.iter().map(|(label, _)| label.clone()).collect();
        Self { input, exprs, schema }
    }
}

impl Executor for ProjectExec {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        let Some(row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        let mut values = Vec::with_capacity(self.exprs.len());
        for (_, expr) in &self.exprs {
            values.push(eval_resolved_expr(expr, &row, ctx)?);
        }
        let mut out = Row::new(values);
        out.set_rid(row.rid());
        Ok(Some(out))
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.input.close(ctx)
    }

    fn schema(&self) -> &[String] {
        &self.schema
    }
}

/// Filter: passes rows whose predicate evaluates to TRUE.
pub struct FilterExec {
    input: Box<dyn Executor>,
    predicate: ResolvedExpr,
}

impl FilterExec {
    pub fn new(input: Box<dyn Executor>, predicate: ResolvedExpr) -> Self {
        Self { input, predicate }
    }
}

impl Executor for FilterExec {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        while let Some(row) = self.input.next(ctx)? {
            if crate::eval::eval_predicate(&self.predicate, &row, ctx)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.input.close(ctx)
    }

    fn schema(&self) -> &[String] {
        self.input.schema()
    }
}
