//! Row-level evaluation of resolved expressions, including embedded
//! subquery plans.

use crate::{build_executor, ExecutionContext};
use common::{DbError, DbResult, Row};
use expr::{eval_binary, eval_like, eval_unary};
use planner::{PhysicalPlan, ResolvedExpr};
use types::Value;

/// Evaluate an expression against one row. Subqueries run as nested
/// plans; they are uncorrelated, so each execution is self-contained.
pub fn eval_resolved_expr(
    expr: &ResolvedExpr,
    row: &Row,
    ctx: &mut ExecutionContext,
) -> DbResult<Value> {
    match expr {
        ResolvedExpr::Literal(v) => Ok(v.clone()),
        ResolvedExpr::Column(idx) => row
            .values
            .get(*idx)
            .cloned()
            .ok_or_else(|| DbError::Executor(format!("column ordinal {idx} out of range"))),
        ResolvedExpr::Unary { op, expr } => {
            let v = eval_resolved_expr(expr, row, ctx)?;
            eval_unary(*op, &v)
        }
        ResolvedExpr::Binary { left, op, right } => {
            let lv = eval_resolved_expr(left, row, ctx)?;
            let rv = eval_resolved_expr(right, row, ctx)?;
            eval_binary(&lv, *op, &rv)
        }
        ResolvedExpr::Like { expr, pattern, negated } => {
            let text = eval_resolved_expr(expr, row, ctx)?;
            let pattern = eval_resolved_expr(pattern, row, ctx)?;
            eval_like(&text, &pattern, *negated)
        }
        ResolvedExpr::IsNull { expr, negated } => {
            let v = eval_resolved_expr(expr, row, ctx)?;
            Ok(Value::Bool(v.is_null() != *negated))
        }
        ResolvedExpr::InList { expr, list, negated } => {
            let needle = eval_resolved_expr(expr, row, ctx)?;
            let mut haystack = Vec::with_capacity(list.len());
            for item in list {
                haystack.push(eval_resolved_expr(item, row, ctx)?);
            }
            in_membership(&needle, &haystack, *negated)
        }
        ResolvedExpr::ScalarSubquery(plan) => {
            let rows = run_subquery(plan, ctx)?;
            match rows.len() {
                0 => Ok(Value::Null),
                1 => {
                    let row = &rows[0];
                    if row.values.len() != 1 {
                        return Err(DbError::Executor(
                            "scalar subquery must produce one column".into(),
                        ));
                    }
                    Ok(row.values[0].clone())
                }
                n => Err(DbError::Executor(format!(
                    "scalar subquery produced {n} rows"
                ))),
            }
        }
        ResolvedExpr::InSubquery { expr, plan, negated } => {
            let needle = eval_resolved_expr(expr, row, ctx)?;
            let rows = run_subquery(plan, ctx)?;
            let mut haystack = Vec::with_capacity(rows.len());
            for row in rows {
                if row.values.len() != 1 {
                    return Err(DbError::Executor(
                        "IN subquery must produce one column".into(),
                    ));
                }
                haystack.push(row.values.into_iter().next().expect("one column"));
            }
            in_membership(&needle, &haystack, *negated)
        }
    }
}

/// Whether an expression evaluates to TRUE for this row; NULL and FALSE
/// both filter the row out.
pub fn eval_predicate(
    expr: &ResolvedExpr,
    row: &Row,
    ctx: &mut ExecutionContext,
) -> DbResult<bool> {
    match eval_resolved_expr(expr, row, ctx)? {
        Value::Bool(b) => Ok(b),
        Value::Null => Ok(false),
        other => Err(DbError::Type(format!(
            "predicate must be boolean, got {other:?}"
        ))),
    }
}

/// SQL IN semantics: TRUE on a match, NULL (here: filtered as false but
/// propagated as NULL) when no match exists and the set contains NULL.
fn in_membership(needle: &Value, haystack: &[Value], negated: bool) -> DbResult<Value> {
    if needle.is_null() {
        return Ok(Value::Null);
    }
    let mut saw_null = false;
    for candidate in haystack {
        if candidate.is_null() {
            saw_null = true;
            continue;
        }
        if needle.eq_compatible(candidate) == Some(true) {
            return Ok(Value::Bool(!negated));
        }
    }
    if saw_null {
        return Ok(Value::Null);
    }
    Ok(Value::Bool(negated))
}

fn run_subquery(plan: &PhysicalPlan, ctx: &mut ExecutionContext) -> DbResult<Vec<Row>> {
    let mut executor = build_executor(plan.clone())?;
    executor.open(ctx)?;
    let mut rows = Vec::new();
    let outcome = loop {
        match executor.next(ctx) {
            Ok(Some(row)) => rows.push(row),
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    executor.close(ctx)?;
    outcome?;
    Ok(rows)
}
