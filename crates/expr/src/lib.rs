//! Value-level evaluation semantics shared by the planner and executor:
//! comparison and logic with SQL NULL handling, integer/decimal arithmetic,
//! and `LIKE` pattern matching.

#[cfg(test)]
mod tests;

use common::{DbError, DbResult};
use regex::Regex;
use std::cmp::Ordering;
use types::Value;

/// Binary operators in evaluation precedence-free form; precedence is the
/// front end's concern.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Aggregate functions accepted in SELECT lists and HAVING.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    pub fn name(&self) -> &'static str {
        match self {
            AggFunc::Count => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Avg => "AVG",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
        }
    }
}

/// Evaluate a binary operator over two values.
///
/// Comparison with a NULL operand yields NULL; AND/OR follow three-valued
/// logic so `FALSE AND NULL` is `FALSE` and `TRUE OR NULL` is `TRUE`.
pub fn eval_binary(l: &Value, op: BinaryOp, r: &Value) -> DbResult<Value> {
    use BinaryOp::*;

    match op {
        And | Or => return eval_logic(l, op, r),
        Add | Sub | Mul | Div => return eval_arithmetic(l, op, r),
        _ => {}
    }

    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }

    let ord = l.cmp_compatible(r).ok_or_else(|| {
        DbError::Type(format!("cannot compare {l:?} with {r:?}"))
    })?;

    let result = match op {
        Eq => ord == Ordering::Equal,
        Ne => ord != Ordering::Equal,
        Lt => ord == Ordering::Less,
        Le => ord != Ordering::Greater,
        Gt => ord == Ordering::Greater,
        Ge => ord != Ordering::Less,
        _ => unreachable!(),
    };

    Ok(Value::Bool(result))
}

/// Evaluate a unary operator.
pub fn eval_unary(op: UnaryOp, v: &Value) -> DbResult<Value> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    match op {
        UnaryOp::Not => {
            let b = v
                .as_bool()
                .ok_or_else(|| DbError::Type(format!("NOT expects bool, got {v:?}")))?;
            Ok(Value::Bool(!b))
        }
        UnaryOp::Neg => match v {
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::BigInt(i) => Ok(Value::BigInt(-i)),
            Value::Decimal { digits, scale } => Ok(Value::Decimal { digits: -digits, scale: *scale }),
            other => Err(DbError::Type(format!("cannot negate {other:?}"))),
        },
    }
}

fn eval_logic(l: &Value, op: BinaryOp, r: &Value) -> DbResult<Value> {
    let to_opt_bool = |v: &Value| -> DbResult<Option<bool>> {
        match v {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(*b)),
            other => Err(DbError::Type(format!("AND/OR expects bool, got {other:?}"))),
        }
    };
    let lb = to_opt_bool(l)?;
    let rb = to_opt_bool(r)?;

    let out = match op {
        BinaryOp::And => match (lb, rb) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        BinaryOp::Or => match (lb, rb) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        _ => unreachable!(),
    };

    Ok(out.map(Value::Bool).unwrap_or(Value::Null))
}

fn eval_arithmetic(l: &Value, op: BinaryOp, r: &Value) -> DbResult<Value> {
    use Value::*;

    if l.is_null() || r.is_null() {
        return Ok(Null);
    }

    // Decimal arithmetic works on rescaled fixed-point digits.
    if let (Decimal { .. }, _) | (_, Decimal { .. }) = (l, r) {
        return eval_decimal_arithmetic(l, op, r);
    }

    let (a, b) = match (l.as_i64(), r.as_i64()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(DbError::Type(format!(
                "arithmetic expects numeric operands, got {l:?} and {r:?}"
            )))
        }
    };

    let out = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div => {
            if b == 0 {
                return Err(DbError::Executor("division by zero".into()));
            }
            a.checked_div(b)
        }
        _ => unreachable!(),
    };
    let out = out.ok_or_else(|| DbError::Type("integer overflow".into()))?;

    // Two INT operands stay INT when the result still fits.
    match (l, r) {
        (Int(_), Int(_)) => Ok(i32::try_from(out).map(Int).unwrap_or(BigInt(out))),
        _ => Ok(BigInt(out)),
    }
}

fn eval_decimal_arithmetic(l: &Value, op: BinaryOp, r: &Value) -> DbResult<Value> {
    let widen = |v: &Value, scale: u8| -> Option<(i128, u8)> {
        match v {
            Value::Decimal { digits, scale } => Some((*digits as i128, *scale)),
            other => other
                .as_i64()
                .map(|i| (i as i128 * 10i128.pow(scale as u32), scale)),
        }
    };
    let scale = match (l, r) {
        (Value::Decimal { scale: a, .. }, Value::Decimal { scale: b, .. }) => *a.max(b),
        (Value::Decimal { scale, .. }, _) | (_, Value::Decimal { scale, .. }) => *scale,
        _ => 0,
    };
    let ((mut a, sa), (mut b, sb)) = match (widen(l, scale), widen(r, scale)) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(DbError::Type(format!(
                "arithmetic expects numeric operands, got {l:?} and {r:?}"
            )))
        }
    };
    a *= 10i128.pow((scale - sa) as u32);
    b *= 10i128.pow((scale - sb) as u32);

    let digits = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => (a * b) / 10i128.pow(scale as u32),
        BinaryOp::Div => {
            if b == 0 {
                return Err(DbError::Executor("division by zero".into()));
            }
            (a * 10i128.pow(scale as u32)) / b
        }
        _ => unreachable!(),
    };

    i64::try_from(digits)
        .map(|digits| Value::Decimal { digits, scale })
        .map_err(|_| DbError::Type("decimal overflow".into()))
}

/// SQL `LIKE` matching with `%` (any run) and `_` (any single character).
/// NULL text or pattern yields NULL.
pub fn eval_like(text: &Value, pattern: &Value, negated: bool) -> DbResult<Value> {
    if text.is_null() || pattern.is_null() {
        return Ok(Value::Null);
    }
    let text = text
        .as_str()
        .ok_or_else(|| DbError::Type(format!("LIKE expects text, got {text:?}")))?;
    let pattern = pattern
        .as_str()
        .ok_or_else(|| DbError::Type(format!("LIKE pattern must be text, got {pattern:?}")))?;

    let matched = like_regex(pattern)
        .map_err(|e| DbError::Executor(format!("bad LIKE pattern: {e}")))?
        .is_match(text);
    Ok(Value::Bool(matched != negated))
}

fn like_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut rx = String::with_capacity(pattern.len() + 8);
    rx.push('^');
    for ch in pattern.chars() {
        match ch {
            '%' => rx.push_str(".*"),
            '_' => rx.push('.'),
            other => rx.push_str(&regex::escape(&other.to_string())),
        }
    }
    rx.push('$');
    // (?s) so % crosses newlines in TEXT columns
    Regex::new(&format!("(?s){rx}"))
}
