//! Hash aggregation: COUNT, SUM, AVG, MIN, MAX over optional group keys.

use crate::eval::eval_resolved_expr;
use crate::{ExecutionContext, Executor};
use common::{DbError, DbResult, Row};
use expr::{eval_binary, AggFunc, BinaryOp};
use hashbrown::HashMap;
use planner::{PhysicalAgg, ResolvedExpr};
use types::Value;

/// Running state of one aggregate within one group.
#[derive(Clone, Debug)]
struct AggState {
    count: i64,
    /// Sum for SUM/AVG, current extreme for MIN/MAX.
    acc: Value,
}

impl AggState {
    fn new() -> Self {
        Self { count: 0, acc: Value::Null }
    }

    fn fold(&mut self, func: AggFunc, value: &Value) -> DbResult<()> {
        if value.is_null() {
            return Ok(());
        }
        self.count += 1;
        match func {
            AggFunc::Count => {}
            AggFunc::Sum | AggFunc::Avg => {
                self.acc = if self.acc.is_null() {
                    value.clone()
                } else {
                    eval_binary(&self.acc, BinaryOp::Add, value)?
                };
            }
            AggFunc::Min => {
                if self.acc.is_null() || value.cmp_compatible(&self.acc) == Some(std::cmp::Ordering::Less) {
                    self.acc = value.clone();
                }
            }
            AggFunc::Max => {
                if self.acc.is_null() || value.cmp_compatible(&self.acc) == Some(std::cmp::Ordering::Greater) {
                    self.acc = value.clone();
                }
            }
        }
        Ok(())
    }

    fn finish(&self, func: AggFunc) -> DbResult<Value> {
        match func {
            AggFunc::Count => Ok(Value::BigInt(self.count)),
            AggFunc::Sum | AggFunc::Min | AggFunc::Max => Ok(self.acc.clone()),
            AggFunc::Avg => {
                if self.count == 0 {
                    return Ok(Value::Null);
                }
                eval_binary(&self.acc, BinaryOp::Div, &Value::BigInt(self.count))
            }
        }
    }
}

/// Materializing hash aggregate. Output rows are group key values
/// followed by aggregate results; with no GROUP BY a single global group
/// is emitted even for empty input.
pub struct HashAggregateExec {
    input: Box<dyn Executor>,
    group_by: Vec<ResolvedExpr>,
    aggregates: Vec<PhysicalAgg>,
    schema: Vec<String>,
    output: Vec<Row>,
    cursor: usize,
}

impl HashAggregateExec {
    pub fn new(
        input: Box<dyn Executor>,
        group_by: Vec<ResolvedExpr>,
        aggregates: Vec<PhysicalAgg>,
        schema: Vec<String>,
    ) -> Self {
        Self {
            input,
            group_by,
            aggregates,
            schema,
            output: Vec::new(),
            cursor: 0,
        }
    }

    fn build(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        // group key -> aggregate states, in first-seen order
        let mut groups: HashMap<Vec<Value>, Vec<AggState>> = HashMap::new();
        let mut order: Vec<Vec<Value>> = Vec::new();

        while let Some(row) = self.input.next(ctx)? {
            let mut key = Vec::with_capacity(self.group_by.len());
            for expr in &self.group_by {
                key.push(eval_resolved_expr(expr, &row, ctx)?);
            }

            if !groups.contains_key(&key) {
                order.push(key.clone());
                groups.insert(key.clone(), vec![AggState::new(); self.aggregates.len()]);
            }
            let states = groups.get_mut(&key).expect("inserted above");

            for (agg, state) in self.aggregates.iter().zip(states.iter_mut()) {
                match &agg.arg {
                    Some(arg) => {
                        let value = eval_resolved_expr(arg, &row, ctx)?;
                        state.fold(agg.func, &value)?;
                    }
                    None => {
                        // COUNT(*) counts rows regardless of NULLs
                        if agg.func != AggFunc::Count {
                            return Err(DbError::Executor(format!(
                                "{}(*) is not valid",
                                agg.func.name()
                            )));
                        }
                        state.count += 1;
                    }
                }
            }
        }

        // a global aggregate emits one row even with no input
        if self.group_by.is_empty() && order.is_empty() {
            order.push(Vec::new());
            groups.insert(Vec::new(), vec![AggState::new(); self.aggregates.len()]);
        }

        self.output = order
            .into_iter()
            .map(|key| {
                let states = &groups[&key];
                let mut values = key;
                for (agg, state) in self.aggregates.iter().zip(states) {
                    values.push(state.finish(agg.func)?);
                }
                Ok(Row::new(values))
            })
            .collect::<DbResult<Vec<_>>>()?;
        Ok(())
    }
}

impl Executor for HashAggregateExec {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.input.open(ctx)?;
        self.output.clear();
        self.cursor = 0;
        self.build(ctx)
    }

    fn next(&mut self, _ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        if self.cursor >= self.output.len() {
            return Ok(None);
        }
        let row = self.output[self.cursor].clone();
        self.cursor += 1;
        Ok(Some(row))
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.output.clear();
        self.input.close(ctx)
    }

    fn schema(&self) -> &[String] {
        &self.schema
    }
}
