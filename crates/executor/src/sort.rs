//! Sort: materializes its input and emits rows in key order. NULLs sort
//! first in ascending order.

use crate::{ExecutionContext, Executor};
use common::{DbResult, Row};
use parser::SortDirection;

pub struct SortExec {
    input: Box<dyn Executor>,
    order_by: Vec<(usize, SortDirection)>,
    sorted: Vec<Row>,
    cursor: usize,
}

impl SortExec {
    pub fn new(input: Box<dyn Executor>, order_by: Vec<(usize, SortDirection)>) -> Self {
        Self { input, order_by, sorted: Vec::new(), cursor: 0 }
    }
}

impl Executor for SortExec {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.input.open(ctx)?;
        self.sorted.clear();
        self.cursor = 0;

        while let Some(row) = self.input.next(ctx)? {
            self.sorted.push(row);
        }

        let keys = self.order_by.clone();
        self.sorted.sort_by(|a, b| {
            for (ordinal, direction) in &keys {
                let ord = a.values[*ordinal].cmp(&b.values[*ordinal]);
                let ord = match direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
        Ok(())
    }

    fn next(&mut self, _ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        if self.cursor >= self.sorted.len() {
            return Ok(None);
        }
        let row = self.sorted[self.cursor].clone();
        self.cursor += 1;
        Ok(Some(row))
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.sorted.clear();
        self.input.close(ctx)
    }

    fn schema(&self) -> &[String] {
        self.input.schema()
    }
}
