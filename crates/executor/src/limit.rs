//! Limit/offset: skips then caps its input. `LIMIT 0` produces nothing.

use crate::{ExecutionContext, Executor};
use common::{DbResult, Row};

pub struct LimitExec {
    input: Box<dyn Executor>,
    limit: Option<u64>,
    offset: Option<u64>,
    skipped: u64,
    produced: u64,
}

impl LimitExec {
    pub fn new(input: Box<dyn Executor>, limit: Option<u64>, offset: Option<u64>) -> Self {
        Self { input, limit, offset, skipped: 0, produced: 0 }
    }
}

impl Executor for LimitExec {
    fn open(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.skipped = 0;
        self.produced = 0;
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Row>> {
        if let Some(limit) = self.limit {
            if self.produced >= limit {
                return Ok(None);
            }
        }

        while self.skipped < self.offset.unwrap_or(0) {
            if self.input.next(ctx)?.is_none() {
                return Ok(None);
            }
            self.skipped += 1;
        }

        match self.input.next(ctx)? {
            Some(row) => {
                self.produced += 1;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.input.close(ctx)
    }

    fn schema(&self) -> &[String] {
        self.input.schema()
    }
}
