//! Builds the operator tree for a physical plan.

use crate::aggregate::HashAggregateExec;
use crate::dml::{DeleteExec, InsertExec, UpdateExec};
use crate::join::{HashJoinExec, NestedLoopJoinExec};
use crate::limit::LimitExec;
use crate::project::{FilterExec, ProjectExec};
use crate::scan::{IndexScanExec, SeqScanExec};
use crate::sort::SortExec;
use crate::Executor;
use common::DbResult;
use planner::PhysicalPlan;

/// Recursively assemble executors bottom-up.
pub fn build_executor(plan: PhysicalPlan) -> DbResult<Box<dyn Executor>> {
    Ok(match plan {
        PhysicalPlan::SeqScan { table_id, schema } => {
            Box::new(SeqScanExec::new(table_id, schema))
        }
        PhysicalPlan::IndexScan { table_id, index_name, range, schema } => {
            Box::new(IndexScanExec::new(table_id, index_name, range, schema))
        }
        PhysicalPlan::Filter { input, predicate } => {
            Box::new(FilterExec::new(build_executor(*input)?, predicate))
        }
        PhysicalPlan::Project { input, exprs } => {
            Box::new(ProjectExec::new(build_executor(*input)?, exprs))
        }
        PhysicalPlan::NestedLoopJoin { left, right, join_type, condition, schema } => {
            Box::new(NestedLoopJoinExec::new(
                build_executor(*left)?,
                build_executor(*right)?,
                join_type,
                condition,
                schema,
            ))
        }
        PhysicalPlan::HashJoin { left, right, left_key, right_key, residual, schema } => {
            Box::new(HashJoinExec::new(
                build_executor(*left)?,
                build_executor(*right)?,
                left_key,
                right_key,
                residual,
                schema,
            ))
        }
        PhysicalPlan::HashAggregate { input, group_by, aggregates, schema } => {
            Box::new(HashAggregateExec::new(
                build_executor(*input)?,
                group_by,
                aggregates,
                schema,
            ))
        }
        PhysicalPlan::Sort { input, order_by } => {
            Box::new(SortExec::new(build_executor(*input)?, order_by))
        }
        PhysicalPlan::Limit { input, limit, offset } => {
            Box::new(LimitExec::new(build_executor(*input)?, limit, offset))
        }
        PhysicalPlan::Insert { table_id, rows } => Box::new(InsertExec::new(table_id, rows)),
        PhysicalPlan::Update { table_id, assignments, predicate } => {
            Box::new(UpdateExec::new(table_id, assignments, predicate))
        }
        PhysicalPlan::Delete { table_id, predicate } => {
            Box::new(DeleteExec::new(table_id, predicate))
        }
    })
}
