//! Query planner: lowers the front end's AST to a logical plan, applies
//! simple rewrite rules, and binds names to ordinals while choosing the
//! physical access paths.
//!
//! # Pipeline
//!
//! ```text
//! Statement
//!     ↓ lower          (views expanded, aggregates separated)
//! LogicalPlan          (table and column names)
//!     ↓ optimize       (filter pushdown)
//!     ↓ bind           (names → ids/ordinals, access path selection)
//! PhysicalPlan         (executor-ready)
//! ```
//!
//! Access path rules: an equality or range on the leading column of an
//! index turns a scan+filter into an index scan with a residual filter;
//! candidate indexes tie-break by uniqueness, then matched prefix length,
//! then name. Hash join is used for inner equi-joins with the right child
//! as the build side; ORDER BY collapses into an index scan that already
//! yields the requested order.


use catalog::{Catalog, IndexMeta, TableMeta};
use common::{ColumnId, DbError, DbResult, TableId};
use expr::{AggFunc, BinaryOp, UnaryOp};
use hashbrown::HashSet;
use parser::{
    Expr, JoinType, OrderByExpr, Select, SelectItem, SortDirection, Statement, TableRef,
};
use types::Value;

const MAX_VIEW_DEPTH: usize = 16;

/// Logical plan node: optimizer-friendly, still name-based.
#[derive(Clone, Debug, PartialEq)]
pub enum LogicalPlan {
    TableScan {
        table: String,
        /// Qualifier the query refers to this table by (alias or name).
        alias: String,
    },
    Filter {
        input: Box<LogicalPlan>,
        predicate: Expr,
    },
    Project {
        input: Box<LogicalPlan>,
        items: Vec<(String, Expr)>,
        wildcard: bool,
    },
    Aggregate {
        input: Box<LogicalPlan>,
        group_by: Vec<Expr>,
        aggregates: Vec<Expr>,
    },
    Sort {
        input: Box<LogicalPlan>,
        order_by: Vec<OrderByExpr>,
    },
    Limit {
        input: Box<LogicalPlan>,
        limit: Option<u64>,
        offset: Option<u64>,
    },
    Join {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        join_type: JoinType,
        condition: Expr,
    },
    Insert {
        table: String,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Expr>>,
    },
    Update {
        table: String,
        assignments: Vec<(String, Expr)>,
        predicate: Option<Expr>,
    },
    Delete {
        table: String,
        predicate: Option<Expr>,
    },
}

/// Expression with column references bound to row ordinals. Subqueries are
/// planned in place so the executor can run them as nested plans.
#[derive(Clone, Debug, PartialEq)]
pub enum ResolvedExpr {
    Literal(Value),
    Column(usize),
    Unary {
        op: UnaryOp,
        expr: Box<ResolvedExpr>,
    },
    Binary {
        left: Box<ResolvedExpr>,
        op: BinaryOp,
        right: Box<ResolvedExpr>,
    },
    Like {
        expr: Box<ResolvedExpr>,
        pattern: Box<ResolvedExpr>,
        negated: bool,
    },
    IsNull {
        expr: Box<ResolvedExpr>,
        negated: bool,
    },
    InList {
        expr: Box<ResolvedExpr>,
        list: Vec<ResolvedExpr>,
        negated: bool,
    },
    ScalarSubquery(Box<PhysicalPlan>),
    InSubquery {
        expr: Box<ResolvedExpr>,
        plan: Box<PhysicalPlan>,
        negated: bool,
    },
}

/// Key constraints an index scan runs with: an equality prefix plus an
/// optional range on the following key column. Bounds are literal-valued
/// expressions evaluated once at open time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexRange {
    pub eq_prefix: Vec<ResolvedExpr>,
    pub low: Option<(ResolvedExpr, bool)>,
    pub high: Option<(ResolvedExpr, bool)>,
}

/// One aggregate computed by `HashAggregate`.
#[derive(Clone, Debug, PartialEq)]
pub struct PhysicalAgg {
    pub func: AggFunc,
    pub arg: Option<ResolvedExpr>,
}

/// Physical plan node: executor-ready with resolved ids and ordinals.
#[derive(Clone, Debug, PartialEq)]
pub enum PhysicalPlan {
    SeqScan {
        table_id: TableId,
        schema: Vec<String>,
    },
    IndexScan {
        table_id: TableId,
        index_name: String,
        range: IndexRange,
        schema: Vec<String>,
    },
    Filter {
        input: Box<PhysicalPlan>,
        predicate: ResolvedExpr,
    },
    Project {
        input: Box<PhysicalPlan>,
        exprs: Vec<(String, ResolvedExpr)>,
    },
    NestedLoopJoin {
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
        join_type: JoinType,
        condition: ResolvedExpr,
        schema: Vec<String>,
    },
    HashJoin {
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
        left_key: usize,
        right_key: usize,
        residual: Option<ResolvedExpr>,
        schema: Vec<String>,
    },
    HashAggregate {
        input: Box<PhysicalPlan>,
        group_by: Vec<ResolvedExpr>,
        aggregates: Vec<PhysicalAgg>,
        schema: Vec<String>,
    },
    Sort {
        input: Box<PhysicalPlan>,
        order_by: Vec<(usize, SortDirection)>,
    },
    Limit {
        input: Box<PhysicalPlan>,
        limit: Option<u64>,
        offset: Option<u64>,
    },
    Insert {
        table_id: TableId,
        rows: Vec<Vec<ResolvedExpr>>,
    },
    Update {
        table_id: TableId,
        assignments: Vec<(ColumnId, ResolvedExpr)>,
        predicate: Option<ResolvedExpr>,
    },
    Delete {
        table_id: TableId,
        predicate: Option<ResolvedExpr>,
    },
}

impl PhysicalPlan {
    /// Column labels of the rows this node produces.
    pub fn output_schema(&self) -> Vec<String> {
        match self {
            PhysicalPlan::SeqScan { schema, .. }
            | PhysicalPlan::IndexScan { schema, .. }
            | PhysicalPlan::NestedLoopJoin { schema, .. }
            | PhysicalPlan::HashJoin { schema, .. }
            | PhysicalPlan::HashAggregate { schema, .. } => schema.clone(),
            PhysicalPlan::Project { exprs, .. } => {
                exprs.iter().map(|(label, _)| label.clone()).collect()
            }
            PhysicalPlan::Filter { input, .. }
            | PhysicalPlan::Sort { input, .. }
            | PhysicalPlan::Limit { input, .. } => input.output_schema(),
            PhysicalPlan::Insert { .. }
            | PhysicalPlan::Update { .. }
            | PhysicalPlan::Delete { .. } => vec!["count".into()],
        }
    }

    pub fn is_dml(&self) -> bool {
        matches!(
            self,
            PhysicalPlan::Insert { .. } | PhysicalPlan::Update { .. } | PhysicalPlan::Delete { .. }
        )
    }
}

/// Planning context: catalog access for schema and index lookups.
pub struct PlanningContext<'a> {
    pub catalog: &'a Catalog,
}

impl<'a> PlanningContext<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    fn table(&self, name: &str) -> DbResult<&'a TableMeta> {
        self.catalog.table(name)
    }
}

/// Main planner entry point.
pub struct Planner;

impl Planner {
    /// Convert one statement into an executable physical plan.
    pub fn plan(stmt: Statement, ctx: &mut PlanningContext) -> DbResult<PhysicalPlan> {
        let logical = Self::lower(stmt, ctx, 0)?;
        let optimized = Self::optimize(logical);
        Self::bind(optimized, ctx)
    }

    /// Plan a bare SELECT (views, subqueries, cursors).
    pub fn plan_select(select: Select, ctx: &mut PlanningContext) -> DbResult<PhysicalPlan> {
        let logical = Self::lower_select(select, ctx, 0)?;
        let optimized = Self::optimize(logical);
        Self::bind(optimized, ctx)
    }

    // ---- lowering ----

    fn lower(stmt: Statement, ctx: &mut PlanningContext, depth: usize) -> DbResult<LogicalPlan> {
        match stmt {
            Statement::Select(select) => Self::lower_select(*select, ctx, depth),
            Statement::Insert { table, columns, rows } => {
                Ok(LogicalPlan::Insert { table, columns, rows })
            }
            Statement::Update { table, assignments, selection } => Ok(LogicalPlan::Update {
                table,
                assignments,
                predicate: selection,
            }),
            Statement::Delete { table, selection } => Ok(LogicalPlan::Delete {
                table,
                predicate: selection,
            }),
            Statement::Explain { query } => Self::lower(*query, ctx, depth),
            other => Err(DbError::Planner(format!(
                "statement is not planned through the executor: {other:?}"
            ))),
        }
    }

    fn lower_select(
        select: Select,
        ctx: &mut PlanningContext,
        depth: usize,
    ) -> DbResult<LogicalPlan> {
        if depth > MAX_VIEW_DEPTH {
            return Err(DbError::Planner("view expansion too deep".into()));
        }

        let Select {
            items,
            from,
            joins,
            selection,
            group_by,
            having,
            order_by,
            limit,
            offset,
        } = select;

        let mut plan = Self::lower_table_ref(&from, ctx, depth)?;

        for join in joins {
            let right = Self::lower_table_ref(&join.table, ctx, depth)?;
            plan = LogicalPlan::Join {
                left: Box::new(plan),
                right: Box::new(right),
                join_type: join.join_type,
                condition: join.condition,
            };
        }

        if let Some(predicate) = selection {
            plan = LogicalPlan::Filter { input: Box::new(plan), predicate };
        }

        let wildcard = items.iter().any(|i| matches!(i, SelectItem::Wildcard));
        let has_aggregates = !group_by.is_empty()
            || items.iter().any(|i| match i {
                SelectItem::Expr { expr, .. } => expr.contains_aggregate(),
                SelectItem::Wildcard => false,
            })
            || having.as_ref().is_some_and(Expr::contains_aggregate);

        if has_aggregates {
            if wildcard {
                return Err(DbError::Planner(
                    "SELECT * cannot be combined with aggregates".into(),
                ));
            }
            plan = Self::lower_aggregate(plan, items, group_by, having)?;
        } else {
            if having.is_some() {
                return Err(DbError::Planner("HAVING requires GROUP BY or aggregates".into()));
            }
            if !wildcard {
                let projected = items
                    .into_iter()
                    .map(|item| match item {
                        SelectItem::Expr { expr, alias } => {
                            let label = alias.unwrap_or_else(|| expr_label(&expr));
                            Ok((label, expr))
                        }
                        SelectItem::Wildcard => unreachable!("checked above"),
                    })
                    .collect::<DbResult<Vec<_>>>()?;
                plan = LogicalPlan::Project {
                    input: Box::new(plan),
                    items: projected,
                    wildcard: false,
                };
            } else if items.len() > 1 {
                return Err(DbError::Planner(
                    "mixed wildcard and expressions in SELECT list".into(),
                ));
            } else {
                plan = LogicalPlan::Project {
                    input: Box::new(plan),
                    items: Vec::new(),
                    wildcard: true,
                };
            }
        }

        if !order_by.is_empty() {
            plan = LogicalPlan::Sort { input: Box::new(plan), order_by };
        }
        if limit.is_some() || offset.is_some() {
            plan = LogicalPlan::Limit { input: Box::new(plan), limit, offset };
        }
        Ok(plan)
    }

    /// A FROM item is a base table, or a view that expands into its stored
    /// SELECT.
    fn lower_table_ref(
        table: &TableRef,
        ctx: &mut PlanningContext,
        depth: usize,
    ) -> DbResult<LogicalPlan> {
        if let Ok(view) = ctx.catalog.view(&table.name) {
            let query = view.query.clone();
            return Self::lower_select(query, ctx, depth + 1);
        }
        ctx.table(&table.name)?;
        Ok(LogicalPlan::TableScan {
            table: table.name.clone(),
            alias: table.effective_name().to_string(),
        })
    }

    /// Split an aggregate query into Aggregate + Project (+ Filter for
    /// HAVING). Bare columns in the SELECT list join the grouping key.
    fn lower_aggregate(
        input: LogicalPlan,
        items: Vec<SelectItem>,
        group_by: Vec<Expr>,
        having: Option<Expr>,
    ) -> DbResult<LogicalPlan> {
        let mut group_exprs: Vec<Expr> = Vec::new();
        for expr in group_by {
            match &expr {
                Expr::Column { .. } => group_exprs.push(expr),
                other => {
                    return Err(DbError::Planner(format!(
                        "GROUP BY supports columns only, got {other:?}"
                    )))
                }
            }
        }

        // bare selected columns are grouping keys as well
        for item in &items {
            if let SelectItem::Expr { expr: expr @ Expr::Column { .. }, .. } = item {
                if !group_exprs.contains(expr) {
                    group_exprs.push(expr.clone());
                }
            }
        }

        let mut aggregates: Vec<Expr> = Vec::new();
        let mut collect = |expr: &Expr| collect_aggregates(expr, &mut aggregates);
        for item in &items {
            if let SelectItem::Expr { expr, .. } = item {
                collect(expr);
            }
        }
        if let Some(having) = &having {
            collect(having);
        }

        let mut plan = LogicalPlan::Aggregate {
            input: Box::new(input),
            group_by: group_exprs,
            aggregates: aggregates.clone(),
        };

        if let Some(having) = having {
            plan = LogicalPlan::Filter {
                input: Box::new(plan),
                predicate: replace_aggregates(having, &aggregates),
            };
        }

        let projected = items
            .into_iter()
            .map(|item| match item {
                SelectItem::Expr { expr, alias } => {
                    let label = alias.unwrap_or_else(|| expr_label(&expr));
                    Ok((label, replace_aggregates(expr, &aggregates)))
                }
                SelectItem::Wildcard => {
                    Err(DbError::Planner("wildcard over aggregate output".into()))
                }
            })
            .collect::<DbResult<Vec<_>>>()?;

        Ok(LogicalPlan::Project {
            input: Box::new(plan),
            items: projected,
            wildcard: false,
        })
    }

    // ---- optimization ----

    fn optimize(plan: LogicalPlan) -> LogicalPlan {
        Self::pushdown(plan)
    }

    /// Push filters toward the scans they constrain: through wildcard
    /// projections, and into the one side of an inner join the predicate
    /// mentions.
    fn pushdown(plan: LogicalPlan) -> LogicalPlan {
        use LogicalPlan::*;
        match plan {
            Filter { input, predicate } => match *input {
                Project { input: inner, items, wildcard } if wildcard => {
                    let pushed = Self::pushdown(Filter { input: inner, predicate });
                    Project { input: Box::new(pushed), items, wildcard }
                }
                Join { left, right, join_type, condition } if join_type == JoinType::Inner => {
                    let mut left_conj = Vec::new();
                    let mut right_conj = Vec::new();
                    let mut keep = Vec::new();

                    let left_names = collect_aliases(&left);
                    let right_names = collect_aliases(&right);
                    for conjunct in split_conjuncts(predicate) {
                        match qualifiers(&conjunct) {
                            Some(quals) if !quals.is_empty() && quals.is_subset(&left_names) => {
                                left_conj.push(conjunct)
                            }
                            Some(quals) if !quals.is_empty() && quals.is_subset(&right_names) => {
                                right_conj.push(conjunct)
                            }
                            _ => keep.push(conjunct),
                        }
                    }

                    let left = match join_conjuncts(left_conj) {
                        Some(pred) => Box::new(Self::pushdown(Filter {
                            input: left,
                            predicate: pred,
                        })),
                        None => Box::new(Self::pushdown(*left)),
                    };
                    let right = match join_conjuncts(right_conj) {
                        Some(pred) => Box::new(Self::pushdown(Filter {
                            input: right,
                            predicate: pred,
                        })),
                        None => Box::new(Self::pushdown(*right)),
                    };

                    let joined = Join { left, right, join_type, condition };
                    match join_conjuncts(keep) {
                        Some(pred) => Filter { input: Box::new(joined), predicate: pred },
                        None => joined,
                    }
                }
                other => Filter { input: Box::new(Self::pushdown(other)), predicate },
            },
            Project { input, items, wildcard } => Project {
                input: Box::new(Self::pushdown(*input)),
                items,
                wildcard,
            },
            Aggregate { input, group_by, aggregates } => Aggregate {
                input: Box::new(Self::pushdown(*input)),
                group_by,
                aggregates,
            },
            Sort { input, order_by } => Sort { input: Box::new(Self::pushdown(*input)), order_by },
            Limit { input, limit, offset } => Limit {
                input: Box::new(Self::pushdown(*input)),
                limit,
                offset,
            },
            Join { left, right, join_type, condition } => Join {
                left: Box::new(Self::pushdown(*left)),
                right: Box::new(Self::pushdown(*right)),
                join_type,
                condition,
            },
            leaf => leaf,
        }
    }

    // ---- binding ----

    fn bind(plan: LogicalPlan, ctx: &mut PlanningContext) -> DbResult<PhysicalPlan> {
        match plan {
            LogicalPlan::TableScan { table, alias } => {
                let meta = ctx.table(&table)?;
                Ok(PhysicalPlan::SeqScan {
                    table_id: meta.id,
                    schema: qualified_schema(meta, &alias),
                })
            }
            LogicalPlan::Filter { input, predicate } => {
                let child = Self::bind(*input, ctx)?;
                let scope = Scope::new(child.output_schema());
                let resolved = bind_expr(&predicate, &scope, ctx)?;

                // rule 1: rewrite scan+filter into an index scan when an
                // index's leading column is constrained
                if let PhysicalPlan::SeqScan { table_id, schema } = &child {
                    let meta = ctx.catalog.table_by_id(*table_id)?;
                    let conjuncts = split_resolved_conjuncts(resolved.clone());
                    if let Some((index, range, consumed)) = choose_index(meta, &conjuncts) {
                        let scan = PhysicalPlan::IndexScan {
                            table_id: *table_id,
                            index_name: index,
                            range,
                            schema: schema.clone(),
                        };
                        let residual: Vec<ResolvedExpr> = conjuncts
                            .into_iter()
                            .enumerate()
                            .filter(|(i, _)| !consumed.contains(i))
                            .map(|(_, c)| c)
                            .collect();
                        return Ok(match join_resolved_conjuncts(residual) {
                            Some(pred) => PhysicalPlan::Filter {
                                input: Box::new(scan),
                                predicate: pred,
                            },
                            None => scan,
                        });
                    }
                }

                Ok(PhysicalPlan::Filter { input: Box::new(child), predicate: resolved })
            }
            LogicalPlan::Project { input, items, wildcard } => {
                let child = Self::bind(*input, ctx)?;
                if wildcard {
                    return Ok(child);
                }
                let scope = Scope::new(child.output_schema());
                let exprs = items
                    .into_iter()
                    .map(|(label, expr)| Ok((label, bind_expr(&expr, &scope, ctx)?)))
                    .collect::<DbResult<Vec<_>>>()?;
                Ok(PhysicalPlan::Project { input: Box::new(child), exprs })
            }
            LogicalPlan::Aggregate { input, group_by, aggregates } => {
                let child = Self::bind(*input, ctx)?;
                let scope = Scope::new(child.output_schema());

                let schema: Vec<String> = group_by
                    .iter()
                    .chain(aggregates.iter())
                    .map(expr_label)
                    .collect();
                let bound_groups = group_by
                    .iter()
                    .map(|g| bind_expr(g, &scope, ctx))
                    .collect::<DbResult<Vec<_>>>()?;
                let bound_aggs = aggregates
                    .iter()
                    .map(|agg| match agg {
                        Expr::Aggregate { func, arg } => Ok(PhysicalAgg {
                            func: *func,
                            arg: arg
                                .as_deref()
                                .map(|a| bind_expr(a, &scope, ctx))
                                .transpose()?,
                        }),
                        other => Err(DbError::Planner(format!(
                            "expected aggregate call, got {other:?}"
                        ))),
                    })
                    .collect::<DbResult<Vec<_>>>()?;

                Ok(PhysicalPlan::HashAggregate {
                    input: Box::new(child),
                    group_by: bound_groups,
                    aggregates: bound_aggs,
                    schema,
                })
            }
            LogicalPlan::Sort { input, order_by } => {
                let child = Self::bind(*input, ctx)?;
                let scope = Scope::new(child.output_schema());
                let keys = order_by
                    .iter()
                    .map(|o| Ok((scope.resolve(None, &o.column)?, o.direction)))
                    .collect::<DbResult<Vec<_>>>()?;

                // rule 4: skip the sort when an index scan already yields
                // the requested order
                if let [(ordinal, SortDirection::Asc)] = keys[..] {
                    if index_provides_order(&child, ordinal, ctx) {
                        return Ok(child);
                    }
                }
                Ok(PhysicalPlan::Sort { input: Box::new(child), order_by: keys })
            }
            LogicalPlan::Limit { input, limit, offset } => Ok(PhysicalPlan::Limit {
                input: Box::new(Self::bind(*input, ctx)?),
                limit,
                offset,
            }),
            LogicalPlan::Join { left, right, join_type, condition } => {
                Self::bind_join(*left, *right, join_type, condition, ctx)
            }
            LogicalPlan::Insert { table, columns, rows } => Self::bind_insert(table, columns, rows, ctx),
            LogicalPlan::Update { table, assignments, predicate } => {
                let meta = ctx.table(&table)?;
                let table_id = meta.id;
                let scope = Scope::new(meta.schema.column_names());
                let assignments = assignments
                    .into_iter()
                    .map(|(name, expr)| {
                        let ordinal = scope.resolve(None, &name)? as ColumnId;
                        Ok((ordinal, bind_expr(&expr, &scope, ctx)?))
                    })
                    .collect::<DbResult<Vec<_>>>()?;
                let predicate = predicate
                    .map(|p| bind_expr(&p, &scope, ctx))
                    .transpose()?;
                Ok(PhysicalPlan::Update { table_id, assignments, predicate })
            }
            LogicalPlan::Delete { table, predicate } => {
                let meta = ctx.table(&table)?;
                let table_id = meta.id;
                let scope = Scope::new(meta.schema.column_names());
                let predicate = predicate
                    .map(|p| bind_expr(&p, &scope, ctx))
                    .transpose()?;
                Ok(PhysicalPlan::Delete { table_id, predicate })
            }
        }
    }

    /// rule 3: hash join for inner equi-joins (build side defaults to the
    /// right child), nested loops otherwise.
    fn bind_join(
        left: LogicalPlan,
        right: LogicalPlan,
        join_type: JoinType,
        condition: Expr,
        ctx: &mut PlanningContext,
    ) -> DbResult<PhysicalPlan> {
        let left_plan = Self::bind(left, ctx)?;
        let right_plan = Self::bind(right, ctx)?;
        let left_schema = left_plan.output_schema();
        let left_width = left_schema.len();
        let mut schema = left_schema;
        schema.extend(right_plan.output_schema());

        let scope = Scope::new(schema.clone());
        let resolved = bind_expr(&condition, &scope, ctx)?;

        if join_type == JoinType::Inner {
            let conjuncts = split_resolved_conjuncts(resolved.clone());
            let equi = conjuncts.iter().position(|c| {
                matches!(
                    c,
                    ResolvedExpr::Binary { left, op: BinaryOp::Eq, right }
                        if is_cross_side_columns(left, right, left_width)
                )
            });
            if let Some(idx) = equi {
                let ResolvedExpr::Binary { left: a, right: b, .. } = &conjuncts[idx] else {
                    unreachable!("matched above");
                };
                let (ResolvedExpr::Column(c1), ResolvedExpr::Column(c2)) = (&**a, &**b) else {
                    unreachable!("matched above");
                };
                let (left_key, right_key) = if *c1 < left_width {
                    (*c1, *c2 - left_width)
                } else {
                    (*c2, *c1 - left_width)
                };
                let residual: Vec<ResolvedExpr> = conjuncts
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| *i != idx)
                    .map(|(_, c)| c)
                    .collect();
                return Ok(PhysicalPlan::HashJoin {
                    left: Box::new(left_plan),
                    right: Box::new(right_plan),
                    left_key,
                    right_key,
                    residual: join_resolved_conjuncts(residual),
                    schema,
                });
            }
        }

        Ok(PhysicalPlan::NestedLoopJoin {
            left: Box::new(left_plan),
            right: Box::new(right_plan),
            join_type,
            condition: resolved,
            schema,
        })
    }

    fn bind_insert(
        table: String,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Expr>>,
        ctx: &mut PlanningContext,
    ) -> DbResult<PhysicalPlan> {
        let (table_id, schema) = {
            let meta = ctx.table(&table)?;
            (meta.id, meta.schema.clone())
        };
        let empty = Scope::new(Vec::new());

        // map the written columns to ordinals, defaulting to all columns
        let target_ordinals: Vec<usize> = match &columns {
            Some(names) => names
                .iter()
                .map(|name| {
                    schema
                        .column_index(name)
                        .map(|c| c as usize)
                        .ok_or_else(|| {
                            DbError::NotFound(format!("column '{name}' on table '{table}'"))
                        })
                })
                .collect::<DbResult<Vec<_>>>()?,
            None => (0..schema.columns.len()).collect(),
        };

        let mut bound_rows = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() != target_ordinals.len() {
                return Err(DbError::Semantic(format!(
                    "INSERT has {} values for {} columns",
                    row.len(),
                    target_ordinals.len()
                )));
            }
            let mut full: Vec<Option<ResolvedExpr>> = vec![None; schema.columns.len()];
            for (ordinal, expr) in target_ordinals.iter().zip(row) {
                full[*ordinal] = Some(bind_expr(&expr, &empty, ctx)?);
            }
            // unwritten columns fall back to their DEFAULT, or NULL
            let complete = full
                .into_iter()
                .enumerate()
                .map(|(ordinal, slot)| match slot {
                    Some(expr) => Ok(expr),
                    None => match &schema.columns[ordinal].default {
                        Some(default) => bind_expr(default, &empty, ctx),
                        None => Ok(ResolvedExpr::Literal(Value::Null)),
                    },
                })
                .collect::<DbResult<Vec<_>>>()?;
            bound_rows.push(complete);
        }

        Ok(PhysicalPlan::Insert { table_id, rows: bound_rows })
    }
}

/// Bind a standalone expression against an explicit column list. Used for
/// CHECK constraints, DEFAULT values, and trigger conditions, which are
/// stored name-based in the catalog and evaluated per row.
pub fn bind_standalone(
    expr: &Expr,
    columns: &[String],
    catalog: &Catalog,
) -> DbResult<ResolvedExpr> {
    let mut ctx = PlanningContext::new(catalog);
    bind_expr(expr, &Scope::new(columns.to_vec()), &mut ctx)
}

/// Render a physical plan as an indented operator tree for EXPLAIN.
pub fn explain(plan: &PhysicalPlan, catalog: &Catalog) -> String {
    let mut out = String::new();
    render(plan, catalog, 0, &mut out);
    out
}

fn render(plan: &PhysicalPlan, catalog: &Catalog, depth: usize, out: &mut String) {
    let pad = "  ".repeat(depth);
    let line = match plan {
        PhysicalPlan::SeqScan { table_id, .. } => {
            format!("SeqScan {}", table_name(catalog, *table_id))
        }
        PhysicalPlan::IndexScan { table_id, index_name, range, .. } => {
            let mut desc = format!("IndexScan {} using {index_name}", table_name(catalog, *table_id));
            if !range.eq_prefix.is_empty() {
                desc.push_str(&format!(" (eq prefix {})", range.eq_prefix.len()));
            }
            if range.low.is_some() || range.high.is_some() {
                desc.push_str(" (range)");
            }
            desc
        }
        PhysicalPlan::Filter { .. } => "Filter".into(),
        PhysicalPlan::Project { exprs, .. } => {
            format!(
                "Project [{}]",
                exprs.iter().map(|(l, _)| l.as_str()).collect::<Vec<_>>().join(", ")
            )
        }
        PhysicalPlan::NestedLoopJoin { join_type, .. } => {
            format!("NestedLoopJoin ({join_type:?})")
        }
        PhysicalPlan::HashJoin { .. } => "HashJoin (build right)".into(),
        PhysicalPlan::HashAggregate { group_by, aggregates, .. } => {
            format!(
                "HashAggregate ({} keys, {} aggregates)",
                group_by.len(),
                aggregates.len()
            )
        }
        PhysicalPlan::Sort { order_by, .. } => format!("Sort ({} keys)", order_by.len()),
        PhysicalPlan::Limit { limit, offset, .. } => {
            format!("Limit {limit:?} offset {offset:?}")
        }
        PhysicalPlan::Insert { table_id, rows } => {
            format!("Insert {} ({} rows)", table_name(catalog, *table_id), rows.len())
        }
        PhysicalPlan::Update { table_id, .. } => {
            format!("Update {}", table_name(catalog, *table_id))
        }
        PhysicalPlan::Delete { table_id, .. } => {
            format!("Delete {}", table_name(catalog, *table_id))
        }
    };
    out.push_str(&pad);
    out.push_str(&line);
    out.push('\n');

    match plan {
        PhysicalPlan::Filter { input, .. }
        | PhysicalPlan::Project { input, .. }
        | PhysicalPlan::HashAggregate { input, .. }
        | PhysicalPlan::Sort { input, .. }
        | PhysicalPlan::Limit { input, .. } => render(input, catalog, depth + 1, out),
        PhysicalPlan::NestedLoopJoin { left, right, .. }
        | PhysicalPlan::HashJoin { left, right, .. } => {
            render(left, catalog, depth + 1, out);
            render(right, catalog, depth + 1, out);
        }
        _ => {}
    }
}

fn table_name(catalog: &Catalog, id: TableId) -> String {
    catalog
        .table_by_id(id)
        .map(|t| t.name.clone())
        .unwrap_or_else(|_| format!("table#{}", id.0))
}

// ---- name resolution ----

/// Output columns of a plan node, used to resolve references against it.
struct Scope {
    columns: Vec<String>,
}

impl Scope {
    fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    fn resolve(&self, table: Option<&str>, name: &str) -> DbResult<usize> {
        if let Some(qualifier) = table {
            let full = format!("{qualifier}.{name}");
            return self
                .columns
                .iter()
                .position(|c| c.eq_ignore_ascii_case(&full))
                .ok_or_else(|| DbError::NotFound(format!("column '{full}'")));
        }

        let matches: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                c.eq_ignore_ascii_case(name)
                    || c.to_lowercase()
                        .ends_with(&format!(".{}", name.to_lowercase()))
            })
            .map(|(i, _)| i)
            .collect();
        match matches.len() {
            0 => Err(DbError::NotFound(format!("column '{name}'"))),
            1 => Ok(matches[0]),
            _ => Err(DbError::Semantic(format!("column '{name}' is ambiguous"))),
        }
    }
}

fn qualified_schema(meta: &TableMeta, alias: &str) -> Vec<String> {
    meta.schema
        .columns
        .iter()
        .map(|c| format!("{alias}.{}", c.name))
        .collect()
}

fn bind_expr(expr: &Expr, scope: &Scope, ctx: &mut PlanningContext) -> DbResult<ResolvedExpr> {
    match expr {
        Expr::Literal(v) => Ok(ResolvedExpr::Literal(v.clone())),
        Expr::Column { table, name } => {
            Ok(ResolvedExpr::Column(scope.resolve(table.as_deref(), name)?))
        }
        Expr::Unary { op, expr } => Ok(ResolvedExpr::Unary {
            op: *op,
            expr: Box::new(bind_expr(expr, scope, ctx)?),
        }),
        Expr::Binary { left, op, right } => Ok(ResolvedExpr::Binary {
            left: Box::new(bind_expr(left, scope, ctx)?),
            op: *op,
            right: Box::new(bind_expr(right, scope, ctx)?),
        }),
        Expr::Like { expr, pattern, negated } => Ok(ResolvedExpr::Like {
            expr: Box::new(bind_expr(expr, scope, ctx)?),
            pattern: Box::new(bind_expr(pattern, scope, ctx)?),
            negated: *negated,
        }),
        Expr::IsNull { expr, negated } => Ok(ResolvedExpr::IsNull {
            expr: Box::new(bind_expr(expr, scope, ctx)?),
            negated: *negated,
        }),
        Expr::InList { expr, list, negated } => Ok(ResolvedExpr::InList {
            expr: Box::new(bind_expr(expr, scope, ctx)?),
            list: list
                .iter()
                .map(|e| bind_expr(e, scope, ctx))
                .collect::<DbResult<Vec<_>>>()?,
            negated: *negated,
        }),
        Expr::ScalarSubquery(select) => {
            let plan = Planner::plan_select((**select).clone(), ctx)?;
            Ok(ResolvedExpr::ScalarSubquery(Box::new(plan)))
        }
        Expr::InSubquery { expr, subquery, negated } => {
            let plan = Planner::plan_select((**subquery).clone(), ctx)?;
            Ok(ResolvedExpr::InSubquery {
                expr: Box::new(bind_expr(expr, scope, ctx)?),
                plan: Box::new(plan),
                negated: *negated,
            })
        }
        Expr::Aggregate { .. } => Err(DbError::Planner(
            "aggregate call outside of an aggregate query".into(),
        )),
    }
}

// ---- expression helpers ----

/// Display label for an expression, used to name aggregate and projection
/// outputs.
fn expr_label(expr: &Expr) -> String {
    match expr {
        Expr::Literal(v) => v.to_string(),
        Expr::Column { table, name } => match table {
            Some(t) => format!("{t}.{name}"),
            None => name.clone(),
        },
        Expr::Aggregate { func, arg } => {
            let arg = arg.as_deref().map(expr_label).unwrap_or_else(|| "*".into());
            format!("{}({arg})", func.name().to_lowercase())
        }
        Expr::Unary { op, expr } => format!("{op:?}({})", expr_label(expr)),
        Expr::Binary { left, op, right } => {
            format!("{} {op:?} {}", expr_label(left), expr_label(right))
        }
        Expr::Like { expr, .. } => format!("{} like", expr_label(expr)),
        Expr::IsNull { expr, .. } => format!("{} is null", expr_label(expr)),
        Expr::InList { expr, .. } | Expr::InSubquery { expr, .. } => {
            format!("{} in", expr_label(expr))
        }
        Expr::ScalarSubquery(_) => "subquery".into(),
    }
}

fn collect_aggregates(expr: &Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::Aggregate { .. } => {
            if !out.contains(expr) {
                out.push(expr.clone());
            }
        }
        Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } => collect_aggregates(expr, out),
        Expr::Binary { left, right, .. } => {
            collect_aggregates(left, out);
            collect_aggregates(right, out);
        }
        Expr::Like { expr, pattern, .. } => {
            collect_aggregates(expr, out);
            collect_aggregates(pattern, out);
        }
        Expr::InList { expr, list, .. } => {
            collect_aggregates(expr, out);
            for e in list {
                collect_aggregates(e, out);
            }
        }
        Expr::InSubquery { expr, .. } => collect_aggregates(expr, out),
        Expr::Literal(_) | Expr::Column { .. } | Expr::ScalarSubquery(_) => {}
    }
}

/// Rewrite aggregate calls into references to the aggregate operator's
/// output columns.
fn replace_aggregates(expr: Expr, aggregates: &[Expr]) -> Expr {
    if aggregates.contains(&expr) {
        return Expr::Column { table: None, name: expr_label(&expr) };
    }
    match expr {
        Expr::Unary { op, expr } => Expr::Unary {
            op,
            expr: Box::new(replace_aggregates(*expr, aggregates)),
        },
        Expr::Binary { left, op, right } => Expr::Binary {
            left: Box::new(replace_aggregates(*left, aggregates)),
            op,
            right: Box::new(replace_aggregates(*right, aggregates)),
        },
        Expr::Like { expr, pattern, negated } => Expr::Like {
            expr: Box::new(replace_aggregates(*expr, aggregates)),
            pattern: Box::new(replace_aggregates(*pattern, aggregates)),
            negated,
        },
        Expr::IsNull { expr, negated } => Expr::IsNull {
            expr: Box::new(replace_aggregates(*expr, aggregates)),
            negated,
        },
        Expr::InList { expr, list, negated } => Expr::InList {
            expr: Box::new(replace_aggregates(*expr, aggregates)),
            list: list
                .into_iter()
                .map(|e| replace_aggregates(e, aggregates))
                .collect(),
            negated,
        },
        other => other,
    }
}

fn split_conjuncts(expr: Expr) -> Vec<Expr> {
    match expr {
        Expr::Binary { left, op: BinaryOp::And, right } => {
            let mut out = split_conjuncts(*left);
            out.extend(split_conjuncts(*right));
            out
        }
        other => vec![other],
    }
}

fn join_conjuncts(conjuncts: Vec<Expr>) -> Option<Expr> {
    conjuncts.into_iter().reduce(|acc, next| Expr::Binary {
        left: Box::new(acc),
        op: BinaryOp::And,
        right: Box::new(next),
    })
}

fn split_resolved_conjuncts(expr: ResolvedExpr) -> Vec<ResolvedExpr> {
    match expr {
        ResolvedExpr::Binary { left, op: BinaryOp::And, right } => {
            let mut out = split_resolved_conjuncts(*left);
            out.extend(split_resolved_conjuncts(*right));
            out
        }
        other => vec![other],
    }
}

fn join_resolved_conjuncts(conjuncts: Vec<ResolvedExpr>) -> Option<ResolvedExpr> {
    conjuncts.into_iter().reduce(|acc, next| ResolvedExpr::Binary {
        left: Box::new(acc),
        op: BinaryOp::And,
        right: Box::new(next),
    })
}

/// The table qualifiers an expression mentions, or `None` when any
/// reference is unqualified (and so cannot be attributed to a side).
fn qualifiers(expr: &Expr) -> Option<HashSet<String>> {
    fn walk(expr: &Expr, out: &mut HashSet<String>) -> bool {
        match expr {
            Expr::Column { table: Some(t), .. } => {
                out.insert(t.clone());
                true
            }
            Expr::Column { table: None, .. } => false,
            Expr::Literal(_) => true,
            Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } => walk(expr, out),
            Expr::Binary { left, right, .. } => walk(left, out) && walk(right, out),
            Expr::Like { expr, pattern, .. } => walk(expr, out) && walk(pattern, out),
            Expr::InList { expr, list, .. } => {
                walk(expr, out) && list.iter().all(|e| walk(e, out))
            }
            // subqueries stay above the join
            Expr::ScalarSubquery(_) | Expr::InSubquery { .. } => false,
            Expr::Aggregate { .. } => false,
        }
    }
    let mut out = HashSet::new();
    walk(expr, &mut out).then_some(out)
}

fn collect_aliases(plan: &LogicalPlan) -> HashSet<String> {
    let mut out = HashSet::new();
    fn walk(plan: &LogicalPlan, out: &mut HashSet<String>) {
        match plan {
            LogicalPlan::TableScan { alias, .. } => {
                out.insert(alias.clone());
            }
            LogicalPlan::Filter { input, .. }
            | LogicalPlan::Project { input, .. }
            | LogicalPlan::Aggregate { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Limit { input, .. } => walk(input, out),
            LogicalPlan::Join { left, right, .. } => {
                walk(left, out);
                walk(right, out);
            }
            LogicalPlan::Insert { .. }
            | LogicalPlan::Update { .. }
            | LogicalPlan::Delete { .. } => {}
        }
    }
    walk(plan, &mut out);
    out
}

fn is_cross_side_columns(a: &ResolvedExpr, b: &ResolvedExpr, left_width: usize) -> bool {
    match (a, b) {
        (ResolvedExpr::Column(x), ResolvedExpr::Column(y)) => {
            (*x < left_width) != (*y < left_width)
        }
        _ => false,
    }
}

// ---- index selection ----

/// Pick the best index for a conjunctive predicate over a base table.
/// Returns the index name, the key range, and which conjuncts it consumed.
/// Ties break deterministically: unique before non-unique, then longer
/// matched prefix, then index name.
fn choose_index(
    meta: &TableMeta,
    conjuncts: &[ResolvedExpr],
) -> Option<(String, IndexRange, HashSet<usize>)> {
    let mut candidates: Vec<(&IndexMeta, IndexRange, HashSet<usize>, usize)> = Vec::new();

    for index in meta.indexes() {
        let mut consumed = HashSet::new();
        let mut range = IndexRange::default();
        let mut matched = 0usize;

        for key_col in &index.columns {
            let eq = conjuncts.iter().enumerate().find_map(|(i, c)| {
                constraint_of(c, *key_col as usize)
                    .filter(|(op, _)| *op == BinaryOp::Eq)
                    .map(|(_, lit)| (i, lit))
            });
            match eq {
                Some((i, lit)) => {
                    consumed.insert(i);
                    range.eq_prefix.push(lit);
                    matched += 1;
                }
                None => {
                    // no equality: a range on this key column can still
                    // bound the scan
                    let mut found_range = false;
                    for (i, c) in conjuncts.iter().enumerate() {
                        if let Some((op, lit)) = constraint_of(c, *key_col as usize) {
                            match op {
                                BinaryOp::Gt => {
                                    range.low = Some((lit, false));
                                }
                                BinaryOp::Ge => {
                                    range.low = Some((lit, true));
                                }
                                BinaryOp::Lt => {
                                    range.high = Some((lit, false));
                                }
                                BinaryOp::Le => {
                                    range.high = Some((lit, true));
                                }
                                _ => continue,
                            }
                            consumed.insert(i);
                            found_range = true;
                        }
                    }
                    if found_range {
                        matched += 1;
                    }
                    break;
                }
            }
        }

        if matched > 0 {
            candidates.push((index, range, consumed, matched));
        }
    }

    candidates.sort_by(|(a, _, _, am), (b, _, _, bm)| {
        b.unique
            .cmp(&a.unique)
            .then(bm.cmp(am))
            .then(a.name.cmp(&b.name))
    });
    candidates
        .into_iter()
        .next()
        .map(|(index, range, consumed, _)| (index.name.clone(), range, consumed))
}

/// Match `col op literal` (or the mirrored form) against one conjunct.
fn constraint_of(conjunct: &ResolvedExpr, ordinal: usize) -> Option<(BinaryOp, ResolvedExpr)> {
    let ResolvedExpr::Binary { left, op, right } = conjunct else {
        return None;
    };
    match (&**left, &**right) {
        (ResolvedExpr::Column(c), lit @ ResolvedExpr::Literal(_)) if *c == ordinal => {
            Some((*op, lit.clone()))
        }
        (lit @ ResolvedExpr::Literal(_), ResolvedExpr::Column(c)) if *c == ordinal => {
            let flipped = match op {
                BinaryOp::Lt => BinaryOp::Gt,
                BinaryOp::Le => BinaryOp::Ge,
                BinaryOp::Gt => BinaryOp::Lt,
                BinaryOp::Ge => BinaryOp::Le,
                other => *other,
            };
            Some((flipped, lit.clone()))
        }
        _ => None,
    }
}

/// Whether a plan already emits rows ordered by the given output column,
/// by virtue of an index scan on that column without a narrowing equality
/// prefix. An index scan's output columns are the table's columns, so the
/// ordinal compares directly against the index's leading key column.
fn index_provides_order(plan: &PhysicalPlan, ordinal: usize, ctx: &PlanningContext) -> bool {
    match plan {
        PhysicalPlan::IndexScan { table_id, index_name, range, .. } => {
            if !range.eq_prefix.is_empty() {
                // order continues on a later key column past the prefix
                return false;
            }
            let Ok(meta) = ctx.catalog.table_by_id(*table_id) else {
                return false;
            };
            let Ok(index) = meta.index(index_name) else {
                return false;
            };
            index.columns.first().map(|c| *c as usize) == Some(ordinal)
        }
        PhysicalPlan::Filter { input, .. } | PhysicalPlan::Limit { input, .. } => {
            index_provides_order(input, ordinal, ctx)
        }
        PhysicalPlan::Project { input, exprs } => match exprs.get(ordinal) {
            Some((_, ResolvedExpr::Column(inner))) => index_provides_order(input, *inner, ctx),
            _ => false,
        },
        _ => false,
    }
}
