//! SQL front end: maps `sqlparser` output onto the engine's AST contract.
//!
//! The engine proper only depends on the [`ast`] types; this mapping is the
//! reference front end. Statement forms outside the generic SQL dialect
//! (triggers, cursors, SHOW introspection) are recognized in
//! [`dialect`] before `sqlparser` runs.

mod ast;
mod dialect;
#[cfg(test)]
mod tests;

pub use ast::*;

use common::{DbError, DbResult};
use expr::{AggFunc, BinaryOp, UnaryOp};
use regex::Regex;
use sqlparser::ast as sqlast;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser as SqlParser;
use types::{SqlType, Value};

/// Parse SQL text into the engine's AST statements.
pub fn parse_sql(sql: &str) -> DbResult<Vec<Statement>> {
    if let Some(stmt) = dialect::parse_special(sql)? {
        return Ok(vec![stmt]);
    }

    let dialect = GenericDialect {};
    let stmts = SqlParser::parse_sql(&dialect, sql)
        .map_err(|e| DbError::Parser(format!("SQL parse error: {e}")))?;

    stmts.into_iter().map(map_statement).collect()
}

/// Parse a single SELECT statement, used by views and cursors.
pub fn parse_select(sql: &str) -> DbResult<Select> {
    let mut stmts = parse_sql(sql)?;
    if stmts.len() != 1 {
        return Err(DbError::Parser("expected a single SELECT".into()));
    }
    match stmts.remove(0) {
        Statement::Select(select) => Ok(*select),
        other => Err(DbError::Parser(format!("expected SELECT, got {other:?}"))),
    }
}

/// Parse a standalone expression (trigger WHEN clauses, CHECK bodies).
pub fn parse_expr(sql: &str) -> DbResult<Expr> {
    let dialect = GenericDialect {};
    let parsed = SqlParser::new(&dialect)
        .try_with_sql(sql)
        .map_err(|e| DbError::Parser(format!("expression parse error: {e}")))?
        .parse_expr()
        .map_err(|e| DbError::Parser(format!("expression parse error: {e}")))?;
    map_expr(parsed)
}

fn map_statement(stmt: sqlast::Statement) -> DbResult<Statement> {
    use sqlast::Statement as SqlStatement;

    match stmt {
        SqlStatement::CreateDatabase { db_name, .. } => Ok(Statement::CreateDatabase {
            name: normalize_object_name(&db_name)?,
        }),
        SqlStatement::CreateTable {
            name,
            columns,
            constraints,
            ..
        } => map_create_table(name, columns, constraints),
        SqlStatement::Drop {
            object_type, names, ..
        } => match object_type {
            sqlast::ObjectType::Table => Ok(Statement::DropTable {
                name: first_name(names)?,
            }),
            sqlast::ObjectType::Index => Ok(Statement::DropIndex {
                name: first_name(names)?,
            }),
            sqlast::ObjectType::View => Ok(Statement::DropView {
                name: first_name(names)?,
            }),
            _ => Err(DbError::Parser(format!(
                "unsupported DROP type: {object_type:?}"
            ))),
        },
        SqlStatement::CreateIndex {
            name,
            table_name,
            columns,
            unique,
            ..
        } => {
            let index_name = name
                .ok_or_else(|| DbError::Parser("index name required".into()))
                .map(|n| normalize_object_name(&n))??;
            let table = normalize_object_name(&table_name)?;
            let columns = columns
                .iter()
                .map(|c| map_index_column(c))
                .collect::<DbResult<Vec<_>>>()?;
            Ok(Statement::CreateIndex {
                name: index_name,
                table,
                columns,
                unique,
            })
        }
        SqlStatement::CreateView {
            name,
            query,
            or_replace,
            ..
        } => Ok(Statement::CreateView {
            name: normalize_object_name(&name)?,
            query: Box::new(map_query(*query)?),
            or_replace,
        }),
        SqlStatement::AlterView { name, query, .. } => Ok(Statement::AlterView {
            name: normalize_object_name(&name)?,
            query: Box::new(map_query(*query)?),
        }),
        SqlStatement::Insert {
            table_name,
            columns,
            source,
            ..
        } => {
            let table = normalize_object_name(&table_name)?;
            let columns = if columns.is_empty() {
                None
            } else {
                Some(columns.iter().map(normalize_ident).collect())
            };
            let source = source.ok_or_else(|| DbError::Parser("INSERT source missing".into()))?;
            let rows = extract_values(*source)?;
            Ok(Statement::Insert { table, columns, rows })
        }
        SqlStatement::Query(query) => Ok(Statement::Select(Box::new(map_query(*query)?))),
        SqlStatement::Update {
            table,
            assignments,
            selection,
            ..
        } => {
            let table = table_name_from_with_joins(&table)?;
            let assignments = assignments
                .into_iter()
                .map(|assign| {
                    let ident = assign
                        .id
                        .last()
                        .ok_or_else(|| DbError::Parser("invalid assignment target".into()))?;
                    Ok((normalize_ident(ident), map_expr(assign.value)?))
                })
                .collect::<DbResult<Vec<_>>>()?;
            let selection = selection.map(map_expr).transpose()?;
            Ok(Statement::Update {
                table,
                assignments,
                selection,
            })
        }
        SqlStatement::Delete {
            from, selection, ..
        } => {
            if from.len() != 1 {
                return Err(DbError::Parser("DELETE takes exactly one table".into()));
            }
            let table = table_name_from_with_joins(&from[0])?;
            let selection = selection.map(map_expr).transpose()?;
            Ok(Statement::Delete { table, selection })
        }
        SqlStatement::Explain { statement, .. } => Ok(Statement::Explain {
            query: Box::new(map_statement(*statement)?),
        }),
        SqlStatement::StartTransaction { .. } => Ok(Statement::Begin),
        SqlStatement::Commit { .. } => Ok(Statement::Commit),
        SqlStatement::Rollback { .. } => Ok(Statement::Rollback),
        _ => Err(DbError::Parser("unsupported statement".into())),
    }
}

fn map_create_table(
    name: sqlast::ObjectName,
    columns: Vec<sqlast::ColumnDef>,
    constraints: Vec<sqlast::TableConstraint>,
) -> DbResult<Statement> {
    let table = normalize_object_name(&name)?;

    let columns = columns
        .into_iter()
        .map(map_column_def)
        .collect::<DbResult<Vec<_>>>()?;

    let constraints = constraints
        .into_iter()
        .map(map_table_constraint)
        .collect::<DbResult<Vec<_>>>()?;

    Ok(Statement::CreateTable {
        name: table,
        columns,
        constraints,
    })
}

fn map_column_def(col: sqlast::ColumnDef) -> DbResult<ColumnDef> {
    use sqlast::ColumnOption;

    let mut def = ColumnDef {
        name: normalize_ident(&col.name),
        ty: map_data_type(&col.data_type)?,
        nullable: true,
        default: None,
        check: None,
        primary_key: false,
        unique: false,
        references: None,
    };

    for opt in col.options {
        match opt.option {
            ColumnOption::NotNull => def.nullable = false,
            ColumnOption::Null => def.nullable = true,
            ColumnOption::Default(expr) => def.default = Some(map_expr(expr)?),
            ColumnOption::Check(expr) => def.check = Some(map_expr(expr)?),
            ColumnOption::Unique { is_primary, .. } => {
                if is_primary {
                    def.primary_key = true;
                    def.nullable = false;
                } else {
                    def.unique = true;
                }
            }
            ColumnOption::ForeignKey {
                foreign_table,
                referred_columns,
                ..
            } => {
                def.references = Some(ForeignKeyRef {
                    table: normalize_object_name(&foreign_table)?,
                    column: referred_columns.first().map(normalize_ident),
                });
            }
            other => {
                return Err(DbError::Parser(format!(
                    "unsupported column option: {other:?}"
                )))
            }
        }
    }

    Ok(def)
}

fn map_table_constraint(constraint: sqlast::TableConstraint) -> DbResult<TableConstraint> {
    use sqlast::TableConstraint as SqlConstraint;

    match constraint {
        SqlConstraint::Unique {
            columns,
            is_primary,
            ..
        } => {
            let columns: Vec<String> = columns.iter().map(normalize_ident).collect();
            if columns.is_empty() {
                return Err(DbError::Parser(
                    "constraint must name at least one column".into(),
                ));
            }
            if is_primary {
                Ok(TableConstraint::PrimaryKey { columns })
            } else {
                Ok(TableConstraint::Unique { columns })
            }
        }
        SqlConstraint::ForeignKey {
            columns,
            foreign_table,
            referred_columns,
            ..
        } => Ok(TableConstraint::ForeignKey {
            columns: columns.iter().map(normalize_ident).collect(),
            ref_table: normalize_object_name(&foreign_table)?,
            ref_columns: referred_columns.iter().map(normalize_ident).collect(),
        }),
        SqlConstraint::Check { expr, .. } => Ok(TableConstraint::Check {
            expr: map_expr(*expr)?,
        }),
        other => Err(DbError::Parser(format!(
            "unsupported table constraint: {other:?}"
        ))),
    }
}

/// Column types are matched on their display form, which is stable across
/// `sqlparser` releases.
fn map_data_type(dt: &sqlast::DataType) -> DbResult<SqlType> {
    let spelled = dt.to_string().to_uppercase();
    let spelled = spelled.trim();

    match spelled {
        "INT" | "INTEGER" => return Ok(SqlType::Int),
        "BIGINT" => return Ok(SqlType::BigInt),
        "TEXT" | "STRING" | "CHARACTER VARYING" | "VARCHAR" => return Ok(SqlType::Text),
        "DATE" => return Ok(SqlType::Date),
        "BOOL" | "BOOLEAN" => return Ok(SqlType::Bool),
        _ => {}
    }

    let decimal = Regex::new(r"^(?:DECIMAL|NUMERIC)\((\d+)(?:,\s*(\d+))?\)$").expect("regex");
    if let Some(caps) = decimal.captures(spelled) {
        let precision: u8 = caps[1]
            .parse()
            .map_err(|_| DbError::Parser(format!("bad DECIMAL precision in {spelled}")))?;
        let scale: u8 = caps
            .get(2)
            .map(|m| m.as_str().parse())
            .transpose()
            .map_err(|_| DbError::Parser(format!("bad DECIMAL scale in {spelled}")))?
            .unwrap_or(0);
        return Ok(SqlType::Decimal { precision, scale });
    }

    let varchar = Regex::new(r"^(?:VARCHAR|CHARACTER VARYING)\((\d+)\)$").expect("regex");
    if let Some(caps) = varchar.captures(spelled) {
        let max_len: u32 = caps[1]
            .parse()
            .map_err(|_| DbError::Parser(format!("bad VARCHAR length in {spelled}")))?;
        return Ok(SqlType::Varchar { max_len });
    }

    Err(DbError::Parser(format!("unsupported column type: {spelled}")))
}

fn map_query(query: sqlast::Query) -> DbResult<Select> {
    use sqlast::SetExpr;

    let select = match *query.body {
        SetExpr::Select(select) => select,
        SetExpr::Values(_) => {
            return Err(DbError::Parser("standalone VALUES not supported".into()))
        }
        _ => return Err(DbError::Parser("SET operations not supported".into())),
    };

    let sqlast::Select {
        projection,
        from,
        selection,
        group_by,
        having,
        ..
    } = *select;

    if from.is_empty() {
        return Err(DbError::Parser("SELECT requires FROM clause".into()));
    }
    if from.len() > 1 {
        return Err(DbError::Parser(
            "comma joins not supported; use explicit JOIN".into(),
        ));
    }

    let sqlast::TableWithJoins { relation, joins } = from.into_iter().next().expect("one table");
    let from = map_table_factor(&relation)?;
    let joins = joins
        .into_iter()
        .map(map_join)
        .collect::<DbResult<Vec<_>>>()?;

    let items = projection
        .into_iter()
        .map(map_select_item)
        .collect::<DbResult<Vec<_>>>()?;
    let selection = selection.map(map_expr).transpose()?;

    let group_by = match group_by {
        sqlast::GroupByExpr::All => {
            return Err(DbError::Parser("GROUP BY ALL not supported".into()))
        }
        sqlast::GroupByExpr::Expressions(exprs) => exprs
            .into_iter()
            .map(map_expr)
            .collect::<DbResult<Vec<_>>>()?,
    };
    let having = having.map(map_expr).transpose()?;

    let order_by = query
        .order_by
        .into_iter()
        .map(map_order_by_expr)
        .collect::<DbResult<Vec<_>>>()?;

    let limit = query
        .limit
        .map(|expr| parse_u64_literal(&expr, "LIMIT"))
        .transpose()?;
    let offset = query
        .offset
        .map(|offset| parse_u64_literal(&offset.value, "OFFSET"))
        .transpose()?;

    Ok(Select {
        items,
        from,
        joins,
        selection,
        group_by,
        having,
        order_by,
        limit,
        offset,
    })
}

fn parse_u64_literal(expr: &sqlast::Expr, clause: &str) -> DbResult<u64> {
    match expr {
        sqlast::Expr::Value(sqlast::Value::Number(n, _)) => n
            .parse::<u64>()
            .map_err(|_| DbError::Parser(format!("invalid {clause} value: {n}"))),
        _ => Err(DbError::Parser(format!(
            "{clause} must be a non-negative integer"
        ))),
    }
}

fn map_table_factor(relation: &sqlast::TableFactor) -> DbResult<TableRef> {
    match relation {
        sqlast::TableFactor::Table { name, alias, .. } => Ok(TableRef {
            name: normalize_object_name(name)?,
            alias: alias.as_ref().map(|a| normalize_ident(&a.name)),
        }),
        other => Err(DbError::Parser(format!(
            "unsupported table factor: {other:?}"
        ))),
    }
}

fn map_join(join: sqlast::Join) -> DbResult<JoinClause> {
    use sqlast::JoinOperator;

    let table = map_table_factor(&join.relation)?;
    let (join_type, constraint) = match join.join_operator {
        JoinOperator::Inner(c) => (JoinType::Inner, c),
        JoinOperator::LeftOuter(c) => (JoinType::Left, c),
        JoinOperator::RightOuter(c) => (JoinType::Right, c),
        JoinOperator::FullOuter(c) => (JoinType::Full, c),
        other => {
            return Err(DbError::Parser(format!(
                "unsupported join operator: {other:?}"
            )))
        }
    };
    let condition = match constraint {
        sqlast::JoinConstraint::On(expr) => map_expr(expr)?,
        other => {
            return Err(DbError::Parser(format!(
                "joins require an ON clause, got {other:?}"
            )))
        }
    };
    Ok(JoinClause {
        table,
        join_type,
        condition,
    })
}

fn map_order_by_expr(expr: sqlast::OrderByExpr) -> DbResult<OrderByExpr> {
    let column = match expr.expr {
        sqlast::Expr::Identifier(ident) => normalize_ident(&ident),
        sqlast::Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(normalize_ident)
            .ok_or_else(|| DbError::Parser("invalid ORDER BY column".into()))?,
        _ => {
            return Err(DbError::Parser(
                "ORDER BY supports column names only".into(),
            ))
        }
    };

    let direction = match expr.asc {
        Some(false) => SortDirection::Desc,
        _ => SortDirection::Asc,
    };

    Ok(OrderByExpr { column, direction })
}

fn extract_values(query: sqlast::Query) -> DbResult<Vec<Vec<Expr>>> {
    match *query.body {
        sqlast::SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(DbError::Parser("INSERT requires at least one row".into()));
            }
            values
                .rows
                .into_iter()
                .map(|row| row.into_iter().map(map_expr).collect())
                .collect()
        }
        _ => Err(DbError::Parser("INSERT expects VALUES list".into())),
    }
}

fn map_select_item(item: sqlast::SelectItem) -> DbResult<SelectItem> {
    match item {
        sqlast::SelectItem::Wildcard(options) => {
            ensure_plain_wildcard(&options)?;
            Ok(SelectItem::Wildcard)
        }
        sqlast::SelectItem::QualifiedWildcard(_, _) => {
            Err(DbError::Parser("qualified wildcard not supported".into()))
        }
        sqlast::SelectItem::UnnamedExpr(expr) => Ok(SelectItem::Expr {
            expr: map_expr(expr)?,
            alias: None,
        }),
        sqlast::SelectItem::ExprWithAlias { expr, alias } => Ok(SelectItem::Expr {
            expr: map_expr(expr)?,
            alias: Some(normalize_ident(&alias)),
        }),
    }
}

fn map_expr(expr: sqlast::Expr) -> DbResult<Expr> {
    use sqlast::Expr as SqlExpr;

    match expr {
        SqlExpr::Identifier(ident) => Ok(Expr::Column {
            table: None,
            name: normalize_ident(&ident),
        }),
        SqlExpr::CompoundIdentifier(idents) => {
            let name = idents
                .last()
                .map(normalize_ident)
                .ok_or_else(|| DbError::Parser("invalid identifier".into()))?;
            let table = if idents.len() > 1 {
                Some(normalize_ident(&idents[idents.len() - 2]))
            } else {
                None
            };
            Ok(Expr::Column { table, name })
        }
        SqlExpr::Value(value) => Ok(Expr::Literal(map_value(value)?)),
        SqlExpr::BinaryOp { left, op, right } => Ok(Expr::Binary {
            left: Box::new(map_expr(*left)?),
            op: map_binary_op(op)?,
            right: Box::new(map_expr(*right)?),
        }),
        SqlExpr::UnaryOp { op, expr } => Ok(Expr::Unary {
            op: map_unary_op(op)?,
            expr: Box::new(map_expr(*expr)?),
        }),
        SqlExpr::Like {
            negated,
            expr,
            pattern,
            ..
        } => Ok(Expr::Like {
            expr: Box::new(map_expr(*expr)?),
            pattern: Box::new(map_expr(*pattern)?),
            negated,
        }),
        SqlExpr::IsNull(expr) => Ok(Expr::IsNull {
            expr: Box::new(map_expr(*expr)?),
            negated: false,
        }),
        SqlExpr::IsNotNull(expr) => Ok(Expr::IsNull {
            expr: Box::new(map_expr(*expr)?),
            negated: true,
        }),
        SqlExpr::InList {
            expr,
            list,
            negated,
        } => Ok(Expr::InList {
            expr: Box::new(map_expr(*expr)?),
            list: list.into_iter().map(map_expr).collect::<DbResult<_>>()?,
            negated,
        }),
        SqlExpr::InSubquery {
            expr,
            subquery,
            negated,
        } => Ok(Expr::InSubquery {
            expr: Box::new(map_expr(*expr)?),
            subquery: Box::new(map_query(*subquery)?),
            negated,
        }),
        SqlExpr::Subquery(query) => Ok(Expr::ScalarSubquery(Box::new(map_query(*query)?))),
        SqlExpr::Function(func) => map_function(func),
        SqlExpr::Nested(expr) => map_expr(*expr),
        _ => Err(DbError::Parser("unsupported expr".into())),
    }
}

fn map_function(func: sqlast::Function) -> DbResult<Expr> {
    let name = func.name.to_string().to_uppercase();
    let agg = match name.as_str() {
        "COUNT" => AggFunc::Count,
        "SUM" => AggFunc::Sum,
        "AVG" => AggFunc::Avg,
        "MIN" => AggFunc::Min,
        "MAX" => AggFunc::Max,
        other => return Err(DbError::Parser(format!("unsupported function: {other}"))),
    };

    let mut args = func.args;
    if args.len() != 1 {
        return Err(DbError::Parser(format!(
            "{name} takes exactly one argument"
        )));
    }
    let arg = match args.remove(0) {
        sqlast::FunctionArg::Unnamed(sqlast::FunctionArgExpr::Wildcard) => {
            if agg != AggFunc::Count {
                return Err(DbError::Parser(format!("{name}(*) is not valid")));
            }
            None
        }
        sqlast::FunctionArg::Unnamed(sqlast::FunctionArgExpr::Expr(e)) => {
            Some(Box::new(map_expr(e)?))
        }
        other => {
            return Err(DbError::Parser(format!(
                "unsupported function argument: {other:?}"
            )))
        }
    };

    Ok(Expr::Aggregate { func: agg, arg })
}

fn map_value(value: sqlast::Value) -> DbResult<Value> {
    use sqlast::Value as SqlValue;

    match value {
        SqlValue::Number(num, _) => map_number(&num),
        SqlValue::SingleQuotedString(s) => Ok(Value::Text(s)),
        SqlValue::Boolean(b) => Ok(Value::Bool(b)),
        SqlValue::Null => Ok(Value::Null),
        other => Err(DbError::Parser(format!("unsupported literal: {other:?}"))),
    }
}

/// Integer literals become BIGINT; literals with a fraction become DECIMAL
/// with the written scale. Binding narrows to the column type later.
fn map_number(num: &str) -> DbResult<Value> {
    if let Some((int_part, frac_part)) = num.split_once('.') {
        let scale = frac_part.len();
        if scale > 18 {
            return Err(DbError::Parser(format!("decimal literal too precise: {num}")));
        }
        let digits = format!("{int_part}{frac_part}")
            .parse::<i64>()
            .map_err(|_| DbError::Parser(format!("invalid decimal literal: {num}")))?;
        return Ok(Value::Decimal {
            digits,
            scale: scale as u8,
        });
    }
    num.parse::<i64>()
        .map(Value::BigInt)
        .map_err(|_| DbError::Parser(format!("invalid int literal: {num}")))
}

fn map_binary_op(op: sqlast::BinaryOperator) -> DbResult<BinaryOp> {
    use sqlast::BinaryOperator as SqlBinary;

    Ok(match op {
        SqlBinary::Eq => BinaryOp::Eq,
        SqlBinary::NotEq => BinaryOp::Ne,
        SqlBinary::Lt => BinaryOp::Lt,
        SqlBinary::LtEq => BinaryOp::Le,
        SqlBinary::Gt => BinaryOp::Gt,
        SqlBinary::GtEq => BinaryOp::Ge,
        SqlBinary::And => BinaryOp::And,
        SqlBinary::Or => BinaryOp::Or,
        SqlBinary::Plus => BinaryOp::Add,
        SqlBinary::Minus => BinaryOp::Sub,
        SqlBinary::Multiply => BinaryOp::Mul,
        SqlBinary::Divide => BinaryOp::Div,
        other => return Err(DbError::Parser(format!("unsupported operator: {other:?}"))),
    })
}

fn map_unary_op(op: sqlast::UnaryOperator) -> DbResult<UnaryOp> {
    use sqlast::UnaryOperator as SqlUnary;

    Ok(match op {
        SqlUnary::Not => UnaryOp::Not,
        SqlUnary::Minus => UnaryOp::Neg,
        other => {
            return Err(DbError::Parser(format!(
                "unsupported unary operator: {other:?}"
            )))
        }
    })
}

fn normalize_ident(ident: &sqlast::Ident) -> String {
    ident.value.to_lowercase()
}

fn normalize_object_name(name: &sqlast::ObjectName) -> DbResult<String> {
    name.0
        .first()
        .map(|ident| ident.value.to_lowercase())
        .ok_or_else(|| DbError::Parser("invalid object name".into()))
}

fn first_name(mut names: Vec<sqlast::ObjectName>) -> DbResult<String> {
    if names.is_empty() {
        return Err(DbError::Parser("DROP requires a target".into()));
    }
    normalize_object_name(&names.remove(0))
}

fn table_name_from_with_joins(table: &sqlast::TableWithJoins) -> DbResult<String> {
    if !table.joins.is_empty() {
        return Err(DbError::Parser("joins not supported here".into()));
    }
    match &table.relation {
        sqlast::TableFactor::Table { name, .. } => normalize_object_name(name),
        _ => Err(DbError::Parser("unsupported table factor".into())),
    }
}

fn map_index_column(column: &sqlast::OrderByExpr) -> DbResult<String> {
    match &column.expr {
        sqlast::Expr::Identifier(ident) => Ok(normalize_ident(ident)),
        sqlast::Expr::CompoundIdentifier(idents) => idents
            .last()
            .map(normalize_ident)
            .ok_or_else(|| DbError::Parser("invalid identifier".into())),
        other => Err(DbError::Parser(format!(
            "unsupported index column: {other:?}"
        ))),
    }
}

fn ensure_plain_wildcard(options: &sqlast::WildcardAdditionalOptions) -> DbResult<()> {
    let has_options = options.opt_exclude.is_some()
        || options.opt_except.is_some()
        || options.opt_rename.is_some()
        || options.opt_replace.is_some();
    if has_options {
        Err(DbError::Parser("wildcard options not supported".into()))
    } else {
        Ok(())
    }
}
