//! DDL: translates schema statements into catalog changes and storage
//! artifacts (heap files are created lazily; index files eagerly, with a
//! backfill from existing rows).

use crate::{DbState, QueryResult};
use btree::BTreeIndex;
use catalog::{Column, ForeignKey, TableSchema, TriggerMeta};
use common::{ColumnId, DbError, DbResult};
use parser::{ColumnDef, Statement, TableConstraint};
use planner::{bind_standalone, Planner, PlanningContext};

impl DbState {
    pub(crate) fn execute_ddl(&mut self, stmt: Statement) -> DbResult<QueryResult> {
        match stmt {
            Statement::CreateTable { name, columns, constraints } => {
                self.create_table(&name, columns, constraints)
            }
            Statement::DropTable { name } => {
                let removed = self.catalog.drop_table(&name)?;
                self.pool.drop_file(removed.heap_file)?;
                for index in removed.indexes() {
                    self.pool.drop_file(index.file)?;
                }
                Ok(QueryResult::Empty)
            }
            Statement::CreateIndex { name, table, columns, unique } => {
                self.create_index(&table, &name, &columns, unique)?;
                Ok(QueryResult::Empty)
            }
            Statement::DropIndex { name } => {
                let removed = self.catalog.drop_index(&name)?;
                self.pool.drop_file(removed.file)?;
                Ok(QueryResult::Empty)
            }
            Statement::CreateView { name, query, or_replace } => {
                // reject views whose query does not plan against the
                // current schema
                let mut ctx = PlanningContext::new(&self.catalog);
                Planner::plan_select((*query).clone(), &mut ctx)?;
                self.catalog.create_view(&name, *query, or_replace)?;
                Ok(QueryResult::Empty)
            }
            Statement::AlterView { name, query } => {
                let mut ctx = PlanningContext::new(&self.catalog);
                Planner::plan_select((*query).clone(), &mut ctx)?;
                self.catalog.alter_view(&name, *query)?;
                Ok(QueryResult::Empty)
            }
            Statement::DropView { name } => {
                self.catalog.drop_view(&name)?;
                Ok(QueryResult::Empty)
            }
            Statement::CreateTrigger { name, timing, event, table, condition, action } => {
                // bind the condition now so bad column references fail at
                // CREATE time, not first fire
                if let Some(condition) = &condition {
                    let columns = self.catalog.table(&table)?.schema.column_names();
                    bind_standalone(condition, &columns, &self.catalog)?;
                }
                self.catalog.create_trigger(TriggerMeta {
                    name,
                    table,
                    timing,
                    event,
                    condition,
                    action,
                })?;
                Ok(QueryResult::Empty)
            }
            Statement::DropTrigger { name } => {
                self.catalog.drop_trigger(&name)?;
                Ok(QueryResult::Empty)
            }
            other => Err(DbError::Semantic(format!("not a DDL statement: {other:?}"))),
        }
    }

    fn create_table(
        &mut self,
        name: &str,
        columns: Vec<ColumnDef>,
        constraints: Vec<TableConstraint>,
    ) -> DbResult<QueryResult> {
        let mut pk_names: Option<Vec<String>> = None;
        let mut unique_sets: Vec<Vec<String>> = Vec::new();
        let mut fk_specs: Vec<(Vec<String>, String, Option<Vec<String>>)> = Vec::new();
        let mut table_checks = Vec::new();
        let mut cat_columns = Vec::with_capacity(columns.len());

        for col in columns {
            if col.primary_key {
                if pk_names.is_some() {
                    return Err(DbError::Semantic("multiple PRIMARY KEY definitions".into()));
                }
                pk_names = Some(vec![col.name.clone()]);
            }
            if col.unique {
                unique_sets.push(vec![col.name.clone()]);
            }
            if let Some(fk) = &col.references {
                fk_specs.push((
                    vec![col.name.clone()],
                    fk.table.clone(),
                    fk.column.clone().map(|c| vec![c]),
                ));
            }
            cat_columns.push(Column {
                name: col.name,
                ty: col.ty,
                nullable: col.nullable && !col.primary_key,
                default: col.default,
                check: col.check,
            });
        }

        for constraint in constraints {
            match constraint {
                TableConstraint::PrimaryKey { columns } => {
                    if pk_names.is_some() {
                        return Err(DbError::Semantic(
                            "multiple PRIMARY KEY definitions".into(),
                        ));
                    }
                    pk_names = Some(columns);
                }
                TableConstraint::Unique { columns } => unique_sets.push(columns),
                TableConstraint::ForeignKey { columns, ref_table, ref_columns } => {
                    let refs = (!ref_columns.is_empty()).then_some(ref_columns);
                    fk_specs.push((columns, ref_table, refs));
                }
                TableConstraint::Check { expr } => table_checks.push(expr),
            }
        }

        let primary_key = pk_names
            .as_ref()
            .map(|names| {
                names
                    .iter()
                    .map(|n| ordinal_of(&cat_columns, n))
                    .collect::<DbResult<Vec<_>>>()
            })
            .transpose()?;

        // primary key columns are implicitly NOT NULL
        if let Some(pk) = &primary_key {
            for ordinal in pk {
                cat_columns[*ordinal as usize].nullable = false;
            }
        }

        let mut foreign_keys = Vec::with_capacity(fk_specs.len());
        for (local_names, ref_table, ref_columns) in fk_specs {
            let ref_meta = self.catalog.table(&ref_table)?;
            let ref_columns = match ref_columns {
                Some(named) => named,
                // unnamed references target the referenced table's PK
                None => {
                    let pk = ref_meta.schema.primary_key.as_ref().ok_or_else(|| {
                        DbError::Semantic(format!(
                            "table '{ref_table}' has no primary key to reference"
                        ))
                    })?;
                    pk.iter()
                        .filter_map(|o| ref_meta.schema.column(*o))
                        .map(|c| c.name.clone())
                        .collect()
                }
            };
            for col in &ref_columns {
                if ref_meta.schema.column_index(col).is_none() {
                    return Err(DbError::NotFound(format!(
                        "column '{col}' on table '{ref_table}'"
                    )));
                }
            }
            foreign_keys.push(ForeignKey {
                columns: local_names
                    .iter()
                    .map(|n| ordinal_of(&cat_columns, n))
                    .collect::<DbResult<Vec<_>>>()?,
                ref_table,
                ref_columns,
            });
        }

        let schema = TableSchema::try_new(cat_columns, primary_key, foreign_keys, table_checks)?;
        self.catalog.create_table(name, schema)?;

        // implicit unique indexes back the key constraints
        if let Some(pk) = pk_names {
            self.create_index(name, &format!("pk_{name}"), &pk, true)?;
        }
        for unique in unique_sets {
            let suffix = unique.join("_");
            self.create_index(name, &format!("uq_{name}_{suffix}"), &unique, true)?;
        }

        Ok(QueryResult::Empty)
    }

    fn create_index(
        &mut self,
        table: &str,
        index_name: &str,
        columns: &[String],
        unique: bool,
    ) -> DbResult<()> {
        self.catalog.create_index(table, index_name, columns, unique)?;
        let file = self.catalog.table(table)?.index(index_name)?.file;
        BTreeIndex::create(&mut self.pool, file, unique)?;
        self.backfill_index(table, index_name)
    }
}

fn ordinal_of(columns: &[Column], name: &str) -> DbResult<ColumnId> {
    columns
        .iter()
        .position(|c| c.name == name)
        .map(|i| i as ColumnId)
        .ok_or_else(|| DbError::NotFound(format!("column '{name}'")))
}
