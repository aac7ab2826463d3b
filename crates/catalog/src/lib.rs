//! Persistent catalog: tables with their columns and constraints, index
//! metadata, views (stored as parsed SELECTs), and triggers.
//!
//! The whole catalog serializes to one JSON file per database; in-memory
//! lookup maps are rebuilt on load and after every DDL change.

use std::{fs, path::Path};

use ahash::RandomState;
use common::{ColumnId, DbError, DbResult, FileId, TableId};
use hashbrown::HashMap;
use parser::{Expr, Select, TriggerAction, TriggerEvent, TriggerTiming};
use serde::{Deserialize, Serialize};
use types::SqlType;

type Map<K, V> = HashMap<K, V, RandomState>;

/// Unique identifier for an index definition stored in the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexId(pub u64);

/// Persistent registry of everything the engine knows about one database.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Catalog {
    tables: Vec<TableMeta>,
    views: Vec<ViewMeta>,
    triggers: Vec<TriggerMeta>,
    next_table_id: u64,
    next_index_id: u64,
    next_file_id: u64,
    #[serde(skip)]
    #[serde(default)]
    table_name_index: Map<String, usize>,
    #[serde(skip)]
    #[serde(default)]
    table_id_index: Map<TableId, usize>,
}

impl Catalog {
    pub fn new() -> Self {
        let mut catalog = Self {
            tables: Vec::new(),
            views: Vec::new(),
            triggers: Vec::new(),
            next_table_id: 1,
            next_index_id: 1,
            next_file_id: 1,
            table_name_index: Map::default(),
            table_id_index: Map::default(),
        };
        catalog.rebuild_lookups();
        catalog
    }

    /// Load a catalog from disk, returning an empty catalog if the file
    /// does not exist.
    pub fn load(path: &Path) -> DbResult<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = fs::read_to_string(path)?;
        let mut catalog: Catalog = serde_json::from_str(&data)
            .map_err(|err| DbError::Catalog(format!("invalid catalog file: {err}")))?;
        catalog.rebuild_lookups();
        Ok(catalog)
    }

    /// Persist the catalog contents as pretty JSON.
    pub fn save(&self, path: &Path) -> DbResult<()> {
        let data = serde_json::to_string_pretty(self)
            .map_err(|err| DbError::Catalog(format!("serialize failed: {err}")))?;
        fs::write(path, data)?;
        Ok(())
    }

    /// Hand out a fresh file id for a heap or index file.
    pub fn allocate_file_id(&mut self) -> FileId {
        let id = FileId(self.next_file_id);
        self.next_file_id += 1;
        id
    }

    // ---- tables ----

    pub fn table(&self, name: &str) -> DbResult<&TableMeta> {
        let idx = self
            .table_name_index
            .get(name)
            .copied()
            .ok_or_else(|| DbError::NotFound(format!("table '{name}'")))?;
        Ok(&self.tables[idx])
    }

    pub fn table_by_id(&self, id: TableId) -> DbResult<&TableMeta> {
        let idx = self
            .table_id_index
            .get(&id)
            .copied()
            .ok_or_else(|| DbError::NotFound(format!("table id {}", id.0)))?;
        Ok(&self.tables[idx])
    }

    pub fn table_mut(&mut self, name: &str) -> DbResult<&mut TableMeta> {
        let idx = self
            .table_name_index
            .get(name)
            .copied()
            .ok_or_else(|| DbError::NotFound(format!("table '{name}'")))?;
        Ok(&mut self.tables[idx])
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.table_name_index.contains_key(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableMeta> {
        self.tables.iter()
    }

    pub fn create_table(&mut self, name: &str, schema: TableSchema) -> DbResult<TableId> {
        if self.has_table(name) {
            return Err(DbError::Catalog(format!("table '{name}' already exists")));
        }
        if self.view(name).is_ok() {
            return Err(DbError::Catalog(format!("'{name}' is a view")));
        }
        let table_id = TableId(self.next_table_id);
        self.next_table_id += 1;
        let heap_file = self.allocate_file_id();
        self.tables.push(TableMeta::new(table_id, name.to_string(), schema, heap_file));
        self.rebuild_lookups();
        Ok(table_id)
    }

    /// Remove a table along with its indexes and triggers. Fails while
    /// another table's foreign key still references it.
    pub fn drop_table(&mut self, name: &str) -> DbResult<TableMeta> {
        let idx = self
            .table_name_index
            .get(name)
            .copied()
            .ok_or_else(|| DbError::NotFound(format!("table '{name}'")))?;

        for other in &self.tables {
            if other.name != name
                && other.schema.foreign_keys.iter().any(|fk| fk.ref_table == name)
            {
                return Err(DbError::Constraint(format!(
                    "table '{name}' is referenced by '{}'",
                    other.name
                )));
            }
        }

        let removed = self.tables.remove(idx);
        self.triggers.retain(|t| t.table != name);
        self.rebuild_lookups();
        Ok(removed)
    }

    // ---- indexes ----

    pub fn create_index(
        &mut self,
        table_name: &str,
        index_name: &str,
        columns: &[String],
        unique: bool,
    ) -> DbResult<IndexId> {
        if columns.is_empty() {
            return Err(DbError::Catalog(
                "index must reference at least one column".into(),
            ));
        }
        if self.index_location(index_name).is_some() {
            return Err(DbError::Catalog(format!(
                "index '{index_name}' already exists"
            )));
        }
        let resolved = {
            let table = self.table(table_name)?;
            let mut resolved = Vec::with_capacity(columns.len());
            for name in columns {
                let ordinal = table.schema.column_index(name).ok_or_else(|| {
                    DbError::NotFound(format!("column '{name}' on table '{table_name}'"))
                })?;
                resolved.push(ordinal);
            }
            resolved
        };
        let index_id = IndexId(self.next_index_id);
        self.next_index_id += 1;
        let file = self.allocate_file_id();
        let table = self.table_mut(table_name)?;
        table.add_index(IndexMeta {
            id: index_id,
            name: index_name.to_string(),
            columns: resolved,
            unique,
            file,
        })?;
        Ok(index_id)
    }

    /// Find which table an index belongs to.
    pub fn index_location(&self, index_name: &str) -> Option<(&TableMeta, &IndexMeta)> {
        self.tables.iter().find_map(|table| {
            table
                .indexes
                .iter()
                .find(|ix| ix.name == index_name)
                .map(|ix| (table, ix))
        })
    }

    pub fn drop_index(&mut self, index_name: &str) -> DbResult<IndexMeta> {
        let table_name = self
            .index_location(index_name)
            .map(|(t, _)| t.name.clone())
            .ok_or_else(|| DbError::NotFound(format!("index '{index_name}'")))?;
        let table = self.table_mut(&table_name)?;
        table.remove_index(index_name)
    }

    // ---- views ----

    pub fn view(&self, name: &str) -> DbResult<&ViewMeta> {
        self.views
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| DbError::NotFound(format!("view '{name}'")))
    }

    pub fn views(&self) -> impl Iterator<Item = &ViewMeta> {
        self.views.iter()
    }

    pub fn create_view(&mut self, name: &str, query: Select, or_replace: bool) -> DbResult<()> {
        if self.has_table(name) {
            return Err(DbError::Catalog(format!("'{name}' is a table")));
        }
        if let Some(existing) = self.views.iter_mut().find(|v| v.name == name) {
            if !or_replace {
                return Err(DbError::Catalog(format!("view '{name}' already exists")));
            }
            existing.query = query;
            return Ok(());
        }
        self.views.push(ViewMeta { name: name.to_string(), query });
        Ok(())
    }

    pub fn alter_view(&mut self, name: &str, query: Select) -> DbResult<()> {
        let view = self
            .views
            .iter_mut()
            .find(|v| v.name == name)
            .ok_or_else(|| DbError::NotFound(format!("view '{name}'")))?;
        view.query = query;
        Ok(())
    }

    pub fn drop_view(&mut self, name: &str) -> DbResult<()> {
        let before = self.views.len();
        self.views.retain(|v| v.name != name);
        if self.views.len() == before {
            return Err(DbError::NotFound(format!("view '{name}'")));
        }
        Ok(())
    }

    // ---- triggers ----

    pub fn triggers(&self) -> impl Iterator<Item = &TriggerMeta> {
        self.triggers.iter()
    }

    /// Triggers to fire for one table event, in creation order.
    pub fn triggers_for(
        &self,
        table: &str,
        event: TriggerEvent,
        timing: TriggerTiming,
    ) -> Vec<&TriggerMeta> {
        self.triggers
            .iter()
            .filter(|t| t.table == table && t.event == event && t.timing == timing)
            .collect()
    }

    pub fn create_trigger(&mut self, trigger: TriggerMeta) -> DbResult<()> {
        if self.triggers.iter().any(|t| t.name == trigger.name) {
            return Err(DbError::Catalog(format!(
                "trigger '{}' already exists",
                trigger.name
            )));
        }
        self.table(&trigger.table)?;
        self.triggers.push(trigger);
        Ok(())
    }

    pub fn drop_trigger(&mut self, name: &str) -> DbResult<()> {
        let before = self.triggers.len();
        self.triggers.retain(|t| t.name != name);
        if self.triggers.len() == before {
            return Err(DbError::NotFound(format!("trigger '{name}'")));
        }
        Ok(())
    }

    fn rebuild_lookups(&mut self) {
        self.table_name_index.clear();
        self.table_id_index.clear();
        for (idx, table) in self.tables.iter_mut().enumerate() {
            self.table_name_index.insert(table.name.clone(), idx);
            self.table_id_index.insert(table.id, idx);
            table.rebuild_index_lookup();
            table.schema.rebuild_ordinals();
        }
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata describing a registered table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableMeta {
    pub id: TableId,
    pub name: String,
    pub schema: TableSchema,
    /// Backing heap file for the table's tuples.
    pub heap_file: FileId,
    pub indexes: Vec<IndexMeta>,
    #[serde(skip)]
    #[serde(default)]
    index_name_lookup: Map<String, usize>,
}

impl TableMeta {
    fn new(id: TableId, name: String, schema: TableSchema, heap_file: FileId) -> Self {
        let mut table = Self {
            id,
            name,
            schema,
            heap_file,
            indexes: Vec::new(),
            index_name_lookup: Map::default(),
        };
        table.rebuild_index_lookup();
        table
    }

    fn add_index(&mut self, index: IndexMeta) -> DbResult<()> {
        if self.index_name_lookup.contains_key(&index.name) {
            return Err(DbError::Catalog(format!(
                "index '{}' already exists on table '{}'",
                index.name, self.name
            )));
        }
        self.indexes.push(index);
        self.rebuild_index_lookup();
        Ok(())
    }

    fn remove_index(&mut self, index_name: &str) -> DbResult<IndexMeta> {
        let idx = self
            .index_name_lookup
            .get(index_name)
            .copied()
            .ok_or_else(|| {
                DbError::NotFound(format!(
                    "index '{index_name}' on table '{}'",
                    self.name
                ))
            })?;
        let removed = self.indexes.remove(idx);
        self.rebuild_index_lookup();
        Ok(removed)
    }

    pub fn index(&self, name: &str) -> DbResult<&IndexMeta> {
        let idx = self.index_name_lookup.get(name).copied().ok_or_else(|| {
            DbError::NotFound(format!("index '{name}' on table '{}'", self.name))
        })?;
        Ok(&self.indexes[idx])
    }

    pub fn has_index(&self, index_name: &str) -> bool {
        self.index_name_lookup.contains_key(index_name)
    }

    pub fn indexes(&self) -> &[IndexMeta] {
        &self.indexes
    }

    /// The unique index backing the primary key, if the table has one.
    pub fn primary_key_index(&self) -> Option<&IndexMeta> {
        let pk = self.schema.primary_key.as_ref()?;
        self.indexes
            .iter()
            .find(|ix| ix.unique && ix.columns == *pk)
    }

    fn rebuild_index_lookup(&mut self) {
        self.index_name_lookup.clear();
        for (idx, index) in self.indexes.iter().enumerate() {
            self.index_name_lookup.insert(index.name.clone(), idx);
        }
    }
}

/// Column layout and constraints for one table.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TableSchema {
    pub columns: Vec<Column>,
    /// Ordinals of the primary key columns, if declared.
    pub primary_key: Option<Vec<ColumnId>>,
    pub foreign_keys: Vec<ForeignKey>,
    /// Table-level CHECK expressions, evaluated against the full row.
    pub checks: Vec<Expr>,
    #[serde(skip)]
    #[serde(default)]
    name_to_ordinal: Map<String, ColumnId>,
}

impl TableSchema {
    pub fn try_new(
        columns: Vec<Column>,
        primary_key: Option<Vec<ColumnId>>,
        foreign_keys: Vec<ForeignKey>,
        checks: Vec<Expr>,
    ) -> DbResult<Self> {
        if columns.is_empty() {
            return Err(DbError::Catalog(
                "table must contain at least one column".into(),
            ));
        }
        if columns.len() > u16::MAX as usize {
            return Err(DbError::Catalog("too many columns for a single table".into()));
        }
        let mut name_to_ordinal = Map::default();
        for (idx, column) in columns.iter().enumerate() {
            if name_to_ordinal
                .insert(column.name.clone(), idx as ColumnId)
                .is_some()
            {
                return Err(DbError::Catalog(format!(
                    "duplicate column '{}' found while building schema",
                    column.name
                )));
            }
        }
        if let Some(pk) = &primary_key {
            for ordinal in pk {
                if *ordinal as usize >= columns.len() {
                    return Err(DbError::Catalog("primary key column out of range".into()));
                }
            }
        }
        Ok(Self {
            columns,
            primary_key,
            foreign_keys,
            checks,
            name_to_ordinal,
        })
    }

    pub fn column_index(&self, name: &str) -> Option<ColumnId> {
        self.name_to_ordinal.get(name).copied()
    }

    pub fn column(&self, ordinal: ColumnId) -> Option<&Column> {
        self.columns.get(ordinal as usize)
    }

    pub fn column_type(&self, ordinal: ColumnId) -> Option<&SqlType> {
        self.columns.get(ordinal as usize).map(|c| &c.ty)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    fn rebuild_ordinals(&mut self) {
        self.name_to_ordinal.clear();
        for (idx, column) in self.columns.iter().enumerate() {
            self.name_to_ordinal.insert(column.name.clone(), idx as ColumnId);
        }
    }
}

/// One column: its type plus the column-level constraints the heap access
/// layer enforces on every write.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub name: String,
    pub ty: SqlType,
    pub nullable: bool,
    pub default: Option<Expr>,
    pub check: Option<Expr>,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: SqlType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: true,
            default: None,
            check: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// RESTRICT-semantics foreign key: referencing column ordinals and the
/// referenced table/columns by name.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ForeignKey {
    pub columns: Vec<ColumnId>,
    pub ref_table: String,
    pub ref_columns: Vec<String>,
}

/// Metadata describing a B+ tree index.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexMeta {
    pub id: IndexId,
    pub name: String,
    /// Ordinals of the indexed columns, a prefix of which is usable for
    /// range predicates.
    pub columns: Vec<ColumnId>,
    pub unique: bool,
    /// Backing index file; its meta page holds the tree's root page id.
    pub file: FileId,
}

impl IndexMeta {
    /// Key values for one index entry, extracted from a full row. `None`
    /// suppresses the entry when any key column is NULL.
    pub fn key_for(&self, values: &[types::Value]) -> Option<Vec<types::Value>> {
        let mut key = Vec::with_capacity(self.columns.len());
        for ordinal in &self.columns {
            let value = values.get(*ordinal as usize)?;
            if value.is_null() {
                return None;
            }
            key.push(value.clone());
        }
        Some(key)
    }
}

/// A view: the original SELECT is stored and re-planned on every use.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ViewMeta {
    pub name: String,
    pub query: Select,
}

/// A trigger definition. The only supported action is SIGNAL, which makes
/// triggers declarative row-level guards.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TriggerMeta {
    pub name: String,
    pub table: String,
    pub timing: TriggerTiming,
    pub event: TriggerEvent,
    pub condition: Option<Expr>,
    pub action: TriggerAction,
}

#[cfg(test)]
mod tests;
