use crate::core::{Column, DbError, IndexDef, Result, Row, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    name: String,
    columns: Vec<Column>,
    indexes: Vec<IndexDef>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            indexes: Vec::new(),
        }
    }

    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name == name)
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.find_column_index(name).map(|idx| &self.columns[idx])
    }

    pub fn get_index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|idx| idx.name == name)
    }

    /// Name of the implicit unique index backing the primary key columns.
    pub fn primary_key_index_name(&self) -> String {
        format!("{}_pkey", self.name)
    }

    fn primary_key_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|col| col.primary_key)
            .map(|col| col.name.clone())
            .collect()
    }

    /// Every uniqueness constraint the table enforces, primary key first.
    fn unique_constraints(&self) -> Vec<(String, Vec<String>)> {
        let mut constraints = Vec::new();
        let pk = self.primary_key_columns();
        if !pk.is_empty() {
            constraints.push((self.primary_key_index_name(), pk));
        }
        for index in self.indexes.iter().filter(|idx| idx.unique) {
            constraints.push((index.name.clone(), index.columns.clone()));
        }
        constraints
    }

    fn validate(&self) -> Result<()> {
        for (pos, column) in self.columns.iter().enumerate() {
            if self.columns[..pos].iter().any(|c| c.name == column.name) {
                return Err(DbError::ColumnExists(column.name.clone(), self.name.clone()));
            }
            if column.auto_increment && column.data_type != crate::core::DataType::Integer {
                return Err(DbError::TypeMismatch(format!(
                    "Auto-increment column '{}' must be INTEGER",
                    column.name
                )));
            }
            if let Some(default) = &column.default {
                column.validate(default)?;
            }
        }
        for index in &self.indexes {
            self.validate_index(index)?;
        }
        Ok(())
    }

    fn validate_index(&self, index: &IndexDef) -> Result<()> {
        if index.columns.is_empty() {
            return Err(DbError::ExecutionError(format!(
                "Index '{}' must cover at least one column",
                index.name
            )));
        }
        for column in &index.columns {
            if self.find_column_index(column).is_none() {
                return Err(DbError::ColumnNotFound(column.clone(), self.name.clone()));
            }
        }
        Ok(())
    }
}

/// Non-NULL key of a unique constraint mapped to the row id holding it.
type KeyIndex = BTreeMap<Vec<Value>, u64>;

/// A table's schema plus its rows.
///
/// Every unique constraint, the primary key included, keeps an ordered key
/// index next to the rows. The indexes are not written to snapshots; they are
/// rebuilt when a table is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "StoredTable")]
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<u64, Row>,
    next_row_id: u64,
    next_sequence: i64,
    #[serde(skip_serializing)]
    keys: BTreeMap<String, KeyIndex>,
}

/// Snapshot form of a [`Table`].
#[derive(Deserialize)]
struct StoredTable {
    schema: TableSchema,
    rows: BTreeMap<u64, Row>,
    next_row_id: u64,
    next_sequence: i64,
}

impl From<StoredTable> for Table {
    fn from(stored: StoredTable) -> Self {
        let mut table = Self {
            schema: stored.schema,
            rows: stored.rows,
            next_row_id: stored.next_row_id,
            next_sequence: stored.next_sequence,
            keys: BTreeMap::new(),
        };
        table.rebuild_keys();
        table
    }
}

// NULLs never collide, matching SQL UNIQUE semantics.
fn key_of(positions: &[usize], row: &Row) -> Option<Vec<Value>> {
    let key: Vec<Value> = positions.iter().map(|&p| row[p].clone()).collect();
    if key.iter().any(Value::is_null) {
        None
    } else {
        Some(key)
    }
}

impl Table {
    pub fn new(schema: TableSchema) -> Result<Self> {
        schema.validate()?;
        let mut table = Self {
            schema,
            rows: BTreeMap::new(),
            next_row_id: 0,
            next_sequence: 1,
            keys: BTreeMap::new(),
        };
        table.rebuild_keys();
        Ok(table)
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn scan(&self) -> impl Iterator<Item = &Row> + '_ {
        self.rows.values()
    }

    /// Reads column `name` out of a row produced by this table.
    pub fn value<'r>(&self, row: &'r Row, name: &str) -> Result<&'r Value> {
        let idx = self
            .schema
            .find_column_index(name)
            .ok_or_else(|| DbError::ColumnNotFound(name.to_string(), self.name().to_string()))?;
        Ok(&row[idx])
    }

    /// Row whose key on unique index `index` equals `key`.
    pub fn find_unique(&self, index: &str, key: &[Value]) -> Result<Option<&Row>> {
        let keys = self.key_index(index)?;
        Ok(keys.get(key).and_then(|id| self.rows.get(id)))
    }

    /// Rows whose key on unique index `index` starts with `prefix`, in key
    /// order.
    pub fn scan_unique_prefix(&self, index: &str, prefix: &[Value]) -> Result<Vec<&Row>> {
        let keys = self.key_index(index)?;
        Ok(keys
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter_map(|(_, id)| self.rows.get(id))
            .collect())
    }

    fn key_index(&self, index: &str) -> Result<&KeyIndex> {
        self.keys
            .get(index)
            .ok_or_else(|| DbError::IndexNotFound(index.to_string(), self.name().to_string()))
    }

    pub(crate) fn rename(&mut self, new_name: &str) {
        let old_pkey = self.schema.primary_key_index_name();
        self.schema.name = new_name.to_string();
        if let Some(keys) = self.keys.remove(&old_pkey) {
            self.keys.insert(self.schema.primary_key_index_name(), keys);
        }
    }

    /// Inserts a row built from named values; missing columns take their
    /// default, auto-increment columns draw from the table sequence.
    pub fn insert(&mut self, values: Vec<(String, Value)>) -> Result<Row> {
        for (name, _) in &values {
            if self.schema.find_column_index(name).is_none() {
                return Err(DbError::ColumnNotFound(name.clone(), self.name().to_string()));
            }
        }

        let mut sequence_used = None;
        let mut row = Row::with_capacity(self.schema.columns.len());
        for column in &self.schema.columns {
            let provided = values
                .iter()
                .rev()
                .find(|(name, _)| *name == column.name)
                .map(|(_, value)| value.clone());
            let value = match provided {
                Some(value) if !value.is_null() => value,
                _ if column.auto_increment => {
                    sequence_used = Some(self.next_sequence);
                    Value::Integer(self.next_sequence)
                }
                Some(value) => value,
                None => column.fill_value(),
            };
            column.validate(&value)?;
            row.push(value);
        }

        let keys = self.unique_keys(&row)?;

        if let Some(seq) = sequence_used {
            self.next_sequence = seq + 1;
        } else {
            // keep the sequence ahead of explicitly supplied ids
            for (column, value) in self.schema.columns.iter().zip(row.iter()) {
                if column.auto_increment
                    && let Value::Integer(id) = value
                    && *id >= self.next_sequence
                {
                    self.next_sequence = id + 1;
                }
            }
        }

        let id = self.next_row_id;
        self.next_row_id += 1;
        for (index, key) in keys {
            self.keys.entry(index).or_default().insert(key, id);
        }
        self.rows.insert(id, row.clone());
        Ok(row)
    }

    /// Deletes every row matching `predicate`, returning how many were removed.
    pub fn delete_where<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&Row) -> bool,
    {
        let doomed: Vec<u64> = self
            .rows
            .iter()
            .filter(|&(_, row)| predicate(row))
            .map(|(&id, _)| id)
            .collect();
        if doomed.is_empty() {
            return 0;
        }

        let constraints: Vec<(String, Vec<usize>)> = self
            .schema
            .unique_constraints()
            .into_iter()
            .map(|(name, columns)| {
                let positions = self.positions(&columns);
                (name, positions)
            })
            .collect();
        for id in &doomed {
            let Some(row) = self.rows.remove(id) else {
                continue;
            };
            for (name, positions) in &constraints {
                if let (Some(keys), Some(key)) = (self.keys.get_mut(name), key_of(positions, &row)) {
                    keys.remove(&key);
                }
            }
        }
        doomed.len()
    }

    /// Returns `Ok(false)` when an identical column is already present.
    pub fn add_column(&mut self, column: Column) -> Result<bool> {
        if let Some(existing) = self.schema.get_column(&column.name) {
            if *existing == column {
                return Ok(false);
            }
            return Err(DbError::ColumnExists(column.name, self.name().to_string()));
        }
        if column.primary_key || column.auto_increment {
            return Err(DbError::ExecutionError(format!(
                "Cannot add key column '{}' to existing table '{}'",
                column.name,
                self.name()
            )));
        }
        let fill = column.fill_value();
        if !self.rows.is_empty() {
            column.validate(&fill)?;
        } else if let Some(default) = &column.default {
            column.validate(default)?;
        }

        for row in self.rows.values_mut() {
            row.push(fill.clone());
        }
        self.schema.columns.push(column);
        Ok(true)
    }

    /// Returns `Ok(false)` when the column does not exist.
    pub fn drop_column(&mut self, name: &str) -> Result<bool> {
        let Some(idx) = self.schema.find_column_index(name) else {
            return Ok(false);
        };
        if self.schema.columns[idx].primary_key {
            return Err(DbError::ConstraintViolation(format!(
                "Cannot drop primary key column '{}' of table '{}'",
                name,
                self.name()
            )));
        }
        if let Some(index) = self
            .schema
            .indexes
            .iter()
            .find(|index| index.columns.iter().any(|c| c == name))
        {
            return Err(DbError::ConstraintViolation(format!(
                "Column '{}' is used by index '{}'",
                name, index.name
            )));
        }

        for row in self.rows.values_mut() {
            row.remove(idx);
        }
        self.schema.columns.remove(idx);
        Ok(true)
    }

    /// Returns `Ok(false)` when an identical index is already present.
    pub fn create_index(&mut self, index: IndexDef) -> Result<bool> {
        if let Some(existing) = self.schema.get_index(&index.name) {
            if *existing == index {
                return Ok(false);
            }
            return Err(DbError::ExecutionError(format!(
                "Index '{}' already exists on table '{}' with a different definition",
                index.name,
                self.name()
            )));
        }
        self.schema.validate_index(&index)?;

        if index.unique {
            let positions = self.positions(&index.columns);
            let mut keys = KeyIndex::new();
            for (&id, row) in &self.rows {
                if let Some(key) = key_of(&positions, row)
                    && keys.insert(key, id).is_some()
                {
                    return Err(DbError::UniqueViolation {
                        table: self.name().to_string(),
                        index: index.name.clone(),
                    });
                }
            }
            self.keys.insert(index.name.clone(), keys);
        }

        self.schema.indexes.push(index);
        Ok(true)
    }

    /// Returns `Ok(false)` when the index does not exist.
    pub fn drop_index(&mut self, name: &str) -> Result<bool> {
        let before = self.schema.indexes.len();
        self.schema.indexes.retain(|index| index.name != name);
        self.keys.remove(name);
        Ok(self.schema.indexes.len() != before)
    }

    fn positions(&self, columns: &[String]) -> Vec<usize> {
        columns
            .iter()
            .filter_map(|c| self.schema.find_column_index(c))
            .collect()
    }

    fn rebuild_keys(&mut self) {
        let mut all = BTreeMap::new();
        for (name, columns) in self.schema.unique_constraints() {
            let positions = self.positions(&columns);
            let keys: KeyIndex = self
                .rows
                .iter()
                .filter_map(|(&id, row)| key_of(&positions, row).map(|key| (key, id)))
                .collect();
            all.insert(name, keys);
        }
        self.keys = all;
    }

    /// Keys `row` would take in each unique index, or the violation it causes.
    fn unique_keys(&self, row: &Row) -> Result<Vec<(String, Vec<Value>)>> {
        let mut keys = Vec::new();
        for (index_name, columns) in self.schema.unique_constraints() {
            let Some(key) = key_of(&self.positions(&columns), row) else {
                continue;
            };
            if self
                .keys
                .get(&index_name)
                .is_some_and(|index| index.contains_key(&key))
            {
                return Err(DbError::UniqueViolation {
                    table: self.name().to_string(),
                    index: index_name,
                });
            }
            keys.push((index_name, key));
        }
        Ok(keys)
    }
}
