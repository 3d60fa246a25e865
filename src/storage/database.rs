use super::persistence::{DatabaseSnapshot, DurabilityMode, SnapshotManager};
use super::table::{Table, TableSchema};
use crate::core::{Column, DbError, IndexDef, Result, Row, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

type TableMap = HashMap<String, Arc<Table>>;

/// Shared handle to the embedded relational store.
///
/// Cloning is cheap; every clone sees the same live tables. Writes go through
/// a [`SchemaTx`] and become visible only when [`Database::commit`] succeeds.
///
/// Several processes may open the same data directory. A persistent handle
/// refuses to publish over a snapshot written by someone else since it last
/// loaded, and [`Database::reload`] catches it up.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    tables: RwLock<TableMap>,
    snapshots: Option<SnapshotManager>,
    // snapshot generation the live tables match; written under the tables lock
    generation: AtomicU64,
}

impl Database {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                tables: RwLock::new(HashMap::new()),
                snapshots: None,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Opens (or creates) a store persisted under `data_dir`.
    pub fn open<P: AsRef<Path>>(data_dir: P, durability_mode: DurabilityMode) -> Result<Self> {
        if durability_mode == DurabilityMode::None {
            return Ok(Self::in_memory());
        }

        let snapshots = SnapshotManager::new(data_dir, durability_mode);
        let (tables, generation) = load_tables(&snapshots)?;

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                tables: RwLock::new(tables),
                snapshots: Some(snapshots),
                generation: AtomicU64::new(generation),
            }),
        })
    }

    /// Replaces the live tables with the snapshot on disk if another process
    /// has written since this handle last loaded or saved. Returns whether
    /// anything changed. A transaction begun before the reload conflicts on
    /// commit if it touched any reloaded table.
    pub fn reload(&self) -> Result<bool> {
        let Some(snapshots) = &self.inner.snapshots else {
            return Ok(false);
        };
        let mut live = self.inner.tables.write()?;
        let loaded = self.inner.generation.load(Ordering::Acquire);
        if snapshots.generation()? == loaded {
            return Ok(false);
        }

        let (tables, generation) = load_tables(snapshots)?;
        tracing::debug!(from = loaded, to = generation, "Reloaded snapshot");
        *live = tables;
        self.inner.generation.store(generation, Ordering::Release);
        Ok(true)
    }

    pub fn is_persistent(&self) -> bool {
        self.inner.snapshots.is_some()
    }

    pub fn table_exists(&self, name: &str) -> Result<bool> {
        Ok(self.inner.tables.read()?.contains_key(name))
    }

    /// Returns a read-only view of the committed table.
    pub fn table(&self, name: &str) -> Result<Arc<Table>> {
        self.inner
            .tables
            .read()?
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub fn list_tables(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.inner.tables.read()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Starts an optimistic transaction over the current committed state.
    pub fn begin(&self) -> Result<SchemaTx> {
        let tables = self.inner.tables.read()?.clone();
        Ok(SchemaTx {
            staged: tables,
            base: BTreeMap::new(),
        })
    }

    /// Publishes a transaction's changes.
    ///
    /// Fails with [`DbError::ConcurrentModification`] if any table the
    /// transaction touched was committed by someone else after `begin`. The
    /// snapshot is written before the in-memory state is swapped, so a failed
    /// write leaves both untouched.
    pub fn commit(&self, tx: SchemaTx) -> Result<()> {
        let mut live = self.inner.tables.write()?;
        self.publish(&mut live, tx)
    }

    /// Runs `f` inside a transaction while holding the write lock, so the
    /// commit can never conflict. Meant for short, synchronous writes.
    pub fn write<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut SchemaTx) -> Result<R>,
    {
        let mut live = self.inner.tables.write()?;
        let mut tx = SchemaTx {
            staged: live.clone(),
            base: BTreeMap::new(),
        };
        let result = f(&mut tx)?;
        self.publish(&mut live, tx)?;
        Ok(result)
    }

    fn publish(&self, live: &mut TableMap, tx: SchemaTx) -> Result<()> {
        if tx.base.is_empty() {
            return Ok(());
        }

        for (name, base) in &tx.base {
            let unchanged = match (base, live.get(name)) {
                (None, None) => true,
                (Some(base), Some(current)) => Arc::ptr_eq(base, current),
                _ => false,
            };
            if !unchanged {
                return Err(DbError::ConcurrentModification(name.clone()));
            }
        }

        let mut next = live.clone();
        for name in tx.base.keys() {
            match tx.staged.get(name) {
                Some(table) => {
                    next.insert(name.clone(), Arc::clone(table));
                }
                None => {
                    next.remove(name);
                }
            }
        }

        if let Some(snapshots) = &self.inner.snapshots {
            let loaded = self.inner.generation.load(Ordering::Acquire);
            let on_disk = snapshots.generation()?;
            if on_disk != loaded {
                return Err(DbError::StaleSnapshot { loaded, on_disk });
            }

            let owned = next
                .iter()
                .map(|(name, table)| (name.clone(), Table::clone(table)))
                .collect();
            snapshots.save(&DatabaseSnapshot::new(owned, loaded + 1))?;
            self.inner.generation.store(loaded + 1, Ordering::Release);
        }

        *live = next;
        Ok(())
    }
}

fn load_tables(snapshots: &SnapshotManager) -> Result<(TableMap, u64)> {
    let Some(snapshot) = snapshots.load()? else {
        return Ok((HashMap::new(), 0));
    };
    tracing::debug!(
        tables = snapshot.metadata.table_count,
        rows = snapshot.metadata.row_count,
        generation = snapshot.metadata.generation,
        "Loaded snapshot from {}",
        snapshots.path().display()
    );
    let tables = snapshot
        .tables
        .into_iter()
        .map(|(name, table)| (name, Arc::new(table)))
        .collect();
    Ok((tables, snapshot.metadata.generation))
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("persistent", &self.is_persistent())
            .finish()
    }
}

/// Copy-on-write staging area over the tables of a [`Database`].
///
/// Reads see the transaction's own writes. Dropping the transaction without
/// committing discards everything it did.
pub struct SchemaTx {
    staged: TableMap,
    // first-touch state of every table this tx wrote, `None` if it did not exist
    base: BTreeMap<String, Option<Arc<Table>>>,
}

impl SchemaTx {
    fn mark(&mut self, name: &str) {
        if !self.base.contains_key(name) {
            let original = self.staged.get(name).cloned();
            self.base.insert(name.to_string(), original);
        }
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        if !self.staged.contains_key(name) {
            return Err(DbError::TableNotFound(name.to_string()));
        }
        self.mark(name);
        let table = self
            .staged
            .get_mut(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))?;
        Ok(Arc::make_mut(table))
    }

    /// True if the transaction has written anything.
    pub fn is_dirty(&self) -> bool {
        !self.base.is_empty()
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.staged.contains_key(name)
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.staged
            .get(name)
            .map(|t| t.as_ref())
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub fn create_table(&mut self, schema: TableSchema) -> Result<()> {
        let name = schema.name().to_string();
        if self.staged.contains_key(&name) {
            return Err(DbError::TableExists(name));
        }
        let table = Table::new(schema)?;
        self.mark(&name);
        self.staged.insert(name, Arc::new(table));
        Ok(())
    }

    /// Creates the table unless one with the same name exists.
    ///
    /// An existing table with a different definition is an error rather than
    /// a silent no-op.
    pub fn create_table_if_not_exists(&mut self, schema: TableSchema) -> Result<bool> {
        if let Some(existing) = self.staged.get(schema.name()) {
            if *existing.schema() == schema {
                return Ok(false);
            }
            return Err(DbError::TableExists(schema.name().to_string()));
        }
        self.create_table(schema)?;
        Ok(true)
    }

    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        if !self.staged.contains_key(name) {
            return Err(DbError::TableNotFound(name.to_string()));
        }
        self.mark(name);
        self.staged.remove(name);
        Ok(())
    }

    pub fn drop_table_if_exists(&mut self, name: &str) -> Result<bool> {
        if !self.staged.contains_key(name) {
            return Ok(false);
        }
        self.drop_table(name)?;
        Ok(true)
    }

    pub fn rename_table(&mut self, from: &str, to: &str) -> Result<()> {
        if self.staged.contains_key(to) {
            return Err(DbError::TableExists(to.to_string()));
        }
        self.table_mut(from)?.rename(to);
        self.mark(to);
        let table = self
            .staged
            .remove(from)
            .ok_or_else(|| DbError::TableNotFound(from.to_string()))?;
        self.staged.insert(to.to_string(), table);
        Ok(())
    }

    pub fn add_column(&mut self, table: &str, column: Column) -> Result<bool> {
        // check first so a no-op does not mark the table as written
        if let Some(existing) = self.table(table)?.schema().get_column(&column.name)
            && *existing == column
        {
            return Ok(false);
        }
        self.table_mut(table)?.add_column(column)
    }

    pub fn drop_column(&mut self, table: &str, column: &str) -> Result<bool> {
        if self.table(table)?.schema().get_column(column).is_none() {
            return Ok(false);
        }
        self.table_mut(table)?.drop_column(column)
    }

    pub fn create_index(&mut self, table: &str, index: IndexDef) -> Result<bool> {
        if let Some(existing) = self.table(table)?.schema().get_index(&index.name)
            && *existing == index
        {
            return Ok(false);
        }
        self.table_mut(table)?.create_index(index)
    }

    pub fn drop_index(&mut self, table: &str, index: &str) -> Result<bool> {
        if self.table(table)?.schema().get_index(index).is_none() {
            return Ok(false);
        }
        self.table_mut(table)?.drop_index(index)
    }

    pub fn insert<I, S>(&mut self, table: &str, values: I) -> Result<Row>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let values = values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.table_mut(table)?.insert(values)
    }

    pub fn delete_where<F>(&mut self, table: &str, predicate: F) -> Result<usize>
    where
        F: Fn(&Row) -> bool,
    {
        if !self.table(table)?.scan().any(&predicate) {
            return Ok(0);
        }
        Ok(self.table_mut(table)?.delete_where(predicate))
    }
}
