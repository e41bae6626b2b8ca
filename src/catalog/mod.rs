//! # Catalog
//!
//! In-memory registry of tables and indexes. The catalog owns each table's
//! heap and each index's structure; executors resolve both through the
//! shared [`Catalog`] handle in their context. Persistence of catalog
//! metadata is a non-goal — the registry is rebuilt by the embedding layer.
//!
//! Indexes are unique-key indexes over a single BIGINT column, backed by
//! either the B+tree (ordered, supports full scans) or the extendible hash
//! table (point lookups only).

use std::sync::Arc;

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::btree::BPlusTree;
use crate::buffer::BufferPoolManager;
use crate::htable::DiskHashTable;
use crate::table::{Rid, TableHeap, Tuple};
use crate::types::{DataType, Schema, SchemaRef};

pub type TableOid = u32;
pub type IndexOid = u32;

pub struct TableInfo {
    pub oid: TableOid,
    pub name: String,
    pub schema: SchemaRef,
    pub heap: Arc<TableHeap>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    BPlusTree,
    Hash,
}

enum IndexImpl {
    BTree(BPlusTree<i64, Rid>),
    Hash(DiskHashTable<i64, Rid>),
}

pub struct IndexInfo {
    pub oid: IndexOid,
    pub name: String,
    pub table_name: String,
    /// Offset of the indexed column in the table schema.
    pub key_column: usize,
    kind: IndexKind,
    index: IndexImpl,
}

impl IndexInfo {
    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    /// Extracts the index key from a tuple; `None` for NULL keys, which
    /// are not indexed.
    pub fn key_from_tuple(&self, tuple: &Tuple, schema: &Schema) -> Result<Option<i64>> {
        Ok(tuple.value(schema, self.key_column)?.as_big_int())
    }

    /// `false` when the key already exists (unique index conflict).
    pub fn insert_entry(&self, key: i64, rid: Rid) -> Result<bool> {
        match &self.index {
            IndexImpl::BTree(tree) => tree.insert(key, rid),
            IndexImpl::Hash(table) => table.insert(key, rid),
        }
    }

    pub fn delete_entry(&self, key: i64) -> Result<bool> {
        match &self.index {
            IndexImpl::BTree(tree) => tree.remove(&key),
            IndexImpl::Hash(table) => table.remove(&key),
        }
    }

    pub fn probe(&self, key: i64) -> Result<Option<Rid>> {
        match &self.index {
            IndexImpl::BTree(tree) => tree.get(&key),
            IndexImpl::Hash(table) => table.get(&key),
        }
    }

    /// All entries in key order. Only the ordered index supports this.
    pub fn scan_all(&self) -> Result<Vec<(i64, Rid)>> {
        match &self.index {
            IndexImpl::BTree(tree) => tree.iter()?.collect(),
            IndexImpl::Hash(_) => bail!("hash index '{}' does not support ordered scans", self.name),
        }
    }
}

#[derive(Default)]
struct CatalogInner {
    table_names: HashMap<String, TableOid>,
    tables: HashMap<TableOid, Arc<TableInfo>>,
    index_names: HashMap<(String, String), IndexOid>,
    indexes: HashMap<IndexOid, Arc<IndexInfo>>,
    table_indexes: HashMap<String, Vec<IndexOid>>,
    next_table_oid: TableOid,
    next_index_oid: IndexOid,
}

pub struct Catalog {
    bpm: BufferPoolManager,
    inner: RwLock<CatalogInner>,
}

impl Catalog {
    pub fn new(bpm: BufferPoolManager) -> Self {
        Self {
            bpm,
            inner: RwLock::new(CatalogInner::default()),
        }
    }

    pub fn buffer_pool(&self) -> &BufferPoolManager {
        &self.bpm
    }

    pub fn create_table(&self, name: impl Into<String>, schema: Schema) -> Result<Arc<TableInfo>> {
        let name = name.into();
        let mut inner = self.inner.write();
        ensure!(
            !inner.table_names.contains_key(&name),
            "table '{name}' already exists"
        );

        let heap = Arc::new(TableHeap::new(self.bpm.clone())?);
        let oid = inner.next_table_oid;
        inner.next_table_oid += 1;

        let info = Arc::new(TableInfo {
            oid,
            name: name.clone(),
            schema: Arc::new(schema),
            heap,
        });
        inner.table_names.insert(name, oid);
        inner.tables.insert(oid, Arc::clone(&info));
        Ok(info)
    }

    pub fn table(&self, name: &str) -> Result<Arc<TableInfo>> {
        let inner = self.inner.read();
        let oid = inner
            .table_names
            .get(name)
            .ok_or_else(|| eyre::eyre!("no table named '{name}'"))?;
        Ok(Arc::clone(&inner.tables[oid]))
    }

    pub fn table_by_oid(&self, oid: TableOid) -> Result<Arc<TableInfo>> {
        let inner = self.inner.read();
        inner
            .tables
            .get(&oid)
            .cloned()
            .ok_or_else(|| eyre::eyre!("no table with oid {oid}"))
    }

    /// Every registered table, for whole-heap walks (GC).
    pub fn tables(&self) -> Vec<Arc<TableInfo>> {
        self.inner.read().tables.values().cloned().collect()
    }

    /// Creates a unique-key index over one BIGINT column of `table_name`.
    /// The table must be empty or the caller backfills it.
    pub fn create_index(
        &self,
        name: impl Into<String>,
        table_name: &str,
        key_column: usize,
        kind: IndexKind,
    ) -> Result<Arc<IndexInfo>> {
        let name = name.into();
        let table = self.table(table_name)?;
        ensure!(
            key_column < table.schema.column_count(),
            "index key column {key_column} out of range for table '{table_name}'"
        );
        ensure!(
            matches!(
                table.schema.column(key_column).data_type(),
                DataType::BigInt | DataType::Integer
            ),
            "index key column must be an integer type"
        );

        let mut inner = self.inner.write();
        let key = (table_name.to_string(), name.clone());
        ensure!(
            !inner.index_names.contains_key(&key),
            "index '{name}' already exists on table '{table_name}'"
        );

        let index = match kind {
            IndexKind::BPlusTree => IndexImpl::BTree(BPlusTree::create(self.bpm.clone())?),
            IndexKind::Hash => IndexImpl::Hash(DiskHashTable::create(self.bpm.clone())?),
        };
        let oid = inner.next_index_oid;
        inner.next_index_oid += 1;

        let info = Arc::new(IndexInfo {
            oid,
            name,
            table_name: table_name.to_string(),
            key_column,
            kind,
            index,
        });
        inner.index_names.insert(key, oid);
        inner.indexes.insert(oid, Arc::clone(&info));
        inner
            .table_indexes
            .entry(table_name.to_string())
            .or_default()
            .push(oid);
        Ok(info)
    }

    pub fn index(&self, table_name: &str, index_name: &str) -> Result<Arc<IndexInfo>> {
        let inner = self.inner.read();
        let oid = inner
            .index_names
            .get(&(table_name.to_string(), index_name.to_string()))
            .ok_or_else(|| eyre::eyre!("no index '{index_name}' on table '{table_name}'"))?;
        Ok(Arc::clone(&inner.indexes[oid]))
    }

    pub fn index_by_oid(&self, oid: IndexOid) -> Result<Arc<IndexInfo>> {
        let inner = self.inner.read();
        inner
            .indexes
            .get(&oid)
            .cloned()
            .ok_or_else(|| eyre::eyre!("no index with oid {oid}"))
    }

    /// All indexes registered on a table, creation order.
    pub fn table_indexes(&self, table_name: &str) -> Vec<Arc<IndexInfo>> {
        let inner = self.inner.read();
        inner
            .table_indexes
            .get(table_name)
            .map(|oids| oids.iter().map(|oid| Arc::clone(&inner.indexes[oid])).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DiskManager;
    use crate::types::Column;
    use tempfile::tempdir;

    fn catalog() -> (tempfile::TempDir, Catalog) {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("test.db")).unwrap();
        let bpm = BufferPoolManager::new(64, 2, disk);
        (dir, Catalog::new(bpm))
    }

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::BigInt),
            Column::varchar("name", 16),
        ])
    }

    #[test]
    fn create_and_resolve_tables() {
        let (_dir, catalog) = catalog();
        let info = catalog.create_table("users", schema()).unwrap();
        assert_eq!(info.name, "users");

        let by_name = catalog.table("users").unwrap();
        assert_eq!(by_name.oid, info.oid);
        let by_oid = catalog.table_by_oid(info.oid).unwrap();
        assert_eq!(by_oid.name, "users");

        assert!(catalog.create_table("users", schema()).is_err());
        assert!(catalog.table("missing").is_err());
    }

    #[test]
    fn create_index_validates_key_column() {
        let (_dir, catalog) = catalog();
        catalog.create_table("users", schema()).unwrap();

        assert!(catalog
            .create_index("users_pk", "users", 0, IndexKind::BPlusTree)
            .is_ok());
        // varchar column
        assert!(catalog
            .create_index("users_name", "users", 1, IndexKind::Hash)
            .is_err());
        // out of range
        assert!(catalog
            .create_index("users_x", "users", 5, IndexKind::Hash)
            .is_err());
        // duplicate name
        assert!(catalog
            .create_index("users_pk", "users", 0, IndexKind::Hash)
            .is_err());
    }

    #[test]
    fn index_round_trips_entries() {
        let (_dir, catalog) = catalog();
        catalog.create_table("users", schema()).unwrap();
        let index = catalog
            .create_index("users_pk", "users", 0, IndexKind::BPlusTree)
            .unwrap();

        let rid = Rid::new(3, 1);
        assert!(index.insert_entry(42, rid).unwrap());
        assert!(!index.insert_entry(42, rid).unwrap(), "unique key conflict");
        assert_eq!(index.probe(42).unwrap(), Some(rid));
        assert!(index.delete_entry(42).unwrap());
        assert_eq!(index.probe(42).unwrap(), None);
    }

    #[test]
    fn table_indexes_lists_in_creation_order() {
        let (_dir, catalog) = catalog();
        catalog.create_table("users", schema()).unwrap();
        catalog
            .create_index("a", "users", 0, IndexKind::BPlusTree)
            .unwrap();
        catalog.create_index("b", "users", 0, IndexKind::Hash).unwrap();

        let names: Vec<String> = catalog
            .table_indexes("users")
            .iter()
            .map(|i| i.name.clone())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(catalog.table_indexes("other").is_empty());
    }
}
