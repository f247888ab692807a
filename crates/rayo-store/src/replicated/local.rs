//! In-process [`ColumnStore`].
//!
//! Behaves like a single-replica wide-column cluster reachable only at its
//! local contact point. Rows and columns are kept in key order. A delete
//! that empties a row leaves it behind as a tombstone that range scans
//! still return, until the table's `gc_grace_seconds` have passed; tables
//! with no grace period drop the row at once. Every data call fails if its
//! keyspace or table has not been created. Reads and writes can be made to
//! fail on demand so callers' error paths can be exercised.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use super::column::{
    Batch, Column, ColumnPredicate, ColumnStore, ColumnStoreError, Consistency, KeyRange,
    KeyspaceDef, Mutation, Row, TableDef,
};

/// Hosts the embedded store answers on.
const LOCAL_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "::1"];

/// Port the embedded store answers on.
pub const LOCAL_PORT: u16 = 9160;

#[derive(Default)]
struct LocalRow {
    columns: BTreeMap<String, String>,
    deleted_at: Option<Instant>,
}

struct LocalTable {
    gc_grace: Duration,
    rows: BTreeMap<String, LocalRow>,
    /// Emptied rows, oldest deletion first.
    tombstones: VecDeque<(Instant, String)>,
}

impl LocalTable {
    fn new(def: &TableDef) -> Self {
        Self {
            gc_grace: Duration::from_secs(u64::from(def.gc_grace_seconds)),
            rows: BTreeMap::new(),
            tombstones: VecDeque::new(),
        }
    }

    fn insert(&mut self, row: String, column: String, value: String) {
        let entry = self.rows.entry(row).or_default();
        entry.deleted_at = None;
        entry.columns.insert(column, value);
    }

    fn delete_column(&mut self, row: &str, column: &str, now: Instant) {
        let emptied = match self.rows.get_mut(row) {
            Some(entry) => {
                entry.columns.remove(column);
                entry.columns.is_empty()
            }
            None => false,
        };
        if emptied {
            self.bury(row, now);
        }
    }

    fn delete_row(&mut self, row: &str, now: Instant) {
        if let Some(entry) = self.rows.get_mut(row) {
            entry.columns.clear();
            self.bury(row, now);
        }
    }

    fn bury(&mut self, row: &str, now: Instant) {
        if self.gc_grace.is_zero() {
            self.rows.remove(row);
            return;
        }
        if let Some(entry) = self.rows.get_mut(row) {
            if entry.deleted_at.is_none() {
                entry.deleted_at = Some(now);
                self.tombstones.push_back((now, row.to_string()));
            }
        }
    }

    /// Drop tombstones older than the grace period. A row written again
    /// since its deletion is kept.
    fn purge(&mut self, now: Instant) {
        let grace = self.gc_grace;
        while self
            .tombstones
            .front()
            .is_some_and(|(deleted_at, _)| now.duration_since(*deleted_at) >= grace)
        {
            let Some((deleted_at, key)) = self.tombstones.pop_front() else {
                break;
            };
            if self
                .rows
                .get(&key)
                .is_some_and(|entry| entry.deleted_at == Some(deleted_at))
            {
                self.rows.remove(&key);
            }
        }
    }
}

struct LocalKeyspace {
    def: KeyspaceDef,
    tables: HashMap<String, LocalTable>,
}

impl LocalKeyspace {
    fn table(&self, keyspace: &str, name: &str) -> Result<&LocalTable, ColumnStoreError> {
        self.tables
            .get(name)
            .ok_or_else(|| ColumnStoreError::TableNotFound {
                keyspace: keyspace.to_string(),
                table: name.to_string(),
            })
    }
}

#[derive(Default)]
pub struct LocalColumnStore {
    keyspaces: RwLock<HashMap<String, LocalKeyspace>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    consistency_seen: Mutex<BTreeSet<Consistency>>,
}

impl LocalColumnStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent data read fail with `Unavailable`.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent batch fail with `Unavailable`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Consistency levels requested by data calls so far.
    pub fn consistency_levels(&self) -> BTreeSet<Consistency> {
        self.consistency_seen
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default()
    }

    fn record(&self, consistency: Consistency) {
        if let Ok(mut seen) = self.consistency_seen.lock() {
            seen.insert(consistency);
        }
    }

    fn check_reads(&self) -> Result<(), ColumnStoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(ColumnStoreError::Unavailable("reads disabled".into()));
        }
        Ok(())
    }
}

fn keyspace_not_found(keyspace: &str) -> ColumnStoreError {
    ColumnStoreError::KeyspaceNotFound(keyspace.to_string())
}

fn select(columns: &BTreeMap<String, String>, predicate: &ColumnPredicate) -> Vec<Column> {
    let to_column = |(name, value): (&String, &String)| Column {
        name: name.clone(),
        value: value.clone(),
    };
    match predicate {
        ColumnPredicate::All { limit } => columns.iter().take(*limit).map(to_column).collect(),
        ColumnPredicate::Names(names) => names
            .iter()
            .filter_map(|n| columns.get_key_value(n))
            .map(to_column)
            .collect(),
    }
}

#[async_trait]
impl ColumnStore for LocalColumnStore {
    async fn connect(&self, host: &str, port: u16) -> Result<(), ColumnStoreError> {
        if LOCAL_HOSTS.contains(&host) && port == LOCAL_PORT {
            debug!(host, port, "using embedded column store");
            return Ok(());
        }
        Err(ColumnStoreError::Unavailable(format!(
            "no cluster reachable at {host}:{port}, only the embedded store at localhost:{LOCAL_PORT} is available"
        )))
    }

    async fn describe_keyspace(
        &self,
        keyspace: &str,
    ) -> Result<Option<KeyspaceDef>, ColumnStoreError> {
        Ok(self
            .keyspaces
            .read()
            .await
            .get(keyspace)
            .map(|ks| ks.def.clone()))
    }

    async fn create_keyspace(&self, def: &KeyspaceDef) -> Result<(), ColumnStoreError> {
        let mut keyspaces = self.keyspaces.write().await;
        if keyspaces.contains_key(&def.name) {
            return Err(ColumnStoreError::KeyspaceExists(def.name.clone()));
        }
        debug!(keyspace = %def.name, "creating keyspace");
        let tables = def
            .tables
            .iter()
            .map(|t| (t.name.clone(), LocalTable::new(t)))
            .collect();
        keyspaces.insert(
            def.name.clone(),
            LocalKeyspace {
                def: def.clone(),
                tables,
            },
        );
        Ok(())
    }

    async fn drop_keyspace(&self, keyspace: &str) -> Result<(), ColumnStoreError> {
        debug!(keyspace, "dropping keyspace");
        self.keyspaces
            .write()
            .await
            .remove(keyspace)
            .map(|_| ())
            .ok_or_else(|| keyspace_not_found(keyspace))
    }

    async fn create_table(&self, keyspace: &str, def: &TableDef) -> Result<(), ColumnStoreError> {
        let mut keyspaces = self.keyspaces.write().await;
        let ks = keyspaces
            .get_mut(keyspace)
            .ok_or_else(|| keyspace_not_found(keyspace))?;
        if ks.tables.contains_key(&def.name) {
            return Err(ColumnStoreError::TableExists {
                keyspace: keyspace.to_string(),
                table: def.name.clone(),
            });
        }
        debug!(keyspace, table = %def.name, "creating table");
        ks.tables.insert(def.name.clone(), LocalTable::new(def));
        ks.def.tables.push(def.clone());
        Ok(())
    }

    async fn execute(
        &self,
        keyspace: &str,
        batch: Batch,
        consistency: Consistency,
    ) -> Result<(), ColumnStoreError> {
        self.record(consistency);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ColumnStoreError::Unavailable("writes disabled".into()));
        }

        let mut keyspaces = self.keyspaces.write().await;
        let ks = keyspaces
            .get_mut(keyspace)
            .ok_or_else(|| keyspace_not_found(keyspace))?;

        let mutations = batch.into_mutations();
        // Reject the whole batch before touching anything if a table is missing.
        for mutation in &mutations {
            let table = match mutation {
                Mutation::Insert { table, .. }
                | Mutation::DeleteColumn { table, .. }
                | Mutation::DeleteRow { table, .. } => table,
            };
            ks.table(keyspace, table)?;
        }

        let now = Instant::now();
        for table in ks.tables.values_mut() {
            table.purge(now);
        }

        for mutation in mutations {
            match mutation {
                Mutation::Insert {
                    table,
                    row,
                    column,
                    value,
                } => {
                    if let Some(t) = ks.tables.get_mut(&table) {
                        t.insert(row, column, value);
                    }
                }
                Mutation::DeleteColumn { table, row, column } => {
                    if let Some(t) = ks.tables.get_mut(&table) {
                        t.delete_column(&row, &column, now);
                    }
                }
                Mutation::DeleteRow { table, row } => {
                    if let Some(t) = ks.tables.get_mut(&table) {
                        t.delete_row(&row, now);
                    }
                }
            }
        }
        Ok(())
    }

    async fn get_row(
        &self,
        keyspace: &str,
        table: &str,
        row: &str,
        consistency: Consistency,
    ) -> Result<Vec<Column>, ColumnStoreError> {
        self.record(consistency);
        self.check_reads()?;
        let keyspaces = self.keyspaces.read().await;
        let ks = keyspaces
            .get(keyspace)
            .ok_or_else(|| keyspace_not_found(keyspace))?;
        Ok(ks
            .table(keyspace, table)?
            .rows
            .get(row)
            .map(|entry| select(&entry.columns, &ColumnPredicate::All { limit: usize::MAX }))
            .unwrap_or_default())
    }

    async fn get_range(
        &self,
        keyspace: &str,
        table: &str,
        range: KeyRange,
        predicate: &ColumnPredicate,
        consistency: Consistency,
    ) -> Result<Vec<Row>, ColumnStoreError> {
        self.record(consistency);
        self.check_reads()?;
        let keyspaces = self.keyspaces.read().await;
        let ks = keyspaces
            .get(keyspace)
            .ok_or_else(|| keyspace_not_found(keyspace))?;
        Ok(ks
            .table(keyspace, table)?
            .rows
            .range(range.start..)
            .take(range.limit)
            .map(|(key, entry)| Row {
                key: key.clone(),
                columns: select(&entry.columns, predicate),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_table() -> LocalColumnStore {
        let store = LocalColumnStore::new();
        store
            .create_keyspace(&KeyspaceDef {
                name: "test".into(),
                strategy: "SimpleStrategy".into(),
                replication_factor: 1,
                tables: vec![TableDef::new("t"), TableDef::new("now").with_gc_grace(0)],
            })
            .await
            .unwrap();
        store
    }

    async fn keys(store: &LocalColumnStore, table: &str) -> Vec<String> {
        store
            .get_range(
                "test",
                table,
                KeyRange { start: String::new(), limit: usize::MAX },
                &ColumnPredicate::All { limit: 1 },
                Consistency::One,
            )
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect()
    }

    #[tokio::test]
    async fn test_connect_only_reaches_the_local_contact_point() {
        let store = LocalColumnStore::new();
        store.connect("localhost", LOCAL_PORT).await.unwrap();
        store.connect("127.0.0.1", LOCAL_PORT).await.unwrap();

        assert!(matches!(
            store.connect("no-such-cluster.invalid", 1).await,
            Err(ColumnStoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.connect("localhost", 9042).await,
            Err(ColumnStoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_rows_without_grace_are_dropped_on_delete() {
        let store = store_with_table().await;
        for i in 0..50 {
            let key = format!("r{i}");
            let mut batch = Batch::new();
            batch.insert("now", &key, "c", "1").insert("now", &key, "d", "2");
            store.execute("test", batch, Consistency::One).await.unwrap();

            let mut batch = Batch::new();
            batch.delete_row("now", &key);
            store.execute("test", batch, Consistency::One).await.unwrap();
        }
        assert!(keys(&store, "now").await.is_empty());

        // Removing the last column drops the row too.
        let mut batch = Batch::new();
        batch.insert("now", "x", "c", "1");
        store.execute("test", batch, Consistency::One).await.unwrap();
        let mut batch = Batch::new();
        batch.delete_column("now", "x", "c");
        store.execute("test", batch, Consistency::One).await.unwrap();
        assert!(keys(&store, "now").await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ghost_rows_are_purged_after_gc_grace() {
        let store = store_with_table().await;
        let mut batch = Batch::new();
        batch.insert("t", "a", "c", "1").insert("t", "b", "c", "1");
        store.execute("test", batch, Consistency::One).await.unwrap();
        let mut batch = Batch::new();
        batch.delete_row("t", "a").delete_row("t", "b");
        store.execute("test", batch, Consistency::One).await.unwrap();

        // "b" is written again before the grace period ends and must survive.
        tokio::time::advance(Duration::from_secs(60)).await;
        let mut batch = Batch::new();
        batch.insert("t", "b", "c", "2");
        store.execute("test", batch, Consistency::One).await.unwrap();
        assert_eq!(keys(&store, "t").await, vec!["a", "b"]);

        tokio::time::advance(Duration::from_secs(864_000)).await;
        store.execute("test", Batch::new(), Consistency::One).await.unwrap();
        assert_eq!(keys(&store, "t").await, vec!["b"]);
    }

    #[tokio::test]
    async fn test_deleted_rows_remain_as_ghosts() {
        let store = store_with_table().await;
        let mut batch = Batch::new();
        batch.insert("t", "a", "c", "1").insert("t", "b", "c", "2");
        store.execute("test", batch, Consistency::One).await.unwrap();

        let mut batch = Batch::new();
        batch.delete_row("t", "a");
        store.execute("test", batch, Consistency::One).await.unwrap();

        assert!(store.get_row("test", "t", "a", Consistency::One).await.unwrap().is_empty());
        let rows = store
            .get_range(
                "test",
                "t",
                KeyRange { start: String::new(), limit: 10 },
                &ColumnPredicate::All { limit: 1 },
                Consistency::One,
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, "a");
        assert!(rows[0].columns.is_empty());
        assert_eq!(rows[1].columns.len(), 1);
    }

    #[tokio::test]
    async fn test_range_start_is_inclusive() {
        let store = store_with_table().await;
        let mut batch = Batch::new();
        for key in ["a", "b", "c", "d"] {
            batch.insert("t", key, "x", key);
        }
        store.execute("test", batch, Consistency::One).await.unwrap();

        let rows = store
            .get_range(
                "test",
                "t",
                KeyRange { start: "b".into(), limit: 2 },
                &ColumnPredicate::Names(vec!["x".into(), "missing".into()]),
                Consistency::One,
            )
            .await
            .unwrap();
        let keys: Vec<_> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "c"]);
        assert_eq!(rows[0].columns.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_table_rejects_whole_batch() {
        let store = store_with_table().await;
        let mut batch = Batch::new();
        batch.insert("t", "a", "c", "1").insert("nope", "a", "c", "1");
        let err = store.execute("test", batch, Consistency::One).await.unwrap_err();
        assert!(matches!(err, ColumnStoreError::TableNotFound { .. }));
        assert!(store.get_row("test", "t", "a", Consistency::One).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = store_with_table().await;
        store.set_fail_writes(true);
        let mut batch = Batch::new();
        batch.insert("t", "a", "c", "1");
        assert!(matches!(
            store.execute("test", batch, Consistency::One).await,
            Err(ColumnStoreError::Unavailable(_))
        ));

        store.set_fail_reads(true);
        assert!(store.get_row("test", "t", "a", Consistency::One).await.is_err());
        assert_eq!(
            store.consistency_levels().into_iter().collect::<Vec<_>>(),
            vec![Consistency::One]
        );
    }
}
