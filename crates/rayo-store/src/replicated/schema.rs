//! Schema management for the replicated datastore.
//!
//! Structural changes take a while to reach every replica, so after each
//! one the handler sleeps for `schema_wait` before going on. Tests turn the
//! wait off.

use std::time::Duration;

use tracing::debug;

use super::column::{ColumnStore, ColumnStoreError, KeyspaceDef, TableDef};

pub const NODES: &str = "nodes";
pub const PLATFORMS: &str = "platforms";
pub const IPS: &str = "ips";
pub const CALLS: &str = "calls";
pub const CLIENT_CALLS: &str = "client_calls";
pub const NODE_CALLS: &str = "node_calls";
pub const APPLICATIONS: &str = "applications";
pub const ADDRESSES: &str = "addresses";
pub const CLIENTS: &str = "clients";

/// Every table the datastore needs.
pub fn table_defs() -> Vec<TableDef> {
    vec![
        TableDef::new(NODES).with_gc_grace(0),
        TableDef::new(PLATFORMS).with_gc_grace(0),
        TableDef::new(IPS).with_gc_grace(0),
        TableDef::new(CALLS).with_gc_grace(0),
        TableDef::new(CLIENT_CALLS).with_gc_grace(0),
        TableDef::new(NODE_CALLS).with_gc_grace(0),
        TableDef::new(APPLICATIONS),
        TableDef::new(ADDRESSES).with_gc_grace(0),
        TableDef::new(CLIENTS).with_gc_grace(0),
    ]
}

#[derive(Debug, Clone)]
pub struct SchemaHandler {
    schema_wait: Duration,
    wait_for_sync: bool,
}

impl Default for SchemaHandler {
    fn default() -> Self {
        Self {
            schema_wait: Duration::from_millis(200),
            wait_for_sync: true,
        }
    }
}

impl SchemaHandler {
    pub fn new(schema_wait: Duration, wait_for_sync: bool) -> Self {
        Self {
            schema_wait,
            wait_for_sync,
        }
    }

    pub async fn schema_exists<S: ColumnStore + ?Sized>(&self, store: &S, keyspace: &str) -> bool {
        debug!(keyspace, "searching schema");
        matches!(store.describe_keyspace(keyspace).await, Ok(Some(_)))
    }

    /// Whether the keyspace exists and holds every table.
    pub async fn valid_schema<S: ColumnStore + ?Sized>(&self, store: &S, keyspace: &str) -> bool {
        match store.describe_keyspace(keyspace).await {
            Ok(Some(def)) => table_defs().iter().all(|t| def.table(&t.name).is_some()),
            _ => false,
        }
    }

    /// Create the keyspace and any missing table, dropping the existing
    /// keyspace first when `drop_existing` is set.
    pub async fn build_schema<S: ColumnStore + ?Sized>(
        &self,
        store: &S,
        keyspace: &str,
        drop_existing: bool,
    ) -> Result<(), ColumnStoreError> {
        debug!(keyspace, drop_existing, "building schema");

        if drop_existing {
            match store.drop_keyspace(keyspace).await {
                Ok(()) => {
                    debug!(keyspace, "schema dropped");
                    self.wait_to_propagate().await;
                }
                Err(ColumnStoreError::KeyspaceNotFound(_)) => {
                    debug!(keyspace, "schema did not exist, nothing dropped");
                }
                Err(e) => return Err(e),
            }
        }

        let def = match store.describe_keyspace(keyspace).await? {
            Some(def) => def,
            None => {
                debug!(keyspace, "creating keyspace");
                let def = KeyspaceDef {
                    name: keyspace.to_string(),
                    strategy: "SimpleStrategy".to_string(),
                    replication_factor: 1,
                    tables: Vec::new(),
                };
                store.create_keyspace(&def).await?;
                self.wait_to_propagate().await;
                def
            }
        };

        for table in table_defs() {
            if def.table(&table.name).is_none() {
                debug!(keyspace, table = %table.name, "creating table");
                store.create_table(keyspace, &table).await?;
                self.wait_to_propagate().await;
            }
        }
        Ok(())
    }

    async fn wait_to_propagate(&self) {
        if self.wait_for_sync {
            tokio::time::sleep(self.schema_wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::column::{Batch, Consistency};
    use super::super::local::LocalColumnStore;
    use super::*;

    #[tokio::test]
    async fn test_build_creates_every_table() {
        let store = LocalColumnStore::new();
        let handler = SchemaHandler::new(Duration::ZERO, false);
        assert!(!handler.schema_exists(&store, "rayo").await);

        handler.build_schema(&store, "rayo", true).await.unwrap();
        assert!(handler.schema_exists(&store, "rayo").await);
        assert!(handler.valid_schema(&store, "rayo").await);
    }

    #[tokio::test]
    async fn test_repair_keeps_data_and_adds_missing_tables() {
        let store = LocalColumnStore::new();
        let handler = SchemaHandler::new(Duration::ZERO, false);
        store
            .create_keyspace(&KeyspaceDef {
                name: "rayo".into(),
                strategy: "SimpleStrategy".into(),
                replication_factor: 1,
                tables: vec![TableDef::new(CALLS)],
            })
            .await
            .unwrap();
        let mut batch = Batch::new();
        batch.insert(CALLS, "c1", "jid", "alice@example");
        store.execute("rayo", batch, Consistency::One).await.unwrap();
        assert!(!handler.valid_schema(&store, "rayo").await);

        handler.build_schema(&store, "rayo", false).await.unwrap();
        assert!(handler.valid_schema(&store, "rayo").await);
        let row = store.get_row("rayo", CALLS, "c1", Consistency::One).await.unwrap();
        assert_eq!(row.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_after_each_structural_change() {
        let store = LocalColumnStore::new();
        let handler = SchemaHandler::new(Duration::from_millis(200), true);
        let started = tokio::time::Instant::now();

        handler.build_schema(&store, "rayo", true).await.unwrap();

        // keyspace + one wait per table
        let expected = Duration::from_millis(200) * (1 + table_defs().len() as u32);
        assert!(started.elapsed() >= expected);
    }
}
