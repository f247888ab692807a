//! Wide-column store client seam.
//!
//! The replicated datastore only talks to its backing cluster through
//! [`ColumnStore`]. Rows are addressed by a string key inside a table, and
//! each row holds an ordered set of named string columns. Every data call
//! names the [`Consistency`] level it must be acknowledged at.

use async_trait::async_trait;
use thiserror::Error;

/// How many replicas must acknowledge a read or write. The directory only
/// ever asks for a single replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Consistency {
    One,
}

/// Errors raised by a [`ColumnStore`] implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ColumnStoreError {
    #[error("Keyspace [{0}] not found")]
    KeyspaceNotFound(String),

    #[error("Keyspace [{0}] already exists")]
    KeyspaceExists(String),

    #[error("Table [{keyspace}.{table}] not found")]
    TableNotFound { keyspace: String, table: String },

    #[error("Table [{keyspace}.{table}] already exists")]
    TableExists { keyspace: String, table: String },

    #[error("Cluster unavailable: {0}")]
    Unavailable(String),
}

/// Definition of a table ("column family").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    /// Seconds tombstones survive before they can be collected.
    pub gc_grace_seconds: u32,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            gc_grace_seconds: 864_000,
        }
    }

    pub fn with_gc_grace(mut self, seconds: u32) -> Self {
        self.gc_grace_seconds = seconds;
        self
    }
}

/// Definition of a keyspace and the tables it currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyspaceDef {
    pub name: String,
    pub strategy: String,
    pub replication_factor: u32,
    pub tables: Vec<TableDef>,
}

impl KeyspaceDef {
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub value: String,
}

/// A row returned by a range scan. A row whose columns were all deleted can
/// still be returned with no columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub key: String,
    pub columns: Vec<Column>,
}

/// Which columns of each row a read returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnPredicate {
    /// The first `limit` columns in name order.
    All { limit: usize },
    /// Only the named columns that exist.
    Names(Vec<String>),
}

/// A page of rows starting at `start` (inclusive; empty means the first row).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: String,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Insert {
        table: String,
        row: String,
        column: String,
        value: String,
    },
    DeleteColumn {
        table: String,
        row: String,
        column: String,
    },
    DeleteRow {
        table: String,
        row: String,
    },
}

/// Mutations sent to the cluster in one request. Each row is updated
/// atomically; the batch as a whole is not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    mutations: Vec<Mutation>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        table: &str,
        row: &str,
        column: &str,
        value: impl Into<String>,
    ) -> &mut Self {
        self.mutations.push(Mutation::Insert {
            table: table.to_string(),
            row: row.to_string(),
            column: column.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn delete_column(&mut self, table: &str, row: &str, column: &str) -> &mut Self {
        self.mutations.push(Mutation::DeleteColumn {
            table: table.to_string(),
            row: row.to_string(),
            column: column.to_string(),
        });
        self
    }

    pub fn delete_row(&mut self, table: &str, row: &str) -> &mut Self {
        self.mutations.push(Mutation::DeleteRow {
            table: table.to_string(),
            row: row.to_string(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn into_mutations(self) -> Vec<Mutation> {
        self.mutations
    }
}

/// Client for a wide-column cluster.
#[async_trait]
pub trait ColumnStore: Send + Sync {
    /// `None` when the keyspace does not exist.
    /// Reach the cluster at `host:port`. Fails with `Unavailable` when no
    /// cluster answers there.
    async fn connect(&self, host: &str, port: u16) -> Result<(), ColumnStoreError>;

    async fn describe_keyspace(
        &self,
        keyspace: &str,
    ) -> Result<Option<KeyspaceDef>, ColumnStoreError>;

    async fn create_keyspace(&self, def: &KeyspaceDef) -> Result<(), ColumnStoreError>;

    async fn drop_keyspace(&self, keyspace: &str) -> Result<(), ColumnStoreError>;

    async fn create_table(&self, keyspace: &str, def: &TableDef) -> Result<(), ColumnStoreError>;

    async fn execute(
        &self,
        keyspace: &str,
        batch: Batch,
        consistency: Consistency,
    ) -> Result<(), ColumnStoreError>;

    /// Columns of one row in name order; empty for a missing row.
    async fn get_row(
        &self,
        keyspace: &str,
        table: &str,
        row: &str,
        consistency: Consistency,
    ) -> Result<Vec<Column>, ColumnStoreError>;

    /// Rows in key order, starting at `range.start`.
    async fn get_range(
        &self,
        keyspace: &str,
        table: &str,
        range: KeyRange,
        predicate: &ColumnPredicate,
        consistency: Consistency,
    ) -> Result<Vec<Row>, ColumnStoreError>;
}
