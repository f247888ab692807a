//! Replicated backend.
//!
//! Stores the directory in a wide-column cluster reached through
//! [`ColumnStore`]. Every read and write is issued at [`Consistency::One`]:
//! a successful write has reached one replica, not all of them, so a read
//! served by another replica may not see it yet.
//!
//! The cluster gives no multi-row transactions. A call row and its two index
//! rows are written in one batch but not atomically, so a crash mid-write
//! can leave a call indexed under one identity only. Index tables are
//! derived state and are expected to be reconciled out of band.

pub mod column;
pub mod datastore;
pub mod local;
pub mod schema;

use std::time::Duration;

pub use column::{ColumnStore, ColumnStoreError, Consistency};
pub use datastore::ReplicatedDatastore;
pub use local::LocalColumnStore;
pub use schema::SchemaHandler;

/// Connection and schema settings for the replicated backend.
#[derive(Debug, Clone)]
pub struct ReplicatedConfig {
    pub host: String,
    pub port: u16,
    pub keyspace: String,
    /// Drop and recreate the keyspace on start.
    pub recreate_schema: bool,
    /// Pause after each structural schema change.
    pub schema_wait: Duration,
    /// When false, `schema_wait` is ignored.
    pub wait_for_sync: bool,
}

impl Default for ReplicatedConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: local::LOCAL_PORT,
            keyspace: "rayo".to_string(),
            recreate_schema: true,
            schema_wait: Duration::from_millis(200),
            wait_for_sync: true,
        }
    }
}

impl ReplicatedConfig {
    /// `host:port` of the cluster contact point.
    pub fn contact_point(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn schema_handler(&self) -> SchemaHandler {
        SchemaHandler::new(self.schema_wait, self.wait_for_sync)
    }
}
