//! # rayo-store
//!
//! The gateway directory: nodes, calls, clients, applications and the
//! addresses bound to them, kept behind the [`GatewayDatastore`] trait.
//!
//! Two backends implement it. [`InMemoryDatastore`] keeps everything in
//! lock-guarded maps inside one process and is the reference behaviour.
//! [`ReplicatedDatastore`] writes the same records to a wide-column store
//! through the [`replicated::ColumnStore`] client seam.

pub mod datastore;
pub mod memory;
pub mod replicated;

mod error;

pub use datastore::GatewayDatastore;
pub use error::{Entity, Result, StoreError};
pub use memory::InMemoryDatastore;
pub use replicated::{ReplicatedConfig, ReplicatedDatastore};
