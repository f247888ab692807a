use std::fmt;

use thiserror::Error;

/// Entity families tracked by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Node,
    Call,
    Client,
    Application,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::Node => "Rayo node",
            Entity::Call => "Call",
            Entity::Client => "Client",
            Entity::Application => "Application",
        };
        f.write_str(name)
    }
}

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A record with the same key is already present.
    #[error("{entity} [{key}] already exists")]
    AlreadyExists { entity: Entity, key: String },

    /// The referenced record is absent.
    #[error("{entity} [{key}] not found")]
    NotFound { entity: Entity, key: String },

    /// A call references a node that is not registered.
    #[error("Rayo node [{0}] not found for call")]
    NodeNotFound(String),

    /// Backend I/O or protocol failure.
    #[error("Datastore failure: {0}")]
    DatastoreFailure(String),
}

impl StoreError {
    pub fn already_exists(entity: Entity, key: impl Into<String>) -> Self {
        StoreError::AlreadyExists {
            entity,
            key: key.into(),
        }
    }

    pub fn not_found(entity: Entity, key: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            key: key.into(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
