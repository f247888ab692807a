use rayo_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Every candidate node for the platform is blacklisted, failing or absent.
    #[error("No Rayo node available for platform [{0}]")]
    NoNodeAvailable(String),

    /// A dispatched operation failed on the node it was sent to.
    #[error("Operation on Rayo node [{hostname}] failed: {reason}")]
    NodeOperation { hostname: String, reason: String },

    #[error("Invalid JID: {0}")]
    InvalidJid(#[from] rayo_shared::JidError),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
