//! # rayo-shared
//!
//! Types shared by every crate of the Rayo gateway: addressable identities
//! (JIDs), the directory entity models and a handful of constants.

pub mod constants;
pub mod error;
pub mod jid;
pub mod types;

pub use error::JidError;
pub use jid::Jid;
pub use types::*;
