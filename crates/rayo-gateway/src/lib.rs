//! # rayo-gateway
//!
//! Routing logic on top of the directory store:
//!
//! - [`GatewayStorageService`]: gateway-level facade over a
//!   [`rayo_store::GatewayDatastore`]
//! - [`LoadBalancer`]: picks the node that receives a new call
//! - [`AdminService`]: blacklists, bans and dial retry policy

pub mod admin;
pub mod lb;
pub mod storage;

mod error;

pub use admin::AdminService;
pub use error::{GatewayError, Result};
pub use lb::{LoadBalancer, LoadBalancerConfig};
pub use storage::GatewayStorageService;
