//! Operator controls: node blacklisting, JID bans and dial retry policy.
//!
//! The ban list lives in memory and belongs to one `AdminService`; build
//! one per gateway and share it behind an `Arc`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tokio::sync::RwLock;
use tracing::{info, warn};

use rayo_shared::constants::{DEFAULT_MAX_DIAL_RETRIES, SERVER_NAME};

use crate::error::Result;
use crate::storage::GatewayStorageService;

pub struct AdminService {
    storage: GatewayStorageService,
    banned: RwLock<HashSet<String>>,
    max_dial_retries: AtomicU32,
    failed_blacklist_updates: AtomicU64,
}

impl AdminService {
    pub fn new(storage: GatewayStorageService) -> Self {
        Self {
            storage,
            banned: RwLock::new(HashSet::new()),
            max_dial_retries: AtomicU32::new(DEFAULT_MAX_DIAL_RETRIES),
            failed_blacklist_updates: AtomicU64::new(0),
        }
    }

    pub fn server_name(&self) -> &'static str {
        SERVER_NAME
    }

    /// Set or clear the blacklist flag of `hostname` within `platform`.
    ///
    /// The node's error counter is reset either way. Returns whether the
    /// node was found on that platform, or an error when the store could not
    /// be read. A failure to persist the change is logged and counted, never
    /// returned.
    pub async fn blacklist(&self, platform: &str, hostname: &str, blacklisted: bool) -> Result<bool> {
        let node = match self.storage.find_rayo_node(hostname).await {
            Ok(node) => node.filter(|n| n.platforms.contains(platform)),
            Err(e) => {
                warn!(platform, hostname, error = %e, "could not read Rayo node for blacklist update");
                return Err(e);
            }
        };
        let Some(mut node) = node else {
            info!(platform, hostname, "blacklist request for unknown Rayo node");
            return Ok(false);
        };

        node.blacklisted = blacklisted;
        node.consecutive_errors = 0;
        match self.storage.update_rayo_node(node).await {
            Ok(_) => info!(platform, hostname, blacklisted, "Rayo node blacklist updated"),
            Err(e) => {
                self.failed_blacklist_updates.fetch_add(1, Ordering::Relaxed);
                warn!(platform, hostname, blacklisted, error = %e, "could not persist blacklist update");
            }
        }
        Ok(true)
    }

    /// Blacklist updates that could not be persisted since start.
    pub fn failed_blacklist_updates(&self) -> u64 {
        self.failed_blacklist_updates.load(Ordering::Relaxed)
    }

    pub async fn ban(&self, jid: &str) {
        if self.banned.write().await.insert(jid.to_string()) {
            info!(jid, "JID banned");
        }
    }

    pub async fn unban(&self, jid: &str) {
        if self.banned.write().await.remove(jid) {
            info!(jid, "JID unbanned");
        }
    }

    pub async fn is_banned(&self, jid: &str) -> bool {
        self.banned.read().await.contains(jid)
    }

    /// Snapshot of the ban list, sorted.
    pub async fn banned_jids(&self) -> Vec<String> {
        let mut jids: Vec<String> = self.banned.read().await.iter().cloned().collect();
        jids.sort();
        jids
    }

    pub fn max_dial_retries(&self) -> u32 {
        self.max_dial_retries.load(Ordering::Relaxed)
    }

    pub fn set_max_dial_retries(&self, retries: u32) {
        self.max_dial_retries.store(retries, Ordering::Relaxed);
    }
}
