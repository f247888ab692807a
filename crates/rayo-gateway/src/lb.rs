//! Node selection.
//!
//! Only the lowest priority value present among a platform's healthy nodes
//! is considered. Inside that class nodes are walked in weighted round
//! robin: each node owns `max(weight, 1)` consecutive slots, nodes ordered
//! by hostname, and a per-platform cursor picks the next slot. The cursor is
//! a plain atomic counter so concurrent selections never block each other
//! once the platform has been seen.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use rayo_shared::constants::DEFAULT_MAX_CONSECUTIVE_ERRORS;
use rayo_shared::{jid, RayoNode};

use crate::error::{GatewayError, Result};
use crate::storage::GatewayStorageService;

#[derive(Debug, Clone)]
pub struct LoadBalancerConfig {
    /// Nodes with more consecutive errors than this are skipped.
    pub max_consecutive_errors: u32,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
        }
    }
}

type Cursors = RwLock<HashMap<String, Arc<AtomicU64>>>;

pub struct LoadBalancer {
    storage: GatewayStorageService,
    config: LoadBalancerConfig,
    platform_cursors: Cursors,
    client_cursors: Cursors,
}

impl LoadBalancer {
    pub fn new(storage: GatewayStorageService, config: LoadBalancerConfig) -> Self {
        Self {
            storage,
            config,
            platform_cursors: RwLock::new(HashMap::new()),
            client_cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &LoadBalancerConfig {
        &self.config
    }

    /// Pick the next node for `platform`.
    pub async fn select_node(&self, platform: &str) -> Result<RayoNode> {
        self.select_excluding(platform, &HashSet::new()).await
    }

    async fn select_excluding(
        &self,
        platform: &str,
        excluded: &HashSet<String>,
    ) -> Result<RayoNode> {
        let max_errors = self.config.max_consecutive_errors;
        let candidates: Vec<RayoNode> = self
            .storage
            .get_rayo_nodes(platform)
            .await
            .into_iter()
            .filter(|n| n.is_available(max_errors) && !excluded.contains(&n.hostname))
            .collect();

        let Some(best) = candidates.iter().map(|n| n.priority).min() else {
            debug!(platform, "no available Rayo node");
            return Err(GatewayError::NoNodeAvailable(platform.to_string()));
        };

        let mut class: Vec<RayoNode> = candidates
            .into_iter()
            .filter(|n| n.priority == best)
            .collect();
        class.sort_by(|a, b| a.hostname.cmp(&b.hostname));

        let total: u64 = class.iter().map(slots).sum();
        let cursor = cursor_for(&self.platform_cursors, platform).await;
        let mut ticket = cursor.fetch_add(1, Ordering::Relaxed) % total;

        for node in class {
            let owned = slots(&node);
            if ticket < owned {
                debug!(platform, hostname = %node.hostname, "selected Rayo node");
                return Ok(node);
            }
            ticket -= owned;
        }
        // `ticket < total` always lands on a slot above.
        Err(GatewayError::NoNodeAvailable(platform.to_string()))
    }

    /// Record a failed operation against `node`.
    pub async fn node_operation_failed(&self, node: &RayoNode) -> Result<RayoNode> {
        let mut current = self
            .storage
            .get_rayo_node(&node.hostname)
            .await
            .unwrap_or_else(|| node.clone());
        current.consecutive_errors = current.consecutive_errors.saturating_add(1);

        if current.consecutive_errors > self.config.max_consecutive_errors {
            warn!(
                hostname = %current.hostname,
                errors = current.consecutive_errors,
                "Rayo node exceeded consecutive error limit, skipping it"
            );
        }
        self.storage.update_rayo_node(current).await
    }

    /// Record a successful operation against `node`, clearing its error count.
    pub async fn node_operation_succeeded(&self, node: &RayoNode) -> Result<RayoNode> {
        let mut current = self
            .storage
            .get_rayo_node(&node.hostname)
            .await
            .unwrap_or_else(|| node.clone());
        if current.consecutive_errors == 0 {
            return Ok(current);
        }
        current.consecutive_errors = 0;
        self.storage.update_rayo_node(current).await
    }

    /// Run `attempt` against a node of `platform`, moving on to another node
    /// after each failure.
    ///
    /// At most `max_retries` retries follow the first attempt and no node is
    /// tried twice. Each failure is recorded against its node. When every
    /// attempt fails the last failure is returned, or `NoNodeAvailable` if
    /// no node could be tried at all.
    pub async fn dispatch<T, E, F, Fut>(
        &self,
        platform: &str,
        max_retries: u32,
        mut attempt: F,
    ) -> Result<T>
    where
        F: FnMut(RayoNode) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let mut tried = HashSet::new();
        let mut last_error = None;

        for round in 0..=max_retries {
            let node = match self.select_excluding(platform, &tried).await {
                Ok(node) => node,
                Err(e) => return Err(last_error.unwrap_or(e)),
            };

            match attempt(node.clone()).await {
                Ok(value) => {
                    if let Err(e) = self.node_operation_succeeded(&node).await {
                        warn!(hostname = %node.hostname, error = %e, "could not reset node errors");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    warn!(
                        platform,
                        hostname = %node.hostname,
                        round,
                        error = %e,
                        "operation on Rayo node failed"
                    );
                    if let Err(store_err) = self.node_operation_failed(&node).await {
                        warn!(hostname = %node.hostname, error = %store_err, "could not record node failure");
                    }
                    last_error = Some(GatewayError::NodeOperation {
                        hostname: node.hostname.clone(),
                        reason: e.to_string(),
                    });
                    tried.insert(node.hostname);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| GatewayError::NoNodeAvailable(platform.to_string())))
    }

    /// Next bound resource of `bare_jid` as a full JID, in round robin.
    pub async fn pick_client_resource(&self, bare_jid: &str) -> Option<String> {
        let bare = jid::bare_jid(bare_jid);
        let mut resources = self.storage.get_resources_for_client(bare).await;
        if resources.is_empty() {
            return None;
        }
        resources.sort();

        let cursor = cursor_for(&self.client_cursors, bare).await;
        let idx = (cursor.fetch_add(1, Ordering::Relaxed) % resources.len() as u64) as usize;
        let resource = &resources[idx];
        if resource.is_empty() {
            Some(bare.to_string())
        } else {
            Some(jid::full_jid(bare, resource))
        }
    }
}

fn slots(node: &RayoNode) -> u64 {
    node.weight.max(1) as u64
}

async fn cursor_for(cursors: &Cursors, key: &str) -> Arc<AtomicU64> {
    if let Some(cursor) = cursors.read().await.get(key) {
        return cursor.clone();
    }
    cursors
        .write()
        .await
        .entry(key.to_string())
        .or_default()
        .clone()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rayo_store::InMemoryDatastore;

    use super::*;

    async fn balancer(nodes: Vec<RayoNode>) -> LoadBalancer {
        let storage = GatewayStorageService::new(Arc::new(InMemoryDatastore::new()), "staging");
        for node in nodes {
            storage.register_rayo_node(node).await.unwrap();
        }
        LoadBalancer::new(storage, LoadBalancerConfig::default())
    }

    async fn tally(lb: &LoadBalancer, platform: &str, n: usize) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for _ in 0..n {
            let node = lb.select_node(platform).await.unwrap();
            *counts.entry(node.hostname).or_insert(0) += 1;
        }
        counts
    }

    #[tokio::test]
    async fn test_round_robin_splits_evenly() {
        let lb = balancer(vec![
            RayoNode::new("a.example", "10.0.0.1", ["staging"]),
            RayoNode::new("b.example", "10.0.0.2", ["staging"]),
        ])
        .await;

        let counts = tally(&lb, "staging", 10).await;
        assert_eq!(counts["a.example"], 5);
        assert_eq!(counts["b.example"], 5);
    }

    #[tokio::test]
    async fn test_weight_sets_share() {
        let lb = balancer(vec![
            RayoNode::new("a.example", "10.0.0.1", ["staging"]).with_weight(3),
            RayoNode::new("b.example", "10.0.0.2", ["staging"]).with_weight(1),
            RayoNode::new("c.example", "10.0.0.3", ["staging"]).with_weight(0),
        ])
        .await;

        let counts = tally(&lb, "staging", 50).await;
        assert_eq!(counts["a.example"], 30);
        assert_eq!(counts["b.example"], 10);
        assert_eq!(counts["c.example"], 10);
    }

    #[tokio::test]
    async fn test_lowest_priority_class_wins() {
        let lb = balancer(vec![
            RayoNode::new("a.example", "10.0.0.1", ["staging"]).with_priority(2),
            RayoNode::new("b.example", "10.0.0.2", ["staging"]).with_priority(1),
        ])
        .await;

        let counts = tally(&lb, "staging", 4).await;
        assert_eq!(counts.get("b.example"), Some(&4));
        assert!(!counts.contains_key("a.example"));
    }

    #[tokio::test]
    async fn test_unhealthy_nodes_are_skipped() {
        let mut failing = RayoNode::new("a.example", "10.0.0.1", ["staging"]);
        failing.consecutive_errors = DEFAULT_MAX_CONSECUTIVE_ERRORS + 1;
        let mut banned = RayoNode::new("b.example", "10.0.0.2", ["staging"]);
        banned.blacklisted = true;
        let lb = balancer(vec![failing, banned]).await;

        let err = lb.select_node("staging").await.unwrap_err();
        assert!(matches!(err, GatewayError::NoNodeAvailable(ref p) if p == "staging"));
        assert!(matches!(
            lb.select_node("unknown").await,
            Err(GatewayError::NoNodeAvailable(_))
        ));
    }

    #[tokio::test]
    async fn test_failure_counter_round_trip() {
        let node = RayoNode::new("a.example", "10.0.0.1", ["staging"]);
        let lb = balancer(vec![node.clone()]).await;

        lb.node_operation_failed(&node).await.unwrap();
        let after = lb.node_operation_failed(&node).await.unwrap();
        assert_eq!(after.consecutive_errors, 2);

        let reset = lb.node_operation_succeeded(&node).await.unwrap();
        assert_eq!(reset.consecutive_errors, 0);
    }

    #[tokio::test]
    async fn test_pick_client_resource_rotates() {
        let lb = balancer(vec![]).await;
        assert!(lb.pick_client_resource("app@apps.example").await.is_none());

        lb.storage
            .register_client_resource("app@apps.example/r1")
            .await
            .unwrap();
        lb.storage
            .register_client_resource("app@apps.example/r2")
            .await
            .unwrap();

        let picks: Vec<_> = [
            lb.pick_client_resource("app@apps.example").await,
            lb.pick_client_resource("app@apps.example").await,
            lb.pick_client_resource("app@apps.example").await,
        ]
        .into_iter()
        .flatten()
        .collect();
        assert_eq!(
            picks,
            vec![
                "app@apps.example/r1",
                "app@apps.example/r2",
                "app@apps.example/r1"
            ]
        );
    }
}
