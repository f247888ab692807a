//! In-process backend.
//!
//! Maps guarded by three read/write locks, one per lock domain: nodes, calls,
//! and clients + applications + addresses (these three cross-reference each
//! other, so they share a lock). A writer holds the write lock for the whole
//! primary-map + secondary-index update, existence checks included, so a
//! reader never sees a record without its index entries or the reverse.
//!
//! This backend only works inside a single gateway process. It is the
//! reference behaviour the replicated backend is checked against.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use rayo_shared::{jid, Application, GatewayCall, GatewayClient, RayoNode};

use crate::datastore::GatewayDatastore;
use crate::error::{Entity, Result, StoreError};

#[derive(Default)]
struct NodeMaps {
    by_hostname: HashMap<String, RayoNode>,
    /// ip -> hostname
    by_ip: HashMap<String, String>,
    /// platform -> hostnames, in registration order
    by_platform: HashMap<String, Vec<String>>,
}

impl NodeMaps {
    fn index(&mut self, node: &RayoNode) {
        self.by_ip.insert(node.ip_address.clone(), node.hostname.clone());
        for platform in &node.platforms {
            let hostnames = self.by_platform.entry(platform.clone()).or_default();
            push_unique(hostnames, &node.hostname);
        }
    }

    fn unindex(&mut self, node: &RayoNode) {
        if self.by_ip.get(&node.ip_address) == Some(&node.hostname) {
            self.by_ip.remove(&node.ip_address);
        }
        for platform in &node.platforms {
            if let Some(hostnames) = self.by_platform.get_mut(platform) {
                hostnames.retain(|h| h != &node.hostname);
                if hostnames.is_empty() {
                    self.by_platform.remove(platform);
                }
            }
        }
    }

    /// Fails if `ip` already belongs to a node other than `hostname`.
    fn check_ip_free(&self, ip: &str, hostname: &str) -> Result<()> {
        match self.by_ip.get(ip) {
            Some(owner) if owner != hostname => Err(StoreError::already_exists(Entity::Node, ip)),
            _ => Ok(()),
        }
    }
}

#[derive(Default)]
struct CallMaps {
    calls: HashMap<String, GatewayCall>,
    by_client: HashMap<String, Vec<String>>,
    by_node: HashMap<String, Vec<String>>,
}

#[derive(Default)]
struct ApplicationMaps {
    clients: HashMap<String, GatewayClient>,
    /// bare jid -> resources
    resources: HashMap<String, Vec<String>>,
    applications: HashMap<String, Application>,
    /// address -> application jid
    addresses: HashMap<String, String>,
    /// application jid -> addresses
    app_addresses: HashMap<String, Vec<String>>,
}

impl ApplicationMaps {
    fn unbind_address(&mut self, address: &str) {
        if let Some(app_jid) = self.addresses.remove(address) {
            if let Some(addresses) = self.app_addresses.get_mut(&app_jid) {
                addresses.retain(|a| a != address);
                if addresses.is_empty() {
                    self.app_addresses.remove(&app_jid);
                }
            }
        }
    }
}

/// Map based [`GatewayDatastore`] for single-instance gateways.
#[derive(Default)]
pub struct InMemoryDatastore {
    nodes: RwLock<NodeMaps>,
    calls: RwLock<CallMaps>,
    applications: RwLock<ApplicationMaps>,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

fn detach(index: &mut HashMap<String, Vec<String>>, key: &str, value: &str) {
    if let Some(list) = index.get_mut(key) {
        list.retain(|v| v != value);
        if list.is_empty() {
            index.remove(key);
        }
    }
}

fn sorted<I: IntoIterator<Item = String>>(items: I) -> Vec<String> {
    let mut out: Vec<String> = items.into_iter().collect();
    out.sort();
    out
}

#[async_trait]
impl GatewayDatastore for InMemoryDatastore {
    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    async fn store_node(&self, node: RayoNode) -> Result<RayoNode> {
        debug!(node = %node, "storing node");
        let mut nodes = self.nodes.write().await;
        if nodes.by_hostname.contains_key(&node.hostname) {
            return Err(StoreError::already_exists(Entity::Node, &node.hostname));
        }
        nodes.check_ip_free(&node.ip_address, &node.hostname)?;

        nodes.index(&node);
        nodes.by_hostname.insert(node.hostname.clone(), node.clone());
        Ok(node)
    }

    async fn update_node(&self, node: RayoNode) -> Result<RayoNode> {
        debug!(node = %node, "updating node");
        let mut nodes = self.nodes.write().await;
        let Some(previous) = nodes.by_hostname.get(&node.hostname).cloned() else {
            return Err(StoreError::not_found(Entity::Node, &node.hostname));
        };
        nodes.check_ip_free(&node.ip_address, &node.hostname)?;

        // Platforms the node keeps stay at their position in the listing.
        if previous.ip_address != node.ip_address {
            nodes.by_ip.remove(&previous.ip_address);
        }
        for platform in previous.platforms.difference(&node.platforms) {
            detach(&mut nodes.by_platform, platform, &node.hostname);
        }
        nodes.index(&node);
        nodes.by_hostname.insert(node.hostname.clone(), node.clone());
        Ok(node)
    }

    async fn remove_node(&self, hostname: &str) -> Result<RayoNode> {
        debug!(hostname, "removing node");
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .by_hostname
            .remove(hostname)
            .ok_or_else(|| StoreError::not_found(Entity::Node, hostname))?;
        nodes.unindex(&node);
        Ok(node)
    }

    async fn get_node(&self, hostname: &str) -> Option<RayoNode> {
        self.nodes.read().await.by_hostname.get(hostname).cloned()
    }

    async fn get_node_for_ip_address(&self, ip: &str) -> Option<RayoNode> {
        let nodes = self.nodes.read().await;
        nodes
            .by_ip
            .get(ip)
            .and_then(|hostname| nodes.by_hostname.get(hostname))
            .cloned()
    }

    async fn get_rayo_nodes_for_platform(&self, platform: &str) -> Vec<RayoNode> {
        let nodes = self.nodes.read().await;
        nodes
            .by_platform
            .get(platform)
            .map(|hostnames| {
                hostnames
                    .iter()
                    .filter_map(|h| nodes.by_hostname.get(h).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn get_platforms(&self) -> Vec<String> {
        sorted(self.nodes.read().await.by_platform.keys().cloned())
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    async fn store_call(&self, call: GatewayCall) -> Result<GatewayCall> {
        debug!(call = %call, "storing call");
        // Lock order is always nodes before calls.
        let nodes = self.nodes.read().await;
        if !nodes.by_hostname.contains_key(&call.node_jid) {
            debug!(call = %call, "node not found for call");
            return Err(StoreError::NodeNotFound(call.node_jid.clone()));
        }

        let mut calls = self.calls.write().await;
        if let Some(previous) = calls.calls.remove(&call.call_id) {
            detach(&mut calls.by_client, &previous.client_jid, &previous.call_id);
            detach(&mut calls.by_node, &previous.node_jid, &previous.call_id);
        }
        push_unique(
            calls.by_client.entry(call.client_jid.clone()).or_default(),
            &call.call_id,
        );
        push_unique(
            calls.by_node.entry(call.node_jid.clone()).or_default(),
            &call.call_id,
        );
        calls.calls.insert(call.call_id.clone(), call.clone());
        Ok(call)
    }

    async fn remove_call(&self, call_id: &str) -> Result<GatewayCall> {
        debug!(call_id, "removing call");
        let mut calls = self.calls.write().await;
        let call = calls
            .calls
            .remove(call_id)
            .ok_or_else(|| StoreError::not_found(Entity::Call, call_id))?;
        detach(&mut calls.by_client, &call.client_jid, call_id);
        detach(&mut calls.by_node, &call.node_jid, call_id);
        Ok(call)
    }

    async fn get_call(&self, call_id: &str) -> Option<GatewayCall> {
        self.calls.read().await.calls.get(call_id).cloned()
    }

    async fn get_calls(&self) -> Vec<String> {
        sorted(self.calls.read().await.calls.keys().cloned())
    }

    async fn get_calls_for_client(&self, jid: &str) -> Vec<String> {
        self.calls.read().await.by_client.get(jid).cloned().unwrap_or_default()
    }

    async fn get_calls_for_node(&self, hostname: &str) -> Vec<String> {
        self.calls.read().await.by_node.get(hostname).cloned().unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Clients
    // ------------------------------------------------------------------

    async fn store_client(&self, client: GatewayClient) -> Result<GatewayClient> {
        debug!(client = %client, "storing client");
        let mut apps = self.applications.write().await;
        push_unique(
            apps.resources.entry(client.bare_jid.clone()).or_default(),
            &client.resource,
        );
        apps.clients.insert(client.jid.clone(), client.clone());
        Ok(client)
    }

    async fn remove_client(&self, jid: &str) -> Result<GatewayClient> {
        debug!(jid, "removing client");
        let mut apps = self.applications.write().await;
        let client = apps
            .clients
            .remove(jid)
            .ok_or_else(|| StoreError::not_found(Entity::Client, jid))?;
        detach(&mut apps.resources, &client.bare_jid, &client.resource);
        Ok(client)
    }

    async fn get_client(&self, jid: &str) -> Option<GatewayClient> {
        self.applications.read().await.clients.get(jid).cloned()
    }

    async fn get_client_resources(&self, bare_jid: &str) -> Vec<String> {
        self.applications
            .read()
            .await
            .resources
            .get(jid::bare_jid(bare_jid))
            .cloned()
            .unwrap_or_default()
    }

    async fn get_clients(&self) -> Vec<String> {
        sorted(self.applications.read().await.resources.keys().cloned())
    }

    // ------------------------------------------------------------------
    // Applications and addresses
    // ------------------------------------------------------------------

    async fn store_application(&self, application: Application) -> Result<Application> {
        debug!(application = %application, "storing application");
        let mut apps = self.applications.write().await;
        if apps.applications.contains_key(&application.bare_jid) {
            return Err(StoreError::already_exists(
                Entity::Application,
                &application.bare_jid,
            ));
        }
        apps.applications
            .insert(application.bare_jid.clone(), application.clone());
        Ok(application)
    }

    async fn get_application(&self, bare_jid: &str) -> Option<Application> {
        self.applications.read().await.applications.get(bare_jid).cloned()
    }

    async fn remove_application(&self, bare_jid: &str) -> Result<Application> {
        debug!(bare_jid, "removing application");
        let mut apps = self.applications.write().await;
        let application = apps
            .applications
            .remove(bare_jid)
            .ok_or_else(|| StoreError::not_found(Entity::Application, bare_jid))?;
        for address in apps.app_addresses.remove(bare_jid).unwrap_or_default() {
            apps.addresses.remove(&address);
        }
        Ok(application)
    }

    async fn store_addresses(&self, addresses: &[String], app_jid: &str) -> Result<()> {
        debug!(?addresses, app_jid, "storing addresses");
        let mut apps = self.applications.write().await;
        if !apps.applications.contains_key(app_jid) {
            return Err(StoreError::not_found(Entity::Application, app_jid));
        }
        for address in addresses {
            // An address belongs to one application at a time.
            apps.unbind_address(address);
            apps.addresses.insert(address.clone(), app_jid.to_string());
            push_unique(
                apps.app_addresses.entry(app_jid.to_string()).or_default(),
                address,
            );
        }
        Ok(())
    }

    async fn remove_address(&self, address: &str) -> Result<()> {
        debug!(address, "removing address");
        self.applications.write().await.unbind_address(address);
        Ok(())
    }

    async fn get_application_for_address(&self, address: &str) -> Option<Application> {
        let apps = self.applications.read().await;
        apps.addresses
            .get(address)
            .and_then(|app_jid| apps.applications.get(app_jid))
            .cloned()
    }

    async fn get_addresses_for_application(&self, app_jid: &str) -> Vec<String> {
        self.applications
            .read()
            .await
            .app_addresses
            .get(app_jid)
            .cloned()
            .unwrap_or_default()
    }
}
