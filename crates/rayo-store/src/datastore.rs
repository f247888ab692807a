//! The directory contract shared by every backend.
//!
//! Write operations surface integrity errors ([`StoreError::AlreadyExists`],
//! [`StoreError::NotFound`], [`StoreError::NodeNotFound`]) to the caller.
//! Read operations never fail because something is absent: they return
//! `None` or an empty vector.
//!
//! [`StoreError::AlreadyExists`]: crate::StoreError::AlreadyExists
//! [`StoreError::NotFound`]: crate::StoreError::NotFound
//! [`StoreError::NodeNotFound`]: crate::StoreError::NodeNotFound

use async_trait::async_trait;

use rayo_shared::{Application, GatewayCall, GatewayClient, RayoNode};

use crate::error::Result;

#[async_trait]
pub trait GatewayDatastore: Send + Sync {
    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Register a node. Fails if the hostname is already registered.
    async fn store_node(&self, node: RayoNode) -> Result<RayoNode>;

    /// Replace an existing node, re-deriving its ip and platform entries.
    async fn update_node(&self, node: RayoNode) -> Result<RayoNode>;

    /// Remove a node from every index it appears in.
    async fn remove_node(&self, hostname: &str) -> Result<RayoNode>;

    async fn get_node(&self, hostname: &str) -> Option<RayoNode>;

    /// Like [`get_node`](Self::get_node), but a backend failure is returned
    /// instead of being read as absence.
    async fn find_node(&self, hostname: &str) -> Result<Option<RayoNode>> {
        Ok(self.get_node(hostname).await)
    }

    async fn get_node_for_ip_address(&self, ip: &str) -> Option<RayoNode>;

    /// Nodes registered for a platform; empty for an unknown platform.
    async fn get_rayo_nodes_for_platform(&self, platform: &str) -> Vec<RayoNode>;

    /// Every platform with at least one registered node.
    async fn get_platforms(&self) -> Vec<String>;

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Register a call. Its node must already be registered.
    async fn store_call(&self, call: GatewayCall) -> Result<GatewayCall>;

    async fn remove_call(&self, call_id: &str) -> Result<GatewayCall>;

    async fn get_call(&self, call_id: &str) -> Option<GatewayCall>;

    /// Hostname of the node hosting a call.
    async fn get_node_for_call(&self, call_id: &str) -> Option<String> {
        self.get_call(call_id).await.map(|call| call.node_jid)
    }

    /// Ids of every active call.
    async fn get_calls(&self) -> Vec<String>;

    async fn get_calls_for_client(&self, jid: &str) -> Vec<String>;

    async fn get_calls_for_node(&self, hostname: &str) -> Vec<String>;

    // ------------------------------------------------------------------
    // Clients
    // ------------------------------------------------------------------

    async fn store_client(&self, client: GatewayClient) -> Result<GatewayClient>;

    async fn remove_client(&self, jid: &str) -> Result<GatewayClient>;

    async fn get_client(&self, jid: &str) -> Option<GatewayClient>;

    /// Resources currently bound for a bare JID.
    async fn get_client_resources(&self, bare_jid: &str) -> Vec<String>;

    /// Bare JIDs with at least one bound resource.
    async fn get_clients(&self) -> Vec<String>;

    // ------------------------------------------------------------------
    // Applications and addresses
    // ------------------------------------------------------------------

    /// Create an application. Fails if it already exists.
    async fn store_application(&self, application: Application) -> Result<Application>;

    async fn get_application(&self, bare_jid: &str) -> Option<Application>;

    /// Remove an application together with every address bound to it.
    async fn remove_application(&self, bare_jid: &str) -> Result<Application>;

    async fn store_address(&self, address: &str, app_jid: &str) -> Result<()> {
        self.store_addresses(&[address.to_string()], app_jid).await
    }

    /// Bind addresses to an existing application.
    async fn store_addresses(&self, addresses: &[String], app_jid: &str) -> Result<()>;

    /// Unbind one address. Unknown addresses are ignored.
    async fn remove_address(&self, address: &str) -> Result<()>;

    async fn get_application_for_address(&self, address: &str) -> Option<Application>;

    async fn get_addresses_for_application(&self, app_jid: &str) -> Vec<String>;
}
