//! Gateway-facing facade over the directory store.
//!
//! Callers speak in gateway terms (register a node, bind a client
//! resource) and the facade turns those into datastore records. The only
//! policy it adds is picking a client's platform from its application.

use std::sync::Arc;

use tracing::{debug, info};

use rayo_shared::{jid, Application, GatewayCall, GatewayClient, Jid, RayoNode};
use rayo_store::GatewayDatastore;

use crate::error::Result;

#[derive(Clone)]
pub struct GatewayStorageService {
    store: Arc<dyn GatewayDatastore>,
    default_platform: String,
}

impl GatewayStorageService {
    pub fn new(store: Arc<dyn GatewayDatastore>, default_platform: impl Into<String>) -> Self {
        Self {
            store,
            default_platform: default_platform.into(),
        }
    }

    pub fn datastore(&self) -> &Arc<dyn GatewayDatastore> {
        &self.store
    }

    pub fn default_platform(&self) -> &str {
        &self.default_platform
    }

    // -- Nodes --

    /// Register a node, replacing its record if the hostname is known.
    pub async fn register_rayo_node(&self, node: RayoNode) -> Result<RayoNode> {
        let stored = if self.store.get_node(&node.hostname).await.is_some() {
            debug!(node = %node, "updating known Rayo node");
            self.store.update_node(node).await?
        } else {
            self.store.store_node(node).await?
        };
        info!(hostname = %stored.hostname, platforms = ?stored.platforms, "Rayo node registered");
        Ok(stored)
    }

    pub async fn unregister_rayo_node(&self, hostname: &str) -> Result<RayoNode> {
        let removed = self.store.remove_node(hostname).await?;
        info!(hostname, "Rayo node unregistered");
        Ok(removed)
    }

    pub async fn update_rayo_node(&self, node: RayoNode) -> Result<RayoNode> {
        Ok(self.store.update_node(node).await?)
    }

    pub async fn get_rayo_node(&self, hostname: &str) -> Option<RayoNode> {
        self.store.get_node(hostname).await
    }

    /// Fails instead of returning `None` when the store cannot be read.
    pub async fn find_rayo_node(&self, hostname: &str) -> Result<Option<RayoNode>> {
        Ok(self.store.find_node(hostname).await?)
    }

    pub async fn get_rayo_nodes(&self, platform: &str) -> Vec<RayoNode> {
        self.store.get_rayo_nodes_for_platform(platform).await
    }

    pub async fn get_rayo_node_for_ip(&self, ip: &str) -> Option<RayoNode> {
        self.store.get_node_for_ip_address(ip).await
    }

    pub async fn get_platforms(&self) -> Vec<String> {
        self.store.get_platforms().await
    }

    // -- Calls --

    pub async fn register_call(
        &self,
        call_id: &str,
        client_jid: &str,
        node_hostname: &str,
    ) -> Result<GatewayCall> {
        let call = self
            .store
            .store_call(GatewayCall::new(call_id, client_jid, node_hostname))
            .await?;
        debug!(call = %call, "call registered");
        Ok(call)
    }

    pub async fn unregister_call(&self, call_id: &str) -> Result<GatewayCall> {
        Ok(self.store.remove_call(call_id).await?)
    }

    pub async fn get_call(&self, call_id: &str) -> Option<GatewayCall> {
        self.store.get_call(call_id).await
    }

    /// The node hosting a call, if both are still registered.
    pub async fn get_rayo_node_for_call(&self, call_id: &str) -> Option<RayoNode> {
        let hostname = self.store.get_node_for_call(call_id).await?;
        self.store.get_node(&hostname).await
    }

    pub async fn get_calls_for_client(&self, jid: &str) -> Vec<String> {
        self.store.get_calls_for_client(jid).await
    }

    pub async fn get_calls_for_node(&self, hostname: &str) -> Vec<String> {
        self.store.get_calls_for_node(hostname).await
    }

    pub async fn get_calls(&self) -> Vec<String> {
        self.store.get_calls().await
    }

    // -- Clients --

    /// Bind a full JID. Its platform comes from the application registered
    /// under the bare JID, or the default platform when there is none.
    pub async fn register_client_resource(&self, jid: &str) -> Result<GatewayClient> {
        let parsed: Jid = jid.parse()?;
        let bare = parsed.to_bare().to_string();
        let platform = match self.store.get_application(&bare).await {
            Some(app) if !app.platform.is_empty() => app.platform,
            _ => self.default_platform.clone(),
        };
        let client = self
            .store
            .store_client(GatewayClient::new(parsed.to_string(), platform))
            .await?;
        debug!(client = %client, "client resource registered");
        Ok(client)
    }

    pub async fn unregister_client_resource(&self, jid: &str) -> Result<GatewayClient> {
        Ok(self.store.remove_client(jid).await?)
    }

    pub async fn get_resources_for_client(&self, bare_jid: &str) -> Vec<String> {
        self.store.get_client_resources(jid::bare_jid(bare_jid)).await
    }

    pub async fn get_clients(&self) -> Vec<String> {
        self.store.get_clients().await
    }

    /// Platform a bound client resource was registered on.
    pub async fn get_platform_for_client(&self, jid: &str) -> Option<String> {
        self.store.get_client(jid).await.map(|c| c.platform)
    }

    // -- Applications and addresses --

    pub async fn register_application(&self, application: Application) -> Result<Application> {
        let app = self.store.store_application(application).await?;
        info!(application = %app, "application registered");
        Ok(app)
    }

    pub async fn unregister_application(&self, bare_jid: &str) -> Result<Application> {
        let app = self.store.remove_application(bare_jid).await?;
        info!(bare_jid, "application unregistered");
        Ok(app)
    }

    pub async fn get_application(&self, bare_jid: &str) -> Option<Application> {
        self.store.get_application(bare_jid).await
    }

    pub async fn register_address(&self, address: &str, app_jid: &str) -> Result<()> {
        Ok(self.store.store_address(address, app_jid).await?)
    }

    pub async fn register_addresses(&self, addresses: &[String], app_jid: &str) -> Result<()> {
        Ok(self.store.store_addresses(addresses, app_jid).await?)
    }

    pub async fn unregister_address(&self, address: &str) -> Result<()> {
        Ok(self.store.remove_address(address).await?)
    }

    pub async fn get_application_for_address(&self, address: &str) -> Option<Application> {
        self.store.get_application_for_address(address).await
    }

    pub async fn get_addresses_for_application(&self, app_jid: &str) -> Vec<String> {
        self.store.get_addresses_for_application(app_jid).await
    }
}
