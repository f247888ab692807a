//! [`GatewayDatastore`] over a wide-column cluster.
//!
//! Table layout (row key → columns):
//!
//! | table          | row key     | columns                                        |
//! |----------------|-------------|------------------------------------------------|
//! | `nodes`        | hostname    | ip, priority, weight, consecutive-errors, blacklisted, platforms |
//! | `platforms`    | platform    | one column per hostname                        |
//! | `ips`          | ip address  | node = hostname                                |
//! | `calls`        | call id     | jid, node                                      |
//! | `client_calls` | client jid  | one column per call id                         |
//! | `node_calls`   | hostname    | one column per call id                         |
//! | `applications` | bare jid    | appId, platformId, name, accountId, permissions |
//! | `addresses`    | address     | application jid = application jid              |
//! | `clients`      | bare jid    | resource = platform                            |

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, error, info};

use rayo_shared::{jid, Application, GatewayCall, GatewayClient, RayoNode};

use super::column::{
    Batch, Column, ColumnPredicate, ColumnStore, ColumnStoreError, Consistency, KeyRange,
};
use super::schema::{
    ADDRESSES, APPLICATIONS, CALLS, CLIENTS, CLIENT_CALLS, IPS, NODES, NODE_CALLS, PLATFORMS,
};
use super::ReplicatedConfig;
use crate::datastore::GatewayDatastore;
use crate::error::{Entity, Result, StoreError};

/// Rows fetched per range-scan request.
pub const PAGE_SIZE: usize = 100;

const CONSISTENCY: Consistency = Consistency::One;

pub struct ReplicatedDatastore {
    store: Arc<dyn ColumnStore>,
    keyspace: String,
}

/// Log a backend failure with its context and turn it into a
/// [`StoreError::DatastoreFailure`].
fn failure(context: String) -> impl FnOnce(ColumnStoreError) -> StoreError {
    move |e| {
        error!(error = %e, "{context}");
        StoreError::DatastoreFailure(format!("{context}: {e}"))
    }
}

fn column<'a>(columns: &'a [Column], name: &str) -> Option<&'a str> {
    columns
        .iter()
        .find(|c| c.name == name)
        .map(|c| c.value.as_str())
}

fn parse_column<T: FromStr>(columns: &[Column], name: &str) -> Option<T> {
    column(columns, name).and_then(|v| v.parse().ok())
}

fn build_node(hostname: &str, columns: &[Column]) -> Option<RayoNode> {
    if columns.is_empty() {
        return None;
    }
    Some(RayoNode {
        hostname: hostname.to_string(),
        ip_address: column(columns, "ip").unwrap_or_default().to_string(),
        platforms: column(columns, "platforms")
            .unwrap_or_default()
            .split(',')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
        priority: parse_column(columns, "priority").unwrap_or(1),
        weight: parse_column(columns, "weight").unwrap_or(1),
        consecutive_errors: parse_column(columns, "consecutive-errors").unwrap_or(0),
        blacklisted: column(columns, "blacklisted") == Some("true"),
    })
}

fn build_call(call_id: &str, columns: &[Column]) -> Option<GatewayCall> {
    if columns.is_empty() {
        return None;
    }
    Some(GatewayCall::new(
        call_id,
        column(columns, "jid").unwrap_or_default(),
        column(columns, "node").unwrap_or_default(),
    ))
}

fn build_application(bare_jid: &str, columns: &[Column]) -> Option<Application> {
    if columns.is_empty() {
        return None;
    }
    let field = |name: &str| column(columns, name).unwrap_or_default().to_string();
    Some(Application {
        bare_jid: bare_jid.to_string(),
        app_id: field("appId"),
        platform: field("platformId"),
        name: field("name"),
        account_id: field("accountId"),
        permissions: field("permissions"),
    })
}

fn write_node(batch: &mut Batch, node: &RayoNode) {
    let platforms: Vec<&str> = node.platforms.iter().map(String::as_str).collect();
    batch
        .insert(NODES, &node.hostname, "ip", node.ip_address.as_str())
        .insert(NODES, &node.hostname, "priority", node.priority.to_string())
        .insert(NODES, &node.hostname, "weight", node.weight.to_string())
        .insert(
            NODES,
            &node.hostname,
            "consecutive-errors",
            node.consecutive_errors.to_string(),
        )
        .insert(NODES, &node.hostname, "blacklisted", node.blacklisted.to_string())
        .insert(NODES, &node.hostname, "platforms", platforms.join(","))
        .insert(IPS, &node.ip_address, "node", node.hostname.as_str());
    for platform in &node.platforms {
        batch.insert(PLATFORMS, platform, &node.hostname, node.hostname.as_str());
    }
}

impl ReplicatedDatastore {
    /// Connect to the keyspace, creating or repairing its schema first.
    ///
    /// Fails when no cluster answers at the configured contact point. The
    /// schema is rebuilt from scratch when `recreate_schema` is set or it
    /// does not exist yet; an existing schema missing tables gets only the
    /// missing ones.
    pub async fn init(store: Arc<dyn ColumnStore>, config: &ReplicatedConfig) -> Result<Self> {
        let contact_point = config.contact_point();
        info!(
            %contact_point,
            keyspace = %config.keyspace,
            recreate = config.recreate_schema,
            "initializing replicated datastore"
        );
        store
            .connect(&config.host, config.port)
            .await
            .map_err(failure(format!("Could not reach cluster at [{contact_point}]")))?;
        let handler = config.schema_handler();
        let keyspace = config.keyspace.clone();

        if config.recreate_schema || !handler.schema_exists(store.as_ref(), &keyspace).await {
            handler
                .build_schema(store.as_ref(), &keyspace, true)
                .await
                .map_err(failure(format!("Could not create schema [{keyspace}]")))?;
        } else if !handler.valid_schema(store.as_ref(), &keyspace).await {
            handler
                .build_schema(store.as_ref(), &keyspace, false)
                .await
                .map_err(failure(format!("Could not repair schema [{keyspace}]")))?;
        }

        Ok(Self { store, keyspace })
    }

    async fn execute(&self, batch: Batch, context: String) -> Result<()> {
        self.store
            .execute(&self.keyspace, batch, CONSISTENCY)
            .await
            .map_err(failure(context))
    }

    async fn fetch_row(&self, table: &str, row: &str) -> Result<Vec<Column>> {
        self.store
            .get_row(&self.keyspace, table, row, CONSISTENCY)
            .await
            .map_err(failure(format!("Could not read [{table}/{row}]")))
    }

    /// Read path helper: absence on failure, after logging it.
    async fn read_row(&self, table: &str, row: &str) -> Vec<Column> {
        self.fetch_row(table, row).await.unwrap_or_default()
    }

    async fn column_names(&self, table: &str, row: &str) -> Vec<String> {
        self.read_row(table, row)
            .await
            .into_iter()
            .map(|c| c.name)
            .collect()
    }

    async fn fetch_node(&self, hostname: &str) -> Result<Option<RayoNode>> {
        Ok(build_node(hostname, &self.fetch_row(NODES, hostname).await?))
    }

    async fn fetch_call(&self, call_id: &str) -> Result<Option<GatewayCall>> {
        Ok(build_call(call_id, &self.fetch_row(CALLS, call_id).await?))
    }

    async fn fetch_application(&self, bare_jid: &str) -> Result<Option<Application>> {
        Ok(build_application(bare_jid, &self.fetch_row(APPLICATIONS, bare_jid).await?))
    }

    /// Fails if `ip` is already mapped to a node other than `hostname`.
    async fn check_ip_free(&self, ip: &str, hostname: &str) -> Result<()> {
        let columns = self.fetch_row(IPS, ip).await?;
        match column(&columns, "node") {
            Some(owner) if owner != hostname => Err(StoreError::already_exists(Entity::Node, ip)),
            _ => Ok(()),
        }
    }

    /// Keys of every row in `table` that has at least one column matching
    /// `predicate`, fetched `PAGE_SIZE` rows at a time.
    async fn row_keys(&self, table: &str, predicate: ColumnPredicate) -> Vec<String> {
        let mut keys = Vec::new();
        let mut start = String::new();
        let mut last: Option<String> = None;

        loop {
            let range = KeyRange {
                start: start.clone(),
                limit: PAGE_SIZE,
            };
            let page = match self
                .store
                .get_range(&self.keyspace, table, range, &predicate, CONSISTENCY)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    error!(error = %e, table, "range scan failed");
                    break;
                }
            };
            let fetched = page.len();

            for row in page {
                // The page starts at the previous page's last key.
                if last.as_deref() == Some(row.key.as_str()) {
                    continue;
                }
                if !row.columns.is_empty() {
                    keys.push(row.key.clone());
                }
                last = Some(row.key);
            }

            if fetched < PAGE_SIZE {
                break;
            }
            match &last {
                Some(key) => start = key.clone(),
                None => break,
            }
        }
        keys
    }
}

#[async_trait]
impl GatewayDatastore for ReplicatedDatastore {
    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    async fn store_node(&self, node: RayoNode) -> Result<RayoNode> {
        debug!(node = %node, "storing node");
        if self.fetch_node(&node.hostname).await?.is_some() {
            error!(node = %node, "node already exists");
            return Err(StoreError::already_exists(Entity::Node, &node.hostname));
        }
        self.check_ip_free(&node.ip_address, &node.hostname).await?;

        let mut batch = Batch::new();
        write_node(&mut batch, &node);
        self.execute(batch, format!("Could not create node [{}]", node.hostname))
            .await?;
        debug!(hostname = %node.hostname, "node stored");
        Ok(node)
    }

    async fn update_node(&self, node: RayoNode) -> Result<RayoNode> {
        debug!(node = %node, "updating node");
        let Some(previous) = self.fetch_node(&node.hostname).await? else {
            error!(node = %node, "node does not exist");
            return Err(StoreError::not_found(Entity::Node, &node.hostname));
        };
        self.check_ip_free(&node.ip_address, &node.hostname).await?;

        let mut batch = Batch::new();
        if previous.ip_address != node.ip_address {
            batch.delete_row(IPS, &previous.ip_address);
        }
        for platform in previous.platforms.difference(&node.platforms) {
            batch.delete_column(PLATFORMS, platform, &node.hostname);
        }
        write_node(&mut batch, &node);
        self.execute(batch, format!("Could not update node [{}]", node.hostname))
            .await?;
        Ok(node)
    }

    async fn remove_node(&self, hostname: &str) -> Result<RayoNode> {
        debug!(hostname, "removing node");
        let Some(node) = self.fetch_node(hostname).await? else {
            error!(hostname, "node not found");
            return Err(StoreError::not_found(Entity::Node, hostname));
        };

        let mut batch = Batch::new();
        batch.delete_row(IPS, &node.ip_address);
        for platform in &node.platforms {
            batch.delete_column(PLATFORMS, platform, hostname);
        }
        batch.delete_row(NODES, hostname);
        self.execute(batch, format!("Could not remove node [{hostname}]"))
            .await?;
        debug!(hostname, "node removed");
        Ok(node)
    }

    async fn get_node(&self, hostname: &str) -> Option<RayoNode> {
        build_node(hostname, &self.read_row(NODES, hostname).await)
    }

    async fn find_node(&self, hostname: &str) -> Result<Option<RayoNode>> {
        self.fetch_node(hostname).await
    }

    async fn get_node_for_ip_address(&self, ip: &str) -> Option<RayoNode> {
        debug!(ip, "finding node for ip address");
        let columns = self.read_row(IPS, ip).await;
        let hostname = column(&columns, "node")?;
        self.get_node(hostname).await
    }

    async fn get_rayo_nodes_for_platform(&self, platform: &str) -> Vec<RayoNode> {
        debug!(platform, "finding nodes for platform");
        let hostnames = self.column_names(PLATFORMS, platform).await;
        join_all(hostnames.iter().map(|h| self.get_node(h)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn get_platforms(&self) -> Vec<String> {
        self.row_keys(PLATFORMS, ColumnPredicate::All { limit: 1 })
            .await
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    async fn store_call(&self, call: GatewayCall) -> Result<GatewayCall> {
        debug!(call = %call, "storing call");
        if self.fetch_node(&call.node_jid).await?.is_none() {
            debug!(call = %call, "node not found for call");
            return Err(StoreError::NodeNotFound(call.node_jid.clone()));
        }

        let mut batch = Batch::new();
        if let Some(previous) = self.fetch_call(&call.call_id).await? {
            batch
                .delete_column(CLIENT_CALLS, &previous.client_jid, &previous.call_id)
                .delete_column(NODE_CALLS, &previous.node_jid, &previous.call_id);
        }
        batch
            .insert(CALLS, &call.call_id, "jid", call.client_jid.as_str())
            .insert(CALLS, &call.call_id, "node", call.node_jid.as_str())
            .insert(CLIENT_CALLS, &call.client_jid, &call.call_id, call.call_id.as_str())
            .insert(NODE_CALLS, &call.node_jid, &call.call_id, call.call_id.as_str());
        self.execute(batch, format!("Could not store call [{}]", call.call_id))
            .await?;
        Ok(call)
    }

    async fn remove_call(&self, call_id: &str) -> Result<GatewayCall> {
        debug!(call_id, "removing call");
        let Some(call) = self.fetch_call(call_id).await? else {
            return Err(StoreError::not_found(Entity::Call, call_id));
        };

        let mut batch = Batch::new();
        batch
            .delete_column(CLIENT_CALLS, &call.client_jid, call_id)
            .delete_column(NODE_CALLS, &call.node_jid, call_id)
            .delete_row(CALLS, call_id);
        self.execute(batch, format!("Could not remove call [{call_id}]"))
            .await?;
        Ok(call)
    }

    async fn get_call(&self, call_id: &str) -> Option<GatewayCall> {
        build_call(call_id, &self.read_row(CALLS, call_id).await)
    }

    async fn get_calls(&self) -> Vec<String> {
        self.row_keys(CALLS, ColumnPredicate::All { limit: 1 }).await
    }

    async fn get_calls_for_client(&self, jid: &str) -> Vec<String> {
        self.column_names(CLIENT_CALLS, jid).await
    }

    async fn get_calls_for_node(&self, hostname: &str) -> Vec<String> {
        self.column_names(NODE_CALLS, hostname).await
    }

    // ------------------------------------------------------------------
    // Clients
    // ------------------------------------------------------------------

    async fn store_client(&self, client: GatewayClient) -> Result<GatewayClient> {
        debug!(client = %client, "storing client");
        let mut batch = Batch::new();
        batch.insert(
            CLIENTS,
            &client.bare_jid,
            &client.resource,
            client.platform.as_str(),
        );
        self.execute(batch, format!("Could not store client [{}]", client.jid))
            .await?;
        Ok(client)
    }

    async fn remove_client(&self, jid: &str) -> Result<GatewayClient> {
        debug!(jid, "removing client");
        let bare = jid::bare_jid(jid);
        let resource = jid::resource(jid).unwrap_or_default();
        let columns = self.fetch_row(CLIENTS, bare).await?;
        let Some(platform) = column(&columns, resource) else {
            return Err(StoreError::not_found(Entity::Client, jid));
        };
        let client = GatewayClient::new(jid, platform);

        let mut batch = Batch::new();
        if columns.len() == 1 {
            batch.delete_row(CLIENTS, bare);
        } else {
            batch.delete_column(CLIENTS, bare, resource);
        }
        self.execute(batch, format!("Could not remove client [{jid}]"))
            .await?;
        Ok(client)
    }

    async fn get_client(&self, jid: &str) -> Option<GatewayClient> {
        let columns = self.read_row(CLIENTS, jid::bare_jid(jid)).await;
        let platform = column(&columns, jid::resource(jid).unwrap_or_default())?;
        Some(GatewayClient::new(jid, platform))
    }

    async fn get_client_resources(&self, bare_jid: &str) -> Vec<String> {
        self.column_names(CLIENTS, jid::bare_jid(bare_jid)).await
    }

    async fn get_clients(&self) -> Vec<String> {
        self.row_keys(CLIENTS, ColumnPredicate::All { limit: 1 }).await
    }

    // ------------------------------------------------------------------
    // Applications and addresses
    // ------------------------------------------------------------------

    async fn store_application(&self, application: Application) -> Result<Application> {
        debug!(application = %application, "storing application");
        if self.fetch_application(&application.bare_jid).await?.is_some() {
            error!(application = %application, "application already exists");
            return Err(StoreError::already_exists(
                Entity::Application,
                &application.bare_jid,
            ));
        }

        let row = application.bare_jid.as_str();
        let mut batch = Batch::new();
        batch
            .insert(APPLICATIONS, row, "appId", application.app_id.as_str())
            .insert(APPLICATIONS, row, "platformId", application.platform.as_str())
            .insert(APPLICATIONS, row, "name", application.name.as_str())
            .insert(APPLICATIONS, row, "accountId", application.account_id.as_str())
            .insert(APPLICATIONS, row, "permissions", application.permissions.as_str());
        self.execute(batch, format!("Could not create application [{row}]"))
            .await?;
        Ok(application)
    }

    async fn get_application(&self, bare_jid: &str) -> Option<Application> {
        build_application(bare_jid, &self.read_row(APPLICATIONS, bare_jid).await)
    }

    async fn remove_application(&self, bare_jid: &str) -> Result<Application> {
        debug!(bare_jid, "removing application");
        let Some(application) = self.fetch_application(bare_jid).await? else {
            debug!(bare_jid, "no application found");
            return Err(StoreError::not_found(Entity::Application, bare_jid));
        };

        let mut batch = Batch::new();
        batch.delete_row(APPLICATIONS, bare_jid);
        for address in self.get_addresses_for_application(bare_jid).await {
            batch.delete_row(ADDRESSES, &address);
        }
        self.execute(batch, format!("Could not remove application [{bare_jid}]"))
            .await?;
        Ok(application)
    }

    async fn store_addresses(&self, addresses: &[String], app_jid: &str) -> Result<()> {
        debug!(?addresses, app_jid, "storing addresses");
        if self.fetch_application(app_jid).await?.is_none() {
            return Err(StoreError::not_found(Entity::Application, app_jid));
        }

        let mut batch = Batch::new();
        for address in addresses.iter().collect::<BTreeSet<_>>() {
            // An address belongs to one application at a time.
            for bound in self.fetch_row(ADDRESSES, address).await? {
                if bound.name != app_jid {
                    batch.delete_column(ADDRESSES, address, &bound.name);
                }
            }
            batch.insert(ADDRESSES, address, app_jid, app_jid);
        }
        self.execute(
            batch,
            format!("Could not add addresses {addresses:?} to application [{app_jid}]"),
        )
        .await
    }

    async fn remove_address(&self, address: &str) -> Result<()> {
        debug!(address, "removing address");
        if self.fetch_row(ADDRESSES, address).await?.is_empty() {
            return Ok(());
        }
        let mut batch = Batch::new();
        batch.delete_row(ADDRESSES, address);
        self.execute(batch, format!("Could not remove address [{address}]"))
            .await
    }

    async fn get_application_for_address(&self, address: &str) -> Option<Application> {
        let columns = self.read_row(ADDRESSES, address).await;
        let app_jid = columns.first()?.value.clone();
        self.get_application(&app_jid).await
    }

    async fn get_addresses_for_application(&self, app_jid: &str) -> Vec<String> {
        self.row_keys(ADDRESSES, ColumnPredicate::Names(vec![app_jid.to_string()]))
            .await
    }
}
