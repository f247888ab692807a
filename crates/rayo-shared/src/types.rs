//! Directory entity models.
//!
//! None of these records owns another: the store owns all of them and
//! checks references when they are written.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::jid;

// ---------------------------------------------------------------------------
// Rayo node
// ---------------------------------------------------------------------------

/// A media-processing node calls can be routed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RayoNode {
    /// Primary key.
    pub hostname: String,
    /// Unique across all nodes.
    pub ip_address: String,
    /// Platforms this node serves.
    pub platforms: BTreeSet<String>,
    /// Lower values are preferred.
    pub priority: i32,
    /// Relative capacity inside a priority class.
    pub weight: i32,
    /// Failures observed since the last success.
    pub consecutive_errors: u32,
    pub blacklisted: bool,
}

impl RayoNode {
    pub fn new<I, S>(hostname: impl Into<String>, ip_address: impl Into<String>, platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hostname: hostname.into(),
            ip_address: ip_address.into(),
            platforms: platforms.into_iter().map(Into::into).collect(),
            priority: 1,
            weight: 1,
            consecutive_errors: 0,
            blacklisted: false,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    pub fn serves(&self, platform: &str) -> bool {
        self.platforms.contains(platform)
    }

    /// Whether selection may route new calls here.
    pub fn is_available(&self, max_consecutive_errors: u32) -> bool {
        !self.blacklisted && self.consecutive_errors <= max_consecutive_errors
    }
}

impl fmt::Display for RayoNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) platforms={:?} priority={} weight={} errors={} blacklisted={}",
            self.hostname,
            self.ip_address,
            self.platforms,
            self.priority,
            self.weight,
            self.consecutive_errors,
            self.blacklisted
        )
    }
}

// ---------------------------------------------------------------------------
// Call
// ---------------------------------------------------------------------------

/// An active call, bound to one client and hosted by one node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GatewayCall {
    pub call_id: String,
    pub client_jid: String,
    /// Hostname of the hosting node.
    pub node_jid: String,
}

impl GatewayCall {
    pub fn new(
        call_id: impl Into<String>,
        client_jid: impl Into<String>,
        node_jid: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            client_jid: client_jid.into(),
            node_jid: node_jid.into(),
        }
    }
}

impl fmt::Display for GatewayCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [client={} node={}]", self.call_id, self.client_jid, self.node_jid)
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A connected client session, addressed by its full JID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayClient {
    /// Full JID, primary key.
    pub jid: String,
    pub bare_jid: String,
    /// Empty when the client bound without a resource.
    pub resource: String,
    pub platform: String,
}

impl GatewayClient {
    pub fn new(jid: impl Into<String>, platform: impl Into<String>) -> Self {
        let jid = jid.into();
        let bare_jid = jid::bare_jid(&jid).to_string();
        let resource = jid::resource(&jid).unwrap_or_default().to_string();
        Self {
            jid,
            bare_jid,
            resource,
            platform: platform.into(),
        }
    }
}

impl fmt::Display for GatewayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [platform={}]", self.jid, self.platform)
    }
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// A provisioned application, keyed by its own binding address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    /// Primary key.
    pub bare_jid: String,
    pub app_id: String,
    pub platform: String,
    pub name: String,
    pub account_id: String,
    pub permissions: String,
}

impl Application {
    /// An application whose id is its binding address.
    pub fn new(bare_jid: impl Into<String>, platform: impl Into<String>) -> Self {
        let bare_jid = bare_jid.into();
        Self {
            app_id: bare_jid.clone(),
            bare_jid,
            platform: platform.into(),
            name: String::new(),
            account_id: String::new(),
            permissions: String::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = account_id.into();
        self
    }

    pub fn with_permissions(mut self, permissions: impl Into<String>) -> Self {
        self.permissions = permissions.into();
        self
    }
}

impl fmt::Display for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [app={} platform={} account={}]",
            self.bare_jid, self.app_id, self.platform, self.account_id
        )
    }
}
