//! Addressable identities.
//!
//! Every key the directory stores is a JID-shaped string: an optional node
//! part, a domain and an optional resource (`node@domain/resource`). The free
//! functions below work on raw strings and never fail, which is what the
//! store needs for map keys. [`Jid`] is the validated form used at the
//! edges.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{NODE_SEPARATOR, RESOURCE_SEPARATOR};
use crate::error::JidError;

/// Strip the resource, if any.
///
/// `alice@example.com/phone` becomes `alice@example.com`.
pub fn bare_jid(jid: &str) -> &str {
    match jid.find(RESOURCE_SEPARATOR) {
        Some(idx) => &jid[..idx],
        None => jid,
    }
}

/// The resource suffix, or `None` for a bare JID.
pub fn resource(jid: &str) -> Option<&str> {
    jid.find(RESOURCE_SEPARATOR)
        .map(|idx| &jid[idx + 1..])
        .filter(|r| !r.is_empty())
}

/// The domain of a JID.
pub fn domain(jid: &str) -> &str {
    let bare = bare_jid(jid);
    match bare.find(NODE_SEPARATOR) {
        Some(idx) => &bare[idx + 1..],
        None => bare,
    }
}

/// The node part (before `@`), if any.
pub fn node_part(jid: &str) -> Option<&str> {
    let bare = bare_jid(jid);
    bare.find(NODE_SEPARATOR).map(|idx| &bare[..idx])
}

/// Compose `bare/resource`.
pub fn full_jid(bare: &str, resource: &str) -> String {
    format!("{bare}{RESOURCE_SEPARATOR}{resource}")
}

/// A parsed, validated JID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jid {
    node: Option<String>,
    domain: String,
    resource: Option<String>,
}

impl Jid {
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// The same identity without its resource.
    pub fn to_bare(&self) -> Jid {
        Jid {
            node: self.node.clone(),
            domain: self.domain.clone(),
            resource: None,
        }
    }

    /// Attach (or replace) a resource.
    pub fn with_resource(&self, resource: impl Into<String>) -> Jid {
        Jid {
            node: self.node.clone(),
            domain: self.domain.clone(),
            resource: Some(resource.into()),
        }
    }

    pub fn is_bare(&self) -> bool {
        self.resource.is_none()
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(JidError::Empty);
        }

        let (bare, resource) = match s.split_once(RESOURCE_SEPARATOR) {
            Some((_, "")) => return Err(JidError::EmptyResource(s.to_string())),
            Some((bare, res)) => (bare, Some(res.to_string())),
            None => (s, None),
        };

        let (node, domain) = match bare.split_once(NODE_SEPARATOR) {
            Some(("", _)) => return Err(JidError::EmptyNode(s.to_string())),
            Some((node, domain)) => (Some(node.to_string()), domain),
            None => (None, bare),
        };

        if domain.is_empty() {
            return Err(JidError::EmptyDomain(s.to_string()));
        }
        if domain.contains(NODE_SEPARATOR) {
            return Err(JidError::ExtraNodeSeparator(s.to_string()));
        }

        Ok(Jid {
            node,
            domain: domain.to_string(),
            resource,
        })
    }
}

impl TryFrom<String> for Jid {
    type Error = JidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> Self {
        jid.to_string()
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(node) = &self.node {
            write!(f, "{node}{NODE_SEPARATOR}")?;
        }
        write!(f, "{}", self.domain)?;
        if let Some(resource) = &self.resource {
            write!(f, "{RESOURCE_SEPARATOR}{resource}")?;
        }
        Ok(())
    }
}
