use thiserror::Error;

/// Errors produced while parsing an addressable identity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JidError {
    #[error("JID is empty")]
    Empty,

    #[error("JID [{0}] has an empty domain")]
    EmptyDomain(String),

    #[error("JID [{0}] has more than one node separator")]
    ExtraNodeSeparator(String),

    #[error("JID [{0}] has an empty node part")]
    EmptyNode(String),

    #[error("JID [{0}] has an empty resource")]
    EmptyResource(String),
}
