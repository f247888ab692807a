//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the gateway starts with zero
//! configuration on the in-process backend.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use rayo_shared::constants::{
    DEFAULT_MAX_CONSECUTIVE_ERRORS, DEFAULT_MAX_DIAL_RETRIES, DEFAULT_PLATFORM,
};
use rayo_store::ReplicatedConfig;

/// Which directory backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatastoreKind {
    Memory,
    Replicated,
}

impl FromStr for DatastoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(DatastoreKind::Memory),
            "replicated" => Ok(DatastoreKind::Replicated),
            other => Err(format!("unknown datastore '{other}'")),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) admin API.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Admin API bearer token. Required to access /admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// Env: `DATASTORE` (`memory` or `replicated`)
    /// Default: `memory`
    pub datastore: DatastoreKind,

    /// Platform given to clients whose application names none.
    /// Env: `DEFAULT_PLATFORM`
    pub default_platform: String,

    /// Env: `MAX_DIAL_RETRIES`
    pub max_dial_retries: u32,

    /// Env: `MAX_CONSECUTIVE_ERRORS`
    pub max_consecutive_errors: u32,

    /// Replicated backend settings.
    /// Env: `STORE_HOST`, `STORE_PORT`, `STORE_KEYSPACE`,
    /// `STORE_RECREATE_SCHEMA`, `STORE_SCHEMA_WAIT_MS`, `STORE_WAIT_FOR_SYNC`
    pub store: ReplicatedConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            admin_token: None,
            datastore: DatastoreKind::Memory,
            default_platform: DEFAULT_PLATFORM.to_string(),
            max_dial_retries: DEFAULT_MAX_DIAL_RETRIES,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            store: ReplicatedConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key lookup. Invalid values are logged
    /// and the default is kept.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        parse_into(&lookup, "HTTP_ADDR", &mut config.http_addr);

        if let Some(token) = lookup("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        parse_into(&lookup, "DATASTORE", &mut config.datastore);

        if let Some(platform) = lookup("DEFAULT_PLATFORM") {
            if !platform.is_empty() {
                config.default_platform = platform;
            }
        }

        parse_into(&lookup, "MAX_DIAL_RETRIES", &mut config.max_dial_retries);
        parse_into(&lookup, "MAX_CONSECUTIVE_ERRORS", &mut config.max_consecutive_errors);

        // -- Replicated backend --

        if let Some(host) = lookup("STORE_HOST") {
            config.store.host = host;
        }
        parse_into(&lookup, "STORE_PORT", &mut config.store.port);
        if let Some(keyspace) = lookup("STORE_KEYSPACE") {
            config.store.keyspace = keyspace;
        }
        if let Some(val) = lookup("STORE_RECREATE_SCHEMA") {
            config.store.recreate_schema = parse_flag(&val);
        }
        let mut wait_ms = config.store.schema_wait.as_millis() as u64;
        parse_into(&lookup, "STORE_SCHEMA_WAIT_MS", &mut wait_ms);
        config.store.schema_wait = Duration::from_millis(wait_ms);
        if let Some(val) = lookup("STORE_WAIT_FOR_SYNC") {
            config.store.wait_for_sync = parse_flag(&val);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_into<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "Invalid setting, using default"),
    }
}

fn parse_flag(val: &str) -> bool {
    val != "false" && val != "0"
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> ServerConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.datastore, DatastoreKind::Memory);
        assert_eq!(config.default_platform, "staging");
        assert_eq!(config.max_dial_retries, 3);
        assert_eq!(config.max_consecutive_errors, 5);
        assert!(config.admin_token.is_none());
        assert_eq!(config.store.contact_point(), "localhost:9160");
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("ADMIN_TOKEN", "secret"),
            ("DATASTORE", "Replicated"),
            ("DEFAULT_PLATFORM", "production"),
            ("MAX_DIAL_RETRIES", "1"),
            ("STORE_HOST", "cluster.internal"),
            ("STORE_PORT", "9042"),
            ("STORE_KEYSPACE", "gateway"),
            ("STORE_RECREATE_SCHEMA", "false"),
            ("STORE_SCHEMA_WAIT_MS", "50"),
            ("STORE_WAIT_FOR_SYNC", "0"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.admin_token.as_deref(), Some("secret"));
        assert_eq!(config.datastore, DatastoreKind::Replicated);
        assert_eq!(config.default_platform, "production");
        assert_eq!(config.max_dial_retries, 1);
        assert_eq!(config.store.contact_point(), "cluster.internal:9042");
        assert_eq!(config.store.keyspace, "gateway");
        assert!(!config.store.recreate_schema);
        assert_eq!(config.store.schema_wait, Duration::from_millis(50));
        assert!(!config.store.wait_for_sync);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = config_from(&[
            ("HTTP_ADDR", "not an address"),
            ("DATASTORE", "postgres"),
            ("MAX_CONSECUTIVE_ERRORS", "-2"),
            ("STORE_PORT", "70000"),
            ("ADMIN_TOKEN", ""),
        ]);
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.datastore, DatastoreKind::Memory);
        assert_eq!(config.max_consecutive_errors, 5);
        assert_eq!(config.store.port, 9160);
        assert!(config.admin_token.is_none());
    }
}
