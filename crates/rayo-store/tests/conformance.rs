//! One behavioural suite run against every `GatewayDatastore` backend.
//!
//! The in-memory backend defines the expected behaviour; the replicated
//! backend must produce the same observable results. Listing order is not
//! part of the contract, so listings are compared sorted.

use std::sync::Arc;
use std::time::Duration;

use rayo_shared::{Application, GatewayCall, GatewayClient, RayoNode};
use rayo_store::replicated::LocalColumnStore;
use rayo_store::{
    Entity, GatewayDatastore, InMemoryDatastore, ReplicatedConfig, ReplicatedDatastore,
    StoreError,
};

async fn replicated() -> ReplicatedDatastore {
    let config = ReplicatedConfig {
        schema_wait: Duration::ZERO,
        wait_for_sync: false,
        ..ReplicatedConfig::default()
    };
    ReplicatedDatastore::init(Arc::new(LocalColumnStore::new()), &config)
        .await
        .expect("schema should build")
}

fn sorted(mut v: Vec<String>) -> Vec<String> {
    v.sort();
    v
}

fn hostnames(nodes: Vec<RayoNode>) -> Vec<String> {
    sorted(nodes.into_iter().map(|n| n.hostname).collect())
}

fn node(hostname: &str, ip: &str, platform: &str) -> RayoNode {
    RayoNode::new(hostname, ip, [platform])
}

/// Expands each suite function into one test per backend.
macro_rules! conformance {
    ($($name:ident),* $(,)?) => {
        mod in_memory {
            $(
                #[tokio::test]
                async fn $name() {
                    super::$name(&rayo_store::InMemoryDatastore::new()).await;
                }
            )*
        }

        mod replicated {
            $(
                #[tokio::test]
                async fn $name() {
                    super::$name(&super::replicated().await).await;
                }
            )*
        }
    };
}

conformance!(
    duplicate_hostname_is_rejected,
    node_indices_follow_store_and_remove,
    remove_unknown_node_is_not_found,
    unknown_platform_is_empty_and_stable,
    update_node_requires_existing_node,
    call_indices_track_stored_calls,
    call_for_unknown_node_leaves_no_trace,
    remove_unknown_call_is_not_found,
    client_resources_have_no_duplicates,
    remove_unknown_client_is_not_found,
    duplicate_application_is_rejected,
    remove_application_cascades_addresses,
    remove_address_keeps_application,
    addresses_require_application,
    end_to_end_call_lifecycle,
);

async fn duplicate_hostname_is_rejected(store: &dyn GatewayDatastore) {
    let first = node("media1.example", "10.0.0.1", "staging");
    store.store_node(first.clone()).await.unwrap();

    let second = node("media1.example", "10.0.0.2", "production").with_weight(9);
    let err = store.store_node(second).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::AlreadyExists { entity: Entity::Node, .. }
    ));

    assert_eq!(store.get_node("media1.example").await, Some(first));
    assert!(store.get_node_for_ip_address("10.0.0.2").await.is_none());
    assert!(store.get_rayo_nodes_for_platform("production").await.is_empty());
}

async fn node_indices_follow_store_and_remove(store: &dyn GatewayDatastore) {
    let multi = RayoNode::new("media1.example", "10.0.0.1", ["staging", "production"]);
    store.store_node(multi.clone()).await.unwrap();
    store
        .store_node(node("media2.example", "10.0.0.2", "staging"))
        .await
        .unwrap();

    assert_eq!(
        hostnames(store.get_rayo_nodes_for_platform("staging").await),
        vec!["media1.example", "media2.example"]
    );
    assert_eq!(
        hostnames(store.get_rayo_nodes_for_platform("production").await),
        vec!["media1.example"]
    );
    assert_eq!(
        sorted(store.get_platforms().await),
        vec!["production", "staging"]
    );
    assert_eq!(store.get_node_for_ip_address("10.0.0.1").await, Some(multi.clone()));

    let removed = store.remove_node("media1.example").await.unwrap();
    assert_eq!(removed, multi);
    assert!(store.get_node("media1.example").await.is_none());
    assert!(store.get_node_for_ip_address("10.0.0.1").await.is_none());
    assert!(store.get_rayo_nodes_for_platform("production").await.is_empty());
    assert_eq!(store.get_platforms().await, vec!["staging"]);
}

async fn remove_unknown_node_is_not_found(store: &dyn GatewayDatastore) {
    let err = store.remove_node("nowhere.example").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { entity: Entity::Node, .. }));
}

async fn unknown_platform_is_empty_and_stable(store: &dyn GatewayDatastore) {
    store
        .store_node(node("media1.example", "10.0.0.1", "staging"))
        .await
        .unwrap();
    assert!(store.get_rayo_nodes_for_platform("unknown").await.is_empty());
    assert!(store.get_rayo_nodes_for_platform("unknown").await.is_empty());

    let first = hostnames(store.get_rayo_nodes_for_platform("staging").await);
    let second = hostnames(store.get_rayo_nodes_for_platform("staging").await);
    assert_eq!(first, second);
}

async fn update_node_requires_existing_node(store: &dyn GatewayDatastore) {
    let err = store
        .update_node(node("media1.example", "10.0.0.1", "staging"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { entity: Entity::Node, .. }));

    store
        .store_node(node("media1.example", "10.0.0.1", "staging"))
        .await
        .unwrap();
    let mut changed = node("media1.example", "10.0.0.5", "production");
    changed.blacklisted = true;
    store.update_node(changed.clone()).await.unwrap();

    assert_eq!(store.get_node("media1.example").await, Some(changed));
    assert!(store.get_node_for_ip_address("10.0.0.1").await.is_none());
    assert!(store.get_rayo_nodes_for_platform("staging").await.is_empty());
    assert_eq!(
        hostnames(store.get_rayo_nodes_for_platform("production").await),
        vec!["media1.example"]
    );
}

async fn call_indices_track_stored_calls(store: &dyn GatewayDatastore) {
    store
        .store_node(node("media1.example", "10.0.0.1", "staging"))
        .await
        .unwrap();
    store
        .store_node(node("media2.example", "10.0.0.2", "staging"))
        .await
        .unwrap();

    let calls = [
        GatewayCall::new("c1", "alice@example", "media1.example"),
        GatewayCall::new("c2", "alice@example", "media2.example"),
        GatewayCall::new("c3", "bob@example", "media1.example"),
    ];
    for call in &calls {
        store.store_call(call.clone()).await.unwrap();
    }
    // Storing the same call again must not duplicate index entries.
    store.store_call(calls[0].clone()).await.unwrap();

    assert_eq!(sorted(store.get_calls_for_client("alice@example").await), vec!["c1", "c2"]);
    assert_eq!(sorted(store.get_calls_for_node("media1.example").await), vec!["c1", "c3"]);
    assert_eq!(sorted(store.get_calls().await), vec!["c1", "c2", "c3"]);
    assert_eq!(
        store.get_node_for_call("c2").await.as_deref(),
        Some("media2.example")
    );

    store.remove_call("c1").await.unwrap();
    assert_eq!(store.get_calls_for_client("alice@example").await, vec!["c2"]);
    assert_eq!(store.get_calls_for_node("media1.example").await, vec!["c3"]);
    assert!(store.get_call("c1").await.is_none());

    store.remove_call("c2").await.unwrap();
    store.remove_call("c3").await.unwrap();
    assert!(store.get_calls_for_client("alice@example").await.is_empty());
    assert!(store.get_calls_for_client("bob@example").await.is_empty());
    assert!(store.get_calls_for_node("media1.example").await.is_empty());
    assert!(store.get_calls().await.is_empty());
}

async fn call_for_unknown_node_leaves_no_trace(store: &dyn GatewayDatastore) {
    let err = store
        .store_call(GatewayCall::new("c1", "alice@example", "ghost.example"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NodeNotFound(ref n) if n == "ghost.example"));

    assert!(store.get_call("c1").await.is_none());
    assert!(store.get_calls_for_client("alice@example").await.is_empty());
    assert!(store.get_calls_for_node("ghost.example").await.is_empty());
    assert!(store.get_calls().await.is_empty());
}

async fn remove_unknown_call_is_not_found(store: &dyn GatewayDatastore) {
    let err = store.remove_call("missing").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { entity: Entity::Call, .. }));
}

async fn client_resources_have_no_duplicates(store: &dyn GatewayDatastore) {
    store
        .store_client(GatewayClient::new("app@apps.example/r1", "staging"))
        .await
        .unwrap();
    store
        .store_client(GatewayClient::new("app@apps.example/r1", "staging"))
        .await
        .unwrap();
    store
        .store_client(GatewayClient::new("app@apps.example/r2", "staging"))
        .await
        .unwrap();
    store
        .store_client(GatewayClient::new("other@apps.example/r1", "production"))
        .await
        .unwrap();

    assert_eq!(
        sorted(store.get_client_resources("app@apps.example").await),
        vec!["r1", "r2"]
    );
    assert_eq!(
        sorted(store.get_clients().await),
        vec!["app@apps.example", "other@apps.example"]
    );
    let client = store.get_client("other@apps.example/r1").await.unwrap();
    assert_eq!(client.platform, "production");
    assert_eq!(client.bare_jid, "other@apps.example");

    store.remove_client("app@apps.example/r1").await.unwrap();
    assert_eq!(store.get_client_resources("app@apps.example").await, vec!["r2"]);
    assert!(store.get_client("app@apps.example/r1").await.is_none());

    store.remove_client("app@apps.example/r2").await.unwrap();
    assert!(store.get_client_resources("app@apps.example").await.is_empty());
    assert_eq!(store.get_clients().await, vec!["other@apps.example"]);
}

async fn remove_unknown_client_is_not_found(store: &dyn GatewayDatastore) {
    let err = store.remove_client("nobody@apps.example/r1").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { entity: Entity::Client, .. }));
}

async fn duplicate_application_is_rejected(store: &dyn GatewayDatastore) {
    let app = Application::new("app@apps.example", "staging")
        .with_name("voicemail")
        .with_account("acct-1")
        .with_permissions("outbound");
    store.store_application(app.clone()).await.unwrap();

    let err = store
        .store_application(Application::new("app@apps.example", "production"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::AlreadyExists { entity: Entity::Application, .. }
    ));
    assert_eq!(store.get_application("app@apps.example").await, Some(app));
}

async fn remove_application_cascades_addresses(store: &dyn GatewayDatastore) {
    store
        .store_application(Application::new("app@apps.example", "staging"))
        .await
        .unwrap();
    store
        .store_application(Application::new("keep@apps.example", "staging"))
        .await
        .unwrap();
    store
        .store_addresses(
            &["+15550001".to_string(), "sip:app@example.com".to_string()],
            "app@apps.example",
        )
        .await
        .unwrap();
    store.store_address("+15550002", "keep@apps.example").await.unwrap();

    store.remove_application("app@apps.example").await.unwrap();

    assert!(store.get_application("app@apps.example").await.is_none());
    assert!(store.get_addresses_for_application("app@apps.example").await.is_empty());
    assert!(store.get_application_for_address("+15550001").await.is_none());
    assert!(store.get_application_for_address("sip:app@example.com").await.is_none());
    assert_eq!(
        store.get_addresses_for_application("keep@apps.example").await,
        vec!["+15550002"]
    );

    let err = store.remove_application("app@apps.example").await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::NotFound { entity: Entity::Application, .. }
    ));
}

async fn remove_address_keeps_application(store: &dyn GatewayDatastore) {
    store
        .store_application(Application::new("app@apps.example", "staging"))
        .await
        .unwrap();
    store
        .store_addresses(
            &["+15550001".to_string(), "+15550002".to_string()],
            "app@apps.example",
        )
        .await
        .unwrap();

    store.remove_address("+15550001").await.unwrap();
    // Unknown addresses are ignored.
    store.remove_address("+19999999").await.unwrap();

    assert!(store.get_application("app@apps.example").await.is_some());
    assert!(store.get_application_for_address("+15550001").await.is_none());
    assert_eq!(
        store
            .get_application_for_address("+15550002")
            .await
            .map(|a| a.bare_jid),
        Some("app@apps.example".to_string())
    );
    assert_eq!(
        store.get_addresses_for_application("app@apps.example").await,
        vec!["+15550002"]
    );
}

async fn addresses_require_application(store: &dyn GatewayDatastore) {
    let err = store
        .store_address("+15550001", "missing@apps.example")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::NotFound { entity: Entity::Application, .. }
    ));
    assert!(store.get_application_for_address("+15550001").await.is_none());
}

async fn end_to_end_call_lifecycle(store: &dyn GatewayDatastore) {
    store
        .store_node(node("media1.example", "10.0.0.1", "staging").with_weight(1))
        .await
        .unwrap();
    store
        .store_call(GatewayCall::new("call-123", "alice@example", "media1.example"))
        .await
        .unwrap();

    assert_eq!(store.get_calls_for_client("alice@example").await, vec!["call-123"]);

    store.remove_call("call-123").await.unwrap();
    assert!(store.get_calls_for_client("alice@example").await.is_empty());
}

#[tokio::test]
async fn backends_are_interchangeable_behind_a_trait_object() {
    let stores: Vec<Box<dyn GatewayDatastore>> =
        vec![Box::new(InMemoryDatastore::new()), Box::new(replicated().await)];
    for store in stores {
        end_to_end_call_lifecycle(store.as_ref()).await;
    }
}
