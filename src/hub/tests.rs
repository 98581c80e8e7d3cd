use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::Hub;
use crate::bindings::{IdentityProvider, SequentialIdentity};
use crate::broker::{Broker, RpcKind, RpcRequest, lock};
use crate::client::{BrokerClient, MemoryClient, MemoryConnector};
use crate::config::{BindingSettings, ComponentSettings, Properties};
use crate::envelope::{Request, Response};
use crate::utils::Error;

fn binding(name: &str, kind: &str, channel: &str, target: &str) -> BindingSettings {
    BindingSettings {
        name: name.to_string(),
        source: ComponentSettings {
            kind: kind.to_string(),
            properties: Properties::new()
                .with("address", "localhost:50000")
                .with("channel", channel),
        },
        target: ComponentSettings {
            kind: target.to_string(),
            properties: Properties::new(),
        },
    }
}

fn identity() -> Arc<dyn IdentityProvider> {
    Arc::new(SequentialIdentity::new("hub"))
}

#[tokio::test]
async fn test_hub_runs_configured_bindings() {
    let broker = Broker::shared();
    let connector = MemoryConnector::new(broker.clone());
    let settings = vec![
        binding("kv", "command", "kv", "cache"),
        binding("echo", "query", "echo", "echo"),
    ];
    let mut hub = Hub::init(&settings, &connector, identity()).await.unwrap();
    assert_eq!(hub.len(), 2);
    hub.start(&CancellationToken::new()).await.unwrap();
    assert!(hub.bindings().all(|b| b.is_running()));

    let caller = MemoryClient::new(broker.clone(), "caller");
    let set = Request::new()
        .with_metadata("method", "set")
        .with_metadata("key", "k1")
        .with_data("v1");
    let reply = caller
        .send_request(
            RpcRequest::new(RpcKind::Command, "kv", set.marshal().unwrap()),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(reply.error, None);

    let get = Request::new()
        .with_metadata("method", "get")
        .with_metadata("key", "k1");
    let reply = caller
        .send_request(
            RpcRequest::new(RpcKind::Command, "kv", get.marshal().unwrap()),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(Response::parse(&reply.body).unwrap().data, b"v1");

    hub.stop().await.unwrap();
    assert!(hub.bindings().all(|b| !b.is_running()));
    let guard = lock(&broker).unwrap();
    assert!(guard.commands["kv"].subscribers.is_empty());
    assert!(guard.queries["echo"].subscribers.is_empty());
}

#[tokio::test]
async fn test_hub_rejects_unknown_target_kind() {
    let connector = MemoryConnector::new(Broker::shared());
    let settings = vec![
        binding("ok", "events", "a", "echo"),
        binding("bad", "events", "b", "smtp"),
    ];
    let result = Hub::init(&settings, &connector, identity()).await;
    assert!(matches!(result, Err(Error::InvalidOptions(_))));
}

#[tokio::test]
async fn test_hub_rejects_duplicate_names() {
    let connector = MemoryConnector::new(Broker::shared());
    let settings = vec![
        binding("same", "events", "a", "echo"),
        binding("same", "queue", "b", "echo"),
    ];
    let result = Hub::init(&settings, &connector, identity()).await;
    assert!(matches!(result, Err(Error::InvalidOptions(msg)) if msg.contains("duplicate")));
}

#[tokio::test]
async fn test_empty_hub() {
    let connector = MemoryConnector::new(Broker::shared());
    let mut hub = Hub::init(&[], &connector, identity()).await.unwrap();
    assert!(hub.is_empty());
    hub.start(&CancellationToken::new()).await.unwrap();
    hub.stop().await.unwrap();
}
