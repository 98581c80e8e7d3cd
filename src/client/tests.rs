use std::time::Duration;

use super::broker_client::{
    BrokerClient, ChannelSubscription, ClientOptions, Connector, ReconnectPolicy,
};
use super::memory::{MemoryClient, MemoryConnector};
use crate::broker::{Broker, Event, QueueMessage, lock};
use crate::utils::Error;

fn options(client_id: &str, token: Option<&str>) -> ClientOptions {
    ClientOptions {
        address: "localhost:50000".to_string(),
        client_id: client_id.to_string(),
        auth_token: token.map(str::to_string),
        reconnect: ReconnectPolicy::default(),
    }
}

#[test]
fn test_reconnect_policy_allows() {
    let unlimited = ReconnectPolicy::default();
    assert!(unlimited.allows(1_000));

    let bounded = ReconnectPolicy {
        max_attempts: 2,
        ..ReconnectPolicy::default()
    };
    assert!(bounded.allows(1));
    assert!(bounded.allows(2));
    assert!(!bounded.allows(3));

    assert!(!ReconnectPolicy::disabled().allows(1));
}

#[test]
fn test_channel_subscription_drops_empty_group() {
    let sub = ChannelSubscription::new("c", Some(""));
    assert_eq!(sub.group, None);
}

#[tokio::test]
async fn test_memory_connector_checks_auth_token() {
    let connector = MemoryConnector::new(Broker::shared()).with_auth_token("secret");
    let denied = connector.connect(&options("c1", Some("wrong"))).await;
    assert!(matches!(denied, Err(Error::Connect { .. })));

    let client = connector
        .connect(&options("c1", Some("secret")))
        .await
        .unwrap();
    assert_eq!(client.client_id(), "c1");
}

#[tokio::test]
async fn test_memory_client_events_round_trip() {
    let broker = Broker::shared();
    let subscriber = MemoryClient::new(broker.clone(), "sub");
    let publisher = MemoryClient::new(broker.clone(), "pub");

    let mut sub = subscriber
        .subscribe_events(ChannelSubscription::new("events", None))
        .await
        .unwrap();
    publisher
        .send_event(Event::new("events", "hello"))
        .await
        .unwrap();

    let event = sub.next().await.unwrap().unwrap();
    assert_eq!(event.body, b"hello");
    assert_eq!(event.client_id, "pub");
}

#[tokio::test]
async fn test_memory_client_queue_round_trip() {
    let broker = Broker::shared();
    let client = MemoryClient::new(broker, "worker");
    client
        .send_queue(QueueMessage::new("jobs", "j1"))
        .await
        .unwrap();
    let batch = client
        .pull_queue("jobs", 5, Duration::from_millis(10))
        .await
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].body, b"j1");
}

#[tokio::test]
async fn test_close_ends_subscriptions_and_rejects_calls() {
    let broker = Broker::shared();
    let client = MemoryClient::new(broker, "c");
    let mut sub = client
        .subscribe_events(ChannelSubscription::new("events", None))
        .await
        .unwrap();

    client.close().await.unwrap();
    assert!(client.is_closed());
    assert!(sub.next().await.is_none());
    assert!(matches!(
        client.send_event(Event::new("events", "x")).await,
        Err(Error::Closed)
    ));
    // closing twice is fine
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_memory_client_unsubscribe_ends_feed() {
    let broker = Broker::shared();
    let client = MemoryClient::new(broker.clone(), "c");
    let mut sub = client
        .subscribe_events(ChannelSubscription::new("events", None))
        .await
        .unwrap();

    client.unsubscribe(&sub.id).await.unwrap();
    assert!(sub.next().await.is_none());

    let delivered = lock(&broker)
        .unwrap()
        .publish_event(Event::new("events", "late"))
        .unwrap();
    assert_eq!(delivered, 0);
}
