use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::net::TcpListener;

use super::client::WsClient;
use super::message::{ClientFrame, ServerFrame, SubscribeTarget};
use super::websocket::serve;
use crate::broker::{Broker, Event, QueueMessage, RpcKind, RpcReply, RpcRequest, StartPosition};
use crate::client::{BrokerClient, ChannelSubscription, ClientOptions, ReconnectPolicy};
use crate::utils::Error;

async fn start_server(token: Option<&str>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(serve(listener, Broker::shared(), token.map(str::to_string)));
    addr
}

fn options(addr: &str, client_id: &str, token: Option<&str>) -> ClientOptions {
    ClientOptions {
        address: addr.to_string(),
        client_id: client_id.to_string(),
        auth_token: token.map(str::to_string),
        reconnect: ReconnectPolicy::disabled(),
    }
}

#[test]
fn test_client_frame_is_tagged_by_type() {
    let frame = ClientFrame::Subscribe {
        req_id: 7,
        sub_id: "s1".to_string(),
        target: SubscribeTarget::EventsStore {
            start: StartPosition::Sequence(3),
        },
        channel: "log".to_string(),
        group: None,
    };
    let value = serde_json::to_value(&frame).unwrap();
    assert_eq!(value["type"], "subscribe");
    assert_eq!(value["target"]["kind"], "events_store");
    assert_eq!(value["target"]["start"], json!({"sequence": 3}));
}

#[test]
fn test_server_frame_parses_error_without_req_id() {
    let frame: ServerFrame =
        serde_json::from_value(json!({"type": "error", "message": "boom"})).unwrap();
    assert!(matches!(frame, ServerFrame::Error { req_id: None, .. }));
}

#[tokio::test]
async fn test_events_over_websocket() {
    let addr = start_server(None).await;
    let subscriber = WsClient::connect(&options(&addr, "sub", None))
        .await
        .unwrap();
    let publisher = WsClient::connect(&options(&addr, "pub", None))
        .await
        .unwrap();

    let mut sub = subscriber
        .subscribe_events(ChannelSubscription::new("events", None))
        .await
        .unwrap();
    publisher
        .send_event(Event::new("events", "hello"))
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), sub.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(event.body, b"hello");
    assert_eq!(event.client_id, "pub");
}

#[tokio::test]
async fn test_events_store_sequence_is_acknowledged() {
    let addr = start_server(None).await;
    let client = WsClient::connect(&options(&addr, "c", None)).await.unwrap();
    let first = client
        .send_event_store(Event::new("log", "a"))
        .await
        .unwrap();
    let second = client
        .send_event_store(Event::new("log", "b"))
        .await
        .unwrap();
    assert_eq!((first, second), (1, 2));

    let mut sub = client
        .subscribe_events_store(ChannelSubscription::new("log", None), StartPosition::First)
        .await
        .unwrap();
    let record = tokio::time::timeout(Duration::from_secs(5), sub.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(record.sequence, 1);
}

#[tokio::test]
async fn test_queue_over_websocket() {
    let addr = start_server(None).await;
    let client = WsClient::connect(&options(&addr, "c", None)).await.unwrap();
    client
        .send_queue(QueueMessage::new("jobs", "j1"))
        .await
        .unwrap();

    let batch = client
        .pull_queue("jobs", 10, Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].body, b"j1");

    let empty = client
        .pull_queue("jobs", 10, Duration::from_millis(50))
        .await
        .unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn test_request_reply_over_websocket() {
    let addr = start_server(None).await;
    let responder = WsClient::connect(&options(&addr, "responder", None))
        .await
        .unwrap();
    let caller = WsClient::connect(&options(&addr, "caller", None))
        .await
        .unwrap();

    let mut requests = responder
        .subscribe_requests(RpcKind::Command, ChannelSubscription::new("cmd", None))
        .await
        .unwrap();

    let call = tokio::spawn(async move {
        caller
            .send_request(
                RpcRequest::new(RpcKind::Command, "cmd", "ping"),
                Duration::from_secs(5),
            )
            .await
    });

    let request = requests.next().await.unwrap().unwrap();
    assert_eq!(request.body, b"ping");
    assert_eq!(request.client_id, "caller");
    responder
        .send_response(RpcReply::to(&request, "responder").with_body(b"pong".to_vec()))
        .await
        .unwrap();

    let reply = call.await.unwrap().unwrap();
    assert!(reply.executed);
    assert_eq!(reply.body, b"pong");
}

#[tokio::test]
async fn test_broker_errors_are_reported_to_the_caller() {
    let addr = start_server(None).await;
    let client = WsClient::connect(&options(&addr, "c", None)).await.unwrap();
    let result = client
        .send_request(
            RpcRequest::new(RpcKind::Query, "nobody", "x"),
            Duration::from_secs(1),
        )
        .await;
    assert!(matches!(result, Err(Error::Broker(_))));
}

#[tokio::test]
async fn test_auth_token_is_enforced() {
    let addr = start_server(Some("secret")).await;
    let denied = WsClient::connect(&options(&addr, "c", Some("nope"))).await;
    assert!(matches!(denied, Err(Error::Connect { .. })));

    let allowed = WsClient::connect(&options(&addr, "c", Some("secret"))).await;
    assert!(allowed.is_ok());
}

#[tokio::test]
async fn test_connect_to_closed_port_fails_without_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let result = WsClient::connect(&options(&addr, "c", None)).await;
    assert!(matches!(result, Err(Error::Connect { .. })));
}

#[tokio::test]
async fn test_close_ends_subscriptions_and_calls() {
    let addr = start_server(None).await;
    let client = WsClient::connect(&options(&addr, "c", None)).await.unwrap();
    let mut sub = client
        .subscribe_events(ChannelSubscription::new("events", None))
        .await
        .unwrap();

    client.close().await.unwrap();

    assert!(matches!(sub.next().await, Some(Err(Error::Broker(_)))));
    assert!(sub.next().await.is_none());
    assert!(matches!(
        client.send_event(Event::new("events", "x")).await,
        Err(Error::Closed)
    ));
}

#[tokio::test]
async fn test_unsubscribe_removes_responder() {
    let addr = start_server(None).await;
    let responder = WsClient::connect(&options(&addr, "responder", None))
        .await
        .unwrap();
    let caller = WsClient::connect(&options(&addr, "caller", None))
        .await
        .unwrap();

    let requests = responder
        .subscribe_requests(RpcKind::Query, ChannelSubscription::new("q", None))
        .await
        .unwrap();
    responder.unsubscribe(&requests.id).await.unwrap();

    let result = caller
        .send_request(
            RpcRequest::new(RpcKind::Query, "q", "x"),
            Duration::from_secs(1),
        )
        .await;
    assert!(matches!(result, Err(Error::Broker(_))));

    // a second unsubscribe of the same id is refused
    assert!(matches!(
        responder.unsubscribe(&requests.id).await,
        Err(Error::Broker(_))
    ));
}

#[tokio::test]
async fn test_pull_in_flight_at_close_takes_nothing() {
    let addr = start_server(None).await;
    let worker = Arc::new(
        WsClient::connect(&options(&addr, "worker", None))
            .await
            .unwrap(),
    );
    let pulling = worker.clone();
    let pull = tokio::spawn(async move {
        pulling
            .pull_queue("jobs", 1, Duration::from_secs(10))
            .await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    worker.close().await.unwrap();
    assert!(pull.await.unwrap().is_err());

    let producer = WsClient::connect(&options(&addr, "producer", None))
        .await
        .unwrap();
    producer
        .send_queue(QueueMessage::new("jobs", "j1"))
        .await
        .unwrap();
    let batch = producer
        .pull_queue("jobs", 1, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].body, b"j1");
}
