//! Bindings driven end to end over the websocket transport.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use relayhub::bindings::{Binding, BindingOptions, Pattern, SequentialIdentity};
use relayhub::broker::{Broker, Event, QueueMessage, RpcKind, RpcRequest};
use relayhub::client::{BrokerClient, ChannelSubscription, ClientOptions, ReconnectPolicy};
use relayhub::envelope::{Request, Response};
use relayhub::target::{Cache, Echo};
use relayhub::transport::{WsClient, WsConnector, serve};

async fn start_server(token: Option<&str>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(serve(listener, Broker::shared(), token.map(str::to_string)));
    addr
}

async fn client(addr: &str, client_id: &str) -> WsClient {
    WsClient::connect(&ClientOptions {
        address: addr.to_string(),
        client_id: client_id.to_string(),
        auth_token: None,
        reconnect: ReconnectPolicy::disabled(),
    })
    .await
    .unwrap()
}

fn options(addr: &str, pattern: Pattern, channel: &str) -> BindingOptions {
    let mut options = BindingOptions::new("it", pattern, addr, channel);
    options.reconnect = ReconnectPolicy::disabled();
    options
}

#[tokio::test]
async fn command_binding_over_websocket() {
    let addr = start_server(None).await;
    let mut opts = options(&addr, Pattern::Command, "kv");
    opts.sources = 2;

    let mut binding = Binding::init(opts, &WsConnector, Arc::new(SequentialIdentity::new("it")))
        .await
        .unwrap();
    binding
        .start(&CancellationToken::new(), Some(Arc::new(Cache::new())))
        .await
        .unwrap();
    assert_eq!(binding.client_ids(), vec!["it-client-0-0", "it-client-0-1"]);
    assert!(binding.consumer_group().is_some());

    let caller = client(&addr, "caller").await;
    let set = Request::new()
        .with_metadata("method", "set")
        .with_metadata("key", "a")
        .with_data("1");
    let reply = caller
        .send_request(
            RpcRequest::new(RpcKind::Command, "kv", set.marshal().unwrap()),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert!(reply.executed);

    let get = Request::new()
        .with_metadata("method", "get")
        .with_metadata("key", "missing");
    let reply = caller
        .send_request(
            RpcRequest::new(RpcKind::Command, "kv", get.marshal().unwrap()),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(reply.error.as_deref(), Some("key missing not found"));
    assert!(reply.body.is_empty());

    binding.stop().await.unwrap();
    binding.stop().await.unwrap();
}

#[tokio::test]
async fn events_binding_echoes_to_response_channel() {
    let addr = start_server(None).await;
    let mut opts = options(&addr, Pattern::Events, "in");
    opts.response_channel = Some("out".to_string());
    let mut binding = Binding::init(opts, &WsConnector, Arc::new(SequentialIdentity::new("it")))
        .await
        .unwrap();
    binding
        .start(&CancellationToken::new(), Some(Arc::new(Echo::new())))
        .await
        .unwrap();

    let listener = client(&addr, "listener").await;
    let mut responses = listener
        .subscribe_events(ChannelSubscription::new("out", None))
        .await
        .unwrap();
    let publisher = client(&addr, "publisher").await;
    let body = Request::new().with_data("ping").marshal().unwrap();
    publisher.send_event(Event::new("in", body)).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), responses.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(Response::parse(&event.body).unwrap().data, b"ping");

    binding.stop().await.unwrap();
}

#[tokio::test]
async fn queue_binding_over_websocket() {
    let addr = start_server(None).await;
    let mut opts = options(&addr, Pattern::Queue, "jobs");
    opts.batch_size = 4;
    opts.wait_timeout = Duration::from_secs(1);
    opts.response_channel = Some("jobs.done".to_string());
    let mut binding = Binding::init(opts, &WsConnector, Arc::new(SequentialIdentity::new("it")))
        .await
        .unwrap();
    binding
        .start(&CancellationToken::new(), Some(Arc::new(Echo::new())))
        .await
        .unwrap();

    let producer = client(&addr, "producer").await;
    let body = Request::new().with_data("work").marshal().unwrap();
    producer
        .send_queue(QueueMessage::new("jobs", body))
        .await
        .unwrap();

    let done = producer
        .pull_queue("jobs.done", 1, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(done.len(), 1);
    assert_eq!(Response::parse(&done[0].body).unwrap().data, b"work");

    binding.stop().await.unwrap();
}

#[tokio::test]
async fn stopped_queue_binding_leaves_later_messages_queued() {
    let addr = start_server(None).await;
    let mut opts = options(&addr, Pattern::Queue, "jobs");
    opts.wait_timeout = Duration::from_secs(10);
    let mut binding = Binding::init(opts, &WsConnector, Arc::new(SequentialIdentity::new("it")))
        .await
        .unwrap();
    binding
        .start(&CancellationToken::new(), Some(Arc::new(Echo::new())))
        .await
        .unwrap();
    // let the binding's long poll reach the broker
    tokio::time::sleep(Duration::from_millis(200)).await;
    binding.stop().await.unwrap();

    let producer = client(&addr, "producer").await;
    producer
        .send_queue(QueueMessage::new("jobs", "after-stop"))
        .await
        .unwrap();

    let batch = producer
        .pull_queue("jobs", 1, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].body, b"after-stop");
}

#[tokio::test]
async fn init_fails_when_broker_unreachable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let result = Binding::init(
        options(&addr, Pattern::Events, "in"),
        &WsConnector,
        Arc::new(SequentialIdentity::new("it")),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn init_fails_with_wrong_auth_token() {
    let addr = start_server(Some("secret")).await;
    let mut opts = options(&addr, Pattern::Events, "in");
    opts.auth_token = Some("wrong".to_string());

    let result = Binding::init(opts, &WsConnector, Arc::new(SequentialIdentity::new("it"))).await;
    assert!(result.is_err());
}
