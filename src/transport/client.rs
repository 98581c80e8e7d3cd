//! WebSocket broker client.
//!
//! One [`WsClient`] owns one socket. A writer task drains an outbound
//! channel into the socket and a reader task routes server frames:
//! replies go to the pending call with the same `req_id`, deliveries go to
//! the subscription with the same `sub_id`. When the socket closes every
//! pending call fails with [`Error::Closed`] and every subscription receives
//! a final broker error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::broker::{Event, QueueMessage, RpcKind, RpcReply, RpcRequest, StartPosition};
use crate::client::{
    BrokerClient, ChannelSubscription, ClientOptions, Connector, Subscription,
};
use crate::transport::message::{ClientFrame, ServerFrame, SubscribeTarget};
use crate::utils::{Error, Result};

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Opens [`WsClient`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, options: &ClientOptions) -> Result<Arc<dyn BrokerClient>> {
        Ok(Arc::new(WsClient::connect(options).await?))
    }
}

type Sink<T> = mpsc::UnboundedSender<Result<T>>;

#[derive(Default)]
struct Routes {
    pending: HashMap<u64, oneshot::Sender<ServerFrame>>,
    events: HashMap<String, Sink<Event>>,
    requests: HashMap<String, Sink<RpcRequest>>,
    closed: bool,
}

impl Routes {
    fn route(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Event { sub_id, event } => {
                deliver(&mut self.events, &sub_id, Ok(event));
            }
            ServerFrame::Request { sub_id, request } => {
                deliver(&mut self.requests, &sub_id, Ok(request));
            }
            ServerFrame::SubscriptionError { sub_id, message } => {
                deliver(&mut self.events, &sub_id, Err(Error::Broker(message.clone())));
                deliver(&mut self.requests, &sub_id, Err(Error::Broker(message)));
            }
            ServerFrame::Error {
                req_id: None,
                message,
            } => warn!("broker reported: {}", message),
            frame => {
                let req_id = match &frame {
                    ServerFrame::Ack { req_id, .. }
                    | ServerFrame::Subscribed { req_id }
                    | ServerFrame::Pulled { req_id, .. }
                    | ServerFrame::Reply { req_id, .. } => *req_id,
                    ServerFrame::Error {
                        req_id: Some(req_id),
                        ..
                    } => *req_id,
                    _ => return,
                };
                match self.pending.remove(&req_id) {
                    Some(waiter) => {
                        let _ = waiter.send(frame);
                    }
                    None => debug!(req_id, "reply for unknown request"),
                }
            }
        }
    }

    fn fail_all(&mut self) {
        self.closed = true;
        self.pending.clear();
        for (_, sink) in self.events.drain() {
            let _ = sink.send(Err(Error::broker("connection closed")));
        }
        for (_, sink) in self.requests.drain() {
            let _ = sink.send(Err(Error::broker("connection closed")));
        }
    }
}

fn deliver<T>(sinks: &mut HashMap<String, Sink<T>>, sub_id: &str, item: Result<T>) {
    if let Some(sink) = sinks.get(sub_id) {
        if sink.send(item).is_err() {
            sinks.remove(sub_id);
        }
    }
}

/// A [`BrokerClient`] speaking the frame protocol over one websocket.
pub struct WsClient {
    client_id: String,
    outbound: mpsc::UnboundedSender<WsMessage>,
    routes: Arc<Mutex<Routes>>,
    next_req: AtomicU64,
    closing: AtomicBool,
}

impl WsClient {
    /// Dials the broker (retrying per the reconnect policy), then greets it
    /// with the client identity and auth token.
    pub async fn connect(options: &ClientOptions) -> Result<Self> {
        let ws = dial(options).await?;
        let (mut ws_sender, mut ws_receiver) = ws.split();
        let (outbound, mut rx) = mpsc::unbounded_channel::<WsMessage>();

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = msg.is_close();
                if let Err(e) = ws_sender.send(msg).await {
                    debug!("send loop stopped: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let routes = Arc::new(Mutex::new(Routes::default()));
        let reader_routes = routes.clone();
        let reader_id = options.client_id.clone();
        tokio::spawn(async move {
            while let Some(Ok(msg)) = ws_receiver.next().await {
                if msg.is_close() {
                    break;
                }
                if !msg.is_text() {
                    continue;
                }
                let Ok(text) = msg.to_text() else {
                    continue;
                };
                match serde_json::from_str::<ServerFrame>(text) {
                    Ok(frame) => guard(&reader_routes).route(frame),
                    Err(e) => warn!(client_id = %reader_id, "invalid server frame: {}", e),
                }
            }
            guard(&reader_routes).fail_all();
            debug!(client_id = %reader_id, "receive loop closed");
        });

        let client = Self {
            client_id: options.client_id.clone(),
            outbound,
            routes,
            next_req: AtomicU64::new(1),
            closing: AtomicBool::new(false),
        };

        let client_id = options.client_id.clone();
        let token = options.auth_token.clone();
        client
            .call(|req_id| ClientFrame::Hello {
                req_id,
                client_id,
                token,
            })
            .await
            .map_err(|e| Error::Connect {
                client_id: options.client_id.clone(),
                reason: e.to_string(),
            })?;
        info!(client_id = %client.client_id, address = %options.address, "connected to broker");
        Ok(client)
    }

    fn routes(&self) -> MutexGuard<'_, Routes> {
        guard(&self.routes)
    }

    fn send(&self, frame: &ClientFrame) -> Result<()> {
        let json = serde_json::to_string(frame).map_err(|e| Error::Encode(e.to_string()))?;
        self.outbound
            .send(WsMessage::text(json))
            .map_err(|_| Error::Closed)
    }

    async fn call(&self, build: impl FnOnce(u64) -> ClientFrame) -> Result<ServerFrame> {
        let req_id = self.next_req.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut routes = self.routes();
            if routes.closed {
                return Err(Error::Closed);
            }
            routes.pending.insert(req_id, tx);
        }

        if let Err(e) = self.send(&build(req_id)) {
            self.routes().pending.remove(&req_id);
            return Err(e);
        }

        match rx.await {
            Ok(ServerFrame::Error { message, .. }) => Err(Error::Broker(message)),
            Ok(frame) => Ok(frame),
            Err(_) => Err(Error::Closed),
        }
    }

    async fn ack(&self, build: impl FnOnce(u64) -> ClientFrame) -> Result<Option<u64>> {
        match self.call(build).await? {
            ServerFrame::Ack { sequence, .. } => Ok(sequence),
            other => Err(unexpected(other)),
        }
    }

    async fn subscribe(
        &self,
        sub_id: &str,
        target: SubscribeTarget,
        sub: ChannelSubscription,
    ) -> Result<()> {
        let frame = self
            .call(|req_id| ClientFrame::Subscribe {
                req_id,
                sub_id: sub_id.to_string(),
                target,
                channel: sub.channel,
                group: sub.group,
            })
            .await;
        match frame {
            Ok(ServerFrame::Subscribed { .. }) => Ok(()),
            Ok(other) => Err(unexpected(other)),
            Err(e) => Err(e),
        }
    }

    async fn subscribe_feed(
        &self,
        target: SubscribeTarget,
        sub: ChannelSubscription,
    ) -> Result<Subscription<Event>> {
        let sub_id = Uuid::new_v4().to_string();
        let (sink, feed) = mpsc::unbounded_channel();
        // registered before subscribing: deliveries may race the confirmation
        self.routes().events.insert(sub_id.clone(), sink);
        if let Err(e) = self.subscribe(&sub_id, target, sub).await {
            self.routes().events.remove(&sub_id);
            return Err(e);
        }
        Ok(Subscription::new(sub_id, feed))
    }
}

#[async_trait]
impl BrokerClient for WsClient {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn subscribe_events(&self, sub: ChannelSubscription) -> Result<Subscription<Event>> {
        self.subscribe_feed(SubscribeTarget::Events, sub).await
    }

    async fn subscribe_events_store(
        &self,
        sub: ChannelSubscription,
        start: StartPosition,
    ) -> Result<Subscription<Event>> {
        self.subscribe_feed(SubscribeTarget::EventsStore { start }, sub)
            .await
    }

    async fn subscribe_requests(
        &self,
        kind: RpcKind,
        sub: ChannelSubscription,
    ) -> Result<Subscription<RpcRequest>> {
        let sub_id = Uuid::new_v4().to_string();
        let (sink, feed) = mpsc::unbounded_channel();
        self.routes().requests.insert(sub_id.clone(), sink);
        if let Err(e) = self
            .subscribe(&sub_id, SubscribeTarget::Requests { rpc: kind }, sub)
            .await
        {
            self.routes().requests.remove(&sub_id);
            return Err(e);
        }
        Ok(Subscription::new(sub_id, feed))
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        {
            let mut routes = self.routes();
            routes.events.remove(subscription_id);
            routes.requests.remove(subscription_id);
        }
        self.ack(|req_id| ClientFrame::Unsubscribe {
            req_id,
            sub_id: subscription_id.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn send_event(&self, event: Event) -> Result<()> {
        let event = event.with_client_id(self.client_id.as_str());
        self.ack(|req_id| ClientFrame::SendEvent { req_id, event })
            .await
            .map(|_| ())
    }

    async fn send_event_store(&self, event: Event) -> Result<u64> {
        let event = event.with_client_id(self.client_id.as_str());
        self.ack(|req_id| ClientFrame::SendEventStore { req_id, event })
            .await?
            .ok_or_else(|| Error::broker("events-store ack without sequence"))
    }

    async fn send_queue(&self, mut message: QueueMessage) -> Result<()> {
        message.client_id = self.client_id.clone();
        self.ack(|req_id| ClientFrame::SendQueue { req_id, message })
            .await
            .map(|_| ())
    }

    async fn pull_queue(
        &self,
        channel: &str,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>> {
        let frame = self
            .call(|req_id| ClientFrame::Pull {
                req_id,
                channel: channel.to_string(),
                max_messages,
                wait_ms: wait.as_millis() as u64,
            })
            .await?;
        match frame {
            ServerFrame::Pulled { messages, .. } => Ok(messages),
            other => Err(unexpected(other)),
        }
    }

    async fn send_request(&self, request: RpcRequest, timeout: Duration) -> Result<RpcReply> {
        let frame = self
            .call(|req_id| ClientFrame::Request {
                req_id,
                request,
                timeout_ms: timeout.as_millis() as u64,
            })
            .await?;
        match frame {
            ServerFrame::Reply { reply, .. } => Ok(reply),
            other => Err(unexpected(other)),
        }
    }

    async fn send_response(&self, reply: RpcReply) -> Result<()> {
        self.ack(|req_id| ClientFrame::Respond { req_id, reply })
            .await
            .map(|_| ())
    }

    async fn close(&self) -> Result<()> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // the broker drops our subscriptions and abandons our pulls before
        // acking, so nothing is delivered to this client afterwards
        let said_goodbye = tokio::time::timeout(
            DISCONNECT_TIMEOUT,
            self.ack(|req_id| ClientFrame::Disconnect { req_id }),
        )
        .await;
        if !matches!(said_goodbye, Ok(Ok(_))) {
            debug!(client_id = %self.client_id, "broker did not acknowledge disconnect");
        }
        let _ = self.outbound.send(WsMessage::Close(None));
        self.routes().fail_all();
        debug!(client_id = %self.client_id, "websocket client closed");
        Ok(())
    }
}

async fn dial(options: &ClientOptions) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>> {
    let url = if options.address.starts_with("ws://") || options.address.starts_with("wss://") {
        options.address.clone()
    } else {
        format!("ws://{}", options.address)
    };

    let mut failures = 0u32;
    loop {
        match connect_async(url.as_str()).await {
            Ok((ws, _)) => return Ok(ws),
            Err(e) => {
                failures += 1;
                if !options.reconnect.allows(failures) {
                    return Err(Error::Connect {
                        client_id: options.client_id.clone(),
                        reason: e.to_string(),
                    });
                }
                warn!(
                    client_id = %options.client_id,
                    attempt = failures,
                    "connect to {} failed, retrying in {:?}: {}",
                    url,
                    options.reconnect.interval,
                    e
                );
                tokio::time::sleep(options.reconnect.interval).await;
            }
        }
    }
}

fn guard(routes: &Mutex<Routes>) -> MutexGuard<'_, Routes> {
    routes.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unexpected(frame: ServerFrame) -> Error {
    Error::broker(format!("unexpected frame: {frame:?}"))
}
