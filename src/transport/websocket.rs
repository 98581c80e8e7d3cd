//! WebSocket transport
//!
//! This file implements a WebSocket server that translates protocol JSON
//! frames into broker operations. Responsibilities:
//! - Accept TCP/WebSocket connections
//! - Require a `hello` frame first, checking the shared auth token when the
//!   server has one
//! - Forward broker subscriptions to the socket, tagged with the client's
//!   subscription id
//! - Run long-polling pulls and requests on their own tasks so one slow call
//!   does not hold up the rest of the connection
//! - Remove every subscription of a client once its socket closes or it
//!   sends `disconnect`, abandoning its pulls so no queued message is taken
//!   on behalf of a gone client

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::topic::SubscriberId;
use crate::broker::{Broker, Event, Feed, RpcRequest, SharedBroker, lock};
use crate::transport::message::{ClientFrame, ServerFrame, SubscribeTarget};
use crate::utils::{Error, Result};

type Outbound = mpsc::UnboundedSender<WsMessage>;

/// Binds `addr` and serves the broker until the listener fails.
pub async fn start_websocket_server(
    addr: &str,
    broker: SharedBroker,
    auth_token: Option<String>,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::broker(format!("can't bind {addr}: {e}")))?;
    info!("WebSocket broker listening on ws://{}", addr);
    serve(listener, broker, auth_token).await
}

/// Serves the broker on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    broker: SharedBroker,
    auth_token: Option<String>,
) -> Result<()> {
    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| Error::broker(format!("accept failed: {e}")))?;
        let broker = broker.clone();
        let auth_token = auth_token.clone();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!(%peer, "WebSocket handshake error: {}", e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

            // broker → client
            tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    if let Err(e) = ws_sender.send(msg).await {
                        debug!(%peer, "send loop stopped: {}", e);
                        break;
                    }
                }
            });

            let Some(client_id) = handshake(&mut ws_receiver, &tx, auth_token.as_deref()).await
            else {
                let _ = tx.send(WsMessage::Close(None));
                return;
            };
            info!(%peer, client_id = %client_id, "client connected");

            let mut session = Session::new(broker, client_id, tx);
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
                match serde_json::from_str::<ClientFrame>(text) {
                    Ok(frame) => session.handle(frame),
                    Err(err) => {
                        warn!(client_id = %session.client_id, "invalid client frame: {}", err);
                        send_frame(
                            &session.tx,
                            &ServerFrame::Error {
                                req_id: None,
                                message: format!("invalid frame: {err}"),
                            },
                        );
                    }
                }
            }

            info!(client_id = %session.client_id, "client disconnected");
            session.end();
        });
    }
}

async fn handshake<S>(receiver: &mut S, tx: &Outbound, expected: Option<&str>) -> Option<String>
where
    S: Stream<Item = std::result::Result<WsMessage, tungstenite::Error>> + Unpin,
{
    let msg = receiver.next().await?.ok()?;
    let text = msg.to_text().ok()?;
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Hello {
            req_id,
            client_id,
            token,
        }) => {
            if expected.is_some() && token.as_deref() != expected {
                send_frame(
                    tx,
                    &ServerFrame::Error {
                        req_id: Some(req_id),
                        message: "invalid auth token".to_string(),
                    },
                );
                return None;
            }
            if client_id.trim().is_empty() {
                send_frame(
                    tx,
                    &ServerFrame::Error {
                        req_id: Some(req_id),
                        message: "client id is required".to_string(),
                    },
                );
                return None;
            }
            send_frame(
                tx,
                &ServerFrame::Ack {
                    req_id,
                    sequence: None,
                },
            );
            Some(client_id)
        }
        Ok(other) => {
            send_frame(
                tx,
                &ServerFrame::Error {
                    req_id: Some(other.req_id()),
                    message: "expected hello".to_string(),
                },
            );
            None
        }
        Err(e) => {
            warn!("invalid hello frame: {}", e);
            None
        }
    }
}

/// Server side state of one greeted connection.
struct Session {
    broker: SharedBroker,
    client_id: String,
    tx: Outbound,
    /// Cancelled when the connection ends; pulls and requests still in
    /// flight are abandoned without touching the broker.
    token: CancellationToken,
    /// Client chosen subscription ids mapped to broker subscriber ids.
    subscriptions: HashMap<String, SubscriberId>,
}

impl Session {
    fn new(broker: SharedBroker, client_id: String, tx: Outbound) -> Self {
        Self {
            broker,
            client_id,
            tx,
            token: CancellationToken::new(),
            subscriptions: HashMap::new(),
        }
    }

    fn handle(&mut self, frame: ClientFrame) {
        let req_id = frame.req_id();
        let result = match frame {
            ClientFrame::Hello { .. } => Err(Error::broker("already greeted")),
            ClientFrame::Subscribe {
                req_id,
                sub_id,
                target,
                channel,
                group,
            } => self.subscribe(req_id, sub_id, &channel, group.as_deref(), target),
            ClientFrame::Unsubscribe { req_id, sub_id } => self.unsubscribe(req_id, &sub_id),
            ClientFrame::SendEvent { req_id, event } => lock(&self.broker)
                .and_then(|mut b| b.publish_event(event))
                .map(|_| ack(&self.tx, req_id, None)),
            ClientFrame::SendEventStore { req_id, event } => lock(&self.broker)
                .and_then(|mut b| b.publish_event_store(event))
                .map(|sequence| ack(&self.tx, req_id, Some(sequence))),
            ClientFrame::SendQueue { req_id, message } => lock(&self.broker)
                .and_then(|mut b| b.enqueue(message))
                .map(|_| ack(&self.tx, req_id, None)),
            ClientFrame::Respond { req_id, reply } => lock(&self.broker)
                .and_then(|mut b| b.respond(reply))
                .map(|_| ack(&self.tx, req_id, None)),
            ClientFrame::Pull {
                req_id,
                channel,
                max_messages,
                wait_ms,
            } => {
                self.pull(req_id, channel, max_messages, Duration::from_millis(wait_ms));
                Ok(())
            }
            ClientFrame::Request {
                req_id,
                request,
                timeout_ms,
            } => {
                self.request(req_id, request, Duration::from_millis(timeout_ms));
                Ok(())
            }
            ClientFrame::Disconnect { req_id } => {
                self.end();
                ack(&self.tx, req_id, None);
                Ok(())
            }
        };

        if let Err(e) = result {
            send_frame(
                &self.tx,
                &ServerFrame::Error {
                    req_id: Some(req_id),
                    message: e.to_string(),
                },
            );
        }
    }

    fn subscribe(
        &mut self,
        req_id: u64,
        sub_id: String,
        channel: &str,
        group: Option<&str>,
        target: SubscribeTarget,
    ) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::Closed);
        }
        if self.subscriptions.contains_key(&sub_id) {
            return Err(Error::broker(format!("subscription {sub_id} already exists")));
        }
        let (subscriber, forward) =
            subscribe(&self.broker, &self.client_id, channel, group, target)?;
        self.subscriptions.insert(sub_id.clone(), subscriber);
        send_frame(&self.tx, &ServerFrame::Subscribed { req_id });
        forward.spawn(sub_id, self.tx.clone());
        Ok(())
    }

    fn unsubscribe(&mut self, req_id: u64, sub_id: &str) -> Result<()> {
        let subscriber = self
            .subscriptions
            .remove(sub_id)
            .ok_or_else(|| Error::broker(format!("unknown subscription {sub_id}")))?;
        lock(&self.broker)?.unsubscribe(&subscriber);
        debug!(client_id = %self.client_id, sub_id, "unsubscribed");
        ack(&self.tx, req_id, None);
        Ok(())
    }

    fn pull(&self, req_id: u64, channel: String, max_messages: usize, wait: Duration) {
        let broker = self.broker.clone();
        let tx = self.tx.clone();
        let client_id = self.client_id.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            // messages are only taken when the pull wins the race
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(client_id = %client_id, channel = %channel, "pull abandoned");
                    return;
                }
                result = Broker::pull(&broker, &channel, max_messages, wait, &client_id) => result,
            };
            let frame = match result {
                Ok(messages) => ServerFrame::Pulled { req_id, messages },
                Err(e) => ServerFrame::Error {
                    req_id: Some(req_id),
                    message: e.to_string(),
                },
            };
            send_frame(&tx, &frame);
        });
    }

    fn request(&self, req_id: u64, mut request: RpcRequest, timeout: Duration) {
        let broker = self.broker.clone();
        let tx = self.tx.clone();
        let token = self.token.clone();
        request.client_id = self.client_id.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                result = Broker::request(&broker, request, timeout) => result,
            };
            let frame = match result {
                Ok(reply) => ServerFrame::Reply { req_id, reply },
                Err(e) => ServerFrame::Error {
                    req_id: Some(req_id),
                    message: e.to_string(),
                },
            };
            send_frame(&tx, &frame);
        });
    }

    /// Abandons in-flight calls and drops every subscription of the client.
    /// Safe to call more than once.
    fn end(&mut self) {
        self.token.cancel();
        self.subscriptions.clear();
        match lock(&self.broker) {
            Ok(mut broker) => broker.cleanup_client(&self.client_id),
            Err(e) => error!(client_id = %self.client_id, "cleanup failed: {}", e),
        }
    }
}

enum Forward {
    Events(Feed<Event>),
    Requests(Feed<RpcRequest>),
}

impl Forward {
    /// Pumps the broker feed into the socket until either side closes.
    fn spawn(self, sub_id: String, tx: Outbound) {
        tokio::spawn(async move {
            match self {
                Forward::Events(mut feed) => {
                    while let Some(item) = feed.recv().await {
                        let frame = match item {
                            Ok(event) => ServerFrame::Event {
                                sub_id: sub_id.clone(),
                                event,
                            },
                            Err(e) => ServerFrame::SubscriptionError {
                                sub_id: sub_id.clone(),
                                message: e.to_string(),
                            },
                        };
                        if !send_frame(&tx, &frame) {
                            break;
                        }
                    }
                }
                Forward::Requests(mut feed) => {
                    while let Some(item) = feed.recv().await {
                        let frame = match item {
                            Ok(request) => ServerFrame::Request {
                                sub_id: sub_id.clone(),
                                request,
                            },
                            Err(e) => ServerFrame::SubscriptionError {
                                sub_id: sub_id.clone(),
                                message: e.to_string(),
                            },
                        };
                        if !send_frame(&tx, &frame) {
                            break;
                        }
                    }
                }
            }
        });
    }
}

fn subscribe(
    broker: &SharedBroker,
    client_id: &str,
    channel: &str,
    group: Option<&str>,
    target: SubscribeTarget,
) -> Result<(SubscriberId, Forward)> {
    let mut broker = lock(broker)?;
    let subscribed = match target {
        SubscribeTarget::Events => {
            let (id, feed) = broker.subscribe_events(channel, client_id, group)?;
            (id, Forward::Events(feed))
        }
        SubscribeTarget::EventsStore { start } => {
            let (id, feed) = broker.subscribe_events_store(channel, client_id, group, start)?;
            (id, Forward::Events(feed))
        }
        SubscribeTarget::Requests { rpc } => {
            let (id, feed) = broker.subscribe_requests(rpc, channel, client_id, group)?;
            (id, Forward::Requests(feed))
        }
    };
    Ok(subscribed)
}

fn ack(tx: &Outbound, req_id: u64, sequence: Option<u64>) {
    send_frame(tx, &ServerFrame::Ack { req_id, sequence });
}

fn send_frame(tx: &Outbound, frame: &ServerFrame) -> bool {
    match serde_json::to_string(frame) {
        Ok(json) => tx.send(WsMessage::text(json)).is_ok(),
        Err(e) => {
            error!("Failed to serialize frame: {}", e);
            false
        }
    }
}
