use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::broker::{Event, QueueMessage, RpcKind, RpcReply, RpcRequest, StartPosition};
use crate::utils::Result;

/// Broker-client reconnect behaviour. Reconnecting is the client's job; the
/// bindings never retry a failed connection themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    /// Maximum reconnect attempts, `0` meaning unlimited.
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 0,
            interval: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `attempts` failed ones.
    pub fn allows(&self, attempts: u32) -> bool {
        self.enabled && (self.max_attempts == 0 || attempts <= self.max_attempts)
    }
}

/// Everything needed to open one broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub address: String,
    pub client_id: String,
    pub auth_token: Option<String>,
    pub reconnect: ReconnectPolicy,
}

/// Channel plus optional consumer group to subscribe with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSubscription {
    pub channel: String,
    pub group: Option<String>,
}

impl ChannelSubscription {
    pub fn new(channel: impl Into<String>, group: Option<&str>) -> Self {
        Self {
            channel: channel.into(),
            group: group.filter(|g| !g.is_empty()).map(str::to_string),
        }
    }
}

/// A live subscription. `Ok` items are messages, an `Err` item is a
/// subscription error reported by the broker, and `None` means the
/// subscription ended.
#[derive(Debug)]
pub struct Subscription<T> {
    pub id: String,
    feed: mpsc::UnboundedReceiver<Result<T>>,
}

impl<T> Subscription<T> {
    pub fn new(id: impl Into<String>, feed: mpsc::UnboundedReceiver<Result<T>>) -> Self {
        Self {
            id: id.into(),
            feed,
        }
    }

    pub async fn next(&mut self) -> Option<Result<T>> {
        self.feed.recv().await
    }
}

/// One connection to a broker.
///
/// Implementations must be safe to share between the loop task of a
/// connection and the per-message tasks it spawns.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    fn client_id(&self) -> &str;

    async fn subscribe_events(&self, sub: ChannelSubscription) -> Result<Subscription<Event>>;

    async fn subscribe_events_store(
        &self,
        sub: ChannelSubscription,
        start: StartPosition,
    ) -> Result<Subscription<Event>>;

    async fn subscribe_requests(
        &self,
        kind: RpcKind,
        sub: ChannelSubscription,
    ) -> Result<Subscription<RpcRequest>>;

    /// Ends the subscription with the given [`Subscription::id`]; its feed
    /// closes once the broker has dropped it.
    async fn unsubscribe(&self, subscription_id: &str) -> Result<()>;

    async fn send_event(&self, event: Event) -> Result<()>;

    /// Appends to an events-store channel, returning the stored sequence.
    async fn send_event_store(&self, event: Event) -> Result<u64>;

    async fn send_queue(&self, message: QueueMessage) -> Result<()>;

    /// Pulls up to `max_messages`, waiting at most `wait` when the queue is
    /// empty. An empty batch is not an error.
    async fn pull_queue(
        &self,
        channel: &str,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>>;

    /// Caller side of command/query: sends and waits for the reply.
    async fn send_request(&self, request: RpcRequest, timeout: Duration) -> Result<RpcReply>;

    /// Responder side of command/query.
    async fn send_response(&self, reply: RpcReply) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, options: &ClientOptions) -> Result<Arc<dyn BrokerClient>>;
}
