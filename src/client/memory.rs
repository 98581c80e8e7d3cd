//! Broker client bound to an in-process broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::broker::{
    Broker, Event, QueueMessage, RpcKind, RpcReply, RpcRequest, SharedBroker, StartPosition, lock,
};
use crate::client::broker_client::{
    BrokerClient, ChannelSubscription, ClientOptions, Connector, Subscription,
};
use crate::utils::{Error, Result};

/// Opens [`MemoryClient`]s on a shared broker. The address in
/// [`ClientOptions`] is ignored; the auth token is checked when the
/// connector was built with one.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    broker: SharedBroker,
    auth_token: Option<String>,
}

impl MemoryConnector {
    pub fn new(broker: SharedBroker) -> Self {
        Self {
            broker,
            auth_token: None,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn broker(&self) -> &SharedBroker {
        &self.broker
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, options: &ClientOptions) -> Result<Arc<dyn BrokerClient>> {
        if let Some(expected) = &self.auth_token {
            if options.auth_token.as_deref() != Some(expected.as_str()) {
                return Err(Error::Connect {
                    client_id: options.client_id.clone(),
                    reason: "invalid auth token".to_string(),
                });
            }
        }
        Ok(Arc::new(MemoryClient::new(
            self.broker.clone(),
            &options.client_id,
        )))
    }
}

#[derive(Debug)]
pub struct MemoryClient {
    client_id: String,
    broker: SharedBroker,
    closed: AtomicBool,
}

impl MemoryClient {
    pub fn new(broker: SharedBroker, client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            broker,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerClient for MemoryClient {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn subscribe_events(&self, sub: ChannelSubscription) -> Result<Subscription<Event>> {
        self.ensure_open()?;
        let (id, feed) = lock(&self.broker)?.subscribe_events(
            &sub.channel,
            &self.client_id,
            sub.group.as_deref(),
        )?;
        Ok(Subscription::new(id, feed))
    }

    async fn subscribe_events_store(
        &self,
        sub: ChannelSubscription,
        start: StartPosition,
    ) -> Result<Subscription<Event>> {
        self.ensure_open()?;
        let (id, feed) = lock(&self.broker)?.subscribe_events_store(
            &sub.channel,
            &self.client_id,
            sub.group.as_deref(),
            start,
        )?;
        Ok(Subscription::new(id, feed))
    }

    async fn subscribe_requests(
        &self,
        kind: RpcKind,
        sub: ChannelSubscription,
    ) -> Result<Subscription<RpcRequest>> {
        self.ensure_open()?;
        let (id, feed) = lock(&self.broker)?.subscribe_requests(
            kind,
            &sub.channel,
            &self.client_id,
            sub.group.as_deref(),
        )?;
        Ok(Subscription::new(id, feed))
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.ensure_open()?;
        lock(&self.broker)?.unsubscribe(subscription_id);
        Ok(())
    }

    async fn send_event(&self, event: Event) -> Result<()> {
        self.ensure_open()?;
        let event = event.with_client_id(self.client_id.as_str());
        lock(&self.broker)?.publish_event(event)?;
        Ok(())
    }

    async fn send_event_store(&self, event: Event) -> Result<u64> {
        self.ensure_open()?;
        let event = event.with_client_id(self.client_id.as_str());
        lock(&self.broker)?.publish_event_store(event)
    }

    async fn send_queue(&self, mut message: QueueMessage) -> Result<()> {
        self.ensure_open()?;
        message.client_id = self.client_id.clone();
        lock(&self.broker)?.enqueue(message)
    }

    async fn pull_queue(
        &self,
        channel: &str,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>> {
        self.ensure_open()?;
        Broker::pull(&self.broker, channel, max_messages, wait, &self.client_id).await
    }

    async fn send_request(&self, mut request: RpcRequest, timeout: Duration) -> Result<RpcReply> {
        self.ensure_open()?;
        request.client_id = self.client_id.clone();
        Broker::request(&self.broker, request, timeout).await
    }

    async fn send_response(&self, reply: RpcReply) -> Result<()> {
        self.ensure_open()?;
        lock(&self.broker)?.respond(reply)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        lock(&self.broker)?.cleanup_client(&self.client_id);
        debug!(client_id = %self.client_id, "memory client closed");
        Ok(())
    }
}
