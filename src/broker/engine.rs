//! Broker engine
//!
//! This module contains the in-process broker implementation responsible for:
//! - fanning events out to subscribers, with consumer-group load balancing
//! - keeping an append-only events-store log per channel and replaying it
//!   from the position a subscriber asks for
//! - routing command/query requests to exactly one responder and completing
//!   the caller once the correlated reply arrives
//! - holding pull queues and waking long-polling consumers
//!
//! Concurrency and usage notes:
//! - The public API here is synchronous and designed to be held behind a
//!   lock (`SharedBroker`). The async helpers (`pull`, `request`) take the
//!   lock only to mutate state and never hold it while waiting.
//! - Subscribers receive items through unbounded channels; a dropped
//!   receiver is pruned on the next delivery to its channel.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Notify, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::broker::message::{Event, QueueMessage, RpcKind, RpcReply, RpcRequest, StartPosition};
use crate::broker::topic::{Subscriber, SubscriberId, Topic};
use crate::utils::{Error, Result};

pub type SharedBroker = Arc<Mutex<Broker>>;

pub type Feed<T> = mpsc::UnboundedReceiver<Result<T>>;

/// Locks the broker, mapping a poisoned lock to a broker error.
pub fn lock(broker: &SharedBroker) -> Result<MutexGuard<'_, Broker>> {
    broker
        .lock()
        .map_err(|_| Error::broker("broker lock poisoned"))
}

#[derive(Debug)]
pub struct EventLog {
    pub records: Vec<Event>,
    pub topic: Topic<Event>,
}

#[derive(Debug, Default)]
pub struct Queue {
    pub messages: VecDeque<QueueMessage>,
    notify: Arc<Notify>,
}

#[derive(Debug)]
struct PendingRequest {
    client_id: String,
    reply: oneshot::Sender<RpcReply>,
}

#[derive(Debug, Default)]
pub struct Broker {
    pub topics: HashMap<String, Topic<Event>>,
    pub stores: HashMap<String, EventLog>,
    pub commands: HashMap<String, Topic<RpcRequest>>,
    pub queries: HashMap<String, Topic<RpcRequest>>,
    pub queues: HashMap<String, Queue>,
    pending: HashMap<String, PendingRequest>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedBroker {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Subscribes to transient events on `channel`.
    pub fn subscribe_events(
        &mut self,
        channel: &str,
        client_id: &str,
        group: Option<&str>,
    ) -> Result<(SubscriberId, Feed<Event>)> {
        require_channel(channel)?;
        let (subscriber, feed) = new_subscriber(client_id, group);
        let id = subscriber.id.clone();
        self.topics
            .entry(channel.to_string())
            .or_insert_with(|| Topic::new(channel))
            .subscribe(subscriber);
        debug!(channel, client_id, subscriber = %id, "events subscription added");
        Ok((id, feed))
    }

    /// Subscribes to the events-store log on `channel`, replaying the
    /// records selected by `start` before following live appends.
    ///
    /// A group that already has members shares their cursor, so a newly
    /// joined member does not replay history.
    pub fn subscribe_events_store(
        &mut self,
        channel: &str,
        client_id: &str,
        group: Option<&str>,
        start: StartPosition,
    ) -> Result<(SubscriberId, Feed<Event>)> {
        require_channel(channel)?;
        let (subscriber, feed) = new_subscriber(client_id, group);
        let id = subscriber.id.clone();
        let log = self
            .stores
            .entry(channel.to_string())
            .or_insert_with(|| EventLog {
                records: Vec::new(),
                topic: Topic::new(channel),
            });

        let joins_existing_group = group.is_some_and(|g| log.topic.has_group_members(g));
        if !joins_existing_group {
            let from = match start {
                StartPosition::New => None,
                StartPosition::First => Some(1),
                StartPosition::Sequence(sequence) => Some(sequence.max(1)),
            };
            if let Some(from) = from {
                for record in log.records.iter().filter(|r| r.sequence >= from) {
                    let _ = subscriber.sender.send(Ok(record.clone()));
                }
            }
        }

        log.topic.subscribe(subscriber);
        debug!(channel, client_id, subscriber = %id, ?start, "events-store subscription added");
        Ok((id, feed))
    }

    /// Registers a command or query responder on `channel`.
    pub fn subscribe_requests(
        &mut self,
        kind: RpcKind,
        channel: &str,
        client_id: &str,
        group: Option<&str>,
    ) -> Result<(SubscriberId, Feed<RpcRequest>)> {
        require_channel(channel)?;
        let (subscriber, feed) = new_subscriber(client_id, group);
        let id = subscriber.id.clone();
        self.responders(kind)
            .entry(channel.to_string())
            .or_insert_with(|| Topic::new(channel))
            .subscribe(subscriber);
        debug!(channel, client_id, subscriber = %id, ?kind, "responder added");
        Ok((id, feed))
    }

    /// Removes one subscription, whatever channel pattern it belongs to.
    pub fn unsubscribe(&mut self, subscriber: &str) {
        for topic in self.topics.values_mut() {
            topic.unsubscribe(subscriber);
        }
        for log in self.stores.values_mut() {
            log.topic.unsubscribe(subscriber);
        }
        for topic in self.commands.values_mut().chain(self.queries.values_mut()) {
            topic.unsubscribe(subscriber);
        }
    }

    /// Publishes a transient event. Events on a channel nobody listens to
    /// are dropped.
    pub fn publish_event(&mut self, mut event: Event) -> Result<usize> {
        require_channel(&event.channel)?;
        event.timestamp = chrono::Utc::now().timestamp_millis();
        match self.topics.get_mut(&event.channel) {
            Some(topic) => Ok(topic.fan_out(&event)),
            None => {
                debug!(channel = %event.channel, "no subscribers, event dropped");
                Ok(0)
            }
        }
    }

    /// Appends an event to the channel's log and returns its sequence.
    pub fn publish_event_store(&mut self, mut event: Event) -> Result<u64> {
        require_channel(&event.channel)?;
        let log = self
            .stores
            .entry(event.channel.clone())
            .or_insert_with(|| EventLog {
                records: Vec::new(),
                topic: Topic::new(&event.channel),
            });
        event.sequence = log.records.len() as u64 + 1;
        event.timestamp = chrono::Utc::now().timestamp_millis();
        log.topic.fan_out(&event);
        let sequence = event.sequence;
        log.records.push(event);
        Ok(sequence)
    }

    pub fn enqueue(&mut self, message: QueueMessage) -> Result<()> {
        require_channel(&message.channel)?;
        let queue = self.queues.entry(message.channel.clone()).or_default();
        queue.messages.push_back(message);
        queue.notify.notify_waiters();
        queue.notify.notify_one();
        Ok(())
    }

    /// Takes up to `max` messages from the head of the queue.
    pub fn take_batch(&mut self, channel: &str, max: usize, client_id: &str) -> Vec<QueueMessage> {
        let Some(queue) = self.queues.get_mut(channel) else {
            return Vec::new();
        };
        let count = max.min(queue.messages.len());
        queue
            .messages
            .drain(..count)
            .map(|mut message| {
                message.receive_count += 1;
                message.client_id = client_id.to_string();
                message
            })
            .collect()
    }

    pub fn queue_depth(&self, channel: &str) -> usize {
        self.queues.get(channel).map_or(0, |q| q.messages.len())
    }

    fn queue_notify(&mut self, channel: &str) -> Arc<Notify> {
        self.queues
            .entry(channel.to_string())
            .or_default()
            .notify
            .clone()
    }

    /// Completes the pending request addressed by `reply.request_id`.
    pub fn respond(&mut self, reply: RpcReply) -> Result<()> {
        let pending = self
            .pending
            .remove(&reply.request_id)
            .ok_or_else(|| Error::broker(format!("unknown request id {}", reply.request_id)))?;
        if pending.reply.send(reply).is_err() {
            warn!(client_id = %pending.client_id, "requester went away before the reply arrived");
        }
        Ok(())
    }

    /// Cleans up a client by removing every subscription it holds.
    pub fn cleanup_client(&mut self, client_id: &str) {
        for topic in self.topics.values_mut() {
            topic.remove_client(client_id);
        }
        for log in self.stores.values_mut() {
            log.topic.remove_client(client_id);
        }
        for topic in self.commands.values_mut().chain(self.queries.values_mut()) {
            topic.remove_client(client_id);
        }
        self.pending.retain(|_, p| p.client_id != client_id);
        debug!(client_id, "client cleaned up");
    }

    /// Long-polls `channel` for up to `max` messages, waiting at most `wait`
    /// for the first one. Returns an empty batch at the deadline.
    pub async fn pull(
        broker: &SharedBroker,
        channel: &str,
        max: usize,
        wait: Duration,
        client_id: &str,
    ) -> Result<Vec<QueueMessage>> {
        require_channel(channel)?;
        let deadline = Instant::now() + wait;
        loop {
            let notify = {
                let mut guard = lock(broker)?;
                let batch = guard.take_batch(channel, max, client_id);
                if !batch.is_empty() {
                    return Ok(batch);
                }
                guard.queue_notify(channel)
            };

            if tokio::time::timeout_at(deadline, notify.notified())
                .await
                .is_err()
            {
                return Ok(lock(broker)?.take_batch(channel, max, client_id));
            }
        }
    }

    /// Sends a command or query to one responder and waits for its reply.
    pub async fn request(
        broker: &SharedBroker,
        mut request: RpcRequest,
        timeout: Duration,
    ) -> Result<RpcReply> {
        require_channel(&request.channel)?;
        if request.id.is_empty() {
            request.id = Uuid::new_v4().to_string();
        }
        request.reply_to = format!("_reply.{}", request.id);
        let request_id = request.id.clone();

        let rx = {
            let mut guard = lock(broker)?;
            let (tx, rx) = oneshot::channel();
            guard.pending.insert(
                request_id.clone(),
                PendingRequest {
                    client_id: request.client_id.clone(),
                    reply: tx,
                },
            );
            let channel = request.channel.clone();
            let routed = guard
                .responders(request.kind)
                .get_mut(&channel)
                .and_then(|topic| topic.route_one(request))
                .is_some();
            if !routed {
                guard.pending.remove(&request_id);
                return Err(Error::broker(format!("no responders on channel {channel}")));
            }
            rx
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => {
                lock(broker)?.pending.remove(&request_id);
                Err(Error::Timeout(timeout))
            }
        }
    }

    fn responders(&mut self, kind: RpcKind) -> &mut HashMap<String, Topic<RpcRequest>> {
        match kind {
            RpcKind::Command => &mut self.commands,
            RpcKind::Query => &mut self.queries,
        }
    }
}

fn require_channel(channel: &str) -> Result<()> {
    if channel.trim().is_empty() {
        return Err(Error::broker("channel name is required"));
    }
    Ok(())
}

fn new_subscriber<T>(client_id: &str, group: Option<&str>) -> (Subscriber<T>, Feed<T>) {
    let (sender, feed) = mpsc::unbounded_channel();
    let subscriber = Subscriber {
        id: Uuid::new_v4().to_string(),
        client_id: client_id.to_string(),
        group: group.filter(|g| !g.is_empty()).map(str::to_string),
        sender,
    };
    (subscriber, feed)
}
