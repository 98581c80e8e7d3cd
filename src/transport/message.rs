use serde::{Deserialize, Serialize};

use crate::broker::{Event, QueueMessage, RpcKind, RpcReply, RpcRequest, StartPosition};

/// What a `subscribe` frame attaches to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubscribeTarget {
    Events,
    EventsStore { start: StartPosition },
    Requests { rpc: RpcKind },
}

/// Frames sent by a client. Every frame carries a `req_id` answered by
/// exactly one `ack`, `subscribed`, `pulled`, `reply` or `error` frame.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "hello")]
    Hello {
        req_id: u64,
        client_id: String,
        token: Option<String>,
    },
    #[serde(rename = "subscribe")]
    Subscribe {
        req_id: u64,
        sub_id: String,
        target: SubscribeTarget,
        channel: String,
        group: Option<String>,
    },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { req_id: u64, sub_id: String },
    #[serde(rename = "send_event")]
    SendEvent { req_id: u64, event: Event },
    #[serde(rename = "send_event_store")]
    SendEventStore { req_id: u64, event: Event },
    #[serde(rename = "send_queue")]
    SendQueue { req_id: u64, message: QueueMessage },
    #[serde(rename = "pull")]
    Pull {
        req_id: u64,
        channel: String,
        max_messages: usize,
        wait_ms: u64,
    },
    #[serde(rename = "request")]
    Request {
        req_id: u64,
        request: RpcRequest,
        timeout_ms: u64,
    },
    #[serde(rename = "respond")]
    Respond { req_id: u64, reply: RpcReply },
    /// Ends the session: pending pulls and requests are abandoned and
    /// subscriptions dropped before the ack is sent.
    #[serde(rename = "disconnect")]
    Disconnect { req_id: u64 },
}

impl ClientFrame {
    pub fn req_id(&self) -> u64 {
        match self {
            ClientFrame::Hello { req_id, .. }
            | ClientFrame::Subscribe { req_id, .. }
            | ClientFrame::Unsubscribe { req_id, .. }
            | ClientFrame::SendEvent { req_id, .. }
            | ClientFrame::SendEventStore { req_id, .. }
            | ClientFrame::SendQueue { req_id, .. }
            | ClientFrame::Pull { req_id, .. }
            | ClientFrame::Request { req_id, .. }
            | ClientFrame::Respond { req_id, .. }
            | ClientFrame::Disconnect { req_id } => *req_id,
        }
    }
}

/// Frames sent by the server.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "ack")]
    Ack { req_id: u64, sequence: Option<u64> },
    #[serde(rename = "subscribed")]
    Subscribed { req_id: u64 },
    #[serde(rename = "pulled")]
    Pulled {
        req_id: u64,
        messages: Vec<QueueMessage>,
    },
    #[serde(rename = "reply")]
    Reply { req_id: u64, reply: RpcReply },
    #[serde(rename = "error")]
    Error { req_id: Option<u64>, message: String },
    #[serde(rename = "event")]
    Event { sub_id: String, event: Event },
    #[serde(rename = "request")]
    Request { sub_id: String, request: RpcRequest },
    #[serde(rename = "subscription_error")]
    SubscriptionError { sub_id: String, message: String },
}
