//! Wire types exchanged with the broker.
//!
//! These are the broker-native frames, distinct from the
//! [`envelope`](crate::envelope) carried in their `body`:
//! - `Event`: a fire-and-forget or events-store record; `sequence` is only
//!   set for events-store records (starting at 1)
//! - `RpcRequest` / `RpcReply`: correlated command/query traffic; the reply
//!   is addressed by `request_id` and `reply_to` from the request
//! - `QueueMessage`: a pull-queue entry; `receive_count` grows every time
//!   the message is handed to a consumer

use serde::{Deserialize, Serialize};

use crate::utils::encoding::base64_bytes;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub channel: String,
    #[serde(default)]
    pub metadata: String,
    #[serde(default, with = "base64_bytes")]
    pub body: Vec<u8>,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub timestamp: i64,
}

impl Event {
    pub fn new(channel: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel: channel.into(),
            metadata: String::new(),
            body: body.into(),
            client_id: String::new(),
            sequence: 0,
            timestamp: 0,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcKind {
    Command,
    Query,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: String,
    pub kind: RpcKind,
    pub channel: String,
    #[serde(default)]
    pub metadata: String,
    #[serde(default, with = "base64_bytes")]
    pub body: Vec<u8>,
    #[serde(default)]
    pub reply_to: String,
    #[serde(default)]
    pub client_id: String,
}

impl RpcRequest {
    pub fn new(kind: RpcKind, channel: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            channel: channel.into(),
            metadata: String::new(),
            body: body.into(),
            reply_to: String::new(),
            client_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcReply {
    pub request_id: String,
    pub reply_to: String,
    #[serde(default)]
    pub client_id: String,
    pub executed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, with = "base64_bytes")]
    pub body: Vec<u8>,
    #[serde(default)]
    pub timestamp: i64,
}

impl RpcReply {
    /// Starts a reply correlated with `request`.
    pub fn to(request: &RpcRequest, responder: impl Into<String>) -> Self {
        Self {
            request_id: request.id.clone(),
            reply_to: request.reply_to.clone(),
            client_id: responder.into(),
            executed: false,
            error: None,
            body: Vec::new(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.executed = true;
        self.error = None;
        self.body = body;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.executed = false;
        self.error = Some(error.into());
        self.body.clear();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: String,
    pub channel: String,
    #[serde(default)]
    pub metadata: String,
    #[serde(default, with = "base64_bytes")]
    pub body: Vec<u8>,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub receive_count: u32,
}

impl QueueMessage {
    pub fn new(channel: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel: channel.into(),
            metadata: String::new(),
            body: body.into(),
            client_id: String::new(),
            receive_count: 0,
        }
    }
}

/// Where an events-store subscription begins reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPosition {
    /// Only records stored after the subscription was made.
    #[default]
    New,
    /// Replay the whole log.
    First,
    /// Replay from this sequence number (inclusive).
    Sequence(u64),
}
