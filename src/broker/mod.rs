//! The in-process broker.
//!
//! It implements the five channel patterns the bindings consume (events,
//! events store, commands, queries and queues) so bindings can run against
//! it directly through [`MemoryConnector`](crate::client::MemoryConnector)
//! or remotely through the websocket [`transport`](crate::transport).

pub mod engine;
pub mod message;
pub mod topic;

pub use engine::{Broker, Feed, SharedBroker, lock};
pub use message::{Event, QueueMessage, RpcKind, RpcReply, RpcRequest, StartPosition};
