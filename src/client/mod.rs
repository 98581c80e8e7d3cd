//! The `client` module defines how bindings talk to a broker.
//!
//! A [`BrokerClient`] is one broker connection with its own client identity.
//! A [`Connector`] opens such connections from [`ClientOptions`]. Two
//! implementations ship with the crate: [`MemoryConnector`] binds to an
//! in-process [`Broker`](crate::broker::Broker) and
//! [`WsConnector`](crate::transport::WsConnector) dials a broker served over
//! websocket.

pub mod broker_client;
pub mod memory;

pub use broker_client::{
    BrokerClient, ChannelSubscription, ClientOptions, Connector, ReconnectPolicy, Subscription,
};
pub use memory::{MemoryClient, MemoryConnector};

#[cfg(test)]
mod tests;
