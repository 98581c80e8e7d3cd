//! The `transport` module exposes the in-process broker over WebSockets
//! and provides the matching broker client.
//!
//! It defines the JSON frame protocol used between clients and the server,
//! the server loop that maps frames to broker operations, and
//! [`WsClient`], a [`BrokerClient`](crate::client::BrokerClient) that
//! multiplexes every subscription and call of one connection over a single
//! socket.

pub mod client;
pub mod message;
pub mod websocket;

pub use client::{WsClient, WsConnector};
pub use message::{ClientFrame, ServerFrame, SubscribeTarget};
pub use websocket::{serve, start_websocket_server};

#[cfg(test)]
mod tests;
