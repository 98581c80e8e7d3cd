//! # RelayHub
//!
//! `relayhub` is an integration hub: bindings consume a broker channel with
//! one of five delivery patterns (command, query, events, events store,
//! queue), hand every decoded request to a pluggable target, and route the
//! target's response back the way the pattern requires.
//!
//! ## Core Modules
//!
//! - `bindings`: The inbound engine: connection sets, pattern handlers and the binding lifecycle.
//! - `broker`: An in-process broker implementing every channel pattern.
//! - `client`: The broker client and connector traits, plus the in-process client.
//! - `config`: Loads settings from files and the environment.
//! - `envelope`: The `Request`/`Response` wire envelope.
//! - `hub`: Runs every configured binding of the process.
//! - `target`: The `Target` trait and the built-in targets.
//! - `transport`: Serves the broker over WebSocket and dials it as a client.
//! - `utils`: Shared utilities, such as error handling and logging.

pub mod bindings;
pub mod broker;
pub mod client;
pub mod config;
pub mod envelope;
pub mod hub;
pub mod target;
pub mod transport;
pub mod utils;
