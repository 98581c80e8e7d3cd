//! The inbound binding engine.
//!
//! A [`Binding`] consumes one broker channel through `sources` parallel
//! connections with one of five delivery patterns and hands every decoded
//! [`Request`](crate::envelope::Request) to a [`Target`](crate::target::Target):
//!
//! - `command` / `query`: correlated RPC, every request gets a reply
//! - `events`: fire-and-forget, responses optionally published
//! - `events-store`: like events, read from a durable sequenced log
//! - `queue`: pulled in batches, failed messages redelivered up to a cap
//!
//! Push patterns dispatch every message on its own task, so a slow target
//! never holds up intake and completion order is not arrival order. The
//! queue pattern processes each batch in order.

mod binding;
mod command;
mod connection;
mod dispatch;
mod events;
mod events_store;
mod identity;
mod options;
mod queue;
mod redelivery;

pub use binding::Binding;
pub use connection::{Connection, ConnectionSet};
pub use identity::{IdentityProvider, RandomIdentity, SequentialIdentity};
pub use options::{BindingOptions, Pattern};
pub use redelivery::{Redelivery, RedeliveryTracker};
