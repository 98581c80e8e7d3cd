//! Request/response envelopes exchanged between the broker and targets.
//!
//! Every inbound payload is a JSON document of the form
//! `{"metadata": {...}, "data": "<base64>"}`. Targets receive a decoded
//! [`Request`] and answer with a [`Response`]; how a failed response travels
//! back to the broker depends on the channel pattern (see `bindings`).

mod request;
mod response;

pub use request::Request;
pub use response::{ERROR_KEY, Response};
