//! The `error` module defines the error type used across `relayhub`.
//!
//! Errors fall into three families:
//! - configuration-fatal (`InvalidOptions`, `InvalidTarget`, `Config`): returned
//!   synchronously while a binding is initialised, the binding never starts
//! - connection-fatal (`Connect`, `Broker`, `Closed`): end the loop of the
//!   connection that observed them, siblings keep running
//! - per-message (`Decode`, `Target`, `Cancelled`, `Timeout`): embedded in the
//!   reply or response of the message that caused them

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("invalid target")]
    InvalidTarget,

    #[error("failed to connect client {client_id}: {reason}")]
    Connect { client_id: String, reason: String },

    #[error("broker error: {0}")]
    Broker(String),

    #[error("connection closed")]
    Closed,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    /// Failure reported by a target. Displays the target's message verbatim
    /// so it can be forwarded unchanged in `metadata["error"]`.
    #[error("{0}")]
    Target(String),

    #[error("cancelled")]
    Cancelled,

    #[error("binding {0}")]
    Lifecycle(&'static str),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

impl Error {
    pub fn target(message: impl Into<String>) -> Self {
        Error::Target(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidOptions(message.into())
    }

    pub fn broker(message: impl Into<String>) -> Self {
        Error::Broker(message.into())
    }
}
