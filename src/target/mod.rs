//! Targets: the downstream side a binding hands every decoded request to.
//!
//! Outbound adapters implement [`Target`]. Two are built in: [`Echo`] and
//! the in-memory [`Cache`]. [`build`] maps a configured target kind to an
//! instance.

mod cache;
mod echo;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::Properties;
use crate::envelope::{Request, Response};
use crate::utils::{Error, Result};

pub use cache::{Cache, CacheMethod};
pub use echo::Echo;

/// Turns a [`Request`] into a [`Response`].
///
/// Bindings call `call` concurrently from many per-message tasks. A
/// returned error is a per-message failure: it is embedded in the reply or
/// response of that message and never stops the binding.
///
/// `ctx` is cancelled when the binding stops. In-flight calls are then
/// dropped at their next await point; work a target hands off elsewhere
/// should watch `ctx` to wind down with it.
#[async_trait]
pub trait Target: Send + Sync {
    async fn call(&self, ctx: &CancellationToken, request: Request) -> Result<Response>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Echo,
    Cache,
}

impl FromStr for TargetKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "echo" => Ok(TargetKind::Echo),
            "cache" => Ok(TargetKind::Cache),
            other => Err(Error::invalid(format!("unknown target kind '{other}'"))),
        }
    }
}

/// Builds the target configured as `kind` with `properties`.
pub fn build(kind: &str, properties: &Properties) -> Result<Arc<dyn Target>> {
    let target: Arc<dyn Target> = match kind.parse::<TargetKind>()? {
        TargetKind::Echo => Arc::new(Echo::from_properties(properties)?),
        TargetKind::Cache => Arc::new(Cache::new()),
    };
    Ok(target)
}

#[cfg(test)]
mod tests;
