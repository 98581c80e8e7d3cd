use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::Properties;
use crate::envelope::{Request, Response};
use crate::target::Target;
use crate::utils::{Error, Result};

/// Answers every request with its own metadata and data, optionally after
/// a fixed delay.
#[derive(Debug, Clone, Default)]
pub struct Echo {
    delay: Duration,
}

impl Echo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn from_properties(properties: &Properties) -> Result<Self> {
        let delay_ms = properties.parse_int_with_range("delay_ms", 0, 0, 3_600_000)?;
        Ok(Self::with_delay(Duration::from_millis(delay_ms as u64)))
    }
}

#[async_trait]
impl Target for Echo {
    async fn call(&self, ctx: &CancellationToken, request: Request) -> Result<Response> {
        if !self.delay.is_zero() {
            tokio::select! {
                _ = ctx.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
        Ok(Response {
            metadata: request.metadata,
            data: request.data,
            ..Response::default()
        })
    }
}
