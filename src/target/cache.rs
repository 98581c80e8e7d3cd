use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::envelope::{Request, Response};
use crate::target::Target;
use crate::utils::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMethod {
    Get,
    Set,
    Delete,
}

impl FromStr for CacheMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "get" => Ok(CacheMethod::Get),
            "set" => Ok(CacheMethod::Set),
            "delete" => Ok(CacheMethod::Delete),
            other => Err(Error::target(format!("invalid method type: {other}"))),
        }
    }
}

/// In-memory key/value target.
///
/// The method comes from `metadata["method"]` and the key from
/// `metadata["key"]`; `set` stores the request data.
#[derive(Debug, Default)]
pub struct Cache {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl Target for Cache {
    async fn call(&self, _ctx: &CancellationToken, request: Request) -> Result<Response> {
        let method: CacheMethod = request
            .metadata_value("method")
            .ok_or_else(|| Error::target("missing method"))?
            .parse()?;
        let key = request
            .metadata_value("key")
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::target("missing key"))?
            .to_string();

        match method {
            CacheMethod::Get => {
                let entries = self.entries.read().await;
                let data = entries
                    .get(&key)
                    .ok_or_else(|| Error::target(format!("key {key} not found")))?;
                Ok(Response::new()
                    .with_metadata("key", key.as_str())
                    .with_data(data.clone()))
            }
            CacheMethod::Set => {
                self.entries
                    .write()
                    .await
                    .insert(key.clone(), request.data);
                Ok(Response::new()
                    .with_metadata("key", key)
                    .with_metadata("result", "ok"))
            }
            CacheMethod::Delete => {
                self.entries.write().await.remove(&key);
                Ok(Response::new()
                    .with_metadata("key", key)
                    .with_metadata("result", "ok"))
            }
        }
    }
}
