use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::utils::encoding::base64_bytes;
use crate::utils::{Error, Result};

/// A decoded inbound payload handed to a target.
///
/// # Example
///
/// ```rust
/// use relayhub::envelope::Request;
///
/// let request = Request::new()
///     .with_metadata("method", "set")
///     .with_data("some-data");
/// let bytes = request.marshal().unwrap();
/// assert_eq!(Request::parse(&bytes).unwrap(), request);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default, with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an undecoded body: empty metadata, the body as `data`.
    pub fn raw(body: impl Into<Vec<u8>>) -> Self {
        Self {
            metadata: HashMap::new(),
            data: body.into(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.is_empty() {
            return Err(Error::Decode("empty request body".to_string()));
        }
        serde_json::from_slice(body).map_err(|e| Error::Decode(e.to_string()))
    }

    pub fn marshal(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Encode(e.to_string()))
    }
}
