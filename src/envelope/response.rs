use std::collections::HashMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::utils::encoding::base64_bytes;
use crate::utils::{Error, Result};

/// Metadata key carrying the failure text for patterns without a native
/// error field (events, events store, queue).
pub const ERROR_KEY: &str = "error";

/// A target's answer to a [`Request`](super::Request).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default, with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a failed response: the message lands in `metadata["error"]`
    /// as well as in the `error` field.
    pub fn from_error(err: impl Display) -> Self {
        Self::new().with_error(err)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_error(mut self, err: impl Display) -> Self {
        let message = err.to_string();
        self.metadata.insert(ERROR_KEY.to_string(), message.clone());
        self.is_error = true;
        self.error = Some(message);
        self
    }

    pub fn error_message(&self) -> Option<&str> {
        self.metadata.get(ERROR_KEY).map(String::as_str)
    }

    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.is_empty() {
            return Err(Error::Decode("empty response body".to_string()));
        }
        serde_json::from_slice(body).map_err(|e| Error::Decode(e.to_string()))
    }

    pub fn marshal(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Encode(e.to_string()))
    }
}
