use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::utils::{Error, Result};

/// Free-form string properties of a binding source or target, read
/// through typed, range-checked accessors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(HashMap<String, String>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// The trimmed value of `key`, treating blank values as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn parse_string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    pub fn parse_optional(&self, key: &str) -> Option<String> {
        self.get(key).map(str::to_string)
    }

    pub fn must_parse_string(&self, key: &str) -> Result<String> {
        self.parse_optional(key)
            .ok_or_else(|| Error::invalid(format!("{key} is required")))
    }

    pub fn parse_int_with_range(&self, key: &str, default: i64, min: i64, max: i64) -> Result<i64> {
        let value = match self.get(key) {
            None => default,
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| Error::invalid(format!("{key} must be an integer, got '{raw}'")))?,
        };
        if value < min || value > max {
            return Err(Error::invalid(format!(
                "{key} must be between {min} and {max}, got {value}"
            )));
        }
        Ok(value)
    }

    pub fn parse_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key).map(str::to_lowercase).as_deref() {
            None => Ok(default),
            Some("true") | Some("1") | Some("yes") => Ok(true),
            Some("false") | Some("0") | Some("no") => Ok(false),
            Some(other) => Err(Error::invalid(format!(
                "{key} must be a boolean, got '{other}'"
            ))),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
