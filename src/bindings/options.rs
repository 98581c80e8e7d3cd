use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::broker::{RpcKind, StartPosition};
use crate::client::ReconnectPolicy;
use crate::config::Properties;
use crate::utils::{Error, Result};

/// The delivery semantics a binding consumes its channel with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pattern {
    Command,
    Query,
    Events,
    EventsStore,
    Queue,
}

impl Pattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pattern::Command => "command",
            Pattern::Query => "query",
            Pattern::Events => "events",
            Pattern::EventsStore => "events-store",
            Pattern::Queue => "queue",
        }
    }

    /// The RPC flavour for command and query bindings.
    pub fn rpc_kind(&self) -> Option<RpcKind> {
        match self {
            Pattern::Command => Some(RpcKind::Command),
            Pattern::Query => Some(RpcKind::Query),
            _ => None,
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "command" => Ok(Pattern::Command),
            "query" => Ok(Pattern::Query),
            "events" => Ok(Pattern::Events),
            "events-store" | "events_store" => Ok(Pattern::EventsStore),
            "queue" => Ok(Pattern::Queue),
            other => Err(Error::invalid(format!("unknown source kind '{other}'"))),
        }
    }
}

/// Immutable options of one binding, derived once from its source
/// properties and validated before any connection is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingOptions {
    pub name: String,
    pub pattern: Pattern,
    pub address: String,
    /// Base client id; generated by the identity provider when absent.
    pub client_id: Option<String>,
    pub auth_token: Option<String>,
    pub channel: String,
    pub group: Option<String>,
    pub sources: usize,
    pub reconnect: ReconnectPolicy,
    pub response_channel: Option<String>,
    pub batch_size: usize,
    pub wait_timeout: Duration,
    pub max_redeliver: u32,
    pub skip_decode: bool,
    pub start_from: StartPosition,
    pub shutdown_timeout: Duration,
}

impl BindingOptions {
    /// Options with every optional field at its default.
    pub fn new(
        name: impl Into<String>,
        pattern: Pattern,
        address: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            pattern,
            address: address.into(),
            client_id: None,
            auth_token: None,
            channel: channel.into(),
            group: None,
            sources: 1,
            reconnect: ReconnectPolicy::default(),
            response_channel: None,
            batch_size: 1,
            wait_timeout: Duration::from_secs(60),
            max_redeliver: 3,
            skip_decode: false,
            start_from: StartPosition::New,
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    /// Reads and validates the options of a binding whose source is of
    /// kind `pattern`.
    pub fn parse(name: &str, pattern: &str, properties: &Properties) -> Result<Self> {
        let pattern: Pattern = pattern.parse()?;
        let mut options = Self::new(
            name,
            pattern,
            properties.must_parse_string("address")?,
            properties.must_parse_string("channel")?,
        );

        options.client_id = properties.parse_optional("client_id");
        options.auth_token = properties.parse_optional("auth_token");
        options.group = properties.parse_optional("group");
        options.sources = properties.parse_int_with_range("sources", 1, 1, 1024)? as usize;
        options.reconnect = ReconnectPolicy {
            enabled: properties.parse_bool("auto_reconnect", true)?,
            max_attempts: properties.parse_int_with_range("max_reconnects", 0, 0, 1_000_000)?
                as u32,
            interval: seconds(properties.parse_int_with_range(
                "reconnect_interval_seconds",
                5,
                1,
                3600,
            )?),
        };
        options.shutdown_timeout = seconds(properties.parse_int_with_range(
            "shutdown_timeout_seconds",
            5,
            0,
            3600,
        )?);

        match pattern {
            Pattern::Command | Pattern::Query => {
                options.skip_decode = properties.parse_bool("do_not_parse_payload", false)?;
            }
            Pattern::Events => {
                options.response_channel = properties.parse_optional("response_channel");
            }
            Pattern::EventsStore => {
                options.response_channel = properties.parse_optional("response_channel");
                options.start_from =
                    parse_start_position(&properties.parse_string("start_from", "new"))?;
            }
            Pattern::Queue => {
                options.response_channel = properties.parse_optional("response_channel");
                options.batch_size =
                    properties.parse_int_with_range("batch_size", 1, 1, 1024)? as usize;
                options.wait_timeout =
                    seconds(properties.parse_int_with_range("wait_timeout", 60, 1, 86_400)?);
                options.max_redeliver =
                    properties.parse_int_with_range("max_redeliver", 3, 0, 1024)? as u32;
            }
        }

        options.validate()?;
        Ok(options)
    }

    /// Checks the invariants `parse` guarantees, for options built by hand.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid("binding name is required"));
        }
        validate_address(&self.address)?;
        if self.channel.trim().is_empty() {
            return Err(Error::invalid("channel is required"));
        }
        if !(1..=1024).contains(&self.sources) {
            return Err(Error::invalid(format!(
                "sources must be between 1 and 1024, got {}",
                self.sources
            )));
        }
        if !(1..=1024).contains(&self.batch_size) {
            return Err(Error::invalid(format!(
                "batch_size must be between 1 and 1024, got {}",
                self.batch_size
            )));
        }
        if self.wait_timeout.is_zero() || self.wait_timeout > Duration::from_secs(86_400) {
            return Err(Error::invalid("wait_timeout must be between 1 and 86400 seconds"));
        }
        if self.reconnect.interval.is_zero() {
            return Err(Error::invalid("reconnect interval must be positive"));
        }
        if self.response_channel.as_deref() == Some(self.channel.as_str()) {
            return Err(Error::invalid(
                "response_channel must differ from the source channel",
            ));
        }
        Ok(())
    }

    /// Consumer group for `sources` connections: the configured group, or
    /// `generated` when several connections must share one.
    pub fn resolve_group(&self, generated: impl FnOnce() -> String) -> Option<String> {
        match &self.group {
            Some(group) => Some(group.clone()),
            None if self.sources > 1 => Some(generated()),
            None => None,
        }
    }
}

fn seconds(value: i64) -> Duration {
    Duration::from_secs(value.max(0) as u64)
}

fn validate_address(address: &str) -> Result<()> {
    let (host, port) = address
        .trim()
        .rsplit_once(':')
        .ok_or_else(|| Error::invalid(format!("address '{address}' must be host:port")))?;
    if host.is_empty() {
        return Err(Error::invalid(format!("address '{address}' has no host")));
    }
    match port.parse::<u16>() {
        Ok(p) if p > 0 => Ok(()),
        _ => Err(Error::invalid(format!(
            "address '{address}' has an invalid port"
        ))),
    }
}

fn parse_start_position(raw: &str) -> Result<StartPosition> {
    match raw.to_lowercase().as_str() {
        "new" => Ok(StartPosition::New),
        "first" => Ok(StartPosition::First),
        other => {
            let sequence = other
                .strip_prefix("sequence:")
                .and_then(|n| n.trim().parse::<u64>().ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| Error::invalid(format!("invalid start_from '{raw}'")))?;
            Ok(StartPosition::Sequence(sequence))
        }
    }
}
