use serde::Deserialize;

use crate::config::properties::Properties;

/// Top-level configuration settings for the application.
///
/// Includes the log level, the broker server settings used by the `broker`
/// subcommand and the bindings started by the `run` subcommand.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub log_level: String,
    pub broker: BrokerSettings,
    pub bindings: Vec<BindingSettings>,
}

/// Where the websocket broker listens, and the shared token clients must
/// present.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub auth_token: Option<String>,
}

/// One binding: a broker-facing source feeding a target.
#[derive(Debug, Deserialize, Clone)]
pub struct BindingSettings {
    pub name: String,
    pub source: ComponentSettings,
    pub target: ComponentSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ComponentSettings {
    pub kind: String,
    #[serde(default)]
    pub properties: Properties,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled from
/// defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub log_level: Option<String>,
    pub broker: Option<PartialBrokerSettings>,
    pub bindings: Option<Vec<BindingSettings>>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub auth_token: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            broker: BrokerSettings {
                host: "127.0.0.1".to_string(),
                port: 50000,
                auth_token: None,
            },
            bindings: Vec::new(),
        }
    }
}

impl Settings {
    /// Overlays whatever `partial` specifies on top of the defaults.
    pub fn merge(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let broker = partial.broker.as_ref();
        Settings {
            log_level: partial.log_level.unwrap_or(default.log_level),
            broker: BrokerSettings {
                host: broker
                    .and_then(|b| b.host.clone())
                    .unwrap_or(default.broker.host),
                port: broker.and_then(|b| b.port).unwrap_or(default.broker.port),
                auth_token: broker
                    .and_then(|b| b.auth_token.clone())
                    .or(default.broker.auth_token),
            },
            bindings: partial.bindings.unwrap_or(default.bindings),
        }
    }

    pub fn broker_address(&self) -> String {
        format!("{}:{}", self.broker.host, self.broker.port)
    }
}
