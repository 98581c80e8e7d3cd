//! Configuration loading.
//!
//! Settings come from an optional `config/default.{toml,yaml,json}` file,
//! overridden by `RELAYHUB_`-prefixed environment variables using `__` as
//! the nesting separator (`RELAYHUB_BROKER__PORT=9000`).

mod properties;
mod settings;

use config::{Config, Environment, File};

use crate::utils::Result;

pub use properties::Properties;
pub use settings::{
    BindingSettings, BrokerSettings, ComponentSettings, PartialBrokerSettings, PartialSettings,
    Settings,
};

/// Loads the configuration from the default file and environment variables
/// and merges it with default values.
pub fn load_config() -> Result<Settings> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("RELAYHUB")
                .prefix_separator("_")
                .separator("__"),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    Ok(Settings::merge(partial))
}

#[cfg(test)]
mod tests;
