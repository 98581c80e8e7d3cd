//! The hub runs every configured binding of the process.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::bindings::{Binding, BindingOptions, IdentityProvider};
use crate::client::Connector;
use crate::config::BindingSettings;
use crate::target::{self, Target};
use crate::utils::{Error, Result};

struct Entry {
    binding: Binding,
    target: Arc<dyn Target>,
}

/// Every binding of the process, started in configuration order and
/// stopped in reverse.
#[derive(Default)]
pub struct Hub {
    entries: Vec<Entry>,
}

impl Hub {
    /// Builds and initialises every binding. The first invalid binding
    /// fails the whole hub, after the ones already initialised are stopped.
    pub async fn init(
        settings: &[BindingSettings],
        connector: &dyn Connector,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self> {
        let mut hub = Hub::default();
        let mut names = HashSet::new();
        for binding_settings in settings {
            match Self::init_one(binding_settings, &mut names, connector, identity.clone()).await {
                Ok(entry) => hub.entries.push(entry),
                Err(e) => {
                    error!(binding = %binding_settings.name, "binding init failed: {}", e);
                    let _ = hub.stop().await;
                    return Err(e);
                }
            }
        }
        Ok(hub)
    }

    async fn init_one(
        settings: &BindingSettings,
        names: &mut HashSet<String>,
        connector: &dyn Connector,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Entry> {
        if !names.insert(settings.name.clone()) {
            return Err(Error::invalid(format!(
                "duplicate binding name '{}'",
                settings.name
            )));
        }
        let options = BindingOptions::parse(
            &settings.name,
            &settings.source.kind,
            &settings.source.properties,
        )?;
        let target = target::build(&settings.target.kind, &settings.target.properties)?;
        let binding = Binding::init(options, connector, identity).await?;
        Ok(Entry { binding, target })
    }

    /// Starts every binding under `token`. If one fails to start, all are
    /// stopped and its error returned.
    pub async fn start(&mut self, token: &CancellationToken) -> Result<()> {
        for index in 0..self.entries.len() {
            let entry = &mut self.entries[index];
            let target = entry.target.clone();
            if let Err(e) = entry.binding.start(token, Some(target)).await {
                error!(binding = %entry.binding.name(), "binding start failed: {}", e);
                let _ = self.stop().await;
                return Err(e);
            }
        }
        info!(bindings = self.entries.len(), "hub started");
        Ok(())
    }

    /// Stops every binding in reverse order, returning the first failure.
    pub async fn stop(&mut self) -> Result<()> {
        let mut first = None;
        for entry in self.entries.iter_mut().rev() {
            if let Err(e) = entry.binding.stop().await {
                error!(binding = %entry.binding.name(), "binding stop failed: {}", e);
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        self.entries.iter().map(|e| &e.binding)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests;
