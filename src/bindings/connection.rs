use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info};

use crate::bindings::options::BindingOptions;
use crate::client::{BrokerClient, ClientOptions, Connector};
use crate::utils::Result;

/// One open broker connection of a binding.
#[derive(Clone)]
pub struct Connection {
    pub index: usize,
    pub client_id: String,
    pub client: Arc<dyn BrokerClient>,
}

/// The broker connections of one binding. Opened all together, closed all
/// together.
#[derive(Default)]
pub struct ConnectionSet {
    connections: Vec<Connection>,
}

impl ConnectionSet {
    /// Client identities for `sources` connections: `base` alone, or
    /// `base-<i>` when there are several.
    pub fn client_ids(base: &str, sources: usize) -> Vec<String> {
        if sources <= 1 {
            return vec![base.to_string()];
        }
        (0..sources).map(|i| format!("{base}-{i}")).collect()
    }

    /// Opens `options.sources` connections. If any fails, the ones already
    /// open are closed and the error is returned.
    pub async fn open(
        options: &BindingOptions,
        base_client_id: &str,
        connector: &dyn Connector,
    ) -> Result<Self> {
        let mut set = ConnectionSet::default();
        for (index, client_id) in Self::client_ids(base_client_id, options.sources)
            .into_iter()
            .enumerate()
        {
            let client_options = ClientOptions {
                address: options.address.clone(),
                client_id: client_id.clone(),
                auth_token: options.auth_token.clone(),
                reconnect: options.reconnect.clone(),
            };
            match connector.connect(&client_options).await {
                Ok(client) => {
                    debug!(binding = %options.name, client_id = %client_id, "connection opened");
                    set.connections.push(Connection {
                        index,
                        client_id,
                        client,
                    });
                }
                Err(e) => {
                    error!(
                        binding = %options.name,
                        client_id = %client_id,
                        "connection failed: {}", e
                    );
                    let _ = set.close().await;
                    return Err(e);
                }
            }
        }
        info!(binding = %options.name, connections = set.len(), "connections opened");
        Ok(set)
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Closes every connection, attempting all of them even when some
    /// fail, and returns the first failure. Closing an empty set is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        let connections = std::mem::take(&mut self.connections);
        let results = join_all(connections.iter().map(|c| c.client.close())).await;

        let mut first = None;
        for (connection, result) in connections.iter().zip(results) {
            if let Err(e) = result {
                error!(client_id = %connection.client_id, "close failed: {}", e);
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}
