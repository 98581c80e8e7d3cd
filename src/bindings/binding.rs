use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::bindings::connection::{Connection, ConnectionSet};
use crate::bindings::dispatch::Dispatcher;
use crate::bindings::identity::IdentityProvider;
use crate::bindings::options::{BindingOptions, Pattern};
use crate::bindings::redelivery::RedeliveryTracker;
use crate::bindings::{command, events, events_store, queue};
use crate::broker::{Event, RpcRequest};
use crate::client::{Connector, Subscription};
use crate::target::Target;
use crate::utils::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initialized,
    Running,
    Stopped,
}

/// A confirmed subscription waiting for its loop.
enum Intake {
    Requests(Subscription<RpcRequest>),
    Events(Subscription<Event>),
    Stored(Subscription<Event>),
    Pull,
}

impl Intake {
    fn subscription_id(&self) -> Option<&str> {
        match self {
            Intake::Requests(sub) => Some(sub.id.as_str()),
            Intake::Events(sub) | Intake::Stored(sub) => Some(sub.id.as_str()),
            Intake::Pull => None,
        }
    }
}

/// Runs one binding: its connection set plus one intake loop per
/// connection feeding a shared target.
///
/// The lifecycle is `init`, then `start`, then `stop`. Every loop and
/// per-message task runs on a tracked task group, cancelled by `stop` or by
/// the parent token handed to `start`.
pub struct Binding {
    options: Arc<BindingOptions>,
    identity: Arc<dyn IdentityProvider>,
    connections: ConnectionSet,
    redelivery: Arc<RedeliveryTracker>,
    token: CancellationToken,
    tracker: TaskTracker,
    group: Option<String>,
    state: State,
}

impl Binding {
    /// Validates `options` and opens every connection of the binding.
    /// Fails without leaving any connection open.
    pub async fn init(
        options: BindingOptions,
        connector: &dyn Connector,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self> {
        options.validate()?;
        let base_client_id = options
            .client_id
            .clone()
            .unwrap_or_else(|| identity.client_id());
        let connections = ConnectionSet::open(&options, &base_client_id, connector).await?;

        info!(
            binding = %options.name,
            pattern = %options.pattern,
            channel = %options.channel,
            sources = options.sources,
            "binding initialized"
        );
        Ok(Self {
            redelivery: Arc::new(RedeliveryTracker::new(options.max_redeliver)),
            options: Arc::new(options),
            identity,
            connections,
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            group: None,
            state: State::Initialized,
        })
    }

    /// Subscribes every connection, in order, and starts their loops.
    ///
    /// Returns once all subscriptions are confirmed, or with the first
    /// subscription error, in which case the subscriptions already confirmed
    /// are withdrawn and no loop is started.
    pub async fn start(
        &mut self,
        parent: &CancellationToken,
        target: Option<Arc<dyn Target>>,
    ) -> Result<()> {
        let target = target.ok_or(Error::InvalidTarget)?;
        match self.state {
            State::Initialized => {}
            State::Running => return Err(Error::Lifecycle("already started")),
            State::Stopped => return Err(Error::Lifecycle("already stopped")),
        }

        let group = self
            .options
            .resolve_group(|| self.identity.group_name());
        let token = parent.child_token();
        let dispatcher = Dispatcher {
            options: self.options.clone(),
            target,
            token: token.clone(),
            tracker: self.tracker.clone(),
            group: group.clone(),
        };

        let mut intakes = Vec::with_capacity(self.connections.len());
        for connection in self.connections.connections() {
            match subscribe(&dispatcher, connection).await {
                Ok(intake) => intakes.push(intake),
                Err(e) => {
                    warn!(
                        binding = %self.options.name,
                        client_id = %connection.client_id,
                        "subscribe failed: {}",
                        e
                    );
                    self.withdraw(&intakes).await;
                    return Err(e);
                }
            }
        }

        for (connection, intake) in self.connections.connections().iter().zip(intakes) {
            let connection = connection.clone();
            let loop_dispatcher = dispatcher.clone();
            match intake {
                Intake::Requests(sub) => {
                    self.tracker
                        .spawn(command::run(loop_dispatcher, connection, sub));
                }
                Intake::Events(sub) => {
                    self.tracker
                        .spawn(events::run(loop_dispatcher, connection, sub));
                }
                Intake::Stored(sub) => {
                    self.tracker
                        .spawn(events_store::run(loop_dispatcher, connection, sub));
                }
                Intake::Pull => {
                    self.tracker.spawn(queue::run(
                        loop_dispatcher,
                        connection,
                        self.redelivery.clone(),
                    ));
                }
            }
        }

        self.token = token;
        self.group = group;
        self.state = State::Running;
        info!(
            binding = %self.options.name,
            group = self.group.as_deref().unwrap_or(""),
            "binding started"
        );
        Ok(())
    }

    /// Stops intake, waits up to the shutdown timeout for in-flight work,
    /// then closes every connection. Stopping twice is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state == State::Stopped {
            return Ok(());
        }
        self.state = State::Stopped;
        self.token.cancel();
        self.tracker.close();

        let timeout = self.options.shutdown_timeout;
        if tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                binding = %self.options.name,
                remaining = self.tracker.len(),
                "shutdown timeout elapsed with tasks still running"
            );
        }

        let result = self.connections.close().await;
        info!(binding = %self.options.name, "binding stopped");
        result
    }

    /// Unsubscribes the intakes confirmed by a `start` that then failed.
    async fn withdraw(&self, intakes: &[Intake]) {
        for (connection, intake) in self.connections.connections().iter().zip(intakes) {
            let Some(id) = intake.subscription_id() else {
                continue;
            };
            if let Err(e) = connection.client.unsubscribe(id).await {
                warn!(
                    binding = %self.options.name,
                    client_id = %connection.client_id,
                    "unsubscribe failed: {}",
                    e
                );
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn options(&self) -> &BindingOptions {
        &self.options
    }

    /// The group every connection subscribed with, once started.
    pub fn consumer_group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.connections
            .connections()
            .iter()
            .map(|c| c.client_id.clone())
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_running(&self) -> bool {
        self.state == State::Running
    }

    /// Loops plus per-message tasks still running.
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn subscribe(dispatcher: &Dispatcher, connection: &Connection) -> Result<Intake> {
    let intake = match dispatcher.options.pattern {
        Pattern::Command | Pattern::Query => {
            let kind = dispatcher
                .options
                .pattern
                .rpc_kind()
                .ok_or_else(|| Error::invalid("not an rpc pattern"))?;
            Intake::Requests(command::subscribe(dispatcher, connection, kind).await?)
        }
        Pattern::Events => Intake::Events(events::subscribe(dispatcher, connection).await?),
        Pattern::EventsStore => {
            Intake::Stored(events_store::subscribe(dispatcher, connection).await?)
        }
        Pattern::Queue => Intake::Pull,
    };
    Ok(intake)
}
