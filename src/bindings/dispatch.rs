//! Plumbing shared by the pattern handlers: the target call guarded by the
//! binding's cancellation token, decoding, and the push-subscription loop.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::bindings::connection::Connection;
use crate::bindings::options::{BindingOptions, Pattern};
use crate::broker::{Event, QueueMessage};
use crate::client::{BrokerClient, Subscription};
use crate::envelope::{Request, Response};
use crate::target::Target;
use crate::utils::{Error, Result};

/// Per-binding handle given to every loop and per-message task.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    pub options: Arc<BindingOptions>,
    pub target: Arc<dyn Target>,
    pub token: CancellationToken,
    pub tracker: TaskTracker,
    pub group: Option<String>,
}

impl Dispatcher {
    /// Runs `task` on the binding's tracked task group.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }

    /// Calls the target with the binding's token as its context, giving up
    /// with [`Error::Cancelled`] once the binding stops.
    pub async fn call(&self, request: Request) -> Result<Response> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Cancelled),
            result = self.target.call(&self.token, request) => result,
        }
    }

    /// Decodes `body` and calls the target. Any failure is folded into the
    /// returned response's error metadata.
    pub async fn process(&self, body: &[u8]) -> Response {
        let request = match Request::parse(body) {
            Ok(request) => request,
            Err(e) => return Response::from_error(e),
        };
        match self.call(request).await {
            Ok(response) => response,
            Err(e) => Response::from_error(e),
        }
    }

    /// Publishes `response` to the response channel, if one is configured.
    /// Failures are logged only.
    pub async fn publish_response(&self, connection: &Connection, response: &Response) {
        let Some(channel) = self.options.response_channel.as_deref() else {
            return;
        };
        let body = match response.marshal() {
            Ok(body) => body,
            Err(e) => {
                error!(binding = %self.options.name, "failed to encode response: {}", e);
                return;
            }
        };

        let client: &dyn BrokerClient = connection.client.as_ref();
        let result = match self.options.pattern {
            Pattern::EventsStore => client
                .send_event_store(Event::new(channel, body))
                .await
                .map(|_| ()),
            Pattern::Queue => {
                client.send_queue(QueueMessage::new(channel, body)).await
            }
            _ => client.send_event(Event::new(channel, body)).await,
        };
        if let Err(e) = result {
            error!(
                binding = %self.options.name,
                client_id = %connection.client_id,
                channel = %channel,
                "failed to publish response: {}", e
            );
        }
    }

    /// Feeds every message of `subscription` to `on_message` until the
    /// binding stops, the broker reports an error, or the subscription
    /// ends. `on_message` must not block.
    pub async fn receive_loop<T, F>(
        &self,
        connection: &Connection,
        mut subscription: Subscription<T>,
        mut on_message: F,
    ) where
        F: FnMut(T),
    {
        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    debug!(client_id = %connection.client_id, "receive loop cancelled");
                    break;
                }
                item = subscription.next() => match item {
                    Some(Ok(message)) => on_message(message),
                    Some(Err(e)) => {
                        error!(
                            binding = %self.options.name,
                            client_id = %connection.client_id,
                            "subscription error: {}", e
                        );
                        break;
                    }
                    None => {
                        info!(client_id = %connection.client_id, "subscription ended");
                        break;
                    }
                },
            }
        }
    }
}
