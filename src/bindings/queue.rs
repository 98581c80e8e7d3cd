//! Pull-based queue consumption with bounded redelivery.
//!
//! Each connection pulls up to `batch_size` messages, waiting up to
//! `wait_timeout` on an empty queue, and processes the batch in order
//! before pulling again.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::bindings::connection::Connection;
use crate::bindings::dispatch::Dispatcher;
use crate::bindings::redelivery::{Redelivery, RedeliveryTracker};
use crate::broker::QueueMessage;
use crate::envelope::{Request, Response};
use crate::utils::Error;

pub(crate) async fn run(
    dispatcher: Dispatcher,
    connection: Connection,
    redelivery: Arc<RedeliveryTracker>,
) {
    let options = dispatcher.options.clone();
    loop {
        let batch = tokio::select! {
            biased;
            _ = dispatcher.token.cancelled() => break,
            pulled = connection.client.pull_queue(
                &options.channel,
                options.batch_size,
                options.wait_timeout,
            ) => match pulled {
                Ok(batch) => batch,
                Err(e) => {
                    error!(
                        binding = %options.name,
                        client_id = %connection.client_id,
                        "pull failed: {}", e
                    );
                    break;
                }
            },
        };

        if !batch.is_empty() {
            debug!(client_id = %connection.client_id, size = batch.len(), "pulled batch");
        }
        for message in batch {
            handle(&dispatcher, &connection, &redelivery, message).await;
        }
    }
    debug!(client_id = %connection.client_id, "pull loop ended");
}

pub(crate) async fn handle(
    dispatcher: &Dispatcher,
    connection: &Connection,
    redelivery: &RedeliveryTracker,
    message: QueueMessage,
) {
    // undecodable payloads fail the same way on every attempt
    let request = match Request::parse(&message.body) {
        Ok(request) => request,
        Err(e) => {
            warn!(message_id = %message.id, "dropping undecodable message: {}", e);
            dispatcher
                .publish_response(connection, &Response::from_error(e))
                .await;
            return;
        }
    };

    match dispatcher.call(request).await {
        Ok(response) => {
            redelivery.clear(&message.id);
            dispatcher.publish_response(connection, &response).await;
        }
        Err(Error::Cancelled) => requeue(dispatcher, connection, redelivery, message).await,
        Err(e) => match redelivery.record_failure(&message.id) {
            Redelivery::Retry { attempt } => {
                warn!(
                    message_id = %message.id,
                    attempt,
                    max = redelivery.max_redeliver(),
                    "target failed, redelivering: {}", e
                );
                requeue(dispatcher, connection, redelivery, message).await;
            }
            Redelivery::Exhausted { attempts } => {
                error!(
                    binding = %dispatcher.options.name,
                    message_id = %message.id,
                    attempts,
                    "message failed permanently: {}", e
                );
                dispatcher
                    .publish_response(connection, &Response::from_error(e))
                    .await;
            }
        },
    }
}

/// Puts `message` back on its queue. A message that can't be requeued is
/// lost, so its failure count is forgotten.
async fn requeue(
    dispatcher: &Dispatcher,
    connection: &Connection,
    redelivery: &RedeliveryTracker,
    message: QueueMessage,
) {
    let id = message.id.clone();
    if let Err(e) = connection.client.send_queue(message).await {
        redelivery.clear(&id);
        error!(
            binding = %dispatcher.options.name,
            message_id = %id,
            "failed to requeue message: {}", e
        );
    }
}
