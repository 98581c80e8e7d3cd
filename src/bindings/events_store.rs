//! Events-store bindings: events read from a durable, sequenced log.
//!
//! Processing is the same as for plain events. The difference is the
//! subscription, which starts at the configured position and, for grouped
//! connections, shares one cursor among the group.

use tracing::trace;

use crate::bindings::connection::Connection;
use crate::bindings::dispatch::Dispatcher;
use crate::bindings::events;
use crate::broker::Event;
use crate::client::{ChannelSubscription, Subscription};
use crate::utils::Result;

pub(crate) async fn subscribe(
    dispatcher: &Dispatcher,
    connection: &Connection,
) -> Result<Subscription<Event>> {
    let sub = ChannelSubscription::new(&dispatcher.options.channel, dispatcher.group.as_deref());
    connection
        .client
        .subscribe_events_store(sub, dispatcher.options.start_from)
        .await
}

pub(crate) async fn run(
    dispatcher: Dispatcher,
    connection: Connection,
    subscription: Subscription<Event>,
) {
    dispatcher
        .receive_loop(&connection, subscription, |event| {
            trace!(client_id = %connection.client_id, sequence = event.sequence, "stored event");
            let task_dispatcher = dispatcher.clone();
            let task_connection = connection.clone();
            dispatcher.spawn(async move {
                events::handle(&task_dispatcher, &task_connection, event).await;
            });
        })
        .await;
}
