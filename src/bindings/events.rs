//! Fire-and-forget events, optionally echoing each response to a response
//! channel.

use tracing::warn;

use crate::bindings::connection::Connection;
use crate::bindings::dispatch::Dispatcher;
use crate::broker::Event;
use crate::client::{ChannelSubscription, Subscription};
use crate::utils::Result;

pub(crate) async fn subscribe(
    dispatcher: &Dispatcher,
    connection: &Connection,
) -> Result<Subscription<Event>> {
    let sub = ChannelSubscription::new(&dispatcher.options.channel, dispatcher.group.as_deref());
    connection.client.subscribe_events(sub).await
}

pub(crate) async fn run(
    dispatcher: Dispatcher,
    connection: Connection,
    subscription: Subscription<Event>,
) {
    dispatcher
        .receive_loop(&connection, subscription, |event| {
            let task_dispatcher = dispatcher.clone();
            let task_connection = connection.clone();
            dispatcher.spawn(async move {
                handle(&task_dispatcher, &task_connection, event).await;
            });
        })
        .await;
}

pub(crate) async fn handle(dispatcher: &Dispatcher, connection: &Connection, event: Event) {
    let response = dispatcher.process(&event.body).await;
    if let Some(error) = response.error_message() {
        warn!(
            binding = %dispatcher.options.name,
            message_id = %event.id,
            "event processing failed: {}", error
        );
    }
    dispatcher.publish_response(connection, &response).await;
}
