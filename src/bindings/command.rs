//! Correlated RPC: command and query bindings reply to every request.

use tracing::{debug, error};

use crate::bindings::connection::Connection;
use crate::bindings::dispatch::Dispatcher;
use crate::broker::{RpcKind, RpcReply, RpcRequest};
use crate::client::{ChannelSubscription, Subscription};
use crate::envelope::Request;
use crate::utils::Result;

pub(crate) async fn subscribe(
    dispatcher: &Dispatcher,
    connection: &Connection,
    kind: RpcKind,
) -> Result<Subscription<RpcRequest>> {
    let sub = ChannelSubscription::new(&dispatcher.options.channel, dispatcher.group.as_deref());
    connection.client.subscribe_requests(kind, sub).await
}

/// Receives requests until the binding stops, answering each on its own
/// tracked task.
pub(crate) async fn run(
    dispatcher: Dispatcher,
    connection: Connection,
    subscription: Subscription<RpcRequest>,
) {
    dispatcher
        .receive_loop(&connection, subscription, |request| {
            let task_dispatcher = dispatcher.clone();
            let task_connection = connection.clone();
            dispatcher.spawn(async move {
                handle(&task_dispatcher, &task_connection, request).await;
            });
        })
        .await;
}

async fn handle(dispatcher: &Dispatcher, connection: &Connection, request: RpcRequest) {
    let reply = RpcReply::to(&request, &connection.client_id);
    let reply = match execute(dispatcher, &request).await {
        Ok(body) => reply.with_body(body),
        Err(e) => {
            debug!(request_id = %request.id, "request failed: {}", e);
            reply.with_error(e.to_string())
        }
    };

    // the requester times out on its own; a lost reply is not retried
    if let Err(e) = connection.client.send_response(reply).await {
        error!(
            binding = %dispatcher.options.name,
            client_id = %connection.client_id,
            request_id = %request.id,
            "failed to send reply: {}", e
        );
    }
}

/// The reply body: the marshalled response, or its raw data when payload
/// parsing is disabled.
async fn execute(dispatcher: &Dispatcher, request: &RpcRequest) -> Result<Vec<u8>> {
    if dispatcher.options.skip_decode {
        let response = dispatcher.call(Request::raw(request.body.clone())).await?;
        return Ok(response.data);
    }
    let decoded = Request::parse(&request.body)?;
    dispatcher.call(decoded).await?.marshal()
}
