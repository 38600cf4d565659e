use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, WebSocketUpgrade,
    },
    response::IntoResponse,
    Extension, TypedHeader,
};
use futures::{sink::Sink, stream::Stream, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::{
    control_center::{ControlCenterHandle, Inform},
    subscriber::SubscriberId,
};

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    user_agent: Option<TypedHeader<headers::UserAgent>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(cc_handle): Extension<ControlCenterHandle>,
) -> impl IntoResponse {
    if let Some(TypedHeader(user_agent)) = user_agent {
        info!("`{}`@`{addr}` connected", user_agent.as_str());
    } else {
        info!("`{addr}` connected");
    }

    ws.on_upgrade(move |socket| {
        let id = SubscriberId::new();
        let span = info_span!("Subscriber", %id, %addr);

        handle_websocket(socket, id, cc_handle).instrument(span)
    })
}

/// Subscribers have nothing to say to us, but log it in case they try.
pub(crate) async fn read<S>(mut receiver: S)
where
    S: Unpin,
    S: Stream<Item = Result<Message, axum::Error>>,
{
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                debug!(%text, "subscriber sent text");
            }
            Message::Binary(_) => {
                debug!("subscriber sent binary data");
            }
            Message::Ping(_) => {
                trace!("socket ping");
            }
            Message::Pong(_) => {
                trace!("socket pong");
            }
            Message::Close(_) => {
                debug!("subscriber disconnected");
            }
        }
    }
}

pub(crate) async fn write(
    mut sender: impl Sink<Message> + Unpin,
    mut receiver: mpsc::UnboundedReceiver<String>,
) {
    while let Some(text) = receiver.recv().await {
        trace!(%text, "Outbound");

        if sender.send(Message::Text(text)).await.is_err() {
            debug!("subscriber disconnected");
            return;
        }
    }
}

pub(crate) async fn handle_websocket(
    websocket: WebSocket,
    id: SubscriberId,
    cc_handle: ControlCenterHandle,
) {
    let (stream_sender, stream_receiver) = websocket.split();
    let (outbox, inbox) = mpsc::unbounded_channel::<String>();

    cc_handle.inform(Inform::Subscribed { id, outbox });

    let read_handle = tokio::spawn(read(stream_receiver).instrument(info_span!("Read")));
    let write_handle = tokio::spawn(write(stream_sender, inbox).instrument(info_span!("Write")));

    match read_handle.await {
        Ok(()) => debug!("Read task joined"),
        Err(e) => warn!("Read task join error: {e:?}"),
    }

    cc_handle.inform(Inform::Unsubscribed(id));

    debug!("Aborting write task");
    // This ensures the underlying TCP connection gets closed,
    // which signals the peer that the session is over.
    write_handle.abort();
}
