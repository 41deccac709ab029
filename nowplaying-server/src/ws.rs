//! WebSocket transport for hub subscribers.
//!
//! A connection moves `Connecting -> Open -> Closed`: the upgrade completes,
//! registration queues the backfill and marks it open, and whichever half
//! ends first closes it and unregisters.

use crate::routes::AppState;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use nowplaying_core::{dispatch, ClientMessage, Outbound, SubscriberId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| session(socket, state))
}

async fn session(socket: WebSocket, state: AppState) {
    let subscription = state.hub.register().await;
    let id = subscription.id;
    debug!("WebSocket session {} open", id);

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_loop(sink, subscription.receiver, id));
    let mut reader = tokio::spawn(read_loop(stream, state.clone(), id));

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    state.hub.unregister(id).await;
    debug!("WebSocket session {} closed", id);
}

/// Drain the subscriber queue into the socket. Ends when the hub drops the
/// subscriber or the peer stops accepting frames.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut receiver: mpsc::Receiver<Outbound>,
    id: SubscriberId,
) {
    while let Some(outbound) = receiver.recv().await {
        let message = match outbound {
            Outbound::Frame(frame) => Message::Text(frame.as_ref().into()),
            Outbound::Ping => Message::Ping(Bytes::new()),
        };
        if let Err(e) = sink.send(message).await {
            debug!("Send to subscriber {} failed: {}", id, e);
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

async fn read_loop(mut stream: SplitStream<WebSocket>, state: AppState, id: SubscriberId) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => handle_text(&state, id, text.as_str()).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Subscriber {} read error: {}", id, e);
                break;
            }
        }
    }
}

async fn handle_text(state: &AppState, id: SubscriberId, text: &str) {
    match ClientMessage::parse(text) {
        Ok(message) => {
            if let Some(reply) = dispatch(message, state.search.as_ref()).await {
                state.hub.send_to(id, &reply).await;
            }
        }
        Err(e) => warn!("Ignoring malformed message from subscriber {}: {}", id, e),
    }
}
