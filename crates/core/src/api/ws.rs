//! WebSocket transport for [`Session`].

use std::sync::Arc;

use axum::{
    Extension,
    extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    response::Response,
};
use futures::{SinkExt, StreamExt, future};
use gqlstream_types::WS_PROTOCOL;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::ControllerState;
use crate::{
    engine::Engine,
    error::TransportError,
    session::{Inbound, Outbound, Session},
};

/// Upgrade to a `graphql-ws` WebSocket.
pub async fn handler<E: Engine>(
    Extension(state): Extension<Arc<ControllerState<E>>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.protocols([WS_PROTOCOL])
        .on_upgrade(move |socket| serve(socket, state))
}

async fn serve<E: Engine>(socket: WebSocket, state: Arc<ControllerState<E>>) {
    debug!("WebSocket connected");
    let (mut sink, stream) = socket.split();
    let (outbound, mut frames) = mpsc::channel::<Outbound>(state.config.outbound_buffer);

    let writer = tokio::spawn(async move {
        while let Some(message) = frames.recv().await {
            let message = match message {
                Outbound::Frame(frame) => match frame.encode() {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        error!(error = %e, "Failed to encode frame");
                        continue;
                    }
                },
                Outbound::Close(code) => {
                    let frame = code.map(|code| CloseFrame {
                        code,
                        reason: Utf8Bytes::from_static(""),
                    });
                    if let Err(e) = sink.send(Message::Close(frame)).await {
                        debug!(error = %e, "Failed to send close frame");
                    }
                    break;
                }
            };

            if let Err(e) = sink.send(message).await {
                debug!(error = %e, "Failed to write to WebSocket");
                break;
            }
        }
    });

    let inbound = stream
        .take_while(|message| future::ready(!matches!(message, Ok(Message::Close(_)))))
        .filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(Inbound::Text(text.as_str().to_owned()))),
                Ok(Message::Binary(bytes)) => Some(Ok(Inbound::Binary(bytes.to_vec()))),
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::new(e))),
            })
        });

    let session = Session::new(
        state.engine.clone(),
        state.context.clone(),
        state.shutdown.child_token(),
        outbound,
    )
    .with_keep_alive(state.config.keep_alive);
    session.run(inbound).await;

    if let Err(e) = writer.await {
        warn!(error = %e, "WebSocket writer failed");
    }
    debug!("WebSocket disconnected");
}
