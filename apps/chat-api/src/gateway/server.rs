//! WebSocket upgrade handler and per-connection session loop.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};

use crate::error::ApiError;
use crate::AppState;

use super::registry::ConnectionHandle;

/// Close code sent when the registry dropped this connection: replaced by a
/// newer connection for the same user, or evicted after a failed write.
const CLOSE_SUPERSEDED: u16 = 4000;

/// Longest accepted username in the connection path.
const MAX_USERNAME_LEN: usize = 64;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws/{username}", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Path(username): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let username = username.trim().to_string();
    if username.is_empty() || username.len() > MAX_USERNAME_LEN {
        return ApiError::bad_request("Invalid username").into_response();
    }
    ws.on_upgrade(move |socket| handle_connection(socket, username, state))
}

async fn handle_connection(socket: WebSocket, username: String, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (handle, mut outbound) = ConnectionHandle::new(state.config.outbound_buffer);
    let connection_id = handle.connection_id.clone();
    state.registry.connect(&username, handle);

    tracing::info!(%username, %connection_id, "gateway connection established");

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        // One frame is fully routed before the next is read.
                        state.router.handle_frame(&username, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Binary(_))) => {
                        tracing::debug!(%username, "ignoring binary frame");
                    }
                    Some(Err(e)) => {
                        tracing::debug!(?e, %username, %connection_id, "ws read error");
                        break;
                    }
                }
            }

            frame = outbound.recv() => {
                match frame {
                    Some(frame) => {
                        if ws_tx.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // Our registry entry is gone.
                        let _ = send_close(&mut ws_tx, CLOSE_SUPERSEDED, "Connection superseded").await;
                        break;
                    }
                }
            }
        }
    }

    state.registry.release(&username, &connection_id);

    tracing::info!(%username, %connection_id, "gateway connection ended");
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    ws_tx
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await
}
