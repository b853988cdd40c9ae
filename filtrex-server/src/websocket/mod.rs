//! Bidirectional compile sessions over WebSocket.
//!
//! Clients send `compile | cancel | ping`; the session answers with
//! `welcome | pong | compile:started | event | compile:complete |
//! compile:error | compile:cancelled | error`. Each connection may run a
//! bounded number of concurrent compilations, inactive sessions are closed
//! after the heartbeat timeout, and oversized messages are rejected.

pub mod connection;

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error};
use uuid::Uuid;

use filtrex_core::{ChannelEventSink, CompilerError};
use filtrex_model::events::{ClientMessage, ServerMessage};

use crate::state::AppState;

pub use connection::Connection;

/// Handle the WebSocket upgrade request.
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Run one session to completion.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(64);

    let connection = Arc::new(Connection::new(tx));
    debug!(session = %connection.id, "websocket session opened");

    // Outgoing messages are serialized by a dedicated task.
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(text) => {
                    if ws_sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(err) => error!(error = %err, "failed to encode server message"),
            }
        }
    });

    connection
        .send(ServerMessage::Welcome {
            session_id: connection.id,
            max_concurrent_compilations: state.settings.session.max_concurrent_compilations,
        })
        .await;

    let heartbeat = state.settings.session.heartbeat_timeout();
    loop {
        let message = match tokio::time::timeout(heartbeat, ws_receiver.next()).await {
            Ok(Some(message)) => message,
            // Socket closed.
            Ok(None) => break,
            Err(_) => {
                debug!(session = %connection.id, "heartbeat timeout; closing session");
                break;
            }
        };

        match message {
            Ok(Message::Text(text)) => {
                if text.len() > state.settings.session.max_message_bytes {
                    connection
                        .send(ServerMessage::Error {
                            message: format!(
                                "message exceeds {} bytes",
                                state.settings.session.max_message_bytes
                            ),
                        })
                        .await;
                    continue;
                }
                match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(client_message) => {
                        handle_client_message(client_message, &state, &connection).await;
                    }
                    Err(err) => {
                        connection
                            .send(ServerMessage::Error {
                                message: format!("malformed message: {err}"),
                            })
                            .await;
                    }
                }
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => {
                connection
                    .send(ServerMessage::Error {
                        message: "binary frames are not supported".to_string(),
                    })
                    .await;
            }
            Err(err) => {
                debug!(session = %connection.id, error = %err, "websocket error");
                break;
            }
        }
    }

    // Clean up on disconnect.
    connection.cancel_all().await;
    writer.abort();
    debug!(session = %connection.id, "websocket session closed");
}

async fn handle_client_message(
    message: ClientMessage,
    state: &AppState,
    connection: &Arc<Connection>,
) {
    match message {
        ClientMessage::Ping => {
            connection.send(ServerMessage::Pong).await;
        }

        ClientMessage::Cancel { compile_id } => {
            if !connection.cancel_compile(compile_id).await {
                connection
                    .send(ServerMessage::Error {
                        message: format!("no running compilation {compile_id}"),
                    })
                    .await;
            }
        }

        ClientMessage::Compile {
            compile_id,
            request,
        } => {
            let compile_id = compile_id.unwrap_or_else(Uuid::new_v4);
            let max = state.settings.session.max_concurrent_compilations;
            let Some(cancel) = connection.begin_compile(compile_id, max).await else {
                connection
                    .send(ServerMessage::Error {
                        message: format!("compilation limit of {max} reached"),
                    })
                    .await;
                return;
            };

            connection
                .send(ServerMessage::CompileStarted { compile_id })
                .await;

            let service = state.service.clone();
            let connection = Arc::clone(connection);
            tokio::spawn(async move {
                let (sink, mut events) = ChannelEventSink::new();

                // Forward pipeline events until the sink closes.
                let forwarder = {
                    let connection = Arc::clone(&connection);
                    tokio::spawn(async move {
                        while let Some(event) = events.recv().await {
                            if !connection
                                .send(ServerMessage::Event { compile_id, event })
                                .await
                            {
                                break;
                            }
                        }
                    })
                };

                let outcome = service.compile_streaming(&request, &sink, &cancel).await;
                drop(sink);
                let _ = forwarder.await;

                let reply = match outcome {
                    Ok(result) => ServerMessage::CompileComplete {
                        compile_id,
                        result,
                    },
                    Err(CompilerError::Cancelled) => ServerMessage::CompileCancelled {
                        compile_id,
                        reason: "cancelled by client".to_string(),
                    },
                    Err(err) => ServerMessage::CompileError {
                        compile_id,
                        error: err.to_string(),
                    },
                };
                connection.send(reply).await;
                connection.finish_compile(compile_id).await;
            });
        }
    }
}
