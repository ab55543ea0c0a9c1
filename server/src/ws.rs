use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use match_shared::protocol::{ClientMsg, JoinedMsg, MatchDataMsg, RejectedMsg, ServerMsg};
use match_shared::PROTOCOL_VERSION;
use std::collections::HashMap;
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

use crate::match_loop::MatchCommand;
use crate::presence::{MatchData, Presence};
use crate::registry::MatchRegistry;

/// Shared app state passed to each handler
#[derive(Clone)]
pub struct AppState {
    pub registry: MatchRegistry,
}

/// HTTP handler for WebSocket upgrade.
///
/// `matchId` selects the match; `userId` and `username` describe the
/// presence. Every other query parameter is passed as join metadata.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
    Query(mut params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let match_id = params.remove("matchId").unwrap_or_default();
    let session_id = Uuid::new_v4().to_string();
    let user_id = params
        .remove("userId")
        .unwrap_or_else(|| session_id.clone());
    let mut presence = Presence::new(user_id, session_id);
    if let Some(username) = params.remove("username") {
        presence.username = username;
    }
    presence.node = app_state.registry.node().to_string();

    ws.on_upgrade(move |socket| handle_socket(socket, app_state, match_id, presence, params))
}

async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sink.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode server message");
            false
        }
    }
}

async fn handle_socket(
    socket: WebSocket,
    app_state: AppState,
    match_id: String,
    presence: Presence,
    metadata: HashMap<String, String>,
) {
    let (mut sink, mut stream) = socket.split();
    let session_id = presence.session_id.clone();

    let Some(handle) = app_state.registry.get(&match_id) else {
        let msg = ServerMsg::Error {
            message: format!("match not found: {}", match_id),
        };
        send_msg(&mut sink, &msg).await;
        let _ = sink.close().await;
        return;
    };
    let cmd_tx = handle.cmd_tx;

    // Admission
    let (resp_tx, resp_rx) = oneshot::channel();
    if cmd_tx
        .send(MatchCommand::JoinAttempt {
            presence: presence.clone(),
            metadata,
            response: resp_tx,
        })
        .await
        .is_err()
    {
        tracing::error!(match_id = %match_id, "Failed to send JoinAttempt command");
        return;
    }
    let decision = match resp_rx.await {
        Ok(decision) => decision,
        Err(_) => {
            tracing::error!(match_id = %match_id, "Failed to receive join decision");
            return;
        }
    };
    if !decision.accept {
        let msg = ServerMsg::Rejected(RejectedMsg {
            match_id,
            reason: decision.reason,
        });
        send_msg(&mut sink, &msg).await;
        let _ = sink.close().await;
        return;
    }

    // Subscribe before joining so nothing broadcast after the join is missed.
    // The receiver closes once the match task exits and its registry entry is removed.
    let mut broadcast_rx = handle.broadcast_tx.subscribe();
    drop(handle.broadcast_tx);

    if cmd_tx
        .send(MatchCommand::Join {
            presences: vec![presence.clone()],
        })
        .await
        .is_err()
    {
        return;
    }

    tracing::info!(match_id = %match_id, session_id = %session_id, "socket joined match");

    let joined = ServerMsg::Joined(JoinedMsg {
        protocol_version: PROTOCOL_VERSION,
        match_id: match_id.clone(),
        session_id: session_id.clone(),
    });
    if send_msg(&mut sink, &joined).await {
        loop {
            tokio::select! {
                // Client -> Server
                msg = stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ClientMsg>(&text) {
                                Ok(ClientMsg::MatchData { op_code, data, reliable }) => {
                                    let Ok(data) = BASE64.decode(data) else {
                                        tracing::debug!(session_id = %session_id, "dropping match data with invalid base64");
                                        continue;
                                    };
                                    let _ = cmd_tx.send(MatchCommand::Data(MatchData {
                                        presence: presence.clone(),
                                        op_code,
                                        data,
                                        reliable,
                                    })).await;
                                }
                                Ok(ClientMsg::Leave) => break,
                                Err(e) => {
                                    tracing::debug!(session_id = %session_id, error = %e, "ignoring malformed client message");
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        _ => {} // Ignore ping/pong/binary
                    }
                }

                // Server -> Client (broadcast)
                result = broadcast_rx.recv() => {
                    match result {
                        Ok(broadcast) => {
                            if !broadcast.is_for(&session_id) {
                                continue;
                            }
                            let msg = ServerMsg::MatchData(MatchDataMsg {
                                op_code: broadcast.op_code,
                                data: BASE64.encode(&broadcast.data),
                            });
                            if !send_msg(&mut sink, &msg).await {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(session_id = %session_id, "lagged by {} messages", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    }

    // Cleanup on disconnect or match end
    let _ = cmd_tx
        .send(MatchCommand::Leave {
            presences: vec![presence],
        })
        .await;
    let _ = sink.close().await;
    tracing::info!(match_id = %match_id, session_id = %session_id, "socket left match");
}
