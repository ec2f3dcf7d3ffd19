use crate::error::ApiError;
use crate::rest::sessions::current_user;
use crate::state::AppState;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tl_pty::PtyProcess;
use tl_store::SessionStatus;
use tl_ws::{Attachment, ClientFrame, Hub, ServerFrame};
use tokio::time::MissedTickBehavior;

/// Must be shorter than the pong deadline.
const PING_PERIOD: Duration = Duration::from_secs(54);
const PONG_DEADLINE: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
pub struct AttachQuery {
    /// Accepted for parity with `Authorization: Bearer`; token validation is
    /// an external collaborator.
    #[allow(dead_code)]
    pub token: Option<String>,
}

pub async fn attach_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(_query): Query<AttachQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let session = match state.sessions.get(&id) {
        Ok(session) => session,
        Err(err) => return ApiError::from(err).into_response(),
    };

    if session.user_id != current_user(&headers) {
        return ApiError::forbidden().into_response();
    }

    if session.status != SessionStatus::Running {
        return ApiError::session_not_running().into_response();
    }

    let Some(context) = state.sessions.get_context(&id) else {
        return ApiError::session_not_running().into_response();
    };
    if context.process.is_closed() {
        return ApiError::session_not_running().into_response();
    }

    let process = context.process;
    ws.on_upgrade(move |socket| handle_socket(socket, state, id, process))
}

async fn handle_socket(
    mut socket: WebSocket,
    state: AppState,
    session_id: String,
    process: Arc<PtyProcess>,
) {
    let hub = state.ws.hub_manager().get_or_create(&session_id);
    install_message_routing(&hub, Arc::clone(&process));

    let (attachment, mut outbound) = Attachment::new();

    // History is enqueued before registration so it is always the first
    // frame this attachment sees; live bytes follow.
    state.ws.send_history(&attachment, &process);
    hub.register(Arc::clone(&attachment));
    tracing::debug!(session_id = %session_id, attachment_id = %attachment.id(), "client attached");

    let mut ping = tokio::time::interval(PING_PERIOD);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ping.reset();
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        last_seen = Instant::now();
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(frame) => hub.handle_message(&attachment, frame),
                            Err(err) => attachment.send(ServerFrame::Error {
                                error: format!("invalid frame: {err}"),
                            }),
                        }
                    }
                    Some(Ok(WsMessage::Pong(_))) => last_seen = Instant::now(),
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => last_seen = Instant::now(),
                    Some(Err(_)) => break,
                }
            }
            frame = outbound.recv() => {
                match frame {
                    Some(frame) => {
                        let payload = match serde_json::to_string(&frame) {
                            Ok(payload) => payload,
                            Err(err) => {
                                tracing::warn!(session_id = %session_id, error = %err, "frame encode failed");
                                continue;
                            }
                        };
                        if socket.send(WsMessage::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = attachment.wait_closed() => break,
            _ = ping.tick() => {
                if last_seen.elapsed() > PONG_DEADLINE {
                    tracing::debug!(session_id = %session_id, "pong deadline missed");
                    break;
                }
                if socket.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    hub.unregister(&attachment);
    tracing::debug!(session_id = %session_id, "client detached");
}

/// Routes attachment frames to the current process. Installed per
/// connection so a restarted session's new process takes over.
fn install_message_routing(hub: &Arc<Hub>, process: Arc<PtyProcess>) {
    hub.set_on_message(Some(Box::new(move |attachment, frame| match frame {
        ClientFrame::Stdin { data } => {
            if data.is_empty() {
                return;
            }
            if let Err(err) = process.write(data.as_bytes()) {
                tracing::warn!(session_id = %process.id(), error = %err, "stdin write failed");
            }
        }
        ClientFrame::Command { data } => {
            if data.is_empty() {
                return;
            }
            // The structured write sleeps between its steps; run it off the
            // socket loop.
            let process = Arc::clone(&process);
            tokio::spawn(async move {
                if let Err(err) = process.write_command(data.as_bytes()).await {
                    tracing::warn!(session_id = %process.id(), error = %err, "command write failed");
                }
            });
        }
        ClientFrame::Resize { rows, cols } => {
            if rows == 0 || cols == 0 {
                return;
            }
            if let Err(err) = process.resize(rows, cols) {
                tracing::warn!(session_id = %process.id(), error = %err, "resize failed");
            }
        }
        ClientFrame::Ping => attachment.send(ServerFrame::Pong),
    })));
}
