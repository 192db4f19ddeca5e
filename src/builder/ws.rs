use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::time::Instant;

use super::api::SharedState;
use super::events::ProgressStream;
use super::models::BuildStatus;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Upgrade handler for `GET /ws/builds/{id}` — a live feed of
/// `BuildProgressEvent`s for one project.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    // Subscribe before checking status, so a transition landing between
    // the check and the subscription is not lost.
    let stream = state.orchestrator.bus().subscribe(&id);
    let already_terminal = state
        .orchestrator
        .get_project_status(&id)
        .await
        .ok()
        .and_then(|s| s.project)
        .map(|p| p.status.is_terminal())
        .unwrap_or(false);
    ws.on_upgrade(move |socket| run_socket(socket, stream, already_terminal))
}

/// Forward progress events with ping/pong keepalive. The `connected`
/// acknowledgment always goes out first; for a project that already
/// reached a terminal state the stream ends right after it. Otherwise
/// the loop runs until a terminal phase event is forwarded, the client
/// disconnects, or the keepalive times out.
async fn run_socket(socket: WebSocket, mut stream: ProgressStream, already_terminal: bool) {
    let (mut sender, mut receiver) = socket.split();

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            // ── Periodic ping ───────────────────────────────────────
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            // ── Progress forwarding ─────────────────────────────────
            event = stream.recv() => {
                match event {
                    Some(event) => {
                        let terminal = event
                            .phase
                            .parse::<BuildStatus>()
                            .map(|s| s.is_terminal())
                            .unwrap_or(false);
                        let json = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                tracing::warn!(error = %e, "failed to serialize progress event");
                                continue;
                            }
                        };
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                        // Late subscriber to a finished build: ack only.
                        let was_connected = event.phase == "connected";
                        if terminal || (was_connected && already_terminal) {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // ── Client messages (pong, close, etc.) ─────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Ignore other messages from the client
                    }
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}
