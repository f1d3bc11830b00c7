//! Per-connection WebSocket handling
//!
//! Each connection runs one task that owns the socket. Frames arrive from the
//! broadcast loop through a bounded queue; every socket write is bounded by
//! `send_timeout`, so a stalled peer costs only its own task.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::Response,
};
use futures_util::{Sink, SinkExt, StreamExt};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::broadcast::{ClientHandle, ClientId, SharedRegistry};
use crate::capture::SharedCaptureConfig;
use crate::constants::{CLOSE_CODE_GOING_AWAY, CLOSE_CODE_SERVER_FULL, CLOSE_REASON_SERVER_FULL};
use crate::error::NetworkError;
use crate::protocol::{parse_client_message, AppliedConfig, ClientMessage, ServerMessage};
use crate::web::server::AppState;

/// Upgrade handler for `/ws`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}

/// Removes the client from the registry when the connection task ends
struct Registration {
    registry: SharedRegistry,
    id: ClientId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(client) = self.registry.remove(&self.id) {
            info!(
                "Client {} ({}) removed, {} remaining",
                client.id,
                client.addr,
                self.registry.len()
            );
        }
    }
}

fn close_message(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Cow::Borrowed(reason),
    }))
}

async fn send_bounded<S>(
    sink: &mut S,
    message: Message,
    limit: Duration,
) -> Result<(), NetworkError>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    match tokio::time::timeout(limit, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(NetworkError::SendFailed(e.to_string())),
        Err(_) => Err(NetworkError::Timeout),
    }
}

/// Drive one client connection from admission to removal
pub async fn handle_socket(mut socket: WebSocket, addr: SocketAddr, state: Arc<AppState>) {
    let (frames_tx, mut frames_rx) = mpsc::channel(state.server.client_queue_depth.max(1));
    let client = ClientHandle::new(addr, frames_tx);
    let id = client.id;

    match state.registry.add(client) {
        Ok(count) => info!(
            "Client {} connected from {} ({}/{})",
            id,
            addr,
            count,
            state.registry.max_clients()
        ),
        Err(e) => {
            warn!("Rejecting connection from {}: {}", addr, e);
            let _ = send_bounded(
                &mut socket,
                close_message(CLOSE_CODE_SERVER_FULL, CLOSE_REASON_SERVER_FULL),
                state.server.send_timeout(),
            )
            .await;
            return;
        }
    }
    let _registration = Registration {
        registry: state.registry.clone(),
        id,
    };

    let send_timeout = state.server.send_timeout();
    let mut shutdown = state.shutdown.clone();
    if *shutdown.borrow_and_update() {
        let _ = send_bounded(
            &mut socket,
            close_message(CLOSE_CODE_GOING_AWAY, "Server shutting down"),
            send_timeout,
        )
        .await;
        return;
    }

    let meta = ServerMessage::meta(&state.capture_config).to_json();
    if let Err(e) = send_bounded(&mut socket, Message::Text(meta), send_timeout).await {
        warn!("Client {}: failed to send metadata: {}", id, e);
        return;
    }

    let (mut sink, mut stream) = socket.split();

    let ping_interval = state.server.ping_interval().max(Duration::from_secs(1));
    let liveness = ping_interval + state.server.ping_timeout();
    let mut pings = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    pings.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    let reason = loop {
        tokio::select! {
            frame = frames_rx.recv() => {
                let Some(frame) = frame else {
                    break "removed from registry";
                };
                let message = Message::Binary(frame.data.to_vec());
                if let Err(e) = send_bounded(&mut sink, message, send_timeout).await {
                    warn!("Client {}: frame send failed: {}", id, e);
                    break "send failed";
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        handle_text(&text, id, &state.capture_config);
                    }
                    Some(Ok(Message::Binary(data))) => {
                        last_seen = Instant::now();
                        warn!("Client {}: ignoring {} byte binary message", id, data.len());
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        last_seen = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => break "closed by client",
                    Some(Err(e)) => {
                        debug!("Client {}: receive error: {}", id, e);
                        break "receive error";
                    }
                }
            }
            _ = pings.tick() => {
                if last_seen.elapsed() > liveness {
                    warn!("Client {}: no traffic for {:?}", id, last_seen.elapsed());
                    let _ = send_bounded(
                        &mut sink,
                        close_message(CLOSE_CODE_GOING_AWAY, "Ping timeout"),
                        send_timeout,
                    )
                    .await;
                    break "ping timeout";
                }
                let ping = Message::Ping(Vec::new());
                if let Err(e) = send_bounded(&mut sink, ping, send_timeout).await {
                    warn!("Client {}: ping failed: {}", id, e);
                    break "ping failed";
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = send_bounded(
                        &mut sink,
                        close_message(CLOSE_CODE_GOING_AWAY, "Server shutting down"),
                        send_timeout,
                    )
                    .await;
                    break "server shutdown";
                }
            }
        }
    };

    info!("Client {} disconnected: {}", id, reason);
}

/// Handle one text message from a client. Returns the applied changes for
/// config messages.
pub fn handle_text(
    text: &str,
    client: ClientId,
    config: &SharedCaptureConfig,
) -> Option<AppliedConfig> {
    let request = match parse_client_message(text) {
        Ok(ClientMessage::Config(request)) => request,
        Ok(ClientMessage::Other(kind)) => {
            debug!("Client {}: ignoring message type {:?}", client, kind);
            return None;
        }
        Err(e) => {
            warn!("Client {}: dropping message: {}", client, e);
            return None;
        }
    };

    for field in &request.rejected {
        warn!("Client {}: invalid {} in config request", client, field);
    }

    let applied = request.apply(config);
    if !applied.is_empty() {
        info!("Client {} updated config: {:?}", client, applied);
    }
    Some(applied)
}
