//! HTTP / WebSocket server

use axum::{routing::get, Router};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use super::handlers;
use super::websocket;
use crate::broadcast::SharedRegistry;
use crate::capture::{CaptureState, SharedCaptureConfig, SharedFrameBuffer};
use crate::config::ServerConfig;
use crate::error::NetworkError;

/// Shared application state for handlers
pub struct AppState {
    pub capture_config: SharedCaptureConfig,
    pub buffer: SharedFrameBuffer,
    pub registry: SharedRegistry,
    pub server: ServerConfig,
    pub capture_state: Arc<Mutex<CaptureState>>,
    pub started_at: Instant,
    /// Flips to `true` when connected clients must close
    pub shutdown: watch::Receiver<bool>,
}

/// Web server
pub struct WebServer {
    config: ServerConfig,
    state: Arc<AppState>,
    close_tx: watch::Sender<bool>,
}

impl WebServer {
    pub fn new(
        config: ServerConfig,
        capture_config: SharedCaptureConfig,
        buffer: SharedFrameBuffer,
        registry: SharedRegistry,
        capture_state: Arc<Mutex<CaptureState>>,
    ) -> Self {
        let (close_tx, close_rx) = watch::channel(false);
        let state = Arc::new(AppState {
            capture_config,
            buffer,
            registry,
            server: config.clone(),
            capture_state,
            started_at: Instant::now(),
            shutdown: close_rx,
        });

        Self {
            config,
            state,
            close_tx,
        }
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Build the router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(websocket::ws_handler))
            .route("/frame.jpg", get(handlers::get_frame))
            .route("/status", get(handlers::get_status))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind the listener and serve in the background
    pub async fn start(self) -> Result<ServerHandle, NetworkError> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        let app = self.router();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        info!("WebSocket server listening on ws://{}/ws", local_addr);

        let task = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await
            .map_err(|e| NetworkError::ServerFailed(e.to_string()))
        });

        Ok(ServerHandle {
            local_addr,
            stop_accepting: Some(stop_tx),
            close_tx: self.close_tx,
            task: Some(task),
        })
    }
}

/// Handle to a running server
pub struct ServerHandle {
    local_addr: SocketAddr,
    stop_accepting: Option<oneshot::Sender<()>>,
    close_tx: watch::Sender<bool>,
    task: Option<JoinHandle<Result<(), NetworkError>>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting new connections
    pub fn stop_accepting(&mut self) {
        if let Some(tx) = self.stop_accepting.take() {
            let _ = tx.send(());
            info!("Listener closed");
        }
    }

    /// Ask every connected client to close
    pub fn close_clients(&self) {
        let _ = self.close_tx.send(true);
    }

    /// Wait for the server task to finish, bounded by `timeout`
    pub async fn join(&mut self, timeout: Duration) -> Result<(), NetworkError> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(NetworkError::ServerFailed(e.to_string())),
            Err(_) => {
                warn!("Server did not stop within {:?}", timeout);
                Err(NetworkError::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{BroadcastLoop, ClientRegistry};
    use crate::capture::{create_shared_buffer, CaptureConfig, EncodedFrame};
    use crate::config::{CaptureSettings, Limits};
    use bytes::Bytes;
    use chrono::Utc;
    use futures_util::StreamExt;
    use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

    fn server(config: ServerConfig) -> WebServer {
        let max_clients = config.max_clients;
        WebServer::new(
            config,
            SharedCaptureConfig::new(
                CaptureConfig::from_settings(&CaptureSettings::default()),
                Limits::default(),
            ),
            create_shared_buffer(),
            Arc::new(ClientRegistry::new(max_clients)),
            Arc::new(Mutex::new(CaptureState::Running)),
        )
    }

    fn loopback() -> ServerConfig {
        ServerConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut handle = server(loopback()).start().await.unwrap();
        assert_ne!(handle.local_addr().port(), 0);

        handle.stop_accepting();
        handle.close_clients();
        handle.join(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_clients_signals_state() {
        let web = server(loopback());
        let mut shutdown = web.state().shutdown.clone();
        let mut handle = web.start().await.unwrap();

        handle.close_clients();
        shutdown.changed().await.unwrap();
        assert!(*shutdown.borrow());

        handle.stop_accepting();
        handle.join(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let first = server(loopback()).start().await.unwrap();
        let taken = ServerConfig {
            port: first.local_addr().port(),
            ..loopback()
        };
        assert!(matches!(
            server(taken).start().await,
            Err(NetworkError::BindFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_websocket_session_end_to_end() {
        let web = server(ServerConfig {
            max_clients: 1,
            ..loopback()
        });
        let state = web.state();
        let mut handle = web.start().await.unwrap();
        let url = format!("ws://{}/ws", handle.local_addr());
        let wait = Duration::from_secs(5);

        // First client is admitted and greeted with metadata
        let (mut first, _) = connect_async(url.as_str()).await.unwrap();
        let greeting = tokio::time::timeout(wait, first.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(
            greeting,
            WsMessage::Text(r#"{"type":"meta","width":640,"height":480,"fps":15}"#.to_string())
        );
        assert_eq!(state.registry.len(), 1);

        // Second client is refused with a policy close
        let (mut second, _) = connect_async(url.as_str()).await.unwrap();
        match tokio::time::timeout(wait, second.next()).await.unwrap() {
            Some(Ok(WsMessage::Close(Some(frame)))) => {
                assert_eq!(u16::from(frame.code), 1008);
                assert_eq!(frame.reason, "Server full");
            }
            other => panic!("expected close frame, got {:?}", other),
        }
        assert_eq!(state.registry.len(), 1);

        // Frames written to the buffer reach the admitted client
        let mut broadcast = BroadcastLoop::spawn(
            state.buffer.clone(),
            state.registry.clone(),
            Duration::from_millis(5),
        );
        state.buffer.write(Arc::new(EncodedFrame {
            data: Bytes::from_static(&[0xFF, 0xD8, 1, 2, 0xFF, 0xD9]),
            width: 640,
            height: 480,
            quality: 80,
            sequence: 1,
            captured_at: Utc::now(),
            detection: None,
        }));
        let received = loop {
            match tokio::time::timeout(wait, first.next()).await.unwrap() {
                Some(Ok(WsMessage::Binary(data))) => break data,
                Some(Ok(_)) => continue,
                other => panic!("expected a frame, got {:?}", other),
            }
        };
        assert_eq!(received, vec![0xFF, 0xD8, 1, 2, 0xFF, 0xD9]);

        // Dropping the connection removes the client
        drop(first);
        assert!(state.registry.wait_until_empty(wait).await);

        broadcast.stop().await;
        handle.stop_accepting();
        handle.close_clients();
        handle.join(wait).await.unwrap();
    }
}
