//! HTTP API handlers

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::broadcast::ClientInfo;
use crate::capture::{CaptureConfig, CaptureState, EncodedFrame};
use crate::processing::Detection;
use crate::web::server::AppState;

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
        }
    }
}

/// Summary of the most recent frame
#[derive(serde::Serialize)]
pub struct LastFrame {
    pub sequence: u64,
    pub size: usize,
    pub captured_at: DateTime<Utc>,
    pub detection: Option<Detection>,
}

impl From<&EncodedFrame> for LastFrame {
    fn from(frame: &EncodedFrame) -> Self {
        Self {
            sequence: frame.sequence,
            size: frame.len(),
            captured_at: frame.captured_at,
            detection: frame.detection.clone(),
        }
    }
}

/// Server status
#[derive(serde::Serialize)]
pub struct SystemStatus {
    #[serde(flatten)]
    pub config: CaptureConfig,
    pub capture_state: CaptureState,
    pub clients: Vec<ClientInfo>,
    pub max_clients: usize,
    pub last_frame: Option<LastFrame>,
    pub frames_written: u64,
    pub frames_read: u64,
    pub uptime_seconds: u64,
}

/// Get server status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SystemStatus>> {
    let last_frame = state.buffer.read().map(|frame| LastFrame::from(frame.as_ref()));
    let buffer_stats = state.buffer.stats();
    let status = SystemStatus {
        config: state.capture_config.snapshot(),
        capture_state: *state.capture_state.lock(),
        clients: state.registry.infos(),
        max_clients: state.registry.max_clients(),
        last_frame,
        frames_written: buffer_stats.writes,
        frames_read: buffer_stats.reads,
        uptime_seconds: state.started_at.elapsed().as_secs(),
    };

    Json(ApiResponse::ok(status))
}

/// Latest JPEG frame, or 204 before the first frame
pub async fn get_frame(State(state): State<Arc<AppState>>) -> Response {
    match state.buffer.read() {
        Some(frame) => (
            [
                (header::CONTENT_TYPE, "image/jpeg"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            frame.data.clone(),
        )
            .into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}
