//! # Webcam Streamer
//!
//! Low-latency webcam streaming to many WebSocket viewers, with optional
//! per-frame processing and live reconfiguration from any connected client.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────── capture thread ─────────────────────────────┐
//! │  ┌─────────────┐   ┌─────────────────┐   ┌──────────────┐              │
//! │  │ FrameSource │──▶│ FrameProcessor  │──▶│ JpegEncoder  │──┐           │
//! │  │ (camera)    │   │ (skin / hats)   │   │              │  │           │
//! │  └─────────────┘   └─────────────────┘   └──────────────┘  │           │
//! │         ▲ resolution            ▲ processing mode     quality          │
//! └─────────┼───────────────────────┼──────────────────────────┼───────────┘
//!           │                       │                          ▼
//!   ┌───────┴───────────────────────┴───────┐      ┌──────────────────────┐
//!   │   SharedCaptureConfig (RwLock)        │      │ FrameBuffer (1 slot) │
//!   └───────────────────▲───────────────────┘      └──────────┬───────────┘
//!                       │ {"type":"config"}                   │ latest frame
//!   ┌───────────────────┴───────────────────┐      ┌──────────▼───────────┐
//!   │  ConnectionHandler (one per client)   │◀────▶│   BroadcastLoop      │
//!   │  meta → client, config ← client       │      │   fan-out per tick   │
//!   └───────────────────┬───────────────────┘      └──────────┬───────────┘
//!                       │ add / remove                        │ snapshot
//!                       ▼                                     ▼
//!               ┌──────────────────────────────────────────────────┐
//!               │           ClientRegistry (max_clients)           │
//!               └──────────────────────────────────────────────────┘
//! ```

pub mod broadcast;
pub mod capture;
pub mod config;
pub mod error;
pub mod processing;
pub mod protocol;
pub mod web;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default camera device index
    pub const DEFAULT_CAMERA_INDEX: u32 = 0;

    /// Default capture width in pixels
    pub const DEFAULT_WIDTH: u32 = 640;

    /// Default capture height in pixels
    pub const DEFAULT_HEIGHT: u32 = 480;

    /// Default broadcast frame rate
    pub const DEFAULT_FPS: u32 = 15;

    /// Default JPEG quality (1-100)
    pub const DEFAULT_JPEG_QUALITY: u8 = 80;

    /// Default WebSocket port
    pub const DEFAULT_WS_PORT: u16 = 8765;

    /// Maximum simultaneous viewers
    pub const DEFAULT_MAX_CLIENTS: usize = 10;

    /// Smallest accepted resolution
    pub const MIN_RESOLUTION: (u32, u32) = (160, 120);

    /// Largest accepted resolution
    pub const MAX_RESOLUTION: (u32, u32) = (1920, 1080);

    /// Accepted frame rate range
    pub const MIN_FPS: u32 = 1;
    pub const MAX_FPS: u32 = 60;

    /// Accepted JPEG quality range
    pub const MIN_JPEG_QUALITY: u8 = 1;
    pub const MAX_JPEG_QUALITY: u8 = 100;

    /// Delay between camera reads in milliseconds
    pub const CAPTURE_LOOP_DELAY_MS: u64 = 10;

    /// Close code sent when admission is refused (policy violation)
    pub const CLOSE_CODE_SERVER_FULL: u16 = 1008;

    /// Close reason sent when admission is refused
    pub const CLOSE_REASON_SERVER_FULL: &str = "Server full";

    /// Close code sent on server shutdown or lost liveness
    pub const CLOSE_CODE_GOING_AWAY: u16 = 1001;
}
