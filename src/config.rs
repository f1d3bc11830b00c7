//! Application configuration
//!
//! Configuration is read from a TOML file. Every section and field is
//! optional; anything missing falls back to the built-in defaults.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub capture: CaptureSettings,
    pub limits: Limits,
}

/// WebSocket server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the listener to
    pub bind_address: String,
    /// Listener port
    pub port: u16,
    /// Maximum simultaneously connected viewers
    pub max_clients: usize,
    /// Interval between liveness pings, in seconds
    pub ping_interval_secs: u64,
    /// How long a ping may go unanswered, in seconds
    pub ping_timeout_secs: u64,
    /// Upper bound on a single socket write, in seconds
    pub send_timeout_secs: u64,
    /// Frames queued per client before new frames are skipped
    pub client_queue_depth: usize,
    /// How long shutdown waits for client connections to close, in milliseconds
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_WS_PORT,
            max_clients: DEFAULT_MAX_CLIENTS,
            ping_interval_secs: 20,
            ping_timeout_secs: 10,
            send_timeout_secs: 5,
            client_queue_depth: 2,
            shutdown_grace_ms: 2000,
        }
    }
}

impl ServerConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Capture and encoding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Camera device index
    pub camera_index: u32,
    /// Initial capture width
    pub width: u32,
    /// Initial capture height
    pub height: u32,
    /// Broadcast frame rate
    pub target_fps: u32,
    /// Initial JPEG quality
    pub jpeg_quality: u8,
    /// Sleep between capture cycles, in milliseconds
    pub loop_delay_ms: u64,
    /// Sleep after a failed read, in milliseconds
    pub retry_delay_ms: u64,
    /// Directory holding hat overlays (PNG with alpha)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hats_dir: Option<PathBuf>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            camera_index: DEFAULT_CAMERA_INDEX,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            target_fps: DEFAULT_FPS,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            loop_delay_ms: CAPTURE_LOOP_DELAY_MS,
            retry_delay_ms: CAPTURE_LOOP_DELAY_MS,
            hats_dir: None,
        }
    }
}

impl CaptureSettings {
    pub fn loop_delay(&self) -> Duration {
        Duration::from_millis(self.loop_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Broadcast tick period derived from the target frame rate
    pub fn broadcast_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps.max(1) as f64)
    }
}

/// Envelope every client-requested value is clamped into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub min_resolution: (u32, u32),
    pub max_resolution: (u32, u32),
    pub min_fps: u32,
    pub max_fps: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            min_resolution: MIN_RESOLUTION,
            max_resolution: MAX_RESOLUTION,
            min_fps: MIN_FPS,
            max_fps: MAX_FPS,
        }
    }
}

impl Limits {
    /// Clamp a requested resolution into the envelope
    pub fn clamp_resolution(&self, width: i64, height: i64) -> (u32, u32) {
        let width = width.clamp(self.min_resolution.0 as i64, self.max_resolution.0 as i64);
        let height = height.clamp(self.min_resolution.1 as i64, self.max_resolution.1 as i64);
        (width as u32, height as u32)
    }

    /// Clamp a requested frame rate into the envelope
    pub fn clamp_fps(&self, fps: i64) -> u32 {
        fps.clamp(self.min_fps as i64, self.max_fps as i64) as u32
    }
}

/// Clamp a requested JPEG quality into [1, 100]
pub fn clamp_quality(quality: i64) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY as i64, MAX_JPEG_QUALITY as i64) as u8
}

impl AppConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse {:?}: {}", path, e)))?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Platform config location, e.g. `~/.config/webcam-streamer/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "webcam-streamer")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from the default location, or defaults if there is none
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let limits = &self.limits;
        if limits.min_resolution.0 > limits.max_resolution.0
            || limits.min_resolution.1 > limits.max_resolution.1
        {
            return Err(Error::Config("Resolution limits are inverted".to_string()));
        }
        if limits.min_fps == 0 || limits.min_fps > limits.max_fps {
            return Err(Error::Config("Invalid fps limits".to_string()));
        }

        let capture = &self.capture;
        if limits.clamp_resolution(capture.width as i64, capture.height as i64)
            != (capture.width, capture.height)
        {
            return Err(Error::Config(format!(
                "Resolution {}x{} is outside the allowed range",
                capture.width, capture.height
            )));
        }
        if !(limits.min_fps..=limits.max_fps).contains(&capture.target_fps) {
            return Err(Error::Config(format!(
                "Target fps {} must be between {} and {}",
                capture.target_fps, limits.min_fps, limits.max_fps
            )));
        }
        if !(MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&capture.jpeg_quality) {
            return Err(Error::Config("JPEG quality must be between 1 and 100".to_string()));
        }

        let server = &self.server;
        if server.max_clients == 0 {
            return Err(Error::Config("max_clients must be at least 1".to_string()));
        }
        if server.client_queue_depth == 0 {
            return Err(Error::Config("client_queue_depth must be at least 1".to_string()));
        }
        if server.ping_interval_secs == 0 {
            return Err(Error::Config("ping_interval_secs must be at least 1".to_string()));
        }

        Ok(())
    }
}
