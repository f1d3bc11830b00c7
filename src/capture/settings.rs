//! Live capture configuration shared between the capture loop and clients
//!
//! Any connected client may change these values; the last write wins. The
//! capture loop takes one snapshot per cycle, so a change lands on the next
//! frame at the earliest.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

use crate::config::{clamp_quality, CaptureSettings, Limits};
use crate::processing::Processing;

/// Values the capture loop reads every cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
    /// Recorded and reported to new clients; the broadcast period does not follow it
    pub fps: u32,
    pub processing: Processing,
}

impl CaptureConfig {
    pub fn from_settings(settings: &CaptureSettings) -> Self {
        Self {
            width: settings.width,
            height: settings.height,
            jpeg_quality: clamp_quality(settings.jpeg_quality as i64),
            fps: settings.target_fps,
            processing: Processing::None,
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Handle to the shared capture configuration
#[derive(Clone)]
pub struct SharedCaptureConfig {
    inner: Arc<RwLock<CaptureConfig>>,
    limits: Limits,
}

impl SharedCaptureConfig {
    pub fn new(config: CaptureConfig, limits: Limits) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
            limits,
        }
    }

    /// Consistent copy of the current configuration
    pub fn snapshot(&self) -> CaptureConfig {
        self.inner.read().clone()
    }

    /// Set the capture resolution, clamped into the configured envelope.
    /// Returns the effective resolution.
    pub fn set_resolution(&self, width: i64, height: i64) -> (u32, u32) {
        let (width, height) = self.limits.clamp_resolution(width, height);
        let mut config = self.inner.write();
        config.width = width;
        config.height = height;
        (width, height)
    }

    /// Set the JPEG quality, clamped into [1, 100]. Returns the effective value.
    pub fn set_quality(&self, quality: i64) -> u8 {
        let quality = clamp_quality(quality);
        self.inner.write().jpeg_quality = quality;
        quality
    }

    /// Record a requested frame rate, clamped into the envelope
    pub fn set_fps(&self, fps: i64) -> u32 {
        let fps = self.limits.clamp_fps(fps);
        self.inner.write().fps = fps;
        fps
    }

    pub fn set_processing(&self, processing: Processing) {
        self.inner.write().processing = processing;
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.inner.read().resolution()
    }

    pub fn quality(&self) -> u8 {
        self.inner.read().jpeg_quality
    }

    pub fn fps(&self) -> u32 {
        self.inner.read().fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> SharedCaptureConfig {
        SharedCaptureConfig::new(
            CaptureConfig::from_settings(&CaptureSettings::default()),
            Limits::default(),
        )
    }

    #[test]
    fn test_defaults() {
        let config = shared().snapshot();
        assert_eq!(config.resolution(), (640, 480));
        assert_eq!(config.jpeg_quality, 80);
        assert_eq!(config.fps, 15);
        assert_eq!(config.processing, Processing::None);
    }

    #[test]
    fn test_resolution_is_clamped() {
        let config = shared();
        assert_eq!(config.set_resolution(10, 10), (160, 120));
        assert_eq!(config.resolution(), (160, 120));
        assert_eq!(config.set_resolution(5000, 5000), (1920, 1080));
        assert_eq!(config.resolution(), (1920, 1080));
    }

    #[test]
    fn test_quality_is_clamped() {
        let config = shared();
        assert_eq!(config.set_quality(0), 1);
        assert_eq!(config.quality(), 1);
        assert_eq!(config.set_quality(200), 100);
        assert_eq!(config.quality(), 100);
    }

    #[test]
    fn test_last_writer_wins_across_handles() {
        let a = shared();
        let b = a.clone();
        a.set_quality(30);
        b.set_quality(70);
        assert_eq!(a.quality(), 70);
    }

    #[test]
    fn test_fps_is_recorded() {
        let config = shared();
        assert_eq!(config.set_fps(90), 60);
        assert_eq!(config.fps(), 60);
    }
}
