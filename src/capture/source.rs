//! Frame sources
//!
//! A [`FrameSource`] owns the capture device. Sources are created and driven
//! entirely on the capture thread, so they do not need to be `Send`.

use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use super::frame::Frame;
use crate::error::CaptureError;

/// Capture device abstraction
pub trait FrameSource {
    /// Human readable device name
    fn name(&self) -> String;

    /// Open the device at the requested resolution
    fn open(&mut self, width: u32, height: u32) -> Result<(), CaptureError>;

    /// Read one frame. Failures are transient from the caller's point of view.
    fn read(&mut self) -> Result<Frame, CaptureError>;

    /// Ask the device for a new resolution. Devices may ignore the request;
    /// the capture loop resizes whatever comes back.
    fn set_resolution(&mut self, width: u32, height: u32);

    /// Release the device. Must be safe to call more than once.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn open(&mut self, width: u32, height: u32) -> Result<(), CaptureError> {
        (**self).open(width, height)
    }

    fn read(&mut self) -> Result<Frame, CaptureError> {
        (**self).read()
    }

    fn set_resolution(&mut self, width: u32, height: u32) {
        (**self).set_resolution(width, height)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

/// Synthetic moving gradient, useful without camera hardware
pub struct TestPatternSource {
    width: u32,
    height: u32,
    /// Fixed output size regardless of requested resolution
    native_resolution: Option<(u32, u32)>,
    open: bool,
    available: bool,
    frame_number: u64,
    pending_failures: Arc<AtomicU32>,
    released: Arc<AtomicBool>,
}

impl TestPatternSource {
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            native_resolution: None,
            open: false,
            available: true,
            frame_number: 0,
            pending_failures: Arc::new(AtomicU32::new(0)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A source whose device can never be opened
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Always produce frames of this size, like cameras that ignore
    /// resolution requests
    pub fn with_native_resolution(mut self, width: u32, height: u32) -> Self {
        self.native_resolution = Some((width, height));
        self
    }

    /// Handle that makes the next `n` reads fail
    pub fn failure_injector(&self) -> Arc<AtomicU32> {
        self.pending_failures.clone()
    }

    /// Flag set once the device has been released
    pub fn release_flag(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }

    fn render(&self, width: u32, height: u32) -> RgbImage {
        let base = (self.frame_number % 256) as u8;
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([
                base.wrapping_add((x % 256) as u8),
                base.wrapping_add((y % 256) as u8),
                base.wrapping_add(((x + y) % 256) as u8),
            ])
        })
    }
}

impl Default for TestPatternSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for TestPatternSource {
    fn name(&self) -> String {
        "test-pattern".to_string()
    }

    fn open(&mut self, width: u32, height: u32) -> Result<(), CaptureError> {
        if !self.available {
            return Err(CaptureError::DeviceUnavailable(
                "test pattern configured as unavailable".to_string(),
            ));
        }
        self.width = width;
        self.height = height;
        self.open = true;
        self.released.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, CaptureError> {
        if !self.open {
            return Err(CaptureError::ReadFailure("device is closed".to_string()));
        }

        let injected = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(CaptureError::ReadFailure("injected failure".to_string()));
        }

        let (width, height) = self.native_resolution.unwrap_or((self.width, self.height));
        let image = self.render(width, height);
        self.frame_number = self.frame_number.wrapping_add(1);
        Ok(Frame::new(image))
    }

    fn set_resolution(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.released.store(true, Ordering::SeqCst);
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(feature = "camera")]
pub use camera::CameraSource;

#[cfg(feature = "camera")]
mod camera {
    use nokhwa::{
        pixel_format::RgbFormat,
        utils::{CameraIndex, RequestedFormat, RequestedFormatType, Resolution},
        Camera,
    };

    use super::FrameSource;
    use crate::capture::frame::Frame;
    use crate::error::CaptureError;

    /// Physical webcam via nokhwa
    pub struct CameraSource {
        index: u32,
        camera: Option<Camera>,
    }

    impl CameraSource {
        pub fn new(index: u32) -> Self {
            Self {
                index,
                camera: None,
            }
        }
    }

    impl FrameSource for CameraSource {
        fn name(&self) -> String {
            match &self.camera {
                Some(camera) => camera.info().human_name(),
                None => format!("camera {}", self.index),
            }
        }

        fn open(&mut self, width: u32, height: u32) -> Result<(), CaptureError> {
            let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::None);
            let mut camera = Camera::new(CameraIndex::Index(self.index), requested).map_err(|e| {
                CaptureError::DeviceUnavailable(format!("camera {}: {}", self.index, e))
            })?;

            if let Err(e) = camera.set_resolution(Resolution::new(width, height)) {
                tracing::warn!("Camera rejected {}x{}: {}", width, height, e);
            }

            camera.open_stream().map_err(|e| {
                CaptureError::DeviceUnavailable(format!("camera {}: {}", self.index, e))
            })?;

            self.camera = Some(camera);
            Ok(())
        }

        fn read(&mut self) -> Result<Frame, CaptureError> {
            let camera = self
                .camera
                .as_mut()
                .ok_or_else(|| CaptureError::ReadFailure("device is closed".to_string()))?;

            let buffer = camera
                .frame()
                .map_err(|e| CaptureError::ReadFailure(e.to_string()))?;
            let image = buffer
                .decode_image::<RgbFormat>()
                .map_err(|e| CaptureError::ReadFailure(e.to_string()))?;

            Ok(Frame::new(image))
        }

        fn set_resolution(&mut self, width: u32, height: u32) {
            if let Some(camera) = self.camera.as_mut() {
                if let Err(e) = camera.set_resolution(Resolution::new(width, height)) {
                    tracing::warn!("Camera rejected {}x{}: {}", width, height, e);
                }
            }
        }

        fn close(&mut self) {
            if let Some(mut camera) = self.camera.take() {
                if let Err(e) = camera.stop_stream() {
                    tracing::warn!("Failed to stop camera stream: {}", e);
                }
            }
        }

        fn is_open(&self) -> bool {
            self.camera.is_some()
        }
    }
}
