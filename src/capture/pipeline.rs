//! Capture loop: source → processor → encoder → frame buffer
//!
//! The loop runs on a dedicated thread because device reads block. It opens
//! the source on that thread and reports the outcome back before `start`
//! returns, so a missing camera is a startup error rather than a silent
//! background failure.

use chrono::Utc;
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::buffer::SharedFrameBuffer;
use super::encoder::Encoder;
use super::frame::EncodedFrame;
use super::settings::SharedCaptureConfig;
use super::source::FrameSource;
use crate::error::CaptureError;
use crate::processing::FrameProcessor;

/// Capture loop lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Idle,
    Initializing,
    Running,
    Stopped,
}

/// Timing knobs for the capture thread
#[derive(Debug, Clone, Copy)]
pub struct CaptureTiming {
    /// Sleep between successful cycles
    pub loop_delay: Duration,
    /// Sleep after a failed read
    pub retry_delay: Duration,
}

/// Releases the device on every exit path of the capture thread
struct DeviceGuard<S: FrameSource> {
    source: S,
}

impl<S: FrameSource> Drop for DeviceGuard<S> {
    fn drop(&mut self) {
        if self.source.is_open() {
            self.source.close();
            tracing::info!("Capture device {} released", self.source.name());
        }
    }
}

/// Capture loop handle
pub struct CaptureLoop {
    config: SharedCaptureConfig,
    buffer: SharedFrameBuffer,
    timing: CaptureTiming,
    state: Arc<Mutex<CaptureState>>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    frames_captured: Arc<AtomicU64>,
    read_failures: Arc<AtomicU64>,
    encode_failures: Arc<AtomicU64>,
}

impl CaptureLoop {
    pub fn new(
        config: SharedCaptureConfig,
        buffer: SharedFrameBuffer,
        timing: CaptureTiming,
    ) -> Self {
        Self {
            config,
            buffer,
            timing,
            state: Arc::new(Mutex::new(CaptureState::Idle)),
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            frames_captured: Arc::new(AtomicU64::new(0)),
            read_failures: Arc::new(AtomicU64::new(0)),
            encode_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Open the source and start capturing.
    ///
    /// `open_source` runs on the capture thread. Returns once the device has
    /// been opened and a first test frame read, or with
    /// [`CaptureError::DeviceUnavailable`] if either step fails.
    pub fn start<F, S>(
        &mut self,
        open_source: F,
        processor: Box<dyn FrameProcessor>,
        encoder: Box<dyn Encoder>,
    ) -> Result<(), CaptureError>
    where
        F: FnOnce() -> Result<S, CaptureError> + Send + 'static,
        S: FrameSource + 'static,
    {
        {
            let mut state = self.state.lock();
            if *state != CaptureState::Idle {
                return Err(CaptureError::Thread(format!(
                    "capture loop cannot start from {:?}",
                    *state
                )));
            }
            *state = CaptureState::Initializing;
        }

        let (init_tx, init_rx) = bounded::<Result<(), CaptureError>>(1);
        let worker = Worker {
            config: self.config.clone(),
            buffer: self.buffer.clone(),
            timing: self.timing,
            state: self.state.clone(),
            running: self.running.clone(),
            frames_captured: self.frames_captured.clone(),
            read_failures: self.read_failures.clone(),
            encode_failures: self.encode_failures.clone(),
            processor,
            encoder,
        };

        self.running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("capture-loop".to_string())
            .spawn(move || {
                let source = match open_source() {
                    Ok(source) => source,
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };
                worker.run(source, init_tx);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                *self.state.lock() = CaptureState::Stopped;
                CaptureError::Thread(e.to_string())
            })?;

        let outcome = init_rx
            .recv()
            .unwrap_or_else(|_| Err(CaptureError::Thread("capture thread exited".to_string())));

        if let Err(e) = outcome {
            self.running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            *self.state.lock() = CaptureState::Stopped;
            self.buffer.close();
            return Err(e);
        }

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop capturing, join the thread and release the device.
    /// Safe to call any number of times.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!("Capture thread panicked");
            }
        }

        let mut state = self.state.lock();
        if *state != CaptureState::Stopped {
            *state = CaptureState::Stopped;
            tracing::info!("Capture loop stopped");
        }
        drop(state);
        self.buffer.close();
    }

    pub fn state(&self) -> CaptureState {
        *self.state.lock()
    }

    /// Cheap handle for status queries
    pub fn state_handle(&self) -> Arc<Mutex<CaptureState>> {
        self.state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
        }
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Capture counters
#[derive(Debug, Clone, Copy)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub read_failures: u64,
    pub encode_failures: u64,
}

/// State moved onto the capture thread
struct Worker {
    config: SharedCaptureConfig,
    buffer: SharedFrameBuffer,
    timing: CaptureTiming,
    state: Arc<Mutex<CaptureState>>,
    running: Arc<AtomicBool>,
    frames_captured: Arc<AtomicU64>,
    read_failures: Arc<AtomicU64>,
    encode_failures: Arc<AtomicU64>,
    processor: Box<dyn FrameProcessor>,
    encoder: Box<dyn Encoder>,
}

impl Worker {
    fn run<S: FrameSource>(
        mut self,
        source: S,
        init_tx: crossbeam_channel::Sender<Result<(), CaptureError>>,
    ) {
        let mut device = DeviceGuard { source };
        let (mut width, mut height) = self.config.resolution();

        if let Err(e) = self.initialize(&mut device.source, width, height) {
            tracing::error!("Capture initialization failed: {}", e);
            let _ = init_tx.send(Err(e));
            return;
        }

        *self.state.lock() = CaptureState::Running;
        let _ = init_tx.send(Ok(()));
        tracing::info!(
            "Capture started on {} at {}x{}",
            device.source.name(),
            width,
            height
        );

        let mut sequence: u64 = 0;
        while self.running.load(Ordering::Relaxed) {
            let config = self.config.snapshot();

            if config.resolution() != (width, height) {
                width = config.width;
                height = config.height;
                device.source.set_resolution(width, height);
                tracing::info!("Capture resolution set to {}x{}", width, height);
            }

            let frame = match device.source.read() {
                Ok(frame) => frame,
                Err(e) => {
                    self.read_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Failed to read frame: {}", e);
                    thread::sleep(self.timing.retry_delay);
                    continue;
                }
            };

            let frame = frame.resized(width, height);
            let (frame, detection) = self.processor.process(frame, &config.processing);

            match self.encoder.encode(&frame, config.jpeg_quality) {
                Ok(data) => {
                    sequence += 1;
                    self.buffer.write(Arc::new(EncodedFrame {
                        data,
                        width: frame.width(),
                        height: frame.height(),
                        quality: config.jpeg_quality,
                        sequence,
                        captured_at: Utc::now(),
                        detection,
                    }));
                    self.frames_captured.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.encode_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Failed to encode frame: {}", e);
                }
            }

            thread::sleep(self.timing.loop_delay);
        }

        *self.state.lock() = CaptureState::Stopped;
    }

    fn initialize<S: FrameSource>(
        &self,
        source: &mut S,
        width: u32,
        height: u32,
    ) -> Result<(), CaptureError> {
        source.open(width, height)?;
        source.read().map_err(|e| {
            CaptureError::DeviceUnavailable(format!(
                "test read from {} failed: {}",
                source.name(),
                e
            ))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::buffer::create_shared_buffer;
    use crate::capture::encoder::JpegEncoder;
    use crate::capture::settings::CaptureConfig;
    use crate::capture::source::TestPatternSource;
    use crate::capture::Frame;
    use crate::error::CodecError;
    use crate::config::{CaptureSettings, Limits};
    use crate::processing::{PassThrough, Processing, StandardProcessor};
    use bytes::Bytes;
    use std::time::Instant;

    fn timing() -> CaptureTiming {
        CaptureTiming {
            loop_delay: Duration::from_millis(1),
            retry_delay: Duration::from_millis(1),
        }
    }

    fn setup() -> (SharedCaptureConfig, SharedFrameBuffer, CaptureLoop) {
        let config = SharedCaptureConfig::new(
            CaptureConfig::from_settings(&CaptureSettings::default()),
            Limits::default(),
        );
        let buffer = create_shared_buffer();
        let capture = CaptureLoop::new(config.clone(), buffer.clone(), timing());
        (config, buffer, capture)
    }

    fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    /// Records the quality of every encode call
    struct RecordingEncoder {
        qualities: Arc<Mutex<Vec<u8>>>,
    }

    impl Encoder for RecordingEncoder {
        fn encode(&mut self, _frame: &Frame, quality: u8) -> Result<Bytes, CodecError> {
            self.qualities.lock().push(quality);
            Ok(Bytes::from_static(b"jpeg"))
        }
    }

    struct FailingEncoder;

    impl Encoder for FailingEncoder {
        fn encode(&mut self, _frame: &Frame, _quality: u8) -> Result<Bytes, CodecError> {
            Err(CodecError::EncodingFailed("nope".to_string()))
        }
    }

    #[test]
    fn test_runs_and_fills_buffer() {
        let (_config, buffer, mut capture) = setup();
        capture
            .start(
                || Ok(TestPatternSource::new()),
                Box::new(PassThrough),
                Box::new(JpegEncoder::new()),
            )
            .unwrap();

        assert_eq!(capture.state(), CaptureState::Running);
        assert!(wait_for(|| buffer.read().is_some()));

        let frame = buffer.read().unwrap();
        assert_eq!((frame.width, frame.height), (640, 480));
        assert_eq!(frame.quality, 80);
        assert_eq!(&frame.data[..2], &[0xFF, 0xD8]);

        capture.stop();
        assert_eq!(capture.state(), CaptureState::Stopped);
        assert!(buffer.read().is_none());
    }

    #[test]
    fn test_device_unavailable_never_runs() {
        let (_config, buffer, mut capture) = setup();
        let source = TestPatternSource::unavailable();
        let err = capture
            .start(move || Ok(source), Box::new(PassThrough), Box::new(JpegEncoder::new()))
            .unwrap_err();

        assert!(matches!(err, CaptureError::DeviceUnavailable(_)));
        assert_eq!(capture.state(), CaptureState::Stopped);
        assert!(!capture.is_running());
        assert!(buffer.read().is_none());
    }

    #[test]
    fn test_failed_test_read_is_device_unavailable() {
        let (_config, _buffer, mut capture) = setup();
        let source = TestPatternSource::new();
        source.failure_injector().store(1, Ordering::SeqCst);
        let released = source.release_flag();

        let err = capture
            .start(move || Ok(source), Box::new(PassThrough), Box::new(JpegEncoder::new()))
            .unwrap_err();

        assert!(matches!(err, CaptureError::DeviceUnavailable(_)));
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_read_failures_are_retried() {
        let (_config, buffer, mut capture) = setup();
        let source = TestPatternSource::new();
        let failures = source.failure_injector();

        capture
            .start(move || Ok(source), Box::new(PassThrough), Box::new(JpegEncoder::new()))
            .unwrap();
        failures.store(5, Ordering::SeqCst);

        assert!(wait_for(|| capture.stats().read_failures >= 5));
        let before = buffer.read().map(|f| f.sequence).unwrap_or(0);
        assert!(wait_for(|| buffer.read().map_or(false, |f| f.sequence > before)));
        assert_eq!(capture.state(), CaptureState::Running);
    }

    #[test]
    fn test_resolution_change_applies_next_cycle() {
        let (config, buffer, mut capture) = setup();
        capture
            .start(
                || Ok(TestPatternSource::new().with_native_resolution(1280, 720)),
                Box::new(PassThrough),
                Box::new(JpegEncoder::new()),
            )
            .unwrap();

        assert!(wait_for(|| buffer.read().map_or(false, |f| (f.width, f.height) == (640, 480))));
        config.set_resolution(10, 10);
        assert!(wait_for(|| buffer.read().map_or(false, |f| (f.width, f.height) == (160, 120))));
    }

    #[test]
    fn test_quality_change_reaches_encoder() {
        let (config, _buffer, mut capture) = setup();
        let qualities = Arc::new(Mutex::new(Vec::new()));
        capture
            .start(
                || Ok(TestPatternSource::new()),
                Box::new(PassThrough),
                Box::new(RecordingEncoder {
                    qualities: qualities.clone(),
                }),
            )
            .unwrap();

        config.set_quality(150);
        assert!(wait_for(|| qualities.lock().last() == Some(&100)));
        assert!(qualities.lock().iter().all(|&q| q <= 100));
    }

    #[test]
    fn test_encode_failure_leaves_buffer_unchanged() {
        let (_config, buffer, mut capture) = setup();
        capture
            .start(
                || Ok(TestPatternSource::new()),
                Box::new(PassThrough),
                Box::new(FailingEncoder),
            )
            .unwrap();

        assert!(wait_for(|| capture.stats().encode_failures >= 3));
        assert!(buffer.read().is_none());
        assert_eq!(capture.state(), CaptureState::Running);
    }

    #[test]
    fn test_stop_is_idempotent_and_releases_device() {
        let (_config, _buffer, mut capture) = setup();
        let source = TestPatternSource::new();
        let released = source.release_flag();
        capture
            .start(move || Ok(source), Box::new(PassThrough), Box::new(JpegEncoder::new()))
            .unwrap();

        capture.stop();
        capture.stop();
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(capture.state(), CaptureState::Stopped);
    }

    #[test]
    fn test_cannot_restart_after_stop() {
        let (_config, _buffer, mut capture) = setup();
        capture.stop();
        let err = capture
            .start(
                || Ok(TestPatternSource::new()),
                Box::new(PassThrough),
                Box::new(JpegEncoder::new()),
            )
            .unwrap_err();
        assert!(matches!(err, CaptureError::Thread(_)));
    }

    #[test]
    fn test_processing_mode_attaches_detection() {
        let (config, buffer, mut capture) = setup();
        capture
            .start(
                || Ok(TestPatternSource::new()),
                Box::new(StandardProcessor::default()),
                Box::new(JpegEncoder::new()),
            )
            .unwrap();

        config.set_processing(Processing::HeadOverlay {
            classifier: "missing".to_string(),
            hat: 0,
        });
        assert!(wait_for(|| buffer
            .read()
            .map_or(false, |f| f.detection.is_some())));
    }
}
