//! Capture subsystem
//!
//! Everything between the camera and the latest-frame buffer.

pub mod buffer;
pub mod encoder;
pub mod frame;
pub mod pipeline;
pub mod settings;
pub mod source;

pub use buffer::{create_shared_buffer, FrameBuffer, SharedFrameBuffer};
pub use encoder::{Encoder, JpegEncoder};
pub use frame::{EncodedFrame, Frame};
pub use pipeline::{CaptureLoop, CaptureState, CaptureStats, CaptureTiming};
pub use settings::{CaptureConfig, SharedCaptureConfig};
#[cfg(feature = "camera")]
pub use source::CameraSource;
pub use source::{FrameSource, TestPatternSource};
