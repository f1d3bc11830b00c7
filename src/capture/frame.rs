//! Raw and encoded frame types

use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::RgbImage;

use crate::processing::Detection;

/// Raw RGB8 frame as produced by a [`FrameSource`](super::FrameSource)
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Resize to the given resolution unless it already matches
    pub fn resized(self, width: u32, height: u32) -> Self {
        if self.dimensions() == (width, height) {
            return self;
        }
        Self::new(image::imageops::resize(
            &self.image,
            width,
            height,
            image::imageops::FilterType::Triangle,
        ))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// Immutable encoded frame shared between the capture loop and all readers
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// JPEG payload
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    /// Quality the payload was encoded at
    pub quality: u8,
    /// Monotonic capture sequence number
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    /// Side information produced by the processing stage
    pub detection: Option<Detection>,
}

impl EncodedFrame {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
