//! JPEG encoder
//!
//! Compresses raw frames into transport-ready JPEG payloads.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;

use super::frame::Frame;
use crate::config::clamp_quality;
use crate::error::CodecError;

/// Frame encoder used by the capture loop
pub trait Encoder: Send {
    fn encode(&mut self, frame: &Frame, quality: u8) -> Result<Bytes, CodecError>;
}

/// Baseline JPEG encoder backed by the `image` crate
pub struct JpegEncoder {
    /// Output buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
}

impl JpegEncoder {
    pub fn new() -> Self {
        Self {
            encode_buffer: Vec::with_capacity(64 * 1024),
        }
    }
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for JpegEncoder {
    fn encode(&mut self, frame: &Frame, quality: u8) -> Result<Bytes, CodecError> {
        let quality = clamp_quality(quality as i64);
        self.encode_buffer.clear();

        let mut encoder = ImageJpegEncoder::new_with_quality(&mut self.encode_buffer, quality);
        encoder
            .encode_image(&frame.image)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        Ok(Bytes::copy_from_slice(&self.encode_buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn gradient(width: u32, height: u32) -> Frame {
        Frame::new(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        }))
    }

    #[test]
    fn test_encoding_produces_jpeg() {
        let mut encoder = JpegEncoder::new();
        let encoded = encoder.encode(&gradient(160, 120), 80).unwrap();

        assert!(encoded.len() > 4);
        assert_eq!(&encoded[..2], &[0xFF, 0xD8]);
        assert_eq!(&encoded[encoded.len() - 2..], &[0xFF, 0xD9]);

        let decoded = image::load_from_memory(&encoded).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (160, 120));
    }

    #[test]
    fn test_quality_changes_size() {
        let mut encoder = JpegEncoder::new();
        let frame = gradient(320, 240);
        let low = encoder.encode(&frame, 5).unwrap();
        let high = encoder.encode(&frame, 100).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn test_out_of_range_quality_is_clamped() {
        let mut encoder = JpegEncoder::new();
        assert!(encoder.encode(&gradient(16, 16), 0).is_ok());
        assert!(encoder.encode(&gradient(16, 16), 255).is_ok());
    }
}
