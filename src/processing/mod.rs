//! Per-frame processing applied before encoding
//!
//! The active [`Processing`] mode is part of the shared capture configuration
//! and can be replaced by any client. Each mode carries its own parameters, so
//! there is no combination of half-configured toggles to reason about.

pub mod overlay;
pub mod skin;

use serde::{Deserialize, Serialize};

use crate::capture::Frame;

pub use overlay::{load_hats, Hat, HeadDetector, HeadOverlay, SkinBlobHeadDetector};
pub use skin::{ContourInfo, SkinSegmenter};

/// Default lower HSV bound for skin (OpenCV scale: H 0-179, S/V 0-255)
pub const DEFAULT_SKIN_LOWER_HSV: [u8; 3] = [0, 20, 70];

/// Default upper HSV bound for skin
pub const DEFAULT_SKIN_UPPER_HSV: [u8; 3] = [20, 255, 255];

/// Default minimum region area in pixels
pub const DEFAULT_MIN_CONTOUR_AREA: u32 = 5000;

/// Active processing mode
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Processing {
    /// Frames pass through untouched
    #[default]
    None,
    /// Detect heads with the named classifier and draw a hat on each
    HeadOverlay {
        classifier: String,
        #[serde(default)]
        hat: usize,
    },
    /// Segment skin-coloured regions and outline the largest one
    SkinSegmentation {
        #[serde(default = "default_lower")]
        lower: [u8; 3],
        #[serde(default = "default_upper")]
        upper: [u8; 3],
        #[serde(default = "default_min_area")]
        min_area: u32,
    },
}

fn default_lower() -> [u8; 3] {
    DEFAULT_SKIN_LOWER_HSV
}

fn default_upper() -> [u8; 3] {
    DEFAULT_SKIN_UPPER_HSV
}

fn default_min_area() -> u32 {
    DEFAULT_MIN_CONTOUR_AREA
}

/// Axis-aligned box in frame coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Side information produced while processing a frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Detection {
    Skin(ContourInfo),
    Heads {
        boxes: Vec<BoundingBox>,
        hat: Option<String>,
    },
}

/// Frame transform run by the capture loop
pub trait FrameProcessor: Send {
    fn process(&mut self, frame: Frame, mode: &Processing) -> (Frame, Option<Detection>);
}

/// Processor that ignores the mode and passes frames through
pub struct PassThrough;

impl FrameProcessor for PassThrough {
    fn process(&mut self, frame: Frame, _mode: &Processing) -> (Frame, Option<Detection>) {
        (frame, None)
    }
}

/// Processor implementing every [`Processing`] mode
pub struct StandardProcessor {
    skin: SkinSegmenter,
    overlay: HeadOverlay,
}

impl StandardProcessor {
    pub fn new(overlay: HeadOverlay) -> Self {
        Self {
            skin: SkinSegmenter::new(),
            overlay,
        }
    }
}

impl Default for StandardProcessor {
    fn default() -> Self {
        Self::new(HeadOverlay::new(Vec::new()))
    }
}

impl FrameProcessor for StandardProcessor {
    fn process(&mut self, frame: Frame, mode: &Processing) -> (Frame, Option<Detection>) {
        match mode {
            Processing::None => (frame, None),
            Processing::SkinSegmentation {
                lower,
                upper,
                min_area,
            } => {
                let mut frame = frame;
                let info = self.skin.process(&mut frame.image, *lower, *upper, *min_area);
                (frame, info.map(Detection::Skin))
            }
            Processing::HeadOverlay { classifier, hat } => {
                let mut frame = frame;
                let detection = self.overlay.apply(&mut frame.image, classifier, *hat);
                (frame, Some(detection))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_processing_deserializes_tagged() {
        let mode: Processing = serde_json::from_str(r#"{"mode":"none"}"#).unwrap();
        assert_eq!(mode, Processing::None);

        let mode: Processing =
            serde_json::from_str(r#"{"mode":"head_overlay","classifier":"skin_blob","hat":2}"#)
                .unwrap();
        assert_eq!(
            mode,
            Processing::HeadOverlay {
                classifier: "skin_blob".to_string(),
                hat: 2
            }
        );

        let mode: Processing =
            serde_json::from_str(r#"{"mode":"skin_segmentation","min_area":100}"#).unwrap();
        assert_eq!(
            mode,
            Processing::SkinSegmentation {
                lower: DEFAULT_SKIN_LOWER_HSV,
                upper: DEFAULT_SKIN_UPPER_HSV,
                min_area: 100
            }
        );

        assert!(serde_json::from_str::<Processing>(r#"{"mode":"sepia"}"#).is_err());
    }

    #[test]
    fn test_none_mode_leaves_frame_untouched() {
        let mut processor = StandardProcessor::default();
        let frame = Frame::new(RgbImage::from_pixel(8, 8, image::Rgb([1, 2, 3])));
        let (out, detection) = processor.process(frame.clone(), &Processing::None);
        assert_eq!(out.image, frame.image);
        assert!(detection.is_none());
    }

    #[test]
    fn test_detection_serializes_with_kind() {
        let detection = Detection::Heads {
            boxes: vec![BoundingBox {
                x: 1,
                y: 2,
                width: 3,
                height: 4,
            }],
            hat: None,
        };
        let json = serde_json::to_value(&detection).unwrap();
        assert_eq!(json["kind"], "heads");
        assert_eq!(json["boxes"][0]["width"], 3);
    }
}
