//! Head detection with hat overlays
//!
//! Head detectors are registered under a classifier id; the active
//! [`Processing::HeadOverlay`](super::Processing::HeadOverlay) mode picks one by
//! id and a hat by index. Hats are PNG images with an alpha channel,
//! composited above each detected head.

use image::{Rgb, RgbImage, RgbaImage};
use std::collections::HashMap;
use std::path::Path;

use super::skin::{draw_box, SkinSegmenter};
use super::{BoundingBox, Detection, DEFAULT_SKIN_LOWER_HSV, DEFAULT_SKIN_UPPER_HSV};
use crate::error::CodecError;

const HEAD_BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Finds heads in a frame
pub trait HeadDetector: Send {
    fn detect(&mut self, image: &RgbImage) -> Vec<BoundingBox>;
}

/// Hat overlay image
#[derive(Clone)]
pub struct Hat {
    pub name: String,
    pub image: RgbaImage,
}

/// Load every `*.png` in `dir`, sorted by file name
pub fn load_hats<P: AsRef<Path>>(dir: P) -> Result<Vec<Hat>, CodecError> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| CodecError::ImageLoad(format!("{}: {}", dir.display(), e)))?;

    let mut paths: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .map_or(false, |ext| ext.eq_ignore_ascii_case("png"))
        })
        .collect();
    paths.sort();

    let mut hats = Vec::with_capacity(paths.len());
    for path in paths {
        match image::open(&path) {
            Ok(img) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                tracing::info!("Hat loaded: {}", name);
                hats.push(Hat {
                    name,
                    image: img.into_rgba8(),
                });
            }
            Err(e) => tracing::warn!("Skipping hat {}: {}", path.display(), e),
        }
    }

    Ok(hats)
}

/// Heads-and-hats processor state
pub struct HeadOverlay {
    detectors: HashMap<String, Box<dyn HeadDetector>>,
    hats: Vec<Hat>,
    /// Classifier id last reported missing, to avoid logging every frame
    missing_reported: Option<String>,
}

impl HeadOverlay {
    pub fn new(hats: Vec<Hat>) -> Self {
        Self {
            detectors: HashMap::new(),
            hats,
            missing_reported: None,
        }
    }

    /// Register a detector under a classifier id, replacing any previous one
    pub fn register(&mut self, classifier: impl Into<String>, detector: Box<dyn HeadDetector>) {
        self.detectors.insert(classifier.into(), detector);
    }

    pub fn classifiers(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.detectors.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn hat_names(&self) -> Vec<String> {
        self.hats.iter().map(|h| h.name.clone()).collect()
    }

    /// Detect heads with `classifier` and overlay hat number `hat` on each
    pub fn apply(&mut self, image: &mut RgbImage, classifier: &str, hat: usize) -> Detection {
        let Some(detector) = self.detectors.get_mut(classifier) else {
            if self.missing_reported.as_deref() != Some(classifier) {
                tracing::warn!("Head classifier not available: {}", classifier);
                self.missing_reported = Some(classifier.to_string());
            }
            return Detection::Heads {
                boxes: Vec::new(),
                hat: None,
            };
        };
        self.missing_reported = None;

        let boxes = detector.detect(image);
        let hat = self.hats.get(hat);

        for head in &boxes {
            if let Some(hat) = hat {
                composite_hat(image, &hat.image, head);
            }
            draw_box(image, head, HEAD_BOX_COLOR, 2);
        }

        Detection::Heads {
            boxes,
            hat: hat.map(|h| h.name.clone()),
        }
    }
}

/// Alpha-blend `hat` above `head`: 1.5x the head size, centred horizontally,
/// lifted by 60% of the hat height and clipped to the frame
pub fn composite_hat(image: &mut RgbImage, hat: &RgbaImage, head: &BoundingBox) {
    let hat_width = (head.width as f32 * 1.5) as u32;
    let hat_height = (head.height as f32 * 1.5) as u32;
    if hat_width == 0 || hat_height == 0 {
        return;
    }
    let resized = image::imageops::resize(
        hat,
        hat_width,
        hat_height,
        image::imageops::FilterType::Triangle,
    );

    let origin_x = (head.x as i64 + (head.width as i64 - hat_width as i64) / 2).max(0);
    let origin_y = (head.y as i64 - (hat_height as f32 * 0.6) as i64).max(0);
    let (frame_width, frame_height) = image.dimensions();

    for hy in 0..hat_height {
        let y = origin_y + hy as i64;
        if y >= frame_height as i64 {
            break;
        }
        for hx in 0..hat_width {
            let x = origin_x + hx as i64;
            if x >= frame_width as i64 {
                break;
            }
            let src = resized.get_pixel(hx, hy).0;
            let alpha = src[3] as f32 / 255.0;
            if alpha == 0.0 {
                continue;
            }
            let dst = image.get_pixel_mut(x as u32, y as u32);
            for c in 0..3 {
                dst.0[c] = (src[c] as f32 * alpha + dst.0[c] as f32 * (1.0 - alpha)).round() as u8;
            }
        }
    }
}

/// Treats roughly head-shaped skin regions as heads
pub struct SkinBlobHeadDetector {
    segmenter: SkinSegmenter,
    min_area: u32,
}

impl SkinBlobHeadDetector {
    pub fn new(min_area: u32) -> Self {
        Self {
            segmenter: SkinSegmenter::new(),
            min_area,
        }
    }
}

impl HeadDetector for SkinBlobHeadDetector {
    fn detect(&mut self, image: &RgbImage) -> Vec<BoundingBox> {
        let mask = self
            .segmenter
            .mask(image, DEFAULT_SKIN_LOWER_HSV, DEFAULT_SKIN_UPPER_HSV);
        self.segmenter
            .largest_region(&mask, self.min_area)
            .map(|region| region.bounding_box)
            .filter(|b| {
                let aspect = b.width as f32 / b.height as f32;
                (0.5..=1.5).contains(&aspect)
            })
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    struct FixedDetector(Vec<BoundingBox>);

    impl HeadDetector for FixedDetector {
        fn detect(&mut self, _image: &RgbImage) -> Vec<BoundingBox> {
            self.0.clone()
        }
    }

    fn red_hat() -> Hat {
        Hat {
            name: "red.png".to_string(),
            image: RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255])),
        }
    }

    #[test]
    fn test_unknown_classifier_passes_through() {
        let mut overlay = HeadOverlay::new(vec![red_hat()]);
        let mut image = RgbImage::new(64, 64);
        let before = image.clone();

        let detection = overlay.apply(&mut image, "haar_biwi", 0);
        assert_eq!(
            detection,
            Detection::Heads {
                boxes: vec![],
                hat: None
            }
        );
        assert_eq!(image, before);
    }

    #[test]
    fn test_hat_is_drawn_above_head() {
        let head = BoundingBox {
            x: 20,
            y: 40,
            width: 20,
            height: 20,
        };
        let mut overlay = HeadOverlay::new(vec![red_hat()]);
        overlay.register("fixed", Box::new(FixedDetector(vec![head])));
        let mut image = RgbImage::new(100, 100);

        let detection = overlay.apply(&mut image, "fixed", 0);
        assert_eq!(
            detection,
            Detection::Heads {
                boxes: vec![head],
                hat: Some("red.png".to_string())
            }
        );

        // Hat spans 30x30 from (15, 22)
        assert_eq!(*image.get_pixel(25, 25), Rgb([255, 0, 0]));
        assert_eq!(*image.get_pixel(25, 10), Rgb([0, 0, 0]));
        // Head outline
        assert_eq!(*image.get_pixel(39, 59), HEAD_BOX_COLOR);
    }

    #[test]
    fn test_out_of_range_hat_still_reports_heads() {
        let head = BoundingBox {
            x: 0,
            y: 0,
            width: 10,
            height: 10,
        };
        let mut overlay = HeadOverlay::new(Vec::new());
        overlay.register("fixed", Box::new(FixedDetector(vec![head])));
        let mut image = RgbImage::new(32, 32);

        let detection = overlay.apply(&mut image, "fixed", 3);
        assert_eq!(
            detection,
            Detection::Heads {
                boxes: vec![head],
                hat: None
            }
        );
    }

    #[test]
    fn test_transparent_hat_pixels_are_skipped() {
        let hat = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 0]));
        let mut image = RgbImage::from_pixel(50, 50, Rgb([9, 9, 9]));
        let head = BoundingBox {
            x: 10,
            y: 20,
            width: 10,
            height: 10,
        };
        composite_hat(&mut image, &hat, &head);
        assert!(image.pixels().all(|p| *p == Rgb([9, 9, 9])));
    }

    #[test]
    fn test_skin_blob_detector_finds_face_shaped_region() {
        let mut image = RgbImage::from_pixel(120, 120, Rgb([20, 40, 200]));
        for y in 30..80 {
            for x in 40..80 {
                image.put_pixel(x, y, Rgb([220, 170, 140]));
            }
        }
        let mut detector = SkinBlobHeadDetector::new(500);
        let boxes = detector.detect(&image);
        let expected = BoundingBox {
            x: 40,
            y: 30,
            width: 40,
            height: 50,
        };
        assert_eq!(boxes, vec![expected]);
    }

    #[test]
    fn test_load_hats_missing_dir() {
        assert!(load_hats("/nonexistent/hats").is_err());
    }

    #[test]
    fn test_classifier_listing() {
        let mut overlay = HeadOverlay::new(vec![red_hat()]);
        overlay.register("b", Box::new(FixedDetector(vec![])));
        overlay.register("a", Box::new(FixedDetector(vec![])));
        assert_eq!(overlay.classifiers(), vec!["a", "b"]);
        assert_eq!(overlay.hat_names(), vec!["red.png"]);
    }
}
