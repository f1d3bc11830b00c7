//! Skin-colour segmentation
//!
//! Thresholds the frame in HSV space, cleans the mask with a morphological
//! opening and a dilation, finds 4-connected regions and outlines the largest
//! region that reaches the minimum area.

use image::{Rgb, RgbImage};
use serde::Serialize;

use super::BoundingBox;

const OUTLINE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const OUTLINE_THICKNESS: u32 = 2;

/// Square structuring element radius (3x3 kernel)
const MORPH_RADIUS: u32 = 1;
const MORPH_OPEN_ITERATIONS: u32 = 1;
const MORPH_DILATE_ITERATIONS: u32 = 1;

/// Centroid in frame coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

/// Summary of a detected skin region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContourInfo {
    /// Pixel count of the region
    pub area: f64,
    /// Number of region pixels on its boundary
    pub perimeter: f64,
    pub bounding_box: BoundingBox,
    pub centroid: Point,
}

/// Convert RGB to HSV on the OpenCV 8-bit scale (H 0-179, S and V 0-255)
pub fn rgb_to_hsv(pixel: Rgb<u8>) -> [u8; 3] {
    let [r, g, b] = pixel.0.map(|c| c as f32);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let v = max;
    let s = if max > 0.0 { delta / max * 255.0 } else { 0.0 };
    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta)
    } else if max == g {
        60.0 * ((b - r) / delta) + 120.0
    } else {
        60.0 * ((r - g) / delta) + 240.0
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    [
        ((h / 2.0).round() as u32).min(179) as u8,
        s.round() as u8,
        v.round() as u8,
    ]
}

/// Binary skin mask, row-major
pub struct Mask {
    pub width: u32,
    pub height: u32,
    pub bits: Vec<bool>,
}

impl Mask {
    fn get(&self, x: u32, y: u32) -> bool {
        self.bits[(y * self.width + x) as usize]
    }

    /// Opening (erode then dilate) to drop speckle, then dilation to close
    /// small gaps inside regions
    pub fn clean(&self) -> Mask {
        let mut mask = self.morph(MORPH_RADIUS, true, MORPH_OPEN_ITERATIONS);
        mask = mask.morph(MORPH_RADIUS, false, MORPH_OPEN_ITERATIONS);
        mask.morph(MORPH_RADIUS, false, MORPH_DILATE_ITERATIONS)
    }

    /// Erosion or dilation with a square kernel. Pixels outside the frame do
    /// not take part.
    fn morph(&self, radius: u32, erode: bool, iterations: u32) -> Mask {
        let mut current = Mask {
            width: self.width,
            height: self.height,
            bits: self.bits.clone(),
        };
        for _ in 0..iterations {
            let mut bits = Vec::with_capacity(current.bits.len());
            for y in 0..current.height {
                let rows = y.saturating_sub(radius)..=(y + radius).min(current.height - 1);
                for x in 0..current.width {
                    let cols = x.saturating_sub(radius)..=(x + radius).min(current.width - 1);
                    let mut window = rows
                        .clone()
                        .flat_map(|ny| cols.clone().map(move |nx| (nx, ny)));
                    let set = if erode {
                        window.all(|(nx, ny)| current.get(nx, ny))
                    } else {
                        window.any(|(nx, ny)| current.get(nx, ny))
                    };
                    bits.push(set);
                }
            }
            current.bits = bits;
        }
        current
    }
}

/// Skin segmenter with reusable scratch space
pub struct SkinSegmenter {
    labels: Vec<u32>,
    stack: Vec<(u32, u32)>,
}

impl SkinSegmenter {
    pub fn new() -> Self {
        Self {
            labels: Vec::new(),
            stack: Vec::new(),
        }
    }

    /// Threshold the image into a mask of pixels inside `[lower, upper]`
    pub fn mask(&self, image: &RgbImage, lower: [u8; 3], upper: [u8; 3]) -> Mask {
        let bits = image
            .pixels()
            .map(|p| {
                let hsv = rgb_to_hsv(*p);
                (0..3).all(|i| hsv[i] >= lower[i] && hsv[i] <= upper[i])
            })
            .collect();
        Mask {
            width: image.width(),
            height: image.height(),
            bits,
        }
    }

    /// Largest connected region with at least `min_area` pixels
    pub fn largest_region(&mut self, mask: &Mask, min_area: u32) -> Option<ContourInfo> {
        let (width, height) = (mask.width, mask.height);
        self.labels.clear();
        self.labels.resize((width * height) as usize, 0);

        let mut best: Option<ContourInfo> = None;
        let mut next_label = 0u32;

        for start_y in 0..height {
            for start_x in 0..width {
                let idx = (start_y * width + start_x) as usize;
                if !mask.bits[idx] || self.labels[idx] != 0 {
                    continue;
                }
                next_label += 1;
                let region = self.flood(mask, start_x, start_y, next_label);
                if region.area < min_area as f64 {
                    continue;
                }
                if best.as_ref().map_or(true, |b| region.area > b.area) {
                    best = Some(region);
                }
            }
        }

        best
    }

    fn flood(&mut self, mask: &Mask, x: u32, y: u32, label: u32) -> ContourInfo {
        let width = mask.width;
        let height = mask.height;

        let (mut min_x, mut min_y, mut max_x, mut max_y) = (x, y, x, y);
        let (mut sum_x, mut sum_y) = (0u64, 0u64);
        let mut area = 0u64;
        let mut perimeter = 0u64;

        self.labels[(y * width + x) as usize] = label;
        self.stack.push((x, y));

        while let Some((px, py)) = self.stack.pop() {
            area += 1;
            sum_x += px as u64;
            sum_y += py as u64;
            min_x = min_x.min(px);
            min_y = min_y.min(py);
            max_x = max_x.max(px);
            max_y = max_y.max(py);

            let neighbours = [
                (px.checked_sub(1), Some(py)),
                (px.checked_add(1).filter(|&v| v < width), Some(py)),
                (Some(px), py.checked_sub(1)),
                (Some(px), py.checked_add(1).filter(|&v| v < height)),
            ];

            let mut on_boundary = false;
            for (nx, ny) in neighbours {
                match (nx, ny) {
                    (Some(nx), Some(ny)) if mask.get(nx, ny) => {
                        let nidx = (ny * width + nx) as usize;
                        if self.labels[nidx] == 0 {
                            self.labels[nidx] = label;
                            self.stack.push((nx, ny));
                        }
                    }
                    _ => on_boundary = true,
                }
            }
            if on_boundary {
                perimeter += 1;
            }
        }

        ContourInfo {
            area: area as f64,
            perimeter: perimeter as f64,
            bounding_box: BoundingBox {
                x: min_x,
                y: min_y,
                width: max_x - min_x + 1,
                height: max_y - min_y + 1,
            },
            centroid: Point {
                x: (sum_x / area) as u32,
                y: (sum_y / area) as u32,
            },
        }
    }

    /// Segment, pick the largest region and outline it in place
    pub fn process(
        &mut self,
        image: &mut RgbImage,
        lower: [u8; 3],
        upper: [u8; 3],
        min_area: u32,
    ) -> Option<ContourInfo> {
        let mask = self.mask(image, lower, upper).clean();
        let region = self.largest_region(&mask, min_area)?;
        draw_box(image, &region.bounding_box, OUTLINE_COLOR, OUTLINE_THICKNESS);
        Some(region)
    }
}

impl Default for SkinSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

/// Draw a hollow rectangle, clipped to the image
pub fn draw_box(image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: u32) {
    let (width, height) = image.dimensions();
    if bbox.width == 0 || bbox.height == 0 || bbox.x >= width || bbox.y >= height {
        return;
    }
    let x_end = (bbox.x + bbox.width).min(width);
    let y_end = (bbox.y + bbox.height).min(height);

    for y in bbox.y..y_end {
        for x in bbox.x..x_end {
            let edge = x < bbox.x + thickness
                || x + thickness >= bbox.x + bbox.width
                || y < bbox.y + thickness
                || y + thickness >= bbox.y + bbox.height;
            if edge {
                image.put_pixel(x, y, color);
            }
        }
    }
}
