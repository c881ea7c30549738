use anyhow::Result;
use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{close, dilate, open};
use imageproc::point::Point;

use crate::detect::backend::DetectorBackend;
use crate::detect::backends::mog2::{BackgroundModel, BackgroundModelParams};
use crate::detect::result::{BoundingBox, Detection, CLASS_CAR};
use crate::frame::Frame;

/// Sigma of a 5x5 Gaussian kernel (0.3 * ((5 - 1) * 0.5 - 1) + 0.8).
pub const BLUR_SIGMA: f32 = 1.1;

const SCORE_AREA_SCALE: f64 = 10_000.0;
const MAX_MOTION_SCORE: f64 = 0.9;

/// Contour filters that approximate "vehicle-shaped, not noise".
#[derive(Clone, Debug)]
pub struct MotionParams {
    pub min_area: f64,
    pub max_area: f64,
    pub min_aspect_ratio: f64,
    pub max_aspect_ratio: f64,
    /// Minimum contour area / bounding-rectangle area.
    pub min_fill_ratio: f64,
    pub background: BackgroundModelParams,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            min_area: 2000.0,
            max_area: 50_000.0,
            min_aspect_ratio: 0.5,
            max_aspect_ratio: 4.0,
            min_fill_ratio: 0.3,
            background: BackgroundModelParams::default(),
        }
    }
}

/// Background-subtraction vehicle detector. Needs no model file.
pub struct MotionDetector {
    params: MotionParams,
    background: BackgroundModel,
}

impl MotionDetector {
    pub fn new(params: MotionParams) -> Result<Self> {
        let background = BackgroundModel::new(params.background.clone())?;
        Ok(Self { params, background })
    }

    /// Turn a cleaned foreground mask into detections.
    ///
    /// Only outermost contours are considered; holes and blobs nested inside
    /// other blobs are ignored.
    pub fn detections_from_mask(&self, mask: &GrayImage) -> Vec<Detection> {
        let (width, height) = mask.dimensions();
        find_contours::<i32>(mask)
            .into_iter()
            .filter(|contour| contour.border_type == BorderType::Outer && contour.parent.is_none())
            .filter_map(|contour| self.accept_contour(&contour.points, width, height))
            .collect()
    }

    fn accept_contour(&self, points: &[Point<i32>], width: u32, height: u32) -> Option<Detection> {
        let area = contour_area(points);
        if area < self.params.min_area || area > self.params.max_area {
            return None;
        }

        let (x, y, w, h) = bounding_rect(points)?;
        let aspect_ratio = w as f64 / h as f64;
        if aspect_ratio < self.params.min_aspect_ratio || aspect_ratio > self.params.max_aspect_ratio
        {
            return None;
        }

        let fill_ratio = area / (w as f64 * h as f64);
        if fill_ratio < self.params.min_fill_ratio {
            return None;
        }

        Detection::new(
            BoundingBox::from_xywh(x as f32, y as f32, w as f32, h as f32),
            motion_score(area),
            CLASS_CAR,
        )
        .clipped(width, height)
    }
}

impl DetectorBackend for MotionDetector {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let gray = frame.to_luma();
        let blurred = gaussian_blur_f32(&gray, BLUR_SIGMA);
        let mask = self.background.apply(&blurred);
        let cleaned = clean_mask(&mask);
        Ok(self.detections_from_mask(&cleaned))
    }
}

/// Confidence proxy from blob size: `min(0.9, area / 10000)`.
pub fn motion_score(area: f64) -> f32 {
    (area / SCORE_AREA_SCALE).min(MAX_MOTION_SCORE) as f32
}

/// Open then close with the 3x3 cross, then dilate twice with it.
///
/// Shadow pixels (127) count as foreground, like full-intensity ones.
pub fn clean_mask(mask: &GrayImage) -> GrayImage {
    let opened = open(mask, Norm::L1, 1);
    let closed = close(&opened, Norm::L1, 1);
    // Two cross dilations compose to one L1 dilation of radius 2.
    dilate(&closed, Norm::L1, 2)
}

/// Polygon area of a traced border (shoelace formula).
pub fn contour_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice_area: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum();
    twice_area.abs() as f64 / 2.0
}

/// Inclusive pixel bounding rectangle as `(x, y, width, height)`.
pub fn bounding_rect(points: &[Point<i32>]) -> Option<(i32, i32, i32, i32)> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some((min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage};

    fn fill(mask: &mut GrayImage, xs: std::ops::Range<u32>, ys: std::ops::Range<u32>) {
        for y in ys {
            for x in xs.clone() {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
    }

    fn detector() -> MotionDetector {
        MotionDetector::new(MotionParams::default()).unwrap()
    }

    #[test]
    fn score_saturates_at_point_nine() {
        assert!((motion_score(5000.0) - 0.5).abs() < 1e-6);
        assert!((motion_score(50_000.0) - 0.9).abs() < 1e-6);
        assert!((motion_score(9000.0) - 0.9).abs() < 1e-6);
    }

    #[test]
    fn contour_area_of_square_border() {
        let square = [
            Point::new(0, 0),
            Point::new(9, 0),
            Point::new(9, 9),
            Point::new(0, 9),
        ];
        assert_eq!(contour_area(&square), 81.0);
        assert_eq!(bounding_rect(&square), Some((0, 0, 10, 10)));
    }

    #[test]
    fn mask_filter_keeps_only_vehicle_shaped_blob() {
        let mut mask = GrayImage::new(640, 480);
        // Speck: 10x10, far below the minimum area.
        fill(&mut mask, 20..30, 20..30);
        // L-shaped blob: 200x100 bounding box, about 0.6 filled.
        fill(&mut mask, 100..200, 100..200);
        fill(&mut mask, 200..300, 180..200);

        let detections = detector().detections_from_mask(&mask);
        assert_eq!(detections.len(), 1);

        let det = &detections[0];
        assert_eq!(det.bbox, BoundingBox::new(100.0, 100.0, 300.0, 200.0));
        assert_eq!(det.class_id, CLASS_CAR);
        assert!((det.score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn mask_filter_rejects_elongated_and_sparse_blobs() {
        let mut mask = GrayImage::new(640, 480);
        // Aspect ratio 10.
        fill(&mut mask, 10..410, 10..50);
        // Plus sign: large box, fill ratio under 0.3.
        fill(&mut mask, 300..500, 290..310);
        fill(&mut mask, 390..410, 200..400);

        assert!(detector().detections_from_mask(&mask).is_empty());
    }

    #[test]
    fn detects_object_entering_static_scene() -> Result<()> {
        let mut detector = detector();
        let background = RgbImage::from_pixel(320, 240, Rgb([40, 40, 40]));
        for _ in 0..20 {
            detector.detect(&Frame::from_rgb_image(background.clone())?)?;
        }

        let mut scene = background.clone();
        for y in 100..160 {
            for x in 80..200 {
                scene.put_pixel(x, y, Rgb([220, 220, 220]));
            }
        }
        let detections = detector.detect(&Frame::from_rgb_image(scene)?)?;
        assert_eq!(detections.len(), 1);

        let bbox = detections[0].bbox;
        assert!((bbox.x1 - 80.0).abs() <= 8.0, "x1 = {}", bbox.x1);
        assert!((bbox.y1 - 100.0).abs() <= 8.0, "y1 = {}", bbox.y1);
        assert!((bbox.x2 - 200.0).abs() <= 8.0, "x2 = {}", bbox.x2);
        assert!((bbox.y2 - 160.0).abs() <= 8.0, "y2 = {}", bbox.y2);
        Ok(())
    }
}
