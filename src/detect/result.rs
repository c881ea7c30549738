use serde::Serialize;

/// Label table indexed by `Detection::class_id`.
pub const VEHICLE_LABELS: &[&str] = &["car"];

/// Class id of the only label the built-in detectors emit.
pub const CLASS_CAR: usize = 0;

/// Axis-aligned box in image pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Box from a top-left corner and a size.
    pub fn from_xywh(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self::new(x, y, x + w, y + h)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.x2 > self.x1 && self.y2 > self.y1)
    }

    /// Clip to `[0, width] x [0, height]`. `None` when nothing is left.
    pub fn clip(&self, width: u32, height: u32) -> Option<Self> {
        let clipped = Self {
            x1: self.x1.max(0.0),
            y1: self.y1.max(0.0),
            x2: self.x2.min(width as f32),
            y2: self.y2.min(height as f32),
        };
        if clipped.is_degenerate() {
            None
        } else {
            Some(clipped)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Confidence in `[0, 1]`.
    pub score: f32,
    pub class_id: usize,
}

impl Detection {
    pub fn new(bbox: BoundingBox, score: f32, class_id: usize) -> Self {
        Self {
            bbox,
            score: score.clamp(0.0, 1.0),
            class_id,
        }
    }

    pub fn label<'a>(&self, labels: &[&'a str]) -> Option<&'a str> {
        labels.get(self.class_id).copied()
    }

    /// Same detection with its box clipped to the image, or `None` when the
    /// box falls outside it entirely.
    pub fn clipped(&self, width: u32, height: u32) -> Option<Self> {
        self.bbox.clip(width, height).map(|bbox| Self {
            bbox,
            score: self.score,
            class_id: self.class_id,
        })
    }
}

/// Clip every detection to the image, dropping the ones that vanish.
pub fn clip_detections(detections: Vec<Detection>, width: u32, height: u32) -> Vec<Detection> {
    detections
        .into_iter()
        .filter_map(|d| d.clipped(width, height))
        .collect()
}

/// Detection strategy chosen at detector construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionMode {
    Motion,
    CascadeWithMotionFallback,
}

impl DetectionMode {
    pub fn describe(&self) -> &'static str {
        match self {
            DetectionMode::Motion => "motion detection",
            DetectionMode::CascadeWithMotionFallback => "cascade + motion fallback",
        }
    }
}
