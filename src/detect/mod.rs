mod backend;
mod backends;
mod result;
mod vehicle;

pub use backend::DetectorBackend;
pub use backends::{
    BackgroundModel, BackgroundModelParams, CascadeDetector, CascadeModel, CascadeParams,
    HitRect, MotionDetector, MotionParams, CASCADE_SCORE,
};
pub use backends::motion::motion_score;
pub use result::{
    clip_detections, BoundingBox, Detection, DetectionMode, CLASS_CAR, VEHICLE_LABELS,
};
pub use vehicle::{DetectorSettings, VehicleDetector};
