pub mod cascade;
pub mod mog2;
pub mod motion;

pub use cascade::{CascadeDetector, CascadeModel, CascadeParams, HitRect, CASCADE_SCORE};
pub use mog2::{BackgroundModel, BackgroundModelParams};
pub use motion::{MotionDetector, MotionParams};
