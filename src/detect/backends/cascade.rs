use std::path::{Path, PathBuf};

use anyhow::Result;
use image::GrayImage;
use imageproc::filter::gaussian_blur_f32;

use crate::detect::backend::DetectorBackend;
use crate::detect::backends::motion::BLUR_SIGMA;
use crate::detect::result::{clip_detections, BoundingBox, Detection, CLASS_CAR};
use crate::frame::Frame;

/// Fixed score attached to every cascade hit.
pub const CASCADE_SCORE: f32 = 0.8;

#[derive(Clone, Debug)]
pub struct CascadeParams {
    pub scale_factor: f64,
    pub min_neighbors: i32,
    /// Smallest window side in pixels.
    pub min_size: u32,
    /// Largest window side in pixels.
    pub max_size: u32,
}

impl Default for CascadeParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 3,
            min_size: 50,
            max_size: 300,
        }
    }
}

/// Pixel rectangle reported by a cascade model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HitRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Multi-scale sliding-window classifier over a grayscale image.
pub trait CascadeModel: Send {
    fn detect_multi_scale(&mut self, gray: &GrayImage, params: &CascadeParams)
        -> Result<Vec<HitRect>>;
}

pub struct CascadeDetector {
    model: Box<dyn CascadeModel>,
    params: CascadeParams,
}

impl CascadeDetector {
    pub fn new(model: Box<dyn CascadeModel>, params: CascadeParams) -> Self {
        Self { model, params }
    }

    /// Try each candidate model file in order and keep the first that loads.
    ///
    /// Returns `None` when none is usable. That is a configuration outcome,
    /// not an error: callers fall back to motion detection.
    pub fn probe(paths: &[PathBuf], params: &CascadeParams) -> Option<Self> {
        for path in paths {
            if !path.is_file() {
                log::debug!("cascade model {} not found", path.display());
                continue;
            }
            match load_model(path) {
                Ok(Some(model)) => {
                    log::info!("loaded cascade model {}", path.display());
                    return Some(Self::new(model, params.clone()));
                }
                Ok(None) => log::debug!("cascade model {} is not usable", path.display()),
                Err(err) => log::warn!("failed to load cascade model {}: {err:#}", path.display()),
            }
        }
        None
    }

}

impl DetectorBackend for CascadeDetector {
    fn name(&self) -> &'static str {
        "cascade"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let gray = gaussian_blur_f32(&frame.to_luma(), BLUR_SIGMA);
        let hits = self.model.detect_multi_scale(&gray, &self.params)?;
        let detections = hits
            .into_iter()
            .map(|hit| {
                Detection::new(
                    BoundingBox::from_xywh(
                        hit.x as f32,
                        hit.y as f32,
                        hit.width as f32,
                        hit.height as f32,
                    ),
                    CASCADE_SCORE,
                    CLASS_CAR,
                )
            })
            .collect();
        Ok(clip_detections(detections, frame.width(), frame.height()))
    }
}

#[cfg(feature = "cascade-opencv")]
fn load_model(path: &Path) -> Result<Option<Box<dyn CascadeModel>>> {
    Ok(opencv_model::OpenCvCascade::load(path)?
        .map(|model| Box::new(model) as Box<dyn CascadeModel>))
}

#[cfg(not(feature = "cascade-opencv"))]
fn load_model(path: &Path) -> Result<Option<Box<dyn CascadeModel>>> {
    log::debug!(
        "cascade model {} present but built without cascade-opencv",
        path.display()
    );
    Ok(None)
}

#[cfg(feature = "cascade-opencv")]
mod opencv_model {
    use std::path::Path;

    use anyhow::{Context, Result};
    use image::GrayImage;
    use opencv::core::{Mat, Rect, Size, Vector, CV_8UC1, Mat_AUTO_STEP};
    use opencv::objdetect::CascadeClassifier;
    use opencv::prelude::*;

    use super::{CascadeModel, CascadeParams, HitRect};

    pub struct OpenCvCascade {
        classifier: CascadeClassifier,
    }

    impl OpenCvCascade {
        pub fn load(path: &Path) -> Result<Option<Self>> {
            let path = path.to_str().context("cascade path is not valid UTF-8")?;
            let classifier =
                CascadeClassifier::new(path).context("failed to construct cascade classifier")?;
            if classifier.empty()? {
                return Ok(None);
            }
            Ok(Some(Self { classifier }))
        }
    }

    impl CascadeModel for OpenCvCascade {
        fn detect_multi_scale(
            &mut self,
            gray: &GrayImage,
            params: &CascadeParams,
        ) -> Result<Vec<HitRect>> {
            // SAFETY: the Mat borrows `gray` and is cloned before `gray` goes away.
            let borrowed = unsafe {
                Mat::new_rows_cols_with_data_unsafe(
                    gray.height() as i32,
                    gray.width() as i32,
                    CV_8UC1,
                    gray.as_raw().as_ptr() as *mut _,
                    Mat_AUTO_STEP,
                )
            }?;
            let image = borrowed.try_clone()?;

            let mut rects = Vector::<Rect>::new();
            self.classifier.detect_multi_scale(
                &image,
                &mut rects,
                params.scale_factor,
                params.min_neighbors,
                0,
                Size::new(params.min_size as i32, params.min_size as i32),
                Size::new(params.max_size as i32, params.max_size as i32),
            )?;
            Ok(rects
                .iter()
                .map(|r| HitRect {
                    x: r.x,
                    y: r.y,
                    width: r.width,
                    height: r.height,
                })
                .collect())
        }
    }
}
