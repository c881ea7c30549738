//! Adaptive per-pixel Gaussian mixture background model (grayscale).
//!
//! Each pixel keeps up to five weighted Gaussians sorted by weight. Every
//! frame updates the matching component (or spawns a new one) and classifies
//! the pixel as background, shadow, or foreground. The learning rate follows
//! `1 / min(2 * frames_seen, history)`, so the model converges quickly at
//! startup and then forgets over roughly `history` frames.

use anyhow::{anyhow, Result};
use image::GrayImage;

pub const MASK_BACKGROUND: u8 = 0;
pub const MASK_SHADOW: u8 = 127;
pub const MASK_FOREGROUND: u8 = 255;

const MAX_MODES: usize = 5;
/// Cumulative weight of the components that make up the background.
const BACKGROUND_RATIO: f32 = 0.9;
/// Squared Mahalanobis distance under which a sample updates a component.
const VAR_THRESHOLD_GEN: f32 = 9.0;
const VAR_INIT: f32 = 15.0;
const VAR_MIN: f32 = 4.0;
const VAR_MAX: f32 = 75.0;
const COMPLEXITY_REDUCTION: f32 = 0.05;
/// Darkest brightness ratio still considered a shadow.
const SHADOW_TAU: f32 = 0.5;

#[derive(Clone, Debug)]
pub struct BackgroundModelParams {
    /// Frames the model effectively remembers.
    pub history: usize,
    /// Squared Mahalanobis distance above which a pixel is foreground.
    pub var_threshold: f32,
    pub detect_shadows: bool,
}

impl Default for BackgroundModelParams {
    fn default() -> Self {
        Self {
            history: 500,
            var_threshold: 50.0,
            detect_shadows: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Component {
    weight: f32,
    mean: f32,
    variance: f32,
}

pub struct BackgroundModel {
    params: BackgroundModelParams,
    width: u32,
    height: u32,
    components: Vec<Component>,
    modes_used: Vec<u8>,
    frames_seen: u64,
}

impl BackgroundModel {
    pub fn new(params: BackgroundModelParams) -> Result<Self> {
        if params.history == 0 {
            return Err(anyhow!("background history must be at least one frame"));
        }
        if !(params.var_threshold > 0.0) {
            return Err(anyhow!(
                "background variance threshold must be positive (got {})",
                params.var_threshold
            ));
        }
        Ok(Self {
            params,
            width: 0,
            height: 0,
            components: Vec::new(),
            modes_used: Vec::new(),
            frames_seen: 0,
        })
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Update the model with `image` and return its foreground mask
    /// (`MASK_BACKGROUND`, `MASK_SHADOW`, or `MASK_FOREGROUND` per pixel).
    ///
    /// A change of frame size restarts the model.
    pub fn apply(&mut self, image: &GrayImage) -> GrayImage {
        let (width, height) = image.dimensions();
        if (width, height) != (self.width, self.height) {
            if self.frames_seen > 0 {
                log::info!(
                    "background model: frame size changed {}x{} -> {}x{}, restarting",
                    self.width,
                    self.height,
                    width,
                    height
                );
            }
            self.reset(width, height);
        }

        self.frames_seen += 1;
        let alpha = self.learning_rate();
        let params = &self.params;

        let mut mask = GrayImage::new(width, height);
        for (idx, (pixel, out)) in image.pixels().zip(mask.pixels_mut()).enumerate() {
            let start = idx * MAX_MODES;
            let components = &mut self.components[start..start + MAX_MODES];
            out.0[0] = update_pixel(
                components,
                &mut self.modes_used[idx],
                pixel.0[0] as f32,
                alpha,
                params,
            );
        }
        mask
    }

    fn reset(&mut self, width: u32, height: u32) {
        let pixels = width as usize * height as usize;
        self.width = width;
        self.height = height;
        self.components = vec![Component::default(); pixels * MAX_MODES];
        self.modes_used = vec![0; pixels];
        self.frames_seen = 0;
    }

    fn learning_rate(&self) -> f32 {
        let span = (2 * self.frames_seen).min(self.params.history as u64).max(1);
        1.0 / span as f32
    }
}

fn update_pixel(
    components: &mut [Component],
    modes_used: &mut u8,
    value: f32,
    alpha: f32,
    params: &BackgroundModelParams,
) -> u8 {
    let alpha1 = 1.0 - alpha;
    let prune = -alpha * COMPLEXITY_REDUCTION;
    let mut modes = *modes_used as usize;
    let mut surviving = modes;
    let mut fits = false;
    let mut background = false;
    let mut total_weight = 0.0f32;

    for mode in 0..modes {
        let mut weight = alpha1 * components[mode].weight + prune;
        let mut swaps = 0;
        if !fits {
            let variance = components[mode].variance;
            let diff = components[mode].mean - value;
            let dist2 = diff * diff;
            if total_weight < BACKGROUND_RATIO && dist2 < params.var_threshold * variance {
                background = true;
            }
            if dist2 < VAR_THRESHOLD_GEN * variance {
                fits = true;
                weight += alpha;
                let k = alpha / weight;
                components[mode].mean -= k * diff;
                components[mode].variance =
                    (variance + k * (dist2 - variance)).clamp(VAR_MIN, VAR_MAX);
                // Keep components sorted by weight, heaviest first.
                let mut i = mode;
                while i > 0 && weight >= components[i - 1].weight {
                    components.swap(i, i - 1);
                    swaps += 1;
                    i -= 1;
                }
            }
        }
        if weight < -prune {
            weight = 0.0;
            surviving -= 1;
        }
        components[mode - swaps].weight = weight;
        total_weight += weight;
    }

    if total_weight > 0.0 {
        let inv = 1.0 / total_weight;
        for component in &mut components[..modes] {
            component.weight *= inv;
        }
    }
    modes = surviving;

    if !fits && alpha > 0.0 {
        let slot = if modes == MAX_MODES {
            MAX_MODES - 1
        } else {
            modes += 1;
            modes - 1
        };
        if modes == 1 {
            components[0].weight = 1.0;
        } else {
            components[slot].weight = alpha;
            for component in &mut components[..modes - 1] {
                component.weight *= alpha1;
            }
        }
        components[slot].mean = value;
        components[slot].variance = VAR_INIT;

        let mut i = modes - 1;
        while i > 0 && alpha >= components[i - 1].weight {
            components.swap(i, i - 1);
            i -= 1;
        }
    }

    *modes_used = modes as u8;

    if background {
        MASK_BACKGROUND
    } else if params.detect_shadows && is_shadow(&components[..modes], value, params.var_threshold)
    {
        MASK_SHADOW
    } else {
        MASK_FOREGROUND
    }
}

/// A pixel is a shadow when it is a uniformly darker copy of a background
/// component: brightness ratio in `[SHADOW_TAU, 1]` and small residual.
fn is_shadow(components: &[Component], value: f32, var_threshold: f32) -> bool {
    let mut cumulative = 0.0f32;
    for component in components {
        let numerator = value * component.mean;
        let denominator = component.mean * component.mean;
        if denominator == 0.0 {
            return false;
        }
        if numerator <= denominator && numerator >= SHADOW_TAU * denominator {
            let a = numerator / denominator;
            let residual = a * component.mean - value;
            if residual * residual < var_threshold * component.variance * a * a {
                return true;
            }
        }
        cumulative += component.weight;
        if cumulative > BACKGROUND_RATIO {
            return false;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn flat(width: u32, height: u32, value: u8) -> GrayImage {
        GrayImage::from_pixel(width, height, Luma([value]))
    }

    fn trained_model(background: &GrayImage, frames: usize) -> BackgroundModel {
        let mut model = BackgroundModel::new(BackgroundModelParams::default()).unwrap();
        for _ in 0..frames {
            model.apply(background);
        }
        model
    }

    #[test]
    fn rejects_invalid_params() {
        let params = BackgroundModelParams {
            history: 0,
            ..BackgroundModelParams::default()
        };
        assert!(BackgroundModel::new(params).is_err());

        let params = BackgroundModelParams {
            var_threshold: 0.0,
            ..BackgroundModelParams::default()
        };
        assert!(BackgroundModel::new(params).is_err());
    }

    #[test]
    fn static_scene_becomes_background() {
        let background = flat(16, 16, 90);
        let mut model = trained_model(&background, 10);
        let mask = model.apply(&background);
        assert!(mask.pixels().all(|p| p.0[0] == MASK_BACKGROUND));
        assert_eq!(model.frames_seen(), 11);
    }

    #[test]
    fn bright_object_is_foreground() {
        let background = flat(16, 16, 40);
        let mut model = trained_model(&background, 30);

        let mut scene = background.clone();
        for y in 4..8 {
            for x in 4..12 {
                scene.put_pixel(x, y, Luma([220]));
            }
        }
        let mask = model.apply(&scene);
        assert_eq!(mask.get_pixel(6, 5).0[0], MASK_FOREGROUND);
        assert_eq!(mask.get_pixel(0, 0).0[0], MASK_BACKGROUND);
    }

    #[test]
    fn darker_copy_of_background_is_shadow() {
        let background = flat(8, 8, 200);
        let mut model = trained_model(&background, 30);

        let mut scene = background.clone();
        scene.put_pixel(3, 3, Luma([140]));
        let mask = model.apply(&scene);
        assert_eq!(mask.get_pixel(3, 3).0[0], MASK_SHADOW);
    }

    #[test]
    fn shadows_are_foreground_when_detection_disabled() {
        let mut model = BackgroundModel::new(BackgroundModelParams {
            detect_shadows: false,
            ..BackgroundModelParams::default()
        })
        .unwrap();
        let background = flat(8, 8, 200);
        for _ in 0..30 {
            model.apply(&background);
        }
        let mut scene = background.clone();
        scene.put_pixel(3, 3, Luma([140]));
        assert_eq!(model.apply(&scene).get_pixel(3, 3).0[0], MASK_FOREGROUND);
    }

    #[test]
    fn size_change_restarts_model() {
        let mut model = trained_model(&flat(8, 8, 50), 5);
        let mask = model.apply(&flat(4, 4, 50));
        assert_eq!(mask.dimensions(), (4, 4));
        assert_eq!(model.frames_seen(), 1);
    }
}
