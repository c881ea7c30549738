//! Draws detections and the status HUD onto an RGB canvas.

use std::sync::OnceLock;

use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::detect::Detection;

pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
pub const HUD_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

const LABEL_SCALE: f32 = 16.0;
const LABEL_PADDING: i32 = 3;
const HUD_SCALE: f32 = 16.0;
const HUD_LINE_HEIGHT: i32 = 25;
const HUD_ORIGIN: (i32, i32) = (10, 8);

static FONT_DATA: &[u8] = include_bytes!("../assets/DejaVuSansMono.ttf");
static FONT: OnceLock<Option<FontRef<'static>>> = OnceLock::new();

/// The embedded overlay font. `None` only if the bundled file is unreadable,
/// in which case text is skipped and boxes are still drawn.
fn font() -> Option<&'static FontRef<'static>> {
    FONT.get_or_init(|| match FontRef::try_from_slice(FONT_DATA) {
        Ok(font) => Some(font),
        Err(err) => {
            log::warn!("overlay font unusable, drawing without text: {err}");
            None
        }
    })
    .as_ref()
}

/// One drawn detection.
#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    pub rect: Rect,
    pub label: String,
}

/// Draw every valid detection onto `canvas` and return what was drawn.
///
/// Boxes are clipped to the canvas and truncated to whole pixels. Detections
/// with an unknown class or an empty box after clipping are skipped.
pub fn annotate(canvas: &mut RgbImage, detections: &[Detection], labels: &[&str]) -> Vec<Annotation> {
    let (width, height) = canvas.dimensions();
    let mut drawn = Vec::with_capacity(detections.len());

    for det in detections {
        let Some(name) = det.label(labels) else {
            log::warn!(
                "overlay: class id {} outside label table of {}, skipping",
                det.class_id,
                labels.len()
            );
            continue;
        };

        let x1 = det.bbox.x1.max(0.0) as i32;
        let y1 = det.bbox.y1.max(0.0) as i32;
        let x2 = det.bbox.x2.min(width as f32) as i32;
        let y2 = det.bbox.y2.min(height as f32) as i32;
        if x2 <= x1 || y2 <= y1 {
            log::warn!(
                "overlay: empty box ({x1},{y1},{x2},{y2}) on {width}x{height} canvas, skipping"
            );
            continue;
        }

        let rect = Rect::at(x1, y1).of_size((x2 - x1) as u32, (y2 - y1) as u32);
        draw_hollow_rect_mut(canvas, rect, BOX_COLOR);
        if rect.width() > 2 && rect.height() > 2 {
            let inner = Rect::at(x1 + 1, y1 + 1).of_size(rect.width() - 2, rect.height() - 2);
            draw_hollow_rect_mut(canvas, inner, BOX_COLOR);
        }

        let label = format!("{name} {:.2}", det.score);
        draw_label(canvas, x1, y1, &label);

        drawn.push(Annotation { rect, label });
    }

    drawn
}

/// Filled tab sitting on top of the box with the label inside. Nothing is
/// drawn when the box touches the top edge.
fn draw_label(canvas: &mut RgbImage, x1: i32, y1: i32, label: &str) {
    let Some(font) = font() else {
        return;
    };
    let scale = PxScale::from(LABEL_SCALE);
    let (text_w, text_h) = text_size(scale, font, label);
    let top = (y1 - text_h as i32 - 2 * LABEL_PADDING).max(0);
    let tab_height = y1 - top;
    let tab_width = (text_w as i32 + 2 * LABEL_PADDING).min(canvas.width() as i32 - x1);
    if tab_height <= 0 || tab_width <= 0 {
        return;
    }
    draw_filled_rect_mut(
        canvas,
        Rect::at(x1, top).of_size(tab_width as u32, tab_height as u32),
        BOX_COLOR,
    );
    draw_text_mut(
        canvas,
        LABEL_TEXT_COLOR,
        x1 + LABEL_PADDING,
        top + LABEL_PADDING,
        scale,
        font,
        label,
    );
}

/// Write the status lines in the top-left corner, one per row.
pub fn draw_hud(canvas: &mut RgbImage, lines: &[String]) {
    let Some(font) = font() else {
        return;
    };
    let (x, mut y) = HUD_ORIGIN;
    for line in lines {
        if y >= canvas.height() as i32 {
            break;
        }
        draw_text_mut(canvas, HUD_COLOR, x, y, PxScale::from(HUD_SCALE), font, line);
        y += HUD_LINE_HEIGHT;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, CLASS_CAR, VEHICLE_LABELS};

    fn canvas() -> RgbImage {
        RgbImage::new(640, 480)
    }

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, class_id: usize) -> Detection {
        Detection::new(BoundingBox::new(x1, y1, x2, y2), 0.85, class_id)
    }

    fn count_in(canvas: &RgbImage, area: Rect, color: Rgb<u8>) -> usize {
        let mut count = 0;
        for y in area.top()..area.bottom() {
            for x in area.left()..area.right() {
                if *canvas.get_pixel(x as u32, y as u32) == color {
                    count += 1;
                }
            }
        }
        count
    }

    #[test]
    fn draws_box_and_label_tab() {
        let mut canvas = canvas();
        let drawn = annotate(&mut canvas, &[det(100.0, 100.0, 200.0, 180.0, CLASS_CAR)], VEHICLE_LABELS);

        assert_eq!(drawn.len(), 1);
        assert_eq!(drawn[0].label, "car 0.85");
        assert_eq!(drawn[0].rect, Rect::at(100, 100).of_size(100, 80));

        // Outer and inner border.
        assert_eq!(*canvas.get_pixel(100, 150), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(101, 150), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(150, 140), Rgb([0, 0, 0]));
        // Tab corner just above the box.
        assert_eq!(*canvas.get_pixel(100, 99), BOX_COLOR);
    }

    #[test]
    fn label_text_is_rendered_inside_tab() {
        let mut canvas = canvas();
        annotate(&mut canvas, &[det(100.0, 100.0, 300.0, 180.0, CLASS_CAR)], VEHICLE_LABELS);

        // Lies inside the tab: the label is wider than 40 px and taller than
        // 8 px, padded by 3 px on each side.
        let inside_tab = Rect::at(100, 86).of_size(40, 14);
        let green = count_in(&canvas, inside_tab, BOX_COLOR);
        let ink = (inside_tab.width() * inside_tab.height()) as usize - green;
        assert!(green > 100, "tab missing ({green} green pixels)");
        assert!(ink > 10, "no glyphs in label tab ({ink} pixels)");
    }

    #[test]
    fn hud_lines_are_rendered() {
        let mut canvas = canvas();
        draw_hud(&mut canvas, &["cars: 2".to_string(), "queue: 1/5".to_string()]);
        let first_row = Rect::at(0, 0).of_size(200, 30);
        let second_row = Rect::at(0, 30).of_size(200, 30);
        let touched = |area: Rect| {
            (area.width() * area.height()) as usize - count_in(&canvas, area, Rgb([0, 0, 0]))
        };
        assert!(touched(first_row) > 20);
        assert!(touched(second_row) > 20);
        assert_eq!(touched(Rect::at(0, 300).of_size(200, 30)), 0);
    }

    #[test]
    fn clips_boxes_to_canvas() {
        let mut canvas = canvas();
        let drawn = annotate(&mut canvas, &[det(-30.0, 400.5, 90.7, 700.0, CLASS_CAR)], VEHICLE_LABELS);
        assert_eq!(drawn.len(), 1);
        assert_eq!(drawn[0].rect, Rect::at(0, 400).of_size(90, 80));
    }

    #[test]
    fn label_tab_is_cut_at_right_edge() {
        let mut canvas = canvas();
        let drawn = annotate(&mut canvas, &[det(620.0, 200.0, 640.0, 260.0, CLASS_CAR)], VEHICLE_LABELS);
        assert_eq!(drawn.len(), 1);
        assert_eq!(*canvas.get_pixel(639, 199), BOX_COLOR);
    }

    #[test]
    fn skips_degenerate_and_unknown_detections() {
        let mut canvas = canvas();
        let detections = [
            det(700.0, 10.0, 800.0, 50.0, CLASS_CAR),
            det(50.0, 50.0, 50.5, 90.0, CLASS_CAR),
            det(10.0, 10.0, 60.0, 60.0, 7),
            det(0.0, 0.0, 40.0, 30.0, CLASS_CAR),
        ];
        let drawn = annotate(&mut canvas, &detections, VEHICLE_LABELS);
        assert_eq!(drawn.len(), 1);
        assert_eq!(drawn[0].rect, Rect::at(0, 0).of_size(40, 30));
    }
}
