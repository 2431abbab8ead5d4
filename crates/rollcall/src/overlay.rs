//! Labelled face boxes drawn onto the preview frame.

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use rollcall_core::BoundingBox;
use std::path::Path;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_THICKNESS: i32 = 2;
/// Height of the filled name bar along the bottom edge of the box.
const LABEL_BAR_HEIGHT: i32 = 35;
const LABEL_SCALE: f32 = 24.0;
const LABEL_PADDING: i32 = 6;

pub struct Overlay {
    font: Option<FontVec>,
}

impl Overlay {
    /// Load the label font. Without it, boxes are still drawn but carry no text.
    pub fn load(font_path: &Path) -> Self {
        let font = std::fs::read(font_path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| FontVec::try_from_vec(bytes).map_err(|e| e.to_string()));
        match font {
            Ok(font) => Self { font: Some(font) },
            Err(e) => {
                tracing::warn!(path = %font_path.display(), error = %e, "label font unavailable, drawing boxes without names");
                Self::without_text()
            }
        }
    }

    pub fn without_text() -> Self {
        Self { font: None }
    }

    /// Draw a green box around `face` with `label` on a filled bar at its bottom.
    pub fn draw(&self, image: &mut RgbImage, face: &BoundingBox, label: &str) {
        let x1 = face.x.round() as i32;
        let y1 = face.y.round() as i32;
        let x2 = face.right().round() as i32;
        let y2 = face.bottom().round() as i32;
        let (w, h) = (x2 - x1, y2 - y1);
        if w <= 0 || h <= 0 {
            return;
        }

        for inset in 0..BOX_THICKNESS {
            let (iw, ih) = (w - 2 * inset, h - 2 * inset);
            if iw <= 0 || ih <= 0 {
                break;
            }
            let rect = Rect::at(x1 + inset, y1 + inset).of_size(iw as u32, ih as u32);
            draw_hollow_rect_mut(image, rect, BOX_COLOR);
        }

        let bar_h = LABEL_BAR_HEIGHT.min(h);
        draw_filled_rect_mut(image, Rect::at(x1, y2 - bar_h).of_size(w as u32, bar_h as u32), BOX_COLOR);

        if let Some(font) = &self.font {
            let text_y = y2 - LABEL_PADDING - LABEL_SCALE as i32;
            draw_text_mut(
                image,
                TEXT_COLOR,
                x1 + LABEL_PADDING,
                text_y,
                PxScale::from(LABEL_SCALE),
                font,
                label,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9, landmarks: None }
    }

    #[test]
    fn test_draw_box_and_label_bar() {
        let mut image = RgbImage::new(200, 200);
        Overlay::without_text().draw(&mut image, &face(40.0, 40.0, 80.0, 100.0), "ALICE");

        // Outline (both pixels of the 2px border)
        assert_eq!(image.get_pixel(40, 60), &BOX_COLOR);
        assert_eq!(image.get_pixel(41, 60), &BOX_COLOR);
        assert_eq!(image.get_pixel(80, 40), &BOX_COLOR);
        // Interior above the bar stays untouched
        assert_eq!(image.get_pixel(80, 60), &Rgb([0, 0, 0]));
        // Filled bar along the bottom edge
        assert_eq!(image.get_pixel(80, 130), &BOX_COLOR);
        // Outside the box
        assert_eq!(image.get_pixel(150, 150), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_draw_clips_at_frame_edge() {
        let mut image = RgbImage::new(50, 50);
        Overlay::without_text().draw(&mut image, &face(30.0, 30.0, 60.0, 60.0), "BOB");
        assert_eq!(image.get_pixel(30, 35), &BOX_COLOR);
    }

    #[test]
    fn test_degenerate_box_is_ignored() {
        let mut image = RgbImage::new(20, 20);
        Overlay::without_text().draw(&mut image, &face(5.0, 5.0, 0.0, 8.0), "X");
        assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn test_missing_font_falls_back() {
        let overlay = Overlay::load(Path::new("/nonexistent/font.ttf"));
        assert!(overlay.font.is_none());
    }
}
