//! Identity overlays: padded outline, filled label bar, name text.

use crate::types::{FaceRegion, MatchResult};
use ab_glyph::{Font, FontRef, PxScale, ScaleFont};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::sync::OnceLock;

/// DejaVu Sans Bold, see `assets/DejaVu-LICENSE`.
const LABEL_FONT: &[u8] = include_bytes!("../assets/DejaVuSans-Bold.ttf");

static FONT: OnceLock<Option<FontRef<'static>>> = OnceLock::new();

const OUTLINE_THICKNESS: i32 = 2;
const TEXT_SCALE: PxScale = PxScale { x: 24.0, y: 24.0 };
const TEXT_INSET_X: i32 = 6;
const TEXT_INSET_BOTTOM: i32 = 6;
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

/// Overlay geometry, in full-resolution pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    /// Margin added on every side of the detected region.
    pub box_padding: i32,
    /// Height of the filled label bar at the bottom of the box.
    pub label_height: i32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            box_padding: 40,
            label_height: 35,
        }
    }
}

fn rect_from_edges(left: i32, top: i32, right: i32, bottom: i32) -> Option<Rect> {
    let width = right - left + 1;
    let height = bottom - top + 1;
    (width > 0 && height > 0).then(|| Rect::at(left, top).of_size(width as u32, height as u32))
}

/// Draw one face overlay on a full-resolution frame. The region must already
/// be in the frame's coordinate space.
pub fn draw_face(
    image: &mut RgbImage,
    region: &FaceRegion,
    result: &MatchResult,
    style: OverlayStyle,
) {
    let color = result.color();
    let pad = style.box_padding;
    let (left, top) = (region.left - pad, region.top - pad);
    let (right, bottom) = (region.right + pad, region.bottom + pad);

    for inset in 0..OUTLINE_THICKNESS {
        let rect = rect_from_edges(left + inset, top + inset, right - inset, bottom - inset);
        if let Some(rect) = rect {
            draw_hollow_rect_mut(image, rect, color);
        }
    }

    let bar_top = bottom - style.label_height;
    if let Some(bar) = rect_from_edges(left, bar_top, right, bottom) {
        draw_filled_rect_mut(image, bar, color);
    }

    let Some(font) = label_font() else {
        return;
    };
    let label = fit_label(font, result.label(), right - left - 2 * TEXT_INSET_X);
    // Baseline sits `TEXT_INSET_BOTTOM` above the box bottom.
    let ascent = font.as_scaled(TEXT_SCALE).ascent().ceil() as i32;
    let text_top = bottom - TEXT_INSET_BOTTOM - ascent;
    draw_text_mut(image, TEXT_COLOR, left + TEXT_INSET_X, text_top, TEXT_SCALE, font, &label);
}

fn label_font() -> Option<&'static FontRef<'static>> {
    FONT.get_or_init(|| match FontRef::try_from_slice(LABEL_FONT) {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::error!(error = %e, "embedded label font is invalid, labels disabled");
            None
        }
    })
    .as_ref()
}

/// Truncate `label` so it fits in `max_width` pixels at the overlay text scale.
fn fit_label(font: &impl Font, label: &str, max_width: i32) -> String {
    let mut fitted = String::new();
    for c in label.chars() {
        fitted.push(c);
        if text_size(TEXT_SCALE, font, &fitted).0 as i32 > max_width {
            fitted.pop();
            break;
        }
    }
    fitted
}
