//! Detection overlays.
//!
//! `render` burns boxes and labels into a copy of a frame. Labels use a built-in
//! 5x7 bitmap font so rendering needs no font files and is pixel-deterministic.

use std::collections::BTreeMap;

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::detect::Detection;

/// RGB color triple.
pub type Color = [u8; 3];

/// Used for classes missing from the color map.
pub const FALLBACK_COLOR: Color = [255, 255, 0];
pub const LABEL_TEXT_COLOR: Color = [255, 255, 255];

const BOX_THICKNESS: i32 = 2;
const LABEL_PADDING: i32 = 10;
const LABEL_BASELINE_OFFSET: i32 = 5;
const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
const GLYPH_ADVANCE: i32 = 6;

/// Fixed class -> color mapping, shared read-only across the process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassColorMap {
    colors: BTreeMap<String, Color>,
}

impl ClassColorMap {
    pub fn new() -> Self {
        Self {
            colors: BTreeMap::new(),
        }
    }

    pub fn with_color(mut self, class: &str, color: Color) -> Self {
        self.colors.insert(class.to_string(), color);
        self
    }

    /// Build from BGR triples (OpenCV channel order).
    pub fn from_bgr<'a>(entries: impl IntoIterator<Item = (&'a str, Color)>) -> Self {
        let colors = entries
            .into_iter()
            .map(|(class, [b, g, r])| (class.to_string(), [r, g, b]))
            .collect();
        Self { colors }
    }

    pub fn get(&self, class: &str) -> Option<Color> {
        self.colors.get(class).copied()
    }

    /// Color bound to `class`, or `FALLBACK_COLOR`.
    pub fn color_for(&self, class: &str) -> Color {
        self.get(class).unwrap_or(FALLBACK_COLOR)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Color)> {
        self.colors.iter().map(|(class, color)| (class.as_str(), *color))
    }
}

impl Default for ClassColorMap {
    /// Safety palette: red, orange, green, magenta.
    fn default() -> Self {
        Self::from_bgr([
            ("no helmet", [0, 0, 255]),
            ("no jacket", [0, 165, 255]),
            ("safe", [0, 255, 0]),
            ("unsafe", [255, 0, 255]),
        ])
    }
}

/// Render detections onto a copy of `frame`, in input order.
pub fn render(frame: &RgbImage, detections: &[Detection], colors: &ClassColorMap) -> RgbImage {
    let mut canvas = frame.clone();
    for detection in detections {
        draw_detection(&mut canvas, detection, colors);
    }
    canvas
}

/// Pixel size of `text` in the label font.
pub fn text_size(text: &str) -> (u32, u32) {
    let chars = text.chars().count() as i32;
    let width = if chars == 0 {
        0
    } else {
        chars * GLYPH_ADVANCE - (GLYPH_ADVANCE - GLYPH_WIDTH)
    };
    (width as u32, GLYPH_HEIGHT as u32)
}

fn draw_detection(canvas: &mut RgbImage, detection: &Detection, colors: &ClassColorMap) {
    let color = Rgb(colors.color_for(&detection.class));
    let [x1, y1, x2, y2] = detection.bbox.map(i64::from);
    let thickness = i64::from(BOX_THICKNESS);
    let padding = i64::from(LABEL_PADDING);

    for inset in 0..thickness {
        let (left, top) = (x1 + inset, y1 + inset);
        let (right, bottom) = (x2 - inset, y2 - inset);
        if right < left || bottom < top {
            break;
        }
        if let Some(rect) = clipped_rect(canvas, left, top, right, bottom) {
            draw_hollow_rect_mut(canvas, rect, color);
        }
    }

    let label = detection.label();
    let (text_w, text_h) = text_size(&label);
    let label_top = y1 - i64::from(text_h) - padding;
    let label_right = x1 + i64::from(text_w.max(1)) - 1;
    if let Some(background) = clipped_rect(canvas, x1, label_top, label_right, y1) {
        draw_filled_rect_mut(canvas, background, color);
    }

    let baseline = y1 - i64::from(LABEL_BASELINE_OFFSET);
    let text_top = baseline - i64::from(GLYPH_HEIGHT) + 1;
    draw_text(canvas, x1, text_top, &label, Rgb(LABEL_TEXT_COLOR));
}

/// Inclusive rectangle clipped to one pixel beyond each canvas border.
///
/// Edges that lie off the canvas stay off it, so a clipped hollow rectangle
/// draws exactly the visible part of the unclipped one. `None` when nothing
/// would be visible.
fn clipped_rect(canvas: &RgbImage, left: i64, top: i64, right: i64, bottom: i64) -> Option<Rect> {
    let (width, height) = (i64::from(canvas.width()), i64::from(canvas.height()));
    if right < 0 || bottom < 0 || left >= width || top >= height {
        return None;
    }
    let (left, top) = (left.max(-1), top.max(-1));
    let (right, bottom) = (right.min(width), bottom.min(height));
    Some(Rect::at(left as i32, top as i32).of_size((right - left + 1) as u32, (bottom - top + 1) as u32))
}

fn draw_text(canvas: &mut RgbImage, mut x: i64, top: i64, text: &str, color: Rgb<u8>) {
    let width = i64::from(canvas.width());
    let height = i64::from(canvas.height());
    for ch in text.chars() {
        if x >= width {
            break;
        }
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                let py = top + row as i64;
                if py < 0 || py >= height {
                    continue;
                }
                for col in 0..GLYPH_WIDTH {
                    if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                        let px = x + i64::from(col);
                        if px >= 0 && px < width {
                            canvas.put_pixel(px as u32, py as u32, color);
                        }
                    }
                }
            }
        }
        x += i64::from(GLYPH_ADVANCE);
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        'a' => [0, 0, 0b01110, 0b00001, 0b01111, 0b10001, 0b01111],
        'b' => [0b10000, 0b10000, 0b10110, 0b11001, 0b10001, 0b10001, 0b11110],
        'c' => [0, 0, 0b01110, 0b10000, 0b10000, 0b10001, 0b01110],
        'd' => [0b00001, 0b00001, 0b01101, 0b10011, 0b10001, 0b10001, 0b01111],
        'e' => [0, 0, 0b01110, 0b10001, 0b11111, 0b10000, 0b01110],
        'f' => [0b00110, 0b01001, 0b01000, 0b11100, 0b01000, 0b01000, 0b01000],
        'g' => [0, 0b01111, 0b10001, 0b10001, 0b01111, 0b00001, 0b01110],
        'h' => [0b10000, 0b10000, 0b10110, 0b11001, 0b10001, 0b10001, 0b10001],
        'i' => [0b00100, 0, 0b01100, 0b00100, 0b00100, 0b00100, 0b01110],
        'j' => [0b00010, 0, 0b00110, 0b00010, 0b00010, 0b10010, 0b01100],
        'k' => [0b10000, 0b10000, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010],
        'l' => [0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'm' => [0, 0, 0b11010, 0b10101, 0b10101, 0b10001, 0b10001],
        'n' => [0, 0, 0b10110, 0b11001, 0b10001, 0b10001, 0b10001],
        'o' => [0, 0, 0b01110, 0b10001, 0b10001, 0b10001, 0b01110],
        'p' => [0, 0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000],
        'q' => [0, 0b01101, 0b10011, 0b10001, 0b01111, 0b00001, 0b00001],
        'r' => [0, 0, 0b10110, 0b11001, 0b10000, 0b10000, 0b10000],
        's' => [0, 0, 0b01110, 0b10000, 0b01110, 0b00001, 0b11110],
        't' => [0b01000, 0b01000, 0b11100, 0b01000, 0b01000, 0b01001, 0b00110],
        'u' => [0, 0, 0b10001, 0b10001, 0b10001, 0b10011, 0b01101],
        'v' => [0, 0, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'w' => [0, 0, 0b10001, 0b10001, 0b10101, 0b10101, 0b01010],
        'x' => [0, 0, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001],
        'y' => [0, 0b10001, 0b10001, 0b10001, 0b01111, 0b00001, 0b01110],
        'z' => [0, 0, 0b11111, 0b00010, 0b00100, 0b01000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        ':' => [0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0],
        '.' => [0, 0, 0, 0, 0, 0b01100, 0b01100],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(rows)
}
