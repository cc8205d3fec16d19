//! Watermark burned into every generated image before it is stored.
//!
//! The transform is deterministic and size-preserving: the source raster is
//! redrawn unchanged onto a same-size surface, then "MK" is stamped near the
//! top-left at 5% of the image width and "Created with MK" at the bottom-right
//! at 3%, both in white at 60% opacity over a blurred black drop shadow.
//! Glyphs come from a built-in 5x7 bitmap face scaled to the target size, so
//! no font files or shaping machinery are involved.

use std::io::Cursor;

use image::{imageops, DynamicImage, GrayImage, ImageFormat, Luma, Rgba, RgbaImage};
use tracing::warn;

const TOP_LABEL: &str = "MK";
const BOTTOM_LABEL: &str = "Created with MK";
const TOP_LABEL_SCALE: f32 = 0.05;
const BOTTOM_LABEL_SCALE: f32 = 0.03;
const EDGE_MARGIN: u32 = 40;
const TOP_OFFSET: u32 = 60;
const TEXT_OPACITY: f32 = 0.6;
const SHADOW_OPACITY: f32 = 0.5;
const SHADOW_BLUR_SIGMA: f32 = 4.0;

const GLYPH_COLS: u32 = 5;
const GLYPH_ROWS: u32 = 7;

/// Applies the watermark to an encoded raster and returns it re-encoded as
/// PNG. Input that cannot be decoded is returned unchanged rather than
/// failing the exchange.
pub fn apply(bytes: &[u8]) -> Vec<u8> {
    match try_apply(bytes) {
        Ok(out) => out,
        Err(err) => {
            warn!("Watermarking degraded to passthrough: {err}");
            bytes.to_vec()
        }
    }
}

fn try_apply(bytes: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let mut canvas: RgbaImage = image::load_from_memory(bytes)?.to_rgba8();
    let (width, height) = canvas.dimensions();

    let mut mask = GrayImage::new(width, height);

    let top_px = scaled_size(width, TOP_LABEL_SCALE);
    draw_label(&mut mask, TOP_LABEL, top_px, EDGE_MARGIN, TOP_OFFSET);

    let bottom_px = scaled_size(width, BOTTOM_LABEL_SCALE);
    let bottom_x = width.saturating_sub(label_width(BOTTOM_LABEL, bottom_px) + EDGE_MARGIN);
    let bottom_y = height.saturating_sub(bottom_px.max(GLYPH_ROWS) + EDGE_MARGIN);
    draw_label(&mut mask, BOTTOM_LABEL, bottom_px, bottom_x, bottom_y);

    let shadow = imageops::blur(&mask, SHADOW_BLUR_SIGMA);
    for (x, y, pixel) in canvas.enumerate_pixels_mut() {
        let shade = coverage(&shadow, x, y) * SHADOW_OPACITY;
        if shade > 0.0 {
            blend(pixel, 0, shade);
        }
        let ink = coverage(&mask, x, y) * TEXT_OPACITY;
        if ink > 0.0 {
            blend(pixel, 255, ink);
        }
    }

    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(canvas).write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

fn scaled_size(width: u32, scale: f32) -> u32 {
    ((width as f32 * scale) as u32).max(GLYPH_ROWS)
}

fn coverage(mask: &GrayImage, x: u32, y: u32) -> f32 {
    mask.get_pixel(x, y)[0] as f32 / 255.0
}

fn blend(pixel: &mut Rgba<u8>, level: u8, alpha: f32) {
    for channel in 0..3 {
        let dst = pixel[channel] as f32;
        pixel[channel] = (level as f32 * alpha + dst * (1.0 - alpha)).round() as u8;
    }
    pixel[3] = pixel[3].max((alpha * 255.0).round() as u8);
}

/// Cell height, scaled glyph width and horizontal advance for a target pixel
/// size. The cell never drops below the bitmap resolution.
fn metrics(px: u32) -> (u32, u32, u32) {
    let cell = px.max(GLYPH_ROWS);
    let glyph_w = (cell * GLYPH_COLS / GLYPH_ROWS).max(1);
    let gap = (cell / GLYPH_ROWS).max(1);
    (cell, glyph_w, glyph_w + gap)
}

fn label_width(text: &str, px: u32) -> u32 {
    let (_, glyph_w, advance) = metrics(px);
    match text.chars().count() as u32 {
        0 => 0,
        n => (n - 1) * advance + glyph_w,
    }
}

fn draw_label(mask: &mut GrayImage, text: &str, px: u32, origin_x: u32, origin_y: u32) {
    let (cell, glyph_w, advance) = metrics(px);
    let (width, height) = mask.dimensions();
    let mut pen_x = origin_x;
    for c in text.chars() {
        let rows = glyph(c);
        for dy in 0..cell {
            let y = origin_y + dy;
            if y >= height {
                break;
            }
            let row = rows[(dy * GLYPH_ROWS / cell) as usize];
            for dx in 0..glyph_w {
                let col = dx * GLYPH_COLS / glyph_w;
                if (row >> (GLYPH_COLS - 1 - col)) & 1 == 1 {
                    let x = pen_x + dx;
                    if x < width {
                        mask.put_pixel(x, y, Luma([255]));
                    }
                }
            }
        }
        pen_x += advance;
    }
}

/// 5x7 bitmap rows for the characters the two labels need; anything else
/// renders as a blank cell.
fn glyph(c: char) -> [u8; 7] {
    match c {
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'a' => [0b00000, 0b00000, 0b01110, 0b00001, 0b01111, 0b10001, 0b01111],
        'd' => [0b00001, 0b00001, 0b01101, 0b10011, 0b10001, 0b10011, 0b01101],
        'e' => [0b00000, 0b00000, 0b01110, 0b10001, 0b11111, 0b10000, 0b01110],
        'h' => [0b10000, 0b10000, 0b10110, 0b11001, 0b10001, 0b10001, 0b10001],
        'i' => [0b00100, 0b00000, 0b01100, 0b00100, 0b00100, 0b00100, 0b01110],
        'r' => [0b00000, 0b00000, 0b10110, 0b11001, 0b10000, 0b10000, 0b10000],
        't' => [0b01000, 0b01000, 0b11100, 0b01000, 0b01000, 0b01001, 0b00110],
        'w' => [0b00000, 0b00000, 0b10001, 0b10001, 0b10101, 0b10101, 0b01010],
        _ => [0; 7],
    }
}
