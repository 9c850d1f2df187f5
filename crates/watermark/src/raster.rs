//! Image marking
//!
//! The watermark text is laid out as a brick pattern in a rotated frame and
//! blended over every pixel it covers, so the whole image carries the mark.
//! Glyph size and tile period grow with the image so marks stay legible at
//! any resolution. One unrotated id stamp sits in the bottom-right corner.

use crate::font::TextMask;
use crate::{Attribution, WatermarkError};
use ::image::{DynamicImage, ImageFormat, RgbaImage};
use scriptorium_common::models::WatermarkSettings;
use std::io::Cursor;

const PATTERN_ANGLE_DEGREES: f32 = -30.0;
/// Reference edge length at which one font-size unit is one pixel
const REFERENCE_EDGE: f32 = 500.0;
const MAX_STAMP_OPACITY: f32 = 0.6;

pub(crate) fn mark(
    document: &[u8],
    text: &str,
    attribution: &Attribution,
    settings: &WatermarkSettings,
) -> Result<Vec<u8>, WatermarkError> {
    let format = ::image::guess_format(document).map_err(|e| WatermarkError::InvalidImage {
        message: e.to_string(),
    })?;
    if !is_markable(format) {
        return Err(WatermarkError::UnsupportedFormat {
            format: format!("{:?}", format).to_lowercase(),
        });
    }

    let decoded = ::image::load_from_memory_with_format(document, format).map_err(|e| {
        WatermarkError::InvalidImage {
            message: e.to_string(),
        }
    })?;
    let mut canvas = decoded.to_rgba8();
    let (width, height) = canvas.dimensions();
    let min_edge = width.min(height).max(1);

    let scale = glyph_scale(min_edge, settings.font_size());
    let color = settings.rgb();

    let pattern = TextMask::render(text, scale);
    tile_pattern(&mut canvas, &pattern, min_edge, color, settings.opacity());

    let stamp = TextMask::render(&format!("ID: {}", attribution.watermark_id), scale);
    let margin = (min_edge / 50).max(2);
    let stamp_x = width.saturating_sub(stamp.width + margin) as i64;
    let stamp_y = height.saturating_sub(stamp.height + margin) as i64;
    let stamp_opacity = (settings.opacity() * 2.0).min(MAX_STAMP_OPACITY);
    stamp_mask(&mut canvas, &stamp, stamp_x, stamp_y, color, stamp_opacity);

    encode(canvas, format)
}

/// Raster formats this module can decode and re-encode
fn is_markable(format: ImageFormat) -> bool {
    matches!(
        format,
        ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Gif | ImageFormat::WebP
    )
}

/// Whether an upload declared as `mime_type` can be marked here.
/// Parameters after `;` are ignored.
pub(crate) fn accepts_mime(mime_type: &str) -> bool {
    let essence = mime_type.split(';').next().unwrap_or_default().trim();
    ImageFormat::from_mime_type(essence.to_ascii_lowercase()).is_some_and(is_markable)
}

/// Font pixel block size for an image whose shorter edge is `min_edge`
fn glyph_scale(min_edge: u32, font_size: f32) -> u32 {
    let glyph_px = font_size * min_edge as f32 / REFERENCE_EDGE;
    ((glyph_px / crate::font::GLYPH_HEIGHT as f32).round() as u32).max(1)
}

fn tile_pattern(
    canvas: &mut RgbaImage,
    pattern: &TextMask,
    min_edge: u32,
    color: [u8; 3],
    opacity: f32,
) {
    let period_x = (pattern.width + (pattern.height * 4).max(min_edge / 6)) as f32;
    let period_y = (pattern.height * 3 + min_edge / 10) as f32;

    let (sin, cos) = PATTERN_ANGLE_DEGREES.to_radians().sin_cos();
    let (cx, cy) = (canvas.width() as f32 / 2.0, canvas.height() as f32 / 2.0);

    for (x, y, pixel) in canvas.enumerate_pixels_mut() {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let u = dx * cos + dy * sin;
        let v = -dx * sin + dy * cos;

        let row = (v / period_y).floor() as i64;
        let shift = if row.rem_euclid(2) == 1 { period_x / 2.0 } else { 0.0 };
        let pu = (u + shift).rem_euclid(period_x);
        let pv = v.rem_euclid(period_y);

        if pattern.covers(pu as u32, pv as u32) {
            blend(&mut pixel.0, color, opacity);
        }
    }
}

fn stamp_mask(
    canvas: &mut RgbaImage,
    mask: &TextMask,
    origin_x: i64,
    origin_y: i64,
    color: [u8; 3],
    opacity: f32,
) {
    let (width, height) = canvas.dimensions();
    for my in 0..mask.height {
        for mx in 0..mask.width {
            if !mask.covers(mx, my) {
                continue;
            }
            let x = origin_x + mx as i64;
            let y = origin_y + my as i64;
            if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
                continue;
            }
            blend(&mut canvas.get_pixel_mut(x as u32, y as u32).0, color, opacity);
        }
    }
}

/// Source-over with the mark color; the pixel keeps its own alpha
fn blend(pixel: &mut [u8; 4], color: [u8; 3], opacity: f32) {
    for (channel, mark) in pixel.iter_mut().take(3).zip(color) {
        let mixed = *channel as f32 * (1.0 - opacity) + mark as f32 * opacity;
        *channel = mixed.round().clamp(0.0, 255.0) as u8;
    }
}

fn encode(canvas: RgbaImage, format: ImageFormat) -> Result<Vec<u8>, WatermarkError> {
    // JPEG has no alpha channel
    let image = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8()),
        _ => DynamicImage::ImageRgba8(canvas),
    };

    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, format)
        .map_err(|e| WatermarkError::Encode {
            message: e.to_string(),
        })?;
    Ok(out.into_inner())
}
