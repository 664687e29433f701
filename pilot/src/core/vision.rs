//! Screenshot normalization for vision-model input.
//!
//! Pure byte-to-byte transformation: base64 screenshot in, JPEG payload out.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

use crate::core::error::ScreenCaptureError;
use crate::core::types::VisionPayload;

/// Screenshots wider than this are downscaled to exactly this width.
pub const MAX_VISION_WIDTH: u32 = 1280;

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

const DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

/// Decode a base64 screenshot, flatten alpha, cap the width and re-encode as
/// JPEG. A leading `data:...;base64,` header is tolerated.
pub fn normalize_screenshot(
    screenshot_b64: &str,
    jpeg_quality: u8,
) -> Result<VisionPayload, ScreenCaptureError> {
    let encoded = strip_data_uri_header(screenshot_b64.trim());
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let raw = STANDARD.decode(compact.as_bytes())?;
    let decoded = image::load_from_memory(&raw)?;

    let opaque = if decoded.color().has_alpha() {
        DynamicImage::ImageRgb8(decoded.to_rgb8())
    } else {
        decoded
    };

    let (width, height) = opaque.dimensions();
    let resized = match scaled_dimensions(width, height) {
        Some((new_width, new_height)) => {
            opaque.resize_exact(new_width, new_height, FilterType::Lanczos3)
        }
        None => opaque,
    };

    let rgb = resized.to_rgb8();
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, jpeg_quality.clamp(1, 100)).encode_image(&rgb)?;

    let data_uri = format!("{DATA_URI_PREFIX}{}", STANDARD.encode(&jpeg));
    Ok(VisionPayload {
        jpeg,
        width: rgb.width(),
        height: rgb.height(),
        data_uri,
    })
}

/// Target size for an image wider than [`MAX_VISION_WIDTH`], or `None` when no
/// resize is needed. Height is rounded to the nearest integer and never zero.
pub fn scaled_dimensions(width: u32, height: u32) -> Option<(u32, u32)> {
    if width <= MAX_VISION_WIDTH {
        return None;
    }
    let scaled = (f64::from(height) * f64::from(MAX_VISION_WIDTH) / f64::from(width)).round();
    let new_height = (scaled as u32).max(1);
    Some((MAX_VISION_WIDTH, new_height))
}

fn strip_data_uri_header(input: &str) -> &str {
    if input.starts_with("data:")
        && let Some((_, body)) = input.split_once(";base64,")
    {
        return body;
    }
    input
}
