// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Bounded-size image payloads for the classifier

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView};
use std::path::Path;
use tracing::debug;

use crate::Result;

/// Longest side sent to the classifier
pub const DEFAULT_MAX_DIMENSION: u32 = 1280;

/// Files below this size that already fit are sent unchanged
const PASSTHROUGH_BYTES: usize = 50_000;

const JPEG_QUALITY: u8 = 85;

/// Image bytes with their media type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl ImagePayload {
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
        }
    }
}

/// Guess a media type from the file extension
pub fn mime_for_name(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}

/// Shrink an image for classification.
///
/// Small files that fit are passed through. Anything else is resized to fit
/// `max_dimension` and re-encoded as JPEG. Small data that cannot be decoded is
/// passed through so the classifier can still try; larger undecodable data is
/// rejected.
pub fn prepare(data: Vec<u8>, name: &str, max_dimension: u32) -> Result<ImagePayload> {
    let img = match image::load_from_memory(&data) {
        Ok(img) => img,
        Err(e) if data.len() < PASSTHROUGH_BYTES => {
            debug!("Cannot decode {}, sending raw bytes: {}", name, e);
            return Ok(ImagePayload::new(data, mime_for_name(name)));
        }
        Err(e) => return Err(e.into()),
    };

    let (width, height) = img.dimensions();
    if data.len() < PASSTHROUGH_BYTES && width.max(height) <= max_dimension {
        return Ok(ImagePayload::new(data, mime_for_name(name)));
    }

    let jpeg = downscale(img, max_dimension)?;
    debug!(name, from = data.len(), to = jpeg.len(), "Downscaled image");
    Ok(ImagePayload::new(jpeg, "image/jpeg"))
}

fn downscale(img: DynamicImage, max_dimension: u32) -> Result<Vec<u8>> {
    let img = if img.width() > max_dimension || img.height() > max_dimension {
        img.resize(max_dimension, max_dimension, image::imageops::FilterType::Triangle)
    } else {
        img
    };

    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());

    let mut buffer = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY))?;
    Ok(buffer)
}
