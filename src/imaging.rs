//! Image compression for request payloads.
//!
//! Bounded long-edge resize plus lossy JPEG re-encode, used on every
//! image embedded into a provider request. Fails open: undecodable
//! input is returned unchanged so a single odd image never sinks a
//! request.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::GenericImageView;
use std::io::Cursor;

pub const JPEG_MIME: &str = "image/jpeg";

/// Compress `bytes` so neither edge exceeds `max_edge`, re-encoding as
/// JPEG at `quality`. Returns the original bytes when decoding or
/// encoding fails.
pub fn compress(bytes: &[u8], max_edge: u32, quality: u8) -> Vec<u8> {
    match try_compress(bytes, max_edge, quality) {
        Ok(compressed) => {
            tracing::debug!(
                "[Imaging] Compressed image {} -> {} bytes",
                bytes.len(),
                compressed.len()
            );
            compressed
        }
        Err(e) => {
            tracing::warn!("[Imaging] Compression failed, using original bytes: {:#}", e);
            bytes.to_vec()
        }
    }
}

fn try_compress(bytes: &[u8], max_edge: u32, quality: u8) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes).context("Failed to decode image")?;

    let (width, height) = img.dimensions();
    let img = if width > max_edge || height > max_edge {
        // resize() preserves aspect ratio within the bounding box
        img.resize(max_edge, max_edge, FilterType::Lanczos3)
    } else {
        img
    };

    // Flatten any alpha channel; JPEG has none.
    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    let mut cursor = Cursor::new(&mut out);
    JpegEncoder::new_with_quality(&mut cursor, quality)
        .encode_image(&rgb)
        .context("Failed to encode JPEG")?;
    Ok(out)
}
