//! Image family transforms
//!
//! Images are decoded and re-encoded with the `image` crate. JPEG has no
//! alpha channel, so it is encoded from RGB8; every other target from RGBA8.
//! AVIF sources are decoded by [`super::avif`].

use ::image::{DynamicImage, ImageFormat};
use bytes::Bytes;
use std::io::Cursor;
use tracing::debug;

use super::{Payload, IMAGE_AVIF, IMAGE_GIF, IMAGE_JPEG, IMAGE_PNG, IMAGE_WEBP};
use crate::error::FragmentError;

fn image_format(mime_type: &str) -> Result<ImageFormat, FragmentError> {
    match mime_type {
        IMAGE_PNG => Ok(ImageFormat::Png),
        IMAGE_JPEG => Ok(ImageFormat::Jpeg),
        IMAGE_WEBP => Ok(ImageFormat::WebP),
        IMAGE_GIF => Ok(ImageFormat::Gif),
        IMAGE_AVIF => Ok(ImageFormat::Avif),
        other => Err(FragmentError::UnsupportedMediaType(format!(
            "Not an image type: {}",
            other
        ))),
    }
}

/// Same format requested: hand back the stored bytes
pub fn identity(data: &[u8], _target: &'static str) -> Result<Payload, FragmentError> {
    Ok(Payload::Binary(Bytes::copy_from_slice(data)))
}

fn load(data: &[u8]) -> Result<DynamicImage, FragmentError> {
    if let Ok(ImageFormat::Avif) = ::image::guess_format(data) {
        return super::avif::decode(data).map(DynamicImage::ImageRgba8);
    }

    ::image::load_from_memory(data)
        .map_err(|e| FragmentError::ConversionFailure(format!("Invalid image data: {}", e)))
}

/// Decode whatever raster format `data` holds and encode it as `target`
pub fn transcode(data: &[u8], target: &'static str) -> Result<Payload, FragmentError> {
    let format = image_format(target)?;

    let decoded = load(data)?;

    let prepared = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(decoded.to_rgb8()),
        _ => DynamicImage::ImageRgba8(decoded.to_rgba8()),
    };

    let mut out = Cursor::new(Vec::new());
    prepared
        .write_to(&mut out, format)
        .map_err(|e| FragmentError::ConversionFailure(format!("Image encoding failed: {}", e)))?;

    let encoded = out.into_inner();
    debug!(
        width = prepared.width(),
        height = prepared.height(),
        target = %target,
        size = encoded.len(),
        "Transcoded image"
    );

    Ok(Payload::Binary(Bytes::from(encoded)))
}
