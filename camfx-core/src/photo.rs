//! # Still Photos
//!
//! Runs decoded images through a photo [`FrameProcessor`]. Images are
//! repacked as BGRA frames on the way in and back to RGBA on the way out.

use std::fs;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbaImage};
use thiserror::Error;

use crate::engine::EngineError;
use crate::format::{FormatDescription, FormatError, PixelBuffer};
use crate::processor::FrameProcessor;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

#[derive(Debug, Error)]
pub enum PhotoError {
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("Format error: {0}")]
    Format(#[from] FormatError),
}

/// Repack an RGBA image as a tightly packed BGRA frame
pub fn frame_from_image(image: &RgbaImage) -> Result<PixelBuffer, FormatError> {
    let format = FormatDescription::bgra(image.width(), image.height());
    let mut data = image.as_raw().clone();
    for px in data.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
    PixelBuffer::from_data(format, data)
}

/// Repack a BGRA frame (any row stride) as an RGBA image
pub fn image_from_frame(frame: &PixelBuffer) -> RgbaImage {
    let width = frame.width();
    let height = frame.height();
    let mut out = RgbaImage::new(width, height);
    for (y, dst) in out.chunks_exact_mut(width as usize * 4).enumerate() {
        if let Some(src) = frame.row(y) {
            for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
                d.copy_from_slice(&[s[2], s[1], s[0], s[3]]);
            }
        }
    }
    out
}

/// Filter a decoded image with the processor's current parameters
pub fn filter_photo(
    processor: &FrameProcessor,
    image: &DynamicImage,
) -> Result<RgbaImage, PhotoError> {
    let frame = frame_from_image(&image.to_rgba8())?;
    let output = processor.try_process(&frame)?;
    Ok(image_from_frame(&output))
}

/// Load, filter and save a photo; output format follows the extension
pub fn filter_photo_file(
    processor: &FrameProcessor,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    jpeg_quality: u8,
) -> Result<(u32, u32), PhotoError> {
    let input = input.as_ref();
    let output = output.as_ref();

    let source = image::open(input)?;
    let filtered = filter_photo(processor, &source)?;
    tracing::info!(
        "Filtered {} ({}x{}) -> {}",
        input.display(),
        filtered.width(),
        filtered.height(),
        output.display()
    );

    match ImageFormat::from_path(output)? {
        ImageFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(filtered.clone()).to_rgb8();
            let mut file = fs::File::create(output)?;
            let encoder = JpegEncoder::new_with_quality(&mut file, jpeg_quality);
            rgb.write_with_encoder(encoder)?;
        }
        _ => filtered.save(output)?,
    }

    Ok((filtered.width(), filtered.height()))
}
