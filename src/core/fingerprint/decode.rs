//! Image decoding from in-memory bytes.
//!
//! Uses zune-jpeg for JPEG (1.5-2x faster than the image crate),
//! falls back to the image crate for everything else.

use super::read::ImageSignature;
use image::{DynamicImage, ImageBuffer, Luma, Rgb, Rgba};
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_jpeg::JpegDecoder;

/// Decode image bytes whose container was already sniffed.
///
/// Returns the decoder's message on failure; callers treat an
/// undecodable image as having no similarity hash.
pub fn decode_image(bytes: &[u8], signature: ImageSignature) -> Result<DynamicImage, String> {
    match signature {
        ImageSignature::Jpeg => decode_jpeg(bytes).or_else(|_| decode_fallback(bytes)),
        _ => decode_fallback(bytes),
    }
}

fn decode_jpeg(bytes: &[u8]) -> Result<DynamicImage, String> {
    let options = DecoderOptions::new_fast().jpeg_set_out_colorspace(ColorSpace::RGB);
    let mut decoder = JpegDecoder::new_with_options(bytes, options);

    let pixels = decoder
        .decode()
        .map_err(|e| format!("zune-jpeg decode failed: {:?}", e))?;

    let info = decoder
        .info()
        .ok_or_else(|| "Failed to get image info".to_string())?;

    let width = info.width as u32;
    let height = info.height as u32;

    let image = match decoder.get_output_colorspace().unwrap_or(ColorSpace::RGB) {
        ColorSpace::RGB => {
            let buffer: ImageBuffer<Rgb<u8>, Vec<u8>> =
                ImageBuffer::from_raw(width, height, pixels)
                    .ok_or_else(|| "Failed to create RGB buffer".to_string())?;
            DynamicImage::ImageRgb8(buffer)
        }
        ColorSpace::RGBA => {
            let buffer: ImageBuffer<Rgba<u8>, Vec<u8>> =
                ImageBuffer::from_raw(width, height, pixels)
                    .ok_or_else(|| "Failed to create RGBA buffer".to_string())?;
            DynamicImage::ImageRgba8(buffer)
        }
        ColorSpace::Luma => {
            let buffer: ImageBuffer<Luma<u8>, Vec<u8>> =
                ImageBuffer::from_raw(width, height, pixels)
                    .ok_or_else(|| "Failed to create Luma buffer".to_string())?;
            DynamicImage::ImageLuma8(buffer)
        }
        other => return Err(format!("unsupported JPEG colorspace {:?}", other)),
    };

    Ok(image)
}

fn decode_fallback(bytes: &[u8]) -> Result<DynamicImage, String> {
    image::load_from_memory(bytes).map_err(|e| e.to_string())
}
