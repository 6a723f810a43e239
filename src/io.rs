use std::path::Path;

use image::codecs::png::PngEncoder;
use image::{GrayImage, ImageEncoder, ImageFormat, RgbaImage};

use crate::bitmap::Bitmap;
use crate::error::{CanvasError, Result};

// ============================================================================
// PNG CODECS
// ============================================================================

/// Losslessly compress single-channel coverage as an 8-bit grayscale PNG.
///
/// Coverage is mostly solid runs, which deflate shrinks to a small fraction
/// of the raw size.
pub fn encode_gray_png(image: &GrayImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, image.width(), image.height());
        encoder.set_color(png::ColorType::Grayscale);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_compression(png::Compression::Best);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(image.as_raw())?;
        writer.finish()?;
    }
    Ok(out)
}

/// Decode a PNG produced by [`encode_gray_png`].
pub fn decode_gray_png(bytes: &[u8]) -> Result<GrayImage> {
    let mut decoder = png::Decoder::new(bytes);
    decoder.set_transformations(png::Transformations::EXPAND);
    let mut reader = decoder.read_info()?;
    let mut buf = vec![0u8; reader.output_buffer_size()];
    let info = reader.next_frame(&mut buf)?;

    if info.color_type != png::ColorType::Grayscale || info.bit_depth != png::BitDepth::Eight {
        return Err(CanvasError::InvalidFormat(format!(
            "expected 8-bit grayscale mask, got {:?} {:?}",
            info.color_type, info.bit_depth
        )));
    }
    buf.truncate(info.buffer_size());
    GrayImage::from_raw(info.width, info.height, buf)
        .ok_or_else(|| CanvasError::InvalidFormat("mask buffer too small".into()))
}

/// Encode a composited RGBA raster as PNG bytes.
pub fn encode_rgba_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let encoder = PngEncoder::new(&mut out);
    encoder.write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ColorType::Rgba8,
    )?;
    Ok(out)
}

pub fn decode_rgba_png(bytes: &[u8]) -> Result<RgbaImage> {
    Ok(image::load_from_memory_with_format(bytes, ImageFormat::Png)?.into_rgba8())
}

// ============================================================================
// FILES
// ============================================================================

/// Load a drawing from disk and prepare it as line art.
pub fn load_line_art(path: &Path, ink_threshold: u8) -> Result<Bitmap> {
    let img = image::open(path)?.into_rgba8();
    Bitmap::from_line_art(&img, ink_threshold)
}

/// Write a mask's coverage as a grayscale PNG file.
pub fn write_gray_png(image: &GrayImage, path: &Path) -> Result<()> {
    let bytes = encode_gray_png(image)?;
    std::fs::write(path, bytes)?;
    Ok(())
}
