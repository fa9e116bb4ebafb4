//! Luminance conversion and raw-buffer decoding.

use image::{DynamicImage, GrayImage, ImageBuffer, Luma, LumaA, Rgb, Rgba};

use crate::error::{EngineError, EngineResult};

/// Composite a channel over a white background.
#[inline]
fn over_white(c: u8, a: u8) -> u32 {
    let c = c as u32;
    let a = a as u32;
    (c * a + 255 * (255 - a) + 127) / 255
}

/// Integer-rounded `0.299 R + 0.587 G + 0.114 B`.
#[inline]
fn luminance(r: u32, g: u32, b: u32) -> u8 {
    ((299 * r + 587 * g + 114 * b + 500) / 1000).min(255) as u8
}

/// Convert any decoded image to an 8-bit luminance image.
///
/// Alpha is composited over white so transparent scans read as blank paper.
pub(crate) fn to_luminance(image: &DynamicImage) -> GrayImage {
    if let DynamicImage::ImageLuma8(gray) = image {
        return gray.clone();
    }
    let rgba = image.to_rgba8();
    let (w, h) = rgba.dimensions();
    let mut out = GrayImage::new(w, h);
    for (dst, src) in out.pixels_mut().zip(rgba.pixels()) {
        let [r, g, b, a] = src.0;
        dst.0[0] = luminance(over_white(r, a), over_white(g, a), over_white(b, a));
    }
    out
}

/// Wrap a raw interleaved pixel buffer (1 = gray, 2 = gray+alpha, 3 = RGB,
/// 4 = RGBA channels) as a decoded image.
pub(crate) fn image_from_raw(
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
) -> EngineResult<DynamicImage> {
    let expected = width as usize * height as usize * channels as usize;
    if data.len() != expected {
        return Err(EngineError::malformed_image(format!(
            "pixel buffer has {} bytes, expected {width}x{height}x{channels} = {expected}",
            data.len()
        )));
    }
    let too_short = || EngineError::malformed_image("pixel buffer does not match dimensions");
    let image = match channels {
        1 => DynamicImage::ImageLuma8(
            ImageBuffer::<Luma<u8>, _>::from_raw(width, height, data).ok_or_else(too_short)?,
        ),
        2 => DynamicImage::ImageLumaA8(
            ImageBuffer::<LumaA<u8>, _>::from_raw(width, height, data).ok_or_else(too_short)?,
        ),
        3 => DynamicImage::ImageRgb8(
            ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, data).ok_or_else(too_short)?,
        ),
        4 => DynamicImage::ImageRgba8(
            ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, data).ok_or_else(too_short)?,
        ),
        n => {
            return Err(EngineError::malformed_image(format!(
                "unsupported channel count {n} (expected 1-4)"
            )))
        }
    };
    Ok(image)
}
