//! Speckle removal by morphological opening of the ink layer.

use image::GrayImage;
use imageproc::distance_transform::Norm;

/// Open (erode, then dilate) the ink foreground with an L∞ window of
/// `radius`, deleting isolated specks and hairlines thinner than
/// `2 * radius + 1` pixels. `radius == 0` is a no-op.
pub(crate) fn remove_speckles(binary: &GrayImage, radius: u8) -> GrayImage {
    if radius == 0 {
        return binary.clone();
    }
    // imageproc treats non-zero pixels as foreground; ink is dark.
    let mut ink = binary.clone();
    image::imageops::invert(&mut ink);
    let mut opened = imageproc::morphology::open(&ink, Norm::LInf, radius);
    image::imageops::invert(&mut opened);
    opened
}
