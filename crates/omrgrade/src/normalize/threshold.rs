//! Adaptive local-mean thresholding over a summed-area table.

use image::GrayImage;
use imageproc::contrast::otsu_level;
use imageproc::stats::histogram;
use rayon::prelude::*;

pub(crate) const INK: u8 = 0;
pub(crate) const PAPER: u8 = 255;

/// Summed-area table with a zero row/column prefix: `sat[(y+1)*(w+1) + (x+1)]`
/// holds the sum over `[0..=x] × [0..=y]`.
fn summed_area_table(gray: &GrayImage) -> Vec<u64> {
    let (w, h) = gray.dimensions();
    let (w, h) = (w as usize, h as usize);
    let stride = w + 1;
    let mut sat = vec![0u64; stride * (h + 1)];
    let raw = gray.as_raw();
    for y in 0..h {
        let mut row_sum = 0u64;
        for x in 0..w {
            row_sum += raw[y * w + x] as u64;
            sat[(y + 1) * stride + x + 1] = sat[y * stride + x + 1] + row_sum;
        }
    }
    sat
}

/// Per-sheet ink floor.
///
/// Splits the luminance histogram at the Otsu level and, when the two
/// classes are at least `min_contrast` apart, raises `base` to that level so
/// evenly shaded marks lighter than `base` keep their interior. Returns
/// `base` for sheets without a clear ink class.
pub(crate) fn sheet_ink_floor(gray: &GrayImage, base: u8, min_contrast: u8) -> u8 {
    let level = otsu_level(gray);
    let hist = &histogram(gray).channels[0];

    let class_mean = |range: std::ops::RangeInclusive<usize>| -> Option<f64> {
        let (n, sum) = range.fold((0u64, 0u64), |(n, sum), v| {
            (n + hist[v] as u64, sum + hist[v] as u64 * v as u64)
        });
        (n > 0).then(|| sum as f64 / n as f64)
    };
    let (Some(ink), Some(paper)) = (
        class_mean(0..=level as usize),
        class_mean(level as usize + 1..=255),
    ) else {
        return base;
    };

    if paper - ink < min_contrast as f64 {
        return base;
    }
    let floor = base.max(level);
    if floor > base {
        tracing::debug!(otsu = level, ink_mean = ink, paper_mean = paper, "raised ink floor");
    }
    floor
}

/// Binarize `gray` against its local neighborhood mean.
///
/// A pixel becomes ink when it is darker than the mean of the clipped
/// `window × window` neighborhood minus `bias`, or darker than `ink_floor`
/// regardless of its neighborhood (solid marks wider than the window).
/// Output pixels are [`INK`] or [`PAPER`].
pub(crate) fn adaptive_threshold(gray: &GrayImage, window: u32, bias: u8, ink_floor: u8) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return gray.clone();
    }
    let sat = summed_area_table(gray);
    let stride = w as usize + 1;
    let r = (window / 2) as usize;
    let (wu, hu) = (w as usize, h as usize);
    let raw = gray.as_raw();
    let bias = bias as i64;

    let mut out = vec![PAPER; wu * hu];
    out.par_chunks_mut(wu).enumerate().for_each(|(y, row)| {
        let y0 = y.saturating_sub(r);
        let y1 = (y + r).min(hu - 1);
        for (x, dst) in row.iter_mut().enumerate() {
            let v = raw[y * wu + x];
            if v <= ink_floor {
                *dst = INK;
                continue;
            }
            let x0 = x.saturating_sub(r);
            let x1 = (x + r).min(wu - 1);
            let sum = sat[(y1 + 1) * stride + x1 + 1] + sat[y0 * stride + x0]
                - sat[y0 * stride + x1 + 1]
                - sat[(y1 + 1) * stride + x0];
            let count = ((x1 - x0 + 1) * (y1 - y0 + 1)) as i64;
            // v < mean - bias, kept in integers
            if (v as i64 + bias) * count < sum as i64 {
                *dst = INK;
            }
        }
    });

    GrayImage::from_raw(w, h, out).unwrap_or_else(|| GrayImage::new(w, h))
}
