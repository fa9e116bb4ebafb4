//! Alignment-marker deskew.
//!
//! Each alignment marker declared by the layout is searched for in a window
//! around its expected position; the ink centroid becomes the observed
//! center. With at least four observations a layout→image affine transform
//! is fitted and the binary image is resampled into the layout frame. Any
//! doubt about the fit leaves the image untouched.

use image::GrayImage;
use rayon::prelude::*;

use super::threshold::{INK, PAPER};
use crate::affine::SheetAffine;
use crate::sheet_layout::{AlignmentMarker, SheetLayout};

/// Deskew controls.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DeskewConfig {
    /// Run deskew when the layout declares alignment markers.
    pub enable: bool,
    /// Search half-extent around each expected marker, in marker sizes.
    pub search_radius_factor: f32,
    /// Minimum ink in the search window, as a fraction of the nominal marker area.
    pub min_marker_fill: f32,
    /// Maximum ink in the search window, as a multiple of the nominal marker area.
    pub max_marker_fill: f32,
    /// Rotations below this (with sub-pixel offsets) are treated as aligned.
    pub min_angle_deg: f64,
    /// Rotations above this are not trusted.
    pub max_angle_deg: f64,
    /// Maximum mean residual of the marker fit (pixels).
    pub max_residual_px: f64,
}

impl Default for DeskewConfig {
    fn default() -> Self {
        Self {
            enable: true,
            search_radius_factor: 1.5,
            min_marker_fill: 0.5,
            max_marker_fill: 2.5,
            min_angle_deg: 0.05,
            max_angle_deg: 15.0,
            max_residual_px: 2.0,
        }
    }
}

/// What the deskew stage did to the sheet.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeskewOutcome {
    /// Disabled, or the layout has no alignment markers.
    NotRequested,
    /// Markers found where expected; no resampling needed.
    Aligned,
    /// Image resampled into the layout frame.
    Applied { angle_deg: f64, residual_px: f64 },
    /// Markers declared but the correction was not trusted; image unchanged.
    Skipped { reason: String },
}

fn locate_marker(
    binary: &GrayImage,
    expected: [f64; 2],
    size_px: [f64; 2],
    cfg: &DeskewConfig,
) -> Option<[f64; 2]> {
    let (w, h) = binary.dimensions();
    let rx = size_px[0] * cfg.search_radius_factor as f64;
    let ry = size_px[1] * cfg.search_radius_factor as f64;
    let x0 = (expected[0] - rx).floor().max(0.0) as u32;
    let y0 = (expected[1] - ry).floor().max(0.0) as u32;
    let x1 = ((expected[0] + rx).ceil().max(0.0) as u32).min(w);
    let y1 = ((expected[1] + ry).ceil().max(0.0) as u32).min(h);

    let mut n = 0u64;
    let mut sx = 0.0f64;
    let mut sy = 0.0f64;
    for y in y0..y1 {
        for x in x0..x1 {
            if binary.get_pixel(x, y)[0] == INK {
                n += 1;
                sx += x as f64 + 0.5;
                sy += y as f64 + 0.5;
            }
        }
    }

    let nominal_area = size_px[0] * size_px[1];
    let n = n as f64;
    if n < nominal_area * cfg.min_marker_fill as f64 || n > nominal_area * cfg.max_marker_fill as f64 {
        return None;
    }
    Some([sx / n, sy / n])
}

fn resample(binary: &GrayImage, fit: &SheetAffine) -> GrayImage {
    let (w, ht) = binary.dimensions();
    let wu = w as usize;
    let mut out = vec![PAPER; wu * ht as usize];
    out.par_chunks_mut(wu).enumerate().for_each(|(y, row)| {
        for (x, dst) in row.iter_mut().enumerate() {
            let [u, v] = fit.apply(x as f64 + 0.5, y as f64 + 0.5);
            if !(u.is_finite() && v.is_finite()) || u < 0.0 || v < 0.0 {
                continue;
            }
            let (ui, vi) = (u.floor() as u32, v.floor() as u32);
            if ui < w && vi < ht {
                *dst = binary.get_pixel(ui, vi)[0];
            }
        }
    });
    GrayImage::from_raw(w, ht, out).unwrap_or_else(|| binary.clone())
}

/// Deskew `binary` against the layout's alignment markers.
///
/// Returns the resampled image when a correction was applied.
pub(crate) fn deskew(
    binary: &GrayImage,
    layout: &SheetLayout,
    cfg: &DeskewConfig,
) -> (Option<GrayImage>, DeskewOutcome) {
    if !cfg.enable || layout.alignment_markers.is_empty() {
        return (None, DeskewOutcome::NotRequested);
    }
    let skipped = |reason: String| (None, DeskewOutcome::Skipped { reason });

    let (w, h) = binary.dimensions();
    let scale = [
        w as f64 / layout.page_size[0] as f64,
        h as f64 / layout.page_size[1] as f64,
    ];

    let mut src = Vec::new();
    let mut dst = Vec::new();
    for AlignmentMarker { center, size } in &layout.alignment_markers {
        let expected = [center[0] as f64 * scale[0], center[1] as f64 * scale[1]];
        let size_px = [*size as f64 * scale[0], *size as f64 * scale[1]];
        if let Some(observed) = locate_marker(binary, expected, size_px, cfg) {
            src.push(expected);
            dst.push(observed);
        }
    }

    if src.len() < 4 {
        return skipped(format!(
            "found {} of {} alignment markers (need 4)",
            src.len(),
            layout.alignment_markers.len()
        ));
    }

    let fit = match SheetAffine::fit(&src, &dst) {
        Ok(fit) => fit,
        Err(e) => return skipped(format!("marker fit failed: {e}")),
    };

    let residual = fit.mean_residual(&src, &dst);
    if !residual.is_finite() || residual > cfg.max_residual_px {
        return skipped(format!(
            "marker fit residual {residual:.2}px exceeds {:.2}px",
            cfg.max_residual_px
        ));
    }

    let angle = fit.rotation_deg();
    if angle.abs() > cfg.max_angle_deg {
        return skipped(format!(
            "rotation {angle:.2}° exceeds {:.2}°",
            cfg.max_angle_deg
        ));
    }

    let max_offset = fit.max_shift(&src);
    if angle.abs() < cfg.min_angle_deg && max_offset < 1.0 {
        return (None, DeskewOutcome::Aligned);
    }

    tracing::debug!(
        angle_deg = angle,
        residual_px = residual,
        max_offset_px = max_offset,
        "resampling sheet into layout frame"
    );
    (
        Some(resample(binary, &fit)),
        DeskewOutcome::Applied {
            angle_deg: angle,
            residual_px: residual,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{draw_square, marker_layout, rotate_about_center};
    use image::Luma;

    fn sheet_with_markers(layout: &SheetLayout) -> GrayImage {
        let mut img = GrayImage::from_pixel(
            layout.page_size[0] as u32,
            layout.page_size[1] as u32,
            Luma([PAPER]),
        );
        for m in &layout.alignment_markers {
            draw_square(&mut img, m.center, m.size, INK);
        }
        img
    }

    #[test]
    fn aligned_sheet_is_left_alone() {
        let layout = marker_layout();
        let img = sheet_with_markers(&layout);
        let (out, outcome) = deskew(&img, &layout, &DeskewConfig::default());
        assert!(out.is_none());
        assert_eq!(outcome, DeskewOutcome::Aligned);
    }

    #[test]
    fn rotated_sheet_is_resampled_back() {
        let layout = marker_layout();
        let img = sheet_with_markers(&layout);
        let rotated = rotate_about_center(&img, 3.0);
        let (out, outcome) = deskew(&rotated, &layout, &DeskewConfig::default());
        let out = out.expect("resampled");
        match outcome {
            DeskewOutcome::Applied { angle_deg, .. } => assert!((angle_deg - 3.0).abs() < 0.5),
            other => panic!("unexpected outcome {other:?}"),
        }
        let m = layout.alignment_markers[0];
        assert_eq!(
            out.get_pixel(m.center[0] as u32, m.center[1] as u32)[0],
            INK
        );
    }

    #[test]
    fn missing_markers_skip_without_guessing() {
        let layout = marker_layout();
        let img = GrayImage::from_pixel(
            layout.page_size[0] as u32,
            layout.page_size[1] as u32,
            Luma([PAPER]),
        );
        let (out, outcome) = deskew(&img, &layout, &DeskewConfig::default());
        assert!(out.is_none());
        assert!(matches!(outcome, DeskewOutcome::Skipped { .. }));
    }

    #[test]
    fn displaced_marker_is_not_trusted() {
        let layout = marker_layout();
        let mut img = GrayImage::from_pixel(
            layout.page_size[0] as u32,
            layout.page_size[1] as u32,
            Luma([PAPER]),
        );
        for (i, m) in layout.alignment_markers.iter().enumerate() {
            // Third marker printed 12 px off in both axes.
            let shift = if i == 2 { -12.0 } else { 0.0 };
            draw_square(&mut img, [m.center[0] + shift, m.center[1] + shift], m.size, INK);
        }
        let (out, outcome) = deskew(&img, &layout, &DeskewConfig::default());
        assert!(out.is_none());
        match outcome {
            DeskewOutcome::Skipped { reason } => assert!(reason.contains("residual"), "{reason}"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn excessive_rotation_is_not_trusted() {
        let layout = marker_layout();
        let img = sheet_with_markers(&layout);
        let rotated = rotate_about_center(&img, 3.0);
        let cfg = DeskewConfig {
            max_angle_deg: 1.0,
            ..DeskewConfig::default()
        };
        let (out, outcome) = deskew(&rotated, &layout, &cfg);
        assert!(out.is_none());
        assert!(matches!(outcome, DeskewOutcome::Skipped { .. }));
    }
}
