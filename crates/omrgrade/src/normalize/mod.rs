//! Image normalization: luminance, adaptive threshold, speckle removal, deskew.
//!
//! The output is a binary pixel field (ink = 0, paper = 255) with the same
//! dimensions as the input, ready for fill measurement.

mod deskew;
mod grayscale;
mod morphology;
pub(crate) mod threshold;

use image::{DynamicImage, GrayImage};

pub use deskew::{DeskewConfig, DeskewOutcome};

use crate::error::{EngineError, EngineResult};
use crate::sheet_layout::SheetLayout;

/// Normalizer controls.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Side of the local-mean window (odd, pixels).
    pub window_size: u32,
    /// Amount a pixel must be darker than its local mean to count as ink.
    pub bias: u8,
    /// Pixels at or below this intensity are always ink.
    pub ink_floor: u8,
    /// Raise `ink_floor` per sheet to the Otsu split of its histogram.
    pub auto_ink_floor: bool,
    /// Minimum gap between the ink and paper class means for the Otsu split
    /// to be trusted.
    pub min_ink_contrast: u8,
    /// Opening radius for speckle removal (0 disables).
    pub open_radius: u8,
    /// Images with a side shorter than this are rejected as malformed.
    pub min_image_side_px: u32,
    pub deskew: DeskewConfig,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            window_size: 15,
            bias: 10,
            ink_floor: 96,
            auto_ink_floor: true,
            min_ink_contrast: 64,
            open_radius: 1,
            min_image_side_px: 16,
            deskew: DeskewConfig::default(),
        }
    }
}

impl NormalizeConfig {
    pub(crate) fn validate(&self) -> EngineResult<()> {
        if self.window_size < 3 || self.window_size % 2 == 0 {
            return Err(EngineError::invalid_config(format!(
                "window_size must be odd and >= 3 (got {})",
                self.window_size
            )));
        }
        let d = &self.deskew;
        if !(d.search_radius_factor > 0.0 && d.min_marker_fill > 0.0)
            || d.max_marker_fill < d.min_marker_fill
        {
            return Err(EngineError::invalid_config(
                "deskew search_radius_factor and min_marker_fill must be > 0, max_marker_fill >= min_marker_fill",
            ));
        }
        Ok(())
    }
}

/// An answer-sheet image as supplied by the caller.
#[derive(Debug, Clone)]
pub struct SheetImage {
    image: DynamicImage,
}

impl SheetImage {
    /// Decode an encoded image (PNG, JPEG, TIFF, BMP).
    pub fn from_bytes(bytes: &[u8]) -> EngineResult<Self> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| EngineError::malformed_image(format!("cannot decode image: {e}")))?;
        Ok(Self { image })
    }

    /// Wrap an interleaved pixel buffer with 1-4 channels.
    pub fn from_raw(width: u32, height: u32, channels: u8, data: Vec<u8>) -> EngineResult<Self> {
        Ok(Self {
            image: grayscale::image_from_raw(width, height, channels, data)?,
        })
    }

    /// Image dimensions `(width, height)`.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    pub(crate) fn luminance(&self) -> GrayImage {
        grayscale::to_luminance(&self.image)
    }
}

impl From<DynamicImage> for SheetImage {
    fn from(image: DynamicImage) -> Self {
        Self { image }
    }
}

impl From<GrayImage> for SheetImage {
    fn from(gray: GrayImage) -> Self {
        Self {
            image: DynamicImage::ImageLuma8(gray),
        }
    }
}

/// Output of the normalizer.
#[derive(Debug, Clone)]
pub(crate) struct NormalizedSheet {
    pub(crate) binary: GrayImage,
    pub(crate) deskew: DeskewOutcome,
}

/// Reject images too small to hold a sheet.
pub(crate) fn check_dimensions(gray: &GrayImage, cfg: &NormalizeConfig) -> EngineResult<()> {
    let (w, h) = gray.dimensions();
    if w < cfg.min_image_side_px || h < cfg.min_image_side_px {
        return Err(EngineError::malformed_image(format!(
            "implausible dimensions {w}x{h} (minimum side {} px)",
            cfg.min_image_side_px
        )));
    }
    Ok(())
}

/// Threshold, despeckle and (when the layout declares markers) deskew.
pub(crate) fn normalize(
    gray: &GrayImage,
    layout: &SheetLayout,
    cfg: &NormalizeConfig,
) -> EngineResult<NormalizedSheet> {
    check_dimensions(gray, cfg)?;

    let ink_floor = if cfg.auto_ink_floor {
        threshold::sheet_ink_floor(gray, cfg.ink_floor, cfg.min_ink_contrast)
    } else {
        cfg.ink_floor
    };
    let binary = threshold::adaptive_threshold(gray, cfg.window_size, cfg.bias, ink_floor);
    let binary = morphology::remove_speckles(&binary, cfg.open_radius);
    let (deskewed, outcome) = deskew::deskew(&binary, layout, &cfg.deskew);

    Ok(NormalizedSheet {
        binary: deskewed.unwrap_or(binary),
        deskew: outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::grid_layout;

    #[test]
    fn rejects_near_zero_dimensions() {
        let gray = GrayImage::new(4, 300);
        let layout = grid_layout(5, 4);
        let err = normalize(&gray, &layout, &NormalizeConfig::default()).expect_err("tiny");
        assert!(matches!(err, EngineError::MalformedImage { .. }));
    }

    #[test]
    fn undecodable_bytes_are_malformed() {
        let err = SheetImage::from_bytes(b"not an image").expect_err("garbage");
        assert!(matches!(err, EngineError::MalformedImage { .. }));
    }

    #[test]
    fn even_window_is_rejected() {
        let cfg = NormalizeConfig {
            window_size: 14,
            ..NormalizeConfig::default()
        };
        assert!(cfg.validate().is_err());
        assert!(NormalizeConfig::default().validate().is_ok());
    }
}
