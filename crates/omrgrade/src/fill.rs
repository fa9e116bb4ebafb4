//! Fill estimation strategies.
//!
//! A [`FillEstimator`] turns one option region of the normalized image into a
//! fill ratio in `[0, 1]`. Estimators sample every pixel whose center lies
//! inside the region, in raster order, so ratios are exactly reproducible.

use image::GrayImage;
use rayon::prelude::*;

use crate::error::{EngineError, EngineResult};
use crate::locator::{LocatedQuestion, PixelRegion};

/// Fill estimation method.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum FillMethod {
    /// Dark-pixel ratio over the whole region.
    #[default]
    DarkRatio,
    /// Dark-pixel ratio over the region shrunk by `inset` (fraction of the
    /// extent removed from each side), ignoring the printed outline.
    CoreRatio { inset: f32 },
}

/// Fill estimator controls.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FillConfig {
    pub method: FillMethod,
    /// Pixels with intensity strictly below this count as dark.
    pub dark_cutoff: u8,
}

impl Default for FillConfig {
    fn default() -> Self {
        Self {
            method: FillMethod::DarkRatio,
            dark_cutoff: 128,
        }
    }
}

impl FillConfig {
    pub(crate) fn validate(&self) -> EngineResult<()> {
        if let FillMethod::CoreRatio { inset } = self.method {
            if !(0.0..0.5).contains(&inset) {
                return Err(EngineError::invalid_config(format!(
                    "core_ratio inset must be in [0, 0.5) (got {inset})"
                )));
            }
        }
        if self.dark_cutoff == 0 {
            return Err(EngineError::invalid_config("dark_cutoff must be > 0"));
        }
        Ok(())
    }
}

/// Strategy for turning a region into a fill ratio.
pub trait FillEstimator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fill ratio of `region` in `image`, in `[0, 1]`.
    fn estimate(&self, image: &GrayImage, region: &PixelRegion) -> f32;
}

/// Ratio of dark pixel centers inside `region`. Pixels outside the image are
/// not sampled; an empty sample yields `0.0`.
fn dark_ratio(image: &GrayImage, region: &PixelRegion, cutoff: u8) -> f32 {
    let (w, h) = image.dimensions();
    let [x0, y0, x1, y1] = region.bounds;
    let xs = (x0.floor().max(0.0) as u32)..(x1.ceil().max(0.0) as u32).min(w);
    let ys = (y0.floor().max(0.0) as u32)..(y1.ceil().max(0.0) as u32).min(h);

    let mut total = 0u32;
    let mut dark = 0u32;
    for y in ys {
        let py = y as f32 + 0.5;
        for x in xs.clone() {
            if !region.contains(x as f32 + 0.5, py) {
                continue;
            }
            total += 1;
            if image.get_pixel(x, y)[0] < cutoff {
                dark += 1;
            }
        }
    }
    if total == 0 {
        0.0
    } else {
        dark as f32 / total as f32
    }
}

/// Whole-region dark-pixel ratio.
#[derive(Debug, Clone, Copy)]
pub struct DarkRatioEstimator {
    pub dark_cutoff: u8,
}

impl FillEstimator for DarkRatioEstimator {
    fn name(&self) -> &'static str {
        "dark_ratio"
    }

    fn estimate(&self, image: &GrayImage, region: &PixelRegion) -> f32 {
        dark_ratio(image, region, self.dark_cutoff)
    }
}

/// Dark-pixel ratio of the region interior.
#[derive(Debug, Clone, Copy)]
pub struct CoreRatioEstimator {
    pub dark_cutoff: u8,
    pub inset: f32,
}

impl FillEstimator for CoreRatioEstimator {
    fn name(&self) -> &'static str {
        "core_ratio"
    }

    fn estimate(&self, image: &GrayImage, region: &PixelRegion) -> f32 {
        dark_ratio(image, &region.inset(self.inset), self.dark_cutoff)
    }
}

/// Build the estimator selected by `cfg`.
pub fn estimator_for(cfg: &FillConfig) -> Box<dyn FillEstimator> {
    match cfg.method {
        FillMethod::DarkRatio => Box::new(DarkRatioEstimator {
            dark_cutoff: cfg.dark_cutoff,
        }),
        FillMethod::CoreRatio { inset } => Box::new(CoreRatioEstimator {
            dark_cutoff: cfg.dark_cutoff,
            inset,
        }),
    }
}

/// Fill ratio of one option, with the region it was sampled from.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FillMeasurement {
    pub option: String,
    pub ratio: f32,
    pub region: PixelRegion,
}

/// Measure every option of every question. Out-of-bounds questions get an
/// empty vector. Output order follows `questions`.
pub(crate) fn measure(
    image: &GrayImage,
    questions: &[LocatedQuestion],
    estimator: &dyn FillEstimator,
) -> Vec<Vec<FillMeasurement>> {
    questions
        .par_iter()
        .map(|q| {
            if q.out_of_bounds {
                return Vec::new();
            }
            q.options
                .iter()
                .map(|o| FillMeasurement {
                    option: o.letter.clone(),
                    ratio: estimator.estimate(image, &o.region),
                    region: o.region,
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet_layout::BubbleShape;
    use approx::assert_abs_diff_eq;
    use image::Luma;

    fn rect(x0: f32, y0: f32, x1: f32, y1: f32) -> PixelRegion {
        PixelRegion {
            shape: BubbleShape::Rect,
            bounds: [x0, y0, x1, y1],
        }
    }

    #[test]
    fn half_filled_rect_reads_half() {
        let img = GrayImage::from_fn(20, 20, |x, _| Luma([if x < 10 { 0 } else { 255 }]));
        let est = DarkRatioEstimator { dark_cutoff: 128 };
        assert_abs_diff_eq!(est.estimate(&img, &rect(5.0, 0.0, 15.0, 10.0)), 0.5);
    }

    #[test]
    fn core_ratio_ignores_outline() {
        // 20x20 box with a 2 px dark outline and an empty interior.
        let img = GrayImage::from_fn(20, 20, |x, y| {
            let edge = x < 2 || y < 2 || x >= 18 || y >= 18;
            Luma([if edge { 0 } else { 255 }])
        });
        let region = rect(0.0, 0.0, 20.0, 20.0);
        let whole = DarkRatioEstimator { dark_cutoff: 128 }.estimate(&img, &region);
        let core = CoreRatioEstimator {
            dark_cutoff: 128,
            inset: 0.15,
        }
        .estimate(&img, &region);
        assert!(whole > 0.3);
        assert_abs_diff_eq!(core, 0.0);
    }

    #[test]
    fn empty_region_reads_zero() {
        let img = GrayImage::from_pixel(10, 10, Luma([0]));
        let est = DarkRatioEstimator { dark_cutoff: 128 };
        assert_eq!(est.estimate(&img, &rect(3.2, 3.2, 3.4, 3.4)), 0.0);
    }

    #[test]
    fn estimator_selection_follows_config() {
        let cfg = FillConfig {
            method: FillMethod::CoreRatio { inset: 0.2 },
            ..FillConfig::default()
        };
        assert_eq!(estimator_for(&cfg).name(), "core_ratio");
        assert_eq!(estimator_for(&FillConfig::default()).name(), "dark_ratio");
    }

    #[test]
    fn method_serializes_with_tag() {
        let json = serde_json::to_string(&FillMethod::CoreRatio { inset: 0.25 }).expect("json");
        assert_eq!(json, r#"{"method":"core_ratio","inset":0.25}"#);
        let back: FillConfig = serde_json::from_str(r#"{"method":{"method":"dark_ratio"}}"#)
            .expect("config");
        assert_eq!(back.method, FillMethod::DarkRatio);
        assert_eq!(back.dark_cutoff, 128);
    }

    #[test]
    fn invalid_inset_is_rejected() {
        let cfg = FillConfig {
            method: FillMethod::CoreRatio { inset: 0.6 },
            ..FillConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
