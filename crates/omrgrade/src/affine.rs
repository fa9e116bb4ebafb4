//! Least-squares affine fit between declared and observed marker centers.
//!
//! Scanners and flatbed photos introduce rotation, scale, shear and offset;
//! the fit absorbs those and the deskew gate judges the residual that is
//! left. Perspective is not modelled: a strongly tilted photo leaves a large
//! residual and is not deskewed.

use nalgebra::{DMatrix, Matrix2, Vector2};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub(crate) enum FitError {
    #[error("need {needed} marker pairs, got {got}")]
    TooFewPoints { needed: usize, got: usize },
    #[error("marker positions are collinear")]
    Degenerate,
    #[error("marker lists differ in length ({expected} vs {observed})")]
    LengthMismatch { expected: usize, observed: usize },
}

/// `image = linear * layout + offset`, both sides in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SheetAffine {
    linear: Matrix2<f64>,
    offset: Vector2<f64>,
}

fn centroid(pts: &[[f64; 2]]) -> Vector2<f64> {
    let sum = pts
        .iter()
        .fold(Vector2::zeros(), |acc, p| acc + Vector2::new(p[0], p[1]));
    sum / pts.len() as f64
}

/// Points minus `c`, one row per point.
fn centered_rows(pts: &[[f64; 2]], c: &Vector2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(pts.len(), 2, |r, k| pts[r][k] - c[k])
}

impl SheetAffine {
    /// Fit `observed ≈ apply(expected)` over at least three non-collinear pairs.
    pub(crate) fn fit(expected: &[[f64; 2]], observed: &[[f64; 2]]) -> Result<Self, FitError> {
        if expected.len() != observed.len() {
            return Err(FitError::LengthMismatch {
                expected: expected.len(),
                observed: observed.len(),
            });
        }
        if expected.len() < 3 {
            return Err(FitError::TooFewPoints {
                needed: 3,
                got: expected.len(),
            });
        }

        let ce = centroid(expected);
        let co = centroid(observed);
        let x = centered_rows(expected, &ce);
        let y = centered_rows(observed, &co);

        // x * Lᵀ = y in the least-squares sense.
        let svd = x.svd(true, true);
        let sv = &svd.singular_values;
        if sv.max() <= 0.0 || sv.min() < 1e-9 * sv.max() {
            return Err(FitError::Degenerate);
        }
        let lt = svd.solve(&y, 1e-12).map_err(|_| FitError::Degenerate)?;

        let linear = Matrix2::new(lt[(0, 0)], lt[(1, 0)], lt[(0, 1)], lt[(1, 1)]);
        let offset = co - linear * ce;
        Ok(Self { linear, offset })
    }

    pub(crate) fn apply(&self, x: f64, y: f64) -> [f64; 2] {
        let p = self.linear * Vector2::new(x, y) + self.offset;
        [p[0], p[1]]
    }

    /// Mean distance between mapped `expected` points and `observed`.
    pub(crate) fn mean_residual(&self, expected: &[[f64; 2]], observed: &[[f64; 2]]) -> f64 {
        if expected.is_empty() {
            return f64::NAN;
        }
        let total: f64 = expected
            .iter()
            .zip(observed)
            .map(|(e, o)| {
                let [u, v] = self.apply(e[0], e[1]);
                (u - o[0]).hypot(v - o[1])
            })
            .sum();
        total / expected.len() as f64
    }

    /// Rotation of the closest similarity transform, in degrees
    /// (positive is clockwise on screen).
    pub(crate) fn rotation_deg(&self) -> f64 {
        let l = &self.linear;
        (l[(1, 0)] - l[(0, 1)])
            .atan2(l[(0, 0)] + l[(1, 1)])
            .to_degrees()
    }

    /// Largest displacement the fit applies to any of `pts`.
    pub(crate) fn max_shift(&self, pts: &[[f64; 2]]) -> f64 {
        pts.iter()
            .map(|p| {
                let [u, v] = self.apply(p[0], p[1]);
                (u - p[0]).hypot(v - p[1])
            })
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn corners() -> Vec<[f64; 2]> {
        vec![[30.0, 30.0], [270.0, 30.0], [270.0, 370.0], [30.0, 370.0]]
    }

    #[test]
    fn unchanged_markers_fit_identity() {
        let pts = corners();
        let t = SheetAffine::fit(&pts, &pts).expect("fit");
        assert_abs_diff_eq!(t.rotation_deg(), 0.0, epsilon = 1e-9);
        assert!(t.max_shift(&pts) < 1e-9);
        assert!(t.mean_residual(&pts, &pts) < 1e-9);
    }

    #[test]
    fn recovers_rotation_scale_and_offset() {
        let (s, c) = 2.0f64.to_radians().sin_cos();
        let k = 1.04;
        let expected = corners();
        let observed: Vec<[f64; 2]> = expected
            .iter()
            .map(|p| [k * (c * p[0] - s * p[1]) + 7.0, k * (s * p[0] + c * p[1]) - 3.0])
            .collect();
        let t = SheetAffine::fit(&expected, &observed).expect("fit");
        assert_abs_diff_eq!(t.rotation_deg(), 2.0, epsilon = 1e-6);
        assert!(t.mean_residual(&expected, &observed) < 1e-6);
        let [u, v] = t.apply(150.0, 200.0);
        assert_abs_diff_eq!(u, k * (c * 150.0 - s * 200.0) + 7.0, epsilon = 1e-6);
        assert_abs_diff_eq!(v, k * (s * 150.0 + c * 200.0) - 3.0, epsilon = 1e-6);
    }

    #[test]
    fn displaced_marker_shows_in_residual() {
        let expected = corners();
        let mut observed = expected.clone();
        observed[2] = [290.0, 395.0];
        let t = SheetAffine::fit(&expected, &observed).expect("fit");
        assert!(t.mean_residual(&expected, &observed) > 2.0);
    }

    #[test]
    fn collinear_or_sparse_markers_are_rejected() {
        let line = vec![[0.0, 0.0], [50.0, 50.0], [100.0, 100.0], [150.0, 150.0]];
        assert_eq!(SheetAffine::fit(&line, &line), Err(FitError::Degenerate));
        let two = vec![[0.0, 0.0], [10.0, 0.0]];
        assert_eq!(
            SheetAffine::fit(&two, &two),
            Err(FitError::TooFewPoints { needed: 3, got: 2 })
        );
    }
}
