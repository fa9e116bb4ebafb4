//! Bubble locator: maps layout option regions onto image pixels.

use crate::error::Diagnostic;
use crate::sheet_layout::{BubbleShape, SheetLayout};

/// An option region in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PixelRegion {
    pub shape: BubbleShape,
    /// Bounds `[x0, y0, x1, y1]` in pixels (continuous coordinates).
    pub bounds: [f32; 4],
}

impl PixelRegion {
    /// Region center `(x, y)`.
    pub fn center(&self) -> [f32; 2] {
        [
            0.5 * (self.bounds[0] + self.bounds[2]),
            0.5 * (self.bounds[1] + self.bounds[3]),
        ]
    }

    /// Same region shrunk towards its center by `frac` of its extent on
    /// each side.
    pub fn inset(&self, frac: f32) -> Self {
        let [x0, y0, x1, y1] = self.bounds;
        let dx = (x1 - x0) * frac;
        let dy = (y1 - y0) * frac;
        Self {
            shape: self.shape,
            bounds: [x0 + dx, y0 + dy, x1 - dx, y1 - dy],
        }
    }

    /// Whether the pixel center `(px, py)` lies inside the region.
    #[inline]
    pub fn contains(&self, px: f32, py: f32) -> bool {
        let [x0, y0, x1, y1] = self.bounds;
        match self.shape {
            BubbleShape::Rect => px >= x0 && px < x1 && py >= y0 && py < y1,
            BubbleShape::Ellipse => {
                let rx = 0.5 * (x1 - x0);
                let ry = 0.5 * (y1 - y0);
                if rx <= 0.0 || ry <= 0.0 {
                    return false;
                }
                let [cx, cy] = self.center();
                let nx = (px - cx) / rx;
                let ny = (py - cy) / ry;
                nx * nx + ny * ny <= 1.0
            }
        }
    }

    fn within(&self, width: u32, height: u32) -> bool {
        let [x0, y0, x1, y1] = self.bounds;
        x0 >= 0.0 && y0 >= 0.0 && x1 <= width as f32 && y1 <= height as f32
    }
}

/// An option of a located question.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LocatedOption {
    pub letter: String,
    pub region: PixelRegion,
}

/// A question with its option regions in image space.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LocatedQuestion {
    pub number: u32,
    /// Options in positional order.
    pub options: Vec<LocatedOption>,
    /// At least one option region falls outside the image.
    pub out_of_bounds: bool,
}

/// Scale every layout region into an image of `image_size` pixels.
///
/// Questions with a region outside the image are kept (flagged
/// `out_of_bounds`) and reported as [`Diagnostic::RegionOutOfBounds`].
pub(crate) fn locate(
    layout: &SheetLayout,
    image_size: (u32, u32),
) -> (Vec<LocatedQuestion>, Vec<Diagnostic>) {
    let (w, h) = image_size;
    let sx = w as f32 / layout.page_size[0];
    let sy = h as f32 / layout.page_size[1];

    let mut diagnostics = Vec::new();
    let questions = layout
        .questions
        .iter()
        .map(|q| {
            let options: Vec<LocatedOption> = q
                .options
                .iter()
                .map(|o| {
                    let [x0, y0, x1, y1] = o.bounds();
                    LocatedOption {
                        letter: o.letter.clone(),
                        region: PixelRegion {
                            shape: o.shape,
                            bounds: [x0 * sx, y0 * sy, x1 * sx, y1 * sy],
                        },
                    }
                })
                .collect();

            let outside: Vec<&LocatedOption> =
                options.iter().filter(|o| !o.region.within(w, h)).collect();
            for o in &outside {
                tracing::warn!(
                    question = q.number,
                    option = %o.letter,
                    "option region outside image, question graded blank"
                );
                diagnostics.push(Diagnostic::RegionOutOfBounds {
                    question: q.number,
                    option: o.letter.clone(),
                });
            }

            LocatedQuestion {
                number: q.number,
                out_of_bounds: !outside.is_empty(),
                options,
            }
        })
        .collect();

    (questions, diagnostics)
}
