//! Shared test utilities: synthetic sheets and fake decision sources.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use image::{GrayImage, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::classify::{ClassifierThresholds, QuestionClassification};
use crate::fill::FillMeasurement;
use crate::locator::PixelRegion;
use crate::resolve::{
    AmbiguityResolver, AmbiguousQuestion, ResolverError, SecondaryDecision, Verdict,
};
use crate::sheet_layout::{
    option_letter, AlignmentMarker, BubbleShape, OptionRegion, QuestionSlot, SheetLayout,
};

const PAPER: u8 = 255;
const PEN: u8 = 40;

fn rect_option(index: usize, center: [f32; 2]) -> OptionRegion {
    OptionRegion {
        letter: option_letter(index).expect("letter"),
        shape: BubbleShape::Rect,
        center,
        size: [20.0, 20.0],
    }
}

/// Rectangular 20×20 bubbles on a 40-unit grid; one layout unit per pixel.
pub(crate) fn grid_layout(n_questions: usize, n_options: usize) -> SheetLayout {
    let questions = (0..n_questions)
        .map(|q| QuestionSlot {
            number: q as u32 + 1,
            options: (0..n_options)
                .map(|o| rect_option(o, [60.0 + 40.0 * o as f32, 40.0 + 40.0 * q as f32]))
                .collect(),
        })
        .collect();
    let page = [
        (80.0 + 40.0 * n_options as f32).max(200.0),
        (40.0 + 40.0 * n_questions as f32).max(100.0),
    ];
    SheetLayout::new("test_grid", page, questions, Vec::new()).expect("grid layout")
}

/// Five 4-option questions with square alignment markers in the corners.
pub(crate) fn marker_layout() -> SheetLayout {
    let questions = (0..5)
        .map(|q| QuestionSlot {
            number: q as u32 + 1,
            options: (0..4)
                .map(|o| rect_option(o, [100.0 + 40.0 * o as f32, 100.0 + 50.0 * q as f32]))
                .collect(),
        })
        .collect();
    let markers = [[30.0, 30.0], [270.0, 30.0], [270.0, 370.0], [30.0, 370.0]]
        .into_iter()
        .map(|center| AlignmentMarker { center, size: 20.0 })
        .collect();
    SheetLayout::new("test_markers", [300.0, 400.0], questions, markers).expect("marker layout")
}

/// Fill the axis-aligned square of side `size` around `center`.
pub(crate) fn draw_square(img: &mut GrayImage, center: [f32; 2], size: f32, value: u8) {
    let (w, h) = img.dimensions();
    let half = size * 0.5;
    let x0 = (center[0] - half).round().max(0.0) as u32;
    let y0 = (center[1] - half).round().max(0.0) as u32;
    let x1 = ((center[0] + half).round().max(0.0) as u32).min(w);
    let y1 = ((center[1] + half).round().max(0.0) as u32).min(h);
    for y in y0..y1 {
        for x in x0..x1 {
            img.put_pixel(x, y, Luma([value]));
        }
    }
}

/// Render a sheet at one pixel per layout unit.
///
/// `marks[q][o]` is the fraction of option `o` of question `q` inked, filled
/// from the top row down. Missing entries are left blank. Alignment markers
/// are drawn solid.
pub(crate) fn render_sheet(layout: &SheetLayout, marks: &[Vec<f32>]) -> GrayImage {
    render_shaded_sheet(layout, marks, PAPER, PEN)
}

/// [`render_sheet`] with explicit paper and pen intensities.
pub(crate) fn render_shaded_sheet(
    layout: &SheetLayout,
    marks: &[Vec<f32>],
    paper: u8,
    pen: u8,
) -> GrayImage {
    let w = layout.page_size[0].ceil() as u32;
    let h = layout.page_size[1].ceil() as u32;
    let mut img = GrayImage::from_pixel(w, h, Luma([paper]));

    for m in &layout.alignment_markers {
        draw_square(&mut img, m.center, m.size, pen);
    }

    for (q, slot) in layout.questions.iter().enumerate() {
        for (o, option) in slot.options.iter().enumerate() {
            let frac = marks.get(q).and_then(|r| r.get(o)).copied().unwrap_or(0.0);
            if frac <= 0.0 {
                continue;
            }
            let region = PixelRegion {
                shape: option.shape,
                bounds: option.bounds(),
            };
            let [x0, y0, x1, y1] = region.bounds;
            let rows = y1.ceil() - y0.floor();
            let last = y0.floor() as u32 + (frac * rows).round() as u32;
            for y in y0.floor() as u32..last.min(h) {
                for x in x0.floor() as u32..(x1.ceil() as u32).min(w) {
                    if region.contains(x as f32 + 0.5, y as f32 + 0.5) {
                        img.put_pixel(x, y, Luma([pen]));
                    }
                }
            }
        }
    }
    img
}

/// Rotate `img` by `deg` (clockwise on screen) about its center; nearest
/// neighbour, white fill.
pub(crate) fn rotate_about_center(img: &GrayImage, deg: f64) -> GrayImage {
    let (w, h) = img.dimensions();
    let (s, c) = deg.to_radians().sin_cos();
    let (cx, cy) = (w as f64 * 0.5, h as f64 * 0.5);
    GrayImage::from_fn(w, h, |x, y| {
        let dx = x as f64 + 0.5 - cx;
        let dy = y as f64 + 0.5 - cy;
        let sx = c * dx + s * dy + cx;
        let sy = -s * dx + c * dy + cy;
        if sx < 0.0 || sy < 0.0 || sx >= w as f64 || sy >= h as f64 {
            Luma([PAPER])
        } else {
            *img.get_pixel(sx as u32, sy as u32)
        }
    })
}

/// Darken `count` isolated pixels at seeded random positions.
pub(crate) fn speckle(img: &mut GrayImage, count: usize, seed: u64) {
    let (w, h) = img.dimensions();
    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..count {
        let x = rng.gen_range(0..w);
        let y = rng.gen_range(0..h);
        img.put_pixel(x, y, Luma([rng.gen_range(0..80)]));
    }
}

/// Fill measurements with positional letters and dummy regions.
pub(crate) fn fills(ratios: &[f32]) -> Vec<FillMeasurement> {
    ratios
        .iter()
        .enumerate()
        .map(|(i, &ratio)| FillMeasurement {
            option: option_letter(i).expect("letter"),
            ratio,
            region: PixelRegion {
                shape: BubbleShape::Rect,
                bounds: [i as f32 * 30.0, 0.0, i as f32 * 30.0 + 20.0, 20.0],
            },
        })
        .collect()
}

/// Classification under default thresholds.
pub(crate) fn classification(number: u32, ratios: &[f32]) -> QuestionClassification {
    QuestionClassification::from_fills(number, fills(ratios), false, &ClassifierThresholds::default())
}

/// Always fails with `Unavailable`.
#[derive(Default)]
pub(crate) struct FailingResolver {
    calls: AtomicUsize,
}

impl FailingResolver {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AmbiguityResolver for FailingResolver {
    fn name(&self) -> &str {
        "failing"
    }

    fn resolve_ambiguous(
        &self,
        _batch: &[AmbiguousQuestion],
    ) -> Result<Vec<SecondaryDecision>, ResolverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ResolverError::Unavailable("service down".to_string()))
    }
}

/// Answers from a fixed script; questions without a script entry get no
/// decision.
pub(crate) struct ScriptedResolver {
    name: String,
    script: HashMap<u32, (Verdict, f32)>,
    seen: Mutex<Vec<u32>>,
}

impl ScriptedResolver {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: HashMap::new(),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with(mut self, question: u32, verdict: Verdict, confidence: f32) -> Self {
        self.script.insert(question, (verdict, confidence));
        self
    }

    /// Questions submitted so far, in submission order.
    pub(crate) fn seen_questions(&self) -> Vec<u32> {
        self.seen.lock().expect("seen lock").clone()
    }
}

impl AmbiguityResolver for ScriptedResolver {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve_ambiguous(
        &self,
        batch: &[AmbiguousQuestion],
    ) -> Result<Vec<SecondaryDecision>, ResolverError> {
        self.seen
            .lock()
            .expect("seen lock")
            .extend(batch.iter().map(|q| q.question));
        Ok(batch
            .iter()
            .filter_map(|q| {
                self.script
                    .get(&q.question)
                    .map(|(verdict, confidence)| SecondaryDecision {
                        question: q.question,
                        verdict: verdict.clone(),
                        confidence: *confidence,
                    })
            })
            .collect())
    }
}

/// Blocks for `delay` before answering nothing.
pub(crate) struct HangingResolver {
    delay: Duration,
}

impl HangingResolver {
    pub(crate) fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl AmbiguityResolver for HangingResolver {
    fn name(&self) -> &str {
        "hanging"
    }

    fn resolve_ambiguous(
        &self,
        _batch: &[AmbiguousQuestion],
    ) -> Result<Vec<SecondaryDecision>, ResolverError> {
        std::thread::sleep(self.delay);
        Ok(Vec::new())
    }
}

/// Records batch sizes and judges everything BLANK.
#[derive(Default)]
pub(crate) struct CountingResolver {
    sizes: Mutex<Vec<usize>>,
}

impl CountingResolver {
    pub(crate) fn calls(&self) -> usize {
        self.sizes.lock().expect("sizes lock").len()
    }

    pub(crate) fn batch_sizes(&self) -> Vec<usize> {
        self.sizes.lock().expect("sizes lock").clone()
    }
}

impl AmbiguityResolver for CountingResolver {
    fn name(&self) -> &str {
        "counting"
    }

    fn resolve_ambiguous(
        &self,
        batch: &[AmbiguousQuestion],
    ) -> Result<Vec<SecondaryDecision>, ResolverError> {
        self.sizes.lock().expect("sizes lock").push(batch.len());
        Ok(batch
            .iter()
            .map(|q| SecondaryDecision {
                question: q.question,
                verdict: Verdict::Blank,
                confidence: 1.0,
            })
            .collect())
    }
}
