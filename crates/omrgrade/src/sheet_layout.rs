//! Runtime answer-sheet layout.
//!
//! Layout JSON follows a versioned schema (`omrgrade.layout.v1`): every
//! question lists its option bubbles in layout units on a page of
//! `page_size`. Option letters are positional (first region ⇒ `A`, second ⇒
//! `B`, ...) unless a region names its letter explicitly.
//!
//! When no explicit layout is available, [`LayoutInference`] generates a
//! regular grid of questions from rows/columns/options counts.

use std::collections::HashSet;
use std::path::Path;

use crate::error::{EngineError, EngineResult};

const LAYOUT_SCHEMA_V1: &str = "omrgrade.layout.v1";
const MAX_OPTIONS: usize = 26;

/// Shape of a bubble region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BubbleShape {
    /// Ellipse inscribed in the region's bounding box.
    #[default]
    Ellipse,
    /// Axis-aligned rectangle.
    Rect,
}

/// One option bubble of a question, in layout units.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OptionRegion {
    /// Uppercase option letter.
    pub letter: String,
    pub shape: BubbleShape,
    /// Region center (x, y).
    pub center: [f32; 2],
    /// Region extent (width, height).
    pub size: [f32; 2],
}

impl OptionRegion {
    /// Axis-aligned bounds `[x0, y0, x1, y1]`.
    pub fn bounds(&self) -> [f32; 4] {
        let hw = self.size[0] * 0.5;
        let hh = self.size[1] * 0.5;
        [
            self.center[0] - hw,
            self.center[1] - hh,
            self.center[0] + hw,
            self.center[1] + hh,
        ]
    }

    fn overlaps(&self, other: &OptionRegion) -> bool {
        let a = self.bounds();
        let b = other.bounds();
        let w = a[2].min(b[2]) - a[0].max(b[0]);
        let h = a[3].min(b[3]) - a[1].max(b[1]);
        w > 0.0 && h > 0.0
    }
}

/// A question slot: its number and its ordered option regions.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QuestionSlot {
    pub number: u32,
    pub options: Vec<OptionRegion>,
}

/// A square fiducial printed on the sheet, used for deskew.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AlignmentMarker {
    pub center: [f32; 2],
    /// Side length in layout units.
    pub size: f32,
}

/// Validated sheet layout.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetLayout {
    pub name: String,
    /// Page extent (width, height) in layout units.
    pub page_size: [f32; 2],
    pub questions: Vec<QuestionSlot>,
    pub alignment_markers: Vec<AlignmentMarker>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct SheetLayoutFileV1 {
    schema: String,
    name: String,
    page_size: [f32; 2],
    #[serde(default)]
    alignment_markers: Vec<AlignmentMarker>,
    questions: Vec<QuestionSpec>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct QuestionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    number: Option<u32>,
    options: Vec<OptionSpec>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct OptionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    letter: Option<String>,
    #[serde(default)]
    shape: BubbleShape,
    center: [f32; 2],
    size: [f32; 2],
}

/// Positional option letter: 0 ⇒ `A`, 1 ⇒ `B`, ... `None` past `Z`.
pub fn option_letter(index: usize) -> Option<String> {
    (index < MAX_OPTIONS).then(|| char::from(b'A' + index as u8).to_string())
}

impl SheetLayout {
    /// Build a layout, validating every structural invariant.
    pub fn new(
        name: impl Into<String>,
        page_size: [f32; 2],
        questions: Vec<QuestionSlot>,
        alignment_markers: Vec<AlignmentMarker>,
    ) -> EngineResult<Self> {
        let layout = Self {
            name: name.into(),
            page_size,
            questions,
            alignment_markers,
        };
        layout.validate()?;
        Ok(layout)
    }

    /// Load a layout from a JSON file.
    pub fn from_json_file(path: &Path) -> EngineResult<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            EngineError::invalid_layout(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&data)
    }

    /// Parse a layout from a JSON document.
    pub fn from_json_str(data: &str) -> EngineResult<Self> {
        let spec: SheetLayoutFileV1 =
            serde_json::from_str(data).map_err(|e| EngineError::invalid_layout(e.to_string()))?;
        Self::from_file_repr(spec)
    }

    /// Serialize back to the versioned JSON schema.
    pub fn to_json_string(&self) -> String {
        let spec = SheetLayoutFileV1 {
            schema: LAYOUT_SCHEMA_V1.to_string(),
            name: self.name.clone(),
            page_size: self.page_size,
            alignment_markers: self.alignment_markers.clone(),
            questions: self
                .questions
                .iter()
                .map(|q| QuestionSpec {
                    number: Some(q.number),
                    options: q
                        .options
                        .iter()
                        .map(|o| OptionSpec {
                            letter: Some(o.letter.clone()),
                            shape: o.shape,
                            center: o.center,
                            size: o.size,
                        })
                        .collect(),
                })
                .collect(),
        };
        serde_json::to_string_pretty(&spec).unwrap_or_default()
    }

    fn from_file_repr(spec: SheetLayoutFileV1) -> EngineResult<Self> {
        if spec.schema != LAYOUT_SCHEMA_V1 {
            return Err(EngineError::invalid_layout(format!(
                "unsupported layout schema '{}' (expected '{}')",
                spec.schema, LAYOUT_SCHEMA_V1
            )));
        }

        let questions = spec
            .questions
            .into_iter()
            .enumerate()
            .map(|(qi, q)| QuestionSlot {
                number: q.number.unwrap_or(qi as u32 + 1),
                options: q
                    .options
                    .into_iter()
                    .enumerate()
                    .map(|(oi, o)| OptionRegion {
                        letter: o
                            .letter
                            .map(|l| l.trim().to_ascii_uppercase())
                            .or_else(|| option_letter(oi))
                            .unwrap_or_default(),
                        shape: o.shape,
                        center: o.center,
                        size: o.size,
                    })
                    .collect(),
            })
            .collect();

        Self::new(spec.name, spec.page_size, questions, spec.alignment_markers)
    }

    /// Number of question slots.
    pub fn n_questions(&self) -> usize {
        self.questions.len()
    }

    /// Total number of option regions across all questions.
    pub fn n_options(&self) -> usize {
        self.questions.iter().map(|q| q.options.len()).sum()
    }

    /// Check every structural invariant. Fields are public, so layouts
    /// built by hand are re-checked before analysis.
    pub(crate) fn validate(&self) -> EngineResult<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::invalid_layout("layout name must not be empty"));
        }
        let [pw, ph] = self.page_size;
        if !(pw.is_finite() && ph.is_finite()) || pw <= 0.0 || ph <= 0.0 {
            return Err(EngineError::invalid_layout(
                "page_size must be finite and > 0",
            ));
        }
        if self.questions.is_empty() {
            return Err(EngineError::invalid_layout(
                "layout must contain at least one question",
            ));
        }

        let mut numbers = HashSet::new();
        for q in &self.questions {
            if !numbers.insert(q.number) {
                return Err(EngineError::invalid_layout(format!(
                    "duplicate question number {}",
                    q.number
                )));
            }
            validate_question(q)?;
        }

        for m in &self.alignment_markers {
            if !(m.size.is_finite() && m.size > 0.0) {
                return Err(EngineError::invalid_layout(
                    "alignment marker size must be finite and > 0",
                ));
            }
        }
        Ok(())
    }
}

fn validate_question(q: &QuestionSlot) -> EngineResult<()> {
    if q.options.len() < 2 {
        return Err(EngineError::invalid_layout(format!(
            "question {} has {} option(s); at least 2 are required",
            q.number,
            q.options.len()
        )));
    }
    if q.options.len() > MAX_OPTIONS {
        return Err(EngineError::invalid_layout(format!(
            "question {} has more than {MAX_OPTIONS} options",
            q.number
        )));
    }

    let mut letters = HashSet::new();
    for o in &q.options {
        if o.letter.len() != 1 || !o.letter.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(EngineError::invalid_layout(format!(
                "question {}: option letter '{}' must be a single letter A-Z",
                q.number, o.letter
            )));
        }
        if !letters.insert(o.letter.as_str()) {
            return Err(EngineError::invalid_layout(format!(
                "question {}: duplicate option letter '{}'",
                q.number, o.letter
            )));
        }
        let finite = o.center.iter().chain(o.size.iter()).all(|v| v.is_finite());
        if !finite || o.size[0] <= 0.0 || o.size[1] <= 0.0 {
            return Err(EngineError::invalid_layout(format!(
                "question {}: option {} must have finite center and positive size",
                q.number, o.letter
            )));
        }
    }

    for (i, a) in q.options.iter().enumerate() {
        for b in &q.options[i + 1..] {
            if a.overlaps(b) {
                return Err(EngineError::invalid_layout(format!(
                    "question {}: option regions {} and {} overlap",
                    q.number, a.letter, b.letter
                )));
            }
        }
    }
    Ok(())
}

/// Grid parameters used to infer a layout when none is supplied.
///
/// Questions are numbered column-major: 1..=rows down the first column,
/// then down the second column, and so on. Within a column the left
/// `label_gutter_frac` is reserved for printed question numbers and the
/// options are spread evenly over the rest.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct LayoutInference {
    pub question_count: u32,
    pub columns: u32,
    pub rows_per_column: u32,
    pub options_per_question: u32,
    /// Page margin on every side, as a fraction of the page extent.
    pub margin_frac: f32,
    /// Fraction of each column reserved for question labels.
    pub label_gutter_frac: f32,
    /// Bubble diameter as a fraction of the smaller of option pitch and row height.
    pub bubble_frac: f32,
    pub shape: BubbleShape,
}

impl Default for LayoutInference {
    fn default() -> Self {
        Self {
            question_count: 20,
            columns: 1,
            rows_per_column: 20,
            options_per_question: 4,
            margin_frac: 0.08,
            label_gutter_frac: 0.25,
            bubble_frac: 0.6,
            shape: BubbleShape::Ellipse,
        }
    }
}

impl LayoutInference {
    pub(crate) fn validate(&self) -> EngineResult<()> {
        if self.question_count == 0 || self.columns == 0 || self.rows_per_column == 0 {
            return Err(EngineError::invalid_config(
                "layout inference needs question_count, columns and rows_per_column >= 1",
            ));
        }
        if u64::from(self.question_count) > u64::from(self.columns) * u64::from(self.rows_per_column)
        {
            return Err(EngineError::invalid_config(format!(
                "layout inference: {} questions do not fit in {} column(s) of {} row(s)",
                self.question_count, self.columns, self.rows_per_column
            )));
        }
        if self.options_per_question < 2 || self.options_per_question as usize > MAX_OPTIONS {
            return Err(EngineError::invalid_config(format!(
                "layout inference: options_per_question must be in 2..={MAX_OPTIONS}"
            )));
        }
        if !(0.0..0.5).contains(&self.margin_frac)
            || !(0.0..1.0).contains(&self.label_gutter_frac)
            || !(self.bubble_frac > 0.0 && self.bubble_frac < 1.0)
        {
            return Err(EngineError::invalid_config(
                "layout inference: margin_frac in [0,0.5), label_gutter_frac in [0,1), bubble_frac in (0,1)",
            ));
        }
        Ok(())
    }

    /// Generate a layout covering a page of `page_size` layout units.
    pub fn generate(&self, page_size: [f32; 2]) -> EngineResult<SheetLayout> {
        self.validate()?;
        let [pw, ph] = page_size;
        let x0 = pw * self.margin_frac;
        let y0 = ph * self.margin_frac;
        let content_w = pw - 2.0 * x0;
        let content_h = ph - 2.0 * y0;

        let col_w = content_w / self.columns as f32;
        let row_h = content_h / self.rows_per_column as f32;
        let n_opts = self.options_per_question as usize;
        let opts_w = col_w * (1.0 - self.label_gutter_frac);
        let pitch = opts_w / n_opts as f32;
        let diameter = pitch.min(row_h) * self.bubble_frac;

        let rows = self.rows_per_column;
        let questions = (0..self.question_count)
            .map(|i| {
                let col = (i / rows) as f32;
                let row = (i % rows) as f32;
                let opts_x0 = x0 + col * col_w + col_w * self.label_gutter_frac;
                let cy = y0 + row_h * (row + 0.5);
                QuestionSlot {
                    number: i + 1,
                    options: (0..n_opts)
                        .map(|j| OptionRegion {
                            letter: option_letter(j).unwrap_or_default(),
                            shape: self.shape,
                            center: [opts_x0 + pitch * (j as f32 + 0.5), cy],
                            size: [diameter, diameter],
                        })
                        .collect(),
                }
            })
            .collect();

        SheetLayout::new("inferred_grid", page_size, questions, Vec::new())
    }
}
